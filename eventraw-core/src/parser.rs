#![allow(clippy::unusual_byte_groupings)]
//! Low-level parsing of raw records.
//!
//! Every wire layout is a pure function from record bytes to fields. The
//! stateful decoders in [`crate::dat`], [`crate::evt2`] and [`crate::evt3`]
//! select the function from a closed set of record tags.

use byteorder::{ByteOrder, LittleEndian};

// ============================================================================
// DAT (legacy, 8-byte records)
// Bytes: [3:0] t (u32 LE) | [7:4] packed address word (u32 LE)
// ============================================================================

/// Size of one legacy record in bytes.
pub const DAT_RECORD_SIZE: usize = 8;

/// Bit layout of the address word of a legacy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatLayout {
    /// Versions 0 and 1.
    /// Bits: [8:0] x | [16:9] y | [17] polarity
    Original,
    /// Version 2 and later.
    /// Bits: [13:0] x | [27:14] y | [28] polarity
    Extended,
}

impl DatLayout {
    /// Selects the layout used by a header version.
    #[inline]
    pub fn from_version(version: u8) -> Self {
        if version < 2 {
            Self::Original
        } else {
            Self::Extended
        }
    }
}

/// Fields of a legacy record before the vertical flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatFields {
    pub t: u32,
    pub x: u16,
    pub y: u16,
    pub polarity: bool,
}

/// Unpacks a legacy record. `record` must hold at least [`DAT_RECORD_SIZE`] bytes.
#[inline]
pub fn dat_fields(record: &[u8], layout: DatLayout) -> DatFields {
    let t = LittleEndian::read_u32(&record[0..4]);
    let address = LittleEndian::read_u32(&record[4..8]);
    match layout {
        DatLayout::Original => DatFields {
            t,
            x: (address & 0x1FF) as u16,
            y: ((address >> 9) & 0xFF) as u16,
            polarity: (address >> 17) & 1 == 1,
        },
        DatLayout::Extended => DatFields {
            t,
            x: (address & 0x3FFF) as u16,
            y: ((address >> 14) & 0x3FFF) as u16,
            polarity: (address >> 28) & 1 == 1,
        },
    }
}

// ============================================================================
// EVT 2.0 (4-byte records)
// Bits: [31:28] type | [27:0] payload
// ============================================================================

/// Size of one EVT 2.0 record in bytes.
pub const EVT2_RECORD_SIZE: usize = 4;

/// EVT 2.0 record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Evt2RecordType {
    /// Brightness decrease (0x0)
    CdOff = 0x0,
    /// Brightness increase (0x1)
    CdOn = 0x1,
    /// Upper 28 bits of the 34-bit timestamp (0x8)
    TimeHigh = 0x8,
    /// External trigger (0xA)
    ExtTrigger = 0xA,
    /// Extension type (0xE)
    Others = 0xE,
    /// Continuation of a previous record (0xF)
    Continued = 0xF,
}

impl Evt2RecordType {
    /// Attempts to parse a record type from a 4-bit value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::CdOff),
            0x1 => Some(Self::CdOn),
            0x8 => Some(Self::TimeHigh),
            0xA => Some(Self::ExtTrigger),
            0xE => Some(Self::Others),
            0xF => Some(Self::Continued),
            _ => None,
        }
    }
}

/// Reads an EVT 2.0 record as a little-endian word.
#[inline]
pub fn evt2_word(record: &[u8]) -> u32 {
    LittleEndian::read_u32(record)
}

/// Extracts the 4-bit record type from an EVT 2.0 word.
#[inline]
pub fn evt2_get_type(word: u32) -> u8 {
    (word >> 28) as u8
}

// CD_OFF / CD_ON
// Bits: [31:28] type | [27:22] timestamp LSB | [21:11] x | [10:0] y

/// Extracts the 6 low timestamp bits of a CD record.
#[inline]
pub fn evt2_cd_get_time_low(word: u32) -> u64 {
    ((word >> 22) & 0x3F) as u64
}

/// Extracts the X coordinate of a CD record.
#[inline]
pub fn evt2_cd_get_x(word: u32) -> u16 {
    ((word >> 11) & 0x07FF) as u16
}

/// Extracts the Y coordinate of a CD record (before the vertical flip).
#[inline]
pub fn evt2_cd_get_y(word: u32) -> u16 {
    (word & 0x07FF) as u16
}

// EVT_TIME_HIGH
// Bits: [31:28] type | [27:0] timestamp MSB

/// Extracts the time-high value, already shifted into microseconds.
#[inline]
pub fn evt2_time_high_get_value(word: u32) -> u64 {
    ((word & 0x0FFF_FFFF) as u64) << 6
}

// ============================================================================
// EVT 3.0 (2-byte records)
// Bits: [15:12] type | [11:0] payload
// ============================================================================

/// Size of one EVT 3.0 record in bytes.
pub const EVT3_RECORD_SIZE: usize = 2;

/// EVT 3.0 record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Evt3RecordType {
    /// Y coordinate and system type (0x0)
    AddrY = 0x0,
    /// Single valid event with X coordinate and polarity (0x2)
    AddrX = 0x2,
    /// Base X coordinate for subsequent vector events (0x3)
    VectBaseX = 0x3,
    /// Vector event with 12 validity bits (0x4)
    Vect12 = 0x4,
    /// Vector event with 8 validity bits (0x5)
    Vect8 = 0x5,
    /// Lower 12 bits of timestamp (0x6)
    TimeLow = 0x6,
    /// Continued event with 4 bits of data (0x7)
    Continued4 = 0x7,
    /// Upper 12 bits of timestamp (0x8)
    TimeHigh = 0x8,
    /// External trigger event (0xA)
    ExtTrigger = 0xA,
    /// Extension event type (0xE)
    Others = 0xE,
    /// Continued event with 12 bits of data (0xF)
    Continued12 = 0xF,
}

impl Evt3RecordType {
    /// Attempts to parse a record type from a 4-bit value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::AddrY),
            0x2 => Some(Self::AddrX),
            0x3 => Some(Self::VectBaseX),
            0x4 => Some(Self::Vect12),
            0x5 => Some(Self::Vect8),
            0x6 => Some(Self::TimeLow),
            0x7 => Some(Self::Continued4),
            0x8 => Some(Self::TimeHigh),
            0xA => Some(Self::ExtTrigger),
            0xE => Some(Self::Others),
            0xF => Some(Self::Continued12),
            _ => None,
        }
    }
}

/// Reads an EVT 3.0 record as a little-endian word.
#[inline]
pub fn evt3_word(record: &[u8]) -> u16 {
    LittleEndian::read_u16(record)
}

/// Extracts the 4-bit record type from an EVT 3.0 word.
#[inline]
pub fn evt3_get_type(word: u16) -> u8 {
    ((word >> 12) & 0xF) as u8
}

// EVT_ADDR_Y / EVT_ADDR_X / VECT_BASE_X
// Bits: [15:12] type | [11] system type or polarity | [10:0] coordinate

/// Extracts the 11-bit coordinate of an address word.
#[inline]
pub fn evt3_get_address(word: u16) -> u16 {
    word & 0x07FF
}

/// Extracts the polarity of an EVT_ADDR_X or VECT_BASE_X word.
#[inline]
pub fn evt3_get_polarity(word: u16) -> bool {
    (word >> 11) & 0x1 == 1
}

// VECT_12: [11:0] valid | VECT_8: [11:8] unused, [7:0] valid

/// Extracts the 12-bit validity mask from a VECT_12 word.
#[inline]
pub fn evt3_vect_12_get_valid(word: u16) -> u16 {
    word & 0x0FFF
}

/// Extracts the 8-bit validity mask from a VECT_8 word.
#[inline]
pub fn evt3_vect_8_get_valid(word: u16) -> u16 {
    word & 0x00FF
}

// EVT_TIME_LOW / EVT_TIME_HIGH: [11:0] time

/// Extracts the 12-bit time value from a TIME_LOW or TIME_HIGH word.
#[inline]
pub fn evt3_time_get_value(word: u16) -> u32 {
    (word & 0x0FFF) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dat_original_layout() {
        // t=1000, x=5, y=10, polarity=1
        let address: u32 = 5 | (10 << 9) | (1 << 17);
        let mut record = [0u8; 8];
        record[0..4].copy_from_slice(&1000u32.to_le_bytes());
        record[4..8].copy_from_slice(&address.to_le_bytes());

        let fields = dat_fields(&record, DatLayout::Original);
        assert_eq!(
            fields,
            DatFields {
                t: 1000,
                x: 5,
                y: 10,
                polarity: true
            }
        );
    }

    #[test]
    fn test_dat_extended_layout() {
        // x=1000 and y=9000 need the wide fields
        let address: u32 = 1000 | (9000 << 14) | (1 << 28);
        let mut record = [0u8; 8];
        record[0..4].copy_from_slice(&77u32.to_le_bytes());
        record[4..8].copy_from_slice(&address.to_le_bytes());

        let fields = dat_fields(&record, DatLayout::Extended);
        assert_eq!(fields.x, 1000);
        assert_eq!(fields.y, 9000);
        assert!(fields.polarity);
        assert_eq!(fields.t, 77);
    }

    #[test]
    fn test_dat_layout_from_version() {
        assert_eq!(DatLayout::from_version(0), DatLayout::Original);
        assert_eq!(DatLayout::from_version(1), DatLayout::Original);
        assert_eq!(DatLayout::from_version(2), DatLayout::Extended);
    }

    #[test]
    fn test_evt2_cd_parsing() {
        // type=1, ts=0b101010, x=300, y=200
        let word: u32 = 0b0001_101010_00100101100_00011001000;
        assert_eq!(evt2_get_type(word), 0x1);
        assert_eq!(evt2_cd_get_time_low(word), 0b101010);
        assert_eq!(evt2_cd_get_x(word), 300);
        assert_eq!(evt2_cd_get_y(word), 200);
    }

    #[test]
    fn test_evt2_time_high_parsing() {
        let word: u32 = 0x8000_0003;
        assert_eq!(
            Evt2RecordType::from_u8(evt2_get_type(word)),
            Some(Evt2RecordType::TimeHigh)
        );
        assert_eq!(evt2_time_high_get_value(word), 3 << 6);
        assert_eq!(Evt2RecordType::from_u8(0x5), None);
    }

    #[test]
    fn test_evt3_addr_x_parsing() {
        // type=2, pol=1, x=300
        let word: u16 = 0b0010_1_00100101100;
        assert_eq!(evt3_get_type(word), 0x2);
        assert_eq!(evt3_get_address(word), 300);
        assert!(evt3_get_polarity(word));
    }

    #[test]
    fn test_evt3_vect_parsing() {
        let word: u16 = 0b0100_101010101010;
        assert_eq!(evt3_vect_12_get_valid(word), 0b101010101010);
        let word: u16 = 0b0101_1111_00100001;
        assert_eq!(evt3_vect_8_get_valid(word), 0b00100001);
    }

    #[test]
    fn test_evt3_time_parsing() {
        let word = evt3_word(&[0xBC, 0x8A]);
        assert_eq!(word, 0x8ABC);
        assert_eq!(
            Evt3RecordType::from_u8(evt3_get_type(word)),
            Some(Evt3RecordType::TimeHigh)
        );
        assert_eq!(evt3_time_get_value(word), 0xABC);
        assert_eq!(Evt3RecordType::from_u8(0x1), None); // Reserved
        assert_eq!(Evt3RecordType::from_u8(0x9), None); // Reserved
    }
}
