//! Text header resolution.
//!
//! Raw recordings may start with a block of printable lines, each prefixed
//! with `%`. The block carries the sensor geometry and, for legacy DAT
//! files, the record layout version. A missing or corrupt block is not an
//! error: the reader is rewound to the first byte and the caller's
//! defaults are used instead.

use crate::types::SensorGeometry;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use tracing::debug;

/// First byte of every header line.
pub const HEADER_MARKER: u8 = b'%';

/// Number of bytes between a legacy header block and its first record
/// (event type and event size).
const DAT_PREAMBLE_SIZE: u64 = 2;

/// Resolved header of a legacy DAT file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyHeader {
    /// Record layout version
    pub version: u8,
    /// Sensor geometry used for bounds checks and the vertical flip
    pub geometry: SensorGeometry,
}

/// Values found in an accepted header block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFields {
    pub version: Option<u8>,
    pub width: Option<u16>,
    pub height: Option<u16>,
}

impl HeaderFields {
    /// Parses every line of a header block. Later lines override earlier ones.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut fields = Self::default();
        for line in lines {
            fields.parse_line(line.as_ref());
        }
        fields
    }

    /// Parses a single header line (without the marker).
    ///
    /// Unknown keys and unparsable numbers are ignored.
    pub fn parse_line(&mut self, line: &str) {
        let mut words = line.split_ascii_whitespace();
        let (Some(key), Some(value)) = (words.next(), words.next()) else {
            return;
        };

        match key {
            "Version" => {
                if let Ok(version) = value.parse() {
                    self.version = Some(version);
                }
            }
            "Width" => {
                if let Ok(width) = value.parse() {
                    self.width = Some(width);
                }
            }
            "Height" => {
                if let Ok(height) = value.parse() {
                    self.height = Some(height);
                }
            }
            "geometry" => {
                // Format: "% geometry 1280x720"
                if let Some((width, height)) = value.split_once('x') {
                    if let (Ok(width), Ok(height)) = (width.parse(), height.parse()) {
                        self.width = Some(width);
                        self.height = Some(height);
                    }
                }
            }
            "format" => {
                // Format: "% format EVT3;width=1280;height=720"
                for part in value.split(';') {
                    match part.split_once('=') {
                        Some(("width", width)) => {
                            if let Ok(width) = width.parse() {
                                self.width = Some(width);
                            }
                        }
                        Some(("height", height)) => {
                            if let Ok(height) = height.parse() {
                                self.height = Some(height);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    /// Applies the parsed dimensions on top of `defaults`.
    ///
    /// Falls back to `defaults` entirely if either dimension resolves to zero.
    pub fn refine(&self, defaults: SensorGeometry) -> SensorGeometry {
        let geometry = SensorGeometry::new(
            self.width.unwrap_or(defaults.width),
            self.height.unwrap_or(defaults.height),
        );
        if geometry.is_valid() {
            geometry
        } else {
            defaults
        }
    }
}

/// Returns `true` for bytes allowed in a header line (printable or whitespace).
#[inline]
fn is_header_byte(byte: u8) -> bool {
    byte.is_ascii_graphic() || matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

/// Reads the header block, without the markers and line terminators.
///
/// Returns `None` if the block is empty or contains a non-printable byte.
/// In that case the reader is moved back to where it started.
pub fn read_header_lines<R: BufRead + Seek>(reader: &mut R) -> io::Result<Option<Vec<String>>> {
    let start = reader.stream_position()?;
    let mut lines = Vec::new();
    let mut printable = true;

    loop {
        let next = reader.fill_buf()?.first().copied();
        if next != Some(HEADER_MARKER) {
            break;
        }
        reader.consume(1);

        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        printable &= line.iter().all(|&byte| is_header_byte(byte));

        let line = String::from_utf8_lossy(&line).into_owned();
        let is_end = line.split_ascii_whitespace().next() == Some("end");
        lines.push(line);

        // "% end" closes the block even if the payload starts with the marker
        if is_end && printable {
            break;
        }
    }

    if lines.is_empty() || !printable {
        reader.seek(SeekFrom::Start(start))?;
        return Ok(None);
    }
    Ok(Some(lines))
}

/// Resolves the header of an EVT 2.0 or EVT 3.0 recording.
///
/// Header values refine `defaults`. On return the reader is positioned on
/// the first payload byte.
pub fn read_header<R: BufRead + Seek>(
    reader: &mut R,
    defaults: SensorGeometry,
) -> io::Result<SensorGeometry> {
    let Some(lines) = read_header_lines(reader)? else {
        debug!(
            width = defaults.width,
            height = defaults.height,
            "no usable header, using default geometry"
        );
        return Ok(defaults);
    };

    let geometry = HeaderFields::from_lines(&lines[..]).refine(defaults);
    debug!(
        width = geometry.width,
        height = geometry.height,
        lines = lines.len(),
        "resolved header"
    );
    Ok(geometry)
}

/// Resolves the header of a legacy DAT recording.
///
/// Files with a layout version below 2 always use `defaults`. Newer files
/// refine `defaults` with their `Width` and `Height` lines. On return the
/// reader is positioned on the first record.
pub fn read_legacy_header<R: BufRead + Seek>(
    reader: &mut R,
    defaults: SensorGeometry,
) -> io::Result<LegacyHeader> {
    let Some(lines) = read_header_lines(reader)? else {
        debug!(
            width = defaults.width,
            height = defaults.height,
            "no usable DAT header, using default geometry"
        );
        return Ok(LegacyHeader {
            version: 0,
            geometry: defaults,
        });
    };
    io::copy(&mut reader.by_ref().take(DAT_PREAMBLE_SIZE), &mut io::sink())?;

    let fields = HeaderFields::from_lines(&lines[..]);
    let version = fields.version.unwrap_or(0);
    let geometry = if version < 2 {
        defaults
    } else {
        fields.refine(defaults)
    };
    debug!(
        version,
        width = geometry.width,
        height = geometry.height,
        "resolved DAT header"
    );
    Ok(LegacyHeader { version, geometry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_absent_header_keeps_position() {
        let mut reader = Cursor::new(vec![0x01, 0x02, 0x03]);
        let geometry = read_header(&mut reader, SensorGeometry::EVT2_DEFAULT).unwrap();
        assert_eq!(geometry, SensorGeometry::EVT2_DEFAULT);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_non_printable_header_is_rejected() {
        let mut data = b"% Width 640\n% Hei\x01ght 480\n".to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = Cursor::new(data);

        let geometry = read_header(&mut reader, SensorGeometry::EVT3_DEFAULT).unwrap();
        assert_eq!(geometry, SensorGeometry::EVT3_DEFAULT);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_width_height_lines() {
        let mut data = b"% Width 320\n% Height 240\n".to_vec();
        data.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = Cursor::new(data);

        let geometry = read_header(&mut reader, SensorGeometry::EVT3_DEFAULT).unwrap();
        assert_eq!(geometry, SensorGeometry::new(320, 240));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_geometry_and_width_height_are_equivalent() {
        let from_geometry = HeaderFields::from_lines(&[" geometry 320x240"]);
        let from_pair = HeaderFields::from_lines(&[" Width 320", " Height 240"]);
        let both = HeaderFields::from_lines(&[" Width 320", " Height 240", " geometry 320x240"]);
        let defaults = SensorGeometry::EVT3_DEFAULT;
        assert_eq!(from_geometry.refine(defaults), from_pair.refine(defaults));
        assert_eq!(both.refine(defaults), SensorGeometry::new(320, 240));
    }

    #[test]
    fn test_last_line_wins() {
        let fields = HeaderFields::from_lines(&[" geometry 320x240", " Width 640"]);
        assert_eq!(
            fields.refine(SensorGeometry::EVT3_DEFAULT),
            SensorGeometry::new(640, 240)
        );
    }

    #[test]
    fn test_format_line() {
        let fields = HeaderFields::from_lines(&[" format EVT3;width=640;height=480"]);
        assert_eq!(fields.width, Some(640));
        assert_eq!(fields.height, Some(480));
    }

    #[test]
    fn test_unparsable_numbers_are_ignored() {
        let fields = HeaderFields::from_lines(&[" Width abc", " Height 100", " geometry 12xq"]);
        assert_eq!(fields.width, None);
        assert_eq!(fields.height, Some(100));
    }

    #[test]
    fn test_zero_dimension_falls_back() {
        let fields = HeaderFields::from_lines(&[" Width 0", " Height 100"]);
        assert_eq!(
            fields.refine(SensorGeometry::EVT2_DEFAULT),
            SensorGeometry::EVT2_DEFAULT
        );
    }

    #[test]
    fn test_end_line_stops_header() {
        // The payload starts with the marker byte
        let data = b"% geometry 640x480\n% end\n%\x00".to_vec();
        let mut reader = Cursor::new(data);

        let geometry = read_header(&mut reader, SensorGeometry::EVT3_DEFAULT).unwrap();
        assert_eq!(geometry, SensorGeometry::new(640, 480));
        assert_eq!(reader.position(), 25);
    }

    #[test]
    fn test_legacy_header_v2() {
        let mut data = b"% Date 2014-02-28\n% Version 2\n% Width 640\n% Height 480\n".to_vec();
        data.extend_from_slice(&[0x00, 0x08, 0xAA]);
        let mut reader = Cursor::new(data);

        let header = read_legacy_header(&mut reader, SensorGeometry::DAT_DEFAULT).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.geometry, SensorGeometry::new(640, 480));

        // The two preamble bytes are skipped
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0xAA]);
    }

    #[test]
    fn test_legacy_header_v1_uses_defaults() {
        let mut data = b"% Version 1\n% Width 640\n% Height 480\n".to_vec();
        data.extend_from_slice(&[0x00, 0x08]);
        let mut reader = Cursor::new(data);

        let header = read_legacy_header(&mut reader, SensorGeometry::DAT_DEFAULT).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.geometry, SensorGeometry::DAT_DEFAULT);
    }

    #[test]
    fn test_legacy_header_absent() {
        let mut reader = Cursor::new(vec![0u8; 16]);
        let header = read_legacy_header(&mut reader, SensorGeometry::DAT_DEFAULT).unwrap();
        assert_eq!(header.version, 0);
        assert_eq!(header.geometry, SensorGeometry::DAT_DEFAULT);
        assert_eq!(reader.position(), 0);
    }
}
