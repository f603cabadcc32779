//! Stateful EVT 3.0 decoder.
//!
//! EVT 3.0 streams carry 2-byte records that update a running state
//! (row, column, polarity, time) instead of describing whole events.
//! Events are emitted by EVT_ADDR_X records and by vector records, which
//! encode up to 12 consecutive columns in a bitmask.

use crate::decoder::{fill_chunk, DecodeSummary, READ_BUFFER_SIZE};
use crate::parser::{self, Evt3RecordType, EVT3_RECORD_SIZE};
use crate::types::{PolarityEvent, SensorGeometry};
use std::io::{self, Read};
use std::ops::ControlFlow;

/// A jump of the 12-bit time-high counter larger than this is a wrap of
/// the 24-bit timebase; smaller backward jumps are jitter.
const OVERFLOW_THRESHOLD: u32 = (1 << 12) - 2;

/// Raw EVT 3.0 time fields.
#[derive(Debug, Default, Clone, Copy)]
struct Timebase {
    time_low: u32,
    time_high: u32,
    overflows: u32,
}

impl Timebase {
    /// Microseconds since the start of the recording.
    #[inline]
    fn timestamp(&self) -> u64 {
        (self.time_low | (self.time_high << 12)) as u64 + ((self.overflows as u64) << 24)
    }

    /// Applies a TIME_LOW value. Returns `true` if the time changed.
    #[inline]
    fn update_low(&mut self, time_low: u32) -> bool {
        if time_low == self.time_low {
            return false;
        }
        self.time_low = time_low;
        true
    }

    /// Applies a TIME_HIGH value. Returns `true` if the time may have changed.
    #[inline]
    fn update_high(&mut self, time_high: u32) -> bool {
        if time_high == self.time_high {
            return false;
        }
        if time_high > self.time_high {
            if time_high - self.time_high < OVERFLOW_THRESHOLD {
                self.time_low = 0;
                self.time_high = time_high;
            }
        } else if self.time_high - time_high > OVERFLOW_THRESHOLD {
            self.overflows += 1;
            self.time_low = 0;
            self.time_high = time_high;
        }
        true
    }
}

/// Stateful EVT 3.0 decoder.
///
/// Maintains the running state needed to rebuild events from the record
/// stream. Timestamps never move backward.
#[derive(Debug)]
pub struct Evt3Decoder {
    geometry: SensorGeometry,
    normalize: bool,
    timebase: Timebase,
    first_t: Option<u64>,

    // Current event state
    t: u64,
    x: u16,
    y: u16,
    polarity: bool,
}

impl Evt3Decoder {
    /// Creates a decoder for the given sensor geometry.
    pub fn new(geometry: SensorGeometry) -> Self {
        Self {
            geometry,
            normalize: false,
            timebase: Timebase::default(),
            first_t: None,
            t: 0,
            x: 0,
            y: 0,
            polarity: false,
        }
    }

    /// Shifts timestamps so that the first reconstructed time is zero.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Resets the decoder state, keeping its configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.geometry).with_normalize(self.normalize);
    }

    /// Number of 24-bit timebase overflows seen so far.
    pub fn overflows(&self) -> u32 {
        self.timebase.overflows
    }

    /// Decodes every complete record in `bytes`.
    pub fn decode_buffer<F>(
        &mut self,
        bytes: &[u8],
        summary: &mut DecodeSummary,
        sink: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        for record in bytes.chunks_exact(EVT3_RECORD_SIZE) {
            let word = parser::evt3_word(record);

            match Evt3RecordType::from_u8(parser::evt3_get_type(word)) {
                Some(Evt3RecordType::AddrY) => {
                    self.y = self.geometry.flip_y(parser::evt3_get_address(word));
                }

                Some(Evt3RecordType::AddrX) => {
                    self.x = parser::evt3_get_address(word);
                    self.polarity = parser::evt3_get_polarity(word);
                    self.emit_current(summary, sink)?;
                }

                Some(Evt3RecordType::VectBaseX) => {
                    self.x = parser::evt3_get_address(word);
                    self.polarity = parser::evt3_get_polarity(word);
                }

                Some(Evt3RecordType::Vect12) => {
                    let valid = parser::evt3_vect_12_get_valid(word);
                    self.process_vector_events(valid, 12, summary, sink)?;
                }

                Some(Evt3RecordType::Vect8) => {
                    let valid = parser::evt3_vect_8_get_valid(word);
                    self.process_vector_events(valid, 8, summary, sink)?;
                }

                Some(Evt3RecordType::TimeLow) => {
                    if self.timebase.update_low(parser::evt3_time_get_value(word)) {
                        self.advance_time();
                    }
                }

                Some(Evt3RecordType::TimeHigh) => {
                    if self.timebase.update_high(parser::evt3_time_get_value(word)) {
                        self.advance_time();
                    }
                }

                Some(Evt3RecordType::ExtTrigger)
                | Some(Evt3RecordType::Continued4)
                | Some(Evt3RecordType::Others)
                | Some(Evt3RecordType::Continued12) => {
                    // Not part of the polarity stream
                }

                None => {
                    // Reserved/unknown record type, skip
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Moves the current time forward to the timebase, never backward.
    #[inline]
    fn advance_time(&mut self) {
        let mut t = self.timebase.timestamp();
        if self.normalize {
            let first_t = *self.first_t.get_or_insert(t);
            t = t.saturating_sub(first_t);
        }
        if t >= self.t {
            self.t = t;
        }
    }

    /// Emits the event described by the current state, if it is on the sensor.
    #[inline]
    fn emit_current<F>(&mut self, summary: &mut DecodeSummary, sink: &mut F) -> ControlFlow<()>
    where
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        if self.geometry.contains(self.x, self.y) {
            summary.emit(sink, PolarityEvent::new(self.t, self.x, self.y, self.polarity))
        } else {
            summary.out_of_bounds(self.t, self.x, self.y, self.polarity);
            ControlFlow::Continue(())
        }
    }

    /// Processes a VECT_12 or VECT_8 record.
    ///
    /// Bit `i` of `valid` marks an event at column `x + i`. The column then
    /// moves past the vector so that the next one continues the run.
    #[inline]
    fn process_vector_events<F>(
        &mut self,
        valid: u16,
        count: u16,
        summary: &mut DecodeSummary,
        sink: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        for bit in 0..count {
            if (valid >> bit) & 1 == 1 {
                self.emit_current(summary, sink)?;
            }
            self.x = self.x.wrapping_add(1);
        }
        ControlFlow::Continue(())
    }

    /// Decodes an EVT 3.0 stream positioned on its first record.
    pub fn decode<R, F>(&mut self, mut reader: R, mut sink: F) -> io::Result<DecodeSummary>
    where
        R: Read,
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        let mut summary = DecodeSummary::default();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let bytes_read = fill_chunk(&mut reader, &mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            if self
                .decode_buffer(&buffer[..bytes_read], &mut summary, &mut sink)
                .is_break()
            {
                break;
            }
            if bytes_read < buffer.len() {
                break;
            }
        }

        Ok(summary)
    }
}
