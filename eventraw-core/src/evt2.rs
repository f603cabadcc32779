//! Stateful EVT 2.0 decoder.
//!
//! EVT 2.0 streams carry 4-byte records. CD records only hold the 6 low
//! bits of their timestamp; the upper 28 bits come from the last
//! EVT_TIME_HIGH record. The resulting 34-bit clock wraps around after
//! about 4.8 hours, which the decoder unrolls into a 64-bit timestamp.

use crate::decoder::{fill_chunk, DecodeSummary, READ_BUFFER_SIZE};
use crate::parser::{self, Evt2RecordType, EVT2_RECORD_SIZE};
use crate::types::{PolarityEvent, SensorGeometry};
use std::io::{self, Read};
use std::ops::ControlFlow;

/// Period of the 34-bit hardware clock, in microseconds.
const TIME_LOOP: u64 = 1 << 34;

/// Unrolled EVT 2.0 timebase.
#[derive(Debug, Default, Clone, Copy)]
struct Timebase {
    /// Accumulated wraparound offset
    offset: u64,
    /// Last time-high value, before the offset
    time_high: u64,
    /// Start of the current time-high period, offset included
    reference_t: u64,
}

impl Timebase {
    #[inline]
    fn update(&mut self, time_high: u64) {
        if time_high < self.time_high {
            self.offset += TIME_LOOP;
        }
        self.time_high = time_high;
        self.reference_t = time_high + self.offset;
    }
}

/// Stateful EVT 2.0 decoder.
#[derive(Debug)]
pub struct Evt2Decoder {
    geometry: SensorGeometry,
    normalize: bool,
    timebase: Timebase,
    first_t: Option<u64>,
    previous_t: u64,
}

impl Evt2Decoder {
    /// Creates a decoder for the given sensor geometry.
    pub fn new(geometry: SensorGeometry) -> Self {
        Self {
            geometry,
            normalize: false,
            timebase: Timebase::default(),
            first_t: None,
            previous_t: 0,
        }
    }

    /// Shifts timestamps so that the first event happens at t = 0.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Resets the decoder state, keeping its configuration.
    pub fn reset(&mut self) {
        self.timebase = Timebase::default();
        self.first_t = None;
        self.previous_t = 0;
    }

    /// Decodes every complete record in `bytes`.
    ///
    /// Trailing bytes that do not form a full record are ignored.
    pub fn decode_buffer<F>(
        &mut self,
        bytes: &[u8],
        summary: &mut DecodeSummary,
        sink: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        for record in bytes.chunks_exact(EVT2_RECORD_SIZE) {
            let word = parser::evt2_word(record);

            match Evt2RecordType::from_u8(parser::evt2_get_type(word)) {
                Some(record_type @ (Evt2RecordType::CdOff | Evt2RecordType::CdOn)) => {
                    let t = self.cd_timestamp(parser::evt2_cd_get_time_low(word));
                    let x = parser::evt2_cd_get_x(word);
                    let y = parser::evt2_cd_get_y(word);
                    let polarity = record_type == Evt2RecordType::CdOn;

                    if self.geometry.contains(x, y) {
                        let event = PolarityEvent::new(t, x, self.geometry.flip_y(y), polarity);
                        summary.emit(sink, event)?;
                    } else {
                        summary.out_of_bounds(t, x, y, polarity);
                    }
                }

                Some(Evt2RecordType::TimeHigh) => {
                    self.timebase
                        .update(parser::evt2_time_high_get_value(word));
                }

                Some(Evt2RecordType::ExtTrigger)
                | Some(Evt2RecordType::Others)
                | Some(Evt2RecordType::Continued) => {
                    // Not part of the polarity stream
                }

                None => {
                    // Reserved/unknown record type, skip
                }
            }
        }
        ControlFlow::Continue(())
    }

    /// Reconstructs the timestamp of a CD record.
    ///
    /// Normalized timestamps are clamped so that they never go backward.
    #[inline]
    fn cd_timestamp(&mut self, time_low: u64) -> u64 {
        let mut t = self.timebase.reference_t + time_low;
        if self.normalize {
            let first_t = *self.first_t.get_or_insert(t);
            t = t.saturating_sub(first_t);
        }
        if t < self.previous_t {
            t = self.previous_t;
        } else {
            self.previous_t = t;
        }
        t
    }

    /// Decodes an EVT 2.0 stream positioned on its first record.
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
