//! Legacy DAT decoder.
//!
//! DAT recordings hold fixed 8-byte records: a 32-bit timestamp followed by
//! a packed address word whose layout depends on the header version. ATIS
//! cameras write two such files side by side, one per [`Channel`].

use crate::decoder::{fill_chunk, DecodeSummary, READ_BUFFER_SIZE};
use crate::header::LegacyHeader;
use crate::parser::{self, DatLayout, DAT_RECORD_SIZE};
use crate::types::{Channel, ExposureEvent, PolarityEvent, SensorGeometry};
use std::io::{self, Read};
use std::ops::ControlFlow;

/// Pull iterator over the raw records of a DAT stream.
///
/// Records are decoded and flipped but not filtered: out-of-bounds and
/// out-of-order events are yielded as they are. A trailing partial record
/// is discarded.
pub struct DatRecords<R> {
    reader: R,
    layout: DatLayout,
    geometry: SensorGeometry,
    buffer: Vec<u8>,
    position: usize,
    length: usize,
    exhausted: bool,
}

impl<R: Read> DatRecords<R> {
    /// Creates an iterator over a stream positioned on its first record.
    pub fn new(reader: R, header: LegacyHeader) -> Self {
        Self {
            reader,
            layout: DatLayout::from_version(header.version),
            geometry: header.geometry,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            position: 0,
            length: 0,
            exhausted: false,
        }
    }

    /// Geometry used for the vertical flip.
    pub fn geometry(&self) -> SensorGeometry {
        self.geometry
    }

    fn next_record(&mut self) -> io::Result<Option<PolarityEvent>> {
        if self.position + DAT_RECORD_SIZE > self.length {
            if self.exhausted {
                return Ok(None);
            }
            self.length = fill_chunk(&mut self.reader, &mut self.buffer)?;
            self.position = 0;
            if self.length < self.buffer.len() {
                self.exhausted = true;
            }
            if self.length < DAT_RECORD_SIZE {
                return Ok(None);
            }
        }

        let record = &self.buffer[self.position..self.position + DAT_RECORD_SIZE];
        self.position += DAT_RECORD_SIZE;
        let fields = parser::dat_fields(record, self.layout);
        Ok(Some(PolarityEvent::new(
            fields.t as u64,
            fields.x,
            self.geometry.flip_y(fields.y),
            fields.polarity,
        )))
    }
}

impl<R: Read> Iterator for DatRecords<R> {
    type Item = io::Result<PolarityEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Stateful DAT decoder.
///
/// Drops events outside the sensor (with a warning) and events older than
/// the last accepted one (silently).
#[derive(Debug)]
pub struct DatDecoder {
    header: LegacyHeader,
    previous_t: u64,
}

impl DatDecoder {
    /// Creates a decoder for a stream whose header has already been read.
    pub fn new(header: LegacyHeader) -> Self {
        Self {
            header,
            previous_t: 0,
        }
    }

    /// The header this decoder was built with.
    pub fn header(&self) -> LegacyHeader {
        self.header
    }

    /// Applies the bounds and monotonicity filters.
    fn accept(&mut self, event: &PolarityEvent, summary: &mut DecodeSummary) -> bool {
        if !self.header.geometry.contains(event.x, event.y) {
            summary.out_of_bounds(event.t, event.x, event.y, event.polarity);
            return false;
        }
        if event.t < self.previous_t {
            summary.out_of_order += 1;
            return false;
        }
        self.previous_t = event.t;
        true
    }

    /// Decodes a change detection stream into polarity events.
    pub fn decode<R, F>(&mut self, reader: R, mut sink: F) -> io::Result<DecodeSummary>
    where
        R: Read,
        F: FnMut(PolarityEvent) -> ControlFlow<()>,
    {
        let mut summary = DecodeSummary::default();
        for event in DatRecords::new(reader, self.header) {
            let event = event?;
            if self.accept(&event, &mut summary) && summary.emit(&mut sink, event).is_break() {
                break;
            }
        }
        Ok(summary)
    }

    /// Decodes a stream as one channel of an ATIS recording.
    ///
    /// The exposure channel reuses the polarity bit of the record layout as
    /// the threshold index.
    pub fn decode_as<R, F>(
        &mut self,
        reader: R,
        channel: Channel,
        mut sink: F,
    ) -> io::Result<DecodeSummary>
    where
        R: Read,
        F: FnMut(ExposureEvent) -> ControlFlow<()>,
    {
        self.decode(reader, |event: PolarityEvent| {
            sink(event.into_exposure(channel))
        })
    }
}
