//! Decoding plumbing shared by every format.
//!
//! Decoders push events into a sink closure returning
//! [`ControlFlow`]. Returning `ControlFlow::Break(())` stops the decoder
//! right away, which lets callers bound the work to a time range without
//! scanning the rest of the file.

use crate::dat::DatDecoder;
use crate::evt2::Evt2Decoder;
use crate::evt3::Evt3Decoder;
use crate::header::{self, LegacyHeader};
use crate::types::{PolarityEvent, SensorGeometry};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::ops::ControlFlow;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Errors raised by the file-level helpers.
///
/// Stream decoders return [`io::Result`] directly: the only failure they
/// know of is the reader's own.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("the td and aps files have incompatible headers (td: {td:?}, aps: {aps:?})")]
    IncompatibleHeaders { td: LegacyHeader, aps: LegacyHeader },

    #[error("no input: the td and aps channels cannot both be absent")]
    NoInput,

    #[error("Unknown format: {0}")]
    UnknownFormat(String),
}

/// Size of the chunks read from the underlying stream, in bytes.
///
/// A multiple of every record size, so records never straddle two chunks.
pub const READ_BUFFER_SIZE: usize = 1 << 16;

/// Counters returned by every decode call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Events handed to the sink
    pub events: u64,
    /// Events dropped because they lie outside the sensor (one warning each)
    pub out_of_bounds: u64,
    /// Events dropped because their timestamp went backward
    pub out_of_order: u64,
    /// Whether the sink stopped the decoder
    pub stopped: bool,
}

impl DecodeSummary {
    /// Hands an event to the sink and records the outcome.
    #[inline]
    pub(crate) fn emit<E, F>(&mut self, sink: &mut F, event: E) -> ControlFlow<()>
    where
        F: FnMut(E) -> ControlFlow<()>,
    {
        self.events += 1;
        let flow = sink(event);
        if flow.is_break() {
            self.stopped = true;
        }
        flow
    }

    /// Records a dropped out-of-bounds event and emits its diagnostic.
    #[cold]
    pub(crate) fn out_of_bounds(&mut self, t: u64, x: u16, y: u16, polarity: bool) {
        self.out_of_bounds += 1;
        warn!(t, x, y, on = polarity, "out of bounds event");
    }
}

/// Returns a sink that appends every event to `events` and never stops.
pub fn collect_into<E>(events: &mut Vec<E>) -> impl FnMut(E) -> ControlFlow<()> + '_ {
    move |event| {
        events.push(event);
        ControlFlow::Continue(())
    }
}

/// Reads until `buffer` is full or the stream ends.
///
/// Returns the number of bytes read. Only the last chunk of a stream can
/// be shorter than the buffer.
pub fn fill_chunk<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Legacy fixed-record format (`.dat`)
    Dat,
    /// EVT 2.0, 4-byte records
    Evt2,
    /// EVT 3.0, 2-byte records
    Evt3,
}

impl FromStr for Format {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dat" => Ok(Self::Dat),
            "evt2" | "evt2.0" => Ok(Self::Evt2),
            "evt3" | "evt3.0" => Ok(Self::Evt3),
            other => Err(DecodeError::UnknownFormat(other.to_string())),
        }
    }
}

impl Format {
    /// Guesses the format from a file extension.
    ///
    /// `.raw` files may hold either EVT 2.0 or EVT 3.0 data, so only `.dat`
    /// can be recognized this way.
    pub fn from_extension<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match extension.as_str() {
            "dat" => Ok(Self::Dat),
            _ => Err(DecodeError::UnknownFormat(format!(
                "cannot infer the format of {:?}",
                path.as_ref()
            ))),
        }
    }

    /// Geometry used when the file has no usable header.
    pub fn default_geometry(self) -> SensorGeometry {
        match self {
            Self::Dat => SensorGeometry::DAT_DEFAULT,
            Self::Evt2 => SensorGeometry::EVT2_DEFAULT,
            Self::Evt3 => SensorGeometry::EVT3_DEFAULT,
        }
    }
}

/// Outcome of decoding a whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSummary {
    /// Geometry resolved from the header (or the defaults)
    pub geometry: SensorGeometry,
    /// Decoding counters
    pub summary: DecodeSummary,
}

/// Result of decoding a file into memory.
#[derive(Debug)]
pub struct DecodeResult {
    /// Decoded events, in emission order
    pub events: Vec<PolarityEvent>,
    /// Geometry resolved from the header (or the defaults)
    pub geometry: SensorGeometry,
    /// Decoding counters
    pub summary: DecodeSummary,
}

/// Decodes a recording from disk, pushing every event into `sink`.
///
/// DAT files are decoded as a change detection channel. `normalize` only
/// affects the EVT formats.
pub fn decode_file<P, F>(
    path: P,
    format: Format,
    defaults: SensorGeometry,
    normalize: bool,
    sink: F,
) -> Result<FileSummary, DecodeError>
where
    P: AsRef<Path>,
    F: FnMut(PolarityEvent) -> ControlFlow<()>,
{
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);

    let (geometry, summary) = match format {
        Format::Dat => {
            let dat_header = header::read_legacy_header(&mut reader, defaults)?;
            let summary = DatDecoder::new(dat_header).decode(&mut reader, sink)?;
            (dat_header.geometry, summary)
        }
        Format::Evt2 => {
            let geometry = header::read_header(&mut reader, defaults)?;
            let summary = Evt2Decoder::new(geometry)
                .with_normalize(normalize)
                .decode(&mut reader, sink)?;
            (geometry, summary)
        }
        Format::Evt3 => {
            let geometry = header::read_header(&mut reader, defaults)?;
            let summary = Evt3Decoder::new(geometry)
                .with_normalize(normalize)
                .decode(&mut reader, sink)?;
            (geometry, summary)
        }
    };

    Ok(FileSummary { geometry, summary })
}

/// Decodes a whole recording into memory.
pub fn read_file<P: AsRef<Path>>(
    path: P,
    format: Format,
    defaults: SensorGeometry,
    normalize: bool,
) -> Result<DecodeResult, DecodeError> {
    let mut events = Vec::new();
    let FileSummary { geometry, summary } =
        decode_file(path, format, defaults, normalize, collect_into(&mut events))?;
    Ok(DecodeResult {
        events,
        geometry,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader returning at most three bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_fill_chunk_handles_short_reads() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = Trickle(&data);
        let mut buffer = [0u8; 8];

        assert_eq!(fill_chunk(&mut reader, &mut buffer).unwrap(), 8);
        assert_eq!(buffer, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(fill_chunk(&mut reader, &mut buffer).unwrap(), 2);
        assert_eq!(fill_chunk(&mut reader, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("dat".parse::<Format>().unwrap(), Format::Dat);
        assert_eq!("EVT2".parse::<Format>().unwrap(), Format::Evt2);
        assert_eq!(" evt3 ".parse::<Format>().unwrap(), Format::Evt3);
        assert!(matches!(
            "evt4".parse::<Format>(),
            Err(DecodeError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            Format::from_extension("recording_td.dat").unwrap(),
            Format::Dat
        );
        assert!(Format::from_extension("recording.raw").is_err());
    }

    #[test]
    fn test_summary_emit_records_stop() {
        let mut summary = DecodeSummary::default();
        let mut sink = |event: u32| {
            if event == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        assert!(summary.emit(&mut sink, 1).is_continue());
        assert!(summary.emit(&mut sink, 2).is_break());
        assert_eq!(summary.events, 2);
        assert!(summary.stopped);
    }
}
