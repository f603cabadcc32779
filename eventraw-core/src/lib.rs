//! Decoders for neuromorphic event-camera raw dumps.
//!
//! This crate turns the binary recordings written by event cameras into
//! timestamped pixel events. Three on-disk formats are supported:
//!
//! - legacy DAT files (8-byte records), including the two-file td/aps
//!   recordings of ATIS cameras, see [`dat`] and [`merge`]
//! - EVT 2.0 (4-byte records with a 34-bit clock), see [`evt2`]
//! - EVT 3.0 (2-byte records with vectorized events), see [`evt3`]
//!
//! Decoders push events into a sink closure. The sink returns
//! [`ControlFlow::Break`](std::ops::ControlFlow::Break) to stop decoding
//! early.
//!
//! # Example
//!
//! ```no_run
//! use eventraw_core::{decode_file, Format, SensorGeometry};
//! use std::ops::ControlFlow;
//!
//! let mut count = 0u64;
//! let result = decode_file(
//!     "recording.raw",
//!     Format::Evt3,
//!     SensorGeometry::EVT3_DEFAULT,
//!     false,
//!     |event| {
//!         if event.t > 1_000_000 {
//!             return ControlFlow::Break(());
//!         }
//!         count += 1;
//!         ControlFlow::Continue(())
//!     },
//! )
//! .unwrap();
//!
//! println!("Decoded {} events in the first second", count);
//! println!("Sensor: {}x{}", result.geometry.width, result.geometry.height);
//! ```

pub mod dat;
pub mod decoder;
pub mod evt2;
pub mod evt3;
pub mod header;
pub mod merge;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use dat::{DatDecoder, DatRecords};
pub use decoder::{
    collect_into, decode_file, read_file, DecodeError, DecodeResult, DecodeSummary, FileSummary,
    Format,
};
pub use evt2::Evt2Decoder;
pub use evt3::Evt3Decoder;
pub use header::LegacyHeader;
pub use merge::{merge, merge_files};
pub use types::{Channel, ExposureEvent, PolarityEvent, SensorGeometry};
