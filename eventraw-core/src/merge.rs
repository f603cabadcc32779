//! Two-channel temporal merge.
//!
//! ATIS cameras record change detections (td) and exposure measurements
//! (aps) in two separate DAT files. Each file is monotonic on its own; the
//! merge interleaves them into a single chronological stream of
//! [`ExposureEvent`]s.
//!
//! When one channel runs out, the pending head of the other channel is
//! emitted and the rest of that channel is drained. No event is emitted
//! twice.

use crate::dat::DatRecords;
use crate::decoder::{DecodeError, DecodeSummary, FileSummary};
use crate::header::{self, LegacyHeader};
use crate::types::{Channel, ExposureEvent, PolarityEvent, SensorGeometry};
use std::fs::File;
use std::io::{self, BufReader};
use std::ops::ControlFlow;
use std::path::Path;

/// Buffered head of one channel.
struct ChannelCursor<I> {
    records: I,
    channel: Channel,
    head: Option<PolarityEvent>,
    exhausted: bool,
}

impl<I> ChannelCursor<I>
where
    I: Iterator<Item = io::Result<PolarityEvent>>,
{
    fn new(records: I, channel: Channel) -> Self {
        Self {
            records,
            channel,
            head: None,
            exhausted: false,
        }
    }

    /// The head, if it has not been emitted yet.
    fn pending(&self) -> Option<PolarityEvent> {
        if self.exhausted {
            None
        } else {
            self.head
        }
    }

    /// Scans forward to the next record that lies on the sensor and is not
    /// older than `previous_t`.
    ///
    /// At the end of the channel the previous head is kept.
    fn advance(
        &mut self,
        previous_t: u64,
        geometry: SensorGeometry,
        summary: &mut DecodeSummary,
    ) -> io::Result<()> {
        for record in self.records.by_ref() {
            let event = record?;
            if !geometry.contains(event.x, event.y) {
                summary.out_of_bounds(event.t, event.x, event.y, event.polarity);
                continue;
            }
            if event.t < previous_t {
                summary.out_of_order += 1;
                continue;
            }
            self.head = Some(event);
            return Ok(());
        }
        self.exhausted = true;
        Ok(())
    }

    /// Emits the pending head and every following valid record.
    ///
    /// Stops early when the sink asks to, which `summary.stopped` records.
    fn drain<F>(
        &mut self,
        previous_t: &mut u64,
        geometry: SensorGeometry,
        summary: &mut DecodeSummary,
        sink: &mut F,
    ) -> io::Result<()>
    where
        F: FnMut(ExposureEvent) -> ControlFlow<()>,
    {
        while let Some(head) = self.pending() {
            if summary
                .emit(sink, head.into_exposure(self.channel))
                .is_break()
            {
                break;
            }
            *previous_t = head.t;
            self.advance(*previous_t, geometry, summary)?;
        }
        Ok(())
    }
}

/// Merges a td channel and an aps channel into one chronological stream.
///
/// Both channels yield unfiltered records, as [`DatRecords`] does. Records
/// outside `geometry` are dropped with a warning, and records older than the
/// last emitted event are dropped silently. Ties go to td. At most one
/// channel may be absent, in which case the other is passed through.
pub fn merge<A, B, F>(
    td: Option<A>,
    aps: Option<B>,
    geometry: SensorGeometry,
    mut sink: F,
) -> Result<DecodeSummary, DecodeError>
where
    A: Iterator<Item = io::Result<PolarityEvent>>,
    B: Iterator<Item = io::Result<PolarityEvent>>,
    F: FnMut(ExposureEvent) -> ControlFlow<()>,
{
    let mut summary = DecodeSummary::default();
    let mut previous_t = 0;

    match (td, aps) {
        (None, None) => return Err(DecodeError::NoInput),
        (Some(td), None) => {
            let mut td = ChannelCursor::new(td, Channel::ChangeDetection);
            td.advance(previous_t, geometry, &mut summary)?;
            td.drain(&mut previous_t, geometry, &mut summary, &mut sink)?;
        }
        (None, Some(aps)) => {
            let mut aps = ChannelCursor::new(aps, Channel::Exposure);
            aps.advance(previous_t, geometry, &mut summary)?;
            aps.drain(&mut previous_t, geometry, &mut summary, &mut sink)?;
        }
        (Some(td), Some(aps)) => {
            let mut td = ChannelCursor::new(td, Channel::ChangeDetection);
            let mut aps = ChannelCursor::new(aps, Channel::Exposure);
            td.advance(previous_t, geometry, &mut summary)?;
            aps.advance(previous_t, geometry, &mut summary)?;

            while let (Some(td_head), Some(aps_head)) = (td.pending(), aps.pending()) {
                if td_head.t <= aps_head.t {
                    if summary.emit(&mut sink, td_head.into_exposure(td.channel)).is_break() {
                        return Ok(summary);
                    }
                    previous_t = td_head.t;
                    td.advance(previous_t, geometry, &mut summary)?;
                } else {
                    if summary.emit(&mut sink, aps_head.into_exposure(aps.channel)).is_break() {
                        return Ok(summary);
                    }
                    previous_t = aps_head.t;
                    aps.advance(previous_t, geometry, &mut summary)?;
                }
            }

            // At most one channel still has a pending head
            td.drain(&mut previous_t, geometry, &mut summary, &mut sink)?;
            if !summary.stopped {
                aps.drain(&mut previous_t, geometry, &mut summary, &mut sink)?;
            }
        }
    }

    Ok(summary)
}

/// Opens one channel of a recording and reads its header.
fn open_channel(
    path: &Path,
    defaults: SensorGeometry,
) -> Result<(LegacyHeader, BufReader<File>), DecodeError> {
    let mut reader = BufReader::new(File::open(path)?);
    let header = header::read_legacy_header(&mut reader, defaults)?;
    Ok((header, reader))
}

/// Merges a td file and an aps file from disk.
///
/// Either path may be `None` (but not both). When both are given their
/// headers must agree on version and geometry.
pub fn merge_files<F>(
    td_path: Option<&Path>,
    aps_path: Option<&Path>,
    defaults: SensorGeometry,
    sink: F,
) -> Result<FileSummary, DecodeError>
where
    F: FnMut(ExposureEvent) -> ControlFlow<()>,
{
    let td = td_path.map(|path| open_channel(path, defaults)).transpose()?;
    let aps = aps_path.map(|path| open_channel(path, defaults)).transpose()?;

    let header = match (&td, &aps) {
        (Some((td_header, _)), Some((aps_header, _))) => {
            if td_header != aps_header {
                return Err(DecodeError::IncompatibleHeaders {
                    td: *td_header,
                    aps: *aps_header,
                });
            }
            *td_header
        }
        (Some((header, _)), None) | (None, Some((header, _))) => *header,
        (None, None) => return Err(DecodeError::NoInput),
    };

    let summary = merge(
        td.map(|(header, reader)| DatRecords::new(reader, header)),
        aps.map(|(header, reader)| DatRecords::new(reader, header)),
        header.geometry,
        sink,
    )?;

    Ok(FileSummary {
        geometry: header.geometry,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::collect_into;

    type Records = std::vec::IntoIter<io::Result<PolarityEvent>>;

    fn geometry() -> SensorGeometry {
        SensorGeometry::new(304, 240)
    }

    fn channel(timestamps: &[u64]) -> Records {
        timestamps
            .iter()
            .map(|&t| Ok(PolarityEvent::new(t, 1, 1, false)))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn summarize(events: &[ExposureEvent]) -> Vec<(u64, bool)> {
        events
            .iter()
            .map(|e| (e.t, e.is_second_threshold_crossing))
            .collect()
    }

    #[test]
    fn test_interleaves_by_timestamp() {
        let mut events = Vec::new();
        let summary = merge(
            Some(channel(&[10, 30, 50])),
            Some(channel(&[20, 40])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(
            summarize(&events),
            vec![
                (10, false),
                (20, true),
                (30, false),
                (40, true),
                (50, false)
            ]
        );
        assert_eq!(summary.events, 5);
    }

    #[test]
    fn test_tie_goes_to_td() {
        let mut events = Vec::new();
        merge(
            Some(channel(&[10, 20])),
            Some(channel(&[10, 30])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(summarize(&events)[..2], [(10, false), (10, true)]);
    }

    #[test]
    fn test_aps_drained_when_td_runs_out_first() {
        let mut events = Vec::new();
        let summary = merge(
            Some(channel(&[10])),
            Some(channel(&[20, 30])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(summarize(&events), vec![(10, false), (20, true), (30, true)]);
        assert_eq!(summary.events, 3);
    }

    #[test]
    fn test_td_drained_when_aps_runs_out_first() {
        let mut events = Vec::new();
        let summary = merge(
            Some(channel(&[10, 30, 40])),
            Some(channel(&[20])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(
            summarize(&events),
            vec![(10, false), (20, true), (30, false), (40, false)]
        );
        assert_eq!(summary.events, 4);
    }

    #[test]
    fn test_stop_signal_while_draining() {
        let mut calls = 0;
        let summary = merge(
            Some(channel(&[10])),
            Some(channel(&[20, 30, 40])),
            geometry(),
            |_event: ExposureEvent| {
                calls += 1;
                if calls == 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        )
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(summary.events, 3);
        assert!(summary.stopped);
    }

    #[test]
    fn test_aps_absent_passes_td_through() {
        let mut events = Vec::new();
        merge(
            Some(channel(&[10, 30, 50])),
            None::<Records>,
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(
            summarize(&events),
            vec![(10, false), (30, false), (50, false)]
        );
    }

    #[test]
    fn test_td_absent_passes_aps_through() {
        let mut events = Vec::new();
        merge(
            None::<Records>,
            Some(channel(&[20, 40])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(summarize(&events), vec![(20, true), (40, true)]);
    }

    #[test]
    fn test_both_absent_is_an_error() {
        let result = merge(
            None::<Records>,
            None::<Records>,
            geometry(),
            |_event: ExposureEvent| ControlFlow::Continue(()),
        );
        assert!(matches!(result, Err(DecodeError::NoInput)));
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let td: Vec<io::Result<PolarityEvent>> = vec![
            Ok(PolarityEvent::new(5, 500, 1, false)), // outside, skipped while seeking
            Ok(PolarityEvent::new(10, 1, 1, false)),
            Ok(PolarityEvent::new(8, 1, 1, false)), // older than the last emitted event
            Ok(PolarityEvent::new(30, 1, 1, false)),
        ];

        let mut events = Vec::new();
        let summary = merge(
            Some(td.into_iter()),
            Some(channel(&[20])),
            geometry(),
            collect_into(&mut events),
        )
        .unwrap();

        assert_eq!(
            summarize(&events),
            vec![(10, false), (20, true), (30, false)]
        );
        assert_eq!(summary.out_of_bounds, 1);
        assert_eq!(summary.out_of_order, 1);
    }

    #[test]
    fn test_stop_signal() {
        let mut calls = 0;
        let summary = merge(
            Some(channel(&[10, 30, 50])),
            Some(channel(&[20, 40])),
            geometry(),
            |_event: ExposureEvent| {
                calls += 1;
                if calls == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            },
        )
        .unwrap();

        assert_eq!(calls, 2);
        assert!(summary.stopped);
    }

    #[test]
    fn test_io_errors_are_propagated() {
        let td: Records = vec![
            Ok(PolarityEvent::new(10, 1, 1, false)),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated")),
        ]
        .into_iter();

        let result = merge(
            Some(td),
            Some(channel(&[20])),
            geometry(),
            |_event: ExposureEvent| ControlFlow::Continue(()),
        );
        match result {
            Err(DecodeError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
