//! # Receiver Statistics
//!
//! Counters kept by [`FecReceiver`](crate::receiver::FecReceiver). All stats
//! serialize to JSON for export.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Aggregate receiver-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Media packets accepted by `put_media` (including overwrites).
    pub media_received: u64,
    /// Media packets rebuilt from FEC.
    pub media_recovered: u64,
    /// Rebuilds abandoned because another protected packet was absent.
    pub media_aborted_recovery: u64,
    /// Media packets rejected by validation.
    pub media_invalid: u64,
    /// Media packets that replaced a buffered packet with the same sequence.
    pub media_overwritten: u64,
    /// Output positions with neither a received nor a recovered packet.
    pub media_missing: u64,
    /// Media packets discarded because output had already passed them.
    pub media_late: u64,
    /// Media packets handed to the sink.
    pub media_output: u64,
    /// Largest media buffer size seen.
    pub max_media: usize,
    /// Column FEC packets accepted.
    pub col_received: u64,
    /// Row FEC packets accepted.
    pub row_received: u64,
    /// FEC packets rejected by validation.
    pub fec_invalid: u64,
    /// Column FEC packets discarded as too old or too far ahead.
    pub col_dropped: u64,
    /// Row FEC packets discarded as too old or too far ahead.
    pub row_dropped: u64,
    /// Largest cross-link map size seen.
    pub max_cross: usize,
    /// Largest column wait buffer size seen.
    pub max_col: usize,
    /// Largest row wait buffer size seen.
    pub max_row: usize,
    /// Output runs: number of consecutive missing packets → how many times
    /// a delivered packet followed such a run.
    pub lostogram: BTreeMap<usize, u64>,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered packet that followed `run` missing ones.
    pub fn record_run(&mut self, run: usize) {
        *self.lostogram.entry(run).or_insert(0) += 1;
    }

    /// Share of lost media packets that FEC rebuilt.
    pub fn recovery_ratio(&self) -> f64 {
        let lost = self.media_recovered + self.media_missing;
        if lost == 0 {
            0.0
        } else {
            self.media_recovered as f64 / lost as f64
        }
    }

    /// Share of output positions left empty.
    pub fn loss_ratio(&self) -> f64 {
        let positions = self.media_output + self.media_missing;
        if positions == 0 {
            0.0
        } else {
            self.media_missing as f64 / positions as f64
        }
    }
}

// ─── Report ─────────────────────────────────────────────────────────────────

/// Current buffer occupancy, printed next to the counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BufferLevels {
    pub media: usize,
    pub cross: usize,
    pub col: usize,
    pub row: usize,
}

/// Text table of a receiver's statistics.
#[derive(Debug, Clone)]
pub struct Report<'a> {
    pub stats: &'a ReceiverStats,
    pub buffers: BufferLevels,
    /// Detected matrix geometry (L, D); zero when unknown.
    pub matrix: (u8, u8),
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;
        let b = &self.buffers;
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10}",
            "Name", "Received", "Buffered", "Maximum", "Dropped"
        )?;
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10}",
            "Media", s.media_received, b.media, s.max_media, s.media_late
        )?;
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10}",
            "Crosses", "", b.cross, s.max_cross, ""
        )?;
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10}",
            "Col FEC", s.col_received, b.col, s.max_col, s.col_dropped
        )?;
        writeln!(
            f,
            "{:<8} {:>10} {:>10} {:>10} {:>10}",
            "Row FEC", s.row_received, b.row, s.max_row, s.row_dropped
        )?;
        writeln!(f, "Matrix L x D: {} x {}", self.matrix.0, self.matrix.1)?;
        writeln!(
            f,
            "Media recovered: {}, aborted: {}, overwritten: {}, missing: {}, output: {}",
            s.media_recovered,
            s.media_aborted_recovery,
            s.media_overwritten,
            s.media_missing,
            s.media_output
        )?;
        write!(f, "Lostogram:")?;
        if s.lostogram.is_empty() {
            write!(f, " (empty)")?;
        }
        for (run, count) in &s.lostogram {
            write!(f, " {run}:{count}")?;
        }
        Ok(())
    }
}
