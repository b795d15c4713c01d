//! # FEC Receiver
//!
//! Pure logic, no I/O. Accepts media and FEC packets in any order, rebuilds
//! lost media packets by XOR and hands media to a [`MediaSink`] in sequence
//! order once enough packets are buffered.
//!
//! ## Responsibilities
//!
//! 1. **Buffering**: media packets by sequence, column and row FEC packets
//!    ([`FecWait`]) by their own sequence
//! 2. **Loss tracking**: each missing media packet gets a [`FecCross`] naming
//!    the column and row FEC packets able to rebuild it
//! 3. **Recovery**: a FEC packet missing exactly one protected packet
//!    rebuilds it; the rebuilt packet may leave another FEC packet with a
//!    single gap, and so on (cascade, run as a work queue)
//! 4. **Output**: hold `delay` media packets, then emit in order, counting
//!    holes and loss runs
//! 5. **Cleanup**: drop cross-links and FEC packets too far from the output
//!    position to matter
//!
//! The receiver does NOT manage sockets; the network layer feeds it packets
//! or raw datagrams.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io::{self, Write};

use bytes::BytesMut;
use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::error::{bookkeeping_fault, FecError};
use crate::fec::{self, Direction, FecPacket, FEC_PAYLOAD_TYPE};
use crate::rtp::RtpPacket;
use crate::seq;
use crate::stats::{BufferLevels, ReceiverStats, Report};
use crate::wait::{FecCross, FecWait};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Default number of media packets held back before output.
pub const DEFAULT_DELAY: usize = 100;

/// Default FEC horizon, in multiples of the delay.
pub const DEFAULT_FEC_HORIZON: usize = 10;

/// Largest distance ahead of the output position a FEC packet may start at.
const MAX_FEC_HORIZON: usize = seq::SEQ_HALF as usize - 1;

/// Unit of the output delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnits {
    /// Number of buffered media packets.
    #[default]
    Packets,
    /// Time interval. Accepted in configuration, rejected on use.
    Seconds,
}

/// Receiver configuration parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Media packets held back before output.
    pub delay: usize,
    pub delay_units: DelayUnits,
    /// FEC packets whose base sequence lies more than
    /// `fec_horizon * delay` ahead of the output position are dropped.
    pub fec_horizon: usize,
    /// Media validation used by [`FecReceiver::put_datagram`].
    pub require_mp2t: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            delay: DEFAULT_DELAY,
            delay_units: DelayUnits::Packets,
            fec_horizon: DEFAULT_FEC_HORIZON,
            require_mp2t: true,
        }
    }
}

// ─── Sinks ──────────────────────────────────────────────────────────────────

/// Consumer of the output media stream.
pub trait MediaSink {
    /// Take the next media packet in sequence order.
    fn deliver(&mut self, packet: RtpPacket) -> io::Result<()>;

    /// Called once the receiver has been flushed.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MediaSink for Vec<RtpPacket> {
    fn deliver(&mut self, packet: RtpPacket) -> io::Result<()> {
        self.push(packet);
        Ok(())
    }
}

/// Writes every payload to a byte stream.
#[derive(Debug)]
pub struct PayloadWriter<W> {
    inner: W,
}

impl<W: Write> PayloadWriter<W> {
    pub fn new(inner: W) -> Self {
        PayloadWriter { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> MediaSink for PayloadWriter<W> {
    fn deliver(&mut self, packet: RtpPacket) -> io::Result<()> {
        self.inner.write_all(&packet.payload)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Both sinks receive every packet.
impl<A: MediaSink, B: MediaSink> MediaSink for (A, B) {
    fn deliver(&mut self, packet: RtpPacket) -> io::Result<()> {
        self.0.deliver(packet.clone())?;
        self.1.deliver(packet)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.1.flush()
    }
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Flushing,
    Finished,
}

// ─── Cascade Work Items ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Resolve {
    /// The media packet arrived; only its cross-links are left to settle.
    Arrived(u16),
    /// `fec` misses nothing but `media`.
    Rebuild {
        media: u16,
        direction: Direction,
        fec: u16,
    },
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// SMPTE 2022-1 receiver state machine.
pub struct FecReceiver<S> {
    config: ReceiverConfig,
    medias: BTreeMap<u16, RtpPacket>,
    /// Missing media sequence → FEC packets protecting it.
    crosses: BTreeMap<u16, FecCross>,
    cols: BTreeMap<u16, FecWait>,
    rows: BTreeMap<u16, FecWait>,
    /// Last output sequence; `None` until the first output.
    position: Option<u16>,
    phase: Phase,
    lost_run: usize,
    matrix_l: u8,
    matrix_d: u8,
    stats: ReceiverStats,
    sink: S,
}

impl<S: MediaSink> FecReceiver<S> {
    pub fn new(config: ReceiverConfig, sink: S) -> Self {
        FecReceiver {
            config,
            medias: BTreeMap::new(),
            crosses: BTreeMap::new(),
            cols: BTreeMap::new(),
            rows: BTreeMap::new(),
            position: None,
            phase: Phase::Open,
            lost_run: 0,
            matrix_l: 0,
            matrix_d: 0,
            stats: ReceiverStats::default(),
            sink,
        }
    }

    /// Change the output delay. Only packet counts are supported.
    pub fn set_delay(&mut self, delay: usize, units: DelayUnits) -> Result<(), FecError> {
        if units == DelayUnits::Seconds {
            return Err(FecError::TimeDelayUnsupported);
        }
        self.config.delay = delay;
        self.config.delay_units = units;
        Ok(())
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Number of media packets currently buffered.
    pub fn current_delay(&self) -> usize {
        self.medias.len()
    }

    /// Last output sequence, `None` during startup.
    pub fn position(&self) -> Option<u16> {
        self.position
    }

    pub fn is_startup(&self) -> bool {
        self.position.is_none()
    }

    /// Detected matrix geometry (L, D); zero while unknown.
    pub fn matrix(&self) -> (u8, u8) {
        (self.matrix_l, self.matrix_d)
    }

    /// Current receiver statistics.
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn buffer_levels(&self) -> BufferLevels {
        BufferLevels {
            media: self.medias.len(),
            cross: self.crosses.len(),
            col: self.cols.len(),
            row: self.rows.len(),
        }
    }

    pub fn report(&self) -> Report<'_> {
        Report {
            stats: &self.stats,
            buffers: self.buffer_levels(),
            matrix: self.matrix(),
        }
    }

    pub fn is_buffered(&self, media: u16) -> bool {
        self.medias.contains_key(&media)
    }

    pub fn cross(&self, media: u16) -> Option<&FecCross> {
        self.crosses.get(&media)
    }

    pub fn wait(&self, direction: Direction, fec: u16) -> Option<&FecWait> {
        self.waits(direction).get(&fec)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn waits(&self, direction: Direction) -> &BTreeMap<u16, FecWait> {
        match direction {
            Direction::Column => &self.cols,
            Direction::Row => &self.rows,
        }
    }

    fn waits_mut(&mut self, direction: Direction) -> &mut BTreeMap<u16, FecWait> {
        match direction {
            Direction::Column => &mut self.cols,
            Direction::Row => &mut self.rows,
        }
    }

    fn ensure_accepting(&self) -> Result<(), FecError> {
        match self.phase {
            Phase::Open => {}
            Phase::Flushing => return Err(FecError::Flushing),
            Phase::Finished => return Err(FecError::Finished),
        }
        if self.config.delay_units == DelayUnits::Seconds {
            return Err(FecError::TimeDelayUnsupported);
        }
        Ok(())
    }

    // ─── Ingestion ──────────────────────────────────────────────────────

    /// Decode a datagram and route it: payload type 96 is FEC, even when the
    /// RTP header is malformed, anything else is media checked against
    /// `require_mp2t`.
    pub fn put_datagram(&mut self, data: &[u8]) -> Result<(), FecError> {
        let packet = RtpPacket::decode(data);
        if packet.payload_type == FEC_PAYLOAD_TYPE {
            self.put_fec(FecPacket::from_rtp(&packet))
        } else {
            let require_mp2t = self.config.require_mp2t;
            self.put_media(packet, require_mp2t)
        }
    }

    /// Accept a media packet.
    pub fn put_media(&mut self, packet: RtpPacket, require_mp2t: bool) -> Result<(), FecError> {
        self.ensure_accepting()?;

        let valid = if require_mp2t {
            packet.is_valid_mp2t()
        } else {
            packet.is_valid()
        };
        if !valid {
            self.stats.media_invalid += 1;
            let reasons = packet.errors();
            return Err(if reasons.is_empty() {
                FecError::NotMpeg2Ts {
                    sequence: packet.sequence,
                }
            } else {
                FecError::InvalidMedia {
                    sequence: packet.sequence,
                    reasons,
                }
            });
        }

        let seq = packet.sequence;
        if let Some(position) = self.position {
            if !seq::is_ahead(seq, position) {
                self.stats.media_late += 1;
                debug!(seq, position, "late media packet discarded");
                return Ok(());
            }
        }

        trace!(seq, "media packet");
        self.stats.media_received += 1;
        self.store_media(packet);

        if self.crosses.contains_key(&seq) {
            self.resolve(Resolve::Arrived(seq));
        }
        self.out()
    }

    /// Accept a column or row FEC packet.
    pub fn put_fec(&mut self, packet: FecPacket) -> Result<(), FecError> {
        self.ensure_accepting()?;

        let reasons = packet.errors();
        if !reasons.is_empty() {
            self.stats.fec_invalid += 1;
            return Err(FecError::InvalidFec {
                sequence: packet.sequence,
                reasons,
            });
        }

        let direction = packet.direction;
        let fec_seq = packet.sequence;
        let mut wait = match FecWait::new(packet) {
            Ok(wait) => wait,
            Err(e) => {
                self.stats.fec_invalid += 1;
                return Err(e);
            }
        };
        match direction {
            Direction::Column => self.stats.col_received += 1,
            Direction::Row => self.stats.row_received += 1,
        }

        // Packets at or behind the output position are gone for good.
        let position = self.position;
        let missing: Vec<u16> = wait
            .protected_sequences()
            .filter(|s| !self.medias.contains_key(s))
            .filter(|s| position.map_or(true, |p| seq::is_ahead(*s, p)))
            .collect();

        for &media in &missing {
            if let Some(existing) = self.crosses.get(&media).and_then(|c| c.link(direction)) {
                if existing != fec_seq {
                    return Err(FecError::Overwrite {
                        direction,
                        media,
                        existing,
                    });
                }
            }
        }

        let (l, d) = (wait.packet().l(), wait.packet().d());
        if l != 0 {
            self.matrix_l = l;
        }
        if d != 0 {
            self.matrix_d = d;
        }

        if missing.is_empty() {
            trace!(fec = fec_seq, %direction, "FEC packet has nothing to recover");
            return Ok(());
        }

        if let Some(position) = self.position {
            let horizon = self
                .config
                .fec_horizon
                .saturating_mul(self.config.delay)
                .min(MAX_FEC_HORIZON);
            let end = position.wrapping_add(horizon as u16);
            if !seq::validity_window(wait.snbase(), position, end) {
                match direction {
                    Direction::Column => self.stats.col_dropped += 1,
                    Direction::Row => self.stats.row_dropped += 1,
                }
                debug!(
                    fec = fec_seq,
                    %direction,
                    snbase = wait.snbase(),
                    position,
                    "FEC packet outside the validity window dropped"
                );
                return Ok(());
            }
        }

        // A retransmitted FEC packet replaces its earlier copy.
        self.discard_wait(direction, fec_seq);

        for &media in &missing {
            let cross = self.crosses.entry(media).or_default();
            *cross.link_mut(direction) = Some(fec_seq);
            if let Err(e) = wait.set_missing(media) {
                bookkeeping_fault(format_args!("{direction} FEC #{fec_seq}: {e}"));
            }
        }
        self.stats.max_cross = self.stats.max_cross.max(self.crosses.len());

        let single = match wait.missing_count() {
            1 => match wait.missing_sequence(1) {
                Ok(media) => Some(media),
                Err(e) => bookkeeping_fault(format_args!("{direction} FEC #{fec_seq}: {e}")),
            },
            _ => None,
        };

        trace!(
            fec = fec_seq,
            %direction,
            missing = wait.missing_count(),
            "FEC packet buffered"
        );
        self.waits_mut(direction).insert(fec_seq, wait);
        let buffered = self.waits(direction).len();
        match direction {
            Direction::Column => self.stats.max_col = self.stats.max_col.max(buffered),
            Direction::Row => self.stats.max_row = self.stats.max_row.max(buffered),
        }

        if let Some(media) = single {
            self.resolve(Resolve::Rebuild {
                media,
                direction,
                fec: fec_seq,
            });
            self.out()?;
        }
        Ok(())
    }

    fn store_media(&mut self, packet: RtpPacket) {
        if self.medias.insert(packet.sequence, packet).is_some() {
            self.stats.media_overwritten += 1;
        }
        self.stats.max_media = self.stats.max_media.max(self.medias.len());
    }

    // ─── Recovery ───────────────────────────────────────────────────────

    /// Settle one media sequence, then every FEC packet it leaves with a
    /// single gap, until nothing is left to do.
    fn resolve(&mut self, first: Resolve) {
        let mut queue = VecDeque::from([first]);

        while let Some(item) = queue.pop_front() {
            let media = match item {
                Resolve::Arrived(media) => media,
                Resolve::Rebuild {
                    media,
                    direction,
                    fec,
                } => {
                    if !self.waits_only_for(direction, fec, media) {
                        trace!(seq = media, %direction, fec, "cascade step already settled");
                        continue;
                    }
                    media
                }
            };

            let Some(cross) = self.crosses.remove(&media) else {
                if let Resolve::Arrived(_) = item {
                    continue;
                }
                bookkeeping_fault(format_args!("no cross-link for missing media #{media}"));
            };

            let mut consumed = None;
            if let Resolve::Rebuild { direction, fec, .. } = item {
                if cross.link(direction) != Some(fec) {
                    bookkeeping_fault(format_args!(
                        "media #{media} links {direction} FEC {:?}, expected #{fec}",
                        cross.link(direction)
                    ));
                }
                if self.rebuild(media, direction, fec) {
                    consumed = Some((direction, fec));
                }
            }

            for (direction, fec) in cross.links() {
                if consumed == Some((direction, fec)) {
                    continue;
                }
                let waits = self.waits_mut(direction);
                let Some(wait) = waits.get_mut(&fec) else {
                    bookkeeping_fault(format_args!(
                        "media #{media} links {direction} FEC #{fec}, which is not buffered"
                    ));
                };
                if let Err(e) = wait.set_recovered(media) {
                    bookkeeping_fault(format_args!("{direction} FEC #{fec}: {e}"));
                }
                match wait.missing_count() {
                    0 => {
                        waits.remove(&fec);
                    }
                    1 => {
                        let next = match wait.missing_sequence(1) {
                            Ok(next) => next,
                            Err(e) => bookkeeping_fault(format_args!("{direction} FEC #{fec}: {e}")),
                        };
                        queue.push_back(Resolve::Rebuild {
                            media: next,
                            direction,
                            fec,
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    fn waits_only_for(&self, direction: Direction, fec: u16, media: u16) -> bool {
        self.waits(direction).get(&fec).is_some_and(|wait| {
            wait.missing_count() == 1 && wait.missing_sequence(1).ok() == Some(media)
        })
    }

    /// Rebuild `media` from a FEC packet missing only it. On success the
    /// FEC packet is consumed.
    fn rebuild(&mut self, media: u16, direction: Direction, fec: u16) -> bool {
        if let Some(position) = self.position {
            if !seq::is_ahead(media, position) {
                debug!(seq = media, %direction, fec, position, "recovery behind output skipped");
                self.stats.media_aborted_recovery += 1;
                return false;
            }
        }
        let Some(wait) = self.waits(direction).get(&fec) else {
            bookkeeping_fault(format_args!("{direction} FEC #{fec} vanished before recovery"));
        };
        let recovered = xor_recover(wait.packet(), media, &self.medias);
        match recovered {
            Some(packet) => {
                debug!(seq = media, %direction, fec, "media packet recovered");
                self.stats.media_recovered += 1;
                self.store_media(packet);
                self.waits_mut(direction).remove(&fec);
                true
            }
            None => {
                debug!(
                    seq = media,
                    %direction,
                    fec,
                    "recovery aborted, another protected packet is absent"
                );
                self.stats.media_aborted_recovery += 1;
                false
            }
        }
    }

    /// Remove a buffered FEC packet and unlink it from the missing media it
    /// was protecting.
    fn discard_wait(&mut self, direction: Direction, fec: u16) {
        let Some(wait) = self.waits_mut(direction).remove(&fec) else {
            return;
        };
        for media in wait.missing_sequences() {
            if let Some(cross) = self.crosses.get_mut(&media) {
                if cross.link(direction) == Some(fec) {
                    *cross.link_mut(direction) = None;
                    if cross.is_empty() {
                        self.crosses.remove(&media);
                    }
                }
            }
        }
    }

    // ─── Output ─────────────────────────────────────────────────────────

    /// Emit media until at most `delay` packets remain buffered (none while
    /// flushing).
    fn out(&mut self) -> Result<(), FecError> {
        let keep = if self.phase == Phase::Flushing {
            0
        } else {
            self.config.delay
        };

        while self.medias.len() > keep {
            let position = match self.position {
                Some(p) => p.wrapping_add(1),
                None => match seq::ring_first(self.medias.keys().copied()) {
                    Some(first) => {
                        self.evict_behind(first);
                        first
                    }
                    None => break,
                },
            };
            self.position = Some(position);

            self.evict_cross(position);

            match self.medias.remove(&position) {
                Some(packet) => {
                    self.stats.record_run(self.lost_run);
                    self.lost_run = 0;
                    self.stats.media_output += 1;
                    self.sink.deliver(packet)?;
                }
                None => {
                    trace!(seq = position, "media packet missing at output");
                    self.stats.media_missing += 1;
                    self.lost_run += 1;
                }
            }
        }
        Ok(())
    }

    /// Output starts at `first`: drop every gap at or behind it, together
    /// with the FEC packets linked to them.
    fn evict_behind(&mut self, first: u16) {
        let behind: Vec<u16> = self
            .crosses
            .keys()
            .copied()
            .filter(|&media| !seq::is_ahead(media, first))
            .collect();
        if !behind.is_empty() {
            debug!(first, crosses = behind.len(), "gaps behind the first output dropped");
        }
        for media in behind {
            self.evict_cross(media);
        }
    }

    fn evict_cross(&mut self, media: u16) {
        if let Some(cross) = self.crosses.remove(&media) {
            for (direction, fec) in cross.links() {
                self.discard_wait(direction, fec);
            }
        }
    }

    /// Drain every buffered media packet, ignoring the delay, then flush the
    /// sink. The receiver accepts nothing afterwards.
    pub fn flush(&mut self) -> Result<(), FecError> {
        if self.phase == Phase::Finished {
            return Err(FecError::Finished);
        }
        if self.config.delay_units == DelayUnits::Seconds {
            return Err(FecError::TimeDelayUnsupported);
        }

        self.phase = Phase::Flushing;
        self.out()?;
        self.sink.flush()?;
        self.phase = Phase::Finished;

        info!(
            output = self.stats.media_output,
            recovered = self.stats.media_recovered,
            missing = self.stats.media_missing,
            "FEC receiver flushed"
        );
        Ok(())
    }

    /// Forget cross-links (and the FEC packets they reference) outside
    /// `[position, position + delay)`.
    pub fn cleanup(&mut self) -> Result<(), FecError> {
        self.ensure_accepting()?;
        let Some(position) = self.position else {
            return Err(FecError::Startup);
        };

        let delay = self.config.delay.min(u16::MAX as usize) as u16;
        let stale: Vec<u16> = self
            .crosses
            .keys()
            .copied()
            .filter(|&media| {
                delay == 0
                    || !seq::validity_window(media, position, position.wrapping_add(delay - 1))
            })
            .collect();

        let before = (self.crosses.len(), self.cols.len(), self.rows.len());
        for media in stale {
            self.evict_cross(media);
        }

        debug!(
            position,
            crosses = before.0 - self.crosses.len(),
            cols = before.1 - self.cols.len(),
            rows = before.2 - self.rows.len(),
            "cleanup"
        );
        Ok(())
    }
}

impl<S> fmt::Debug for FecReceiver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FecReceiver")
            .field("position", &self.position)
            .field("phase", &self.phase)
            .field("medias", &self.medias.len())
            .field("crosses", &self.crosses.len())
            .field("cols", &self.cols.len())
            .field("rows", &self.rows.len())
            .finish()
    }
}

impl<S: MediaSink> fmt::Display for FecReceiver<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report())
    }
}

/// XOR the recovery fields of `fec` with every other protected packet.
/// `None` if one of them is not buffered.
fn xor_recover(
    fec: &FecPacket,
    media: u16,
    medias: &BTreeMap<u16, RtpPacket>,
) -> Option<RtpPacket> {
    let mut payload = BytesMut::from(&fec.payload_recovery[..]);
    let mut payload_type = fec.payload_type_recovery;
    let mut timestamp = fec.timestamp_recovery;
    let mut length = fec.length_recovery;
    let mut ssrc = None;

    for seq in fec.protected_sequences() {
        if seq == media {
            continue;
        }
        let sibling = medias.get(&seq)?;
        payload_type ^= sibling.payload_type;
        timestamp ^= sibling.timestamp;
        length ^= sibling.payload.len() as u16;
        fec::xor_into(&mut payload, &sibling.payload);
        ssrc = ssrc.or(Some(sibling.ssrc));
    }

    payload.resize(length as usize, 0);
    let mut packet = RtpPacket::new(media, timestamp, payload_type, payload.freeze());
    packet.ssrc = ssrc.unwrap_or(0);
    Some(packet)
}
