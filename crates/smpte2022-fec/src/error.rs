//! # Errors
//!
//! Malformed wire data never produces an `Err`: decoders return an object
//! whose `errors()` lists [`RtpError`](crate::rtp::RtpError) or
//! [`FecValidationError`](crate::fec::FecValidationError) reasons. The
//! [`FecError`] type below covers misuse of explicit operations (wrong packet
//! count for the XOR builder, feeding a flushed receiver, ...).
//!
//! Broken internal bookkeeping is neither: it goes through
//! [`bookkeeping_fault`] and aborts.

use std::io;

use thiserror::Error;

use crate::fec::{Algorithm, Direction, FecValidationError};
use crate::rtp::RtpError;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FecError {
    #[error("currently flushing buffers")]
    Flushing,

    #[error("receiver has been flushed and accepts no more packets")]
    Finished,

    #[error("current position still not initialized (startup state)")]
    Startup,

    #[error("delay based on time interval is not supported")]
    TimeDelayUnsupported,

    #[error("invalid media packet #{sequence}: {reasons:?}")]
    InvalidMedia {
        sequence: u16,
        reasons: Vec<RtpError>,
    },

    #[error("invalid FEC packet #{sequence}: {reasons:?}")]
    InvalidFec {
        sequence: u16,
        reasons: Vec<FecValidationError>,
    },

    #[error("another {direction} FEC packet (#{existing}) is already registered to protect media packet #{media}")]
    Overwrite {
        direction: Direction,
        media: u16,
        existing: u16,
    },

    #[error("FEC algorithm {0:?} is not handled, only XOR is")]
    UnsupportedAlgorithm(Algorithm),

    #[error("{direction} FEC needs exactly {expected} media packets, got {actual}")]
    PacketCount {
        direction: Direction,
        expected: usize,
        actual: usize,
    },

    #[error("media packet #{sequence} is not a valid MPEG2-TS RTP packet")]
    NotMpeg2Ts { sequence: u16 },

    #[error("bad sequence spacing: media packet #{sequence}, expected #{expected}")]
    BadSequenceSpacing { sequence: u16, expected: u16 },

    #[error("sequence #{sequence} is not protected by FEC (snbase #{snbase}, offset {offset}, na {na})")]
    Misaligned {
        sequence: u16,
        snbase: u16,
        offset: u8,
        na: u8,
    },

    #[error("missing rank {rank} not in [1, {count}]")]
    MissingRank { rank: usize, count: usize },

    #[error("invalid FEC matrix geometry: L = {l}, D = {d}")]
    Geometry { l: usize, d: usize },

    #[error("output sink failed: {0}")]
    Sink(#[from] io::Error),

    #[error("invalid config: {0}")]
    Config(String),
}

/// Report a violated receiver invariant and abort.
///
/// These states are unreachable through the public API; reaching one means
/// the cross-link / wait bookkeeping has been corrupted.
#[cold]
#[track_caller]
pub(crate) fn bookkeeping_fault(what: std::fmt::Arguments<'_>) -> ! {
    tracing::error!(fault = %what, "FEC bookkeeping fault");
    panic!("FEC bookkeeping fault: {what}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = FecError::Overwrite {
            direction: Direction::Column,
            media: 12,
            existing: 7,
        };
        assert_eq!(
            err.to_string(),
            "another column FEC packet (#7) is already registered to protect media packet #12"
        );

        let err = FecError::MissingRank { rank: 3, count: 2 };
        assert_eq!(err.to_string(), "missing rank 3 not in [1, 2]");
    }

    #[test]
    fn io_errors_convert() {
        let err: FecError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, FecError::Sink(_)));
    }

    #[test]
    #[should_panic(expected = "FEC bookkeeping fault: cross #4 vanished")]
    fn fault_panics_with_message() {
        bookkeeping_fault(format_args!("cross #{} vanished", 4));
    }
}
