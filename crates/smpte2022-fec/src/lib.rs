//! # smpte2022-fec
//!
//! SMPTE 2022-1 forward error correction for MPEG2-TS over RTP.
//!
//! Column and row XOR FEC packets protect an L×D matrix of media packets;
//! the receiver rebuilds lost media packets from them, cascading between
//! directions, and outputs the stream in sequence order after a fixed
//! packet delay.
//!
//! ## Crate structure
//!
//! - [`rtp`]: RTP packet decode, encode and validation
//! - [`fec`]: FEC header, validation and XOR packet builder
//! - [`wait`]: Buffered FEC packets with missing-packet tracking, cross-links
//! - [`receiver`]: Receiver state machine and media sinks
//! - [`generator`]: Sender-side column/row FEC generation
//! - [`stats`]: Receiver statistics and text report
//! - [`config`]: TOML configuration
//! - [`addr`]: FEC stream address derivation
//! - [`seq`]: 16-bit sequence ring helpers
//! - [`bitfield`]: Fixed 64-bit set
//! - [`error`]: Error types

pub mod addr;
pub mod bitfield;
pub mod config;
pub mod error;
pub mod fec;
pub mod generator;
pub mod receiver;
pub mod rtp;
pub mod seq;
pub mod stats;
pub mod wait;

pub use error::FecError;
pub use fec::{Algorithm, Direction, FecPacket};
pub use generator::{FecGenerator, GeneratorEvent};
pub use receiver::{FecReceiver, MediaSink, ReceiverConfig};
pub use rtp::RtpPacket;
