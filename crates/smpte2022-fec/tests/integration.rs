//! # Integration tests: Generator → wire → Receiver
//!
//! These tests run the whole stack:
//! FecGenerator → RTP encode → datagram → FecReceiver → sink
//!
//! No network I/O: datagrams are handed over as byte slices, with loss and
//! reordering applied in the middle from a seeded RNG.

use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

use smpte2022_fec::receiver::{FecReceiver, PayloadWriter, ReceiverConfig};
use smpte2022_fec::{FecGenerator, GeneratorEvent, RtpPacket};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn media(seq: u16) -> RtpPacket {
    let mut packet = RtpPacket::new_mp2t(seq, u32::from(seq).wrapping_mul(3003), seq.to_string());
    packet.ssrc = 0x2022;
    packet
}

fn receiver(delay: usize) -> FecReceiver<Vec<RtpPacket>> {
    let config = ReceiverConfig {
        delay,
        ..Default::default()
    };
    FecReceiver::new(config, Vec::new())
}

fn shuffle<T>(items: &mut [T], rng: &mut StdRng) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

/// Datagrams a sender would put on the wire for `seqs`, in send order.
/// Media packets in `lost` and row FEC packets in `lost_rows` are skipped.
fn transmit(
    generator: &mut FecGenerator,
    seqs: impl IntoIterator<Item = u16>,
    lost: &[u16],
    lost_rows: &[u16],
) -> Vec<Vec<u8>> {
    let mut wire = Vec::new();
    for seq in seqs {
        let packet = media(seq);
        let events = generator.put_media(packet.clone()).unwrap();
        if !lost.contains(&seq) {
            wire.push(packet.encode().to_vec());
        }
        for event in events {
            match event {
                GeneratorEvent::Row(fec) if lost_rows.contains(&fec.sequence) => {}
                GeneratorEvent::Row(fec) | GeneratorEvent::Column(fec) => {
                    wire.push(fec.encode(packet.timestamp).to_vec());
                }
                GeneratorEvent::Reset { .. } => panic!("unexpected generator reset"),
            }
        }
    }
    wire
}

fn assert_in_order(out: &[RtpPacket], first: u16, count: usize) {
    assert_eq!(out.len(), count);
    for (i, packet) in out.iter().enumerate() {
        let seq = first.wrapping_add(i as u16);
        assert_eq!(packet.sequence, seq, "packet {i}");
        assert_eq!(packet.payload, media(seq).payload, "payload of #{seq}");
        assert_eq!(packet.timestamp, media(seq).timestamp, "timestamp of #{seq}");
    }
}

// ─── Reordering ─────────────────────────────────────────────────────────────

#[test]
fn shuffled_stream_is_delivered_in_order() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(0x2022);
    let mut seqs: Vec<u16> = (0..1024).collect();
    shuffle(&mut seqs, &mut rng);

    let mut rx = receiver(1024);
    for seq in seqs {
        rx.put_media(media(seq), true).unwrap();
    }
    assert!(rx.sink().is_empty());
    assert!(rx.is_startup());

    rx.flush().unwrap();
    assert_in_order(rx.sink(), 0, 1024);
    assert_eq!(rx.stats().media_missing, 0);
    assert_eq!(rx.stats().lostogram.get(&0), Some(&1024));
}

#[test]
fn payload_writer_receives_the_byte_stream() -> anyhow::Result<()> {
    let mut rx = FecReceiver::new(ReceiverConfig::default(), PayloadWriter::new(Vec::new()));
    for seq in [2u16, 0, 1, 4, 3] {
        rx.put_datagram(&media(seq).encode())?;
    }
    rx.flush()?;
    assert_eq!(rx.into_sink().into_inner(), b"01234".to_vec());
    Ok(())
}

// ─── Recovery ───────────────────────────────────────────────────────────────

#[test]
fn random_single_loss_per_row_is_fully_recovered() -> anyhow::Result<()> {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(7);
    let (l, d) = (4u8, 5u8);
    let first = 65000u16;
    let count = 400usize;

    // At most one loss per row; the first packet always arrives so output
    // starts at `first`.
    let mut lost = Vec::new();
    for row in 0..count / usize::from(l) {
        if rng.random_range(0..2) == 0 {
            let slot = row * usize::from(l) + rng.random_range(0..usize::from(l));
            if slot != 0 {
                lost.push(first.wrapping_add(slot as u16));
            }
        }
    }
    assert!(!lost.is_empty());

    let mut generator = FecGenerator::new(l, d)?;
    let seqs = (0..count as u16).map(|i| first.wrapping_add(i));
    let wire = transmit(&mut generator, seqs, &lost, &[]);

    let mut rx = receiver(50);
    for datagram in &wire {
        rx.put_datagram(datagram)?;
    }
    rx.flush()?;

    assert_in_order(rx.sink(), first, count);
    let stats = rx.stats();
    assert_eq!(stats.media_recovered, lost.len() as u64);
    assert_eq!(stats.media_missing, 0);
    assert_eq!(stats.media_aborted_recovery, 0);
    assert_eq!(stats.row_received, 100);
    assert_eq!(stats.col_received, 80);
    assert_eq!(rx.matrix(), (l, d));
    Ok(())
}

#[test]
fn recovery_cascades_between_directions() -> anyhow::Result<()> {
    init_tracing();
    let mut generator = FecGenerator::new(4, 4)?;
    // Rows: {0, 1, 2, 3} {4, 5, 6, 7} ... Losing 5, 6, 9 and the row FEC
    // of row 2 leaves only column 2 (6 alone) to start from:
    // col 2 → 6, row 1 → 5, col 1 → 9.
    let wire = transmit(&mut generator, 0..16, &[5, 6, 9], &[2]);

    let mut rx = receiver(32);
    for datagram in &wire {
        rx.put_datagram(datagram)?;
    }
    rx.flush()?;

    assert_in_order(rx.sink(), 0, 16);
    assert_eq!(rx.stats().media_recovered, 3);
    assert_eq!(rx.stats().media_missing, 0);
    Ok(())
}

#[test]
fn reordered_fec_and_media_still_recover() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut generator = FecGenerator::new(5, 4)?;
    let mut wire = transmit(&mut generator, 1..21, &[3, 9, 14, 20], &[]);
    // Keep the first media datagram first so output starts at #1.
    shuffle(&mut wire[1..], &mut rng);

    let mut rx = receiver(64);
    for datagram in &wire {
        rx.put_datagram(datagram)?;
    }
    rx.flush()?;

    assert_in_order(rx.sink(), 1, 20);
    assert!(rx.stats().media_recovered >= 4);
    assert_eq!(rx.stats().media_missing, 0);
    Ok(())
}

#[test]
fn square_loss_cannot_be_recovered() -> anyhow::Result<()> {
    let mut generator = FecGenerator::new(4, 4)?;
    let wire = transmit(&mut generator, 0..16, &[5, 6, 9, 10], &[]);

    let mut rx = receiver(32);
    for datagram in &wire {
        rx.put_datagram(datagram)?;
    }
    rx.flush()?;

    let delivered: Vec<u16> = rx.sink().iter().map(|p| p.sequence).collect();
    assert_eq!(delivered, vec![0, 1, 2, 3, 4, 7, 8, 11, 12, 13, 14, 15]);
    let stats = rx.stats();
    assert_eq!(stats.media_recovered, 0);
    assert_eq!(stats.media_missing, 4);
    assert_eq!(stats.lostogram.get(&2), Some(&2));
    assert_eq!(stats.lostogram.get(&0), Some(&10));
    assert!(rx.to_string().contains("Lostogram: 0:10 2:2"));
    Ok(())
}

// ─── Statistics ─────────────────────────────────────────────────────────────

#[test]
fn stats_export_as_json() -> anyhow::Result<()> {
    let mut generator = FecGenerator::new(4, 4)?;
    let wire = transmit(&mut generator, 0..16, &[7], &[]);

    let mut rx = receiver(4);
    for datagram in &wire {
        rx.put_datagram(datagram)?;
    }
    rx.flush()?;

    let json: serde_json::Value = serde_json::to_value(rx.stats())?;
    assert_eq!(json["media_recovered"], 1);
    assert_eq!(json["media_output"], 16);
    assert_eq!(json["row_received"], 4);
    assert_eq!(json["col_received"], 4);

    let json = serde_json::to_value(generator.stats())?;
    assert_eq!(json["row_sent"], 4);
    assert_eq!(json["col_sent"], 4);
    Ok(())
}
