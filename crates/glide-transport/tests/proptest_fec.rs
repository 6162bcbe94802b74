//! Property-based tests for the XOR FEC layer.
//!
//! Any single packet of a group may be lost, parity included, and the
//! decoder must still hand up every original payload exactly once.

use bytes::Bytes;
use proptest::prelude::*;

use glide_transport::fec::{FecDecoder, FecEncoder};

fn payloads(group_size: usize, max_len: usize, seed: u64) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(1usize..=max_len, group_size).prop_map(move |lens| {
        lens.iter()
            .enumerate()
            .map(|(i, &n)| {
                (0..n)
                    .map(|j| (seed as u8) ^ (i as u8).wrapping_mul(37) ^ j as u8)
                    .collect()
            })
            .collect()
    })
}

fn sorted(mut v: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    v.sort();
    v
}

fn encode_group(group_size: u8, payloads: &[Vec<u8>]) -> Vec<Bytes> {
    let mut enc = FecEncoder::new(group_size);
    let mut packets = Vec::new();
    for p in payloads {
        enc.encode(p, &mut packets).unwrap();
    }
    packets
}

proptest! {
    /// Dropping exactly one packet of a full group (data or parity) loses
    /// nothing: the decoder's output is the original payload multiset.
    #[test]
    fn single_loss_per_group_is_recovered(
        (group_size, originals) in (2u8..=32, any::<u64>())
            .prop_flat_map(|(k, seed)| (Just(k), payloads(k as usize, 1400, seed))),
        drop_at in any::<prop::sample::Index>(),
    ) {
        let packets = encode_group(group_size, &originals);
        prop_assert_eq!(packets.len(), group_size as usize + 1);
        let dropped = drop_at.index(packets.len());

        let mut dec = FecDecoder::new();
        let mut out = Vec::new();
        for (i, p) in packets.iter().enumerate() {
            if i != dropped {
                dec.decode(p, &mut out).unwrap();
            }
        }

        let decoded: Vec<Vec<u8>> = out.iter().map(|b| b.to_vec()).collect();
        prop_assert_eq!(sorted(decoded), sorted(originals.clone()));

        let expected_recoveries = u64::from(dropped < group_size as usize);
        prop_assert_eq!(dec.stats().recovered, expected_recoveries);
    }

    /// Feeding every packet twice yields no extra output.
    #[test]
    fn duplicates_add_nothing(
        (group_size, originals) in (2u8..=16, any::<u64>())
            .prop_flat_map(|(k, seed)| (Just(k), payloads(k as usize, 256, seed))),
    ) {
        let packets = encode_group(group_size, &originals);
        let mut dec = FecDecoder::new();
        let mut out = Vec::new();
        for p in packets.iter().chain(packets.iter()) {
            dec.decode(p, &mut out).unwrap();
        }
        prop_assert_eq!(out.len(), originals.len());
        prop_assert_eq!(dec.stats().duplicates, packets.len() as u64);
    }

    /// Arbitrary bytes never panic the decoder and never produce output
    /// from a packet that fails validation.
    #[test]
    fn random_packets_never_panic(
        packets in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..96), 1..32),
    ) {
        let mut dec = FecDecoder::new();
        let mut out = Vec::new();
        for p in &packets {
            let before = out.len();
            if dec.decode(p, &mut out).is_err() {
                prop_assert!(out.len() <= before + 1);
            }
        }
    }
}
