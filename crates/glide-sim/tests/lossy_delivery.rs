//! End-to-end scenarios through the impaired virtual link.

use glide_sim::impairment::ImpairmentConfig;
use glide_sim::scenario::{probe_effective_loss, run, ScenarioConfig};
use glide_transport::config::{EngineConfig, Mode};
use proptest::prelude::*;

// ─── Exactly-once delivery ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_message_arrives_once_in_order(
        seed in any::<u64>(),
        loss in 0.0f32..35.0,
        duplicate in 0.0f32..20.0,
        reorder in 0.0f32..20.0,
        jitter in 0u32..30,
        fec in prop::option::of(2u8..=16),
    ) {
        let report = run(&ScenarioConfig {
            seed,
            impairment: ImpairmentConfig {
                loss_percent: loss,
                duplicate_percent: duplicate,
                reorder_percent: reorder,
                delay_ms: 5,
                jitter_ms: jitter,
            },
            engine: EngineConfig {
                mode: Mode::Fast,
                dead_link: 1_000,
                ..Default::default()
            },
            fec_group_size: fec,
            messages: 60,
            message_size: 1_800,
            ..Default::default()
        })
        .unwrap();

        prop_assert!(!report.dead_link);
        prop_assert!(report.in_order);
        prop_assert_eq!(report.messages_delivered, 60);
        prop_assert!(report.completed);
    }
}

// ─── FEC vs. no FEC ──────────────────────────────────────────────────────────

#[test]
fn fec_lowers_effective_loss_at_thirty_percent() {
    let impairment = ImpairmentConfig::lossy(30.0);
    let plain = probe_effective_loss(7, &impairment, None, 5_000);
    let fec = probe_effective_loss(7, &impairment, Some(10), 5_000);

    assert!(plain.effective_loss > 0.25 && plain.effective_loss < 0.35);
    assert!(fec.recovered > 0);
    assert_eq!(fec.arrived, plain.arrived + fec.recovered);
    assert!(fec.effective_loss < plain.effective_loss);
}

#[test]
fn fec_transfer_completes_under_heavy_loss() {
    let config = ScenarioConfig {
        seed: 2024,
        impairment: ImpairmentConfig::lossy(30.0),
        engine: EngineConfig {
            mode: Mode::Fast,
            dead_link: 1_000,
            ..Default::default()
        },
        fec_group_size: Some(10),
        messages: 100,
        ..Default::default()
    };
    let report = run(&config).unwrap();
    assert!(report.completed);
    let receiver_fec = report.receiver_fec.unwrap();
    assert!(receiver_fec.data_packets_received > 0);
    assert!(report.sender_fec.unwrap().parity_packets_sent > 0);
}

#[test]
fn silent_peer_ends_in_dead_link() {
    let report = run(&ScenarioConfig {
        impairment: ImpairmentConfig::lossy(100.0),
        engine: EngineConfig {
            mode: Mode::Fast,
            dead_link: 8,
            ..Default::default()
        },
        messages: 1,
        ..Default::default()
    })
    .unwrap();
    assert!(report.dead_link);
    assert!(!report.completed);
    assert_eq!(report.messages_delivered, 0);
    assert_eq!(report.sender.timeout_retransmits, 8);
}
