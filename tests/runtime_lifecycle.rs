//! Activation, switching, stopping and eviction of content modules.

mod common;

use common::{descriptor, runtime_on, scripted_catalogue, Probe};
use proptest::prelude::*;
use tiny_display::link::mock::MockDevice;
use tiny_display::plugin::RuntimeState;
use tiny_display::RuntimeError;

#[tokio::test]
async fn switch_cleans_up_before_next_initialize() {
    let probe = Probe::new();
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    assert_eq!(runtime.state(), RuntimeState::Running);
    runtime.switch(&descriptor(&catalogue, "Beta")).await.unwrap();

    assert_eq!(probe.events(), vec!["init:Alpha", "cleanup:Alpha", "init:Beta"]);
    assert_eq!(runtime.state(), RuntimeState::Running);
    assert_eq!(runtime.active_plugin().map(|d| d.name()), Some("Beta"));
}

#[tokio::test]
async fn first_update_gets_first_draw() {
    let probe = Probe::new();
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    runtime.poll().await;
    assert_eq!(probe.events(), vec!["init:Alpha", "update:Alpha:true"]);
    assert_eq!(runtime.active_ticks(), Some(1));
    assert!(device.write_count() >= 2);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let probe = Probe::new();
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    runtime.stop().await;
    runtime.stop().await;
    assert_eq!(runtime.state(), RuntimeState::CleanedUp);
    assert_eq!(probe.count("cleanup:Alpha"), 1);

    runtime.shutdown().await;
    assert_eq!(device.shutdowns(), 1);
    assert!(!runtime.link().is_connected());
}

#[tokio::test]
async fn activate_after_stop_starts_again() {
    let probe = Probe::new();
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    runtime.stop().await;
    runtime.activate(&descriptor(&catalogue, "Beta")).await.unwrap();
    assert_eq!(runtime.state(), RuntimeState::Running);
    assert_eq!(
        probe.events(),
        vec!["init:Alpha", "cleanup:Alpha", "init:Beta"]
    );
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let probe = Probe::new();
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;
    let alpha = descriptor(&catalogue, "Alpha");

    let err = runtime.switch(&alpha).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::InvalidTransition {
            operation: "switch",
            state: RuntimeState::Idle
        }
    ));

    runtime.activate(&alpha).await.unwrap();
    let err = runtime.activate(&alpha).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidTransition { operation: "activate", .. }));
    assert_eq!(probe.count("init:"), 1);
}

#[tokio::test]
async fn failed_initialize_still_cleans_up() {
    let probe = Probe::new();
    probe.with(|s| s.fail_init = true);
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    let err = runtime
        .activate(&descriptor(&catalogue, "Alpha"))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ActivationFailed { ref plugin, .. } if plugin == "Alpha"));
    assert_eq!(runtime.state(), RuntimeState::Idle);
    assert!(runtime.active_plugin().is_none());
    assert_eq!(probe.events(), vec!["init:Alpha", "cleanup:Alpha"]);
}

#[tokio::test(start_paused = true)]
async fn three_failed_updates_evict() {
    let probe = Probe::new();
    probe.with(|s| s.fail_updates = true);
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    for expected in 1..=2 {
        runtime.poll().await;
        assert_eq!(runtime.active_failures(), Some(expected));
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
    }
    runtime.poll().await;

    assert_eq!(runtime.state(), RuntimeState::Idle);
    assert!(runtime.active_plugin().is_none());
    assert_eq!(probe.count("update:Alpha"), 3);
    assert_eq!(probe.count("cleanup:Alpha"), 1);

    // Nothing left to tick.
    runtime.poll().await;
    assert_eq!(probe.count("update:Alpha"), 3);
}

#[tokio::test(start_paused = true)]
async fn success_resets_failure_count() {
    let probe = Probe::new();
    probe.with(|s| s.fail_updates = true);
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    for _ in 0..2 {
        runtime.poll().await;
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
    }
    assert_eq!(runtime.active_failures(), Some(2));

    probe.with(|s| s.fail_updates = false);
    runtime.poll().await;
    assert_eq!(runtime.active_failures(), Some(0));
    assert_eq!(runtime.state(), RuntimeState::Running);
}

#[tokio::test]
async fn panicking_update_counts_as_failure() {
    let probe = Probe::new();
    probe.with(|s| s.panic_in_update = true);
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    runtime.poll().await;
    assert_eq!(runtime.active_failures(), Some(1));
    assert_eq!(runtime.state(), RuntimeState::Running);
}

#[tokio::test]
async fn panicking_cleanup_does_not_block_switch() {
    let probe = Probe::new();
    probe.with(|s| s.panic_in_cleanup = true);
    let catalogue = scripted_catalogue(&probe).await;
    let device = MockDevice::new();
    let mut runtime = runtime_on(&device).await;

    runtime.activate(&descriptor(&catalogue, "Alpha")).await.unwrap();
    runtime.switch(&descriptor(&catalogue, "Beta")).await.unwrap();
    assert_eq!(runtime.active_plugin().map(|d| d.name()), Some("Beta"));
    assert_eq!(runtime.state(), RuntimeState::Running);
}

#[derive(Debug, Clone)]
enum Op {
    Activate(bool),
    Switch(bool),
    Stop,
    Poll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Activate),
        any::<bool>().prop_map(Op::Switch),
        Just(Op::Stop),
        Just(Op::Poll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_instance_is_live(ops in proptest::collection::vec(op(), 1..24)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (max_live, live, running) = rt.block_on(async {
            let probe = Probe::new();
            let catalogue = scripted_catalogue(&probe).await;
            let device = MockDevice::new();
            let mut runtime = runtime_on(&device).await;
            let pick = |alpha: bool| descriptor(&catalogue, if alpha { "Alpha" } else { "Beta" });

            for op in ops {
                match op {
                    Op::Activate(alpha) => { let _ = runtime.activate(&pick(alpha)).await; }
                    Op::Switch(alpha) => { let _ = runtime.switch(&pick(alpha)).await; }
                    Op::Stop => runtime.stop().await,
                    Op::Poll => { runtime.poll().await; }
                }
            }
            let running = runtime.state() == RuntimeState::Running;
            probe.with(|s| (s.max_live, s.live, running))
        });

        prop_assert!(max_live <= 1);
        prop_assert_eq!(live, i32::from(running));
    }
}
