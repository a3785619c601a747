//! Models that misbehave: every failure ends the run with a typed
//! error and leaves the engine in `Failed`.

use gridsync_core::{CallbackError, SyncError, Timestamp};
use gridsync_engine::{Engine, EngineConfig, EngineError, EngineState};
use gridsync_test_utils::{deferred_module, faults_module};

fn engine_with(class: &str, config: EngineConfig) -> Engine {
    let mut engine = Engine::new(config).unwrap();
    engine.load_module(&faults_module()).unwrap();
    engine.create_object(class).unwrap();
    engine
}

fn config() -> EngineConfig {
    EngineConfig {
        thread_count: Some(1),
        watchdog_timeout: None,
        ..EngineConfig::default()
    }
}

#[test]
fn soft_request_at_clock_hits_iteration_limit() {
    let cfg = EngineConfig {
        iteration_limit: 5,
        ..config()
    };
    let mut engine = engine_with("stubborn", cfg);
    match engine.run() {
        Err(EngineError::Sync(SyncError::ConvergenceLimit { clock, iterations })) => {
            assert_eq!(clock, Timestamp(0));
            assert_eq!(iterations, 5);
        }
        other => panic!("expected ConvergenceLimit, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(engine.stats().passes, 5);
    assert_eq!(engine.stats().time_steps, 0);
}

#[test]
fn soft_request_in_the_past_is_non_convergent() {
    let cfg = EngineConfig {
        start_time: Timestamp(100),
        convergence_retry_limit: 3,
        ..config()
    };
    let mut engine = engine_with("regressor", cfg);
    match engine.run() {
        Err(EngineError::Sync(SyncError::NonConvergence {
            class,
            pass,
            t1,
            retries,
            ..
        })) => {
            assert_eq!(class, "regressor");
            assert_eq!(pass, "BOTTOMUP");
            assert_eq!(t1, Timestamp(100));
            assert_eq!(retries, 3);
        }
        other => panic!("expected NonConvergence, got {other:?}"),
    }
}

#[test]
fn callback_error_names_object_and_stage() {
    let mut engine = engine_with("faulty", config());
    let id = engine.store().iter().next().unwrap().id();
    match engine.run() {
        Err(EngineError::Sync(SyncError::CallbackFailed {
            class,
            object,
            stage,
            reason: CallbackError::Failed { reason },
            ..
        })) => {
            assert_eq!(class, "faulty");
            assert_eq!(object, id);
            assert_eq!(stage, "sync");
            assert_eq!(reason, "breaker tripped");
        }
        other => panic!("expected CallbackFailed, got {other:?}"),
    }
}

#[test]
fn hard_request_in_the_past_stops_the_clock() {
    let cfg = EngineConfig {
        start_time: Timestamp(100),
        ..config()
    };
    let mut engine = engine_with("clockstopper", cfg);
    match engine.run() {
        Err(EngineError::Sync(SyncError::ClockStopped {
            clock, reported, ..
        })) => {
            assert_eq!(clock, Timestamp(100));
            assert_eq!(reported, Timestamp(95));
        }
        other => panic!("expected ClockStopped, got {other:?}"),
    }
}

#[test]
fn required_pass_without_sync_is_fatal() {
    let mut engine = engine_with("hollow", config());
    match engine.run() {
        Err(EngineError::Sync(SyncError::MissingSync { class, pass, .. })) => {
            assert_eq!(class, "hollow");
            assert_eq!(pass, "BOTTOMUP");
        }
        other => panic!("expected MissingSync, got {other:?}"),
    }
}

#[test]
fn failures_surface_through_the_worker_pool() {
    let cfg = EngineConfig {
        thread_count: Some(4),
        min_batch: 1,
        ..config()
    };
    let mut engine = Engine::new(cfg).unwrap();
    engine.load_module(&faults_module()).unwrap();
    engine.create_objects("hollow", 8).unwrap();
    match engine.run() {
        Err(EngineError::Sync(SyncError::MissingSync { .. })) => {}
        other => panic!("expected MissingSync, got {other:?}"),
    }
}

#[test]
fn failed_engine_can_still_shut_down() {
    let mut engine = engine_with("faulty", config());
    assert!(engine.run().is_err());
    assert!(matches!(
        engine.step(),
        Err(EngineError::InvalidState {
            state: EngineState::Failed,
            ..
        })
    ));
    engine.shutdown().unwrap();
    assert_eq!(engine.state(), EngineState::ShutDown);
}

// ── Deferred init ──────────────────────────────────────────────

#[test]
fn deferred_init_retries_until_done() {
    let mut engine = Engine::new(config()).unwrap();
    engine.load_module(&deferred_module()).unwrap();
    let ids = engine.create_objects("waiter", 3).unwrap();
    engine.init().unwrap();
    for id in ids {
        let attempts = engine.get_value(id, "attempts").unwrap();
        assert_eq!(attempts, gridsync_model::PropertyValue::Int64(2));
        let flags = engine.object(id).unwrap().read().header.flags;
        assert!(!flags.contains(gridsync_core::ObjectFlags::DEFERRED));
    }
}

#[test]
fn init_without_progress_stalls() {
    let mut engine = Engine::new(config()).unwrap();
    engine.load_module(&deferred_module()).unwrap();
    engine.load_module(&faults_module()).unwrap();
    engine.create_object("stubborn").unwrap();
    engine.create_object("waiter").unwrap();
    engine.create_object("stuck").unwrap();
    match engine.init() {
        Err(EngineError::Sync(SyncError::InitStalled { pending })) => assert_eq!(pending, 1),
        other => panic!("expected InitStalled, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
}
