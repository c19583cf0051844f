//! Integration tests for `ReloadCoordinator` request-path behaviour.
//!
//! Validates lazy set-up, idempotent set-up under contention, reload on
//! stale generations, exactly-one reload per change event, no overlapping
//! hosted instances, start-failure propagation and shutdown semantics.

use std::sync::Arc;
use std::time::Duration;

use code_reloader::AppError;

use super::test_helpers::{manual_harness, manual_harness_with_delay, write_source};

const APP: &[(&str, &str)] = &[("app/main.txt", "v1")];

#[tokio::test]
async fn begin_work_sets_up_lazily() {
    let h = manual_harness(APP, "app.main");
    assert!(h.coordinator.current().await.is_none());

    let work = h.coordinator.begin_work().await.expect("begin work");
    assert_eq!(work.generation().id(), 1);
    assert_eq!(work.instance().text, "v1");
    h.coordinator.end_work(work).await;

    assert_eq!(h.counters.starts(), 1);
    assert_eq!(h.counters.stops(), 0);
    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_set_up_builds_one_generation() {
    let h = manual_harness_with_delay(APP, "app.main", Duration::from_millis(20));
    let coordinator = h.coordinator.clone();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator.set_up().await.expect("set up").id()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.expect("join"), 1);
    }

    assert_eq!(h.counters.starts(), 1);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn stale_generation_is_replaced_on_next_work() {
    let h = manual_harness(APP, "app.main");

    let work = h.coordinator.begin_work().await.expect("first work");
    h.coordinator.end_work(work).await;

    write_source(h.root.path(), "app/main.txt", "v2");
    assert!(h.backend.trigger() >= 1);

    let work = h.coordinator.begin_work().await.expect("second work");
    assert_eq!(work.generation().id(), 2);
    assert_eq!(work.instance().text, "v2");
    h.coordinator.end_work(work).await;

    assert_eq!(h.counters.starts(), 2);
    assert_eq!(h.counters.stops(), 1);
    assert!(!h.counters.overlapped());
    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_change_event_causes_exactly_one_reload() {
    const WORKERS: usize = 16;
    let h = manual_harness_with_delay(APP, "app.main", Duration::from_millis(5));

    let run_wave = |expected: u64| {
        let mut tasks = Vec::new();
        for _ in 0..WORKERS {
            let coordinator = h.coordinator.clone();
            tasks.push(tokio::spawn(async move {
                let work = coordinator.begin_work().await.expect("begin work");
                let id = work.generation().id();
                tokio::time::sleep(Duration::from_millis(2)).await;
                coordinator.end_work(work).await;
                id
            }));
        }
        async move {
            for task in tasks {
                assert_eq!(task.await.expect("join"), expected);
            }
        }
    };

    run_wave(1).await;
    assert_eq!(h.counters.starts(), 1);

    write_source(h.root.path(), "app/main.txt", "v2");
    h.backend.trigger();

    run_wave(2).await;

    assert_eq!(h.counters.starts(), 2, "exactly one rebuild");
    assert_eq!(h.counters.stops(), 1, "exactly one teardown");
    assert!(!h.counters.overlapped());
    h.coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hosted_instances_never_overlap() {
    let h = manual_harness_with_delay(APP, "app.main", Duration::from_millis(3));

    for round in 0..5 {
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = h.coordinator.clone();
            tasks.push(tokio::spawn(async move {
                let work = coordinator.begin_work().await.expect("begin work");
                coordinator.end_work(work).await;
            }));
        }
        write_source(h.root.path(), "app/main.txt", &format!("v{round}"));
        h.backend.trigger();
        for task in tasks {
            task.await.expect("join");
        }
    }

    let work = h.coordinator.begin_work().await.expect("final work");
    h.coordinator.end_work(work).await;
    h.coordinator.shutdown().await;

    assert!(!h.counters.overlapped(), "start ran while an instance was live");
    assert_eq!(h.counters.starts(), h.counters.stops());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_waits_for_in_flight_work() {
    let h = manual_harness(APP, "app.main");

    let held = h.coordinator.begin_work().await.expect("held work");
    assert_eq!(held.generation().id(), 1);

    h.backend.trigger();

    let coordinator = h.coordinator.clone();
    let waiter = tokio::spawn(async move {
        let work = coordinator.begin_work().await.expect("waiting work");
        let id = work.generation().id();
        coordinator.end_work(work).await;
        id
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished(), "reload must not finish while work is in flight");
    assert_eq!(h.counters.stops(), 0);
    assert_eq!(held.instance().generation, 1);

    h.coordinator.end_work(held).await;

    let id = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should finish after release")
        .expect("join");
    assert_eq!(id, 2);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn start_failure_fails_the_work_and_is_retried_next_time() {
    let h = manual_harness(&[], "app.main");

    let err = h
        .coordinator
        .begin_work()
        .await
        .err()
        .expect("missing target must fail");
    assert!(matches!(err, AppError::LifecycleStart(_)), "got {err:?}");
    assert!(h.coordinator.current().await.is_none());

    write_source(h.root.path(), "app/main.txt", "late");
    let work = h.coordinator.begin_work().await.expect("retry succeeds");
    assert_eq!(work.instance().text, "late");
    assert_eq!(work.generation().id(), 2, "failed attempt consumed generation 1");
    h.coordinator.end_work(work).await;
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn tear_down_keeps_a_fresh_generation() {
    let h = manual_harness(APP, "app.main");
    let first = h.coordinator.set_up().await.expect("set up");

    h.coordinator.tear_down().await;

    let current = h.coordinator.current().await.expect("still live");
    assert!(Arc::ptr_eq(&first, &current));
    assert_eq!(h.counters.stops(), 0);
    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_everything_and_refuses_work() {
    let h = manual_harness(APP, "app.main");
    let work = h.coordinator.begin_work().await.expect("work");
    let loader = Arc::clone(work.loader());
    h.coordinator.end_work(work).await;

    h.coordinator.shutdown().await;

    assert!(h.coordinator.is_shut_down().await);
    assert!(loader.is_closed());
    assert_eq!(h.counters.starts(), h.counters.stops());
    assert_eq!(h.backend.open_subscriptions(), 0);

    let err = h.coordinator.begin_work().await.err().expect("refused");
    assert!(matches!(err, AppError::ShutDown(_)));
    let err = h.coordinator.set_up().await.err().expect("refused");
    assert!(matches!(err, AppError::ShutDown(_)));

    // Idempotent.
    h.coordinator.shutdown().await;
    assert_eq!(h.counters.stops(), 1);
}

#[tokio::test]
async fn shutdown_before_set_up_is_safe() {
    let h = manual_harness(APP, "app.main");
    h.coordinator.shutdown().await;
    assert_eq!(h.counters.starts(), 0);
    assert_eq!(h.counters.stops(), 0);
}

#[tokio::test]
async fn retired_subscriptions_are_not_retained() {
    let h = manual_harness(APP, "app.main");

    for round in 0..50 {
        let work = h.coordinator.begin_work().await.expect("work");
        h.coordinator.end_work(work).await;
        write_source(h.root.path(), "app/main.txt", &format!("v{round}"));
        h.backend.trigger();
    }
    let work = h.coordinator.begin_work().await.expect("final work");
    assert_eq!(work.generation().id(), 51);
    h.coordinator.end_work(work).await;

    assert_eq!(h.backend.subscriptions(), 51);
    assert_eq!(h.backend.open_subscriptions(), 1, "only the live loader is held");
    assert_eq!(h.backend.watched_dirs().len(), 1);

    h.coordinator.shutdown().await;
    assert_eq!(h.backend.open_subscriptions(), 0);
    assert!(h.backend.watched_dirs().is_empty());
}
