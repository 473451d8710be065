mod common;

use common::{at, day, harness, harness_with, make_metric, make_record};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tyl_storage::LocalStore;
use tyl_sync::{SyncConfig, SyncOutcome, SyncPhase};
use tyl_types::{MetricId, SyncWatermark, Timestamp, UserId, UserProfile};

// ── Enable / disable ─────────────────────────────────────────────

#[tokio::test]
async fn trigger_while_disabled_is_skipped() {
    let h = harness();

    assert_eq!(h.engine.status().phase(), SyncPhase::Disabled);
    assert_eq!(h.engine.trigger_sync(false).await, SyncOutcome::Skipped);
    assert_eq!(h.remote.pull_count(), 0);
}

#[tokio::test]
async fn enable_creates_watermark_on_first_use() {
    let h = harness();
    h.enable().await;

    let status = h.engine.status();
    assert_eq!(status.phase(), SyncPhase::Idle);
    assert_eq!(status.user_id, Some(h.user_id));
    assert_eq!(status.last_sync, None);
    assert_eq!(
        h.store.load_watermark(&h.user_id).unwrap(),
        Some(SyncWatermark::new(h.user_id))
    );
}

#[tokio::test]
async fn enable_restores_existing_watermark() {
    let h = harness();
    h.store
        .save_watermark(&SyncWatermark {
            user_id: h.user_id,
            last_sync: Some(at(-5_000)),
        })
        .unwrap();

    h.enable().await;

    assert_eq!(h.engine.status().last_sync, Some(at(-5_000)));
}

#[tokio::test]
async fn enable_without_user_stays_disabled() {
    let h = harness();
    h.engine.enable(None).await.unwrap();

    assert_eq!(h.engine.status().phase(), SyncPhase::Disabled);
    assert_eq!(h.engine.trigger_sync(false).await, SyncOutcome::Skipped);
}

#[tokio::test]
async fn disable_resets_status() {
    let h = harness();
    h.enable().await;
    h.engine.disable();

    let status = h.engine.status();
    assert_eq!(status.phase(), SyncPhase::Disabled);
    assert_eq!(status.user_id, None);
    assert_eq!(h.engine.trigger_sync(false).await, SyncOutcome::Skipped);
}

// ── Pass basics ──────────────────────────────────────────────────

#[tokio::test]
async fn first_pass_pushes_local_and_pulls_remote() {
    let h = harness();
    let metric = make_metric(h.user_id, "Mood", at(0));
    let local = make_record(metric.id, h.user_id, 1, "4", at(0));
    let remote = make_record(metric.id, h.user_id, 2, "5", at(10));
    h.store.upsert_metric(&metric).unwrap();
    h.store.upsert_record(&local).unwrap();
    h.remote.insert_record(remote.clone());
    h.enable().await;
    h.clock.set(at(1_000));

    let outcome = h.engine.trigger_sync(false).await;

    let report = outcome.report().copied().unwrap();
    assert_eq!(report.pulled.records, 1);
    assert_eq!(report.pushed.records, 1);
    assert_eq!(report.pushed.metrics, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.watermark, at(1_000));
    assert_eq!(h.remote.record(metric.id, day(1)), Some(local));
    assert_eq!(h.remote.metric(&metric.id), Some(metric.clone()));
    assert_eq!(h.store.get_record(&metric.id, day(2)).unwrap(), Some(remote));

    let status = h.engine.status();
    assert_eq!(status.phase(), SyncPhase::Idle);
    assert_eq!(status.last_sync, Some(at(1_000)));
    assert_eq!(status.error, None);
    assert_eq!(
        h.store.load_watermark(&h.user_id).unwrap().unwrap().last_sync,
        Some(at(1_000))
    );
}

#[tokio::test]
async fn second_pass_only_sees_changes_after_watermark() {
    let h = harness();
    let metric_id = MetricId::new();
    h.store
        .upsert_record(&make_record(metric_id, h.user_id, 1, "1", at(0)))
        .unwrap();
    h.enable().await;
    h.clock.set(at(1_000));
    assert!(h.engine.trigger_sync(false).await.is_completed());

    h.clock.set(at(2_000));
    let report = h.engine.trigger_sync(false).await.report().copied().unwrap();

    assert_eq!(report.pulled.total(), 0);
    assert_eq!(report.pushed.total(), 0);
    assert_eq!(h.remote.pushed_records().len(), 1);
}

#[tokio::test]
async fn profile_round_trips_through_remote() {
    let h = harness();
    let mut profile = UserProfile::new(h.user_id);
    profile.name = Some("Ada".into());
    profile.updated = at(0);
    h.store.upsert_profile(&profile).unwrap();
    h.enable().await;
    h.clock.set(at(1_000));

    let report = h.engine.trigger_sync(false).await.report().copied().unwrap();

    assert_eq!(report.pushed.profiles, 1);
    assert_eq!(h.remote.pushed_profiles(), vec![profile.clone()]);
    assert_eq!(h.remote.profile(&h.user_id), Some(profile));
}

// ── Last-write-wins ──────────────────────────────────────────────

#[tokio::test]
async fn remote_newer_row_is_applied_and_not_pushed_back() {
    let h = harness();
    let metric_id = MetricId::new();
    h.store
        .save_watermark(&SyncWatermark {
            user_id: h.user_id,
            last_sync: Some(at(0)),
        })
        .unwrap();
    h.store
        .upsert_record(&make_record(metric_id, h.user_id, 1, "mine", at(10)))
        .unwrap();
    let theirs = make_record(metric_id, h.user_id, 1, "theirs", at(20));
    h.remote.insert_record(theirs.clone());
    h.enable().await;
    h.clock.set(at(1_000));

    let report = h.engine.trigger_sync(false).await.report().copied().unwrap();

    assert_eq!(report.pushed.records, 0);
    assert!(h.remote.pushed_records().is_empty());
    assert_eq!(h.store.get_record(&metric_id, day(1)).unwrap(), Some(theirs));
}

#[tokio::test]
async fn local_newer_row_is_kept_and_pushed() {
    let h = harness();
    let metric_id = MetricId::new();
    let mine = make_record(metric_id, h.user_id, 1, "mine", at(30));
    h.store.upsert_record(&mine).unwrap();
    h.remote
        .insert_record(make_record(metric_id, h.user_id, 1, "theirs", at(20)));
    h.enable().await;
    h.clock.set(at(1_000));

    let report = h.engine.trigger_sync(false).await.report().copied().unwrap();

    assert_eq!(report.pulled.records, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(h.remote.pushed_records(), vec![mine.clone()]);
    assert_eq!(h.remote.record(metric_id, day(1)), Some(mine.clone()));
    assert_eq!(h.store.get_record(&metric_id, day(1)).unwrap(), Some(mine));
}

#[tokio::test]
async fn equal_stamps_resolve_to_the_remote_row() {
    let h = harness();
    let metric_id = MetricId::new();
    h.store
        .upsert_record(&make_record(metric_id, h.user_id, 1, "mine", at(20)))
        .unwrap();
    let theirs = make_record(metric_id, h.user_id, 1, "theirs", at(20));
    h.remote.insert_record(theirs.clone());
    h.enable().await;

    h.engine.trigger_sync(false).await;

    assert!(h.remote.pushed_records().is_empty());
    assert_eq!(h.store.get_record(&metric_id, day(1)).unwrap(), Some(theirs));
}

// ── Full resync ──────────────────────────────────────────────────

#[tokio::test]
async fn clear_ignores_watermark_and_skips_push() {
    let h = harness();
    let metric_id = MetricId::new();
    h.store
        .save_watermark(&SyncWatermark {
            user_id: h.user_id,
            last_sync: Some(at(100)),
        })
        .unwrap();
    let old_remote = make_record(metric_id, h.user_id, 1, "old", at(0));
    h.remote.insert_record(old_remote.clone());
    h.store
        .upsert_record(&make_record(metric_id, h.user_id, 2, "local", at(200)))
        .unwrap();
    h.enable().await;
    h.clock.set(at(1_000));

    let report = h.engine.trigger_sync(true).await.report().copied().unwrap();

    assert!(report.full_resync);
    assert_eq!(report.pulled.records, 1);
    assert_eq!(report.pushed.total(), 0);
    assert!(h.remote.pushed_records().is_empty());
    assert_eq!(h.store.get_record(&metric_id, day(1)).unwrap(), Some(old_remote));
    assert_eq!(report.watermark, at(1_000));
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn failed_pass_keeps_watermark_and_surfaces_error() {
    let h = harness();
    h.enable().await;
    h.clock.set(at(1_000));
    assert!(h.engine.trigger_sync(false).await.is_completed());

    h.remote.fail_with("503 service unavailable");
    h.clock.set(at(2_000));
    let outcome = h.engine.trigger_sync(false).await;

    assert_eq!(
        outcome,
        SyncOutcome::Failed("remote error: 503 service unavailable".into())
    );
    let status = h.engine.status();
    assert_eq!(status.phase(), SyncPhase::Idle);
    assert_eq!(status.last_sync, Some(at(1_000)));
    assert_eq!(
        status.error.as_deref(),
        Some("remote error: 503 service unavailable")
    );
    assert_eq!(
        h.store.load_watermark(&h.user_id).unwrap().unwrap().last_sync,
        Some(at(1_000))
    );

    h.remote.recover();
    h.clock.set(at(3_000));
    assert!(h.engine.trigger_sync(false).await.is_completed());
    let status = h.engine.status();
    assert_eq!(status.error, None);
    assert_eq!(status.last_sync, Some(at(3_000)));
}

#[tokio::test]
async fn failed_push_is_retried_on_next_pass() {
    let h = harness();
    let metric_id = MetricId::new();
    let mine = make_record(metric_id, h.user_id, 1, "mine", at(0));
    h.store.upsert_record(&mine).unwrap();
    h.enable().await;

    h.remote.fail_with("offline");
    h.clock.set(at(1_000));
    assert!(!h.engine.trigger_sync(false).await.is_completed());

    h.remote.recover();
    h.clock.set(at(2_000));
    assert!(h.engine.trigger_sync(false).await.is_completed());
    assert_eq!(h.remote.record(metric_id, day(1)), Some(mine));
}

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out() {
    let h = harness_with(SyncConfig {
        request_timeout_ms: 50,
        ..SyncConfig::default()
    });
    h.remote.set_latency(Duration::from_secs(5));
    h.enable().await;

    let outcome = h.engine.trigger_sync(false).await;

    match outcome {
        SyncOutcome::Failed(message) => assert!(message.ends_with("timed out"), "{message}"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(h.store.load_watermark(&h.user_id).unwrap().unwrap().last_sync, None);
    assert!(!h.engine.status().is_syncing);
}

#[tokio::test]
async fn foreign_rows_abort_the_pass_without_partial_apply() {
    let h = harness();
    let metric_id = MetricId::new();
    h.remote
        .insert_record(make_record(metric_id, h.user_id, 1, "valid", at(0)));
    h.remote
        .inject_pull_records(vec![make_record(metric_id, UserId::new(), 2, "foreign", at(0))]);
    h.enable().await;

    let outcome = h.engine.trigger_sync(false).await;

    match outcome {
        SyncOutcome::Failed(message) => {
            assert!(message.starts_with("malformed remote payload"), "{message}")
        }
        other => panic!("expected malformed payload, got {other:?}"),
    }
    assert_eq!(h.store.get_record(&metric_id, day(1)).unwrap(), None);
    assert_eq!(h.store.get_record(&metric_id, day(2)).unwrap(), None);
    assert_eq!(h.store.load_watermark(&h.user_id).unwrap().unwrap().last_sync, None);
}

// ── Concurrency & watermark ──────────────────────────────────────

#[tokio::test]
async fn at_most_one_pass_in_flight() {
    let h = harness();
    h.remote.set_latency(Duration::from_millis(20));
    h.enable().await;

    let (a, b) = tokio::join!(h.engine.trigger_sync(false), h.engine.trigger_sync(false));

    let completed = [&a, &b].iter().filter(|o| o.is_completed()).count();
    let skipped = [&a, &b]
        .iter()
        .filter(|o| ***o == SyncOutcome::Skipped)
        .count();
    assert_eq!((completed, skipped), (1, 1));
    assert_eq!(h.remote.pull_count(), 1);
}

#[tokio::test]
async fn status_reports_syncing_while_pass_runs() {
    let h = harness();
    h.remote.set_latency(Duration::from_millis(20));
    h.enable().await;
    let mut rx = h.engine.subscribe_status();

    let engine = h.engine.clone();
    let pass = tokio::spawn(async move { engine.trigger_sync(false).await });
    rx.wait_for(|s| s.is_syncing).await.unwrap();
    assert_eq!(h.engine.status().phase(), SyncPhase::Syncing);

    assert!(pass.await.unwrap().is_completed());
    assert_eq!(h.engine.status().phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn disable_during_pass_discards_its_result() {
    let h = harness();
    h.remote.set_latency(Duration::from_millis(20));
    h.enable().await;
    let mut rx = h.engine.subscribe_status();

    let engine = h.engine.clone();
    let pass = tokio::spawn(async move { engine.trigger_sync(false).await });
    rx.wait_for(|s| s.is_syncing).await.unwrap();
    h.engine.disable();
    pass.await.unwrap();

    let status = h.engine.status();
    assert_eq!(status.phase(), SyncPhase::Disabled);
    assert_eq!(status.last_sync, None);
    assert!(!status.is_syncing);
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    let h = harness();
    h.enable().await;
    h.clock.set(at(5_000));
    h.engine.trigger_sync(false).await;

    h.clock.set(at(1_000));
    let report = h.engine.trigger_sync(false).await.report().copied().unwrap();

    assert_eq!(report.watermark, at(5_000));
    assert_eq!(h.engine.status().last_sync, Some(at(5_000)));
}

#[tokio::test]
async fn watermark_is_per_user() {
    let h = harness();
    h.enable().await;
    h.clock.set(at(1_000));
    h.engine.trigger_sync(false).await;

    let other = UserId::new();
    h.engine.enable(Some(other)).await.unwrap();

    assert_eq!(h.engine.status().last_sync, None);
    assert_eq!(
        h.store.load_watermark(&h.user_id).unwrap().unwrap().last_sync,
        Some(at(1_000))
    );
    assert_eq!(
        h.store.load_watermark(&other).unwrap().unwrap().since(),
        Timestamp::EPOCH
    );
}
