use super::*;
use chrono::TimeZone;
use shared::domain::{ReadingId, CONTROLS_ID};

fn reading(id: i64, temperature: f64, micros: i64) -> SensorReading {
    SensorReading {
        id: ReadingId(id),
        temperature,
        humidity: 40.0,
        light: 300,
        created_at: Utc.timestamp_micros(micros).single().expect("timestamp"),
    }
}

fn fetched(cache: &ControlCache, record: ControlsRecord) -> FetchedControls {
    FetchedControls {
        mark: cache.mark(),
        record,
    }
}

#[test]
fn fetch_overwrites_fields_without_local_writes() {
    let mut cache = ControlCache::default();
    let remote = ControlsRecord {
        led1: 120,
        buzzer: true,
        ..ControlsRecord::default()
    };
    let report = cache.reconcile(&fetched(&cache, remote.clone()));
    assert_eq!(cache.controls(), &remote);
    assert_eq!(report.updated, vec![ControlField::Led1, ControlField::Buzzer]);
    assert!(report.kept_local.is_empty());
}

#[test]
fn in_flight_field_survives_a_fetch() {
    let mut cache = ControlCache::default();
    cache
        .apply_local(ControlField::TimerHours, ControlValue::Int(2))
        .expect("apply");

    let report = cache.reconcile(&fetched(&cache, ControlsRecord::default()));
    assert_eq!(cache.controls().timer_hours, 2);
    assert_eq!(report.kept_local, vec![ControlField::TimerHours]);
    assert_eq!(cache.display_state().pending, vec![ControlField::TimerHours]);
}

#[test]
fn fetch_issued_before_a_write_cannot_undo_it() {
    let mut cache = ControlCache::default();
    let mark = cache.mark();
    cache
        .apply_local(ControlField::Led2, ControlValue::Int(90))
        .expect("apply");
    cache.finish_write(ControlField::Led2);

    // The read started before the write and returns the old value.
    cache.reconcile(&FetchedControls {
        mark,
        record: ControlsRecord::default(),
    });
    assert_eq!(cache.controls().led2, 90);

    // A later read is authoritative again.
    cache.reconcile(&fetched(&cache, ControlsRecord::default()));
    assert_eq!(cache.controls().led2, 0);
}

#[test]
fn fetch_issued_during_an_upsert_cannot_undo_it_after_it_settles() {
    let mut cache = ControlCache::default();
    cache
        .apply_local(ControlField::Led1, ControlValue::Int(200))
        .expect("apply");
    let mark = cache.mark();
    cache.finish_write(ControlField::Led1);
    assert!(cache.is_pending(ControlField::Led1, mark));

    let report = cache.reconcile(&FetchedControls {
        mark,
        record: ControlsRecord::default(),
    });
    assert_eq!(report.kept_local, vec![ControlField::Led1]);
    assert_eq!(cache.controls().led1, 200);
    assert!(!cache.is_pending(ControlField::Led1, cache.mark()));
}

#[test]
fn settled_write_is_overwritten_by_another_writer() {
    let mut cache = ControlCache::default();
    cache
        .apply_local(ControlField::TimerHours, ControlValue::Int(2))
        .expect("apply");
    cache.finish_write(ControlField::TimerHours);
    assert!(!cache.is_in_flight(ControlField::TimerHours));

    let confirmed = ControlsRecord {
        timer_hours: 2,
        ..ControlsRecord::default()
    };
    let report = cache.reconcile(&fetched(&cache, confirmed));
    assert!(report.is_noop());
    assert_eq!(cache.controls().timer().to_string(), "2:30");

    cache.reconcile(&fetched(&cache, ControlsRecord::default()));
    assert_eq!(cache.controls().timer_hours, 0);
}

#[test]
fn merge_leaves_the_input_cache_untouched() {
    let cache = ControlCache::default();
    let remote = ControlsRecord {
        strip: true,
        ..ControlsRecord::default()
    };
    let (next, report) = merge(&cache, &fetched(&cache, remote));
    assert!(!cache.controls().strip);
    assert!(next.controls().strip);
    assert_eq!(report.updated, vec![ControlField::Strip]);
}

#[test]
fn overlapping_writes_stay_pending_until_the_last_one_settles() {
    let mut cache = ControlCache::default();
    cache
        .apply_local(ControlField::Buzzer, ControlValue::Flag(true))
        .expect("apply");
    cache
        .apply_local(ControlField::Buzzer, ControlValue::Flag(false))
        .expect("apply");
    cache.finish_write(ControlField::Buzzer);
    assert!(cache.is_in_flight(ControlField::Buzzer));
    cache.finish_write(ControlField::Buzzer);
    assert!(!cache.is_in_flight(ControlField::Buzzer));
}

#[test]
fn grouped_apply_is_all_or_nothing() {
    let mut cache = ControlCache::default();
    let err = cache
        .apply_local_all(&[
            (ControlField::TimerHours, ControlValue::Int(5)),
            (ControlField::TimerMinutes, ControlValue::Int(75)),
        ])
        .expect_err("minutes out of range");
    assert!(matches!(err, ValidationError::OutOfRange { .. }));
    assert_eq!(cache.controls(), &ControlsRecord::default());
    assert!(cache.pending_fields().is_empty());

    let seqs = cache
        .apply_local_all(&[
            (ControlField::RgbR, ControlValue::Int(1)),
            (ControlField::RgbG, ControlValue::Int(2)),
            (ControlField::RgbB, ControlValue::Int(3)),
        ])
        .expect("apply");
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(cache.controls().rgb().to_string(), "#010203");
}

#[test]
fn sensor_view_only_moves_forward() {
    let mut cache = ControlCache::default();
    assert!(cache.replace_sensors(reading(2, 22.0, 2_000)));
    assert!(!cache.replace_sensors(reading(1, 19.0, 1_000)));
    assert_eq!(cache.sensors().map(|r| r.temperature), Some(22.0));
    assert!(cache.replace_sensors(reading(3, 23.0, 3_000)));
    assert_eq!(cache.sensors().map(|r| r.id), Some(ReadingId(3)));
}

#[test]
fn display_state_tracks_staleness() {
    let mut cache = ControlCache::new(ControlsRecord {
        id: CONTROLS_ID,
        ..ControlsRecord::default()
    });
    assert!(cache.display_state().stale);

    cache.record_sync_success(Utc::now());
    assert!(!cache.display_state().stale);

    assert_eq!(cache.record_sync_failure("offline".into()), 1);
    assert_eq!(cache.record_sync_failure("offline".into()), 2);
    let state = cache.display_state();
    assert!(state.stale);
    assert_eq!(state.consecutive_failures, 2);
    assert_eq!(state.last_error.as_deref(), Some("offline"));

    cache.record_sync_success(Utc::now());
    let state = cache.display_state();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());
}
