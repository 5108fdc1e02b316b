use std::sync::Arc;

use super::*;
use crate::{
    session::{DashboardSession, SessionConfig},
    store::{MemoryStore, SharedStore},
};
use shared::domain::{ControlsRecord, CONTROLS_ID};

fn session(store: &MemoryStore) -> Arc<DashboardSession> {
    DashboardSession::new(Arc::new(store.clone()), SessionConfig::default())
}

#[tokio::test]
async fn color_channels_are_dispatched_red_green_blue() {
    let store = MemoryStore::new();
    let session = session(&store);

    let outcome = session
        .set_color(Rgb::new(255, 128, 0))
        .await
        .expect("valid color");
    assert!(outcome.is_complete());

    let dispatched: Vec<ControlField> = store
        .attempted_upserts()
        .await
        .iter()
        .flat_map(|patch| patch.entries().into_iter().map(|(field, _)| field))
        .collect();
    assert_eq!(
        dispatched,
        vec![ControlField::RgbR, ControlField::RgbG, ControlField::RgbB]
    );
    assert_eq!(
        store.controls(CONTROLS_ID).await.expect("record").rgb(),
        Rgb::new(255, 128, 0)
    );
}

#[tokio::test]
async fn failed_channel_is_reported_without_undoing_the_others() {
    let store = MemoryStore::new();
    let session = session(&store);
    store.fail_writes_for(ControlField::RgbB).await;

    let outcome = session
        .set_color(Rgb::new(10, 20, 30))
        .await
        .expect("valid color");
    assert!(!outcome.is_complete());
    assert_eq!(outcome.failed_fields(), vec![ControlField::RgbB]);
    assert_eq!(
        outcome.summary().confirmed,
        vec![ControlField::RgbR, ControlField::RgbG]
    );

    // Local view keeps all three, the store only got two.
    assert_eq!(session.display_state().controls.rgb(), Rgb::new(10, 20, 30));
    let stored = store.controls(CONTROLS_ID).await.expect("record");
    assert_eq!((stored.rgb_r, stored.rgb_g, stored.rgb_b), (10, 20, 0));
}

#[tokio::test]
async fn half_written_color_is_visible_to_other_readers() {
    let store = MemoryStore::with_controls(ControlsRecord::default());
    let writer = session(&store);
    let observer = session(&store);
    store.hold_writes_for(ControlField::RgbB);

    let pending = {
        let writer = Arc::clone(&writer);
        tokio::spawn(async move { writer.set_color(Rgb::new(1, 2, 3)).await })
    };
    while store.landed_upserts().await.len() < 2 {
        tokio::task::yield_now().await;
    }

    // The writer keeps its whole color; another session sees a mix.
    writer.poll_once().await;
    assert_eq!(writer.display_state().controls.rgb(), Rgb::new(1, 2, 3));
    observer.poll_once().await;
    assert_eq!(observer.display_state().controls.rgb(), Rgb::new(1, 2, 0));

    store.release(ControlField::RgbB);
    let outcome = pending.await.expect("join").expect("valid color");
    assert!(outcome.is_complete());
    observer.poll_once().await;
    assert_eq!(observer.display_state().controls.rgb(), Rgb::new(1, 2, 3));
}

#[tokio::test]
async fn timer_is_validated_as_a_whole() {
    let store = MemoryStore::new();
    let session = session(&store);

    let err = session.set_timer(5, 75).await.expect_err("minutes out of range");
    assert!(matches!(
        err,
        ValidationError::OutOfRange {
            field: ControlField::TimerMinutes,
            ..
        }
    ));
    assert_eq!(session.display_state().controls.timer_hours, 0);
    assert!(store.attempted_upserts().await.is_empty());

    let outcome = session.set_timer(1, 45).await.expect("valid timer");
    assert!(outcome.is_complete());
    let record = store
        .read_controls(CONTROLS_ID)
        .await
        .expect("read")
        .expect("record");
    assert_eq!(record.timer().to_string(), "1:45");
}
