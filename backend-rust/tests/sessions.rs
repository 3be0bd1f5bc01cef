mod common;

use chrono::Duration;
use common::*;
use crowdtrack::TrackingError;
use crowdtrack_types::SessionEndReason;
use uuid::Uuid;

#[tokio::test]
async fn test_new_session_supersedes_previous() {
    let h = harness();
    let first = h.engine.start_session_at("rider", BUS, t0()).await.unwrap();
    let second = h.engine.start_session_at("rider", "bus-2", secs(60)).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    let old = h.engine.sessions().get(first.session_id).await.unwrap().unwrap();
    assert!(!old.is_active);
    assert_eq!(old.end_reason, Some(SessionEndReason::Superseded));

    let active: Vec<_> = h
        .store
        .all_sessions()
        .await
        .into_iter()
        .filter(|s| s.is_active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].vehicle_id, "bus-2");
}

#[tokio::test]
async fn test_session_records_trust_at_start() {
    let h = harness();
    h.seed_trust("veteran", 0.85).await;
    let s = h.engine.start_session_at("veteran", BUS, t0()).await.unwrap();
    assert!((s.trust_at_start - 0.85).abs() < 1e-9);

    let fresh = h.engine.start_session_at("newcomer", BUS, t0()).await.unwrap();
    assert!((fresh.trust_at_start - crowdtrack_types::DEFAULT_TRUST).abs() < 1e-9);
}

#[tokio::test]
async fn test_end_session_and_unknown_id() {
    let h = harness();
    let s = h.engine.start_session_at("rider", BUS, t0()).await.unwrap();
    let ended = h.engine.end_session_at(s.session_id, secs(120)).await.unwrap();
    assert!(!ended.is_active);
    assert_eq!(ended.end_reason, Some(SessionEndReason::Stopped));
    assert_eq!(ended.ended_at, Some(secs(120)));

    let err = h
        .engine
        .end_session_at(Uuid::new_v4(), secs(120))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_blank_session_ids_rejected() {
    let h = harness();
    let err = h.engine.start_session_at(" ", BUS, t0()).await.unwrap_err();
    assert!(matches!(err, TrackingError::InvalidInput(_)));
}

#[tokio::test]
async fn test_reports_update_session_counters() {
    let h = harness();
    let s = h.engine.start_session_at("rider", BUS, t0()).await.unwrap();

    h.engine
        .submit_report(&sub("rider", 9.0, ROUTE_LON, 8.0, t0()))
        .await
        .unwrap();
    h.engine
        .submit_report(&sub("rider", 9.0009, ROUTE_LON, 12.0, secs(30)))
        .await
        .unwrap();

    let live = h.engine.sessions().get(s.session_id).await.unwrap().unwrap();
    assert!(live.is_active);
    assert_eq!(live.locations_contributed, 2);
    assert_eq!(live.valid_locations, 2);
    assert!((live.average_accuracy_m - 10.0).abs() < 1e-9);
    assert_eq!(live.last_activity, secs(30));
}

#[tokio::test]
async fn test_reaper_ends_only_idle_sessions() {
    let h = harness();
    let idle = h.engine.start_session_at("idle", BUS, t0()).await.unwrap();
    let busy = h.engine.start_session_at("busy", BUS, t0()).await.unwrap();
    h.engine
        .submit_report(&sub("busy", 9.0, ROUTE_LON, 8.0, secs(600)))
        .await
        .unwrap();

    // 16 minutes after start: idle has been quiet past the timeout, busy has not.
    let reaped = h
        .engine
        .reap_sessions_at(t0() + Duration::minutes(16))
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let idle = h.engine.sessions().get(idle.session_id).await.unwrap().unwrap();
    assert_eq!(idle.end_reason, Some(SessionEndReason::InactivityTimeout));
    let busy = h.engine.sessions().get(busy.session_id).await.unwrap().unwrap();
    assert!(busy.is_active);

    // Nothing left to reap on a second pass.
    assert_eq!(
        h.engine
            .reap_sessions_at(t0() + Duration::minutes(17))
            .await
            .unwrap(),
        0
    );
}
