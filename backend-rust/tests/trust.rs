mod common;

use common::*;
use crowdtrack::store::TrustStore;

/// ~100 m north every 30 s (12 km/h).
const STEP_LAT: f64 = 0.0009;
/// ~300 m east of the line at this latitude.
const OFFSET_LON: f64 = 0.00273;

/// Two honest riders report alongside, then `rider` reports and its trust is
/// read back. Returns the trust after each of the rider's reports.
async fn ride(h: &Harness, rounds: std::ops::Range<i64>, rider_lon: f64, rider_acc: f64) -> Vec<f64> {
    let mut out = Vec::new();
    for k in rounds {
        let at = secs(30 * k);
        let lat = 9.0 + STEP_LAT * k as f64;
        h.engine
            .submit_report(&sub("honest-1", lat + 0.00003, ROUTE_LON, 5.0, at))
            .await
            .unwrap();
        h.engine
            .submit_report(&sub("honest-2", lat, ROUTE_LON + 0.00003, 5.0, at))
            .await
            .unwrap();
        h.engine
            .submit_report(&sub("rider", lat, rider_lon, rider_acc, at))
            .await
            .unwrap();
        out.push(h.trust_of("rider").await);
    }
    out
}

fn assert_bounded_steps(start: f64, trail: &[f64]) {
    let mut prev = start;
    for (i, t) in trail.iter().enumerate() {
        assert!(
            (t - prev).abs() <= 0.1 + 1e-9,
            "step {i} moved trust from {prev} to {t}"
        );
        assert!((0.0..=1.0).contains(t));
        prev = *t;
    }
}

#[tokio::test]
async fn test_good_then_bad_contributions() {
    let h = harness();
    let threshold = h.engine.config().trust.trusted_threshold;

    let good = ride(&h, 0..10, ROUTE_LON, 8.0).await;
    assert_bounded_steps(0.5, &good);
    let after_good = *good.last().unwrap();
    assert!(after_good >= 0.8, "trust after good run: {good:?}");
    assert!(after_good >= threshold);

    let rec = h.store.get_trust("rider").await.unwrap().unwrap();
    assert_eq!(rec.total_contributions, 10);
    assert_eq!(rec.accurate_contributions, 10);

    // Same bus, same times, but 300 m off and a 150 m fix.
    let bad = ride(&h, 10..20, ROUTE_LON + OFFSET_LON, 150.0).await;
    assert_bounded_steps(after_good, &bad);
    assert!(bad.windows(2).all(|w| w[1] <= w[0] + 1e-9), "not trending down: {bad:?}");
    assert!(*bad.last().unwrap() < 0.5, "trust after bad run: {bad:?}");

    let rec = h.store.get_trust("rider").await.unwrap().unwrap();
    assert_eq!(rec.total_contributions, 20);
    assert_eq!(rec.accurate_contributions, 10);
}

#[tokio::test]
async fn test_single_recalculation_is_bounded_from_any_start() {
    for start in [0.0, 0.3, 0.95, 1.0] {
        let h = harness();
        h.seed_trust("dev", start).await;
        h.engine
            .submit_report(&sub("dev", 9.0, ROUTE_LON, 5.0, t0()))
            .await
            .unwrap();
        let after = h.trust_of("dev").await;
        assert!((after - start).abs() <= 0.1 + 1e-9, "{start} -> {after}");
    }
}

#[tokio::test]
async fn test_trust_score_defaults_for_unknown_device() {
    let h = harness();
    assert_eq!(h.engine.trust_score("nobody").await.unwrap(), 0.5);
    assert!(h.engine.trust_record("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_recalculation_without_reports_keeps_step_bound() {
    let h = harness();
    h.seed_trust("idle", 0.9).await;
    let rec = h.engine.recalculate_trust_at("idle", t0()).await.unwrap();
    assert!((rec.trust_score - 0.9).abs() <= 0.1 + 1e-9);
    assert!(rec.last_recalculated.is_some());
}
