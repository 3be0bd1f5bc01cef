//! # geo
//!
//! Great-circle math on WGS84 coordinates. Pure and stateless; callers must
//! pass finite coordinates.

use crowdtrack_types::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters.
pub fn distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` to `b`, degrees in [0, 360).
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

pub fn normalize_bearing(deg: f64) -> f64 {
    let b = deg.rem_euclid(360.0);
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// Smallest absolute difference between two bearings, handling the 0/360 wrap.
pub fn bearing_delta(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Distance from `p` to the segment `start`..`end`, meters.
///
/// Projects in a local equirectangular frame centred on the segment start,
/// which is accurate at city scale. The projection parameter is clamped to
/// [0, 1] so points beyond either end measure to the nearest endpoint.
pub fn distance_to_segment(p: GeoPoint, start: GeoPoint, end: GeoPoint) -> f64 {
    let cos_lat = start.lat.to_radians().cos();
    let to_xy = |q: GeoPoint| {
        (
            (q.lon - start.lon).to_radians() * cos_lat * EARTH_RADIUS_M,
            (q.lat - start.lat).to_radians() * EARTH_RADIUS_M,
        )
    };

    let (px, py) = to_xy(p);
    let (ex, ey) = to_xy(end);
    let len_sq = ex * ex + ey * ey;
    if len_sq <= f64::EPSILON {
        return distance(p, start);
    }

    let t = ((px * ex + py * ey) / len_sq).clamp(0.0, 1.0);
    if t <= 0.0 {
        return distance(p, start);
    }
    if t >= 1.0 {
        return distance(p, end);
    }
    let (cx, cy) = (t * ex, t * ey);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

/// Unweighted mean of a set of points. None when empty.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (lat, lon) = points
        .iter()
        .fold((0.0, 0.0), |(la, lo), p| (la + p.lat, lo + p.lon));
    Some(GeoPoint::new(lat / n, lon / n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn test_distance_same_point_zero() {
        let p = GeoPoint::new(9.03, 38.74);
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn test_bearing_cardinals() {
        let o = GeoPoint::new(9.0, 38.7);
        assert!(bearing(o, GeoPoint::new(9.1, 38.7)) < 0.01);
        assert!((bearing(o, GeoPoint::new(9.0, 38.8)) - 90.0).abs() < 0.1);
        assert!((bearing(o, GeoPoint::new(8.9, 38.7)) - 180.0).abs() < 0.01);
        assert!((bearing(o, GeoPoint::new(9.0, 38.6)) - 270.0).abs() < 0.1);
    }

    #[test]
    fn test_bearing_delta_wraps() {
        assert_eq!(bearing_delta(350.0, 10.0), 20.0);
        assert_eq!(bearing_delta(10.0, 350.0), 20.0);
        assert_eq!(bearing_delta(90.0, 270.0), 180.0);
    }

    #[test]
    fn test_segment_distance_perpendicular() {
        let a = GeoPoint::new(9.0, 38.70);
        let b = GeoPoint::new(9.0, 38.72);
        // ~111 m north of the segment midpoint
        let p = GeoPoint::new(9.001, 38.71);
        let d = distance_to_segment(p, a, b);
        assert!((d - 111.2).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_segment_distance_clamps_to_endpoint() {
        let a = GeoPoint::new(9.0, 38.70);
        let b = GeoPoint::new(9.0, 38.71);
        let beyond = GeoPoint::new(9.0, 38.73);
        let d = distance_to_segment(beyond, a, b);
        assert!((d - distance(beyond, b)).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_segment() {
        let a = GeoPoint::new(9.0, 38.7);
        let p = GeoPoint::new(9.001, 38.7);
        assert!((distance_to_segment(p, a, a) - distance(p, a)).abs() < 1e-9);
    }
}
