//! # route_gate
//!
//! Ordered-stop checks for one candidate point: nearest stop, progression
//! along the stop sequence, and corridor distance between consecutive stops.
//! Stops must already be ordered for the current direction.

use crowdtrack_types::{GeoPoint, RouteStop};

use crate::config::ValidationConfig;
use crate::geo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestStop {
    /// Index into the ordered stop slice
    pub index: usize,
    pub distance_m: f64,
    pub within_radius: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progression {
    /// Nearest-stop index never decreases
    Progressing,
    /// Nearest-stop index never increases and did decrease
    Backtracking,
    /// Too little history, or no monotone trend
    Inconclusive,
}

impl Progression {
    pub fn score(&self) -> f64 {
        match self {
            Self::Progressing => 1.0,
            Self::Inconclusive => 0.7,
            Self::Backtracking => 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorridorCheck {
    pub distance_m: f64,
    pub width_m: f64,
    pub within: bool,
    pub final_leg: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteAssessment {
    pub nearest: NearestStop,
    pub progression: Progression,
    pub corridor: CorridorCheck,
    pub stop_score: f64,
    pub corridor_score: f64,
}

#[derive(Debug, Clone)]
pub struct RouteGate {
    corridor_width_m: f64,
    final_leg_corridor_width_m: f64,
    stop_score_decay_m: f64,
}

impl RouteGate {
    pub fn new(cfg: &ValidationConfig) -> Self {
        Self {
            corridor_width_m: cfg.corridor_width_m,
            final_leg_corridor_width_m: cfg.final_leg_corridor_width_m,
            stop_score_decay_m: cfg.stop_score_decay_m.max(1.0),
        }
    }

    pub fn nearest_stop(&self, stops: &[RouteStop], p: GeoPoint) -> Option<NearestStop> {
        stops
            .iter()
            .enumerate()
            .map(|(index, s)| {
                let distance_m = geo::distance(p, s.position);
                NearestStop {
                    index,
                    distance_m,
                    within_radius: distance_m <= s.radius_m,
                }
            })
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }

    /// Trend of the nearest-stop index across `history` (oldest first)
    /// followed by `candidate`.
    pub fn progression(
        &self,
        stops: &[RouteStop],
        history: &[GeoPoint],
        candidate: GeoPoint,
    ) -> Progression {
        let mut indices: Vec<usize> = history
            .iter()
            .chain(std::iter::once(&candidate))
            .filter_map(|p| self.nearest_stop(stops, *p).map(|n| n.index))
            .collect();
        indices.dedup();
        if indices.len() < 2 {
            return Progression::Inconclusive;
        }
        if indices.windows(2).all(|w| w[1] > w[0]) {
            Progression::Progressing
        } else if indices.windows(2).all(|w| w[1] < w[0]) {
            Progression::Backtracking
        } else {
            Progression::Inconclusive
        }
    }

    /// Distance to the nearer of the two legs touching the nearest stop.
    pub fn corridor(&self, stops: &[RouteStop], p: GeoPoint) -> Option<CorridorCheck> {
        let nearest = self.nearest_stop(stops, p)?;
        if stops.len() == 1 {
            return Some(CorridorCheck {
                distance_m: nearest.distance_m,
                width_m: self.corridor_width_m,
                within: nearest.distance_m <= self.corridor_width_m,
                final_leg: true,
            });
        }

        let last_leg = stops.len() - 2;
        let i = nearest.index;
        let candidates = [i.checked_sub(1), (i + 1 < stops.len()).then_some(i)];
        let (leg, distance_m) = candidates
            .iter()
            .flatten()
            .map(|&leg| {
                let d = geo::distance_to_segment(p, stops[leg].position, stops[leg + 1].position);
                (leg, d)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        let final_leg = leg == last_leg;
        let width_m = if final_leg {
            self.final_leg_corridor_width_m
        } else {
            self.corridor_width_m
        };
        Some(CorridorCheck {
            distance_m,
            width_m,
            within: distance_m <= width_m,
            final_leg,
        })
    }

    /// None when `stops` is empty.
    pub fn assess(
        &self,
        stops: &[RouteStop],
        history: &[GeoPoint],
        candidate: GeoPoint,
    ) -> Option<RouteAssessment> {
        let nearest = self.nearest_stop(stops, candidate)?;
        let corridor = self.corridor(stops, candidate)?;
        let progression = self.progression(stops, history, candidate);

        let radius = stops[nearest.index].radius_m;
        let stop_score = if nearest.within_radius {
            1.0
        } else {
            (1.0 - (nearest.distance_m - radius) / self.stop_score_decay_m).clamp(0.0, 1.0)
        };
        let corridor_score = if corridor.within {
            1.0
        } else {
            (1.0 - (corridor.distance_m - corridor.width_m) / corridor.width_m.max(1.0))
                .clamp(0.0, 1.0)
                * 0.5
        };

        Some(RouteAssessment {
            nearest,
            progression,
            corridor,
            stop_score,
            corridor_score,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three stops ~1.1 km apart heading north along lon 38.75.
    pub(crate) fn line_stops() -> Vec<RouteStop> {
        ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, id)| RouteStop {
                stop_id: id.to_string(),
                name: id.to_string(),
                order: i as u32 + 1,
                position: GeoPoint::new(9.00 + i as f64 * 0.01, 38.75),
                radius_m: 50.0,
            })
            .collect()
    }

    fn gate() -> RouteGate {
        RouteGate::new(&ValidationConfig::default())
    }

    #[test]
    fn test_nearest_stop() {
        let n = gate()
            .nearest_stop(&line_stops(), GeoPoint::new(9.0102, 38.75))
            .unwrap();
        assert_eq!(n.index, 1);
        assert!(n.within_radius);
    }

    #[test]
    fn test_progression_directions() {
        let g = gate();
        let stops = line_stops();
        let a = GeoPoint::new(9.000, 38.75);
        let b = GeoPoint::new(9.010, 38.75);
        let c = GeoPoint::new(9.020, 38.75);
        assert_eq!(g.progression(&stops, &[a, b], c), Progression::Progressing);
        assert_eq!(g.progression(&stops, &[c, b], a), Progression::Backtracking);
        assert_eq!(g.progression(&stops, &[], a), Progression::Inconclusive);
        assert_eq!(g.progression(&stops, &[a, a], a), Progression::Inconclusive);
        assert_eq!(g.progression(&stops, &[a, c], b), Progression::Inconclusive);
    }

    #[test]
    fn test_corridor_between_stops() {
        let g = gate();
        let stops = line_stops();
        // ~110 m east of the A-B leg
        let near = GeoPoint::new(9.005, 38.751);
        let c = g.corridor(&stops, near).unwrap();
        assert!(c.within);
        assert!(!c.final_leg);

        // ~1.1 km east
        let far = GeoPoint::new(9.005, 38.76);
        assert!(!g.corridor(&stops, far).unwrap().within);
    }

    #[test]
    fn test_final_leg_is_narrower() {
        let g = gate();
        let stops = line_stops();
        // ~330 m east of the B-C leg: inside 500 m, outside 250 m
        let p = GeoPoint::new(9.015, 38.753);
        let c = g.corridor(&stops, p).unwrap();
        assert!(c.final_leg);
        assert_eq!(c.width_m, 250.0);
        assert!(!c.within);
    }

    #[test]
    fn test_assess_empty_stops() {
        assert!(gate().assess(&[], &[], GeoPoint::new(9.0, 38.75)).is_none());
    }
}
