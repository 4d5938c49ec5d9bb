use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mesh::MeshedAreaId;
use crate::polar::{PointOfSail, Polar};
use crate::position::Coords;
use crate::utils::CancellationToken;
use crate::weather::{Horizon, WeatheredMesh};

pub(crate) mod ductor;

pub use ductor::Ductor;

/// Sign flips with both sides closer to the wind axis than this are numeric
/// noise, not maneuvers.
pub(crate) const MANEUVER_NOISE_TWA_DEG: f64 = 5.0;

/// A TWA sign change counts as a maneuver when at least one side is clearly
/// off the axis.
pub(crate) fn is_maneuver(prev_twa: f64, new_twa: f64) -> bool {
    prev_twa * new_twa < 0.0 && (prev_twa.abs() >= MANEUVER_NOISE_TWA_DEG || new_twa.abs() >= MANEUVER_NOISE_TWA_DEG)
}

/// Bow through the wind when the flip happens near the wind axis, stern
/// through it otherwise.
pub(crate) fn is_tack(prev_twa: f64, new_twa: f64) -> bool {
    prev_twa.abs().min(new_twa.abs()) < 90.0
}

#[async_trait]
pub trait Router {
    async fn route(
        &self,
        weather: Arc<WeatheredMesh>,
        polar: Arc<Polar>,
        vessel: String,
        window: TimeWindow,
        cancel: CancellationToken,
    ) -> Result<RouteResult>;
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub num_checks: u32,
}

impl TimeWindow {
    pub fn validate(&self, horizon: &Horizon) -> Result<()> {
        if !(1..=24).contains(&self.num_checks) {
            return Err(Error::InvalidInput(format!(
                "num_checks {} outside [1, 24]",
                self.num_checks
            )));
        }
        if self.start_time > self.end_time {
            return Err(Error::InvalidInput(format!(
                "window ends before it starts ({} > {})",
                self.start_time, self.end_time
            )));
        }
        if !horizon.contains(self.start_time) || !horizon.contains(self.end_time) {
            return Err(Error::InvalidInput(format!(
                "window [{}, {}] outside the weather horizon [{}, {}]",
                self.start_time, self.end_time, horizon.from, horizon.to
            )));
        }
        Ok(())
    }

    /// Departure instants: `start` alone, or `num_checks` spread uniformly
    /// across the window inclusive of both ends.
    pub(crate) fn candidates(&self) -> Vec<DateTime<Utc>> {
        if self.num_checks == 1 {
            return vec![self.start_time];
        }
        let span_ms = (self.end_time - self.start_time).num_milliseconds();
        (0..self.num_checks)
            .map(|i| {
                let offset = span_ms * i as i64 / (self.num_checks - 1) as i64;
                self.start_time + Duration::milliseconds(offset)
            })
            .collect()
    }
}

/// Routing knobs a deployment can tune; the wave derating threshold is part
/// of the model and deliberately not buried in the engine.
#[derive(Clone, Copy, Debug)]
pub struct RouterConfig {
    /// Wave height at which the sea state penalty saturates (50% derating).
    pub critical_wave_m: f64,
    /// Node expansions between cancellation checks.
    pub cancel_check_interval: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            critical_wave_m: 4.0,
            cancel_check_interval: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub from: Coords,
    pub to: Coords,
    pub bearing: f64,
    pub distance_nm: f64,
    pub time_s: f64,
    /// Effective speed over the segment (wave derating folded in), so
    /// `time_s == distance_nm / boat_speed_kt * 3600`.
    pub boat_speed_kt: f64,
    pub wind_speed_kt: f64,
    pub wind_dir: f64,
    pub twa: f64,
    pub point_of_sail: PointOfSail,
    pub wave_height_m: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteVariant {
    pub departure_time: DateTime<Utc>,
    pub segments: Vec<RouteSegment>,
    pub total_time_h: f64,
    pub total_distance_nm: f64,
    pub avg_speed_kt: f64,
    pub avg_wind_kt: f64,
    pub avg_wave_m: f64,
    pub tacks: u32,
    pub jibes: u32,
    pub difficulty_score: f64,
    pub difficulty_level: DifficultyLevel,
    pub is_best: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub meshed_area_id: MeshedAreaId,
    pub vessel_summary: String,
    pub variants: Vec<RouteVariant>,
    pub best_variant_index: usize,
    pub overall_difficulty: DifficultyLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifficultyLevel {
    Easy,
    Moderate,
    Challenging,
    Difficult,
    Extreme,
}

impl DifficultyLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 20.0 {
            DifficultyLevel::Easy
        } else if score < 40.0 {
            DifficultyLevel::Moderate
        } else if score < 60.0 {
            DifficultyLevel::Challenging
        } else if score < 80.0 {
            DifficultyLevel::Difficult
        } else {
            DifficultyLevel::Extreme
        }
    }
}

const WIND_WEIGHT: f64 = 35.0;
const WIND_SATURATION_KT: f64 = 40.0;
const WAVE_WEIGHT: f64 = 25.0;
const WAVE_SATURATION_M: f64 = 5.0;
const MANEUVER_WEIGHT: f64 = 20.0;
const MANEUVER_SATURATION_PER_NM: f64 = 1.0;
const UPWIND_WEIGHT: f64 = 20.0;

/// Fixed-weight crew workload estimate in [0, 100].
pub(crate) fn difficulty_score(
    avg_wind_kt: f64,
    avg_wave_m: f64,
    maneuvers_per_nm: f64,
    upwind_fraction: f64,
) -> f64 {
    let wind = (avg_wind_kt / WIND_SATURATION_KT).clamp(0.0, 1.0) * WIND_WEIGHT;
    let wave = (avg_wave_m / WAVE_SATURATION_M).clamp(0.0, 1.0) * WAVE_WEIGHT;
    let maneuvers = (maneuvers_per_nm / MANEUVER_SATURATION_PER_NM).clamp(0.0, 1.0) * MANEUVER_WEIGHT;
    let upwind = upwind_fraction.clamp(0.0, 1.0) * UPWIND_WEIGHT;

    (wind + wave + maneuvers + upwind).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_check_departs_at_start() {
        let start = Utc::now();
        let window = TimeWindow {
            start_time: start,
            end_time: start + Duration::hours(6),
            num_checks: 1,
        };
        assert_eq!(window.candidates(), vec![start]);
    }

    #[test]
    fn candidates_are_uniform_and_inclusive() {
        let start = Utc::now();
        let end = start + Duration::hours(6);
        let window = TimeWindow {
            start_time: start,
            end_time: end,
            num_checks: 4,
        };
        let candidates = window.candidates();
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[0], start);
        assert_eq!(candidates[3], end);
        assert_eq!(candidates[1] - candidates[0], Duration::hours(2));
        assert_eq!(candidates[2] - candidates[1], Duration::hours(2));
    }

    #[test]
    fn window_validation() {
        let start = Utc::now();
        let horizon = Horizon {
            from: start,
            to: start + Duration::hours(12),
        };
        let bad_checks = TimeWindow {
            start_time: start,
            end_time: start + Duration::hours(1),
            num_checks: 25,
        };
        assert!(bad_checks.validate(&horizon).is_err());

        let outside = TimeWindow {
            start_time: start,
            end_time: start + Duration::hours(13),
            num_checks: 2,
        };
        assert!(outside.validate(&horizon).is_err());

        let fine = TimeWindow {
            start_time: start,
            end_time: start + Duration::hours(6),
            num_checks: 4,
        };
        assert!(fine.validate(&horizon).is_ok());
    }

    #[test]
    fn maneuver_classification() {
        // Clean tack through the wind.
        assert!(is_maneuver(-40.0, 42.0));
        assert!(is_tack(-40.0, 42.0));
        // Jibe through the stern.
        assert!(is_maneuver(170.0, -165.0));
        assert!(!is_tack(170.0, -165.0));
        // One side inside the noise floor still counts.
        assert!(is_maneuver(-2.0, 30.0));
        // Both sides inside the noise floor: ignored.
        assert!(!is_maneuver(-2.0, 3.0));
        // Same side: no maneuver.
        assert!(!is_maneuver(40.0, 80.0));
    }

    #[test]
    fn difficulty_buckets() {
        assert_eq!(DifficultyLevel::from_score(0.0), DifficultyLevel::Easy);
        assert_eq!(DifficultyLevel::from_score(19.9), DifficultyLevel::Easy);
        assert_eq!(DifficultyLevel::from_score(20.0), DifficultyLevel::Moderate);
        assert_eq!(DifficultyLevel::from_score(59.9), DifficultyLevel::Challenging);
        assert_eq!(DifficultyLevel::from_score(80.0), DifficultyLevel::Extreme);

        // Saturated everything caps at 100.
        assert_eq!(difficulty_score(100.0, 10.0, 5.0, 1.0), 100.0);
        assert!(difficulty_score(10.0, 0.5, 0.01, 0.0) < 20.0);
    }
}
