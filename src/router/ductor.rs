use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_humanize::{Accuracy, HumanTime, Tense};
use log::{debug, info};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::algorithm::spherical::Spherical;
use crate::algorithm::Algorithm;
use crate::error::{Error, Result};
use crate::mesh::{MeshEdge, VertexId};
use crate::polar::{PointOfSail, Polar};
use crate::position::twa_of;
use crate::router::{
    difficulty_score, is_maneuver, is_tack, DifficultyLevel, Router, RouteResult, RouteSegment, RouteVariant,
    RouterConfig, TimeWindow,
};
use crate::utils::CancellationToken;
use crate::weather::{Conditions, WeatheredMesh};

/// Time-optimal router over a weathered mesh. Edge cost is the sailing time
/// the polar predicts for the forecast at the edge midpoint at the arrival
/// time at its tail, so the search is a plain Dijkstra with a cost oracle
/// over an immutable snapshot.
pub struct Ductor {
    config: RouterConfig,
}

#[async_trait]
impl Router for Ductor {
    async fn route(
        &self,
        weather: Arc<WeatheredMesh>,
        polar: Arc<Polar>,
        vessel: String,
        window: TimeWindow,
        cancel: CancellationToken,
    ) -> Result<RouteResult> {
        window.validate(&weather.horizon())?;

        let candidates = window.candidates();
        info!(
            "[ductor] routing {} departure candidates over {} control vertices",
            candidates.len(),
            weather.mesh().control_vertices().len()
        );

        let outcomes = Self::route_candidates(self.config, weather.clone(), polar, candidates, cancel).await;

        let mut variants = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(variant) => {
                    debug!(
                        "[ductor] candidate {} arrives {}",
                        variant.departure_time,
                        HumanTime::from(Duration::seconds((variant.total_time_h * 3600.0) as i64))
                            .to_text_en(Accuracy::Rough, Tense::Present)
                    );
                    variants.push(variant);
                }
                Err(e @ (Error::HorizonExceeded | Error::NoNavigablePath { .. })) => {
                    debug!("[ductor] candidate dropped: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        if variants.is_empty() {
            return Err(Error::AllCandidatesInfeasible);
        }

        variants.sort_by_key(|v| v.departure_time);
        let best_variant_index = variants
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_time_h.total_cmp(&b.1.total_time_h))
            .map(|(i, _)| i)
            .unwrap();
        variants[best_variant_index].is_best = true;
        let overall_difficulty = variants[best_variant_index].difficulty_level;

        Ok(RouteResult {
            meshed_area_id: weather.mesh().id,
            vessel_summary: vessel,
            variants,
            best_variant_index,
            overall_difficulty,
        })
    }
}

impl Ductor {
    pub fn new(config: RouterConfig) -> Self {
        Ductor { config }
    }

    #[cfg(feature = "rayon")]
    async fn route_candidates(
        config: RouterConfig,
        weather: Arc<WeatheredMesh>,
        polar: Arc<Polar>,
        candidates: Vec<DateTime<Utc>>,
        cancel: CancellationToken,
    ) -> Vec<Result<RouteVariant>> {
        let (send, recv) = tokio::sync::oneshot::channel();

        rayon::spawn(move || {
            let results = candidates
                .par_iter()
                .map(|departure| Self::run_candidate(&config, &weather, &polar, *departure, &cancel))
                .collect();

            let _ = send.send(results);
        });

        recv.await.expect("panic in rayon::spawn")
    }

    #[cfg(not(feature = "rayon"))]
    async fn route_candidates(
        config: RouterConfig,
        weather: Arc<WeatheredMesh>,
        polar: Arc<Polar>,
        candidates: Vec<DateTime<Utc>>,
        cancel: CancellationToken,
    ) -> Vec<Result<RouteVariant>> {
        candidates
            .iter()
            .map(|departure| Self::run_candidate(&config, &weather, &polar, *departure, &cancel))
            .collect()
    }

    /// Chains the per-leg searches through the control sequence, then
    /// replays the combined path into segments.
    fn run_candidate(
        config: &RouterConfig,
        weather: &WeatheredMesh,
        polar: &Polar,
        departure: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RouteVariant> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let controls = weather.mesh().control_vertices();

        let mut path = vec![controls[0]];
        let mut elapsed_s = 0.0;
        let mut entering_twa = None;

        for (leg, pair) in controls.windows(2).enumerate() {
            let search = LegSearch {
                config,
                weather,
                polar,
                departure,
                leg,
            };
            let outcome = search.run(pair[0], pair[1], elapsed_s, entering_twa, cancel)?;
            path.extend_from_slice(&outcome.path[1..]);
            elapsed_s = outcome.arrival_s;
            entering_twa = outcome.entering_twa;
        }

        Self::build_variant(config, weather, polar, departure, &path)
    }

    /// Walks the vertex chain again, re-sampling weather at each edge
    /// midpoint and start time. The replay runs the same pure cost oracle
    /// the search did, so the kinematics match the arrival times exactly.
    fn build_variant(
        config: &RouterConfig,
        weather: &WeatheredMesh,
        polar: &Polar,
        departure: DateTime<Utc>,
        path: &[VertexId],
    ) -> Result<RouteVariant> {
        let mesh = weather.mesh();
        let algorithm = Spherical {};

        let mut segments = Vec::with_capacity(path.len().saturating_sub(1));
        let mut elapsed_s = 0.0;
        let mut prev_twa: Option<f64> = None;
        let mut tacks = 0u32;
        let mut jibes = 0u32;

        for pair in path.windows(2) {
            let from = mesh.vertex(pair[0]);
            let to = mesh.vertex(pair[1]);
            let edge = mesh
                .edges_from(pair[0])
                .iter()
                .find(|e| e.to == pair[1])
                .expect("replayed path follows mesh edges");

            let t = departure + Duration::milliseconds((elapsed_s * 1000.0) as i64);
            let conditions = weather.sample(&algorithm.midpoint(&from.position, &to.position), t)?;
            let cost = edge_cost(config, polar, edge, &conditions);
            let (v_eff, sail_s) = match cost {
                Some(cost) => cost,
                None => {
                    return Err(Error::NoNavigablePath {
                        from: format!("{}", pair[0]),
                        to: format!("{}", pair[1]),
                    })
                }
            };

            let twa = twa_of(conditions.wind.direction_from, edge.bearing);
            if let Some(prev) = prev_twa {
                if is_maneuver(prev, twa) {
                    if is_tack(prev, twa) {
                        tacks += 1;
                        elapsed_s += polar.tack_duration_s();
                    } else {
                        jibes += 1;
                        elapsed_s += polar.jibe_duration_s();
                    }
                }
            }

            segments.push(RouteSegment {
                from: from.position,
                to: to.position,
                bearing: edge.bearing,
                distance_nm: edge.distance.nm(),
                time_s: sail_s,
                boat_speed_kt: v_eff,
                wind_speed_kt: conditions.wind.speed.kts(),
                wind_dir: conditions.wind.direction_from,
                twa,
                point_of_sail: PointOfSail::from_twa(twa),
                wave_height_m: conditions.wave_height_m,
            });

            elapsed_s += sail_s;
            prev_twa = Some(twa);
        }

        if segments.is_empty() {
            return Err(Error::NoNavigablePath {
                from: "start".into(),
                to: "finish".into(),
            });
        }

        let total_time_h = elapsed_s / 3600.0;
        let total_distance_nm: f64 = segments.iter().map(|s| s.distance_nm).sum();
        let avg_wind_kt =
            segments.iter().map(|s| s.wind_speed_kt * s.distance_nm).sum::<f64>() / total_distance_nm;
        let avg_wave_m =
            segments.iter().map(|s| s.wave_height_m * s.distance_nm).sum::<f64>() / total_distance_nm;
        let upwind_fraction =
            segments.iter().filter(|s| s.point_of_sail.is_upwind()).count() as f64 / segments.len() as f64;
        let score = difficulty_score(
            avg_wind_kt,
            avg_wave_m,
            (tacks + jibes) as f64 / total_distance_nm,
            upwind_fraction,
        );

        Ok(RouteVariant {
            departure_time: departure,
            total_time_h,
            total_distance_nm,
            avg_speed_kt: total_distance_nm / total_time_h,
            avg_wind_kt,
            avg_wave_m,
            tacks,
            jibes,
            difficulty_score: score,
            difficulty_level: DifficultyLevel::from_score(score),
            is_best: false,
            segments,
        })
    }
}

/// Effective speed and sailing seconds for an edge under given conditions,
/// or None when the edge is infeasible (storm reefed, in irons, becalmed).
fn edge_cost(config: &RouterConfig, polar: &Polar, edge: &MeshEdge, conditions: &Conditions) -> Option<(f64, f64)> {
    let tws = conditions.wind.speed.kts();
    if tws > polar.max_wind_kts() {
        return None;
    }

    let twa = twa_of(conditions.wind.direction_from, edge.bearing);
    let v = polar.boat_speed(twa, tws).kts();
    if v <= 0.0 {
        return None;
    }

    let derating = (conditions.wave_height_m / config.critical_wave_m).clamp(0.0, 0.5);
    let v_eff = v * (1.0 - derating);
    Some((v_eff, edge.distance.nm() / v_eff * 3600.0))
}

/// Search state key: vertex plus the side the wind is on, so a maneuver
/// penalty that depends on the entering TWA keeps optimal substructure.
type LabelKey = (u32, i8);

fn twa_sign(twa: f64) -> i8 {
    if twa > 0.0 {
        1
    } else if twa < 0.0 {
        -1
    } else {
        0
    }
}

struct Label {
    arrival_s: f64,
    maneuvers: u32,
    twa: Option<f64>,
    prev: Option<LabelKey>,
    from_vertex: u32,
}

struct HeapItem {
    arrival_s: f64,
    maneuvers: u32,
    from_vertex: u32,
    vertex: u32,
    sign: i8,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // BinaryHeap is a max-heap; invert so the earliest arrival pops first,
    // ties preferring fewer maneuvers, then the lower tail vertex id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .arrival_s
            .total_cmp(&self.arrival_s)
            .then(other.maneuvers.cmp(&self.maneuvers))
            .then(other.from_vertex.cmp(&self.from_vertex))
            .then(other.vertex.cmp(&self.vertex))
            .then(other.sign.cmp(&self.sign))
    }
}

struct LegSearch<'a> {
    config: &'a RouterConfig,
    weather: &'a WeatheredMesh,
    polar: &'a Polar,
    departure: DateTime<Utc>,
    leg: usize,
}

struct LegOutcome {
    path: Vec<VertexId>,
    arrival_s: f64,
    entering_twa: Option<f64>,
}

impl<'a> LegSearch<'a> {
    /// Time-dependent Dijkstra from `from` to `to`, starting the clock at
    /// `elapsed_s` after departure.
    fn run(
        &self,
        from: VertexId,
        to: VertexId,
        elapsed_s: f64,
        entering_twa: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<LegOutcome> {
        let mesh = self.weather.mesh();
        let algorithm = Spherical {};

        let mut labels: HashMap<LabelKey, Label> = HashMap::new();
        let mut heap = BinaryHeap::new();
        let mut horizon_hit = false;
        let mut expansions: u32 = 0;

        let start_key = (from.0, entering_twa.map(twa_sign).unwrap_or(0));
        labels.insert(
            start_key,
            Label {
                arrival_s: elapsed_s,
                maneuvers: 0,
                twa: entering_twa,
                prev: None,
                from_vertex: from.0,
            },
        );
        heap.push(HeapItem {
            arrival_s: elapsed_s,
            maneuvers: 0,
            from_vertex: from.0,
            vertex: from.0,
            sign: start_key.1,
        });

        while let Some(item) = heap.pop() {
            let key = (item.vertex, item.sign);
            let (arrival_s, maneuvers, twa) = match labels.get(&key) {
                Some(label) if label.arrival_s == item.arrival_s => (label.arrival_s, label.maneuvers, label.twa),
                _ => continue, // stale heap entry
            };

            if item.vertex == to.0 {
                return Ok(self.reconstruct(&labels, key));
            }

            for edge in mesh.edges_from(VertexId(item.vertex)) {
                expansions += 1;
                if expansions % self.config.cancel_check_interval == 0 && cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let tail = &mesh.vertex(VertexId(item.vertex)).position;
                let head = &mesh.vertex(edge.to).position;
                let t = self.departure + Duration::milliseconds((arrival_s * 1000.0) as i64);
                let conditions = match self.weather.sample(&algorithm.midpoint(tail, head), t) {
                    Ok(c) => c,
                    Err(Error::OutOfHorizon { .. }) => {
                        horizon_hit = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let (_, sail_s) = match edge_cost(self.config, self.polar, edge, &conditions) {
                    Some(cost) => cost,
                    None => continue,
                };

                let new_twa = twa_of(conditions.wind.direction_from, edge.bearing);
                let mut penalty_s = 0.0;
                let mut new_maneuvers = maneuvers;
                if let Some(prev) = twa {
                    if is_maneuver(prev, new_twa) {
                        penalty_s = if is_tack(prev, new_twa) {
                            self.polar.tack_duration_s()
                        } else {
                            self.polar.jibe_duration_s()
                        };
                        new_maneuvers += 1;
                    }
                }

                let new_arrival = arrival_s + sail_s + penalty_s;
                let new_key = (edge.to.0, twa_sign(new_twa));

                let better = match labels.get(&new_key) {
                    None => true,
                    Some(existing) => {
                        new_arrival < existing.arrival_s
                            || (new_arrival == existing.arrival_s
                                && (new_maneuvers < existing.maneuvers
                                    || (new_maneuvers == existing.maneuvers
                                        && item.vertex < existing.from_vertex)))
                    }
                };
                if better {
                    labels.insert(
                        new_key,
                        Label {
                            arrival_s: new_arrival,
                            maneuvers: new_maneuvers,
                            twa: Some(new_twa),
                            prev: Some(key),
                            from_vertex: item.vertex,
                        },
                    );
                    heap.push(HeapItem {
                        arrival_s: new_arrival,
                        maneuvers: new_maneuvers,
                        from_vertex: item.vertex,
                        vertex: new_key.0,
                        sign: new_key.1,
                    });
                }
            }
        }

        debug!(
            "[ductor] leg {} unreachable after {} expansions (horizon hit: {})",
            self.leg, expansions, horizon_hit
        );
        if horizon_hit {
            Err(Error::HorizonExceeded)
        } else {
            Err(Error::NoNavigablePath {
                from: format!("control {}", self.leg),
                to: format!("control {}", self.leg + 1),
            })
        }
    }

    fn reconstruct(&self, labels: &HashMap<LabelKey, Label>, target: LabelKey) -> LegOutcome {
        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(key) = cursor {
            path.push(VertexId(key.0));
            cursor = labels[&key].prev;
        }
        path.reverse();

        let label = &labels[&target];
        LegOutcome {
            path,
            arrival_s: label.arrival_s,
            entering_twa: label.twa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_orders_by_arrival_then_maneuvers_then_tail() {
        let mut heap = BinaryHeap::new();
        heap.push(HeapItem {
            arrival_s: 20.0,
            maneuvers: 0,
            from_vertex: 0,
            vertex: 1,
            sign: 1,
        });
        heap.push(HeapItem {
            arrival_s: 10.0,
            maneuvers: 3,
            from_vertex: 5,
            vertex: 2,
            sign: 1,
        });
        heap.push(HeapItem {
            arrival_s: 10.0,
            maneuvers: 1,
            from_vertex: 9,
            vertex: 3,
            sign: 1,
        });
        heap.push(HeapItem {
            arrival_s: 10.0,
            maneuvers: 1,
            from_vertex: 2,
            vertex: 4,
            sign: 1,
        });

        // Same arrival: fewer maneuvers first, then lower tail id.
        assert_eq!(heap.pop().unwrap().vertex, 4);
        assert_eq!(heap.pop().unwrap().vertex, 3);
        assert_eq!(heap.pop().unwrap().vertex, 2);
        assert_eq!(heap.pop().unwrap().vertex, 1);
    }

    #[test]
    fn twa_sign_buckets() {
        assert_eq!(twa_sign(45.0), 1);
        assert_eq!(twa_sign(-45.0), -1);
        assert_eq!(twa_sign(0.0), 0);
    }
}
