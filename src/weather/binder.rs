use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::algorithm::spherical::Spherical;
use crate::algorithm::{Algorithm, METERS_PER_DEG};
use crate::error::{Error, Result};
use crate::mesh::MeshedArea;
use crate::position::Coords;
use crate::utils::CancellationToken;
use crate::weather::{CentroidSeries, Horizon, WeatherPort, WeatherSample, WeatheredMesh, Wind};

const KMEANS_SEED: u64 = 0x6e61_7563;
const KMEANS_ROUNDS: usize = 25;
const RETRY_BACKOFF: StdDuration = StdDuration::from_millis(500);

/// Chooses bounded sampling locations over a mesh, pulls forecasts through
/// the weather port and attaches them to the vertices.
pub struct WeatherBinder<'a> {
    mesh: Arc<MeshedArea>,
    port: &'a dyn WeatherPort,
}

impl<'a> WeatherBinder<'a> {
    pub fn new(mesh: Arc<MeshedArea>, port: &'a dyn WeatherPort) -> Self {
        WeatherBinder { mesh, port }
    }

    pub async fn bind(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<WeatheredMesh> {
        if from > to {
            return Err(Error::InvalidInput(format!("weather horizon ends before it starts ({from} > {to})")));
        }

        let centroids = self.choose_centroids();
        info!("binding weather over {} centroids for [{from}, {to}]", centroids.len());

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let samples = match self.fetch_all(&centroids, from, to).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!("weather fetch failed, retrying once: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                self.fetch_all(&centroids, from, to).await.map_err(Error::from_weather_port)?
            }
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.attach(centroids, samples, from, to)
    }

    /// Regular grid at the configured spacing, clipped to the convex hull
    /// of the navigable mesh, reduced by k-means when over budget.
    fn choose_centroids(&self) -> Vec<Coords> {
        let bb = &self.mesh.bounding_box;
        let params = &self.mesh.params;

        let dlat = params.weather_grid_km * 1000.0 / METERS_PER_DEG;
        let dlon = dlat / bb.mid_lat().to_radians().cos().max(0.05);

        let hull = convex_hull(
            self.mesh
                .vertices()
                .iter()
                .filter(|v| v.is_navigable)
                .map(|v| v.position),
        );

        let mut grid = Vec::new();
        let mut lat = bb.min_lat + dlat / 2.0;
        while lat <= bb.max_lat {
            let mut lon = bb.min_lon + dlon / 2.0;
            while lon <= bb.max_lon {
                let p = Coords::new(lat, lon);
                if hull.len() < 3 || hull_contains(&hull, &p) {
                    grid.push(p);
                }
                lon += dlon;
            }
            lat += dlat;
        }

        if grid.is_empty() {
            // Degenerate region, fall back to the navigable centroid.
            let mut lat = 0.0;
            let mut lon = 0.0;
            let mut n: f64 = 0.0;
            for v in self.mesh.vertices().iter().filter(|v| v.is_navigable) {
                lat += v.position.lat;
                lon += v.position.lon;
                n += 1.0;
            }
            grid.push(Coords::new(lat / n.max(1.0), lon / n.max(1.0)));
        }

        if grid.len() > params.max_weather_points {
            debug!("reducing {} centroids to {} by k-means", grid.len(), params.max_weather_points);
            kmeans(&grid, params.max_weather_points)
        } else {
            grid
        }
    }

    async fn fetch_all(
        &self,
        centroids: &[Coords],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<WeatherSample>> {
        let mut stream = self.port.fetch(centroids.to_vec(), from, to).await?;
        let mut samples = Vec::new();
        while let Some(sample) = stream.next().await {
            samples.push(sample?);
        }
        Ok(samples)
    }

    fn attach(
        &self,
        centroids: Vec<Coords>,
        samples: Vec<WeatherSample>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<WeatheredMesh> {
        let algorithm = Spherical {};
        let match_radius_m = self.mesh.params.weather_grid_km * 1000.0 / 2.0;

        // Shared valid-time schedule across all centroids.
        let mut valid_times: Vec<DateTime<Utc>> = samples
            .iter()
            .filter(|s| from <= s.valid_time && s.valid_time <= to)
            .map(|s| s.valid_time)
            .collect();
        valid_times.sort();
        valid_times.dedup();
        if valid_times.is_empty() {
            return Err(Error::WeatherUnavailable(anyhow::anyhow!(
                "provider returned no valid times inside [{from}, {to}]"
            )));
        }

        let mut per_centroid: Vec<BTreeMap<DateTime<Utc>, (f64, f64, f64)>> = vec![BTreeMap::new(); centroids.len()];
        for sample in &samples {
            if sample.valid_time < from || sample.valid_time > to {
                continue;
            }
            let nearest = centroids
                .iter()
                .enumerate()
                .map(|(i, c)| (i, algorithm.distance_to(c, &sample.position).m()))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match nearest {
                Some((i, d)) if d <= match_radius_m => {
                    let wind = Wind {
                        direction_from: sample.wind_dir_deg_from,
                        speed: crate::utils::Speed::from_kts(sample.wind_speed_kt),
                    };
                    let (u, v) = wind.to_uv_kts();
                    per_centroid[i].insert(sample.valid_time, (u, v, sample.wave_height_m));
                }
                _ => {
                    warn!("dropping sample at {} matching no requested centroid", sample.position);
                }
            }
        }

        let series: Vec<Option<CentroidSeries>> = per_centroid
            .iter()
            .map(|stamps| {
                if stamps.is_empty() {
                    return None;
                }
                let mut u_kt = Vec::with_capacity(valid_times.len());
                let mut v_kt = Vec::with_capacity(valid_times.len());
                let mut wave_m = Vec::with_capacity(valid_times.len());
                for vt in &valid_times {
                    // Exact stamp, or the temporally closest one this
                    // centroid has (a provider may thin distant points).
                    let value = stamps.get(vt).copied().unwrap_or_else(|| {
                        let before = stamps.range(..=*vt).next_back();
                        let after = stamps.range(*vt..).next();
                        match (before, after) {
                            (Some((tb, vb)), Some((ta, va))) => {
                                if (*vt - *tb) <= (*ta - *vt) {
                                    *vb
                                } else {
                                    *va
                                }
                            }
                            (Some((_, v)), None) | (None, Some((_, v))) => *v,
                            (None, None) => unreachable!("stamps checked non-empty"),
                        }
                    });
                    u_kt.push(value.0);
                    v_kt.push(value.1);
                    wave_m.push(value.2);
                }
                Some(CentroidSeries { u_kt, v_kt, wave_m })
            })
            .collect();

        let live: Vec<u32> = series
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u32))
            .collect();
        let dead = centroids.len() - live.len();
        if dead > 0 {
            warn!("{dead} of {} weather centroids returned no data", centroids.len());
        }
        // Vertex refs take the nearest live centroids with no distance
        // cutoff, so a navigable vertex loses coverage only when no
        // centroid survived at all.
        if live.is_empty() {
            return Err(Error::WeatherUnavailable(anyhow::anyhow!(
                "none of the {} centroids has a forecast inside the horizon",
                centroids.len()
            )));
        }

        // Up to three nearest live centroids per navigable vertex, inverse
        // distance weights normalized.
        let mut vertex_refs = vec![Vec::new(); self.mesh.vertices().len()];
        for vertex in self.mesh.vertices() {
            if !vertex.is_navigable {
                continue;
            }
            let mut distances: Vec<(u32, f64)> = live
                .iter()
                .map(|c| {
                    (
                        *c,
                        algorithm.distance_to(&vertex.position, &centroids[*c as usize]).m(),
                    )
                })
                .collect();
            distances.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            distances.truncate(3);

            let total: f64 = distances.iter().map(|(_, d)| 1.0 / d.max(1.0)).sum();
            vertex_refs[vertex.id.index()] = distances
                .into_iter()
                .map(|(c, d)| (c, (1.0 / d.max(1.0)) / total))
                .collect();
        }

        let horizon = Horizon {
            from: valid_times[0],
            to: *valid_times.last().unwrap(),
        };

        Ok(WeatheredMesh::assemble(
            self.mesh.clone(),
            horizon,
            valid_times,
            centroids,
            series,
            vertex_refs,
        ))
    }
}

/// Andrew's monotone chain over (lon, lat).
fn convex_hull(points: impl Iterator<Item = Coords>) -> Vec<Coords> {
    let mut pts: Vec<(f64, f64)> = points.map(|p| (p.lon, p.lat)).collect();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    pts.dedup();
    if pts.len() < 3 {
        return pts.into_iter().map(|(lon, lat)| Coords::new(lat, lon)).collect();
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower.into_iter().map(|(lon, lat)| Coords::new(lat, lon)).collect()
}

fn hull_contains(hull: &[Coords], p: &Coords) -> bool {
    // Counter-clockwise hull; a point is inside when it is left of (or on)
    // every edge. Degree-sized epsilon absorbs raster jitter.
    const EPS: f64 = 1e-9;
    let n = hull.len();
    for i in 0..n {
        let a = &hull[i];
        let b = &hull[(i + 1) % n];
        let cross = (b.lon - a.lon) * (p.lat - a.lat) - (b.lat - a.lat) * (p.lon - a.lon);
        if cross < -EPS {
            return false;
        }
    }
    true
}

/// Deterministic k-means over lat/lon, planar metric, fixed seed and round
/// count. Only the reduction step of centroid selection, so the cheap
/// metric is fine at mesh scale.
fn kmeans(points: &[Coords], k: usize) -> Vec<Coords> {
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut centers: Vec<Coords> = sample(&mut rng, points.len(), k).iter().map(|i| points[i]).collect();

    let mut assignment = vec![0usize; points.len()];
    for _ in 0..KMEANS_ROUNDS {
        for (pi, p) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_d = f64::MAX;
            for (ci, c) in centers.iter().enumerate() {
                let dlat = p.lat - c.lat;
                let dlon = (p.lon - c.lon) * p.lat.to_radians().cos();
                let d = dlat * dlat + dlon * dlon;
                if d < best_d {
                    best_d = d;
                    best = ci;
                }
            }
            assignment[pi] = best;
        }

        for (ci, center) in centers.iter_mut().enumerate() {
            let members: Vec<&Coords> = points
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == ci)
                .map(|(p, _)| p)
                .collect();
            if members.is_empty() {
                continue;
            }
            let lat = members.iter().map(|p| p.lat).sum::<f64>() / members.len() as f64;
            let lon = members.iter().map(|p| p.lon).sum::<f64>() / members.len() as f64;
            *center = Coords::new(lat, lon);
        }
    }

    centers
}
