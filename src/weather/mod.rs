use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::algorithm::Utils;
use crate::error::{Error, Result};
use crate::mesh::store::Version;
use crate::mesh::MeshedArea;
use crate::position::Coords;
use crate::utils::Speed;

pub(crate) mod binder;

pub use binder::WeatherBinder;

/// Wind at a point: meteorological direction (degrees the wind comes FROM)
/// and speed in canonical knots. Adapters normalize whatever unit their
/// provider speaks before samples enter the core.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Wind {
    pub direction_from: f64,
    pub speed: Speed,
}

impl Wind {
    /// Builds from ground-frame velocity components in knots (east, north).
    pub fn from_uv_kts(u: f64, v: f64) -> Self {
        Wind {
            direction_from: vector_to_degrees(u, v),
            speed: Speed::from_kts((u * u + v * v).sqrt()),
        }
    }

    /// Convenience for adapters consuming m/s grib components.
    pub fn from_uv_ms(u: f64, v: f64) -> Self {
        Wind {
            direction_from: vector_to_degrees(u, v),
            speed: Speed::from_m_s((u * u + v * v).sqrt()),
        }
    }

    /// Ground-frame velocity components in knots (east, north).
    pub(crate) fn to_uv_kts(&self) -> (f64, f64) {
        let rad = self.direction_from.to_radians();
        (-self.speed.kts() * rad.sin(), -self.speed.kts() * rad.cos())
    }
}

impl Display for Wind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}° {:.1}kt", self.direction_from, self.speed.kts())
    }
}

/// Meteorological direction of a (u, v) velocity vector.
pub(crate) fn vector_to_degrees(u: f64, v: f64) -> f64 {
    let velocity_dir = libm::atan2(u, v);
    (velocity_dir.to_degrees() + 180.0).wrap360()
}

/// One forecast value at one place and one valid time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSample {
    pub position: Coords,
    pub valid_time: DateTime<Utc>,
    pub wind_speed_kt: f64,
    pub wind_dir_deg_from: f64,
    pub wave_height_m: f64,
}

/// Forecast source. The single externally blocking boundary of the
/// pipeline; everything downstream of the returned stream is CPU-bound.
#[async_trait]
pub trait WeatherPort: Send + Sync {
    async fn fetch(
        &self,
        points: Vec<Coords>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<WeatherSample>>>;
}

/// Temporal coverage of a weather binding. Sampling outside it fails; the
/// planner never extrapolates a forecast.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Horizon {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Horizon {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from <= t && t <= self.to
    }
}

/// Interpolated conditions at a point and instant.
#[derive(Clone, Copy, Debug)]
pub struct Conditions {
    pub wind: Wind,
    pub wave_height_m: f64,
}

/// Per-centroid forecast series in ground-frame knots, aligned with the
/// shared valid-time schedule.
#[derive(Clone, Debug)]
pub(crate) struct CentroidSeries {
    pub(crate) u_kt: Vec<f64>,
    pub(crate) v_kt: Vec<f64>,
    pub(crate) wave_m: Vec<f64>,
}

/// A meshed area with forecasts attached to its vertices: each navigable
/// vertex references up to three sampling centroids with normalized
/// inverse-distance weights; the valid-time schedule is shared.
#[derive(Clone, Debug)]
pub struct WeatheredMesh {
    mesh: Arc<MeshedArea>,
    pub version: Version,
    horizon: Horizon,
    valid_times: Vec<DateTime<Utc>>,
    centroids: Vec<Coords>,
    series: Vec<Option<CentroidSeries>>,
    vertex_refs: Vec<Vec<(u32, f64)>>,
}

impl WeatheredMesh {
    pub(crate) fn assemble(
        mesh: Arc<MeshedArea>,
        horizon: Horizon,
        valid_times: Vec<DateTime<Utc>>,
        centroids: Vec<Coords>,
        series: Vec<Option<CentroidSeries>>,
        vertex_refs: Vec<Vec<(u32, f64)>>,
    ) -> Self {
        WeatheredMesh {
            mesh,
            version: 0,
            horizon,
            valid_times,
            centroids,
            series,
            vertex_refs,
        }
    }

    pub fn mesh(&self) -> &Arc<MeshedArea> {
        &self.mesh
    }

    pub fn horizon(&self) -> Horizon {
        self.horizon
    }

    pub fn centroid_count(&self) -> usize {
        self.centroids.len()
    }

    /// Conditions at a centroid at the bracketing-interpolated instant.
    fn centroid_at(&self, centroid: u32, lo: usize, hi: usize, h: f64) -> (f64, f64, f64) {
        let series = self.series[centroid as usize]
            .as_ref()
            .expect("vertex refs only point at live centroids");
        let lerp = |xs: &[f64]| xs[lo] * (1.0 - h) + xs[hi] * h;
        (lerp(&series.u_kt), lerp(&series.v_kt), lerp(&series.wave_m))
    }

    /// Wind and wave at an arbitrary position: inverse-distance blend over
    /// the three nearest navigable vertices, each of which blends its
    /// attached centroids; linear in time between bracketing valid times.
    /// Outside the coverage: typed failure, never extrapolation.
    pub fn sample(&self, position: &Coords, t: DateTime<Utc>) -> Result<Conditions> {
        let (first, last) = match (self.valid_times.first(), self.valid_times.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => {
                return Err(Error::WeatherUnavailable(anyhow::anyhow!(
                    "weathered mesh has an empty schedule"
                )))
            }
        };
        if t < first || t > last {
            return Err(Error::OutOfHorizon {
                requested: t,
                from: first,
                to: last,
            });
        }

        let hi = self.valid_times.partition_point(|vt| *vt < t).min(self.valid_times.len() - 1);
        let lo = if hi == 0 { 0 } else { hi - 1 };
        let span = (self.valid_times[hi] - self.valid_times[lo]).num_seconds();
        let h = if span == 0 {
            1.0
        } else {
            (t - self.valid_times[lo]).num_seconds() as f64 / span as f64
        };

        let vertices = self
            .mesh
            .index()
            .nearest(position, 3, |id| !self.vertex_refs[id as usize].is_empty());
        if vertices.is_empty() {
            return Err(Error::WeatherUnavailable(anyhow::anyhow!(
                "no weather-bound vertex near {position}"
            )));
        }

        let mut u = 0.0;
        let mut v = 0.0;
        let mut wave = 0.0;
        let mut total = 0.0;
        for (vertex, distance) in &vertices {
            let idw = 1.0 / distance.m().max(1.0);
            let mut vu = 0.0;
            let mut vv = 0.0;
            let mut vw = 0.0;
            for (centroid, weight) in &self.vertex_refs[*vertex as usize] {
                let (cu, cv, cw) = self.centroid_at(*centroid, lo, hi, h);
                vu += weight * cu;
                vv += weight * cv;
                vw += weight * cw;
            }
            u += idw * vu;
            v += idw * vv;
            wave += idw * vw;
            total += idw;
        }

        Ok(Conditions {
            wind: Wind::from_uv_kts(u / total, v / total),
            wave_height_m: wave / total,
        })
    }
}

impl WeatheredMesh {
    pub fn to_wire_json(&self) -> Result<String> {
        let wire = WeatherWire {
            version: crate::mesh::WIRE_VERSION,
            mesh_id: self.mesh.id.0,
            weather_version: self.version,
            horizon: self.horizon,
            valid_times: self.valid_times.clone(),
            centroids: self
                .centroids
                .iter()
                .zip(&self.series)
                .map(|(c, series)| CentroidWire {
                    lat: c.lat,
                    lon: c.lon,
                    series: series.as_ref().map(|s| SeriesWire {
                        u_kt: s.u_kt.clone(),
                        v_kt: s.v_kt.clone(),
                        wave_m: s.wave_m.clone(),
                    }),
                })
                .collect(),
            vertex_refs: self.vertex_refs.clone(),
        };
        serde_json::to_string(&wire).map_err(|e| Error::InvalidInput(format!("weather serialization failed: {e}")))
    }

    /// Rehydrates a persisted binding against its meshed area. The record
    /// remembers which area it was bound to; a mismatch is rejected.
    pub fn from_wire_json(mesh: Arc<MeshedArea>, raw: &str) -> Result<WeatheredMesh> {
        let wire: WeatherWire =
            serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("malformed weather wire record: {e}")))?;
        if wire.version != crate::mesh::WIRE_VERSION {
            return Err(Error::InvalidInput(format!(
                "weather wire version {} does not match {}",
                wire.version,
                crate::mesh::WIRE_VERSION
            )));
        }
        if wire.mesh_id != mesh.id.0 {
            return Err(Error::InvalidInput(format!(
                "weather record bound to mesh-{}, not {}",
                wire.mesh_id, mesh.id
            )));
        }
        if wire.vertex_refs.len() != mesh.vertices().len() {
            return Err(Error::InvalidInput(format!(
                "weather record covers {} vertices, mesh has {}",
                wire.vertex_refs.len(),
                mesh.vertices().len()
            )));
        }

        let mut weathered = WeatheredMesh::assemble(
            mesh,
            wire.horizon,
            wire.valid_times,
            wire.centroids.iter().map(|c| Coords::new(c.lat, c.lon)).collect(),
            wire.centroids
                .into_iter()
                .map(|c| {
                    c.series.map(|s| CentroidSeries {
                        u_kt: s.u_kt,
                        v_kt: s.v_kt,
                        wave_m: s.wave_m,
                    })
                })
                .collect(),
            wire.vertex_refs,
        );
        weathered.version = wire.weather_version;
        Ok(weathered)
    }
}

#[derive(Serialize, Deserialize)]
struct WeatherWire {
    version: u32,
    mesh_id: u64,
    weather_version: Version,
    horizon: Horizon,
    valid_times: Vec<DateTime<Utc>>,
    centroids: Vec<CentroidWire>,
    vertex_refs: Vec<Vec<(u32, f64)>>,
}

#[derive(Serialize, Deserialize)]
struct CentroidWire {
    lat: f64,
    lon: f64,
    series: Option<SeriesWire>,
}

#[derive(Serialize, Deserialize)]
struct SeriesWire {
    u_kt: Vec<f64>,
    v_kt: Vec<f64>,
    wave_m: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uv_round_trip() {
        for (dir, speed) in [(0.0, 10.0), (90.0, 5.0), (225.0, 18.0), (359.0, 2.0)] {
            let wind = Wind {
                direction_from: dir,
                speed: Speed::from_kts(speed),
            };
            let (u, v) = wind.to_uv_kts();
            let back = Wind::from_uv_kts(u, v);
            assert!((back.direction_from - dir).abs() < 1e-9, "dir {dir} -> {}", back.direction_from);
            assert!((back.speed.kts() - speed).abs() < 1e-9);
        }
    }

    #[test]
    fn meteorological_convention() {
        // Wind out of the north moves air southward: v negative.
        let north = Wind::from_uv_kts(0.0, -10.0);
        assert!((north.direction_from - 0.0).abs() < 1e-9);
        // Out of the west: air moves east, u positive.
        let west = Wind::from_uv_kts(10.0, 0.0);
        assert!((west.direction_from - 270.0).abs() < 1e-9);
    }
}
