use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;

use crate::course::{ControlPoint, Course};
use crate::error::{Error, Result};
use crate::land::GeometryPort;
use crate::mesh::builder::MeshBuilder;
use crate::mesh::store::{MeshStore, Version};
use crate::mesh::{MeshSpec, MeshParams, MeshedAreaId};
use crate::polar::{Polar, Polars, PolarsSpec};
use crate::router::{Ductor, Router, RouterConfig, RouteResult, TimeWindow};
use crate::utils::CancellationToken;
use crate::weather::{WeatherBinder, WeatherPort};

/// Pipeline facade: owns the ports, the polar registry and the router
/// configuration. Everything behind it is either an immutable snapshot or a
/// pure function, so one instance serves concurrent requests.
pub struct Naucrates {
    geometry: Arc<dyn GeometryPort>,
    weather: Arc<dyn WeatherPort>,
    store: Arc<dyn MeshStore>,
    polars: Polars,
    config: RouterConfig,
}

impl Naucrates {
    pub fn new(geometry: Arc<dyn GeometryPort>, weather: Arc<dyn WeatherPort>, store: Arc<dyn MeshStore>) -> Self {
        Naucrates {
            geometry,
            weather,
            store,
            polars: <Polars as PolarsSpec>::new(),
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_polar(&self, name: String, polar: Polar) {
        self.polars.insert(name, polar);
    }

    /// C3: builds, clips and persists the adaptive navigation mesh.
    pub fn build_mesh(
        &self,
        control_points: Vec<ControlPoint>,
        spec: MeshSpec,
        cancel: &CancellationToken,
    ) -> Result<MeshedAreaId> {
        let course = Course::new(control_points)?;
        let params = match spec {
            MeshSpec::Auto => MeshParams::auto_derive(&course),
            MeshSpec::Manual(params) => params,
        };
        info!(
            "build mesh for {} control points, corridor {:.2}nm",
            course.len(),
            params.corridor_nm
        );

        let mesh = MeshBuilder::new(&course, params, self.geometry.as_ref()).build(cancel)?;
        self.store.put(mesh)
    }

    /// C4: binds forecasts over the horizon to a stored mesh and publishes
    /// the new weather version.
    pub async fn fetch_weather(
        &self,
        id: MeshedAreaId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Version> {
        let mesh = self.store.get(id)?;
        let weathered = WeatherBinder::new(mesh, self.weather.as_ref()).bind(from, to, cancel).await?;
        self.store.attach_weather(id, weathered)
    }

    /// C5: time-optimal variants for every departure candidate in the
    /// window, best flagged.
    pub async fn calculate_route(
        &self,
        id: MeshedAreaId,
        vessel: &str,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<RouteResult> {
        let weathered = self.store.get_weather(id)?;
        let current = self.store.weather_version(id)?;
        if weathered.version != current {
            return Err(Error::InvalidInput(format!(
                "weather binding v{} for {id} superseded by v{current}",
                weathered.version
            )));
        }

        let polar = self.polars.get(vessel)?;
        Ductor::new(self.config)
            .route(weathered, polar, vessel.to_string(), window, cancel.clone())
            .await
    }
}
