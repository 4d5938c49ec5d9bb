use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use log::debug;

use crate::error::{Error, Result};
use crate::mesh::{MeshedArea, MeshedAreaId};
use crate::weather::WeatheredMesh;

/// Weather attachment counter per meshed area. The router refuses to run
/// against a `WeatheredMesh` whose version the store has since superseded.
pub type Version = u32;

/// Keyed cache of immutable meshed areas and their weather attachments.
/// Not a global: the pipeline facade owns one and tests inject their own.
pub trait MeshStore: Send + Sync {
    /// Mints an id, freezes the mesh and stores it.
    fn put(&self, mesh: MeshedArea) -> Result<MeshedAreaId>;

    fn get(&self, id: MeshedAreaId) -> Result<Arc<MeshedArea>>;

    /// Publishes a weather binding, bumping and returning the version.
    fn attach_weather(&self, id: MeshedAreaId, weather: WeatheredMesh) -> Result<Version>;

    fn get_weather(&self, id: MeshedAreaId) -> Result<Arc<WeatheredMesh>>;

    fn weather_version(&self, id: MeshedAreaId) -> Result<Version>;
}

struct AreaEntry {
    mesh: Arc<MeshedArea>,
    weather: Option<Arc<WeatheredMesh>>,
    version: Version,
}

#[derive(Default)]
pub struct InMemoryMeshStore {
    areas: RwLock<HashMap<MeshedAreaId, AreaEntry>>,
    next_id: AtomicU64,
}

impl InMemoryMeshStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeshStore for InMemoryMeshStore {
    fn put(&self, mut mesh: MeshedArea) -> Result<MeshedAreaId> {
        let id = MeshedAreaId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        mesh.id = id;
        debug!("store {} ({} vertices)", id, mesh.vertices().len());

        let mut areas = self.areas.write().unwrap();
        areas.insert(
            id,
            AreaEntry {
                mesh: Arc::new(mesh),
                weather: None,
                version: 0,
            },
        );
        Ok(id)
    }

    fn get(&self, id: MeshedAreaId) -> Result<Arc<MeshedArea>> {
        let areas = self.areas.read().unwrap();
        areas.get(&id).map(|e| e.mesh.clone()).ok_or(Error::NotFound(id))
    }

    fn attach_weather(&self, id: MeshedAreaId, mut weather: WeatheredMesh) -> Result<Version> {
        let mut areas = self.areas.write().unwrap();
        let entry = areas.get_mut(&id).ok_or(Error::NotFound(id))?;

        entry.version += 1;
        weather.version = entry.version;
        entry.weather = Some(Arc::new(weather));
        debug!("weather v{} attached to {}", entry.version, id);
        Ok(entry.version)
    }

    fn get_weather(&self, id: MeshedAreaId) -> Result<Arc<WeatheredMesh>> {
        let areas = self.areas.read().unwrap();
        let entry = areas.get(&id).ok_or(Error::NotFound(id))?;
        entry
            .weather
            .clone()
            .ok_or_else(|| Error::WeatherUnavailable(anyhow!("no weather attached to {id}")))
    }

    fn weather_version(&self, id: MeshedAreaId) -> Result<Version> {
        let areas = self.areas.read().unwrap();
        areas.get(&id).map(|e| e.version).ok_or(Error::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{BoundingBox, MeshParams, MeshVertex, Tier, VertexId};
    use crate::position::Coords;

    fn trivial_mesh() -> MeshedArea {
        let params = MeshParams {
            corridor_nm: 0.5,
            ring1_m: 100.0,
            ring2_m: 200.0,
            ring3_m: 400.0,
            area1_m2: 1000.0,
            area2_m2: 2000.0,
            area3_m2: 4000.0,
            shoreline_avoid_m: 50.0,
            max_weather_points: 5,
            weather_grid_km: 1.0,
        };
        let bb = BoundingBox {
            min_lat: 54.0,
            max_lat: 54.1,
            min_lon: 18.0,
            max_lon: 18.1,
        };
        let vertices = vec![MeshVertex {
            id: VertexId(0),
            position: Coords::new(54.05, 18.05),
            tier: Tier::Coarse,
            is_navigable: true,
        }];
        MeshedArea::assemble(params, bb, vertices, vec![Vec::new()], vec![VertexId(0)])
    }

    #[test]
    fn put_mints_fresh_ids() {
        let store = InMemoryMeshStore::new();
        let a = store.put(trivial_mesh()).unwrap();
        let b = store.put(trivial_mesh()).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(a).unwrap().id, a);
    }

    #[test]
    fn missing_area_is_not_found() {
        let store = InMemoryMeshStore::new();
        assert!(matches!(store.get(MeshedAreaId(42)), Err(Error::NotFound(_))));
        assert!(matches!(
            store.weather_version(MeshedAreaId(42)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn weather_before_attachment_is_unavailable() {
        let store = InMemoryMeshStore::new();
        let id = store.put(trivial_mesh()).unwrap();
        assert_eq!(store.weather_version(id).unwrap(), 0);
        assert!(matches!(store.get_weather(id), Err(Error::WeatherUnavailable(_))));
    }
}
