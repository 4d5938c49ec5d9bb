use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::algorithm::METERS_PER_DEG;
use crate::course::Course;
use crate::error::{Error, Result};
use crate::position::Coords;
use crate::utils::Distance;

pub(crate) mod builder;
pub(crate) mod index;
pub mod store;

use index::CellIndex;

/// Wire tag for persisted meshes. Bumping it invalidates every cached area.
pub const WIRE_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshedAreaId(pub u64);

impl Display for MeshedAreaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "mesh-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub u32);

impl VertexId {
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for VertexId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Resolution ring: Fine around control points, Medium along the corridor,
/// Coarse in the open sea.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Fine,
    Medium,
    Coarse,
}

pub(crate) const TIERS: [Tier; 3] = [Tier::Fine, Tier::Medium, Tier::Coarse];

impl Tier {
    pub(crate) fn index(&self) -> usize {
        match self {
            Tier::Fine => 0,
            Tier::Medium => 1,
            Tier::Coarse => 2,
        }
    }

    pub(crate) fn from_index(i: usize) -> Option<Tier> {
        TIERS.get(i).copied()
    }

    /// Regular neighbors each vertex connects to.
    pub(crate) fn k_edges(&self) -> usize {
        [8, 6, 5][self.index()]
    }

    /// Neighbors a control point inserted off-grid is stitched to.
    pub(crate) fn k_stitch(&self) -> usize {
        [6, 4, 3][self.index()]
    }

    /// Beyond this a control point cannot be attached at all.
    pub(crate) fn snap_ceiling(&self) -> Distance {
        Distance::from_m([200.0, 400.0, 800.0][self.index()])
    }

    pub(crate) fn adjacent(&self) -> &'static [Tier] {
        match self {
            Tier::Fine => &[Tier::Medium],
            Tier::Medium => &[Tier::Fine, Tier::Coarse],
            Tier::Coarse => &[Tier::Medium],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MeshVertex {
    pub id: VertexId,
    pub position: Coords,
    pub tier: Tier,
    pub is_navigable: bool,
}

/// Directed edge record; both directions are stored because bearing (and
/// thus TWA under a given wind) differs per direction.
#[derive(Clone, Copy, Debug)]
pub struct MeshEdge {
    pub to: VertexId,
    pub distance: Distance,
    pub bearing: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub(crate) fn around(points: impl Iterator<Item = Coords>) -> Self {
        let mut bb = BoundingBox {
            min_lat: f64::MAX,
            max_lat: f64::MIN,
            min_lon: f64::MAX,
            max_lon: f64::MIN,
        };
        for p in points {
            bb.min_lat = bb.min_lat.min(p.lat);
            bb.max_lat = bb.max_lat.max(p.lat);
            bb.min_lon = bb.min_lon.min(p.lon);
            bb.max_lon = bb.max_lon.max(p.lon);
        }
        bb
    }

    pub(crate) fn expanded_nm(&self, nm: f64) -> Self {
        let dlat = nm / 60.0;
        let dlon = nm / (60.0 * self.mid_lat().to_radians().cos().max(0.05));
        BoundingBox {
            min_lat: self.min_lat - dlat,
            max_lat: self.max_lat + dlat,
            min_lon: self.min_lon - dlon,
            max_lon: self.max_lon + dlon,
        }
    }

    pub(crate) fn mid_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }
}

/// Effective mesh configuration, user supplied or auto derived.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshParams {
    pub corridor_nm: f64,
    pub ring1_m: f64,
    pub ring2_m: f64,
    pub ring3_m: f64,
    pub area1_m2: f64,
    pub area2_m2: f64,
    pub area3_m2: f64,
    pub shoreline_avoid_m: f64,
    pub max_weather_points: usize,
    pub weather_grid_km: f64,
}

#[derive(Clone, Copy, Debug)]
pub enum MeshSpec {
    Auto,
    Manual(MeshParams),
}

impl MeshParams {
    /// The fixed four-bucket ladder. The row is chosen from the course
    /// span and its shortest rhumb leg; the corridor never exceeds 40% of
    /// that leg.
    pub fn auto_derive(course: &Course) -> MeshParams {
        let span_nm = course.span_nm();
        let min_segment_nm = course.min_segment().nm();

        if min_segment_nm < 0.3 || span_nm < 1.0 {
            Self::preset(
                (0.1f64).min(0.4 * min_segment_nm),
                [50.0, 100.0, 200.0],
                [200.0, 500.0, 1000.0],
                5,
                0.5,
                50.0,
            )
        } else if min_segment_nm < 1.0 || span_nm < 3.0 {
            Self::preset(
                (0.3f64).min(0.4 * min_segment_nm),
                [100.0, 250.0, 500.0],
                [500.0, 1500.0, 4000.0],
                10,
                1.0,
                100.0,
            )
        } else if span_nm < 8.0 {
            Self::preset(
                (1.0f64).min(0.4 * min_segment_nm),
                [300.0, 800.0, 1500.0],
                [2000.0, 8000.0, 25000.0],
                20,
                2.0,
                150.0,
            )
        } else {
            Self::preset(
                (3.0f64).min(0.15 * span_nm).min(0.4 * min_segment_nm),
                [500.0, 1500.0, 3000.0],
                [3000.0, 15000.0, 60000.0],
                40,
                5.0,
                200.0,
            )
        }
    }

    fn preset(
        corridor_nm: f64,
        rings: [f64; 3],
        areas: [f64; 3],
        max_weather_points: usize,
        weather_grid_km: f64,
        shoreline_avoid_m: f64,
    ) -> MeshParams {
        MeshParams {
            corridor_nm,
            ring1_m: rings[0],
            ring2_m: rings[1],
            ring3_m: rings[2],
            area1_m2: areas[0],
            area2_m2: areas[1],
            area3_m2: areas[2],
            shoreline_avoid_m,
            max_weather_points,
            weather_grid_km,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            self.corridor_nm,
            self.ring1_m,
            self.ring2_m,
            self.ring3_m,
            self.area1_m2,
            self.area2_m2,
            self.area3_m2,
            self.shoreline_avoid_m,
            self.weather_grid_km,
        ];
        if positive.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::InvalidInput("mesh parameters must be positive and finite".into()));
        }
        if self.area1_m2 > self.area2_m2 || self.area2_m2 > self.area3_m2 {
            return Err(Error::InvalidInput("tier areas must grow with the tier".into()));
        }
        if self.max_weather_points == 0 {
            return Err(Error::InvalidInput("at least one weather point required".into()));
        }
        Ok(())
    }

    pub(crate) fn ring(&self, tier: Tier) -> Distance {
        Distance::from_m([self.ring1_m, self.ring2_m, self.ring3_m][tier.index()])
    }

    pub(crate) fn area_m2(&self, tier: Tier) -> f64 {
        [self.area1_m2, self.area2_m2, self.area3_m2][tier.index()]
    }

    /// Target vertex spacing for a tier, derived from its area density.
    pub(crate) fn spacing(&self, tier: Tier) -> Distance {
        Distance::from_m(self.area_m2(tier).sqrt())
    }

    pub(crate) fn shoreline_avoid(&self) -> Distance {
        Distance::from_m(self.shoreline_avoid_m)
    }
}

/// The navigation graph over a sea region. Immutable once built; shared via
/// `Arc` between the weather binder and any number of router runs.
#[derive(Clone, Debug)]
pub struct MeshedArea {
    pub id: MeshedAreaId,
    pub params: MeshParams,
    pub bounding_box: BoundingBox,
    vertices: Vec<MeshVertex>,
    adjacency: Vec<Vec<MeshEdge>>,
    control_vertices: Vec<VertexId>,
    index: CellIndex,
}

impl MeshedArea {
    pub(crate) fn assemble(
        params: MeshParams,
        bounding_box: BoundingBox,
        vertices: Vec<MeshVertex>,
        adjacency: Vec<Vec<MeshEdge>>,
        control_vertices: Vec<VertexId>,
    ) -> Self {
        let cell_deg = params.spacing(Tier::Coarse).m() / METERS_PER_DEG;
        let mut index = CellIndex::new(cell_deg);
        for v in &vertices {
            if v.is_navigable {
                index.insert(v.id.0, v.position);
            }
        }
        MeshedArea {
            id: MeshedAreaId(0),
            params,
            bounding_box,
            vertices,
            adjacency,
            control_vertices,
            index,
        }
    }

    pub fn vertex(&self, id: VertexId) -> &MeshVertex {
        &self.vertices[id.index()]
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn edges_from(&self, id: VertexId) -> &[MeshEdge] {
        &self.adjacency[id.index()]
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(|e| e.len()).sum()
    }

    /// Control vertices in course order (snapped or inserted by the builder).
    pub fn control_vertices(&self) -> &[VertexId] {
        &self.control_vertices
    }

    pub(crate) fn index(&self) -> &CellIndex {
        &self.index
    }

    /// The k nearest navigable vertices to a position, ascending distance.
    pub fn nearest_navigable(&self, position: &Coords, k: usize) -> Vec<(VertexId, Distance)> {
        self.index
            .nearest(position, k, |_| true)
            .into_iter()
            .map(|(id, d)| (VertexId(id), d))
            .collect()
    }

    pub fn to_wire_json(&self) -> Result<String> {
        let wire = MeshWire {
            version: WIRE_VERSION,
            id: self.id.0,
            params: self.params,
            bounding_box: self.bounding_box,
            vertices: self
                .vertices
                .iter()
                .map(|v| VertexWire {
                    id: v.id.0,
                    lat: v.position.lat,
                    lon: v.position.lon,
                    tier: v.tier.index() as u8 + 1,
                    navigable: v.is_navigable,
                })
                .collect(),
            edges: self
                .adjacency
                .iter()
                .enumerate()
                .flat_map(|(from, edges)| {
                    edges.iter().map(move |e| EdgeWire {
                        from: from as u32,
                        to: e.to.0,
                        distance_m: e.distance.m(),
                        bearing: e.bearing,
                    })
                })
                .collect(),
            control_vertices: self.control_vertices.iter().map(|v| v.0).collect(),
        };
        serde_json::to_string(&wire).map_err(|e| Error::InvalidInput(format!("mesh serialization failed: {e}")))
    }

    pub fn from_wire_json(raw: &str) -> Result<MeshedArea> {
        let wire: MeshWire =
            serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("malformed mesh wire record: {e}")))?;
        if wire.version != WIRE_VERSION {
            return Err(Error::InvalidInput(format!(
                "mesh wire version {} does not match {}",
                wire.version, WIRE_VERSION
            )));
        }

        let vertices: Vec<MeshVertex> = wire
            .vertices
            .iter()
            .map(|v| {
                Tier::from_index(v.tier.saturating_sub(1) as usize)
                    .map(|tier| MeshVertex {
                        id: VertexId(v.id),
                        position: Coords::new(v.lat, v.lon),
                        tier,
                        is_navigable: v.navigable,
                    })
                    .ok_or_else(|| Error::InvalidInput(format!("vertex {} has invalid tier {}", v.id, v.tier)))
            })
            .collect::<Result<_>>()?;

        let mut adjacency = vec![Vec::new(); vertices.len()];
        for e in &wire.edges {
            if e.from as usize >= vertices.len() || e.to as usize >= vertices.len() {
                return Err(Error::InvalidInput(format!("edge {}->{} out of range", e.from, e.to)));
            }
            adjacency[e.from as usize].push(MeshEdge {
                to: VertexId(e.to),
                distance: Distance::from_m(e.distance_m),
                bearing: e.bearing,
            });
        }

        let mut mesh = MeshedArea::assemble(
            wire.params,
            wire.bounding_box,
            vertices,
            adjacency,
            wire.control_vertices.into_iter().map(VertexId).collect(),
        );
        mesh.id = MeshedAreaId(wire.id);
        Ok(mesh)
    }
}

#[derive(Serialize, Deserialize)]
struct MeshWire {
    version: u32,
    id: u64,
    params: MeshParams,
    bounding_box: BoundingBox,
    vertices: Vec<VertexWire>,
    edges: Vec<EdgeWire>,
    control_vertices: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct VertexWire {
    id: u32,
    lat: f64,
    lon: f64,
    tier: u8,
    navigable: bool,
}

#[derive(Serialize, Deserialize)]
struct EdgeWire {
    from: u32,
    to: u32,
    distance_m: f64,
    bearing: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::{ControlPoint, Course};

    fn course_nm_apart(nm: f64) -> Course {
        Course::new(vec![
            ControlPoint::start((54.0, 18.0)),
            ControlPoint::finish((54.0 + nm / 60.0, 18.0)),
        ])
        .unwrap()
    }

    #[test]
    fn auto_ladder_buckets() {
        let tiny = MeshParams::auto_derive(&course_nm_apart(0.2));
        assert_eq!(tiny.max_weather_points, 5);
        assert!((tiny.corridor_nm - 0.4 * 0.2).abs() < 1e-6);

        let small = MeshParams::auto_derive(&course_nm_apart(2.0));
        assert_eq!(small.max_weather_points, 10);
        assert_eq!(small.shoreline_avoid_m, 100.0);

        let medium = MeshParams::auto_derive(&course_nm_apart(5.0));
        assert_eq!(medium.max_weather_points, 20);
        assert_eq!(medium.area3_m2, 25000.0);

        let large = MeshParams::auto_derive(&course_nm_apart(40.0));
        assert_eq!(large.max_weather_points, 40);
        assert_eq!(large.weather_grid_km, 5.0);
    }

    #[test]
    fn corridor_capped_at_fraction_of_shortest_leg() {
        for nm in [0.2, 0.7, 2.0, 5.0, 12.0, 100.0] {
            let course = course_nm_apart(nm);
            let params = MeshParams::auto_derive(&course);
            assert!(
                params.corridor_nm <= 0.4 * course.min_segment().nm() + 1e-9,
                "corridor {} too wide for leg {}",
                params.corridor_nm,
                nm
            );
        }
    }

    #[test]
    fn wire_round_trip() {
        let params = MeshParams::auto_derive(&course_nm_apart(5.0));
        let bb = BoundingBox {
            min_lat: 54.0,
            max_lat: 54.1,
            min_lon: 18.0,
            max_lon: 18.1,
        };
        let vertices = vec![
            MeshVertex {
                id: VertexId(0),
                position: Coords::new(54.0, 18.0),
                tier: Tier::Fine,
                is_navigable: true,
            },
            MeshVertex {
                id: VertexId(1),
                position: Coords::new(54.05, 18.05),
                tier: Tier::Coarse,
                is_navigable: true,
            },
        ];
        let adjacency = vec![
            vec![MeshEdge {
                to: VertexId(1),
                distance: Distance::from_m(6000.0),
                bearing: 30.0,
            }],
            vec![MeshEdge {
                to: VertexId(0),
                distance: Distance::from_m(6000.0),
                bearing: 210.0,
            }],
        ];
        let mut mesh = MeshedArea::assemble(params, bb, vertices, adjacency, vec![VertexId(0), VertexId(1)]);
        mesh.id = MeshedAreaId(7);

        let raw = mesh.to_wire_json().unwrap();
        let back = MeshedArea::from_wire_json(&raw).unwrap();
        assert_eq!(back.id, MeshedAreaId(7));
        assert_eq!(back.vertices().len(), 2);
        assert_eq!(back.edge_count(), 2);
        assert_eq!(back.control_vertices(), &[VertexId(0), VertexId(1)]);
        assert_eq!(back.vertex(VertexId(1)).tier, Tier::Coarse);

        // A bumped tag refuses to load.
        let tampered = raw.replacen("\"version\":1", "\"version\":99", 1);
        assert!(MeshedArea::from_wire_json(&tampered).is_err());
    }
}
