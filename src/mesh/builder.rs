use std::collections::HashSet;

use log::{debug, info};

use crate::algorithm::spherical::Spherical;
use crate::algorithm::{Algorithm, METERS_PER_DEG};
use crate::course::Course;
use crate::error::{Error, Result};
use crate::land::GeometryPort;
use crate::mesh::index::CellIndex;
use crate::mesh::{BoundingBox, MeshEdge, MeshParams, MeshVertex, MeshedArea, Tier, VertexId, TIERS};
use crate::position::Coords;
use crate::utils::{CancellationToken, Distance};

/// Builds the adaptive navigation graph: three overlaid vertex tiers,
/// clipped to navigable water, stitched to the control points, proven
/// connected.
pub(crate) struct MeshBuilder<'a> {
    course: &'a Course,
    params: MeshParams,
    geometry: &'a dyn GeometryPort,
    algorithm: Spherical,
}

/// Planar approximation of the corridor in local NM coordinates; good far
/// beyond any corridor the preset ladder can produce.
struct CorridorFrame {
    ref_lat: f64,
    ref_lon: f64,
    cos_lat: f64,
    segments: Vec<((f64, f64), (f64, f64))>,
}

impl CorridorFrame {
    fn new(course: &Course, bounding_box: &BoundingBox) -> Self {
        let ref_lat = bounding_box.min_lat;
        let ref_lon = bounding_box.min_lon;
        let cos_lat = bounding_box.mid_lat().to_radians().cos().max(0.05);

        let to_plane = |p: &Coords| ((p.lon - ref_lon) * 60.0 * cos_lat, (p.lat - ref_lat) * 60.0);

        let segments = course
            .control_points()
            .windows(2)
            .map(|w| (to_plane(&w[0].position), to_plane(&w[1].position)))
            .collect();

        CorridorFrame {
            ref_lat,
            ref_lon,
            cos_lat,
            segments,
        }
    }

    fn in_corridor(&self, point: &Coords, half_width_nm: f64) -> bool {
        let x = (point.lon - self.ref_lon) * 60.0 * self.cos_lat;
        let y = (point.lat - self.ref_lat) * 60.0;

        for ((ax, ay), (bx, by)) in &self.segments {
            let (dx, dy) = (bx - ax, by - ay);
            let len2 = dx * dx + dy * dy;
            let t = if len2 <= f64::EPSILON {
                0.0
            } else {
                (((x - ax) * dx + (y - ay) * dy) / len2).clamp(0.0, 1.0)
            };
            let (px, py) = (ax + t * dx, ay + t * dy);
            let dist2 = (x - px) * (x - px) + (y - py) * (y - py);
            if dist2 <= half_width_nm * half_width_nm {
                return true;
            }
        }

        false
    }
}

impl<'a> MeshBuilder<'a> {
    pub(crate) fn new(course: &'a Course, params: MeshParams, geometry: &'a dyn GeometryPort) -> Self {
        MeshBuilder {
            course,
            params,
            geometry,
            algorithm: Spherical {},
        }
    }

    pub(crate) fn build(&self, cancel: &CancellationToken) -> Result<MeshedArea> {
        self.params.validate()?;

        let bounding_box = BoundingBox::around(self.course.control_points().iter().map(|cp| cp.position))
            .expanded_nm(self.params.corridor_nm);
        let corridor = CorridorFrame::new(self.course, &bounding_box);

        let mut vertices = self.rasterize(&bounding_box, &corridor, cancel)?;
        let navigable = vertices.iter().filter(|v| v.is_navigable).count();
        info!(
            "meshed {} vertices ({} navigable) over {:.2}x{:.2} deg",
            vertices.len(),
            navigable,
            bounding_box.max_lat - bounding_box.min_lat,
            bounding_box.max_lon - bounding_box.min_lon
        );
        if navigable == 0 {
            return Err(Error::ControlPointUnreachable {
                name: self.course.control_points()[0].label(0),
                reason: "no navigable water in the meshed region".into(),
            });
        }

        let mut index = CellIndex::new(self.params.spacing(Tier::Coarse).m() / METERS_PER_DEG);
        for v in &vertices {
            if v.is_navigable {
                index.insert(v.id.0, v.position);
            }
        }

        let mut adjacency: Vec<Vec<MeshEdge>> = vec![Vec::new(); vertices.len()];
        let control_vertices = self.attach_control_points(&mut vertices, &mut adjacency, &mut index, &corridor)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.connect(&vertices, &mut adjacency, &index, cancel)?;

        self.prove_connected(&vertices, &adjacency, &control_vertices)?;

        let mesh = MeshedArea::assemble(self.params, bounding_box, vertices, adjacency, control_vertices);
        debug!(
            "mesh assembled: {} edges, avg degree {:.1}",
            mesh.edge_count(),
            mesh.edge_count() as f64 / navigable.max(1) as f64
        );
        Ok(mesh)
    }

    fn classify(&self, point: &Coords, corridor: &CorridorFrame) -> Tier {
        let mut min_cp = f64::MAX;
        for cp in self.course.control_points() {
            min_cp = min_cp.min(self.algorithm.distance_to(point, &cp.position).m());
        }

        if min_cp <= self.params.ring(Tier::Fine).m() {
            Tier::Fine
        } else if min_cp <= self.params.ring(Tier::Medium).m() || corridor.in_corridor(point, self.params.corridor_nm)
        {
            Tier::Medium
        } else {
            Tier::Coarse
        }
    }

    /// Overlays the three tier rasters; each tier keeps the grid points the
    /// classifier assigns to it, so the densities never double up.
    fn rasterize(
        &self,
        bounding_box: &BoundingBox,
        corridor: &CorridorFrame,
        cancel: &CancellationToken,
    ) -> Result<Vec<MeshVertex>> {
        let mut vertices = Vec::new();
        let cos_lat = bounding_box.mid_lat().to_radians().cos().max(0.05);
        let shoreline = self.params.shoreline_avoid();

        for tier in TIERS {
            let spacing = self.params.spacing(tier).m();
            let dlat = spacing / METERS_PER_DEG;
            let dlon = dlat / cos_lat;

            let mut lat = bounding_box.min_lat + dlat / 2.0;
            while lat <= bounding_box.max_lat {
                let mut lon = bounding_box.min_lon + dlon / 2.0;
                while lon <= bounding_box.max_lon {
                    let point = Coords::new(lat, lon);
                    if self.classify(&point, corridor) == tier {
                        if vertices.len() % 8192 == 0 && cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        let clearance = self
                            .geometry
                            .distance_to_land(&point)
                            .map_err(Error::GeometryUnavailable)?;
                        vertices.push(MeshVertex {
                            id: VertexId(vertices.len() as u32),
                            position: point,
                            tier,
                            is_navigable: clearance >= shoreline,
                        });
                    }
                    lon += dlon;
                }
                lat += dlat;
            }
        }

        Ok(vertices)
    }

    /// Snaps each control point to the mesh, or inserts it as an explicit
    /// stitched vertex when the nearest navigable vertex is further than the
    /// tier tolerance but still under the hard ceiling.
    fn attach_control_points(
        &self,
        vertices: &mut Vec<MeshVertex>,
        adjacency: &mut Vec<Vec<MeshEdge>>,
        index: &mut CellIndex,
        corridor: &CorridorFrame,
    ) -> Result<Vec<VertexId>> {
        let mut control_vertices = Vec::with_capacity(self.course.len());

        for (i, cp) in self.course.control_points().iter().enumerate() {
            if self.geometry.is_land(&cp.position).map_err(Error::GeometryUnavailable)? {
                return Err(Error::ControlPointUnreachable {
                    name: cp.label(i),
                    reason: "control point lies on land".into(),
                });
            }

            let tier = self.classify(&cp.position, corridor);
            let tolerance = self.params.spacing(tier);
            let ceiling = tier.snap_ceiling();

            let mut candidates = index.nearest(&cp.position, 4, |_| true);
            // Equidistant candidates resolve to the lower tier, then the lower id.
            candidates.sort_by(|a, b| {
                a.1.cmp(&b.1)
                    .then(vertices[a.0 as usize].tier.cmp(&vertices[b.0 as usize].tier))
                    .then(a.0.cmp(&b.0))
            });

            let nearest = match candidates.first() {
                Some(hit) => *hit,
                None => {
                    return Err(Error::ControlPointUnreachable {
                        name: cp.label(i),
                        reason: "no navigable vertex in the mesh".into(),
                    });
                }
            };

            if nearest.1 > ceiling {
                return Err(Error::ControlPointUnreachable {
                    name: cp.label(i),
                    reason: format!("nearest navigable water is {} away", nearest.1),
                });
            }

            if nearest.1 <= tolerance {
                debug!("control point {} snapped to {} ({} away)", cp.label(i), nearest.0, nearest.1);
                control_vertices.push(VertexId(nearest.0));
                continue;
            }

            // Insert and stitch.
            let id = VertexId(vertices.len() as u32);
            let vertex = MeshVertex {
                id,
                position: cp.position,
                tier,
                is_navigable: true,
            };
            vertices.push(vertex);
            adjacency.push(Vec::new());

            let neighbors = index.nearest(&cp.position, tier.k_stitch(), |_| true);
            let mut stitched = 0;
            for (n, _) in &neighbors {
                if self.try_add_edge(vertices, adjacency, id, VertexId(*n))? {
                    stitched += 1;
                }
            }
            if stitched == 0 {
                return Err(Error::ControlPointUnreachable {
                    name: cp.label(i),
                    reason: "every stitch edge crosses the shoreline buffer".into(),
                });
            }

            index.insert(id.0, cp.position);
            debug!("control point {} inserted as {} with {} stitches", cp.label(i), id, stitched);
            control_vertices.push(id);
        }

        Ok(control_vertices)
    }

    fn try_add_edge(
        &self,
        vertices: &[MeshVertex],
        adjacency: &mut [Vec<MeshEdge>],
        from: VertexId,
        to: VertexId,
    ) -> Result<bool> {
        if from == to {
            return Ok(false);
        }
        if adjacency[from.index()].iter().any(|e| e.to == to) {
            return Ok(false);
        }

        let a = &vertices[from.index()].position;
        let b = &vertices[to.index()].position;
        if self
            .geometry
            .segment_crosses_land(a, b, &self.params.shoreline_avoid())
            .map_err(Error::GeometryUnavailable)?
        {
            return Ok(false);
        }

        let (distance, bearing) = self.algorithm.distance_and_heading_to(a, b);
        adjacency[from.index()].push(MeshEdge { to, distance, bearing });
        adjacency[to.index()].push(MeshEdge {
            to: from,
            distance,
            bearing: self.algorithm.heading_to(b, a),
        });
        Ok(true)
    }

    /// k-nearest within the tier plus a guaranteed link into each adjacent
    /// tier within the coarser tier's spacing.
    fn connect(
        &self,
        vertices: &[MeshVertex],
        adjacency: &mut [Vec<MeshEdge>],
        index: &CellIndex,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut seen = HashSet::new();

        for v in vertices {
            if !v.is_navigable {
                continue;
            }
            if v.id.0 % 4096 == 0 && cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // The index folds distance ties at the k-th rank in already.
            let same_tier = index.nearest(&v.position, v.tier.k_edges(), |id| {
                id != v.id.0 && vertices[id as usize].tier == v.tier
            });
            for (n, _) in &same_tier {
                if seen.insert((v.id.0.min(*n), v.id.0.max(*n))) {
                    self.try_add_edge(vertices, adjacency, v.id, VertexId(*n))?;
                }
            }

            for adjacent in v.tier.adjacent() {
                let reach = self.params.spacing(v.tier.max(*adjacent));
                let hits = index.within_radius(&v.position, &reach, |id| {
                    id != v.id.0 && vertices[id as usize].tier == *adjacent
                });
                if let Some((n, _)) = hits.first() {
                    if seen.insert((v.id.0.min(*n), v.id.0.max(*n))) {
                        self.try_add_edge(vertices, adjacency, v.id, VertexId(*n))?;
                    }
                }
            }
        }

        Ok(())
    }

    /// BFS from the start control vertex; every control vertex must be in
    /// the same sea basin.
    fn prove_connected(
        &self,
        vertices: &[MeshVertex],
        adjacency: &[Vec<MeshEdge>],
        control_vertices: &[VertexId],
    ) -> Result<()> {
        let mut visited = vec![false; vertices.len()];
        let mut queue = std::collections::VecDeque::new();
        visited[control_vertices[0].index()] = true;
        queue.push_back(control_vertices[0]);

        while let Some(v) = queue.pop_front() {
            for e in &adjacency[v.index()] {
                if !visited[e.to.index()] {
                    visited[e.to.index()] = true;
                    queue.push_back(e.to);
                }
            }
        }

        for (i, cv) in control_vertices.iter().enumerate().skip(1) {
            if !visited[cv.index()] {
                let cps = self.course.control_points();
                return Err(Error::DisconnectedControlPoints {
                    from: cps[0].label(0),
                    to: cps[i].label(i),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::ControlPoint;
    use crate::land::{CircularIsland, OpenSea};

    fn small_params() -> MeshParams {
        MeshParams {
            corridor_nm: 0.5,
            ring1_m: 150.0,
            ring2_m: 400.0,
            ring3_m: 800.0,
            area1_m2: 10_000.0,
            area2_m2: 40_000.0,
            area3_m2: 160_000.0,
            shoreline_avoid_m: 50.0,
            max_weather_points: 5,
            weather_grid_km: 1.0,
        }
    }

    fn two_point_course() -> Course {
        Course::new(vec![
            ControlPoint::start((54.50, 18.50)),
            ControlPoint::finish((54.55, 18.50)),
        ])
        .unwrap()
    }

    #[test]
    fn builds_connected_open_sea_mesh() {
        let course = two_point_course();
        let builder = MeshBuilder::new(&course, small_params(), &OpenSea);
        let mesh = builder.build(&CancellationToken::new()).unwrap();

        assert_eq!(mesh.control_vertices().len(), 2);
        for cv in mesh.control_vertices() {
            assert!(mesh.vertex(*cv).is_navigable);
            assert!(!mesh.edges_from(*cv).is_empty());
        }
        // Average degree within the expected band.
        let navigable = mesh.vertices().iter().filter(|v| v.is_navigable).count();
        let degree = mesh.edge_count() as f64 / navigable as f64;
        assert!(degree >= 4.0 && degree <= 20.0, "degree {degree}");
    }

    #[test]
    fn deterministic_for_frozen_geometry() {
        let course = two_point_course();
        let a = MeshBuilder::new(&course, small_params(), &OpenSea)
            .build(&CancellationToken::new())
            .unwrap();
        let b = MeshBuilder::new(&course, small_params(), &OpenSea)
            .build(&CancellationToken::new())
            .unwrap();
        assert_eq!(a.to_wire_json().unwrap(), b.to_wire_json().unwrap());
    }

    #[test]
    fn tiers_get_finer_near_control_points() {
        let course = two_point_course();
        let mesh = MeshBuilder::new(&course, small_params(), &OpenSea)
            .build(&CancellationToken::new())
            .unwrap();

        let fine = mesh.vertices().iter().filter(|v| v.tier == Tier::Fine).count();
        let coarse = mesh.vertices().iter().filter(|v| v.tier == Tier::Coarse).count();
        assert!(fine > 0, "no fine vertices around control points");
        assert!(coarse > 0, "no coarse open-sea vertices");

        let start = course.control_points()[0].position;
        for v in mesh.vertices().iter().filter(|v| v.tier == Tier::Fine) {
            let near_any = course
                .control_points()
                .iter()
                .any(|cp| Spherical {}.distance_to(&v.position, &cp.position).m() <= 150.0 + 1.0);
            assert!(near_any, "fine vertex {} far from every control point (start {start})", v.id);
        }
    }

    #[test]
    fn control_point_on_land_fails_early() {
        let island = CircularIsland {
            center: Coords::new(54.55, 18.50),
            radius: Distance::from_m(1500.0),
        };
        let course = two_point_course();
        let err = MeshBuilder::new(&course, small_params(), &island)
            .build(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::ControlPointUnreachable { .. }), "got {err:?}");
    }

    #[test]
    fn edges_stay_clear_of_land() {
        let island = CircularIsland {
            center: Coords::new(54.525, 18.50),
            radius: Distance::from_m(400.0),
        };
        let course = two_point_course();
        let mesh = MeshBuilder::new(&course, small_params(), &island)
            .build(&CancellationToken::new())
            .unwrap();

        for v in mesh.vertices() {
            if !v.is_navigable {
                continue;
            }
            for e in mesh.edges_from(v.id) {
                let mid = Spherical {}.midpoint(&v.position, &mesh.vertex(e.to).position);
                let clearance = island.distance_to_land(&mid).unwrap();
                assert!(
                    clearance.m() >= 50.0,
                    "edge {}->{} midpoint only {} from land",
                    v.id,
                    e.to,
                    clearance
                );
            }
        }
    }

    #[test]
    fn cancellation_aborts_build() {
        let course = two_point_course();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = MeshBuilder::new(&course, small_params(), &OpenSea)
            .build(&cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
