use std::collections::HashMap;

use crate::algorithm::spherical::Spherical;
use crate::algorithm::{Algorithm, METERS_PER_DEG};
use crate::position::Coords;
use crate::utils::Distance;

/// Bucketed lat/lon grid for nearest-vertex queries. Cells are square in
/// latitude degrees; the ring search widens until no closer candidate can
/// exist, so longitude squeeze at high latitudes cannot drop a true
/// neighbor.
#[derive(Clone, Debug)]
pub(crate) struct CellIndex {
    cell_deg: f64,
    cells: HashMap<(i32, i32), Vec<(u32, Coords)>>,
    lat_bounds: (i32, i32),
    lon_bounds: (i32, i32),
}

impl CellIndex {
    pub(crate) fn new(cell_deg: f64) -> Self {
        CellIndex {
            cell_deg: cell_deg.max(1e-6),
            cells: HashMap::new(),
            lat_bounds: (i32::MAX, i32::MIN),
            lon_bounds: (i32::MAX, i32::MIN),
        }
    }

    fn key(&self, position: &Coords) -> (i32, i32) {
        (
            (position.lat / self.cell_deg).floor() as i32,
            (position.lon / self.cell_deg).floor() as i32,
        )
    }

    pub(crate) fn insert(&mut self, id: u32, position: Coords) {
        let key = self.key(&position);
        self.lat_bounds = (self.lat_bounds.0.min(key.0), self.lat_bounds.1.max(key.0));
        self.lon_bounds = (self.lon_bounds.0.min(key.1), self.lon_bounds.1.max(key.1));
        self.cells.entry(key).or_default().push((id, position));
    }

    fn max_ring(&self, center: (i32, i32)) -> i32 {
        let lat_reach = (center.0 - self.lat_bounds.0).abs().max((self.lat_bounds.1 - center.0).abs());
        let lon_reach = (center.1 - self.lon_bounds.0).abs().max((self.lon_bounds.1 - center.1).abs());
        lat_reach.max(lon_reach) + 1
    }

    fn ring_cells(&self, center: (i32, i32), r: i32) -> Vec<&Vec<(u32, Coords)>> {
        let mut out = Vec::new();
        if r == 0 {
            if let Some(cell) = self.cells.get(&center) {
                out.push(cell);
            }
            return out;
        }
        for dy in -r..=r {
            for dx in -r..=r {
                if dy.abs() != r && dx.abs() != r {
                    continue;
                }
                if let Some(cell) = self.cells.get(&(center.0 + dy, center.1 + dx)) {
                    out.push(cell);
                }
            }
        }
        out
    }

    /// The k nearest entries passing `filter`, ascending by distance with
    /// ties included beyond k when they match the k-th distance exactly.
    pub(crate) fn nearest(
        &self,
        position: &Coords,
        k: usize,
        filter: impl Fn(u32) -> bool,
    ) -> Vec<(u32, Distance)> {
        if k == 0 || self.cells.is_empty() {
            return Vec::new();
        }

        let algorithm = Spherical {};
        let center = self.key(position);
        let max_ring = self.max_ring(center);
        // Narrowest metric extent of one cell at this latitude.
        let cell_m = self.cell_deg * METERS_PER_DEG * position.lat.to_radians().cos().abs().max(0.05);

        let mut found: Vec<(u32, Distance)> = Vec::new();
        let mut r = 0;
        while r <= max_ring {
            for cell in self.ring_cells(center, r) {
                for (id, pos) in cell {
                    if !filter(*id) {
                        continue;
                    }
                    found.push((*id, algorithm.distance_to(position, pos)));
                }
            }

            if found.len() >= k {
                found.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
                let kth = found[k - 1].1;
                // No unexplored ring can hold anything closer than this.
                if ((r) as f64) * cell_m > kth.m() {
                    break;
                }
            }
            r += 1;
        }

        found.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        let mut cut = found.len().min(k);
        while cut < found.len() && found[cut].1 == found[k - 1].1 {
            cut += 1;
        }
        found.truncate(cut);
        found
    }

    /// All entries within `radius`, ascending by distance.
    pub(crate) fn within_radius(
        &self,
        position: &Coords,
        radius: &Distance,
        filter: impl Fn(u32) -> bool,
    ) -> Vec<(u32, Distance)> {
        if self.cells.is_empty() {
            return Vec::new();
        }

        let algorithm = Spherical {};
        let center = self.key(position);
        let cell_m = self.cell_deg * METERS_PER_DEG * position.lat.to_radians().cos().abs().max(0.05);
        let reach = ((radius.m() / cell_m).ceil() as i32 + 1).min(self.max_ring(center));

        let mut found = Vec::new();
        for r in 0..=reach {
            for cell in self.ring_cells(center, r) {
                for (id, pos) in cell {
                    if !filter(*id) {
                        continue;
                    }
                    let d = algorithm.distance_to(position, pos);
                    if d <= *radius {
                        found.push((*id, d));
                    }
                }
            }
        }

        found.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_index() -> CellIndex {
        // 5x5 grid of points spaced ~0.01 degrees.
        let mut index = CellIndex::new(0.02);
        let mut id = 0;
        for i in 0..5 {
            for j in 0..5 {
                index.insert(id, Coords::new(54.0 + i as f64 * 0.01, 18.0 + j as f64 * 0.01));
                id += 1;
            }
        }
        index
    }

    #[test]
    fn nearest_finds_the_closest() {
        let index = grid_index();
        let hits = index.nearest(&Coords::new(54.021, 18.021), 1, |_| true);
        // Closest grid point is (54.02, 18.02) = id 12.
        assert_eq!(hits[0].0, 12);
    }

    #[test]
    fn nearest_respects_filter_across_cells() {
        let index = grid_index();
        let hits = index.nearest(&Coords::new(54.0, 18.0), 3, |id| id >= 20);
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|(id, _)| *id >= 20));
    }

    #[test]
    fn nearest_k_covers_neighbors() {
        let index = grid_index();
        let hits = index.nearest(&Coords::new(54.02, 18.02), 5, |_| true);
        assert_eq!(hits[0].0, 12);
        assert!(hits.len() >= 5);
        // The four orthogonal neighbors come before any diagonal.
        let next: Vec<u32> = hits[1..5].iter().map(|(id, _)| *id).collect();
        for expected in [7, 11, 13, 17] {
            assert!(next.contains(&expected), "missing {expected} in {next:?}");
        }
    }

    #[test]
    fn within_radius_bounds() {
        let index = grid_index();
        // ~0.01 deg of latitude is 1111 m.
        let hits = index.within_radius(&Coords::new(54.02, 18.02), &Distance::from_m(1200.0), |_| true);
        let ids: Vec<u32> = hits.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&12));
        assert!(ids.contains(&7) && ids.contains(&17) && ids.contains(&11) && ids.contains(&13));
        assert!(!ids.contains(&0), "corner point is ~3km away");
    }
}
