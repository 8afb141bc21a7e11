use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// A seed tile indexed by its integer tile coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedTile {
    pub x: i64,
    pub y: i64,
}

impl SeedTile {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    fn as_point(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

// --- rstar integration -------------------------------------------------------------------------

impl RTreeObject for SeedTile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.as_point())
    }
}

impl PointDistance for SeedTile {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x as f64 - point[0];
        let dy = self.y as f64 - point[1];
        dx * dx + dy * dy
    }
}

/// R-tree over seed tiles answering nearest-seed queries in tile units
pub struct SeedIndex {
    rtree: RTree<SeedTile>,
}

impl SeedIndex {
    /// Bulk loads the index; faster than inserting one seed at a time
    pub fn new(seeds: Vec<SeedTile>) -> Self {
        Self {
            rtree: RTree::bulk_load(seeds),
        }
    }

    /// Nearest seed to tile `(x, y)`, if any
    pub fn nearest(&self, x: i64, y: i64) -> Option<&SeedTile> {
        self.rtree.nearest_neighbor(&[x as f64, y as f64])
    }

    /// Euclidean distance in tiles from `(x, y)` to its nearest seed
    pub fn nearest_distance(&self, x: i64, y: i64) -> Option<f64> {
        self.nearest(x, y)
            .map(|seed| seed.distance_2(&[x as f64, y as f64]).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_seed() {
        let index = SeedIndex::new(vec![SeedTile::new(0, 0), SeedTile::new(10, 10)]);
        assert_eq!(index.nearest(2, 1), Some(&SeedTile::new(0, 0)));
        assert_eq!(index.nearest(8, 9), Some(&SeedTile::new(10, 10)));
        assert_eq!(index.nearest_distance(3, 4), Some(5.0));
    }

    #[test]
    fn test_empty_index_has_no_neighbour() {
        let index = SeedIndex::new(Vec::new());
        assert_eq!(index.nearest(0, 0), None);
    }

}
