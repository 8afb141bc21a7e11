use crate::core::geo::Point;
use serde::{Deserialize, Serialize};

/// A bounding box in projected (EPSG:3857) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Creates an extent from individual coordinates
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Creates an extent from an `[min_x, min_y, max_x, max_y]` array
    pub fn from_array(coords: [f64; 4]) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    /// Gets the width of the extent
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Gets the height of the extent
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Gets the center point of the extent
    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Checks if the extent contains a point (edges inclusive)
    pub fn contains(&self, point: &Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    /// Checks if this extent fully contains another
    pub fn contains_extent(&self, other: &Extent) -> bool {
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Checks if the extents intersect
    pub fn intersects(&self, other: &Extent) -> bool {
        !(other.max_x < self.min_x
            || other.min_x > self.max_x
            || other.max_y < self.min_y
            || other.min_y > self.max_y)
    }

    /// Gets the intersection of two extents
    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        if !self.intersects(other) {
            return None;
        }

        Some(Extent::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    /// Returns the smallest extent covering both
    pub fn union(&self, other: &Extent) -> Extent {
        Extent::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Extends the extent to include a point
    pub fn extend(&mut self, point: &Point) {
        self.min_x = self.min_x.min(point.x);
        self.min_y = self.min_y.min(point.y);
        self.max_x = self.max_x.max(point.x);
        self.max_y = self.max_y.max(point.y);
    }

    /// Checks if the extent is valid (min <= max)
    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    /// Creates an empty extent (invalid bounds that can be extended)
    pub fn empty() -> Self {
        Self::new(
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
        )
    }
}

impl From<geo_types::Rect<f64>> for Extent {
    fn from(rect: geo_types::Rect<f64>) -> Self {
        Extent::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_creation() {
        let extent = Extent::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(extent.width(), 20.0);
        assert_eq!(extent.height(), 20.0);
        assert_eq!(extent.center(), Point::new(20.0, 30.0));
    }

    #[test]
    fn test_extent_intersection() {
        let a = Extent::new(0.0, 0.0, 10.0, 10.0);
        let b = Extent::new(5.0, 5.0, 15.0, 15.0);

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection, Extent::new(5.0, 5.0, 10.0, 10.0));
        assert!(Extent::new(0.0, 0.0, 5.0, 5.0)
            .intersection(&Extent::new(10.0, 10.0, 15.0, 15.0))
            .is_none());
    }

    #[test]
    fn test_empty_extent_extends() {
        let mut extent = Extent::empty();
        assert!(!extent.is_valid());
        extent.extend(&Point::new(1.0, 2.0));
        extent.extend(&Point::new(-1.0, 4.0));
        assert_eq!(extent, Extent::new(-1.0, 2.0, 1.0, 4.0));
    }
}
