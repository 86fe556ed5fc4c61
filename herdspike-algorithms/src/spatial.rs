//! Spatial indexing for efficient neighbor lookup.
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;

/// Uniform grid over the plane for radius queries.
///
/// Points are bucketed by `floor(coordinate / cell_size)`; with
/// `cell_size >= radius`, every point within `radius` of a query lies in the
/// 3x3 block of cells around it.
#[derive(Debug, Default)]
pub struct SpatialGrid<T> {
    cell_size: f64,
    cells: HashMap<(i64, i64), Vec<T>>,
}

impl<T> SpatialGrid<T> {
    /// Create a new spatial grid.
    ///
    /// # Panics
    /// Panics if `cell_size` is not strictly positive.
    #[must_use]
    pub fn new(cell_size: f64) -> Self {
        assert!(cell_size > 0.0, "cell size must be positive");
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    #[must_use]
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Clear all data.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Insert a value at the given coordinates.
    pub fn insert(&mut self, x: f64, y: f64, value: T) {
        let cell = self.cell_of(x, y);
        self.cells.entry(cell).or_default().push(value);
    }

    /// Query the 3x3 neighborhood around a point.
    pub fn query_neighborhood(&self, x: f64, y: f64) -> impl Iterator<Item = &T> + '_ {
        let (cx, cy) = self.cell_of(x, y);
        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (cx + dx, cy + dy)))
            .filter_map(move |cell| self.cells.get(&cell))
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spatial_grid() {
        let mut grid: SpatialGrid<usize> = SpatialGrid::new(32.0);
        grid.insert(100.0, 100.0, 0);
        grid.insert(105.0, 105.0, 1);
        grid.insert(300.0, 300.0, 2);

        let neighbors: Vec<usize> = grid.query_neighborhood(100.0, 100.0).copied().collect();
        assert!(neighbors.contains(&0));
        assert!(neighbors.contains(&1));
        assert!(!neighbors.contains(&2));
    }

    #[test]
    fn test_negative_coordinates() {
        let mut grid: SpatialGrid<usize> = SpatialGrid::new(1.0);
        grid.insert(-0.5, -0.5, 0);
        grid.insert(0.5, 0.5, 1);
        grid.insert(-2.5, 0.0, 2);

        let neighbors: Vec<usize> = grid.query_neighborhood(-0.1, 0.1).copied().collect();
        assert!(neighbors.contains(&0));
        assert!(neighbors.contains(&1));
        assert!(!neighbors.contains(&2));
    }
}
