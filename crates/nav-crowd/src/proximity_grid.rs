//! Proximity grid for neighbour queries in crowd simulation
//!
//! Items are registered by their xz bounds every simulation step, so the
//! grid is cleared and rebuilt instead of tracking moves. A query only
//! touches the cells overlapped by the query rectangle.

use std::collections::HashMap;

/// Default cell size for the proximity grid (in world units)
pub const DEFAULT_CELL_SIZE: f32 = 4.0;

/// Grid cell coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GridCoord {
    x: i32,
    y: i32,
}

impl GridCoord {
    fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Spatial hash of item ids by the cells their bounds touch
#[derive(Debug, Clone)]
pub struct ProximityGrid {
    cell_size: f32,
    inv_cell_size: f32,
    cells: HashMap<GridCoord, Vec<usize>>,
    /// Touched cell range as `[min_x, min_y, max_x, max_y]`
    bounds: [i32; 4],
}

impl Default for ProximityGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl ProximityGrid {
    /// Creates a new proximity grid
    pub fn new(cell_size: f32) -> Self {
        // Minimum cell size to avoid division by zero
        let cell_size = if cell_size.is_finite() { cell_size.max(0.01) } else { DEFAULT_CELL_SIZE };
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
            bounds: [i32::MAX, i32::MAX, i32::MIN, i32::MIN],
        }
    }

    /// Removes every item from the grid
    pub fn clear(&mut self) {
        // Keep the cell allocations for the next rebuild
        for items in self.cells.values_mut() {
            items.clear();
        }
        self.bounds = [i32::MAX, i32::MAX, i32::MIN, i32::MIN];
    }

    fn to_cell(&self, v: f32) -> i32 {
        (v * self.inv_cell_size).floor() as i32
    }

    /// Registers `id` in every cell overlapped by the rectangle
    /// `[min_x, max_x] x [min_y, max_y]`
    pub fn add_item(&mut self, id: usize, min_x: f32, min_y: f32, max_x: f32, max_y: f32) {
        let iminx = self.to_cell(min_x);
        let iminy = self.to_cell(min_y);
        let imaxx = self.to_cell(max_x);
        let imaxy = self.to_cell(max_y);

        self.bounds[0] = self.bounds[0].min(iminx);
        self.bounds[1] = self.bounds[1].min(iminy);
        self.bounds[2] = self.bounds[2].max(imaxx);
        self.bounds[3] = self.bounds[3].max(imaxy);

        for y in iminy..=imaxy {
            for x in iminx..=imaxx {
                self.cells.entry(GridCoord::new(x, y)).or_default().push(id);
            }
        }
    }

    /// Returns up to `max_items` distinct ids whose cells overlap the query
    /// rectangle
    pub fn query_items(
        &self,
        min_x: f32,
        min_y: f32,
        max_x: f32,
        max_y: f32,
        max_items: usize,
    ) -> Vec<usize> {
        // Cells outside the touched range are empty
        let iminx = self.to_cell(min_x).max(self.bounds[0]);
        let iminy = self.to_cell(min_y).max(self.bounds[1]);
        let imaxx = self.to_cell(max_x).min(self.bounds[2]);
        let imaxy = self.to_cell(max_y).min(self.bounds[3]);

        let mut result = Vec::new();
        for y in iminy..=imaxy {
            for x in iminx..=imaxx {
                let Some(items) = self.cells.get(&GridCoord::new(x, y)) else {
                    continue;
                };
                for &id in items {
                    if result.contains(&id) {
                        continue;
                    }
                    if result.len() >= max_items {
                        return result;
                    }
                    result.push(id);
                }
            }
        }
        result
    }

    /// Number of items registered in cell `(x, y)`
    pub fn item_count_at(&self, x: i32, y: i32) -> usize {
        self.cells.get(&GridCoord::new(x, y)).map_or(0, Vec::len)
    }

    /// Touched cell range as `[min_x, min_y, max_x, max_y]`; inverted when
    /// the grid is empty
    pub fn bounds(&self) -> [i32; 4] {
        self.bounds
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Returns true if no item has been added since the last clear
    pub fn is_empty(&self) -> bool {
        self.bounds[0] > self.bounds[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut grid = ProximityGrid::new(2.0);
        grid.add_item(1, 0.5, 0.5, 1.5, 1.5);
        grid.add_item(2, 2.5, 2.5, 3.5, 3.5);
        grid.add_item(3, 20.0, 20.0, 21.0, 21.0);

        let mut near = grid.query_items(0.0, 0.0, 4.0, 4.0, 16);
        near.sort();
        assert_eq!(near, vec![1, 2]);

        assert_eq!(grid.query_items(19.0, 19.0, 22.0, 22.0, 16), vec![3]);
        assert!(grid.query_items(-10.0, -10.0, -9.0, -9.0, 16).is_empty());
    }

    #[test]
    fn test_query_deduplicates_items_spanning_cells() {
        let mut grid = ProximityGrid::new(1.0);
        // Covers cells (0..=2, 0..=2)
        grid.add_item(7, 0.5, 0.5, 2.5, 2.5);
        assert_eq!(grid.item_count_at(1, 1), 1);

        let items = grid.query_items(0.0, 0.0, 3.0, 3.0, 16);
        assert_eq!(items, vec![7]);
    }

    #[test]
    fn test_query_respects_max_items() {
        let mut grid = ProximityGrid::new(1.0);
        for id in 0..10 {
            grid.add_item(id, 0.1, 0.1, 0.2, 0.2);
        }
        assert_eq!(grid.query_items(0.0, 0.0, 1.0, 1.0, 4).len(), 4);
    }

    #[test]
    fn test_negative_coordinates_floor() {
        let mut grid = ProximityGrid::new(2.0);
        grid.add_item(1, -1.5, -3.7, -1.0, -3.0);
        assert_eq!(grid.item_count_at(-1, -2), 1);
        assert_eq!(grid.item_count_at(0, 0), 0);
        assert_eq!(grid.bounds(), [-1, -2, -1, -2]);
    }

    #[test]
    fn test_huge_query_visits_only_touched_cells() {
        let mut grid = ProximityGrid::new(0.5);
        grid.add_item(1, 0.0, 0.0, 0.4, 0.4);
        grid.add_item(2, 3.0, 3.0, 3.4, 3.4);

        let mut all = grid.query_items(-1.0e9, -1.0e9, 1.0e9, 1.0e9, 16);
        all.sort();
        assert_eq!(all, vec![1, 2]);

        let mut unbounded = grid.query_items(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::INFINITY, f32::INFINITY, 16);
        unbounded.sort();
        assert_eq!(unbounded, vec![1, 2]);

        grid.clear();
        assert!(grid.query_items(-1.0e9, -1.0e9, 1.0e9, 1.0e9, 16).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut grid = ProximityGrid::new(2.0);
        assert!(grid.is_empty());
        grid.add_item(1, 0.0, 0.0, 5.0, 1.0);
        assert_eq!(grid.bounds(), [0, 0, 2, 0]);
        assert!(!grid.is_empty());

        grid.clear();
        assert!(grid.is_empty());
        assert_eq!(grid.item_count_at(0, 0), 0);
        assert!(grid.query_items(0.0, 0.0, 5.0, 5.0, 16).is_empty());
        assert_eq!(grid.cell_size(), 2.0);
    }
}
