// Intensity grid storage
// Row-major per-cell values indexed (electrode_row = tx, electrode_column = rx)

use serde::Serialize;

use crate::config::Geometry;
use crate::input::DecodedRow;

/// Raw readings and baseline-adjusted values for every electrode cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntensityGrid {
    geometry: Geometry,

    /// Latest reading per cell
    raw: Vec<u32>,

    /// Baseline-subtracted (and possibly autogained) value per cell, pre-remap
    adjusted: Vec<i32>,
}

impl IntensityGrid {
    pub fn new(geometry: Geometry) -> Self {
        IntensityGrid {
            geometry,
            raw: vec![0; geometry.cells()],
            adjusted: vec![0; geometry.cells()],
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Flat index of a cell
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.geometry.rx + col
    }

    /// Write a decoded row into the raw grid
    /// Returns false (and leaves the grid untouched) when the row index is out of range.
    pub fn fold_row(&mut self, row: &DecodedRow) -> bool {
        if row.row_index >= self.geometry.tx || row.values.len() != self.geometry.rx {
            return false;
        }
        let start = self.index(row.row_index, 0);
        self.raw[start..start + self.geometry.rx].copy_from_slice(&row.values);
        true
    }

    pub fn raw(&self, row: usize, col: usize) -> u32 {
        self.raw[self.index(row, col)]
    }

    pub fn adjusted(&self, row: usize, col: usize) -> i32 {
        self.adjusted[self.index(row, col)]
    }

    pub fn raw_values(&self) -> &[u32] {
        &self.raw
    }

    pub fn adjusted_values(&self) -> &[i32] {
        &self.adjusted
    }

    /// Raw values and a mutable view of adjusted values, for the adjuster
    pub fn split_for_adjust(&mut self) -> (&[u32], &mut [i32]) {
        (&self.raw, &mut self.adjusted)
    }

    /// Raw values as nested rows
    pub fn raw_rows(&self) -> Vec<Vec<u32>> {
        self.raw.chunks(self.geometry.rx).map(|r| r.to_vec()).collect()
    }

    /// Adjusted values as nested rows
    pub fn adjusted_rows(&self) -> Vec<Vec<i32>> {
        self.adjusted
            .chunks(self.geometry.rx)
            .map(|r| r.to_vec())
            .collect()
    }

    /// Zero every cell
    pub fn reset(&mut self) {
        self.raw.iter_mut().for_each(|v| *v = 0);
        self.adjusted.iter_mut().for_each(|v| *v = 0);
    }
}

/// Remapped output intensities, one per cell, width = rx and height = tx
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PixelBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<i32>,
}

impl PixelBuffer {
    pub fn new(geometry: Geometry) -> Self {
        PixelBuffer {
            width: geometry.rx,
            height: geometry.tx,
            data: vec![0; geometry.cells()],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> i32 {
        self.data[y * self.width + x]
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_index: usize, values: &[u32]) -> DecodedRow {
        DecodedRow {
            row_index,
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_fold_row_row_major() {
        let mut grid = IntensityGrid::new(Geometry::new(2, 3));
        assert!(grid.fold_row(&row(1, &[7, 8, 9])));

        assert_eq!(grid.raw(1, 0), 7);
        assert_eq!(grid.raw(1, 2), 9);
        assert_eq!(grid.raw(0, 0), 0);
        assert_eq!(grid.raw_values(), &[0, 0, 0, 7, 8, 9]);
        assert_eq!(grid.raw_rows(), vec![vec![0, 0, 0], vec![7, 8, 9]]);
    }

    #[test]
    fn test_fold_row_out_of_range_is_ignored() {
        let mut grid = IntensityGrid::new(Geometry::new(2, 2));
        assert!(!grid.fold_row(&row(2, &[1, 1])));
        assert!(!grid.fold_row(&row(0, &[1, 1, 1])));
        assert!(grid.raw_values().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_non_square_indexing() {
        // 3 transmit rows, 2 receive columns
        let mut grid = IntensityGrid::new(Geometry::new(3, 2));
        grid.fold_row(&row(2, &[5, 6]));
        assert_eq!(grid.index(2, 1), 5);
        assert_eq!(grid.raw(2, 1), 6);
    }

    #[test]
    fn test_reset() {
        let mut grid = IntensityGrid::new(Geometry::new(1, 2));
        grid.fold_row(&row(0, &[3, 4]));
        grid.split_for_adjust().1[0] = 9;
        grid.reset();
        assert_eq!(grid.raw_values(), &[0, 0]);
        assert_eq!(grid.adjusted_values(), &[0, 0]);
    }

    #[test]
    fn test_pixel_buffer_dimensions() {
        let mut pixels = PixelBuffer::new(Geometry::new(2, 3));
        assert_eq!(pixels.width, 3);
        assert_eq!(pixels.height, 2);
        pixels.data[4] = 200;
        assert_eq!(pixels.get(1, 1), 200);
    }
}
