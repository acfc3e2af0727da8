//! Tiling of matrices and vectors onto fixed-size encoding units.
//!
//! All three layouts derive from one convention, which the reduction
//! primitives depend on bit-for-bit:
//!
//! - a matrix is chopped row-major into `unit.height x unit.width` tiles,
//!   zero-padding the last tile row/column;
//! - a row vector is conceptually transposed into a column, tiled down the
//!   unit rows in chunks of `unit.height`, and each chunk is replicated
//!   across all `unit.width` columns;
//! - a column vector is tiled across the unit columns in chunks of
//!   `unit.width`, and each chunk is replicated down all `unit.height` rows.
//!
//! Decoding trims the zero padding away, so encode/decode round-trips are
//! exact.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An immutable power-of-two tile shape. The product of the dimensions
/// always equals the slot count of the instance that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingUnit {
	height: usize,
	width: usize,
}

impl EncodingUnit {
	pub(crate) fn new(height: usize, width: usize) -> Result<Self> {
		if !height.is_power_of_two() || !width.is_power_of_two() {
			return Err(Error::invalid_argument(format!(
				"encoding unit dimensions must be powers of two, got {height}x{width}"
			)));
		}
		Ok(Self { height, width })
	}

	pub fn height(&self) -> usize {
		self.height
	}

	pub fn width(&self) -> usize {
		self.width
	}

	/// Number of slots a single tile covers.
	pub fn slots(&self) -> usize {
		self.height * self.width
	}

	/// The unit with its dimensions swapped.
	pub fn transpose(&self) -> EncodingUnit {
		EncodingUnit {
			height: self.width,
			width: self.height,
		}
	}
}

pub(crate) fn div_ceil(a: usize, b: usize) -> usize {
	(a + b - 1) / b
}

/// Tiles a matrix into a grid of slot arrays.
pub(crate) fn encode_matrix(mat: &DMatrix<f64>, unit: EncodingUnit) -> Vec<Vec<Vec<f64>>> {
	let (uh, uw) = (unit.height, unit.width);
	let grid_rows = div_ceil(mat.nrows(), uh);
	let grid_cols = div_ceil(mat.ncols(), uw);
	let mut grid = Vec::with_capacity(grid_rows);
	for i in 0..grid_rows {
		let mut row = Vec::with_capacity(grid_cols);
		for j in 0..grid_cols {
			let mut slots = vec![0.0; unit.slots()];
			for r in 0..uh {
				for c in 0..uw {
					let (mr, mc) = (i * uh + r, j * uw + c);
					if mr < mat.nrows() && mc < mat.ncols() {
						slots[r * uw + c] = mat[(mr, mc)];
					}
				}
			}
			row.push(slots);
		}
		grid.push(row);
	}
	grid
}

/// Inverse of [encode_matrix], trimmed to `height x width`.
pub(crate) fn decode_matrix(
	grid: &[Vec<Vec<f64>>],
	unit: EncodingUnit,
	height: usize,
	width: usize,
) -> DMatrix<f64> {
	let (uh, uw) = (unit.height, unit.width);
	DMatrix::from_fn(height, width, |r, c| grid[r / uh][c / uw][(r % uh) * uw + (c % uw)])
}

/// Tiles a row vector down the unit rows, replicating across columns.
pub(crate) fn encode_row_vector(vec: &DVector<f64>, unit: EncodingUnit) -> Vec<Vec<f64>> {
	let (uh, uw) = (unit.height, unit.width);
	let pieces = div_ceil(vec.len(), uh);
	(0..pieces)
		.map(|q| {
			let mut slots = vec![0.0; unit.slots()];
			for r in 0..uh {
				if q * uh + r < vec.len() {
					let value = vec[q * uh + r];
					for c in 0..uw {
						slots[r * uw + c] = value;
					}
				}
			}
			slots
		})
		.collect()
}

/// Inverse of [encode_row_vector], trimmed to `width` values.
pub(crate) fn decode_row_vector(
	pieces: &[Vec<f64>],
	unit: EncodingUnit,
	width: usize,
) -> DVector<f64> {
	let (uh, uw) = (unit.height, unit.width);
	DVector::from_fn(width, |i, _| pieces[i / uh][(i % uh) * uw])
}

/// Tiles a column vector across the unit columns, replicating down rows.
pub(crate) fn encode_col_vector(vec: &DVector<f64>, unit: EncodingUnit) -> Vec<Vec<f64>> {
	let (uh, uw) = (unit.height, unit.width);
	let pieces = div_ceil(vec.len(), uw);
	(0..pieces)
		.map(|q| {
			let mut slots = vec![0.0; unit.slots()];
			for c in 0..uw {
				if q * uw + c < vec.len() {
					let value = vec[q * uw + c];
					for r in 0..uh {
						slots[r * uw + c] = value;
					}
				}
			}
			slots
		})
		.collect()
}

/// Inverse of [encode_col_vector], trimmed to `height` values.
pub(crate) fn decode_col_vector(
	pieces: &[Vec<f64>],
	unit: EncodingUnit,
	height: usize,
) -> DVector<f64> {
	let uw = unit.width;
	DVector::from_fn(height, |i, _| pieces[i / uw][i % uw])
}

/// Mask that keeps one unit column, scaled by `value`.
pub(crate) fn unit_column_mask(unit: EncodingUnit, col: usize, value: f64) -> Vec<f64> {
	let mut slots = vec![0.0; unit.slots()];
	for r in 0..unit.height {
		slots[r * unit.width + col] = value;
	}
	slots
}

/// Mask that keeps one unit row, scaled by `value`.
pub(crate) fn unit_row_mask(unit: EncodingUnit, row: usize, value: f64) -> Vec<f64> {
	let mut slots = vec![0.0; unit.slots()];
	for c in 0..unit.width {
		slots[row * unit.width + c] = value;
	}
	slots
}

#[cfg(test)]
mod tests {
	use super::*;

	fn unit(h: usize, w: usize) -> EncodingUnit {
		EncodingUnit::new(h, w).unwrap()
	}

	#[test]
	fn unit_dimensions_must_be_powers_of_two() {
		assert!(EncodingUnit::new(64, 64).is_ok());
		assert!(EncodingUnit::new(3, 64).is_err());
		assert_eq!(unit(4, 16).transpose(), unit(16, 4));
	}

	#[test]
	fn matrix_round_trip_with_padding() {
		let unit = unit(4, 8);
		let mat = DMatrix::from_fn(7, 19, |r, c| (r * 31 + c) as f64 - 50.0);
		let grid = encode_matrix(&mat, unit);
		assert_eq!(grid.len(), 2);
		assert_eq!(grid[0].len(), 3);
		assert_eq!(decode_matrix(&grid, unit, 7, 19), mat);
		// padding is zero
		assert_eq!(grid[1][2][3 * 8 + 7], 0.0);
	}

	#[test]
	fn row_vector_replicates_across_columns() {
		let unit = unit(4, 8);
		let vec = DVector::from_fn(6, |i, _| i as f64 + 1.0);
		let pieces = encode_row_vector(&vec, unit);
		assert_eq!(pieces.len(), 2);
		// piece 0, row 2 holds vec[2] in every column
		for c in 0..8 {
			assert_eq!(pieces[0][2 * 8 + c], 3.0);
		}
		// final chunk is zero padded
		for c in 0..8 {
			assert_eq!(pieces[1][3 * 8 + c], 0.0);
		}
		assert_eq!(decode_row_vector(&pieces, unit, 6), vec);
	}

	#[test]
	fn col_vector_replicates_down_rows() {
		let unit = unit(4, 8);
		let vec = DVector::from_fn(11, |i, _| (i * i) as f64);
		let pieces = encode_col_vector(&vec, unit);
		assert_eq!(pieces.len(), 2);
		for r in 0..4 {
			assert_eq!(pieces[0][r * 8 + 5], 25.0);
			assert_eq!(pieces[1][r * 8 + 2], 100.0);
			assert_eq!(pieces[1][r * 8 + 7], 0.0);
		}
		assert_eq!(decode_col_vector(&pieces, unit, 11), vec);
	}

	#[test]
	fn masks_select_a_single_line() {
		let unit = unit(4, 8);
		let col = unit_column_mask(unit, 0, 2.5);
		assert_eq!(col[0], 2.5);
		assert_eq!(col[8], 2.5);
		assert_eq!(col[1], 0.0);
		let row = unit_row_mask(unit, 1, 1.0);
		assert_eq!(row[8], 1.0);
		assert_eq!(row[15], 1.0);
		assert_eq!(row[16], 0.0);
	}
}
