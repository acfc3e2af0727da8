//! Encrypted matrices and vectors: grids of ciphertext cells plus an
//! encoding unit and logical dimensions.
//!
//! Every cell of a well-formed object carries the same level and scale; the
//! linear algebra operations validate that invariant up front and fail
//! rather than repair it.

use rayon::prelude::*;

use crate::ciphertext::CiphertextHandle;
use crate::error::{Error, Result};
use crate::linalg::encoding::{div_ceil, EncodingUnit};
use crate::util;

/// Shared behavior of the three encrypted linear algebra shapes, enough for
/// the cell-wise generic operations (addition, scaling, rescaling, level
/// maintenance).
pub trait EncryptedObject<C>: Sized + Clone
where
	C: CiphertextHandle + Send + Sync,
{
	fn unit(&self) -> EncodingUnit;

	/// Logical `(height, width)` of the object.
	fn dims(&self) -> (usize, usize);

	/// All cells, in a deterministic order.
	fn cells_flat(&self) -> Vec<&C>;

	/// Applies `f` to every cell, in parallel, producing a new object of the
	/// same shape.
	fn try_map<F>(&self, f: F) -> Result<Self>
	where
		F: Fn(&C) -> Result<C> + Send + Sync;

	/// Applies `f` to every pair of corresponding cells.
	fn try_zip_map<F>(&self, other: &Self, f: F) -> Result<Self>
	where
		F: Fn(&C, &C) -> Result<C> + Send + Sync;

	/// Checks unit and logical dimensions match.
	fn same_shape(&self, other: &Self) -> Result<()> {
		if self.unit() != other.unit() {
			return Err(Error::shape_mismatch(format!(
				"encoding units differ: {}x{} vs {}x{}",
				self.unit().height(),
				self.unit().width(),
				other.unit().height(),
				other.unit().width()
			)));
		}
		if self.dims() != other.dims() {
			return Err(Error::shape_mismatch(format!(
				"logical dimensions differ: {:?} vs {:?}",
				self.dims(),
				other.dims()
			)));
		}
		Ok(())
	}

	/// Checks every cell carries one level and one scale, and returns them.
	fn validate_uniform(&self) -> Result<(u32, f64)> {
		let cells = self.cells_flat();
		let first = cells
			.first()
			.ok_or_else(|| Error::shape_mismatch("object has no cells"))?;
		let (level, scale) = (first.level(), first.scale());
		for cell in &cells[1..] {
			if cell.level() != level {
				return Err(Error::LevelMismatch {
					left: level,
					right: cell.level(),
				});
			}
			if !util::are_close_f64(cell.scale(), scale) {
				return Err(Error::ScaleInconsistency {
					expected: scale,
					actual: cell.scale(),
					context: "cells of one encrypted object disagree on scale".into(),
				});
			}
		}
		Ok((level, scale))
	}
}

/// An encrypted `height x width` matrix tiled into unit cells.
#[derive(Debug, Clone)]
pub struct EncryptedMatrix<C> {
	pub(crate) height: usize,
	pub(crate) width: usize,
	pub(crate) unit: EncodingUnit,
	pub(crate) cells: Vec<Vec<C>>,
}

impl<C: CiphertextHandle + Send + Sync> EncryptedMatrix<C> {
	pub(crate) fn from_cells(
		height: usize,
		width: usize,
		unit: EncodingUnit,
		cells: Vec<Vec<C>>,
	) -> Result<Self> {
		if height == 0 || width == 0 {
			return Err(Error::shape_mismatch("matrix dimensions must be nonzero"));
		}
		let expected_rows = div_ceil(height, unit.height());
		let expected_cols = div_ceil(width, unit.width());
		if cells.len() != expected_rows || cells.iter().any(|row| row.len() != expected_cols) {
			return Err(Error::shape_mismatch(format!(
				"cell grid does not tile a {height}x{width} matrix with a {}x{} unit",
				unit.height(),
				unit.width()
			)));
		}
		Ok(Self {
			height,
			width,
			unit,
			cells,
		})
	}

	pub fn height(&self) -> usize {
		self.height
	}

	pub fn width(&self) -> usize {
		self.width
	}

	pub fn encoding_unit(&self) -> EncodingUnit {
		self.unit
	}

	/// Number of unit rows in the cell grid.
	pub fn unit_rows(&self) -> usize {
		self.cells.len()
	}

	/// Number of unit columns in the cell grid.
	pub fn unit_cols(&self) -> usize {
		self.cells[0].len()
	}

	pub fn cells(&self) -> &[Vec<C>] {
		&self.cells
	}

	/// Level shared by all cells.
	pub fn level(&self) -> Result<u32> {
		Ok(self.validate_uniform()?.0)
	}

	/// Scale shared by all cells.
	pub fn scale(&self) -> Result<f64> {
		Ok(self.validate_uniform()?.1)
	}

	/// Metadata-only unit transpose: swaps the stored unit. Valid only when
	/// the matrix fits inside a single cell under the swapped unit.
	pub fn transpose_unit(&self) -> Result<Self> {
		let swapped = self.unit.transpose();
		if self.unit_rows() != 1 || self.unit_cols() != 1 {
			return Err(Error::shape_mismatch(
				"unit transpose requires the object to fit in a single cell",
			));
		}
		if self.height > swapped.height() || self.width > swapped.width() {
			return Err(Error::shape_mismatch(format!(
				"a {}x{} matrix does not fit inside the swapped {}x{} unit",
				self.height,
				self.width,
				swapped.height(),
				swapped.width()
			)));
		}
		let mut cells = self.cells.clone();
		let meta = cells[0][0].meta_mut();
		meta.encoded_height = swapped.height();
		meta.encoded_width = swapped.width();
		Ok(Self {
			height: self.height,
			width: self.width,
			unit: swapped,
			cells,
		})
	}
}

impl<C: CiphertextHandle + Send + Sync> EncryptedObject<C> for EncryptedMatrix<C> {
	fn unit(&self) -> EncodingUnit {
		self.unit
	}

	fn dims(&self) -> (usize, usize) {
		(self.height, self.width)
	}

	fn cells_flat(&self) -> Vec<&C> {
		self.cells.iter().flatten().collect()
	}

	fn try_map<F>(&self, f: F) -> Result<Self>
	where
		F: Fn(&C) -> Result<C> + Send + Sync,
	{
		let cells = self
			.cells
			.par_iter()
			.map(|row| row.par_iter().map(&f).collect::<Result<Vec<_>>>())
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}

	fn try_zip_map<F>(&self, other: &Self, f: F) -> Result<Self>
	where
		F: Fn(&C, &C) -> Result<C> + Send + Sync,
	{
		let cells = self
			.cells
			.par_iter()
			.zip(other.cells.par_iter())
			.map(|(ra, rb)| {
				ra.par_iter()
					.zip(rb.par_iter())
					.map(|(a, b)| f(a, b))
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}
}

/// An encrypted row vector of logical width `width`.
#[derive(Debug, Clone)]
pub struct EncryptedRowVector<C> {
	pub(crate) width: usize,
	pub(crate) unit: EncodingUnit,
	pub(crate) cells: Vec<C>,
}

impl<C: CiphertextHandle + Send + Sync> EncryptedRowVector<C> {
	pub(crate) fn from_cells(width: usize, unit: EncodingUnit, cells: Vec<C>) -> Result<Self> {
		if width == 0 {
			return Err(Error::shape_mismatch("vector length must be nonzero"));
		}
		if cells.len() != div_ceil(width, unit.height()) {
			return Err(Error::shape_mismatch(format!(
				"{} cells cannot hold a row vector of width {width} with unit height {}",
				cells.len(),
				unit.height()
			)));
		}
		Ok(Self { width, unit, cells })
	}

	pub fn width(&self) -> usize {
		self.width
	}

	pub fn encoding_unit(&self) -> EncodingUnit {
		self.unit
	}

	pub fn cells(&self) -> &[C] {
		&self.cells
	}

	pub fn level(&self) -> Result<u32> {
		Ok(self.validate_uniform()?.0)
	}

	pub fn scale(&self) -> Result<f64> {
		Ok(self.validate_uniform()?.1)
	}

	/// Metadata-only unit transpose: swaps the stored unit. Valid only when
	/// the vector fits inside a single cell both ways.
	pub fn transpose_unit(&self) -> Result<Self> {
		transpose_unit_cells(self.width, self.unit, &self.cells).map(|(unit, cells)| Self {
			width: self.width,
			unit,
			cells,
		})
	}
}

impl<C: CiphertextHandle + Send + Sync> EncryptedObject<C> for EncryptedRowVector<C> {
	fn unit(&self) -> EncodingUnit {
		self.unit
	}

	fn dims(&self) -> (usize, usize) {
		(1, self.width)
	}

	fn cells_flat(&self) -> Vec<&C> {
		self.cells.iter().collect()
	}

	fn try_map<F>(&self, f: F) -> Result<Self>
	where
		F: Fn(&C) -> Result<C> + Send + Sync,
	{
		let cells = self.cells.par_iter().map(&f).collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}

	fn try_zip_map<F>(&self, other: &Self, f: F) -> Result<Self>
	where
		F: Fn(&C, &C) -> Result<C> + Send + Sync,
	{
		let cells = self
			.cells
			.par_iter()
			.zip(other.cells.par_iter())
			.map(|(a, b)| f(a, b))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}
}

/// An encrypted column vector of logical height `height`.
#[derive(Debug, Clone)]
pub struct EncryptedColVector<C> {
	pub(crate) height: usize,
	pub(crate) unit: EncodingUnit,
	pub(crate) cells: Vec<C>,
}

impl<C: CiphertextHandle + Send + Sync> EncryptedColVector<C> {
	pub(crate) fn from_cells(height: usize, unit: EncodingUnit, cells: Vec<C>) -> Result<Self> {
		if height == 0 {
			return Err(Error::shape_mismatch("vector length must be nonzero"));
		}
		if cells.len() != div_ceil(height, unit.width()) {
			return Err(Error::shape_mismatch(format!(
				"{} cells cannot hold a column vector of height {height} with unit width {}",
				cells.len(),
				unit.width()
			)));
		}
		Ok(Self {
			height,
			unit,
			cells,
		})
	}

	pub fn height(&self) -> usize {
		self.height
	}

	pub fn encoding_unit(&self) -> EncodingUnit {
		self.unit
	}

	pub fn cells(&self) -> &[C] {
		&self.cells
	}

	pub fn level(&self) -> Result<u32> {
		Ok(self.validate_uniform()?.0)
	}

	pub fn scale(&self) -> Result<f64> {
		Ok(self.validate_uniform()?.1)
	}

	/// Metadata-only unit transpose: swaps the stored unit. Valid only when
	/// the vector fits inside a single cell both ways.
	pub fn transpose_unit(&self) -> Result<Self> {
		transpose_unit_cells(self.height, self.unit, &self.cells).map(|(unit, cells)| Self {
			height: self.height,
			unit,
			cells,
		})
	}
}

impl<C: CiphertextHandle + Send + Sync> EncryptedObject<C> for EncryptedColVector<C> {
	fn unit(&self) -> EncodingUnit {
		self.unit
	}

	fn dims(&self) -> (usize, usize) {
		(self.height, 1)
	}

	fn cells_flat(&self) -> Vec<&C> {
		self.cells.iter().collect()
	}

	fn try_map<F>(&self, f: F) -> Result<Self>
	where
		F: Fn(&C) -> Result<C> + Send + Sync,
	{
		let cells = self.cells.par_iter().map(&f).collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}

	fn try_zip_map<F>(&self, other: &Self, f: F) -> Result<Self>
	where
		F: Fn(&C, &C) -> Result<C> + Send + Sync,
	{
		let cells = self
			.cells
			.par_iter()
			.zip(other.cells.par_iter())
			.map(|(a, b)| f(a, b))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			cells,
			..self.clone()
		})
	}
}

/// Shared fit check and metadata rewrite for the unit-transpose operation.
fn transpose_unit_cells<C: CiphertextHandle>(
	length: usize,
	unit: EncodingUnit,
	cells: &[C],
) -> Result<(EncodingUnit, Vec<C>)> {
	let swapped = unit.transpose();
	if cells.len() != 1 {
		return Err(Error::shape_mismatch(
			"unit transpose requires the object to fit in a single cell",
		));
	}
	if length > swapped.height() && length > swapped.width() {
		return Err(Error::shape_mismatch(format!(
			"a vector of length {length} does not fit inside the swapped {}x{} unit",
			swapped.height(),
			swapped.width()
		)));
	}
	let mut out = cells.to_vec();
	let meta = out[0].meta_mut();
	meta.encoded_height = swapped.height();
	meta.encoded_width = swapped.width();
	Ok((swapped, out))
}
