//! Homomorphic linear algebra over encoded tiles.
//!
//! [LinearAlgebra] wraps any [Evaluator] and never depends on a concrete
//! variant: the same matrix product can be depth-checked, scale-estimated,
//! and executed for real by swapping the evaluator underneath. Matrices and
//! vectors are chopped onto power-of-two [EncodingUnit] tiles
//! (see [encoding]); arithmetic is built from element-wise operations,
//! masking, and log-depth rotation folds.
//!
//! Cell loops are embarrassingly parallel and fan out through rayon; the
//! accumulation joins run sequentially on the calling thread.

pub mod encoding;
mod objects;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::ciphertext::{CiphertextHandle, Encoding};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::linalg::encoding::{
	decode_col_vector, decode_matrix, decode_row_vector, div_ceil, encode_col_vector,
	encode_matrix, encode_row_vector, unit_column_mask, unit_row_mask,
};
use crate::util;

pub use encoding::EncodingUnit;
pub use objects::{EncryptedColVector, EncryptedMatrix, EncryptedObject, EncryptedRowVector};

/// Direction of a doubling rotation fold.
#[derive(Clone, Copy)]
enum Direction {
	/// Fold values together toward slot zero.
	Sum,
	/// Broadcast a value outward from slot zero.
	Replicate,
}

/// Encode/decode routines and homomorphic linear algebra operations,
/// parameterized by an evaluator.
pub struct LinearAlgebra<'a, E: Evaluator> {
	eval: &'a E,
}

impl<'a, E: Evaluator + Sync> LinearAlgebra<'a, E> {
	pub fn new(eval: &'a E) -> Self {
		Self { eval }
	}

	pub fn evaluator(&self) -> &E {
		self.eval
	}

	/// Builds the encoding unit of the given height for this instance's
	/// slot count.
	pub fn make_unit(&self, height: usize) -> Result<EncodingUnit> {
		let slots = self.eval.params().slot_count();
		if !height.is_power_of_two() || height > slots {
			return Err(Error::invalid_argument(format!(
				"unit height must be a power of two no larger than {slots}, got {height}"
			)));
		}
		EncodingUnit::new(height, slots / height)
	}

	fn stamp(
		&self,
		ct: &mut E::Ciphertext,
		encoding: Encoding,
		logical: (usize, usize),
		unit: EncodingUnit,
	) {
		let meta = ct.meta_mut();
		meta.encoding = encoding;
		meta.logical_height = logical.0;
		meta.logical_width = logical.1;
		meta.encoded_height = unit.height();
		meta.encoded_width = unit.width();
	}

	fn check_nominal(&self, level: u32, scale: f64) -> Result<()> {
		let nominal = self.eval.params().nominal_scale_at(level);
		if !util::are_close_f64(scale, nominal) {
			return Err(Error::ScaleInconsistency {
				expected: nominal,
				actual: scale,
				context: "operand must carry the nominal linear scale".into(),
			});
		}
		Ok(())
	}

	// ----- encryption and decryption ------------------------------------

	pub fn encrypt_matrix(
		&self,
		mat: &DMatrix<f64>,
		unit: EncodingUnit,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		self.encrypt_matrix_at_level(mat, unit, self.eval.params().max_level())
	}

	pub fn encrypt_matrix_at_level(
		&self,
		mat: &DMatrix<f64>,
		unit: EncodingUnit,
		level: u32,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		let grid = encode_matrix(mat, unit);
		let cells = grid
			.par_iter()
			.map(|row| {
				row.par_iter()
					.map(|slots| {
						let mut ct = self.eval.encrypt_at_level(slots, level)?;
						self.stamp(&mut ct, Encoding::Matrix, (mat.nrows(), mat.ncols()), unit);
						Ok(ct)
					})
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedMatrix::from_cells(mat.nrows(), mat.ncols(), unit, cells)
	}

	pub fn decrypt_matrix(&self, mat: &EncryptedMatrix<E::Ciphertext>) -> Result<DMatrix<f64>> {
		mat.validate_uniform()?;
		let grid = mat
			.cells()
			.iter()
			.map(|row| {
				row.iter()
					.map(|ct| self.eval.decrypt(ct))
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(decode_matrix(&grid, mat.encoding_unit(), mat.height(), mat.width()))
	}

	pub fn encrypt_row_vector(
		&self,
		vec: &DVector<f64>,
		unit: EncodingUnit,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		self.encrypt_row_vector_at_level(vec, unit, self.eval.params().max_level())
	}

	pub fn encrypt_row_vector_at_level(
		&self,
		vec: &DVector<f64>,
		unit: EncodingUnit,
		level: u32,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		let pieces = encode_row_vector(vec, unit);
		let cells = pieces
			.par_iter()
			.map(|slots| {
				let mut ct = self.eval.encrypt_at_level(slots, level)?;
				self.stamp(&mut ct, Encoding::RowVector, (1, vec.len()), unit);
				Ok(ct)
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedRowVector::from_cells(vec.len(), unit, cells)
	}

	pub fn decrypt_row_vector(
		&self,
		vec: &EncryptedRowVector<E::Ciphertext>,
	) -> Result<DVector<f64>> {
		vec.validate_uniform()?;
		let pieces = vec
			.cells()
			.iter()
			.map(|ct| self.eval.decrypt(ct))
			.collect::<Result<Vec<_>>>()?;
		Ok(decode_row_vector(&pieces, vec.encoding_unit(), vec.width()))
	}

	pub fn encrypt_col_vector(
		&self,
		vec: &DVector<f64>,
		unit: EncodingUnit,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		self.encrypt_col_vector_at_level(vec, unit, self.eval.params().max_level())
	}

	pub fn encrypt_col_vector_at_level(
		&self,
		vec: &DVector<f64>,
		unit: EncodingUnit,
		level: u32,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		let pieces = encode_col_vector(vec, unit);
		let cells = pieces
			.par_iter()
			.map(|slots| {
				let mut ct = self.eval.encrypt_at_level(slots, level)?;
				self.stamp(&mut ct, Encoding::ColVector, (vec.len(), 1), unit);
				Ok(ct)
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedColVector::from_cells(vec.len(), unit, cells)
	}

	pub fn decrypt_col_vector(
		&self,
		vec: &EncryptedColVector<E::Ciphertext>,
	) -> Result<DVector<f64>> {
		vec.validate_uniform()?;
		let pieces = vec
			.cells()
			.iter()
			.map(|ct| self.eval.decrypt(ct))
			.collect::<Result<Vec<_>>>()?;
		Ok(decode_col_vector(&pieces, vec.encoding_unit(), vec.height()))
	}

	// ----- cell-wise operations -----------------------------------------

	/// Adds two objects of identical shape and unit.
	pub fn add<O: EncryptedObject<E::Ciphertext>>(&self, a: &O, b: &O) -> Result<O> {
		a.same_shape(b)?;
		a.validate_uniform()?;
		b.validate_uniform()?;
		a.try_zip_map(b, |x, y| self.eval.add(x, y))
	}

	/// Subtracts `b` from `a` cell-wise.
	pub fn sub<O: EncryptedObject<E::Ciphertext>>(&self, a: &O, b: &O) -> Result<O> {
		a.same_shape(b)?;
		a.validate_uniform()?;
		b.validate_uniform()?;
		a.try_zip_map(b, |x, y| self.eval.sub(x, y))
	}

	pub fn negate<O: EncryptedObject<E::Ciphertext>>(&self, a: &O) -> Result<O> {
		a.try_map(|x| self.eval.negate(x))
	}

	/// Multiplies every cell by a public scalar; the scale squares.
	pub fn multiply_scalar<O: EncryptedObject<E::Ciphertext>>(
		&self,
		a: &O,
		scalar: f64,
	) -> Result<O> {
		a.validate_uniform()?;
		a.try_map(|x| self.eval.multiply_scalar(x, scalar))
	}

	/// Adds a plaintext matrix to an encrypted one.
	pub fn add_plain_matrix(
		&self,
		a: &EncryptedMatrix<E::Ciphertext>,
		plain: &DMatrix<f64>,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		if (a.height(), a.width()) != (plain.nrows(), plain.ncols()) {
			return Err(Error::shape_mismatch(format!(
				"cannot add a {}x{} plaintext to a {}x{} encrypted matrix",
				plain.nrows(),
				plain.ncols(),
				a.height(),
				a.width()
			)));
		}
		a.validate_uniform()?;
		let grid = encode_matrix(plain, a.encoding_unit());
		let cells = a
			.cells()
			.par_iter()
			.enumerate()
			.map(|(i, row)| {
				row.par_iter()
					.enumerate()
					.map(|(j, ct)| self.eval.add_plain(ct, &grid[i][j]))
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedMatrix::from_cells(a.height(), a.width(), a.encoding_unit(), cells)
	}

	/// Adds a plaintext row vector to an encrypted one.
	pub fn add_plain_row_vector(
		&self,
		a: &EncryptedRowVector<E::Ciphertext>,
		plain: &DVector<f64>,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		if a.width() != plain.len() {
			return Err(Error::shape_mismatch(format!(
				"cannot add a plaintext vector of length {} to a row vector of width {}",
				plain.len(),
				a.width()
			)));
		}
		a.validate_uniform()?;
		let pieces = encode_row_vector(plain, a.encoding_unit());
		let cells = a
			.cells()
			.par_iter()
			.zip(pieces.par_iter())
			.map(|(ct, piece)| self.eval.add_plain(ct, piece))
			.collect::<Result<Vec<_>>>()?;
		EncryptedRowVector::from_cells(a.width(), a.encoding_unit(), cells)
	}

	/// Adds a plaintext column vector to an encrypted one.
	pub fn add_plain_col_vector(
		&self,
		a: &EncryptedColVector<E::Ciphertext>,
		plain: &DVector<f64>,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		if a.height() != plain.len() {
			return Err(Error::shape_mismatch(format!(
				"cannot add a plaintext vector of length {} to a column vector of height {}",
				plain.len(),
				a.height()
			)));
		}
		a.validate_uniform()?;
		let pieces = encode_col_vector(plain, a.encoding_unit());
		let cells = a
			.cells()
			.par_iter()
			.zip(pieces.par_iter())
			.map(|(ct, piece)| self.eval.add_plain(ct, piece))
			.collect::<Result<Vec<_>>>()?;
		EncryptedColVector::from_cells(a.height(), a.encoding_unit(), cells)
	}

	/// Rescales every cell to the next level.
	pub fn rescale_to_next<O: EncryptedObject<E::Ciphertext>>(&self, a: &O) -> Result<O> {
		a.validate_uniform()?;
		a.try_map(|x| self.eval.rescale_to_next(x))
	}

	/// Relinearizes every cell.
	pub fn relinearize<O: EncryptedObject<E::Ciphertext>>(&self, a: &O) -> Result<O> {
		a.try_map(|x| self.eval.relinearize(x))
	}

	/// Lowers every cell to an explicit level.
	pub fn mod_down_to_level<O: EncryptedObject<E::Ciphertext>>(
		&self,
		a: &O,
		level: u32,
	) -> Result<O> {
		a.validate_uniform()?;
		a.try_map(|x| self.eval.mod_down_to_level(x, level))
	}

	/// Lowers whichever object is higher so both end up at one level.
	pub fn mod_down_to_min<O: EncryptedObject<E::Ciphertext>, P: EncryptedObject<E::Ciphertext>>(
		&self,
		a: &O,
		b: &P,
	) -> Result<(O, P)> {
		let (la, _) = a.validate_uniform()?;
		let (lb, _) = b.validate_uniform()?;
		let min = la.min(lb);
		Ok((
			self.mod_down_to_level(a, min)?,
			self.mod_down_to_level(b, min)?,
		))
	}

	// ----- reduction primitives -----------------------------------------

	/// Doubling rotation fold: for shifts `1, 2, 4, … < max`, rotates by
	/// `shift * stride` and adds into the accumulator.
	fn rot(
		&self,
		ct: &E::Ciphertext,
		max: usize,
		stride: usize,
		direction: Direction,
	) -> Result<E::Ciphertext> {
		let mut acc = ct.clone();
		let mut shift = 1;
		while shift < max {
			let rotated = match direction {
				Direction::Sum => self.eval.rotate_left(&acc, shift * stride)?,
				Direction::Replicate => self.eval.rotate_right(&acc, shift * stride)?,
			};
			acc = self.eval.add(&acc, &rotated)?;
			shift *= 2;
		}
		Ok(acc)
	}

	/// Folds every row of one tile into its first column, isolates that
	/// column scaled by `scalar`, and broadcasts it back across the tile.
	fn sum_cols_core(
		&self,
		ct: &E::Ciphertext,
		unit: EncodingUnit,
		scalar: f64,
	) -> Result<E::Ciphertext> {
		let folded = self.rot(ct, unit.width(), 1, Direction::Sum)?;
		let masked = self
			.eval
			.multiply_plain(&folded, &unit_column_mask(unit, 0, scalar))?;
		self.rot(&masked, unit.width(), 1, Direction::Replicate)
	}

	/// Folds the rows of a vertical stack of tiles together, row-aligned.
	fn sum_rows_core(&self, column: &[E::Ciphertext], unit: EncodingUnit) -> Result<E::Ciphertext> {
		let mut acc = column[0].clone();
		for ct in &column[1..] {
			acc = self.eval.add(&acc, ct)?;
		}
		self.rot(&acc, unit.height(), unit.width(), Direction::Sum)
	}

	/// Sums along each row of the matrix, producing the row-sum vector
	/// scaled by `scalar` and encoded as a row vector.
	pub fn sum_cols(
		&self,
		mat: &EncryptedMatrix<E::Ciphertext>,
		scalar: f64,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		self.sum_cols_many(&[mat], scalar)
	}

	/// [Self::sum_cols] over the horizontal concatenation of several
	/// matrices of one unit and height; cheaper than reducing then adding.
	pub fn sum_cols_many(
		&self,
		mats: &[&EncryptedMatrix<E::Ciphertext>],
		scalar: f64,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		let first = mats
			.first()
			.ok_or_else(|| Error::invalid_argument("sum_cols_many needs at least one matrix"))?;
		let unit = first.encoding_unit();
		let (level, scale) = first.validate_uniform()?;
		for mat in &mats[1..] {
			if mat.encoding_unit() != unit || mat.height() != first.height() {
				return Err(Error::shape_mismatch(
					"sum_cols_many requires one unit and one height across matrices",
				));
			}
			let (l, s) = mat.validate_uniform()?;
			if l != level {
				return Err(Error::LevelMismatch { left: level, right: l });
			}
			if !util::are_close_f64(s, scale) {
				return Err(Error::ScaleInconsistency {
					expected: scale,
					actual: s,
					context: "sum_cols_many operands disagree on scale".into(),
				});
			}
		}
		// cells from different matrices describe different logical widths;
		// restamp to the concatenated shape before the cross-matrix adds
		let concat_width: usize = mats.iter().map(|m| m.width()).sum();
		let concat = (first.height(), concat_width);
		let cells = (0..first.unit_rows())
			.into_par_iter()
			.map(|i| {
				let mut acc: Option<E::Ciphertext> = None;
				for mat in mats {
					for cell in &mat.cells()[i] {
						let mut cell = cell.clone();
						self.stamp(&mut cell, Encoding::Matrix, concat, unit);
						acc = Some(match acc {
							Some(prev) => self.eval.add(&prev, &cell)?,
							None => cell,
						});
					}
				}
				let mut out = self.sum_cols_core(&acc.expect("at least one cell"), unit, scalar)?;
				self.stamp(&mut out, Encoding::RowVector, (1, first.height()), unit);
				Ok(out)
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedRowVector::from_cells(first.height(), unit, cells)
	}

	/// Sums along each column of the matrix, producing the column-sum
	/// vector encoded as a column vector. Free of masking: only additions
	/// and row-aligned rotations.
	pub fn sum_rows(
		&self,
		mat: &EncryptedMatrix<E::Ciphertext>,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		self.sum_rows_many(&[mat])
	}

	/// [Self::sum_rows] over the vertical concatenation of several matrices
	/// of one unit and width.
	pub fn sum_rows_many(
		&self,
		mats: &[&EncryptedMatrix<E::Ciphertext>],
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		let first = mats
			.first()
			.ok_or_else(|| Error::invalid_argument("sum_rows_many needs at least one matrix"))?;
		let unit = first.encoding_unit();
		let (level, scale) = first.validate_uniform()?;
		for mat in &mats[1..] {
			if mat.encoding_unit() != unit || mat.width() != first.width() {
				return Err(Error::shape_mismatch(
					"sum_rows_many requires one unit and one width across matrices",
				));
			}
			let (l, s) = mat.validate_uniform()?;
			if l != level {
				return Err(Error::LevelMismatch { left: level, right: l });
			}
			if !util::are_close_f64(s, scale) {
				return Err(Error::ScaleInconsistency {
					expected: scale,
					actual: s,
					context: "sum_rows_many operands disagree on scale".into(),
				});
			}
		}
		// restamp cells to the concatenated shape before the vertical adds
		let concat_height: usize = mats.iter().map(|m| m.height()).sum();
		let concat = (concat_height, first.width());
		let cells = (0..first.unit_cols())
			.into_par_iter()
			.map(|j| {
				let column: Vec<E::Ciphertext> = mats
					.iter()
					.flat_map(|mat| mat.cells().iter().map(move |row| &row[j]))
					.map(|cell| {
						let mut cell = cell.clone();
						self.stamp(&mut cell, Encoding::Matrix, concat, unit);
						cell
					})
					.collect();
				let mut out = self.sum_rows_core(&column, unit)?;
				self.stamp(&mut out, Encoding::ColVector, (first.width(), 1), unit);
				Ok(out)
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedColVector::from_cells(first.width(), unit, cells)
	}

	// ----- multiplication -----------------------------------------------

	fn check_hadamard(
		&self,
		inner_left: usize,
		inner_right: usize,
		a: (u32, f64),
		b: (u32, f64),
	) -> Result<()> {
		if inner_left != inner_right {
			return Err(Error::shape_mismatch(format!(
				"inner dimensions do not match: {inner_left} vs {inner_right}"
			)));
		}
		if a.0 != b.0 {
			return Err(Error::LevelMismatch {
				left: a.0,
				right: b.0,
			});
		}
		self.check_nominal(a.0, a.1)?;
		self.check_nominal(b.0, b.1)
	}

	/// Element-wise product of a row vector with every unit row of a
	/// matrix, broadcasting the vector across columns. Output cells are
	/// quadratic with squared scale.
	pub fn hadamard_multiply_row_matrix(
		&self,
		vec: &EncryptedRowVector<E::Ciphertext>,
		mat: &EncryptedMatrix<E::Ciphertext>,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		if vec.encoding_unit() != mat.encoding_unit() {
			return Err(Error::shape_mismatch("encoding units differ"));
		}
		self.check_hadamard(
			vec.width(),
			mat.height(),
			vec.validate_uniform()?,
			mat.validate_uniform()?,
		)?;
		let cells = mat
			.cells()
			.par_iter()
			.enumerate()
			.map(|(i, row)| {
				row.par_iter()
					.map(|cell| self.eval.multiply(&vec.cells()[i], cell))
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedMatrix::from_cells(mat.height(), mat.width(), mat.encoding_unit(), cells)
	}

	/// Element-wise product of every unit column of a matrix with a column
	/// vector, broadcasting the vector down rows. Output cells are quadratic
	/// with squared scale.
	pub fn hadamard_multiply_matrix_col(
		&self,
		mat: &EncryptedMatrix<E::Ciphertext>,
		vec: &EncryptedColVector<E::Ciphertext>,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		if vec.encoding_unit() != mat.encoding_unit() {
			return Err(Error::shape_mismatch("encoding units differ"));
		}
		self.check_hadamard(
			mat.width(),
			vec.height(),
			mat.validate_uniform()?,
			vec.validate_uniform()?,
		)?;
		let cells = mat
			.cells()
			.par_iter()
			.map(|row| {
				row.par_iter()
					.enumerate()
					.map(|(j, cell)| self.eval.multiply(cell, &vec.cells()[j]))
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedMatrix::from_cells(mat.height(), mat.width(), mat.encoding_unit(), cells)
	}

	/// Element-wise product of two row vectors.
	pub fn hadamard_multiply_row_vectors(
		&self,
		a: &EncryptedRowVector<E::Ciphertext>,
		b: &EncryptedRowVector<E::Ciphertext>,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		a.same_shape(b)?;
		self.check_hadamard(a.width(), b.width(), a.validate_uniform()?, b.validate_uniform()?)?;
		a.try_zip_map(b, |x, y| self.eval.multiply(x, y))
	}

	/// Element-wise product of two column vectors.
	pub fn hadamard_multiply_col_vectors(
		&self,
		a: &EncryptedColVector<E::Ciphertext>,
		b: &EncryptedColVector<E::Ciphertext>,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		a.same_shape(b)?;
		self.check_hadamard(a.height(), b.height(), a.validate_uniform()?, b.validate_uniform()?)?;
		a.try_zip_map(b, |x, y| self.eval.multiply(x, y))
	}

	/// Row-vector times matrix: `vec * mat`, encoded as a column vector.
	/// The result stays at the operand level with a squared scale; the
	/// caller chooses when to rescale.
	pub fn multiply_row_matrix(
		&self,
		vec: &EncryptedRowVector<E::Ciphertext>,
		mat: &EncryptedMatrix<E::Ciphertext>,
	) -> Result<EncryptedColVector<E::Ciphertext>> {
		let product = self.hadamard_multiply_row_matrix(vec, mat)?;
		let product = self.relinearize(&product)?;
		self.sum_rows(&product)
	}

	/// Matrix times column vector, scaled by `scalar`: `scalar * mat * vec`,
	/// encoded as a row vector one level down with a squared scale.
	pub fn multiply_matrix_col(
		&self,
		mat: &EncryptedMatrix<E::Ciphertext>,
		vec: &EncryptedColVector<E::Ciphertext>,
		scalar: f64,
	) -> Result<EncryptedRowVector<E::Ciphertext>> {
		let product = self.hadamard_multiply_matrix_col(mat, vec)?;
		let product = self.relinearize(&product)?;
		let product = self.rescale_to_next(&product)?;
		self.sum_cols(&product, scalar)
	}

	/// Extracts row `row` of the matrix as a column-vector encoding, via a
	/// 0/1 row mask, a rotation up to the first unit row, and a replication
	/// fold. Consumes one level of the source matrix.
	fn extract_row(
		&self,
		mat: &EncryptedMatrix<E::Ciphertext>,
		row: usize,
	) -> Result<Vec<E::Ciphertext>> {
		let unit = mat.encoding_unit();
		let (grid_row, unit_row) = (row / unit.height(), row % unit.height());
		let mask = unit_row_mask(unit, unit_row, 1.0);
		mat.cells()[grid_row]
			.iter()
			.map(|cell| {
				let masked = self.eval.multiply_plain(cell, &mask)?;
				let masked = self.eval.rescale_to_next(&masked)?;
				let shifted = if unit_row > 0 {
					self.eval.rotate_left(&masked, unit_row * unit.width())?
				} else {
					masked
				};
				let mut piece = self.rot(&shifted, unit.height(), unit.width(), Direction::Replicate)?;
				self.stamp(&mut piece, Encoding::ColVector, (mat.width(), 1), unit);
				Ok(piece)
			})
			.collect()
	}

	/// Matrix product `a * b^T`, scaled by `scalar`.
	///
	/// `b` is supplied transposed: to compute `A * B`, pass `A` and `B^T`.
	/// The transposed operand must arrive exactly one level above `a`, since
	/// the row extraction masks fold into the pass that consumes that level.
	/// The result lands one level below `a` with a squared scale.
	pub fn multiply(
		&self,
		a: &EncryptedMatrix<E::Ciphertext>,
		b: &EncryptedMatrix<E::Ciphertext>,
		scalar: f64,
	) -> Result<EncryptedMatrix<E::Ciphertext>> {
		if a.encoding_unit() != b.encoding_unit() {
			return Err(Error::shape_mismatch("encoding units differ"));
		}
		if a.width() != b.width() {
			return Err(Error::shape_mismatch(format!(
				"inner dimensions do not match: {} vs {}",
				a.width(),
				b.width()
			)));
		}
		let (level_a, scale_a) = a.validate_uniform()?;
		let (level_b, scale_b) = b.validate_uniform()?;
		if level_b != level_a + 1 {
			return Err(Error::invalid_argument(format!(
				"the transposed operand must be exactly one level above the other: \
				 {level_b} vs {level_a}"
			)));
		}
		if level_a == 0 {
			return Err(Error::invalid_argument(
				"matrix multiplication needs one level below the left operand",
			));
		}
		self.check_nominal(level_a, scale_a)?;
		self.check_nominal(level_b, scale_b)?;

		let unit = a.encoding_unit();
		let mask = unit_column_mask(unit, 0, scalar);
		// one partial column vector per row of b, each isolated into its
		// output unit column
		let partials = (0..b.height())
			.into_par_iter()
			.map(|j| {
				let extracted = self.extract_row(b, j)?;
				let mut out_cells = Vec::with_capacity(a.unit_rows());
				for i in 0..a.unit_rows() {
					let mut acc: Option<E::Ciphertext> = None;
					for (q, piece) in extracted.iter().enumerate() {
						let prod = self.eval.multiply(&a.cells()[i][q], piece)?;
						acc = Some(match acc {
							Some(prev) => self.eval.add(&prev, &prod)?,
							None => prod,
						});
					}
					let acc = self.eval.relinearize(&acc.expect("at least one unit column"))?;
					let acc = self.eval.rescale_to_next(&acc)?;
					let folded = self.rot(&acc, unit.width(), 1, Direction::Sum)?;
					let masked = self.eval.multiply_plain(&folded, &mask)?;
					let placed = if j % unit.width() > 0 {
						self.eval.rotate_right(&masked, j % unit.width())?
					} else {
						masked
					};
					out_cells.push(placed);
				}
				Ok(out_cells)
			})
			.collect::<Result<Vec<_>>>()?;

		// sequential accumulation join
		let out_cols = div_ceil(b.height(), unit.width());
		let mut cells: Vec<Vec<Option<E::Ciphertext>>> = vec![vec![None; out_cols]; a.unit_rows()];
		for (j, partial) in partials.into_iter().enumerate() {
			let g = j / unit.width();
			for (i, cell) in partial.into_iter().enumerate() {
				cells[i][g] = Some(match cells[i][g].take() {
					Some(prev) => self.eval.add(&prev, &cell)?,
					None => cell,
				});
			}
		}
		let cells = cells
			.into_iter()
			.map(|row| {
				row.into_iter()
					.map(|cell| {
						let mut ct = cell.expect("every output cell receives a partial");
						self.stamp(&mut ct, Encoding::Matrix, (a.height(), b.height()), unit);
						Ok(ct)
					})
					.collect::<Result<Vec<_>>>()
			})
			.collect::<Result<Vec<_>>>()?;
		EncryptedMatrix::from_cells(a.height(), b.height(), unit, cells)
	}
}
