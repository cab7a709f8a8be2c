//! Strided tensor views.
//!
//! A [`Tensor`] is a view over a shared, immutable `f32` buffer described by
//! `dims`, per-dimension element `strides` and an element `offset`. Element
//! `idx` lives at `offset + Σ idx[i] * strides[i]`.
//!
//! Slicing, permuting and selecting only rewrite the description; the buffer
//! is shared. [`Tensor::materialize_contiguous`] is the one operation that
//! copies, gathering any view into a fresh row-major buffer.

use crate::core::error::{TensorError, TensorResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Size in bytes of one tensor element.
pub const ELEM_SIZE: usize = std::mem::size_of::<f32>();

/// Element count above which materialization is split across the rayon pool.
pub const PARALLEL_THRESHOLD: usize = 1 << 16;

const GATHER_CHUNK: usize = 1 << 12;

/// Width and height of a rank-2 tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size2d {
    /// Extent of the last dimension.
    pub width: usize,
    /// Extent of the first dimension.
    pub height: usize,
}

/// A strided view over a shared element buffer.
#[derive(Clone)]
pub struct Tensor {
    buffer: Arc<[f32]>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dims", &self.dims)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

/// Row-major strides for `dims`, with overflow checking.
pub fn contiguous_strides(dims: &[usize]) -> TensorResult<Vec<usize>> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride = stride
            .checked_mul(dims[axis])
            .ok_or_else(|| TensorError::Overflow(dims.to_vec()))?;
    }
    Ok(strides)
}

/// `product(dims)` with overflow checking.
pub fn element_count(dims: &[usize]) -> TensorResult<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| TensorError::Overflow(dims.to_vec()))
    })
}

impl Tensor {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Allocate a canonical (row-major) tensor.
    ///
    /// Without `data` the tensor is zero-filled. With `data`, its length must
    /// equal the element count of `dims`.
    pub fn from_dims(dims: &[usize], data: Option<Vec<f32>>) -> TensorResult<Self> {
        let count = element_count(dims)?;
        let strides = contiguous_strides(dims)?;
        let data = match data {
            Some(data) if data.len() != count => {
                return Err(TensorError::DataLength {
                    dims: dims.to_vec(),
                    expected: count,
                    got: data.len(),
                })
            }
            Some(data) => data,
            None => vec![0.0; count],
        };

        Ok(Self {
            buffer: Arc::from(data),
            dims: dims.to_vec(),
            strides,
            offset: 0,
        })
    }

    /// Allocate a canonical tensor with every element set to `value`.
    pub fn filled(dims: &[usize], value: f32) -> TensorResult<Self> {
        let count = element_count(dims)?;
        Self::from_dims(dims, Some(vec![value; count]))
    }

    /// Rebuild a canonical tensor from its native-endian byte image.
    pub fn from_bytes(dims: &[usize], bytes: &[u8]) -> TensorResult<Self> {
        if bytes.len() % ELEM_SIZE != 0 {
            return Err(TensorError::ByteLength(bytes.len()));
        }
        let data = bytes
            .chunks_exact(ELEM_SIZE)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        Self::from_dims(dims, Some(data))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Extents, outermost first.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Per-dimension element strides.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Element offset of index `[0, .., 0]` in the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Size in bytes of one element.
    pub fn elem_size(&self) -> usize {
        ELEM_SIZE
    }

    /// Number of addressed elements.
    pub fn elem_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether the view has exactly `rank` dimensions.
    pub fn is_nd(&self, rank: usize) -> bool {
        self.dims.len() == rank
    }

    /// Width and height if this view is exactly rank 2.
    pub fn as_2d(&self) -> Option<Size2d> {
        match self.dims.as_slice() {
            [height, width] => Some(Size2d {
                width: *width,
                height: *height,
            }),
            _ => None,
        }
    }

    /// Whether the view is row-major with no gaps.
    ///
    /// Extent-1 dimensions are ignored since their stride never participates
    /// in addressing.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1usize;
        for (&dim, &stride) in self.dims.iter().zip(&self.strides).rev() {
            if dim != 1 && stride != expected {
                return false;
            }
            expected *= dim;
        }
        true
    }

    /// Whether both views read from the same buffer.
    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    /// Read one element by multi-index.
    pub fn get(&self, idx: &[usize]) -> TensorResult<f32> {
        if idx.len() != self.rank() {
            return Err(TensorError::DimOutOfRange {
                dim: idx.len(),
                rank: self.rank(),
            });
        }
        let mut at = self.offset;
        for (dim, (&i, (&extent, &stride))) in idx
            .iter()
            .zip(self.dims.iter().zip(&self.strides))
            .enumerate()
        {
            if i >= extent {
                return Err(TensorError::IndexOutOfRange {
                    dim,
                    index: i,
                    extent,
                });
            }
            at += i * stride;
        }
        Ok(self.buffer[at])
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Fix dimension `dim` at `index`, dropping it from the view.
    pub fn slice_fixed(&self, dim: usize, index: usize) -> TensorResult<Tensor> {
        self.check_dim(dim)?;
        let extent = self.dims[dim];
        if index >= extent {
            return Err(TensorError::IndexOutOfRange { dim, index, extent });
        }

        let mut view = self.clone();
        view.offset += index * view.strides[dim];
        view.dims.remove(dim);
        view.strides.remove(dim);
        Ok(view)
    }

    /// Reorder dimensions: output dimension `i` is input dimension `order[i]`.
    pub fn permute(&self, order: &[usize]) -> TensorResult<Tensor> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        let valid = order.len() == rank
            && order
                .iter()
                .all(|&d| d < rank && !std::mem::replace(&mut seen[d], true));
        if !valid {
            return Err(TensorError::InvalidPermutation {
                order: order.to_vec(),
                rank,
            });
        }

        Ok(Tensor {
            buffer: Arc::clone(&self.buffer),
            dims: order.iter().map(|&d| self.dims[d]).collect(),
            strides: order.iter().map(|&d| self.strides[d]).collect(),
            offset: self.offset,
        })
    }

    /// General zero-copy selection.
    ///
    /// `fixed` pins `(dim, index)` pairs; `free` maps `(in_dim, out_dim)` so
    /// that input dimension `in_dim` becomes output dimension `out_dim`.
    /// Every input dimension must appear exactly once across both lists and
    /// the `out_dim`s must be a permutation of `0..free.len()`.
    pub fn select(&self, fixed: &[(usize, usize)], free: &[(usize, usize)]) -> TensorResult<Tensor> {
        let rank = self.rank();
        let mut covered = vec![false; rank];
        for &(dim, _) in fixed.iter().chain(free) {
            self.check_dim(dim)?;
            if std::mem::replace(&mut covered[dim], true) {
                return Err(TensorError::InvalidSelection);
            }
        }
        if covered.iter().any(|c| !c) {
            return Err(TensorError::InvalidSelection);
        }

        let mut view = Tensor {
            buffer: Arc::clone(&self.buffer),
            dims: vec![0; free.len()],
            strides: vec![0; free.len()],
            offset: self.offset,
        };
        let mut placed = vec![false; free.len()];
        for &(in_dim, out_dim) in free {
            if out_dim >= free.len() || std::mem::replace(&mut placed[out_dim], true) {
                return Err(TensorError::InvalidSelection);
            }
            view.dims[out_dim] = self.dims[in_dim];
            view.strides[out_dim] = self.strides[in_dim];
        }
        for &(dim, index) in fixed {
            let extent = self.dims[dim];
            if index >= extent {
                return Err(TensorError::IndexOutOfRange { dim, index, extent });
            }
            view.offset += index * self.strides[dim];
        }
        Ok(view)
    }

    // ========================================================================
    // Copies
    // ========================================================================

    /// Gather this view into a fresh canonical buffer of the same shape.
    ///
    /// Rank-generic: every linear index is decomposed against the canonical
    /// shape at run time. Large views are gathered in parallel; the result is
    /// identical either way.
    pub fn materialize_contiguous(&self) -> Tensor {
        self.materialize_with(PARALLEL_THRESHOLD)
    }

    /// Materialize, splitting across the rayon pool at or above `parallel_threshold`
    /// elements.
    pub fn materialize_with(&self, parallel_threshold: usize) -> Tensor {
        let count = self.elem_count();
        let mut data = vec![0.0f32; count];

        if count >= parallel_threshold {
            data.par_chunks_mut(GATHER_CHUNK)
                .enumerate()
                .for_each(|(chunk, dst)| self.gather_into(chunk * GATHER_CHUNK, dst));
        } else {
            self.gather_into(0, &mut data);
        }

        let strides = canonical_strides(&self.dims);
        Tensor {
            buffer: Arc::from(data),
            dims: self.dims.clone(),
            strides,
            offset: 0,
        }
    }

    /// The addressed elements in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        if self.is_contiguous() {
            let count = self.elem_count();
            return self.buffer[self.offset..self.offset + count].to_vec();
        }
        self.materialize_contiguous().buffer.to_vec()
    }

    /// Native-endian byte image of the addressed elements, row-major.
    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice::<f32, u8>(&self.to_vec()).to_vec()
    }

    /// Element at canonical linear index `k` (row-major over `dims`).
    pub(crate) fn at_linear(&self, k: usize) -> f32 {
        self.buffer[self.source_index(k)]
    }

    /// Element `[row, col]` of a rank-2 view. Bounds are the caller's concern.
    pub(crate) fn at_2d(&self, row: usize, col: usize) -> f32 {
        self.buffer[self.offset + row * self.strides[0] + col * self.strides[1]]
    }

    /// Buffer position of the element at canonical linear index `k`.
    fn source_index(&self, mut k: usize) -> usize {
        let mut at = self.offset;
        for axis in (0..self.dims.len()).rev() {
            let extent = self.dims[axis];
            at += (k % extent) * self.strides[axis];
            k /= extent;
        }
        at
    }

    fn gather_into(&self, start: usize, dst: &mut [f32]) {
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.buffer[self.source_index(start + i)];
        }
    }

    fn check_dim(&self, dim: usize) -> TensorResult<()> {
        if dim >= self.rank() {
            return Err(TensorError::DimOutOfRange {
                dim,
                rank: self.rank(),
            });
        }
        Ok(())
    }
}

// Shapes of live views never overflow: they were checked when their buffer
// was allocated.
fn canonical_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride *= dims[axis];
    }
    strides
}

impl PartialEq for Tensor {
    /// Logical equality: same shape and same addressed values.
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims && self.to_vec() == other.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_by_three() -> Tensor {
        Tensor::from_dims(&[2, 3], Some(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])).unwrap()
    }

    #[test]
    fn test_from_dims_strides() {
        let t = Tensor::from_dims(&[2, 3, 4], None).unwrap();
        assert_eq!(t.strides(), &[12, 4, 1]);
        assert_eq!(t.elem_count(), 24);
        assert_eq!(t.elem_size(), 4);
        assert!(t.is_contiguous());
    }

    #[test]
    fn test_from_dims_length_mismatch() {
        let err = Tensor::from_dims(&[2, 2], Some(vec![1.0; 3])).unwrap_err();
        assert_eq!(
            err,
            TensorError::DataLength {
                dims: vec![2, 2],
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn test_slice_fixed_row() {
        let t = two_by_three();
        let row = t.slice_fixed(0, 1).unwrap();

        assert_eq!(row.dims(), &[3]);
        assert_eq!(row.offset(), 3);
        assert!(row.shares_storage(&t));
        assert_eq!(row.to_vec(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_slice_fixed_column() {
        let column = two_by_three().slice_fixed(1, 2).unwrap();
        assert_eq!(column.dims(), &[2]);
        assert!(!column.is_contiguous());
        assert_eq!(column.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_slice_out_of_range() {
        let t = two_by_three();
        assert!(matches!(
            t.slice_fixed(0, 2),
            Err(TensorError::IndexOutOfRange { dim: 0, index: 2, extent: 2 })
        ));
        assert!(matches!(
            t.slice_fixed(2, 0),
            Err(TensorError::DimOutOfRange { dim: 2, rank: 2 })
        ));
    }

    #[test]
    fn test_permute_then_materialize() {
        let t = two_by_three();
        let transposed = t.permute(&[1, 0]).unwrap();
        assert_eq!(transposed.dims(), &[3, 2]);
        assert!(transposed.shares_storage(&t));

        let dense = transposed.materialize_contiguous();
        assert!(dense.is_contiguous());
        assert!(!dense.shares_storage(&t));
        assert_eq!(dense.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_permute_rejects_non_permutation() {
        let t = two_by_three();
        assert!(t.permute(&[0, 0]).is_err());
        assert!(t.permute(&[0]).is_err());
        assert!(t.permute(&[0, 2]).is_err());
    }

    #[test]
    fn test_select_fixed_and_free() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let t = Tensor::from_dims(&[2, 3, 4], Some(data)).unwrap();

        // Pin the middle dimension at 1 and swap the remaining two.
        let view = t.select(&[(1, 1)], &[(0, 1), (2, 0)]).unwrap();
        assert_eq!(view.dims(), &[4, 2]);
        assert_eq!(view.get(&[0, 0]).unwrap(), 4.0);
        assert_eq!(view.get(&[3, 1]).unwrap(), 19.0);
        assert_eq!(
            view.to_vec(),
            vec![4.0, 16.0, 5.0, 17.0, 6.0, 18.0, 7.0, 19.0]
        );
    }

    #[test]
    fn test_select_requires_full_cover() {
        let t = two_by_three();
        assert_eq!(t.select(&[(0, 0)], &[]), Err(TensorError::InvalidSelection));
        assert_eq!(
            t.select(&[(0, 0)], &[(0, 0), (1, 1)]),
            Err(TensorError::InvalidSelection)
        );
    }

    #[test]
    fn test_as_2d() {
        let t = two_by_three();
        assert_eq!(t.as_2d(), Some(Size2d { width: 3, height: 2 }));
        assert_eq!(t.slice_fixed(0, 0).unwrap().as_2d(), None);
        assert_eq!(Tensor::from_dims(&[1, 2, 3], None).unwrap().as_2d(), None);
    }

    #[test]
    fn test_rank_zero_view() {
        let point = two_by_three().slice_fixed(0, 1).unwrap().slice_fixed(0, 2).unwrap();
        assert_eq!(point.rank(), 0);
        assert_eq!(point.elem_count(), 1);
        assert_eq!(point.materialize_contiguous().to_vec(), vec![5.0]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let t = two_by_three().permute(&[1, 0]).unwrap();
        let bytes = t.to_bytes();
        assert_eq!(bytes.len(), 6 * ELEM_SIZE);

        let back = Tensor::from_bytes(&[3, 2], &bytes).unwrap();
        assert_eq!(back, t);
        assert!(Tensor::from_bytes(&[1], &[0u8; 3]).is_err());
    }

    #[test]
    fn test_bytes_native_endian_from_unaligned_buffer() {
        let t = Tensor::from_dims(&[2], Some(vec![1.5, -2.0])).unwrap();
        let mut expected = 1.5f32.to_ne_bytes().to_vec();
        expected.extend_from_slice(&(-2.0f32).to_ne_bytes());
        assert_eq!(t.to_bytes(), expected);

        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&expected);
        let back = Tensor::from_bytes(&[2], &shifted[1..]).unwrap();
        assert_eq!(back.to_vec(), vec![1.5, -2.0]);
    }

    proptest! {
        #[test]
        fn prop_parallel_gather_matches_serial(
            dims in proptest::collection::vec(1usize..6, 1..5),
            seed in 0usize..1000,
        ) {
            let count: usize = dims.iter().product();
            let data: Vec<f32> = (0..count).map(|v| (v * 7 + seed) as f32).collect();
            let t = Tensor::from_dims(&dims, Some(data)).unwrap();

            let order: Vec<usize> = (0..dims.len()).rev().collect();
            let view = t.permute(&order).unwrap();

            let serial = view.materialize_with(usize::MAX);
            let parallel = view.materialize_with(0);
            prop_assert_eq!(serial.to_vec(), parallel.to_vec());

            for k in 0..count {
                let mut rem = k;
                let mut idx = vec![0usize; view.rank()];
                for axis in (0..view.rank()).rev() {
                    idx[axis] = rem % view.dims()[axis];
                    rem /= view.dims()[axis];
                }
                prop_assert_eq!(serial.to_vec()[k], view.get(&idx).unwrap());
            }
        }
    }
}
