use serde::Serialize;

use crate::{DataType, error::ShapeError};

/// Identifier of a backend-owned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BufferId(pub usize);

/// Strided view into device memory.
///
/// The view never dereferences anything: it only carries the buffer it points
/// into plus enough layout information for a kernel backend to materialize an
/// address. Strides and `offset` are counted in elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTensor {
    buffer: BufferId,
    data_type: DataType,
    shape: Box<[usize]>,
    strides: Box<[usize]>,
    offset: usize,
}

fn contiguous_strides(shape: &[usize]) -> Box<[usize]> {
    let mut strides = vec![1usize; shape.len()];
    for dim in (0..shape.len().saturating_sub(1)).rev() {
        strides[dim] = strides[dim + 1] * shape[dim + 1];
    }
    strides.into_boxed_slice()
}

impl DeviceTensor {
    pub fn new(
        buffer: BufferId,
        data_type: DataType,
        shape: &[usize],
    ) -> Self {
        Self {
            buffer,
            data_type,
            shape: shape.into(),
            strides: contiguous_strides(shape),
            offset: 0,
        }
    }

    pub fn with_strides(
        buffer: BufferId,
        data_type: DataType,
        shape: &[usize],
        strides: &[usize],
    ) -> Self {
        debug_assert_eq!(shape.len(), strides.len(), "rank mismatch");
        Self {
            buffer,
            data_type,
            shape: shape.into(),
            strides: strides.into(),
            offset: 0,
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Element offset of the first element inside the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn byte_offset(&self) -> usize {
        self.data_type.bytes_for(self.offset)
    }

    pub fn dim(
        &self,
        dim: usize,
    ) -> usize {
        self.shape[dim]
    }

    /// Size of the last dimension, `0` for scalars.
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    pub fn stride(
        &self,
        dim: usize,
    ) -> usize {
        self.strides[dim]
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn len_bytes(&self) -> usize {
        self.data_type.bytes_for(self.num_elements())
    }

    /// Rows `start..` along the leading dimension.
    pub fn narrow_from(
        &self,
        start: usize,
    ) -> Result<Self, ShapeError> {
        let rows = self.shape.first().copied().unwrap_or(0);
        if start > rows {
            return Err(ShapeError::SliceOutOfRange {
                start,
                len: 0,
                total: rows,
            });
        }
        self.narrow(start, rows - start)
    }

    /// Rows `start..start + len` along the leading dimension.
    pub fn narrow(
        &self,
        start: usize,
        len: usize,
    ) -> Result<Self, ShapeError> {
        let rows = self.shape.first().copied().unwrap_or(0);
        if start + len > rows {
            return Err(ShapeError::SliceOutOfRange {
                start,
                len,
                total: rows,
            });
        }
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = len;
        }
        Ok(Self {
            buffer: self.buffer,
            data_type: self.data_type,
            shape,
            strides: self.strides.clone(),
            offset: self.offset + start * self.strides.first().copied().unwrap_or(0),
        })
    }

    /// Selects fixed indices along the leading dimensions, dropping them.
    pub fn index(
        &self,
        indices: &[usize],
    ) -> Result<Self, ShapeError> {
        if indices.len() > self.rank() {
            return Err(ShapeError::RankMismatch {
                expected: indices.len(),
                actual: self.rank(),
            });
        }
        let mut offset = self.offset;
        for (dim, &index) in indices.iter().enumerate() {
            if index >= self.shape[dim] {
                return Err(ShapeError::SliceOutOfRange {
                    start: index,
                    len: 1,
                    total: self.shape[dim],
                });
            }
            offset += index * self.strides[dim];
        }
        Ok(Self {
            buffer: self.buffer,
            data_type: self.data_type,
            shape: self.shape[indices.len()..].into(),
            strides: self.strides[indices.len()..].into(),
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_moves_offset_by_row_stride() {
        let tensor = DeviceTensor::new(BufferId(3), DataType::F16, &[10, 4, 8]);
        let rows = tensor.narrow_from(6).unwrap();
        assert_eq!(rows.shape(), &[4, 4, 8]);
        assert_eq!(rows.offset(), 6 * 32);
        assert_eq!(rows.byte_offset(), 6 * 32 * 2);
        assert_eq!(rows.buffer(), BufferId(3));
    }

    #[test]
    fn test_narrow_out_of_range() {
        let tensor = DeviceTensor::new(BufferId(0), DataType::F32, &[5]);
        assert!(tensor.narrow(3, 3).is_err());
        assert!(tensor.narrow_from(5).is_ok());
        assert!(tensor.narrow_from(6).is_err());
    }

    #[test]
    fn test_index_leading_dimensions() {
        let offsets = DeviceTensor::new(BufferId(1), DataType::I32, &[3, 8, 2, 16]);
        let view = offsets.index(&[2, 5]).unwrap();
        assert_eq!(view.shape(), &[2, 16]);
        assert_eq!(view.offset(), 2 * 8 * 32 + 5 * 32);
        assert_eq!(view.last_dim(), 16);
        assert!(offsets.index(&[3]).is_err());
    }
}
