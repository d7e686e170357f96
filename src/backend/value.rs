//! Host-side arrays fed into and fetched out of a backend.

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Dimension marker for the batch axis, unbound at compile time.
pub const BATCH: i64 = -1;

/// Element type of a node or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    I64,
}

/// Element storage of a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    F32(Vec<f32>),
    I64(Vec<i64>),
}

impl ValueData {
    fn len(&self) -> usize {
        match self {
            ValueData::F32(data) => data.len(),
            ValueData::I64(data) => data.len(),
        }
    }
}

/// A dense row-major array with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    shape: Vec<usize>,
    data: ValueData,
}

impl Value {
    /// Creates a float value, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        Self::with_data(shape, ValueData::F32(data))
    }

    /// Creates an integer value, checking that `data` fills `shape` exactly.
    pub fn new_i64(shape: Vec<usize>, data: Vec<i64>) -> Result<Self, ModelError> {
        Self::with_data(shape, ValueData::I64(data))
    }

    fn with_data(shape: Vec<usize>, data: ValueData) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::invalid_data(format!(
                "shape {:?} requires {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Rank-0 float value.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: vec![],
            data: ValueData::F32(vec![value]),
        }
    }

    /// Rank-0 integer value.
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            shape: vec![],
            data: ValueData::I64(vec![value]),
        }
    }

    /// Rank-1 float value.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data: ValueData::F32(data),
        }
    }

    /// Float value with every element set to `value`.
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: ValueData::F32(vec![value; len]),
        }
    }

    /// Rank-2 float value built from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ModelError> {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(row) = rows.iter().find(|r| r.len() != columns) {
            return Err(ModelError::invalid_data(format!(
                "all rows must have {} columns, found a row with {}",
                columns,
                row.len()
            )));
        }
        let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::new(vec![rows.len(), columns], data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            ValueData::F32(_) => DType::F32,
            ValueData::I64(_) => DType::I64,
        }
    }

    pub fn data(&self) -> &ValueData {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows along the leading axis, `None` for rank-0 values.
    pub fn rows(&self) -> Option<usize> {
        self.shape.first().copied()
    }

    /// Returns the float elements, or `None` for integer values.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            ValueData::F32(data) => Some(data),
            ValueData::I64(_) => None,
        }
    }

    /// Returns the integer elements, or `None` for float values.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            ValueData::I64(data) => Some(data),
            ValueData::F32(_) => None,
        }
    }

    /// Returns every element converted to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            ValueData::F32(data) => data.clone(),
            ValueData::I64(data) => data.iter().map(|&v| v as f32).collect(),
        }
    }

    /// Returns the single element of a one-element value.
    pub fn to_scalar(&self) -> Option<f32> {
        if self.len() == 1 {
            self.to_f32_vec().first().copied()
        } else {
            None
        }
    }

    /// Mean of all elements as `f32`, `None` when the value is empty.
    pub fn mean(&self) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        let values = self.to_f32_vec();
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }

    /// Copies `len` rows starting at row `start` along the leading axis.
    pub fn slice_rows(&self, start: usize, len: usize) -> Result<Value, ModelError> {
        let Some(rows) = self.rows() else {
            return Err(ModelError::invalid_data("cannot slice rows of a rank-0 value"));
        };
        if start + len > rows {
            return Err(ModelError::invalid_data(format!(
                "row range {}..{} is out of bounds for {} rows",
                start,
                start + len,
                rows
            )));
        }
        let row_size: usize = self.shape[1..].iter().product();
        let range = start * row_size..(start + len) * row_size;
        let mut shape = self.shape.clone();
        shape[0] = len;
        let data = match &self.data {
            ValueData::F32(data) => ValueData::F32(data[range].to_vec()),
            ValueData::I64(data) => ValueData::I64(data[range].to_vec()),
        };
        Ok(Value { shape, data })
    }

    /// Returns true when this value can be fed into a node declared with
    /// `shape`, where [`BATCH`] matches any size.
    pub fn matches_shape(&self, shape: &[i64]) -> bool {
        self.shape.len() == shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(&actual, &declared)| declared == BATCH || declared == actual as i64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_creation() {
        let value = Value::new(vec![2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(value.shape(), &[2, 3]);
        assert_eq!(value.dtype(), DType::F32);
        assert_eq!(value.rows(), Some(2));
    }

    #[test]
    fn test_value_element_count_mismatch() {
        let err = Value::new(vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidData { .. }));
    }

    #[test]
    fn test_from_rows() {
        let value = Value::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(value.shape(), &[3, 2]);
        assert_eq!(value.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert!(Value::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_slice_rows() {
        let value = Value::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let slice = value.slice_rows(1, 2).unwrap();
        assert_eq!(slice.shape(), &[2, 2]);
        assert_eq!(slice.as_f32().unwrap(), &[3.0, 4.0, 5.0, 6.0]);

        assert!(value.slice_rows(2, 2).is_err());
        assert!(Value::scalar(1.0).slice_rows(0, 1).is_err());
    }

    #[test]
    fn test_matches_shape() {
        let value = Value::new(vec![4, 3], vec![0.0; 12]).unwrap();
        assert!(value.matches_shape(&[BATCH, 3]));
        assert!(value.matches_shape(&[4, 3]));
        assert!(!value.matches_shape(&[BATCH, 2]));
        assert!(!value.matches_shape(&[3]));
    }

    #[test]
    fn test_integer_values() {
        let value = Value::scalar_i64(7);
        assert_eq!(value.dtype(), DType::I64);
        assert_eq!(value.as_i64().unwrap(), &[7]);
        assert!(value.as_f32().is_none());
        assert_eq!(value.to_scalar(), Some(7.0));
    }

    #[test]
    fn test_mean() {
        assert_eq!(Value::vector(vec![1.0, 2.0, 3.0]).mean(), Some(2.0));
        assert_eq!(Value::vector(vec![]).mean(), None);
    }
}
