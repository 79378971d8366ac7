//! Per-sample records and collated batches

use crate::{Error, Result};
use ndarray::{Array1, ArrayD};
use std::collections::BTreeMap;

/// One logical example, possibly nested, possibly missing.
///
/// Training, validation and test samples follow the `[inputs, targets]`
/// convention: a two-element [`Sample::Seq`] whose first entry holds the
/// model inputs and whose second holds the targets. See [`Sample::pair`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Missing sample; skipped by collation at the top level
    None,
    Array(ArrayD<f32>),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, Sample>),
    Seq(Vec<Sample>),
    /// Opaque payload. Datasets may carry it but it cannot be batched.
    Bytes(Vec<u8>),
}

impl Sample {
    /// Build an `[inputs, targets]` training sample
    pub fn pair(inputs: Vec<Sample>, targets: Vec<Sample>) -> Self {
        Self::Seq(vec![Self::Seq(inputs), Self::Seq(targets)])
    }

    /// 1-D array leaf from a slice
    pub fn from_slice(values: &[f32]) -> Self {
        Self::Array(Array1::from(values.to_vec()).into_dyn())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Sample)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Array(_) => "array",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Map(_) => "map",
            Self::Seq(_) => "seq",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Samples merged along a new leading axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Array(ArrayD<f32>),
    Int(Array1<i64>),
    Float(Array1<f64>),
    Str(Vec<String>),
    Map(BTreeMap<String, Batch>),
    Seq(Vec<Batch>),
}

impl Batch {
    /// Number of rows: the leading axis of the first leaf
    pub fn len(&self) -> usize {
        match self {
            Self::Array(a) => a.shape().first().copied().unwrap_or(0),
            Self::Int(a) => a.len(),
            Self::Float(a) => a.len(),
            Self::Str(v) => v.len(),
            Self::Map(m) => m.values().next().map_or(0, Batch::len),
            Self::Seq(v) => v.first().map_or(0, Batch::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Map(_) => "map",
            Self::Seq(_) => "seq",
        }
    }

    pub fn as_array(&self) -> Result<&ArrayD<f32>> {
        match self {
            Self::Array(a) => Ok(a),
            other => Err(unexpected("array", other)),
        }
    }

    pub fn as_int(&self) -> Result<&Array1<i64>> {
        match self {
            Self::Int(a) => Ok(a),
            other => Err(unexpected("int", other)),
        }
    }

    pub fn as_seq(&self) -> Result<&[Batch]> {
        match self {
            Self::Seq(v) => Ok(v),
            other => Err(unexpected("seq", other)),
        }
    }

    /// Entry `index` of a sequence batch
    pub fn at(&self, index: usize) -> Result<&Batch> {
        let items = self.as_seq()?;
        items.get(index).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "batch has {} positions, position {index} requested",
                items.len()
            ))
        })
    }

    /// Split a training batch into `(inputs, targets)`
    pub fn split_io(&self) -> Result<(&Batch, &Batch)> {
        match self.as_seq()? {
            [inputs, targets] => Ok((inputs, targets)),
            items => Err(Error::InvalidParameter(format!(
                "training batch must be [inputs, targets], got {} positions",
                items.len()
            ))),
        }
    }

    /// Consuming variant of [`Batch::split_io`]
    pub fn into_io(self) -> Result<(Batch, Batch)> {
        match self {
            Self::Seq(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(inputs), Some(targets)) => Ok((inputs, targets)),
                    _ => Err(Error::InvalidParameter("empty training batch".into())),
                }
            }
            other => Err(Error::InvalidParameter(format!(
                "training batch must be [inputs, targets], got {}",
                other.kind()
            ))),
        }
    }
}

fn unexpected(expected: &str, got: &Batch) -> Error {
    Error::InvalidParameter(format!("expected {expected} batch, got {}", got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_batch_len_follows_first_leaf() {
        let batch = Batch::Seq(vec![
            Batch::Array(ArrayD::zeros(ndarray::IxDyn(&[3, 2]))),
            Batch::Int(arr1(&[1, 2, 3])),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(Batch::Seq(vec![]).len(), 0);
    }

    #[test]
    fn test_split_io_requires_two_positions() {
        let batch = Batch::Seq(vec![Batch::Int(arr1(&[1]))]);
        assert!(batch.split_io().is_err());

        let batch = Batch::Seq(vec![Batch::Int(arr1(&[1])), Batch::Float(arr1(&[2.0]))]);
        let (inputs, targets) = batch.split_io().unwrap();
        assert_eq!(inputs.kind(), "int");
        assert_eq!(targets.kind(), "float");
    }

    #[test]
    fn test_pair_builds_nested_sequences() {
        let s = Sample::pair(vec![Sample::from_slice(&[1.0])], vec![Sample::Int(0)]);
        match s {
            Sample::Seq(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1], Sample::Seq(vec![Sample::Int(0)]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
