//! Collation: merge per-sample records into one batch
//!
//! Missing samples are dropped first. The first remaining sample picks the
//! merge strategy and every other sample must have the same nested structure:
//! arrays are stacked along a new leading axis, scalars become 1-D arrays,
//! strings pass through, maps are collated per key and sequences are
//! transposed and collated per position.

use super::{Batch, Sample};
use crate::error::CollateError;
use ndarray::{ArrayViewD, Axis};
use std::collections::BTreeMap;

const ROOT: &str = "<root>";

/// Merge `samples` into one batch, skipping top-level `Sample::None`
pub fn collate(samples: Vec<Sample>) -> Result<Batch, CollateError> {
    let present: Vec<Sample> = samples.into_iter().filter(|s| !s.is_none()).collect();
    if present.is_empty() {
        return Err(CollateError::EmptyBatch);
    }
    collate_at(present, ROOT)
}

/// Merge strategy chosen from the first sample of a column
enum Strategy {
    Array,
    Int,
    Float,
    Str,
    Map(Vec<String>),
    Seq(usize),
}

impl Strategy {
    fn of(first: &Sample, path: &str) -> Result<Self, CollateError> {
        match first {
            Sample::Array(_) => Ok(Self::Array),
            Sample::Int(_) => Ok(Self::Int),
            Sample::Float(_) => Ok(Self::Float),
            Sample::Str(_) => Ok(Self::Str),
            // an empty container would collate to a batch without rows
            Sample::Map(m) if m.is_empty() => Err(mismatch(path, "empty map has no rows")),
            Sample::Seq(v) if v.is_empty() => Err(mismatch(path, "empty sequence has no rows")),
            Sample::Map(m) => Ok(Self::Map(m.keys().cloned().collect())),
            Sample::Seq(v) => Ok(Self::Seq(v.len())),
            Sample::None => Err(mismatch(path, "missing value inside a sample")),
            other => Err(CollateError::UnsupportedType {
                path: path.to_string(),
                type_name: other.type_name().to_string(),
            }),
        }
    }
}

fn collate_at(items: Vec<Sample>, path: &str) -> Result<Batch, CollateError> {
    // callers never pass an empty column
    let strategy = match items.first() {
        Some(first) => Strategy::of(first, path)?,
        None => return Err(CollateError::EmptyBatch),
    };

    match strategy {
        Strategy::Array => stack_arrays(&items, path),
        Strategy::Int => items
            .into_iter()
            .enumerate()
            .map(|(i, s)| match s {
                Sample::Int(v) => Ok(v),
                other => Err(variant_mismatch(path, i, "int", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|v| Batch::Int(v.into())),
        Strategy::Float => items
            .into_iter()
            .enumerate()
            .map(|(i, s)| match s {
                Sample::Float(v) => Ok(v),
                other => Err(variant_mismatch(path, i, "float", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|v| Batch::Float(v.into())),
        Strategy::Str => items
            .into_iter()
            .enumerate()
            .map(|(i, s)| match s {
                Sample::Str(v) => Ok(v),
                other => Err(variant_mismatch(path, i, "str", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Batch::Str),
        Strategy::Map(keys) => collate_maps(items, &keys, path),
        Strategy::Seq(width) => collate_seqs(items, width, path),
    }
}

fn stack_arrays(items: &[Sample], path: &str) -> Result<Batch, CollateError> {
    let mut views: Vec<ArrayViewD<'_, f32>> = Vec::with_capacity(items.len());
    let mut leaf_shape: Option<&[usize]> = None;

    for (i, s) in items.iter().enumerate() {
        let Sample::Array(a) = s else {
            return Err(variant_mismatch(path, i, "array", s));
        };
        match leaf_shape {
            None => leaf_shape = Some(a.shape()),
            Some(expected) if expected != a.shape() => {
                return Err(mismatch(
                    path,
                    format!(
                        "sample {i} has shape {:?}, expected {expected:?}",
                        a.shape()
                    ),
                ));
            }
            Some(_) => {}
        }
        views.push(a.view());
    }

    ndarray::stack(Axis(0), &views)
        .map(Batch::Array)
        .map_err(|e| mismatch(path, e.to_string()))
}

fn collate_maps(items: Vec<Sample>, keys: &[String], path: &str) -> Result<Batch, CollateError> {
    let mut columns: BTreeMap<String, Vec<Sample>> = keys
        .iter()
        .map(|k| (k.clone(), Vec::with_capacity(items.len())))
        .collect();

    for (i, s) in items.into_iter().enumerate() {
        let map = match s {
            Sample::Map(map) => map,
            other => return Err(variant_mismatch(path, i, "map", &other)),
        };
        if !map.keys().eq(keys.iter()) {
            return Err(mismatch(
                path,
                format!(
                    "sample {i} has keys {:?}, expected {keys:?}",
                    map.keys().collect::<Vec<_>>()
                ),
            ));
        }
        for (key, value) in map {
            if let Some(column) = columns.get_mut(&key) {
                column.push(value);
            }
        }
    }

    columns
        .into_iter()
        .map(|(key, column)| {
            let child = child_path(path, &format!(".{key}"));
            collate_at(column, &child).map(|batch| (key, batch))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(Batch::Map)
}

fn collate_seqs(items: Vec<Sample>, width: usize, path: &str) -> Result<Batch, CollateError> {
    let mut columns: Vec<Vec<Sample>> = (0..width)
        .map(|_| Vec::with_capacity(items.len()))
        .collect();

    for (i, s) in items.into_iter().enumerate() {
        let seq = match s {
            Sample::Seq(seq) => seq,
            other => return Err(variant_mismatch(path, i, "seq", &other)),
        };
        if seq.len() != width {
            return Err(mismatch(
                path,
                format!("sample {i} has {} positions, expected {width}", seq.len()),
            ));
        }
        for (column, value) in columns.iter_mut().zip(seq) {
            column.push(value);
        }
    }

    columns
        .into_iter()
        .enumerate()
        .map(|(pos, column)| collate_at(column, &child_path(path, &format!("[{pos}]"))))
        .collect::<Result<Vec<_>, _>>()
        .map(Batch::Seq)
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent == ROOT {
        segment.to_string()
    } else {
        format!("{parent}{segment}")
    }
}

fn mismatch(path: &str, reason: impl Into<String>) -> CollateError {
    CollateError::StructuralMismatch {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn variant_mismatch(path: &str, index: usize, expected: &str, got: &Sample) -> CollateError {
    mismatch(
        path,
        format!("sample {index} is {}, expected {expected}", got.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, ArrayD, IxDyn};
    use proptest::prelude::*;

    fn array(shape: &[usize], fill: f32) -> Sample {
        Sample::Array(ArrayD::from_elem(IxDyn(shape), fill))
    }

    #[test]
    fn test_all_missing_is_empty_batch() {
        assert_eq!(
            collate(vec![Sample::None, Sample::None]),
            Err(CollateError::EmptyBatch)
        );
        assert_eq!(collate(vec![]), Err(CollateError::EmptyBatch));
    }

    #[test]
    fn test_missing_samples_are_skipped() {
        let batch = collate(vec![Sample::Int(1), Sample::None, Sample::Int(3)]).unwrap();
        assert_eq!(batch, Batch::Int(arr1(&[1, 3])));
    }

    #[test]
    fn test_scalars_become_vectors() {
        let ints = collate(vec![Sample::Int(4), Sample::Int(5)]).unwrap();
        assert_eq!(ints, Batch::Int(arr1(&[4, 5])));

        let floats = collate(vec![Sample::Float(0.5), Sample::Float(1.5)]).unwrap();
        assert_eq!(floats, Batch::Float(arr1(&[0.5, 1.5])));
    }

    #[test]
    fn test_strings_pass_through() {
        let batch = collate(vec![Sample::Str("a".into()), Sample::Str("b".into())]).unwrap();
        assert_eq!(batch, Batch::Str(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_arrays_stack_on_new_axis() {
        let batch = collate(vec![array(&[2, 3], 1.0), array(&[2, 3], 2.0)]).unwrap();
        let stacked = batch.as_array().unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 3]);
        assert_eq!(stacked[[1, 0, 0]], 2.0);
    }

    #[test]
    fn test_array_shape_mismatch() {
        let err = collate(vec![array(&[2], 0.0), array(&[3], 0.0)]).unwrap_err();
        assert!(matches!(err, CollateError::StructuralMismatch { .. }));
    }

    #[test]
    fn test_mismatched_keys_fail() {
        let a = Sample::map([("a", Sample::Int(1)), ("b", Sample::Int(2))]);
        let b = Sample::map([("a", Sample::Int(3))]);
        let err = collate(vec![a, b]).unwrap_err();
        match err {
            CollateError::StructuralMismatch { path, reason } => {
                assert_eq!(path, "<root>");
                assert!(reason.contains("sample 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nested_map_of_sequences() {
        let sample = |x: f32, label: i64| {
            Sample::map([
                ("image", Sample::Seq(vec![array(&[2], x), Sample::Float(x as f64)])),
                ("label", Sample::Int(label)),
            ])
        };
        let batch = collate(vec![sample(1.0, 0), sample(2.0, 1), sample(3.0, 2)]).unwrap();

        let Batch::Map(map) = &batch else {
            panic!("expected map batch");
        };
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["image", "label"]);
        let image = map["image"].as_seq().unwrap();
        assert_eq!(image[0].as_array().unwrap().shape(), &[3, 2]);
        assert_eq!(image[1], Batch::Float(arr1(&[1.0, 2.0, 3.0])));
        assert_eq!(map["label"], Batch::Int(arr1(&[0, 1, 2])));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_sequence_length_mismatch() {
        let a = Sample::Seq(vec![Sample::Int(1), Sample::Int(2)]);
        let b = Sample::Seq(vec![Sample::Int(1)]);
        assert!(matches!(
            collate(vec![a, b]),
            Err(CollateError::StructuralMismatch { .. })
        ));
    }

    #[test]
    fn test_bytes_are_unsupported_with_path() {
        let s = |b: u8| Sample::map([("raw", Sample::Seq(vec![Sample::Bytes(vec![b])]))]);
        let err = collate(vec![s(1), s(2)]).unwrap_err();
        assert_eq!(
            err,
            CollateError::UnsupportedType {
                path: ".raw[0]".into(),
                type_name: "bytes".into(),
            }
        );
    }

    #[test]
    fn test_nested_none_is_a_mismatch() {
        let a = Sample::Seq(vec![Sample::Int(1), Sample::None]);
        let b = Sample::Seq(vec![Sample::Int(2), Sample::Int(3)]);
        let err = collate(vec![a, b]).unwrap_err();
        match err {
            CollateError::StructuralMismatch { path, .. } => assert_eq!(path, "[1]"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_containers_are_rejected() {
        let err = collate(vec![Sample::Seq(vec![]); 3]).unwrap_err();
        assert!(matches!(err, CollateError::StructuralMismatch { .. }));

        let s = || Sample::map([("targets", Sample::Map(BTreeMap::new()))]);
        match collate(vec![s(), s()]).unwrap_err() {
            CollateError::StructuralMismatch { path, .. } => assert_eq!(path, ".targets"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_variant_mismatch() {
        let err = collate(vec![Sample::Int(1), Sample::Float(1.0)]).unwrap_err();
        assert!(matches!(err, CollateError::StructuralMismatch { .. }));
    }

    proptest! {
        #[test]
        fn prop_batch_length_counts_present_samples(
            present in prop::collection::vec(any::<bool>(), 1..24),
            leaf in prop::collection::vec(1usize..4, 0..3),
        ) {
            prop_assume!(present.iter().any(|p| *p));
            let samples: Vec<Sample> = present
                .iter()
                .map(|&p| {
                    if p {
                        Sample::pair(vec![array(&leaf, 1.0)], vec![Sample::Int(1)])
                    } else {
                        Sample::None
                    }
                })
                .collect();
            let count = present.iter().filter(|p| **p).count();

            let batch = collate(samples).unwrap();
            prop_assert_eq!(batch.len(), count);

            let (inputs, targets) = batch.split_io().unwrap();
            let mut expected = vec![count];
            expected.extend_from_slice(&leaf);
            prop_assert_eq!(inputs.at(0).unwrap().as_array().unwrap().shape(), &expected[..]);
            prop_assert_eq!(targets.at(0).unwrap().len(), count);
        }
    }
}
