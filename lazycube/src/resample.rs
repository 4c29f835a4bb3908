use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// How cells are combined when an axis is read at a length other than its native one.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Take the cell under the centre of each output cell
    #[default]
    Nearest,

    /// Mean of the present cells covered by each output cell
    Average,
}

/// Index of the source cell under the centre of output cell `index`, when `native` cells are
/// read as `len` cells.
///
pub fn nearest_index(index: usize, native: usize, len: usize) -> usize {
    let source = ((2 * index + 1) * native) / (2 * len);

    source.min(native - 1)
}

/// Source cells covered by output cell `index`, when `native` cells are read as `len` cells.
///
/// Always covers at least one cell, so upsampling repeats cells.
///
pub fn window(index: usize, native: usize, len: usize) -> (usize, usize) {
    let start = (index * native / len).min(native - 1);
    let end = ((index + 1) * native + len - 1) / len;

    (start, end.max(start + 1).min(native))
}

/// Resample every axis of `values` to the lengths in `shape`.
///
pub fn resample(
    values: ArrayViewD<'_, Option<f64>>,
    shape: &[usize],
    method: Resampling,
) -> Result<ArrayD<Option<f64>>> {
    if shape.len() != values.ndim() {
        return Err(Error::mismatch(format!(
            "can't resample {} dimensional values to shape {shape:?}",
            values.ndim()
        )));
    }
    if shape.iter().any(|len| *len == 0) {
        return Err(Error::mismatch(format!("can't resample to shape {shape:?}")));
    }

    let mut resampled = values.to_owned();
    for (axis, len) in shape.iter().enumerate() {
        if resampled.shape()[axis] != *len {
            resampled = resample_axis(resampled.view(), Axis(axis), *len, method);
        }
    }

    Ok(resampled)
}

fn resample_axis(
    values: ArrayViewD<'_, Option<f64>>,
    axis: Axis,
    len: usize,
    method: Resampling,
) -> ArrayD<Option<f64>> {
    let native = values.len_of(axis);
    match method {
        Resampling::Nearest => {
            let indices: Vec<usize> = (0..len).map(|i| nearest_index(i, native, len)).collect();

            values.select(axis, &indices)
        }
        Resampling::Average => {
            let mut shape = values.shape().to_vec();
            shape[axis.index()] = len;
            let mut resampled = ArrayD::from_elem(shape, None);
            for i in 0..len {
                let (start, end) = window(i, native, len);
                let covered = values.slice_axis(axis, Slice::from(start..end));
                let means = covered.map_axis(axis, |lane| mean_present(lane.iter()));
                resampled.index_axis_mut(axis, i).assign(&means);
            }

            resampled
        }
    }
}

fn mean_present<'a>(values: impl Iterator<Item = &'a Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .flatten()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    #[test]
    fn test_nearest_index() {
        assert_eq!(nearest_index(0, 10000, 100), 50);
        assert_eq!(nearest_index(99, 10000, 100), 9950);
        assert_eq!(nearest_index(0, 3, 3), 0);
        assert_eq!(nearest_index(2, 3, 3), 2);

        // Upsampling repeats
        let upsampled: Vec<usize> = (0..4).map(|i| nearest_index(i, 2, 4)).collect();
        assert_eq!(upsampled, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_window() {
        assert_eq!(window(0, 10, 5), (0, 2));
        assert_eq!(window(4, 10, 5), (8, 10));
        assert_eq!(window(0, 10, 3), (0, 4));
        assert_eq!(window(1, 10, 3), (3, 7));
        assert_eq!(window(2, 10, 3), (6, 10));
        assert_eq!(window(3, 2, 4), (1, 2));
    }

    #[test]
    fn test_same_shape_is_identity() -> Result<()> {
        let data = arr2(&[[Some(1.0), None], [Some(3.0), Some(4.0)]]).into_dyn();
        assert_eq!(resample(data.view(), &[2, 2], Resampling::Average)?, data);

        Ok(())
    }

    #[test]
    fn test_nearest_downsample() -> Result<()> {
        let data = Array2::from_shape_fn((4, 4), |(r, c)| Some((r * 4 + c) as f64)).into_dyn();
        let small = resample(data.view(), &[2, 2], Resampling::Nearest)?;
        let expected = arr2(&[[Some(5.0), Some(7.0)], [Some(13.0), Some(15.0)]]).into_dyn();
        assert_eq!(small, expected);

        Ok(())
    }

    #[test]
    fn test_average_downsample() -> Result<()> {
        let data = Array2::from_shape_fn((4, 4), |(r, c)| Some((r * 4 + c) as f64)).into_dyn();
        let small = resample(data.view(), &[2, 2], Resampling::Average)?;
        let expected = arr2(&[[Some(2.5), Some(4.5)], [Some(10.5), Some(12.5)]]).into_dyn();
        assert_eq!(small, expected);

        Ok(())
    }

    #[test]
    fn test_average_skips_absent() -> Result<()> {
        let data = arr1(&[None, Some(3.0), None, None]).into_dyn();
        let small = resample(data.view(), &[2], Resampling::Average)?;
        assert_eq!(small, arr1(&[Some(3.0), None]).into_dyn());

        Ok(())
    }

    #[test]
    fn test_bad_shape() {
        let data = arr1(&[Some(1.0)]).into_dyn();
        assert!(resample(data.view(), &[1, 1], Resampling::Nearest).is_err());
        assert!(resample(data.view(), &[0], Resampling::Nearest).is_err());
    }
}
