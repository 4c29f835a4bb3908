use std::fmt;

use crate::{
    errors::{Error, Result},
    helpers::ratio,
    resample::nearest_index,
};

/// One axis of a data cube.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    /// Name of the dimension, e.g. "x", "time" or "band"
    pub name: String,

    /// How indexes along the dimension map to coordinate values
    pub(crate) kind: DimensionKind,

    /// Reference system tag, e.g. "EPSG:32632", for dimensions with spatial semantics
    pub refsys: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DimensionKind {
    /// Coordinate of cell `i` is `offset + i * delta`
    Regular { len: usize, offset: f64, delta: f64 },

    /// Explicit coordinate value for every cell
    Irregular(Vec<f64>),

    /// Geometry valued index, stored as WKT
    Geometry(Vec<String>),

    /// Labels, e.g. band names
    Categorical(Vec<String>),

    /// Bare positions, no coordinate values
    Index(usize),
}

/// An external capability that re-maps a dimension into another reference system.
///
/// Implementations must keep the dimension's name and length.
///
pub trait Reprojector: Send + Sync {
    fn reproject(&self, dimension: &Dimension, target: &str) -> Result<Dimension>;
}

impl Dimension {
    fn validated(name: String, kind: DimensionKind) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::mismatch("dimension name can't be empty"));
        }

        let len = kind.len();
        if len == 0 {
            return Err(Error::mismatch(format!("dimension '{name}' has zero length")));
        }

        match &kind {
            DimensionKind::Regular { offset, delta, .. } => {
                if !offset.is_finite() || !delta.is_finite() || *delta == 0.0 {
                    return Err(Error::mismatch(format!(
                        "dimension '{name}' has a degenerate affine mapping"
                    )));
                }
            }
            DimensionKind::Irregular(values) => {
                if values.iter().any(|value| !value.is_finite()) {
                    return Err(Error::mismatch(format!(
                        "dimension '{name}' has undefined coordinate values"
                    )));
                }
            }
            _ => {}
        }

        Ok(Self {
            name,
            kind,
            refsys: None,
        })
    }

    pub fn regular<S: Into<String>>(name: S, len: usize, offset: f64, delta: f64) -> Result<Self> {
        Self::validated(name.into(), DimensionKind::Regular { len, offset, delta })
    }

    pub fn irregular<S: Into<String>>(name: S, values: Vec<f64>) -> Result<Self> {
        Self::validated(name.into(), DimensionKind::Irregular(values))
    }

    pub fn geometry<S: Into<String>>(name: S, geometries: Vec<String>) -> Result<Self> {
        Self::validated(name.into(), DimensionKind::Geometry(geometries))
    }

    pub fn categorical<S: Into<String>>(name: S, labels: Vec<String>) -> Result<Self> {
        Self::validated(name.into(), DimensionKind::Categorical(labels))
    }

    pub fn index<S: Into<String>>(name: S, len: usize) -> Result<Self> {
        Self::validated(name.into(), DimensionKind::Index(len))
    }

    /// Builder method tagging this dimension with a reference system.
    ///
    pub fn with_refsys<S: Into<String>>(mut self, refsys: S) -> Self {
        self.refsys = Some(refsys.into());
        self
    }

    pub fn kind(&self) -> &DimensionKind {
        &self.kind
    }

    pub fn len(&self) -> usize {
        self.kind.len()
    }

    /// Whether this dimension can be read at a length other than its native one.
    ///
    pub fn is_resamplable(&self) -> bool {
        match self.kind {
            DimensionKind::Regular { .. } | DimensionKind::Irregular(_) => true,
            DimensionKind::Index(_) => true,
            DimensionKind::Geometry(_) | DimensionKind::Categorical(_) => false,
        }
    }

    /// Coordinate value of cell `index`, for numeric dimensions.
    ///
    pub fn coordinate(&self, index: usize) -> Option<f64> {
        if index >= self.len() {
            return None;
        }

        match &self.kind {
            DimensionKind::Regular { offset, delta, .. } => Some(offset + index as f64 * delta),
            DimensionKind::Irregular(values) => Some(values[index]),
            DimensionKind::Index(_) => Some(index as f64),
            _ => None,
        }
    }

    /// Index of the cell containing `coordinate`.
    ///
    /// For irregular dimensions this is the cell with the nearest coordinate value.
    ///
    pub fn index_of(&self, coordinate: f64) -> Result<usize> {
        let index = match &self.kind {
            DimensionKind::Regular { len, offset, delta } => {
                let index = ((coordinate - offset) / delta).floor();
                if index < 0.0 || index >= *len as f64 {
                    None
                } else {
                    Some(index as usize)
                }
            }
            DimensionKind::Irregular(values) => {
                let (first, last) = (values[0], values[values.len() - 1]);
                let (low, high) = if first <= last {
                    (first, last)
                } else {
                    (last, first)
                };
                if coordinate < low || coordinate > high {
                    None
                } else {
                    values
                        .iter()
                        .enumerate()
                        .min_by(|(_, a), (_, b)| {
                            (*a - coordinate).abs().total_cmp(&(*b - coordinate).abs())
                        })
                        .map(|(index, _)| index)
                }
            }
            _ => {
                return Err(Error::mismatch(format!(
                    "dimension '{}' has no numeric coordinates",
                    self.name
                )));
            }
        };

        index.ok_or_else(|| {
            Error::OutOfBounds(format!(
                "coordinate {coordinate} is outside of dimension '{}'",
                self.name
            ))
        })
    }

    /// The dimension restricted to cells `start..end`.
    ///
    pub fn subset(&self, start: usize, end: usize) -> Result<Self> {
        if start >= end || end > self.len() {
            return Err(Error::OutOfBounds(format!(
                "subset {start}..{end} of dimension '{}' with length {}",
                self.name,
                self.len()
            )));
        }

        let kind = match &self.kind {
            DimensionKind::Regular { offset, delta, .. } => DimensionKind::Regular {
                len: end - start,
                offset: offset + start as f64 * delta,
                delta: *delta,
            },
            DimensionKind::Irregular(values) => {
                DimensionKind::Irregular(values[start..end].to_vec())
            }
            DimensionKind::Geometry(values) => DimensionKind::Geometry(values[start..end].to_vec()),
            DimensionKind::Categorical(values) => {
                DimensionKind::Categorical(values[start..end].to_vec())
            }
            DimensionKind::Index(_) => DimensionKind::Index(end - start),
        };

        Ok(Self {
            name: self.name.clone(),
            kind,
            refsys: self.refsys.clone(),
        })
    }

    /// The dimension covering the same span with `len` cells.
    ///
    pub fn resample(&self, len: usize) -> Result<Self> {
        let native = self.len();
        if len == native {
            return Ok(self.clone());
        }
        if len == 0 {
            return Err(Error::mismatch(format!(
                "can't resample dimension '{}' to zero length",
                self.name
            )));
        }

        let kind = match &self.kind {
            DimensionKind::Regular { offset, delta, .. } => DimensionKind::Regular {
                len,
                offset: *offset,
                delta: delta * ratio(native, len),
            },
            DimensionKind::Irregular(values) => DimensionKind::Irregular(
                (0..len)
                    .map(|i| values[nearest_index(i, native, len)])
                    .collect(),
            ),
            DimensionKind::Index(_) => DimensionKind::Index(len),
            DimensionKind::Geometry(_) | DimensionKind::Categorical(_) => {
                return Err(Error::mismatch(format!(
                    "dimension '{}' can't be resampled from {native} to {len} cells",
                    self.name
                )));
            }
        };

        Ok(Self {
            name: self.name.clone(),
            kind,
            refsys: self.refsys.clone(),
        })
    }

    /// Re-map this dimension into `target` using an external reprojector.
    ///
    /// Dimensions without a reference system are returned as is.
    ///
    pub fn reproject(&self, reprojector: &dyn Reprojector, target: &str) -> Result<Self> {
        if self.refsys.is_none() {
            return Ok(self.clone());
        }

        let reprojected = reprojector.reproject(self, target)?;
        if reprojected.name != self.name || reprojected.len() != self.len() {
            return Err(Error::mismatch(format!(
                "reprojecting dimension '{}' changed its name or length",
                self.name
            )));
        }

        Ok(reprojected)
    }
}

impl DimensionKind {
    pub fn len(&self) -> usize {
        match self {
            DimensionKind::Regular { len, .. } => *len,
            DimensionKind::Irregular(values) => values.len(),
            DimensionKind::Geometry(values) => values.len(),
            DimensionKind::Categorical(values) => values.len(),
            DimensionKind::Index(len) => *len,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DimensionKind::Regular { .. } => "regular",
            DimensionKind::Irregular(_) => "irregular",
            DimensionKind::Geometry(_) => "geometry",
            DimensionKind::Categorical(_) => "categorical",
            DimensionKind::Index(_) => "index",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<10} {:>8} {:<12}", self.name, self.len(), self.kind.name())?;
        match &self.kind {
            DimensionKind::Regular { offset, delta, .. } => {
                write!(f, " offset={offset} delta={delta}")?
            }
            DimensionKind::Irregular(values) => {
                write!(f, " {} .. {}", values[0], values[values.len() - 1])?
            }
            DimensionKind::Geometry(values) | DimensionKind::Categorical(values) => {
                write!(f, " {} ..", values[0])?
            }
            DimensionKind::Index(_) => {}
        }
        if let Some(refsys) = &self.refsys {
            write!(f, " [{refsys}]")?;
        }

        Ok(())
    }
}
