use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::helpers::rearrange;
use crate::{
    dimension::Dimension,
    errors::{Error, Result},
    resample::Resampling,
};

/// A half open range of indexes along one dimension.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Extent {
    pub start: usize,
    pub end: usize,
    _private: (),
}

impl Extent {
    pub fn new(start: usize, end: usize) -> Self {
        let (start, end) = rearrange(start, end);
        Self {
            start,
            end,
            _private: (),
        }
    }

    pub fn full(len: usize) -> Self {
        Self::new(0, len)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Index extents by dimension name. Dimensions not named cover their full range.
///
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    extents: Vec<(String, Extent)>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method restricting `dimension` to `start..end`.
    ///
    pub fn with<S: Into<String>>(mut self, dimension: S, start: usize, end: usize) -> Self {
        let dimension = dimension.into();
        let extent = Extent::new(start, end);
        match self.extents.iter_mut().find(|(name, _)| *name == dimension) {
            Some(entry) => entry.1 = extent,
            None => self.extents.push((dimension, extent)),
        }

        self
    }

    /// Builder method restricting `dimension` to the cells covering the coordinates `from..to`.
    ///
    pub fn with_coordinates(mut self, dimension: &Dimension, from: f64, to: f64) -> Result<Self> {
        let first = dimension.index_of(from)?;
        let last = dimension.index_of(to)?;
        let (first, last) = rearrange(first, last);
        self = self.with(dimension.name.clone(), first, last + 1);

        Ok(self)
    }

    pub fn get(&self, dimension: &str) -> Option<Extent> {
        self.extents
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, extent)| *extent)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extents.iter().map(|(name, _)| name.as_str())
    }

    /// The region covering all of the given dimensions.
    ///
    pub fn full(dimensions: &[Dimension]) -> Self {
        let extents = dimensions
            .iter()
            .map(|dim| (dim.name.clone(), Extent::full(dim.len())))
            .collect();

        Self { extents }
    }

    /// Resolve against a list of dimensions, producing one extent per dimension, in order.
    ///
    /// Fails if the region names an unknown dimension or reaches past the end of one.
    ///
    pub fn resolve(&self, dimensions: &[Dimension]) -> Result<Vec<Extent>> {
        for name in self.names() {
            if !dimensions.iter().any(|dim| dim.name == name) {
                return Err(Error::mismatch(format!(
                    "extent names unknown dimension '{name}'"
                )));
            }
        }

        dimensions
            .iter()
            .map(|dim| {
                let extent = self.get(&dim.name).unwrap_or(Extent::full(dim.len()));
                if extent.end > dim.len() {
                    Err(Error::OutOfBounds(format!(
                        "extent {}..{} exceeds dimension '{}' of length {}",
                        extent.start,
                        extent.end,
                        dim.name,
                        dim.len()
                    )))
                } else if extent.is_empty() {
                    Err(Error::OutOfBounds(format!(
                        "extent for dimension '{}' is empty",
                        dim.name
                    )))
                } else {
                    Ok(extent)
                }
            })
            .collect()
    }
}

/// Output lengths by dimension name. Dimensions not named keep the length of their extent.
///
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    lengths: Vec<(String, usize)>,
}

impl Resolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<S: Into<String>>(mut self, dimension: S, len: usize) -> Self {
        let dimension = dimension.into();
        match self.lengths.iter_mut().find(|(name, _)| *name == dimension) {
            Some(entry) => entry.1 = len,
            None => self.lengths.push((dimension, len)),
        }

        self
    }

    pub fn get(&self, dimension: &str) -> Option<usize> {
        self.lengths
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, len)| *len)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lengths.iter().map(|(name, _)| name.as_str())
    }
}

/// How `consume` is allowed to order downsampling relative to the pending chain.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStrategy {
    /// Downsample at read time whenever the chain is provably reorder safe.
    #[default]
    Auto,

    /// Require downsampling at read time; fails if the chain is not reorder safe.
    Downsample,

    /// Always read at native resolution and downsample the result.
    Native,
}

/// What a consumer wants out of a proxy: an extent in source index space and an output
/// resolution for the dimensions of the result.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Target {
    pub extent: Region,
    pub resolution: Resolution,
    pub strategy: ReadStrategy,

    /// Overrides the resampling method configured for the resolver.
    pub resampling: Option<Resampling>,
}

impl Target {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extent(mut self, extent: Region) -> Self {
        self.extent = extent;
        self
    }

    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn strategy(mut self, strategy: ReadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn resampling(mut self, resampling: Resampling) -> Self {
        self.resampling = Some(resampling);
        self
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.extent.hash(state);
        self.resolution.hash(state);
        self.strategy.hash(state);
        self.resampling.hash(state);
    }
}
