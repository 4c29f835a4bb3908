use std::{fmt, sync::Arc};

use ndarray::{ArrayD, Dimension as _, IxDyn};

use crate::{
    cache::Cacheable,
    dimension::Dimension,
    errors::{Error, Result},
    proxy::ProxyCube,
    source::{MemorySource, SourceHandle},
};

/// A realized data cube: one or more attributes sharing the same dimensions.
///
/// Absent cells are `None` and stay absent through every operation.
///
#[derive(Clone, Debug, PartialEq)]
pub struct DataCube {
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    /// Name of the attribute, e.g. "reflectance"
    pub name: String,

    pub values: ArrayD<Option<f64>>,
}

/// What `open` hands back: either values already in memory or a proxy to read later.
///
pub enum Cube {
    Realized(DataCube),
    Proxy(ProxyCube),
}

impl Attribute {
    pub fn new<S: Into<String>>(name: S, values: ArrayD<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Attribute with every cell set by `f` applied to the cell's index.
    ///
    pub fn from_fn<S, F>(name: S, shape: &[usize], mut f: F) -> Self
    where
        S: Into<String>,
        F: FnMut(&[usize]) -> Option<f64>,
    {
        let values = ArrayD::from_shape_fn(IxDyn(shape), |index| f(index.slice()));

        Self::new(name, values)
    }
}

impl DataCube {
    pub fn new(dimensions: Vec<Dimension>, attributes: Vec<Attribute>) -> Result<Self> {
        for (i, dim) in dimensions.iter().enumerate() {
            if dimensions[..i].iter().any(|other| other.name == dim.name) {
                return Err(Error::mismatch(format!(
                    "dimension '{}' appears more than once",
                    dim.name
                )));
            }
        }

        let shape: Vec<usize> = dimensions.iter().map(|dim| dim.len()).collect();
        for (i, attribute) in attributes.iter().enumerate() {
            if attribute.values.shape() != shape.as_slice() {
                return Err(Error::mismatch(format!(
                    "attribute '{}' has shape {:?}, dimensions have shape {shape:?}",
                    attribute.name,
                    attribute.values.shape()
                )));
            }
            if attributes[..i].iter().any(|other| other.name == attribute.name) {
                return Err(Error::mismatch(format!(
                    "attribute '{}' appears more than once",
                    attribute.name
                )));
            }
        }

        Ok(Self {
            dimensions,
            attributes,
        })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|dim| dim.len()).collect()
    }

    /// Number of cells per attribute
    pub fn cells(&self) -> usize {
        self.dimensions.iter().map(|dim| dim.len()).product()
    }

    pub(crate) fn into_parts(self) -> (Vec<Dimension>, Vec<Attribute>) {
        (self.dimensions, self.attributes)
    }

    /// Group the attributes of two cubes with identical dimensions into one cube.
    ///
    pub fn merge(&self, other: &DataCube) -> Result<Self> {
        if self.dimensions != other.dimensions {
            return Err(Error::mismatch(
                "only cubes sharing the same dimensions can be merged",
            ));
        }

        let mut attributes = self.attributes.clone();
        attributes.extend(other.attributes.iter().cloned());

        Self::new(self.dimensions.clone(), attributes)
    }

    /// A cube holding only the named attribute.
    ///
    pub fn select(&self, name: &str) -> Result<Self> {
        let attribute = self
            .attribute(name)
            .ok_or_else(|| Error::mismatch(format!("no attribute named '{name}'")))?;

        Ok(Self {
            dimensions: self.dimensions.clone(),
            attributes: vec![attribute.clone()],
        })
    }

    /// One cube per attribute.
    ///
    pub fn split(&self) -> Vec<Self> {
        self.attributes
            .iter()
            .map(|attribute| Self {
                dimensions: self.dimensions.clone(),
                attributes: vec![attribute.clone()],
            })
            .collect()
    }

    /// Wrap this cube in an in-memory source so it can take part in a pending chain.
    ///
    pub fn lazy(self) -> ProxyCube {
        let source = MemorySource::new(SourceHandle::Memory(String::from("<realized>")), self);
        let (schema, source) = (source.schema(), Arc::new(source));

        ProxyCube::new(source, schema)
    }
}

impl Cube {
    pub fn dimensions(&self) -> &[Dimension] {
        match self {
            Cube::Realized(cube) => cube.dimensions(),
            Cube::Proxy(proxy) => proxy.dimensions(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Cube::Proxy(_))
    }

    /// View this cube as a proxy, wrapping realized values in an in-memory source.
    ///
    pub fn lazy(self) -> ProxyCube {
        match self {
            Cube::Realized(cube) => cube.lazy(),
            Cube::Proxy(proxy) => proxy,
        }
    }

    pub fn into_realized(self) -> Option<DataCube> {
        match self {
            Cube::Realized(cube) => Some(cube),
            Cube::Proxy(_) => None,
        }
    }

    pub fn into_proxy(self) -> Option<ProxyCube> {
        match self {
            Cube::Realized(_) => None,
            Cube::Proxy(proxy) => Some(proxy),
        }
    }
}

impl Cacheable for DataCube {
    fn size(&self) -> u64 {
        // A presence flag and a double per cell
        let cells = self.cells() * self.attributes.len();

        cells as u64 * 9
    }
}

impl fmt::Display for DataCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data cube with {} attribute(s):", self.attributes.len())?;
        for attribute in &self.attributes {
            let present: Vec<f64> = attribute.values.iter().flatten().copied().collect();
            let absent = attribute.values.len() - present.len();
            if present.is_empty() {
                writeln!(f, "  {:<12} all absent", attribute.name)?;
            } else {
                let min = present.iter().copied().fold(f64::INFINITY, f64::min);
                let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = present.iter().sum::<f64>() / present.len() as f64;
                writeln!(
                    f,
                    "  {:<12} min={min} mean={mean} max={max} absent={absent}",
                    attribute.name
                )?;
            }
        }
        writeln!(f, "dimensions:")?;
        for dim in &self.dimensions {
            writeln!(f, "  {dim}")?;
        }

        Ok(())
    }
}
