//! The boundary to external I/O: anything that can describe and read a raster
//!
use std::{fmt, path::PathBuf, sync::Arc};

use ndarray::{ArrayD, Slice};

use crate::{
    cube::DataCube,
    dimension::Dimension,
    errors::{Error, Result},
    region::Extent,
    resample::{resample, Resampling},
};

/// An opaque reference to a readable raster resource.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceHandle {
    Path(PathBuf),
    Url(String),
    Archive { archive: PathBuf, member: String },
    Memory(String),
}

impl SourceHandle {
    /// Interpret a string as a source handle.
    ///
    /// `http://`, `https://` and `s3://` are URLs, `mem://name` names an in memory source,
    /// `/vsizip/archive.zip/member` and `archive.zip!member` refer into an archive, anything
    /// else is a path.
    ///
    pub fn parse(handle: &str) -> Self {
        if handle.starts_with("http://")
            || handle.starts_with("https://")
            || handle.starts_with("s3://")
        {
            return Self::Url(handle.to_string());
        }

        if let Some(name) = handle.strip_prefix("mem://") {
            return Self::Memory(name.to_string());
        }

        if let Some(path) = handle.strip_prefix("/vsizip/") {
            if let Some(split) = path.find(".zip/") {
                let (archive, member) = path.split_at(split + 4);
                return Self::Archive {
                    archive: PathBuf::from(archive),
                    member: member[1..].to_string(),
                };
            }
        }

        if let Some((archive, member)) = handle.split_once('!') {
            return Self::Archive {
                archive: PathBuf::from(archive),
                member: member.to_string(),
            };
        }

        Self::Path(PathBuf::from(handle))
    }
}

impl From<&str> for SourceHandle {
    fn from(handle: &str) -> Self {
        Self::parse(handle)
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceHandle::Path(path) => write!(f, "{}", path.display()),
            SourceHandle::Url(url) => write!(f, "{url}"),
            SourceHandle::Archive { archive, member } => {
                write!(f, "/vsizip/{}/{member}", archive.display())
            }
            SourceHandle::Memory(name) => write!(f, "mem://{name}"),
        }
    }
}

/// What probing a source reveals: its dimensions and attribute names.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<String>,
}

impl Schema {
    /// Number of cells per attribute, or `None` if that doesn't fit in a `usize`.
    ///
    pub fn cells(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |cells, dim| cells.checked_mul(dim.len()))
    }
}

/// A bounded read: one extent per source dimension, read as `shape` cells.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub region: Vec<Extent>,
    pub shape: Vec<usize>,
    pub resampling: Resampling,
}

impl ReadRequest {
    /// Whether this request reads every cell of its region without resampling.
    pub fn is_native(&self) -> bool {
        self.region
            .iter()
            .zip(&self.shape)
            .all(|(extent, len)| extent.len() == *len)
    }
}

/// Values returned by a read, one array per attribute in schema order.
///
#[derive(Clone, Debug, PartialEq)]
pub struct RawBlock {
    pub attributes: Vec<ArrayD<Option<f64>>>,
}

/// A readable raster resource.
///
/// Sources are shared between proxies and may be read from several threads at once.
///
pub trait Source: Send + Sync {
    /// The handle this source was resolved from
    fn handle(&self) -> &SourceHandle;

    /// Describe the source without reading any cell values
    fn probe(&self) -> Result<Schema>;

    /// Read a region at the requested shape
    fn read_region(&self, request: &ReadRequest) -> Result<RawBlock>;
}

/// A source backed by a realized cube held in memory.
///
pub struct MemorySource {
    handle: SourceHandle,
    cube: Arc<DataCube>,
}

impl MemorySource {
    pub fn new(handle: SourceHandle, cube: DataCube) -> Self {
        Self {
            handle,
            cube: Arc::new(cube),
        }
    }

    pub fn schema(&self) -> Schema {
        Schema {
            dimensions: self.cube.dimensions().to_vec(),
            attributes: self
                .cube
                .attributes()
                .iter()
                .map(|attr| attr.name.clone())
                .collect(),
        }
    }
}

impl Source for MemorySource {
    fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    fn probe(&self) -> Result<Schema> {
        Ok(self.schema())
    }

    fn read_region(&self, request: &ReadRequest) -> Result<RawBlock> {
        let ndim = self.cube.dimensions().len();
        if request.region.len() != ndim || request.shape.len() != ndim {
            return Err(Error::ReadError {
                handle: self.handle.to_string(),
                reason: format!("request doesn't match {ndim} dimensions"),
            });
        }
        for (extent, dim) in request.region.iter().zip(self.cube.dimensions()) {
            if extent.end > dim.len() {
                return Err(Error::ReadError {
                    handle: self.handle.to_string(),
                    reason: format!(
                        "{}..{} is outside of dimension '{}'",
                        extent.start, extent.end, dim.name
                    ),
                });
            }
        }

        let mut attributes = Vec::with_capacity(self.cube.attributes().len());
        for attribute in self.cube.attributes() {
            let mut view = attribute.values.view();
            for (axis, extent) in request.region.iter().enumerate() {
                view.slice_axis_inplace(ndarray::Axis(axis), Slice::from(extent.start..extent.end));
            }
            attributes.push(resample(view, &request.shape, request.resampling)?);
        }

        Ok(RawBlock { attributes })
    }
}
