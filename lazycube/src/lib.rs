mod cache;
mod chain;
mod config;
mod cube;
mod dimension;
mod errors;
mod execute;
mod extio;
mod file;
mod helpers;
mod mapper;
mod proxy;
mod region;
mod resample;
mod resolver;
mod source;

#[cfg(test)]
mod testing;

pub use cache::{Cache, Cacheable};
pub use chain::{Aggregation, CellFn, FunctionSpec, Kernel, LaneFn, Locality, PendingOp};
pub use config::Config;
pub use cube::{Attribute, Cube, DataCube};
pub use dimension::{Dimension, DimensionKind, Reprojector};
pub use errors::{Error, Result};
pub use file::{save, FileSource};
pub use helpers::rearrange;
pub use mapper::{FileMapper, Mapper, MemoryMapper};
pub use proxy::ProxyCube;
pub use region::{Extent, ReadStrategy, Region, Resolution, Target};
pub use resample::{nearest_index, resample, window, Resampling};
pub use resolver::Resolver;
pub use source::{MemorySource, RawBlock, ReadRequest, Schema, Source, SourceHandle};
