use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::{
    cube::DataCube,
    errors::{Error, Result},
    file::FileSource,
    source::{MemorySource, Source, SourceHandle},
};

/// A trait for resolving source handles into readable sources.
///
/// Resolving should only read enough to describe the source; cell values are read later, one
/// region at a time.
///
pub trait Mapper: Send + Sync {
    /// Resolve `handle`, failing with `SourceUnavailable` if it can't be opened.
    ///
    fn load(&self, handle: &SourceHandle) -> Result<Arc<dyn Source>>;
}

fn unsupported(handle: &SourceHandle) -> Error {
    Error::SourceUnavailable {
        handle: handle.to_string(),
        reason: String::from("no mapping for this kind of handle"),
    }
}

/// Resolves path handles to cube files on the local file system.
///
#[derive(Default)]
pub struct FileMapper;

impl FileMapper {
    pub fn new() -> Self {
        Self
    }
}

impl Mapper for FileMapper {
    fn load(&self, handle: &SourceHandle) -> Result<Arc<dyn Source>> {
        match handle {
            SourceHandle::Path(path) => Ok(Arc::new(FileSource::open(path)?)),
            _ => Err(unsupported(handle)),
        }
    }
}

/// Resolves `mem://` handles to cubes registered in RAM.
///
/// Every load of a name returns the same source object.
///
#[derive(Default)]
pub struct MemoryMapper {
    sources: Mutex<HashMap<String, Arc<dyn Source>>>,
}

impl MemoryMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cube` under `name`, replacing any cube already registered under that name.
    ///
    pub fn insert<S: Into<String>>(&self, name: S, cube: DataCube) {
        let name = name.into();
        let source = MemorySource::new(SourceHandle::Memory(name.clone()), cube);
        self.sources.lock().insert(name, Arc::new(source));
    }
}

impl Mapper for MemoryMapper {
    fn load(&self, handle: &SourceHandle) -> Result<Arc<dyn Source>> {
        match handle {
            SourceHandle::Memory(name) => match self.sources.lock().get(name) {
                Some(source) => Ok(Arc::clone(source)),
                None => Err(Error::SourceUnavailable {
                    handle: handle.to_string(),
                    reason: String::from("nothing registered under this name"),
                }),
            },
            _ => Err(unsupported(handle)),
        }
    }
}
