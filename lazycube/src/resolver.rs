use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::Path,
    sync::Arc,
};

use log::info;

use crate::{
    cache::Cache,
    config::Config,
    cube::{Cube, DataCube},
    errors::{Error, Result},
    execute, file,
    mapper::Mapper,
    proxy::ProxyCube,
    region::Target,
    source::SourceHandle,
};

/// The `Resolver` opens sources and consumes proxies with configured defaults.
///
/// To open sources, a Resolver must be provided with a concrete `Mapper` implementation. Results
/// of `consume_cached` are kept in RAM in an LRU cache up to `Config::cache_bytes`.
///
pub struct Resolver {
    mapper: Box<dyn Mapper>,
    config: Config,
    cache: Cache<(u64, u64), DataCube>,
}

impl Resolver {
    /// Create a new `Resolver`
    ///
    /// # Arguments
    ///
    /// * `mapper` - A boxed implementation of `Mapper`, which resolves handles to sources.
    /// * `config` - Materialization threshold, default resampling and cache size.
    ///
    pub fn new(mapper: Box<dyn Mapper>, config: Config) -> Self {
        let cache = Cache::new(config.cache_bytes);

        Self {
            mapper,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a source.
    ///
    /// Only the source's description is read unless `materialize` is set and the source has no
    /// more cells than `Config::materialize_threshold`, in which case every cell is read and a
    /// realized cube returned. Otherwise the result is a proxy with an empty chain.
    ///
    pub fn open<H: Into<SourceHandle>>(&self, handle: H, materialize: bool) -> Result<Cube> {
        let handle = handle.into();
        let unavailable = |err: Error| match err {
            Error::SourceUnavailable { .. } => err,
            err => Error::SourceUnavailable {
                handle: handle.to_string(),
                reason: err.to_string(),
            },
        };
        let source = self.mapper.load(&handle).map_err(unavailable)?;
        let schema = source.probe().map_err(unavailable)?;
        let cells = schema.cells().ok_or_else(|| Error::SourceUnavailable {
            handle: handle.to_string(),
            reason: String::from("more cells than can be addressed"),
        })?;
        let proxy = ProxyCube::new(source, schema);

        if !materialize {
            info!("{handle}: opened as a proxy");
            return Ok(Cube::Proxy(proxy));
        }

        if cells > self.config.materialize_threshold {
            info!(
                "{handle}: {cells} cells is more than {}, opened as a proxy",
                self.config.materialize_threshold
            );
            return Ok(Cube::Proxy(proxy));
        }

        let cube = self.consume(&proxy, &Target::new())?;
        info!("{handle}: read {cells} cells");

        Ok(Cube::Realized(cube))
    }

    /// Run the pending chain of `proxy` for `target`, resampling with the configured default when
    /// `target` doesn't name a method.
    ///
    pub fn consume(&self, proxy: &ProxyCube, target: &Target) -> Result<DataCube> {
        execute::consume(proxy, target, self.config.resampling)
    }

    /// Like `consume`, but reuses the result of an earlier consumption of the same chain for the
    /// same target if it is still cached.
    ///
    /// Several threads asking for the same result at once share a single read. Failures aren't
    /// cached. With `cache_bytes` of 0, this is `consume`.
    ///
    pub fn consume_cached(&self, proxy: &ProxyCube, target: &Target) -> Result<Arc<DataCube>> {
        if self.config.cache_bytes == 0 {
            return Ok(Arc::new(self.consume(proxy, target)?));
        }

        let key = self.cache_key(proxy, target);
        self.cache.get(&key, |_| self.consume(proxy, target))
    }

    /// Consume `proxy` for `target` and save the result to `path`.
    ///
    pub fn write<P: AsRef<Path>>(&self, proxy: &ProxyCube, target: &Target, path: P) -> Result<()> {
        let cube = self.consume(proxy, target)?;
        file::save(&cube, path.as_ref())?;
        info!(
            "{}: wrote {:?} to {}",
            proxy.handle(),
            cube.shape(),
            path.as_ref().display()
        );

        Ok(())
    }

    /// Chain nodes identify the source and every pending operation. Dimension metadata is hashed
    /// too, since reprojected proxies share their chain.
    ///
    fn cache_key(&self, proxy: &ProxyCube, target: &Target) -> (u64, u64) {
        let mut hasher = DefaultHasher::new();
        target.hash(&mut hasher);
        self.config.resampling.hash(&mut hasher);
        format!("{:?}", proxy.source_dimensions()).hash(&mut hasher);

        (proxy.head.id, hasher.finish())
    }
}
