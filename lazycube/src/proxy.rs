use std::{fmt, sync::Arc};

use log::debug;

use crate::{
    chain::{Aggregation, FunctionSpec, Kernel, Node, PendingOp},
    cube::DataCube,
    dimension::{Dimension, Reprojector},
    errors::{Error, Result},
    execute,
    region::{Region, Target},
    resample::Resampling,
    source::{Schema, Source, SourceHandle},
};

/// A data cube whose values have not been read.
///
/// A proxy holds a shared source and a chain of pending operations. Building on a proxy never
/// reads or computes anything and never changes the proxy it was built from; values are only
/// produced when the proxy is consumed.
///
#[derive(Clone)]
pub struct ProxyCube {
    pub(crate) source: Arc<dyn Source>,

    /// Dimensions of the source, as read
    pub(crate) base: Arc<Vec<Dimension>>,

    pub(crate) attributes: Arc<Vec<String>>,

    /// Dimensions of the result of the pending chain
    dimensions: Vec<Dimension>,

    pub(crate) head: Arc<Node>,
}

impl ProxyCube {
    pub(crate) fn new(source: Arc<dyn Source>, schema: Schema) -> Self {
        let resolution = schema.dimensions.iter().map(|dim| dim.len()).collect();
        let head = Node::root(Region::full(&schema.dimensions), resolution);

        Self {
            source,
            dimensions: schema.dimensions.clone(),
            base: Arc::new(schema.dimensions),
            attributes: Arc::new(schema.attributes),
            head,
        }
    }

    pub fn handle(&self) -> &SourceHandle {
        self.source.handle()
    }

    /// Dimensions the proxy will have once consumed at native resolution
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Dimensions of the underlying source
    pub fn source_dimensions(&self) -> &[Dimension] {
        &self.base
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Pending operations in the order they were requested, starting with the read.
    ///
    pub fn ops(&self) -> Vec<PendingOp> {
        self.head.ops()
    }

    /// Whether every pending transform is tagged cell independent.
    ///
    pub fn is_reorder_safe(&self) -> bool {
        self.ops().iter().all(PendingOp::is_reorderable)
    }

    /// Whether two proxies read through the same source object.
    ///
    pub fn shares_source(&self, other: &ProxyCube) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.dimensions
            .iter()
            .position(|dim| dim.name == name)
            .ok_or_else(|| {
                Error::mismatch(format!(
                    "no dimension named '{name}', cube has {:?}",
                    self.names()
                ))
            })
    }

    fn names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|dim| dim.name.as_str()).collect()
    }

    fn positions<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            let position = self.position(name.as_ref())?;
            if positions.contains(&position) {
                return Err(Error::mismatch(format!(
                    "dimension '{}' is named more than once",
                    name.as_ref()
                )));
            }
            positions.push(position);
        }

        Ok(positions)
    }

    fn derive(&self, dimensions: Vec<Dimension>, op: PendingOp) -> Self {
        debug!("{}: pending {op}", self.handle());
        Self {
            source: Arc::clone(&self.source),
            base: Arc::clone(&self.base),
            attributes: Arc::clone(&self.attributes),
            dimensions,
            head: self.head.append(op),
        }
    }

    /// Append a transform to the pending chain. `function` is not evaluated.
    ///
    /// `over` names the dimensions the function applies over. For cell functions it must be
    /// empty or name every dimension. Lane functions keep the dimensions in `over` and drop the
    /// others. Window functions slide their window along the dimensions in `over`.
    ///
    pub fn apply<S: AsRef<str>>(&self, function: FunctionSpec, over: &[S]) -> Result<Self> {
        let positions = self.positions(over)?;
        let over: Vec<String> = over.iter().map(|name| name.as_ref().to_string()).collect();

        let dimensions = match &function.kernel {
            Kernel::Cell(_) => {
                if !positions.is_empty() && positions.len() != self.dimensions.len() {
                    return Err(Error::mismatch(format!(
                        "cell function '{}' applies over every dimension, not {over:?}",
                        function.name
                    )));
                }
                self.dimensions.clone()
            }
            Kernel::Lane(_) => {
                if positions.is_empty() {
                    return Err(Error::mismatch(format!(
                        "lane function '{}' must keep at least one dimension",
                        function.name
                    )));
                }
                self.dimensions
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| positions.contains(i))
                    .map(|(_, dim)| dim.clone())
                    .collect()
            }
            Kernel::Window { .. } => {
                if positions.is_empty() {
                    return Err(Error::mismatch(format!(
                        "window function '{}' needs at least one dimension to slide along",
                        function.name
                    )));
                }
                self.dimensions.clone()
            }
        };

        Ok(self.derive(dimensions, PendingOp::Transform { function, over }))
    }

    /// Append a reduction over `dimensions`. `aggregation` is not evaluated.
    ///
    /// The result keeps the remaining dimensions in order and length.
    ///
    pub fn reduce<S: AsRef<str>>(&self, dimensions: &[S], aggregation: Aggregation) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::mismatch("reduce needs at least one dimension"));
        }
        let positions = self.positions(dimensions)?;
        let remaining = self
            .dimensions
            .iter()
            .enumerate()
            .filter(|(i, _)| !positions.contains(i))
            .map(|(_, dim)| dim.clone())
            .collect();
        let dimensions = dimensions
            .iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        Ok(self.derive(
            remaining,
            PendingOp::Reduce {
                dimensions,
                aggregation,
            },
        ))
    }

    /// Re-map the coordinate descriptors of every dimension carrying a reference system.
    ///
    /// Only metadata changes; cell values are read from the source exactly as before.
    ///
    pub fn reproject(&self, reprojector: &dyn Reprojector, target: &str) -> Result<Self> {
        let base = self
            .base
            .iter()
            .map(|dim| dim.reproject(reprojector, target))
            .collect::<Result<Vec<_>>>()?;
        let dimensions = self
            .dimensions
            .iter()
            .map(|dim| match base.iter().find(|other| other.name == dim.name) {
                Some(reprojected) if dim.len() == reprojected.len() => reprojected.clone(),
                _ => dim.clone(),
            })
            .collect();

        Ok(Self {
            source: Arc::clone(&self.source),
            base: Arc::new(base),
            attributes: Arc::clone(&self.attributes),
            dimensions,
            head: Arc::clone(&self.head),
        })
    }

    /// Run the pending chain for `target` with nearest neighbor resampling and no caching.
    ///
    /// See `Resolver::consume` for consuming with configured defaults.
    ///
    pub fn consume(&self, target: &Target) -> Result<DataCube> {
        execute::consume(self, target, Resampling::default())
    }
}

impl fmt::Debug for ProxyCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCube")
            .field("handle", self.handle())
            .field("dimensions", &self.names())
            .field("attributes", &self.attributes)
            .field("ops", &self.ops())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::Locality, dimension::DimensionKind, testing};
    use std::thread;

    #[test]
    fn test_apply_unknown_dimension() -> Result<()> {
        let (source, proxy) = testing::recording_proxy(10, 10)?;
        let ndvi = FunctionSpec::lane("ndvi", testing::ndvi);
        let result = proxy.apply(ndvi, &["x", "lat"]);
        assert!(matches!(result, Err(Error::DimensionMismatch(_))));
        assert!(source.requests().is_empty());

        Ok(())
    }

    #[test]
    fn test_apply_duplicate_dimension() -> Result<()> {
        let (_, proxy) = testing::recording_proxy(10, 10)?;
        let ndvi = FunctionSpec::lane("ndvi", testing::ndvi);
        assert!(proxy.apply(ndvi, &["x", "x"]).is_err());

        Ok(())
    }

    #[test]
    fn test_apply_cell_needs_every_dimension() -> Result<()> {
        let (_, proxy) = testing::recording_proxy(10, 10)?;
        let scale = FunctionSpec::cell("scale", |x| x * 2.0);
        assert!(proxy.apply(scale.clone(), &["x"]).is_err());
        assert!(proxy.apply(scale.clone(), &["x", "y", "band"]).is_ok());
        assert!(proxy.apply::<&str>(scale, &[]).is_ok());

        Ok(())
    }

    #[test]
    fn test_apply_lane_drops_dimensions() -> Result<()> {
        let (source, proxy) = testing::recording_proxy(10, 20)?;
        let ndvi = proxy.apply(FunctionSpec::lane("ndvi", testing::ndvi), &["x", "y"])?;
        let names: Vec<&str> = ndvi.dimensions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(ndvi.dimensions()[1].len(), 20);
        assert!(proxy
            .apply::<&str>(FunctionSpec::lane("ndvi", testing::ndvi), &[])
            .is_err());
        assert!(source.requests().is_empty());

        Ok(())
    }

    #[test]
    fn test_apply_window_keeps_dimensions() -> Result<()> {
        let (_, proxy) = testing::recording_proxy(10, 20)?;
        let focal = FunctionSpec::window("focal", 1, |values| Aggregation::Mean.aggregate(values));
        let smoothed = proxy.apply(focal.clone(), &["x", "y"])?;
        assert_eq!(smoothed.dimensions(), proxy.dimensions());
        assert!(!smoothed.is_reorder_safe());
        assert!(proxy.apply::<&str>(focal, &[]).is_err());

        Ok(())
    }

    #[test]
    fn test_reduce_drops_dimension() -> Result<()> {
        let (source, proxy) = testing::recording_proxy(10, 20)?;
        let reduced = proxy.reduce(&["y"], Aggregation::Mean)?;
        let names: Vec<&str> = reduced.dimensions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["x", "band"]);
        assert_eq!(reduced.dimensions()[0], proxy.dimensions()[0]);
        assert_eq!(reduced.dimensions()[1], proxy.dimensions()[2]);

        assert!(matches!(
            proxy.reduce(&["time"], Aggregation::Mean),
            Err(Error::DimensionMismatch(_))
        ));
        assert!(proxy.reduce::<&str>(&[], Aggregation::Mean).is_err());
        assert!(reduced.reduce(&["y"], Aggregation::Mean).is_err());
        assert!(source.requests().is_empty());

        Ok(())
    }

    #[test]
    fn test_appending_leaves_ancestors_alone() -> Result<()> {
        let (_, proxy) = testing::recording_proxy(10, 10)?;
        let before = proxy.ops().len();
        let scaled = proxy.apply::<&str>(FunctionSpec::cell("scale", |x| x * 2.0), &[])?;
        let reduced = scaled.reduce(&["band"], Aggregation::Sum)?;
        let focal = scaled.apply(
            FunctionSpec::lane("first", |values| values[0]).with_locality(Locality::Neighborhood),
            &["x", "y"],
        )?;

        assert_eq!(proxy.ops().len(), before);
        assert_eq!(scaled.ops().len(), before + 1);
        assert_eq!(reduced.ops().len(), before + 2);
        assert_eq!(focal.ops().len(), before + 2);
        assert_eq!(scaled.dimensions().len(), 3);
        assert!(scaled.is_reorder_safe());
        assert!(reduced.is_reorder_safe());
        assert!(!focal.is_reorder_safe());
        assert!(reduced.shares_source(&focal));

        Ok(())
    }

    #[test]
    fn test_branching_across_threads() -> Result<()> {
        let (_, proxy) = testing::recording_proxy(10, 10)?;
        let describe =
            |proxy: &ProxyCube| -> Vec<String> { proxy.ops().iter().map(ToString::to_string).collect() };
        let ancestor = describe(&proxy);

        let branches = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let proxy = &proxy;
                    scope.spawn(move || -> Result<ProxyCube> {
                        let factor = i as f64;
                        proxy
                            .apply::<&str>(
                                FunctionSpec::cell(format!("scale{i}"), move |x| x * factor),
                                &[],
                            )?
                            .reduce(&["band"], Aggregation::Max)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect::<Result<Vec<_>>>()
        })?;

        assert_eq!(describe(&proxy), ancestor);
        assert_eq!(proxy.dimensions().len(), 3);
        for (i, branch) in branches.iter().enumerate() {
            let ops = describe(branch);
            assert_eq!(ops.len(), ancestor.len() + 2);
            assert_eq!(ops[..ancestor.len()], ancestor[..]);
            assert!(ops[ancestor.len()].contains(&format!("scale{i}")));
            assert!(branch.shares_source(&proxy));
        }

        // Each branch computes with its own function
        let once = branches[1].consume(&Target::new())?;
        let twice = branches[2].consume(&Target::new())?;
        for (a, b) in once.attributes()[0]
            .values
            .iter()
            .zip(twice.attributes()[0].values.iter())
        {
            assert_eq!(a.map(|value| value * 2.0), *b);
        }

        Ok(())
    }

    #[test]
    fn test_reproject() -> Result<()> {
        struct Offset;

        impl Reprojector for Offset {
            fn reproject(&self, dimension: &Dimension, target: &str) -> Result<Dimension> {
                match *dimension.kind() {
                    DimensionKind::Regular { len, offset, delta } => Ok(Dimension::regular(
                        dimension.name.clone(),
                        len,
                        offset + 1000.0,
                        delta,
                    )?
                    .with_refsys(target)),
                    _ => Ok(dimension.clone()),
                }
            }
        }

        let (_, proxy) = testing::recording_proxy(4, 4)?;
        let reduced = proxy.reduce(&["band"], Aggregation::Max)?;
        let moved = reduced.reproject(&Offset, "EPSG:3857")?;
        assert_eq!(moved.dimensions().len(), 2);
        assert_eq!(moved.dimensions()[0].coordinate(0), Some(1000.0));
        assert_eq!(moved.dimensions()[0].refsys.as_deref(), Some("EPSG:3857"));
        assert_eq!(moved.source_dimensions()[0].coordinate(0), Some(1000.0));

        // Untagged band dimension left alone, original untouched
        assert_eq!(moved.source_dimensions()[2], proxy.source_dimensions()[2]);
        assert_eq!(reduced.dimensions()[0].coordinate(0), Some(0.0));

        let consumed = moved.consume(&Target::new())?;
        assert_eq!(consumed.dimensions(), moved.dimensions());

        Ok(())
    }
}
