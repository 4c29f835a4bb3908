//! Planning and running the pending chain of a proxy
//!
use ndarray::{indices, ArrayD, Dimension as _, IxDyn};

use log::{debug, warn};

use crate::{
    chain::{Kernel, PendingOp},
    cube::{Attribute, DataCube},
    dimension::Dimension,
    errors::{Error, Result},
    proxy::ProxyCube,
    region::{ReadStrategy, Target},
    resample::{resample, Resampling},
    source::{RawBlock, ReadRequest},
};

/// The single read needed to consume a proxy for a target.
///
#[derive(Debug)]
pub(crate) struct Plan {
    pub request: ReadRequest,

    /// Dimensions of the block the read returns
    pub dimensions: Vec<Dimension>,

    /// Length of each output dimension, in output order
    pub output: Vec<usize>,

    /// Whether the read itself does the downsampling
    pub downsample_at_read: bool,
}

/// Work out what to read, validating `target` against the proxy. Does no I/O.
///
pub(crate) fn plan(proxy: &ProxyCube, target: &Target, resampling: Resampling) -> Result<Plan> {
    let resampling = target.resampling.unwrap_or(resampling);
    let base = proxy.source_dimensions();
    let extents = target.extent.resolve(base)?;

    for name in target.resolution.names() {
        if !proxy.dimensions().iter().any(|dim| dim.name == name) {
            return Err(Error::mismatch(format!(
                "resolution names '{name}', which isn't a dimension of the result"
            )));
        }
    }

    let mut output = Vec::with_capacity(proxy.dimensions().len());
    for dim in proxy.dimensions() {
        let position = base
            .iter()
            .position(|other| other.name == dim.name)
            .ok_or_else(|| Error::mismatch(format!("dimension '{}' has no source", dim.name)))?;
        let native = extents[position].len();
        let len = target.resolution.get(&dim.name).unwrap_or(native);
        if len == 0 {
            return Err(Error::mismatch(format!(
                "can't consume dimension '{}' at zero length",
                dim.name
            )));
        }
        if len != native && !dim.is_resamplable() {
            return Err(Error::mismatch(format!(
                "dimension '{}' is a {} dimension and can't be resampled",
                dim.name,
                dim.kind.name()
            )));
        }
        output.push(len);
    }

    let reorder_safe = proxy.is_reorder_safe();
    let downsample_at_read = match target.strategy {
        ReadStrategy::Auto => reorder_safe,
        ReadStrategy::Native => false,
        ReadStrategy::Downsample => {
            if !reorder_safe {
                let blocking: Vec<String> = proxy
                    .ops()
                    .iter()
                    .filter(|op| !op.is_reorderable())
                    .map(|op| op.to_string())
                    .collect();
                return Err(Error::UnsupportedReorder(format!(
                    "can't downsample before {blocking:?}"
                )));
            }
            true
        }
    };

    let mut shape = Vec::with_capacity(base.len());
    let mut dimensions = Vec::with_capacity(base.len());
    for (dim, extent) in base.iter().zip(&extents) {
        let surviving = proxy
            .dimensions()
            .iter()
            .position(|other| other.name == dim.name);
        let len = match surviving {
            Some(position) if downsample_at_read => output[position],
            _ => extent.len(),
        };
        shape.push(len);
        dimensions.push(dim.subset(extent.start, extent.end)?.resample(len)?);
    }

    Ok(Plan {
        request: ReadRequest {
            region: extents,
            shape,
            resampling,
        },
        dimensions,
        output,
        downsample_at_read,
    })
}

/// Consume a proxy: plan, issue one read, run the chain and bring the result to the target
/// resolution.
///
pub(crate) fn consume(
    proxy: &ProxyCube,
    target: &Target,
    resampling: Resampling,
) -> Result<DataCube> {
    let plan = plan(proxy, target, resampling)?;
    debug!(
        "{}: reading {:?} as {:?} (downsample at read: {})",
        proxy.handle(),
        plan.request.region,
        plan.request.shape,
        plan.downsample_at_read
    );

    let block = read(proxy, &plan.request)?;
    let attributes = proxy
        .attributes()
        .iter()
        .zip(block.attributes)
        .map(|(name, values)| Attribute::new(name.clone(), values))
        .collect();
    let mut cube = DataCube::new(plan.dimensions, attributes)?;

    for op in proxy.ops().into_iter().skip(1) {
        debug!("{}: running {op}", proxy.handle());
        cube = run(op, cube)?;
    }

    if cube.shape() != plan.output {
        debug!(
            "{}: resampling result from {:?} to {:?}",
            proxy.handle(),
            cube.shape(),
            plan.output
        );
        cube = resample_cube(cube, &plan.output, plan.request.resampling)?;
    }

    Ok(cube)
}

fn read(proxy: &ProxyCube, request: &ReadRequest) -> Result<RawBlock> {
    let handle = proxy.handle().to_string();
    let block = match proxy.source.read_region(request) {
        Ok(block) => block,
        Err(err) => {
            warn!("{handle}: read failed: {err}");
            return Err(match err {
                Error::ReadError { .. } | Error::SourceUnavailable { .. } => err,
                err => Error::ReadError {
                    handle,
                    reason: err.to_string(),
                },
            });
        }
    };

    if block.attributes.len() != proxy.attributes().len() {
        return Err(Error::ReadError {
            handle,
            reason: format!(
                "expected {} attributes, read {}",
                proxy.attributes().len(),
                block.attributes.len()
            ),
        });
    }
    for values in &block.attributes {
        if values.shape() != request.shape.as_slice() {
            return Err(Error::ReadError {
                handle,
                reason: format!(
                    "expected a block of shape {:?}, read {:?}",
                    request.shape,
                    values.shape()
                ),
            });
        }
    }

    Ok(block)
}

fn positions(cube: &DataCube, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            cube.dimensions()
                .iter()
                .position(|dim| dim.name == *name)
                .ok_or_else(|| Error::mismatch(format!("no dimension named '{name}'")))
        })
        .collect()
}

/// Run one operation over a realized cube.
///
pub(crate) fn run(op: PendingOp, cube: DataCube) -> Result<DataCube> {
    match op {
        PendingOp::Read { .. } => Ok(cube),
        PendingOp::Transform { function, over } => match function.kernel {
            Kernel::Cell(function) => {
                let (dimensions, attributes) = cube.into_parts();
                let attributes = attributes
                    .into_iter()
                    .map(|attr| Attribute {
                        values: attr.values.mapv(|value| value.map(|x| function(x))),
                        name: attr.name,
                    })
                    .collect();

                DataCube::new(dimensions, attributes)
            }
            Kernel::Lane(function) => {
                let margin = positions(&cube, &over)?;
                apply_lanes(cube, &margin, |lane| function(lane))
            }
            Kernel::Window { radius, function } => {
                let axes = positions(&cube, &over)?;
                let (dimensions, attributes) = cube.into_parts();
                let attributes = attributes
                    .into_iter()
                    .map(|attr| Attribute {
                        values: apply_window(&attr.values, &axes, radius, |window| {
                            function(window)
                        }),
                        name: attr.name,
                    })
                    .collect();

                DataCube::new(dimensions, attributes)
            }
        },
        PendingOp::Reduce {
            dimensions,
            aggregation,
        } => {
            let dropped = positions(&cube, &dimensions)?;
            let margin: Vec<usize> = (0..cube.dimensions().len())
                .filter(|i| !dropped.contains(i))
                .collect();

            apply_lanes(cube, &margin, |lane| aggregation.aggregate(lane))
        }
    }
}

/// Call `function` once per cell of the `margin` dimensions with the values along every other
/// dimension, in row-major order. The other dimensions are dropped.
///
fn apply_lanes<F>(cube: DataCube, margin: &[usize], function: F) -> Result<DataCube>
where
    F: Fn(&[Option<f64>]) -> Option<f64>,
{
    let (dimensions, attributes) = cube.into_parts();
    let kept: Vec<usize> = (0..dimensions.len()).filter(|i| margin.contains(i)).collect();
    let lane: Vec<usize> = (0..dimensions.len()).filter(|i| !margin.contains(i)).collect();
    let permutation: Vec<usize> = kept.iter().chain(&lane).copied().collect();
    let shape: Vec<usize> = kept.iter().map(|i| dimensions[*i].len()).collect();
    let lane_len: usize = lane.iter().map(|i| dimensions[*i].len()).product();

    let mut applied = Vec::with_capacity(attributes.len());
    for attr in attributes {
        let permuted = attr.values.view().permuted_axes(permutation.clone());
        let flat: Vec<Option<f64>> = permuted.iter().copied().collect();
        let values: Vec<Option<f64>> = flat.chunks(lane_len).map(&function).collect();
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|err| Error::mismatch(err.to_string()))?;
        applied.push(Attribute::new(attr.name, values));
    }

    let dimensions = kept.into_iter().map(|i| dimensions[i].clone()).collect();

    DataCube::new(dimensions, applied)
}

/// Call `function` for every cell with the values in a window of `2 * radius + 1` cells along
/// each of `axes`. Cells past the edge are absent.
///
fn apply_window<F>(
    values: &ArrayD<Option<f64>>,
    axes: &[usize],
    radius: usize,
    function: F,
) -> ArrayD<Option<f64>>
where
    F: Fn(&[Option<f64>]) -> Option<f64>,
{
    let shape = values.shape().to_vec();
    let offsets: Vec<Vec<isize>> = indices(vec![2 * radius + 1; axes.len()])
        .into_iter()
        .map(|offset| {
            offset
                .slice()
                .iter()
                .map(|step| *step as isize - radius as isize)
                .collect()
        })
        .collect();

    ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        let mut probe = index.slice().to_vec();
        let window: Vec<Option<f64>> = offsets
            .iter()
            .map(|offset| {
                for (axis, step) in axes.iter().zip(offset) {
                    let position = index[*axis] as isize + step;
                    if position < 0 || position >= shape[*axis] as isize {
                        return None;
                    }
                    probe[*axis] = position as usize;
                }
                values[probe.as_slice()]
            })
            .collect();

        function(&window)
    })
}

fn resample_cube(cube: DataCube, shape: &[usize], method: Resampling) -> Result<DataCube> {
    let (dimensions, attributes) = cube.into_parts();
    let dimensions = dimensions
        .iter()
        .zip(shape)
        .map(|(dim, len)| dim.resample(*len))
        .collect::<Result<Vec<_>>>()?;
    let attributes = attributes
        .into_iter()
        .map(|attr| {
            Ok(Attribute::new(
                attr.name,
                resample(attr.values.view(), shape, method)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    DataCube::new(dimensions, attributes)
}
