use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use ndarray::{ArrayD, Axis, IxDyn, Slice};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    cube::{Attribute, DataCube},
    dimension::Dimension,
    errors::{Error, Result},
    proxy::ProxyCube,
    resample::{nearest_index, resample, Resampling},
    source::{MemorySource, RawBlock, ReadRequest, Schema, Source, SourceHandle},
};

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A single attribute cube with dimensions "y" (rows) and "x" (cols).
///
pub(crate) fn grid_cube<F>(name: &str, rows: usize, cols: usize, f: F) -> Result<DataCube>
where
    F: Fn(usize, usize) -> Option<f64>,
{
    let dims = vec![
        Dimension::regular("y", rows, rows as f64, -1.0)?,
        Dimension::regular("x", cols, 0.0, 1.0)?,
    ];
    let attribute = Attribute::from_fn(name, &[rows, cols], |index| f(index[0], index[1]));

    DataCube::new(dims, vec![attribute])
}

/// Red reflectance at a cell of the synthetic scene.
pub(crate) fn red(x: usize, y: usize) -> Option<f64> {
    Some(0.05 + ((x * 7 + y * 3) % 11) as f64 / 100.0)
}

/// Near infrared reflectance at a cell of the synthetic scene. Water (every 13th column) has no
/// reading.
pub(crate) fn nir(x: usize, y: usize) -> Option<f64> {
    if x % 13 == 12 {
        None
    } else {
        Some(0.3 + ((x * 5 + y * 2) % 17) as f64 / 50.0)
    }
}

/// Normalized difference vegetation index of a [red, nir] lane.
pub(crate) fn ndvi(lane: &[Option<f64>]) -> Option<f64> {
    let (red, nir) = (lane[0]?, lane[1]?);

    Some((nir - red) / (nir + red))
}

/// A procedural scene with dimensions "x", "y" and "band" that records every read.
///
/// Cells are computed on demand so sources far larger than memory can be read at low
/// resolution.
///
pub(crate) struct RecordingSource {
    handle: SourceHandle,
    schema: Schema,
    requests: Mutex<Vec<ReadRequest>>,
    failing: AtomicBool,
    truncating: AtomicBool,
}

impl RecordingSource {
    pub(crate) fn new(cols: usize, rows: usize) -> Result<Self> {
        let dimensions = vec![
            Dimension::regular("x", cols, 0.0, 1.0)?.with_refsys("EPSG:32632"),
            Dimension::regular("y", rows, 0.0, 1.0)?.with_refsys("EPSG:32632"),
            Dimension::categorical("band", vec![String::from("red"), String::from("nir")])?,
        ];

        Ok(Self {
            handle: SourceHandle::Memory(String::from("scene")),
            schema: Schema {
                dimensions,
                attributes: vec![String::from("reflectance")],
            },
            requests: Mutex::new(vec![]),
            failing: AtomicBool::new(false),
            truncating: AtomicBool::new(false),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ReadRequest> {
        self.requests.lock().clone()
    }

    /// Make subsequent reads fail, or succeed again.
    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent reads return a block one row short.
    pub(crate) fn truncate(&self, truncating: bool) {
        self.truncating.store(truncating, Ordering::SeqCst);
    }

    fn cell(x: usize, y: usize, band: usize) -> Option<f64> {
        if band == 0 {
            red(x, y)
        } else {
            nir(x, y)
        }
    }
}

impl Source for RecordingSource {
    fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    fn probe(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    fn read_region(&self, request: &ReadRequest) -> Result<RawBlock> {
        self.requests.lock().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::ReadError {
                handle: self.handle.to_string(),
                reason: String::from("connection reset"),
            });
        }

        let region = &request.region;
        let values = match request.resampling {
            Resampling::Nearest => {
                let shape = &request.shape;
                ArrayD::from_shape_fn(IxDyn(shape), |index| {
                    let source: Vec<usize> = (0..3)
                        .map(|axis| {
                            region[axis].start
                                + nearest_index(index[axis], region[axis].len(), shape[axis])
                        })
                        .collect();
                    Self::cell(source[0], source[1], source[2])
                })
            }
            Resampling::Average => {
                let native: Vec<usize> = region.iter().map(|extent| extent.len()).collect();
                let values = ArrayD::from_shape_fn(IxDyn(&native), |index| {
                    Self::cell(
                        region[0].start + index[0],
                        region[1].start + index[1],
                        region[2].start + index[2],
                    )
                });
                resample(values.view(), &request.shape, Resampling::Average)?
            }
        };

        let values = if self.truncating.load(Ordering::SeqCst) {
            let rows = values.len_of(Axis(1));
            values
                .slice_axis(Axis(1), Slice::from(0..rows - 1))
                .to_owned()
        } else {
            values
        };

        Ok(RawBlock {
            attributes: vec![values],
        })
    }
}

/// A proxy over a fresh recording scene of `cols` by `rows` cells.
///
pub(crate) fn recording_proxy(cols: usize, rows: usize) -> Result<(Arc<RecordingSource>, ProxyCube)> {
    init_logging();
    let source = Arc::new(RecordingSource::new(cols, rows)?);
    let schema = source.probe()?;
    let proxy = ProxyCube::new(Arc::clone(&source) as Arc<dyn Source>, schema);

    Ok((source, proxy))
}

/// A realized cube of seeded random values with dimensions "x", "y" and "band".
///
pub(crate) fn random_cube(cols: usize, rows: usize, bands: usize) -> Result<DataCube> {
    let mut rng = StdRng::seed_from_u64(cols as u64 * 7919 + rows as u64 * 31 + bands as u64);
    let dims = vec![
        Dimension::regular("x", cols, 500000.0, 10.0)?,
        Dimension::regular("y", rows, 4200000.0, -10.0)?,
        Dimension::index("band", bands)?,
    ];
    let attribute = Attribute::from_fn("value", &[cols, rows, bands], |_| {
        Some(rng.gen_range(-100.0..100.0))
    });

    DataCube::new(dims, vec![attribute])
}

pub(crate) fn random_proxy(
    cols: usize,
    rows: usize,
    bands: usize,
) -> Result<(Arc<MemorySource>, ProxyCube)> {
    init_logging();
    let source = Arc::new(MemorySource::new(
        SourceHandle::Memory(String::from("random")),
        random_cube(cols, rows, bands)?,
    ));
    let proxy = ProxyCube::new(Arc::clone(&source) as Arc<dyn Source>, source.schema());

    Ok((source, proxy))
}
