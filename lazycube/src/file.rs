//! A raw cube container and the source that reads it.
//!
//! Layout, all numbers big endian:
//!
//! * magic number `0x1A2C` and format version, `u16` each
//! * dimension count `u16`, then each dimension: name, kind, length, kind specific payload and
//!   an optional reference system
//! * attribute count `u16`, then each attribute name
//! * every cell of the first attribute in row-major order, then the second attribute and so on;
//!   each cell is a presence byte followed by an `f64`
//!
//! Cells have a fixed size, so any run of cells can be reached with a single seek.
//!
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::{indices, ArrayD, Dimension as _, IxDyn};

use crate::{
    cube::DataCube,
    dimension::{Dimension, DimensionKind},
    errors::{Error, Result},
    extio::{ExtendedRead, ExtendedWrite, Serialize},
    resample::{nearest_index, resample, Resampling},
    source::{RawBlock, ReadRequest, Schema, Source, SourceHandle},
};

const MAGIC: u16 = 0x1A2C;
const FORMAT_VERSION: u16 = 1;

/// Presence byte plus a double
const CELL_SIZE: u64 = 9;

const DIMENSION_REGULAR: u8 = 0;
const DIMENSION_IRREGULAR: u8 = 1;
const DIMENSION_GEOMETRY: u8 = 2;
const DIMENSION_CATEGORICAL: u8 = 3;
const DIMENSION_INDEX: u8 = 4;

fn invalid<S: Into<String>>(message: S) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn write_count(stream: &mut impl Write, count: usize) -> Result<()> {
    let count = u16::try_from(count).map_err(|_| invalid(format!("too many entries: {count}")))?;
    stream.write_u16(count)?;

    Ok(())
}

fn read_strs(stream: &mut impl Read, len: usize) -> io::Result<Vec<String>> {
    let mut strs = vec![];
    for _ in 0..len {
        strs.push(stream.read_str()?);
    }

    Ok(strs)
}

impl Serialize for Dimension {
    fn write_to(&self, stream: &mut impl Write) -> Result<()> {
        stream.write_str(&self.name)?;
        match &self.kind {
            DimensionKind::Regular { len, offset, delta } => {
                stream.write_byte(DIMENSION_REGULAR)?;
                stream.write_u64(*len as u64)?;
                stream.write_f64(*offset)?;
                stream.write_f64(*delta)?;
            }
            DimensionKind::Irregular(values) => {
                stream.write_byte(DIMENSION_IRREGULAR)?;
                stream.write_u64(values.len() as u64)?;
                for value in values {
                    stream.write_f64(*value)?;
                }
            }
            DimensionKind::Geometry(labels) | DimensionKind::Categorical(labels) => {
                let tag = match self.kind {
                    DimensionKind::Geometry(_) => DIMENSION_GEOMETRY,
                    _ => DIMENSION_CATEGORICAL,
                };
                stream.write_byte(tag)?;
                stream.write_u64(labels.len() as u64)?;
                for label in labels {
                    stream.write_str(label)?;
                }
            }
            DimensionKind::Index(len) => {
                stream.write_byte(DIMENSION_INDEX)?;
                stream.write_u64(*len as u64)?;
            }
        }

        match &self.refsys {
            Some(refsys) => {
                stream.write_byte(1)?;
                stream.write_str(refsys)?;
            }
            None => stream.write_byte(0)?,
        }

        Ok(())
    }

    fn read_from(stream: &mut impl Read) -> Result<Self> {
        let name = stream.read_str()?;
        let tag = stream.read_byte()?;
        let len = stream.read_u64()? as usize;
        let dimension = match tag {
            DIMENSION_REGULAR => {
                let offset = stream.read_f64()?;
                let delta = stream.read_f64()?;
                Dimension::regular(name, len, offset, delta)?
            }
            DIMENSION_IRREGULAR => {
                let mut values = vec![];
                for _ in 0..len {
                    values.push(stream.read_f64()?);
                }
                Dimension::irregular(name, values)?
            }
            DIMENSION_GEOMETRY => Dimension::geometry(name, read_strs(stream, len)?)?,
            DIMENSION_CATEGORICAL => Dimension::categorical(name, read_strs(stream, len)?)?,
            DIMENSION_INDEX => Dimension::index(name, len)?,
            _ => return Err(invalid(format!("unrecognized dimension kind {tag}")).into()),
        };

        let dimension = match stream.read_byte()? {
            0 => dimension,
            _ => dimension.with_refsys(stream.read_str()?),
        };

        Ok(dimension)
    }
}

/// Write a realized cube to `path`, replacing any existing file.
///
pub fn save<P: AsRef<Path>>(cube: &DataCube, path: P) -> Result<()> {
    let mut stream = BufWriter::new(File::create(path.as_ref())?);
    stream.write_u16(MAGIC)?;
    stream.write_u16(FORMAT_VERSION)?;

    write_count(&mut stream, cube.dimensions().len())?;
    for dim in cube.dimensions() {
        dim.write_to(&mut stream)?;
    }

    write_count(&mut stream, cube.attributes().len())?;
    for attribute in cube.attributes() {
        stream.write_str(&attribute.name)?;
    }

    for attribute in cube.attributes() {
        for value in attribute.values.iter() {
            stream.write_cell(*value)?;
        }
    }
    stream.flush()?;
    debug!(
        "saved {} cells to {}",
        cube.cells() * cube.attributes().len(),
        path.as_ref().display()
    );

    Ok(())
}

/// A source reading a file written by `save`.
///
/// Only the header is read when the source is opened. Each region read seeks to and reads the
/// runs of cells that fall inside the region.
///
pub struct FileSource {
    handle: SourceHandle,
    path: PathBuf,
    schema: Schema,

    /// Cells per attribute
    cells: u64,

    /// Offset of the first cell
    data: u64,
}

impl FileSource {
    /// Open a file and read its header.
    ///
    /// Fails with `SourceUnavailable` if the file is missing, isn't a cube file or is shorter than
    /// its header says.
    ///
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = SourceHandle::Path(path.clone());
        let unavailable = |reason: String| Error::SourceUnavailable {
            handle: handle.to_string(),
            reason,
        };

        let file = File::open(&path).map_err(|err| unavailable(err.to_string()))?;
        let size = file
            .metadata()
            .map_err(|err| unavailable(err.to_string()))?
            .len();
        let mut stream = BufReader::new(file);
        let (schema, data) =
            Self::read_header(&mut stream).map_err(|err| unavailable(err.to_string()))?;

        let cells = schema
            .cells()
            .and_then(|cells| u64::try_from(cells).ok())
            .ok_or_else(|| unavailable(String::from("more cells than can be addressed")))?;
        let expected = cells
            .checked_mul(schema.attributes.len() as u64)
            .and_then(|cells| cells.checked_mul(CELL_SIZE))
            .and_then(|bytes| bytes.checked_add(data))
            .ok_or_else(|| unavailable(String::from("more cells than can be addressed")))?;
        if size < expected {
            return Err(unavailable(format!(
                "truncated, expected {expected} bytes but found {size}"
            )));
        }

        Ok(Self {
            handle,
            path,
            schema,
            cells,
            data,
        })
    }

    fn read_header(stream: &mut BufReader<File>) -> Result<(Schema, u64)> {
        let magic = stream.read_u16()?;
        if magic != MAGIC {
            return Err(invalid(format!("not a cube file, bad magic number {magic:#06x}")).into());
        }
        let version = stream.read_u16()?;
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported format version {version}")).into());
        }

        let mut dimensions = vec![];
        for _ in 0..stream.read_u16()? {
            dimensions.push(Dimension::read_from(stream)?);
        }

        let count = stream.read_u16()? as usize;
        let attributes = read_strs(stream, count)?;
        let data = stream.stream_position()?;

        Ok((
            Schema {
                dimensions,
                attributes,
            },
            data,
        ))
    }

    /// Read the cells at the given indices for each attribute.
    ///
    /// `selected` holds one non-decreasing list of indices per dimension. Along the last
    /// dimension each contiguous run of distinct indices is read with a single seek and repeated
    /// indices are read once.
    ///
    fn read_cells(&self, selected: &[Vec<usize>]) -> io::Result<Vec<ArrayD<Option<f64>>>> {
        let shape: Vec<usize> = self.schema.dimensions.iter().map(|dim| dim.len()).collect();
        let mut strides = vec![1; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }

        let (last, outer) = match selected.split_last() {
            Some((last, outer)) => (last.as_slice(), outer),
            None => (&[0][..], selected),
        };
        let runs = runs(last);
        let outer_shape: Vec<usize> = outer.iter().map(Vec::len).collect();
        let read_shape: Vec<usize> = selected.iter().map(Vec::len).collect();

        let mut file = File::open(&self.path)?;
        let mut buffer: Vec<u8> = vec![];
        let mut row: Vec<Option<f64>> = vec![];
        let mut attributes = Vec::with_capacity(self.schema.attributes.len());
        for attribute in 0..self.schema.attributes.len() as u64 {
            let mut values = Vec::with_capacity(read_shape.iter().product());
            for index in indices(IxDyn(&outer_shape)) {
                let base: usize = index
                    .slice()
                    .iter()
                    .enumerate()
                    .map(|(axis, i)| outer[axis][*i] * strides[axis])
                    .sum();

                row.clear();
                for (start, len) in &runs {
                    let flat = (base + start) as u64;
                    let position = self.data + (attribute * self.cells + flat) * CELL_SIZE;
                    file.seek(SeekFrom::Start(position))?;
                    buffer.resize(len * CELL_SIZE as usize, 0);
                    file.read_exact(&mut buffer)?;

                    let mut stream = &buffer[..];
                    for _ in 0..*len {
                        row.push(stream.read_cell()?);
                    }
                }

                // Repeated indices share the cell read for their first occurrence
                let mut distinct = 0;
                for (i, index) in last.iter().enumerate() {
                    if i > 0 && last[i - 1] != *index {
                        distinct += 1;
                    }
                    values.push(row[distinct]);
                }
            }

            let values = ArrayD::from_shape_vec(IxDyn(&read_shape), values)
                .map_err(|err| invalid(err.to_string()))?;
            attributes.push(values);
        }

        Ok(attributes)
    }
}

/// Group the distinct indices of a non-decreasing list into `(start, len)` runs of contiguous
/// indices.
///
fn runs(selected: &[usize]) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = vec![];
    for &index in selected {
        match runs.last_mut() {
            Some((start, len)) if *start + *len == index => *len += 1,
            Some((start, len)) if *start + *len > index => {}
            _ => runs.push((index, 1)),
        }
    }

    runs
}

impl Source for FileSource {
    fn handle(&self) -> &SourceHandle {
        &self.handle
    }

    fn probe(&self) -> Result<Schema> {
        Ok(self.schema.clone())
    }

    fn read_region(&self, request: &ReadRequest) -> Result<RawBlock> {
        let read_error = |reason: String| Error::ReadError {
            handle: self.handle.to_string(),
            reason,
        };

        let dims = &self.schema.dimensions;
        if request.region.len() != dims.len() || request.shape.len() != dims.len() {
            return Err(read_error(format!(
                "request doesn't match {} dimensions",
                dims.len()
            )));
        }
        for (extent, dim) in request.region.iter().zip(dims) {
            if extent.end > dim.len() {
                return Err(read_error(format!(
                    "{}..{} is outside of dimension '{}'",
                    extent.start, extent.end, dim.name
                )));
            }
        }
        if request.region.iter().any(|extent| extent.is_empty()) || request.shape.contains(&0) {
            return Err(read_error(format!(
                "can't read {:?} at {:?}",
                request.region, request.shape
            )));
        }

        debug!(
            "{}: reading {:?} at {:?}",
            self.handle, request.region, request.shape
        );

        // Nearest reads pick their cells straight from the file, average reads need every cell
        let nearest = request.resampling == Resampling::Nearest;
        let selected: Vec<Vec<usize>> = request
            .region
            .iter()
            .zip(&request.shape)
            .map(|(extent, len)| {
                if nearest {
                    (0..*len)
                        .map(|i| extent.start + nearest_index(i, extent.len(), *len))
                        .collect()
                } else {
                    (extent.start..extent.end).collect()
                }
            })
            .collect();
        let attributes = self
            .read_cells(&selected)
            .map_err(|err| read_error(err.to_string()))?;

        let attributes = if nearest || request.is_native() {
            attributes
        } else {
            attributes
                .iter()
                .map(|values| resample(values.view(), &request.shape, request.resampling))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(RawBlock { attributes })
    }
}
