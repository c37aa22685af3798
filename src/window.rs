//! Maps a requested window onto the native grid and assembles the output
//! raster row by row.
//!
//! Output row `r` samples native row
//! `floor((north - (request_north - r * request_ns_res)) / ns_res)` and output
//! column `c` samples native column
//! `round((request_west + c * request_ew_res - west) / ew_res)`. Rows are
//! floored and columns rounded; existing data is aligned to this convention.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use crate::{
    compress::DecodedRow,
    header::CellFormat,
    io::{bit_at, Error, Result},
    progress::{percent, Outcome, ProgressListener},
    region::Region,
    DOUBLE_NULL, FLOAT_NULL, INT_NULL,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Deliver a double map as 32 bit floats.
    pub cast_double_to_float: bool,
}

/// A rectangle of native pixels. The origin may lie outside the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

/// The world-space window to read and the shape of the output raster.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowRequest {
    region: Region,
}

impl WindowRequest {
    /// Reads `region` with its own rows and columns as the output shape.
    pub fn new(region: Region) -> Self {
        WindowRequest { region }
    }

    /// The whole native grid at full resolution.
    pub fn full(native: &Region) -> Self {
        WindowRequest { region: *native }
    }

    /// Reads every `x_step`-th column and `y_step`-th row of `rect`,
    /// starting with its first. A step of 0 counts as 1.
    pub fn from_pixels(
        native: &Region,
        rect: PixelRect,
        x_step: usize,
        y_step: usize,
    ) -> Result<Self> {
        let (x_step, y_step) = (x_step.max(1), y_step.max(1));
        let cols = (rect.width + x_step - 1) / x_step;
        let rows = (rect.height + y_step - 1) / y_step;
        let ew_res = native.ew_res() * x_step as f64;
        let ns_res = native.ns_res() * y_step as f64;
        let west = native.west() + rect.x as f64 * native.ew_res();
        let north = native.north() - rect.y as f64 * native.ns_res();
        let region = Region::from_rows_cols(
            west,
            west + cols as f64 * ew_res,
            north - rows as f64 * ns_res,
            north,
            rows,
            cols,
        )?;
        Ok(WindowRequest { region })
    }

    /// Resamples `rect` onto an output of exactly `cols` by `rows` cells.
    pub fn from_pixels_with_size(
        native: &Region,
        rect: PixelRect,
        cols: usize,
        rows: usize,
    ) -> Result<Self> {
        let west = native.west() + rect.x as f64 * native.ew_res();
        let north = native.north() - rect.y as f64 * native.ns_res();
        let region = Region::from_rows_cols(
            west,
            west + rect.width as f64 * native.ew_res(),
            north - rect.height as f64 * native.ns_res(),
            north,
            rows,
            cols,
        )?;
        Ok(WindowRequest { region })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn rows(&self) -> usize {
        self.region.rows()
    }

    pub fn cols(&self) -> usize {
        self.region.cols()
    }
}

/// A decoded native row together with its packed null bits, if the map has
/// a null bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeRow {
    pub values: DecodedRow,
    pub nulls: Option<Vec<u8>>,
}

impl NativeRow {
    pub fn is_null(&self, col: usize) -> bool {
        self.nulls
            .as_deref()
            .and_then(|bits| bit_at(bits, col))
            .unwrap_or(false)
    }
}

/// State carried across the row accesses of one read: the single cached
/// native row and the first output row that fell inside the native extent.
#[derive(Debug, Default)]
pub struct DecodeSession {
    cache: Option<(usize, NativeRow)>,
    first_data_row: Option<usize>,
    decoded_rows: usize,
}

impl DecodeSession {
    pub fn new() -> Self {
        DecodeSession::default()
    }

    pub fn cached_row(&self) -> Option<usize> {
        self.cache.as_ref().map(|(row, _)| *row)
    }

    pub fn first_data_row(&self) -> Option<usize> {
        self.first_data_row
    }

    /// Number of native rows actually decoded, cache hits excluded.
    pub fn decoded_rows(&self) -> usize {
        self.decoded_rows
    }

    pub fn reset(&mut self) {
        self.cache = None;
        self.first_data_row = None;
    }

    /// Returns the cached row when it is `row`, otherwise decodes and caches it.
    pub fn row_or_decode<F>(&mut self, row: usize, decode: F) -> Result<&NativeRow>
    where
        F: FnOnce(usize) -> Result<NativeRow>,
    {
        let entry = match self.cache.take() {
            Some(entry) if entry.0 == row => entry,
            previous => match decode(row) {
                Ok(native) => {
                    self.decoded_rows += 1;
                    (row, native)
                }
                Err(e) => {
                    self.cache = previous;
                    return Err(e);
                }
            },
        };
        Ok(&self.cache.insert(entry).1)
    }

    fn note_data_row(&mut self, output_row: usize) {
        self.first_data_row.get_or_insert(output_row);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RasterValues {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

/// The assembled output raster, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterData {
    width: usize,
    height: usize,
    values: RasterValues,
}

impl RasterData {
    /// A raster of the given shape filled with the no-data value of the
    /// output type.
    pub fn filled_with_null(
        format: CellFormat,
        options: ReadOptions,
        width: usize,
        height: usize,
    ) -> Self {
        let len = width * height;
        let values = match format {
            CellFormat::Int(_) => RasterValues::Int(vec![INT_NULL; len]),
            CellFormat::Float32 => RasterValues::Float(vec![FLOAT_NULL; len]),
            CellFormat::Float64 if options.cast_double_to_float => {
                RasterValues::Float(vec![FLOAT_NULL; len])
            }
            CellFormat::Float64 => RasterValues::Double(vec![DOUBLE_NULL; len]),
        };
        RasterData {
            width,
            height,
            values,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &RasterValues {
        &self.values
    }

    /// Value at `(row, col)` widened to a double. Integer no-data stays
    /// `i32::MAX`.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let i = row * self.width + col;
        match &self.values {
            RasterValues::Int(v) => v.get(i).map(|x| *x as f64),
            RasterValues::Float(v) => v.get(i).map(|x| *x as f64),
            RasterValues::Double(v) => v.get(i).copied(),
        }
    }

    pub fn is_null(&self, row: usize, col: usize) -> bool {
        match (&self.values, self.get(row, col)) {
            (RasterValues::Int(_), Some(v)) => v == INT_NULL as f64,
            (_, Some(v)) => v.is_nan(),
            (_, None) => false,
        }
    }

    /// Replaces the integer no-data sentinel by `no_data`. Floating point
    /// rasters are left alone.
    pub fn replace_int_null(&mut self, no_data: i32) {
        if let RasterValues::Int(values) = &mut self.values {
            values
                .iter_mut()
                .filter(|v| **v == INT_NULL)
                .for_each(|v| *v = no_data);
        }
    }
}

/// Computes the native row and column sampled by each output cell and fills
/// the output from native rows fetched on demand.
pub struct RasterWindowMapper {
    native: Region,
    format: CellFormat,
}

impl RasterWindowMapper {
    pub fn new(native: Region, format: CellFormat) -> Self {
        RasterWindowMapper { native, format }
    }

    /// Native row sampled by output row `row`, or `None` outside the extent.
    pub fn native_row(&self, request: &Region, row: usize) -> Option<usize> {
        let northing = request.north() - row as f64 * request.ns_res();
        let filerow = ((self.native.north() - northing) / self.native.ns_res()).floor();
        if filerow < 0.0 || filerow >= self.native.rows() as f64 {
            None
        } else {
            Some(filerow as usize)
        }
    }

    /// Native column sampled by output column `col`, or `None` outside the
    /// extent.
    pub fn native_col(&self, request: &Region, col: usize) -> Option<usize> {
        let easting = request.west() + col as f64 * request.ew_res();
        let x = round_half_up((easting - self.native.west()) / self.native.ew_res());
        if x < 0.0 || x >= self.native.cols() as f64 {
            None
        } else {
            Some(x as usize)
        }
    }

    /// Assembles the window. `fetch` decodes a native row; it is only called
    /// for rows inside the extent that are not already cached in `session`.
    /// `abort` is checked before every output row.
    pub fn map<F>(
        &self,
        request: &WindowRequest,
        options: ReadOptions,
        session: &mut DecodeSession,
        progress: &mut dyn ProgressListener,
        abort: &AtomicBool,
        mut fetch: F,
    ) -> Result<Outcome<RasterData>>
    where
        F: FnMut(usize) -> Result<NativeRow>,
    {
        let (rows, cols) = (request.rows(), request.cols());
        let columns: Vec<Option<usize>> = (0..cols)
            .map(|c| self.native_col(request.region(), c))
            .collect();
        let mut data = RasterData::filled_with_null(self.format, options, cols, rows);

        session.reset();
        progress.started();
        for r in 0..rows {
            if abort.load(Ordering::Relaxed) {
                warn!(row = r, rows, "window read aborted");
                return Ok(Outcome::Aborted);
            }
            if let Some(filerow) = self.native_row(request.region(), r) {
                session.note_data_row(r);
                let native = session.row_or_decode(filerow, &mut fetch)?;
                trace!(output_row = r, filerow, "sampling native row");
                fill_row(&mut data.values, r * cols..(r + 1) * cols, &columns, native)?;
            }
            progress.progress(percent(r + 1, rows));
        }
        progress.complete();

        debug!(
            rows,
            cols,
            first_data_row = ?session.first_data_row(),
            decoded = session.decoded_rows(),
            "assembled window"
        );
        Ok(Outcome::Finished(data))
    }
}

/// Rounds halves towards positive infinity.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn fill_row(
    values: &mut RasterValues,
    range: std::ops::Range<usize>,
    columns: &[Option<usize>],
    native: &NativeRow,
) -> Result<()> {
    match (values, &native.values) {
        (RasterValues::Int(out), DecodedRow::Int(src)) => {
            sample(&mut out[range], columns, native, src, INT_NULL, |v| v)
        }
        (RasterValues::Float(out), DecodedRow::Float(src)) => {
            sample(&mut out[range], columns, native, src, FLOAT_NULL, |v| v)
        }
        (RasterValues::Double(out), DecodedRow::Double(src)) => {
            sample(&mut out[range], columns, native, src, DOUBLE_NULL, |v| v)
        }
        (RasterValues::Float(out), DecodedRow::Double(src)) => {
            sample(&mut out[range], columns, native, src, FLOAT_NULL, |v| v as f32)
        }
        (_, row) => Err(Error::UnsupportedCellType(format!(
            "native row of {} cells does not match the output type",
            row.len()
        ))),
    }
}

fn sample<S: Copy, T: Copy>(
    out: &mut [T],
    columns: &[Option<usize>],
    native: &NativeRow,
    src: &[S],
    null: T,
    convert: impl Fn(S) -> T,
) -> Result<()> {
    for (cell, column) in out.iter_mut().zip(columns) {
        *cell = match column {
            Some(col) if !native.is_null(*col) => match src.get(*col) {
                Some(v) => convert(*v),
                None => {
                    return Err(Error::DecompressionFailure(format!(
                        "native row holds {} cells, column {} requested",
                        src.len(),
                        col
                    )))
                }
            },
            _ => null,
        };
    }
    Ok(())
}
