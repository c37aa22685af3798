use std::io::{Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use crate::{
    address::RowAddressTable,
    compress,
    header::{CellFormat, RasterHeader},
    io::{narrow_be, Error, Result},
    null_mask::NullMaskWriter,
    progress::{percent, Outcome, ProgressListener},
    region::Region,
    CompressionLevel,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriteOptions {
    pub compression_level: CompressionLevel,
    /// Cells equal to this value, or NaN, are written as no-data.
    pub no_data: f64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            compression_level: CompressionLevel::default(),
            no_data: f64::NAN,
        }
    }
}

/// Supplies the values of one native row at a time, top row first.
pub trait RowSource {
    fn fill_row(&mut self, row: usize, values: &mut [f64]) -> Result<()>;
}

impl<F> RowSource for F
where
    F: FnMut(usize, &mut [f64]) -> Result<()>,
{
    fn fill_row(&mut self, row: usize, values: &mut [f64]) -> Result<()> {
        self(row, values)
    }
}

/// Smallest and largest value written, no-data excluded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    min: f64,
    max: f64,
}

impl Default for ValueRange {
    fn default() -> Self {
        ValueRange {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl ValueRange {
    pub fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn min(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (!self.is_empty()).then_some(self.max)
    }

    /// Text of the integer range file, `min max`. Empty when every cell was
    /// no-data.
    pub fn to_int_range_text(&self) -> String {
        match (self.min(), self.max()) {
            (Some(min), Some(max)) => format!("{} {}\n", min as i64, max as i64),
            _ => String::new(),
        }
    }

    /// Contents of the floating point range file: min and max as big-endian
    /// doubles. Empty when every cell was no-data.
    pub fn to_float_range_bytes(&self) -> Vec<u8> {
        match (self.min(), self.max()) {
            (Some(min), Some(max)) => min
                .to_be_bytes()
                .into_iter()
                .chain(max.to_be_bytes())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Writes a whole map as a compressed cell stream plus its null bitmap.
///
/// The cell stream starts with a zeroed row address table that is rewritten
/// once the last row is out. An aborted write leaves the placeholder in
/// place and the stream is unusable.
pub struct CompressedRasterWriter<W, N> {
    header: RasterHeader,
    cell: W,
    nulls: NullMaskWriter<N>,
}

impl<W: Write + Seek, N: Write> CompressedRasterWriter<W, N> {
    pub fn new(region: Region, format: CellFormat, cell: W, null: N) -> Self {
        CompressedRasterWriter {
            header: RasterHeader::new(region, format),
            cell,
            nulls: NullMaskWriter::new(null, region.cols()),
        }
    }

    /// The header describing the written map, for the cell header and float
    /// format files.
    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    pub fn write_raster<S: RowSource>(
        &mut self,
        mut source: S,
        options: WriteOptions,
        progress: &mut dyn ProgressListener,
        abort: &AtomicBool,
    ) -> Result<Outcome<ValueRange>> {
        let (rows, cols) = (self.header.region.rows(), self.header.region.cols());
        let format = self.header.format;
        let mut table = RowAddressTable::reserve(&mut self.cell, rows)?;
        let mut range = ValueRange::default();
        let mut values = vec![0.0; cols];
        let mut nulls = vec![false; cols];
        let mut raw = Vec::with_capacity(cols * format.stored_width());

        progress.started();
        for row in 0..rows {
            if abort.load(Ordering::Relaxed) {
                warn!(row, rows, "raster write aborted");
                return Ok(Outcome::Aborted);
            }
            source.fill_row(row, &mut values)?;

            raw.clear();
            for (value, null) in values.iter().zip(nulls.iter_mut()) {
                *null = value.is_nan() || *value == options.no_data;
                let value = if *null { 0.0 } else { *value };
                let stored = store_value(value, format, &mut raw)?;
                if !*null {
                    range.include(stored);
                }
            }

            let record = compress::encode_row(&raw, format, cols, options.compression_level)?;
            self.cell.write_all(&record)?;
            table.push_row(record.len() as u64);
            self.nulls.write_row(&nulls)?;
            trace!(row, bytes = record.len(), "encoded row");
            progress.progress(percent(row + 1, rows));
        }

        table.finalize(&mut self.cell)?;
        self.cell.flush()?;
        self.nulls.flush()?;
        progress.complete();
        debug!(
            rows,
            cols,
            format = ?format,
            min = ?range.min(),
            max = ?range.max(),
            "wrote raster"
        );
        Ok(Outcome::Finished(range))
    }

    pub fn into_inner(self) -> (W, N) {
        (self.cell, self.nulls.into_inner())
    }
}

/// Appends `value` in the on-disk form of `format` and returns the value as
/// it will read back. Integers are truncated and must fit the stored width:
/// single bytes are unsigned, wider values signed.
fn store_value(value: f64, format: CellFormat, raw: &mut Vec<u8>) -> Result<f64> {
    match format {
        CellFormat::Int(width) => {
            let (min, max) = match width {
                1 => (0.0, u8::MAX as f64),
                2 => (i16::MIN as f64, i16::MAX as f64),
                _ => (i32::MIN as f64, i32::MAX as f64),
            };
            let cell = value.trunc();
            if !(min..=max).contains(&cell) {
                return Err(Error::UnsupportedCellType(format!(
                    "value {} does not fit {} byte integer cells",
                    value, width
                )));
            }
            narrow_be(cell as i32, width as usize, raw);
            Ok(cell)
        }
        CellFormat::Float32 => {
            let cell = value as f32;
            raw.extend_from_slice(&cell.to_be_bytes());
            Ok(cell as f64)
        }
        CellFormat::Float64 => {
            raw.extend_from_slice(&value.to_be_bytes());
            Ok(value)
        }
    }
}
