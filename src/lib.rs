pub mod address;
pub mod compress;
pub mod header;
pub mod io;
pub mod null_mask;
pub mod progress;
pub mod reader;
pub mod region;
pub mod window;
pub mod writer;

pub use header::{CellFormat, NullPolicy, RasterHeader};
pub use io::{Error, Result};
pub use progress::{DummyProgressListener, Outcome, ProgressListener};
pub use reader::RasterReader;
pub use region::Region;
pub use window::{RasterData, ReadOptions, WindowRequest};
pub use writer::{CompressedRasterWriter, ValueRange, WriteOptions};

/// In-memory no-data value of integer maps.
pub const INT_NULL: i32 = i32::MAX;
pub const FLOAT_NULL: f32 = f32::NAN;
pub const DOUBLE_NULL: f64 = f64::NAN;

/// Marker byte of a row record whose payload is compressed.
pub const COMPRESSED_ROW: u8 = b'1';
/// Marker byte of a row record whose payload is stored as is.
pub const RAW_ROW: u8 = b'0';

/// DEFLATE effort used for floating point rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    Fast = 1,
    #[default]
    Default = 6,
    Best = 9,
}
