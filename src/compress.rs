//! Per-row codecs of the cell file.
//!
//! Every row record of a compressed map starts with a marker byte telling
//! whether its payload is compressed ([`COMPRESSED_ROW`]) or stored as is
//! ([`RAW_ROW`]). Floating point rows are DEFLATE streams, integer rows add a
//! byte with the stored value width and are run-length encoded as
//! `(count, value)` pairs.

pub mod deflate;
pub mod run_length;

use crate::{
    header::{CellFormat, ReclassTable},
    io::{widen_be, Error, Result},
    CompressionLevel, COMPRESSED_ROW, INT_NULL, RAW_ROW,
};

pub use deflate::CodecDeflate;
pub use run_length::CodecRunLength;

pub trait RowEncoder {
    /// Encodes `cols` values of on-disk bytes into a complete row record.
    fn encode_row(&self, raw: &[u8], cols: usize) -> Result<Vec<u8>>;
}

pub trait RowDecoder {
    /// Decodes a complete row record, marker byte included.
    fn decode_row(&self, record: &[u8], cols: usize) -> Result<DecodedRow>;
}

/// One native row, widened to its in-memory representation.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedRow {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl DecodedRow {
    pub fn len(&self) -> usize {
        match self {
            DecodedRow::Int(v) => v.len(),
            DecodedRow::Float(v) => v.len(),
            DecodedRow::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces every integer code by its reclassed value. Unmapped codes
    /// become no-data.
    pub fn apply_reclass(&mut self, table: &ReclassTable) {
        if let DecodedRow::Int(values) = self {
            for v in values.iter_mut() {
                *v = table
                    .lookup(*v)
                    .and_then(|x| i32::try_from(x).ok())
                    .unwrap_or(INT_NULL);
            }
        }
    }
}

/// Encodes a row of on-disk bytes with the codec matching `format`.
pub fn encode_row(
    raw: &[u8],
    format: CellFormat,
    cols: usize,
    level: CompressionLevel,
) -> Result<Vec<u8>> {
    check_raw_len(raw, format, cols)?;
    match format {
        CellFormat::Int(width) => CodecRunLength::new(width).encode_row(raw, cols),
        _ => CodecDeflate::new(format, level).encode_row(raw, cols),
    }
}

/// Decodes a row record of a compressed map with the codec matching `format`.
pub fn decode_row(record: &[u8], format: CellFormat, cols: usize) -> Result<DecodedRow> {
    match format {
        CellFormat::Int(width) => CodecRunLength::new(width).decode_row(record, cols),
        _ => CodecDeflate::new(format, CompressionLevel::default()).decode_row(record, cols),
    }
}

/// Decodes a row of an uncompressed map: `cols` values at the declared
/// width, no marker byte.
pub fn decode_uncompressed_row(raw: &[u8], format: CellFormat, cols: usize) -> Result<DecodedRow> {
    check_raw_len(raw, format, cols)?;
    Ok(match format {
        CellFormat::Int(width) => DecodedRow::Int(
            raw.chunks_exact(width as usize)
                .map(widen_be)
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => deflate::floats_from_be(raw, format),
    })
}

fn check_raw_len(raw: &[u8], format: CellFormat, cols: usize) -> Result<()> {
    let expected = cols * format.stored_width();
    if raw.len() != expected {
        return Err(Error::DecompressionFailure(format!(
            "row holds {} bytes, expected {} for {} cells",
            raw.len(),
            expected,
            cols
        )));
    }
    Ok(())
}

fn split_marker(record: &[u8]) -> Result<(u8, &[u8])> {
    match record.split_first() {
        Some((&marker, payload)) if marker == COMPRESSED_ROW || marker == RAW_ROW => {
            Ok((marker, payload))
        }
        Some((marker, _)) => Err(Error::DecompressionFailure(format!(
            "unknown row marker {}",
            marker
        ))),
        None => Err(Error::DecompressionFailure("empty row record".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::Normal;

    use super::*;
    use crate::header::ReclassEntry;

    fn int_bytes(values: &[i32], width: usize) -> Vec<u8> {
        let mut raw = Vec::new();
        for v in values {
            crate::io::narrow_be(*v, width, &mut raw);
        }
        raw
    }

    fn round_trip_ints(values: &[i32], width: u8) {
        let raw = int_bytes(values, width as usize);
        let record = encode_row(&raw, CellFormat::Int(width), values.len(), Default::default())
            .unwrap();
        let decoded = decode_row(&record, CellFormat::Int(width), values.len()).unwrap();
        assert_eq!(decoded, DecodedRow::Int(values.to_vec()), "width {}", width);
    }

    #[test]
    fn integer_round_trips() {
        let mut rng = StdRng::seed_from_u64(7);
        for width in [1_u8, 2, 4] {
            let (lo, hi) = match width {
                1 => (0, 256),
                2 => (i16::MIN as i32, i16::MAX as i32 + 1),
                _ => (i32::MIN, i32::MAX),
            };
            for cols in [1_usize, 5, 64, 300, 1000] {
                let constant = vec![rng.gen_range(lo..hi); cols];
                round_trip_ints(&constant, width);

                // No two neighbours equal.
                let alternating: Vec<i32> = (0..cols)
                    .map(|i| if i % 2 == 0 { lo } else { hi - 1 })
                    .collect();
                round_trip_ints(&alternating, width);

                let runs: Vec<i32> = (0..cols).map(|i| lo + (i / 7) as i32 % 3).collect();
                round_trip_ints(&runs, width);

                let noise: Vec<i32> = (0..cols).map(|_| rng.gen_range(lo..hi)).collect();
                round_trip_ints(&noise, width);
            }
        }
    }

    #[test]
    fn float_round_trips() {
        let mut rng = StdRng::seed_from_u64(11);
        let normal = Normal::new(500.0, 120.0).unwrap();
        for cols in [1_usize, 3, 256, 999] {
            let doubles: Vec<f64> = (0..cols).map(|_| rng.sample(normal)).collect();
            let raw: Vec<u8> = doubles.iter().flat_map(|v| v.to_be_bytes()).collect();
            let record = encode_row(&raw, CellFormat::Float64, cols, Default::default()).unwrap();
            let decoded = decode_row(&record, CellFormat::Float64, cols).unwrap();
            assert_eq!(decoded, DecodedRow::Double(doubles));

            let floats: Vec<f32> = vec![12.5; cols];
            let raw: Vec<u8> = floats.iter().flat_map(|v| v.to_be_bytes()).collect();
            let record = encode_row(&raw, CellFormat::Float32, cols, Default::default()).unwrap();
            let decoded = decode_row(&record, CellFormat::Float32, cols).unwrap();
            assert_eq!(decoded, DecodedRow::Float(floats));
        }
    }

    #[test]
    fn wrong_row_length_is_rejected() {
        assert!(matches!(
            encode_row(&[0, 1, 2], CellFormat::Int(2), 2, Default::default()),
            Err(Error::DecompressionFailure(_))
        ));
    }

    #[test]
    fn reclass_decoded_codes() {
        let table = ReclassTable::new(vec![
            ReclassEntry::Empty,
            ReclassEntry::Value(100),
            ReclassEntry::Value(200),
        ]);
        let raw = int_bytes(&[1, 2, 0, 9], 1);
        let record = encode_row(&raw, CellFormat::Int(1), 4, Default::default()).unwrap();
        let mut decoded = decode_row(&record, CellFormat::Int(1), 4).unwrap();
        decoded.apply_reclass(&table);
        assert_eq!(decoded, DecodedRow::Int(vec![100, 200, INT_NULL, INT_NULL]));
    }

    #[test]
    fn uncompressed_rows() {
        let raw = int_bytes(&[-3, 4], 2);
        let decoded = decode_uncompressed_row(&raw, CellFormat::Int(2), 2).unwrap();
        assert_eq!(decoded, DecodedRow::Int(vec![-3, 4]));

        let raw: Vec<u8> = [1.5_f32, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let decoded = decode_uncompressed_row(&raw, CellFormat::Float32, 2).unwrap();
        assert_eq!(decoded, DecodedRow::Float(vec![1.5, -2.0]));
        assert!(decode_uncompressed_row(&raw, CellFormat::Float64, 2).is_err());
    }

    #[test]
    fn unknown_marker() {
        assert!(matches!(
            decode_row(&[7, 0, 0, 0, 0], CellFormat::Float32, 1),
            Err(Error::DecompressionFailure(_))
        ));
        assert!(decode_row(&[], CellFormat::Int(1), 1).is_err());
    }
}
