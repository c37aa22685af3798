use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};

use super::{split_marker, DecodedRow, RowDecoder, RowEncoder};
use crate::{
    header::CellFormat,
    io::{Error, Result},
    CompressionLevel, COMPRESSED_ROW, RAW_ROW,
};

/// DEFLATE codec for floating point rows. A row is stored raw whenever
/// compressing it does not save space.
pub struct CodecDeflate {
    format: CellFormat,
    level: CompressionLevel,
}

impl CodecDeflate {
    pub fn new(format: CellFormat, level: CompressionLevel) -> Self {
        CodecDeflate { format, level }
    }

    fn do_deflate(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(input.len() / 2),
            Compression::new(self.level as u32),
        );
        encoder.write_all(input)?;
        Ok(encoder.finish()?)
    }

    fn do_inflate(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(expected_len);
        // One extra byte is enough to notice an oversized stream.
        ZlibDecoder::new(input)
            .take(expected_len as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| Error::DecompressionFailure(format!("inflate failed: {}", e)))?;
        if output.len() != expected_len {
            return Err(Error::DecompressionFailure(format!(
                "inflated row holds {} bytes, expected {}",
                output.len(),
                expected_len
            )));
        }
        Ok(output)
    }
}

impl RowEncoder for CodecDeflate {
    fn encode_row(&self, raw: &[u8], _cols: usize) -> Result<Vec<u8>> {
        let compressed = self.do_deflate(raw)?;
        let (marker, payload) = if compressed.len() < raw.len() {
            (COMPRESSED_ROW, compressed.as_slice())
        } else {
            (RAW_ROW, raw)
        };
        let mut record = Vec::with_capacity(1 + payload.len());
        record.push(marker);
        record.extend_from_slice(payload);
        Ok(record)
    }
}

impl RowDecoder for CodecDeflate {
    fn decode_row(&self, record: &[u8], cols: usize) -> Result<DecodedRow> {
        let expected_len = cols * self.format.bytes_per_value();
        let (marker, payload) = split_marker(record)?;
        if marker == COMPRESSED_ROW {
            let bytes = CodecDeflate::do_inflate(payload, expected_len)?;
            return Ok(floats_from_be(&bytes, self.format));
        }

        if payload.len() != expected_len {
            return Err(Error::DecompressionFailure(format!(
                "raw row holds {} bytes, expected {}",
                payload.len(),
                expected_len
            )));
        }
        Ok(floats_from_be(payload, self.format))
    }
}

/// Reads big-endian floats or doubles. `bytes` must hold whole values.
pub(crate) fn floats_from_be(bytes: &[u8], format: CellFormat) -> DecodedRow {
    match format {
        CellFormat::Float64 => DecodedRow::Double(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        _ => DecodedRow::Float(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    }
}
