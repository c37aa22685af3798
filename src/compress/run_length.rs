use super::{split_marker, DecodedRow, RowDecoder, RowEncoder};
use crate::{
    io::{widen_be, Error, Result},
    COMPRESSED_ROW, RAW_ROW,
};

/// Run-length codec for integer rows.
///
/// A record is `[marker][width][payload]`. The payload is either `cols`
/// fixed-width values, recognized by its exact length, or `(count, value)`
/// pairs with a one byte count.
pub struct CodecRunLength {
    width: u8,
}

impl CodecRunLength {
    pub const MAX_RUN: usize = u8::MAX as usize;

    pub fn new(width: u8) -> Self {
        CodecRunLength { width }
    }

    fn encode_pairs(&self, raw: &[u8]) -> Vec<u8> {
        let width = self.width as usize;
        let mut pairs = Vec::new();
        let mut values = raw.chunks_exact(width).peekable();
        while let Some(value) = values.next() {
            let mut count = 1;
            while count < CodecRunLength::MAX_RUN && values.peek() == Some(&value) {
                values.next();
                count += 1;
            }
            pairs.push(count as u8);
            pairs.extend_from_slice(value);
        }
        pairs
    }

    fn expand_pairs(payload: &[u8], width: usize, cols: usize) -> Result<Vec<i32>> {
        if payload.len() % (width + 1) != 0 {
            return Err(Error::DecompressionFailure(format!(
                "{} byte payload is not a sequence of {} byte pairs",
                payload.len(),
                width + 1
            )));
        }

        let mut output = Vec::with_capacity(cols);
        for pair in payload.chunks_exact(width + 1) {
            let count = pair[0] as usize;
            if output.len() + count > cols {
                return Err(Error::DecompressionFailure(format!(
                    "run of {} overflows a row of {} cells at cell {}",
                    count,
                    cols,
                    output.len()
                )));
            }
            let value = widen_be(&pair[1..])?;
            output.extend(std::iter::repeat(value).take(count));
        }

        if output.len() != cols {
            return Err(Error::DecompressionFailure(format!(
                "runs fill {} of {} cells",
                output.len(),
                cols
            )));
        }
        Ok(output)
    }
}

impl RowEncoder for CodecRunLength {
    fn encode_row(&self, raw: &[u8], _cols: usize) -> Result<Vec<u8>> {
        let pairs = self.encode_pairs(raw);
        // A pair payload as long as the fixed-width row would decode as one,
        // so the row goes out fixed-width; both spell the same cells.
        let (marker, payload) = if pairs.len() == raw.len() {
            (RAW_ROW, raw)
        } else {
            (COMPRESSED_ROW, pairs.as_slice())
        };
        let mut record = Vec::with_capacity(2 + payload.len());
        record.push(marker);
        record.push(self.width);
        record.extend_from_slice(payload);
        Ok(record)
    }
}

impl RowDecoder for CodecRunLength {
    fn decode_row(&self, record: &[u8], cols: usize) -> Result<DecodedRow> {
        let (_, rest) = split_marker(record)?;
        let (&width, payload) = rest.split_first().ok_or_else(|| {
            Error::DecompressionFailure("integer row record lacks its width byte".to_string())
        })?;
        let width = width as usize;
        if !matches!(width, 1 | 2 | 4) {
            return Err(Error::DecompressionFailure(format!(
                "integer row stored with {} byte values",
                width
            )));
        }

        let values = if payload.len() == width * cols {
            payload
                .chunks_exact(width)
                .map(widen_be)
                .collect::<Result<Vec<_>>>()?
        } else {
            CodecRunLength::expand_pairs(payload, width, cols)?
        };
        Ok(DecodedRow::Int(values))
    }
}
