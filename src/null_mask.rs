//! The null bitmap side file: one bit per cell, rows padded to whole bytes,
//! most significant bit first, a set bit marking a no-data cell.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::io::{bit_at, BitInputStore, BitOutputStore, Error, Result};

pub fn bytes_per_row(cols: usize) -> usize {
    (cols + 7) / 8
}

pub fn pack_row(nulls: &[bool]) -> Vec<u8> {
    let mut store = BitOutputStore::with_capacity(nulls.len());
    for null in nulls {
        store.append_bit(*null);
    }
    store.encoded_text()
}

pub fn unpack_row(packed: &[u8], cols: usize) -> Result<Vec<bool>> {
    if packed.len() != bytes_per_row(cols) {
        return Err(Error::DecompressionFailure(format!(
            "null row holds {} bytes, expected {}",
            packed.len(),
            bytes_per_row(cols)
        )));
    }
    let mut bins = BitInputStore::new(packed);
    (0..cols).map(|_| bins.bit()).collect()
}

/// Random access to the null bitmap of a map.
pub struct NullMaskReader<R> {
    reader: R,
    cols: usize,
}

impl<R: Read + Seek> NullMaskReader<R> {
    pub fn new(reader: R, cols: usize) -> Self {
        NullMaskReader { reader, cols }
    }

    /// Whether cell `(row, col)` is flagged as no-data.
    pub fn is_null(&mut self, row: usize, col: usize) -> Result<bool> {
        let byte_index = row * bytes_per_row(self.cols) + (col + 1 + 7) / 8 - 1;
        self.reader.seek(SeekFrom::Start(byte_index as u64))?;
        let mut byte = [0_u8; 1];
        self.reader.read_exact(&mut byte)?;
        Ok(bit_at(&byte, col % 8).unwrap_or(false))
    }

    /// The packed bits of a whole row.
    pub fn read_row(&mut self, row: usize) -> Result<Vec<u8>> {
        let len = bytes_per_row(self.cols);
        self.reader.seek(SeekFrom::Start((row * len) as u64))?;
        let mut packed = vec![0_u8; len];
        self.reader.read_exact(&mut packed)?;
        Ok(packed)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Appends packed null rows to the side file.
pub struct NullMaskWriter<W> {
    writer: W,
    cols: usize,
    rows_written: usize,
}

impl<W: Write> NullMaskWriter<W> {
    pub fn new(writer: W, cols: usize) -> Self {
        NullMaskWriter {
            writer,
            cols,
            rows_written: 0,
        }
    }

    pub fn write_row(&mut self, nulls: &[bool]) -> Result<()> {
        if nulls.len() != self.cols {
            return Err(Error::HeaderCorrupt(format!(
                "null row of {} cells in a map of {} columns",
                nulls.len(),
                self.cols
            )));
        }
        self.writer.write_all(&pack_row(nulls))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn pack_layout() {
        let mut nulls = vec![false; 10];
        nulls[0] = true;
        nulls[7] = true;
        nulls[9] = true;
        assert_eq!(pack_row(&nulls), vec![0b1000_0001, 0b0100_0000]);
        assert_eq!(pack_row(&[]), Vec::<u8>::new());
    }

    #[test]
    fn pack_unpack_patterns() {
        for cols in [1_usize, 7, 8, 9, 17, 64] {
            for pattern in 0..4 {
                let nulls: Vec<bool> = (0..cols)
                    .map(|i| match pattern {
                        0 => false,
                        1 => true,
                        2 => i % 3 == 0,
                        _ => (i * 7 + 3) % 5 < 2,
                    })
                    .collect();
                let packed = pack_row(&nulls);
                assert_eq!(packed.len(), bytes_per_row(cols));
                assert_eq!(unpack_row(&packed, cols).unwrap(), nulls);
            }
        }
        assert!(unpack_row(&[0, 0], 3).is_err());
    }

    #[test]
    fn single_cell_queries() {
        let cols = 11;
        let mut writer = NullMaskWriter::new(Cursor::new(Vec::new()), cols);
        let mut rows = Vec::new();
        for row in 0..3 {
            let nulls: Vec<bool> = (0..cols).map(|c| (c + row) % 4 == 0).collect();
            writer.write_row(&nulls).unwrap();
            rows.push(nulls);
        }
        assert_eq!(writer.rows_written(), 3);
        assert!(writer.write_row(&[true]).is_err());
        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.len(), 3 * 2);

        let mut reader = NullMaskReader::new(Cursor::new(bytes), cols);
        for (row, nulls) in rows.iter().enumerate() {
            for (col, null) in nulls.iter().enumerate() {
                assert_eq!(reader.is_null(row, col).unwrap(), *null, "{} {}", row, col);
            }
            let packed = reader.read_row(row).unwrap();
            assert_eq!(&unpack_row(&packed, cols).unwrap(), nulls);
        }
        assert!(reader.is_null(3, 0).is_err());
    }
}
