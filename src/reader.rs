use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::AtomicBool;

use tracing::{debug, trace};

use crate::{
    address::RowAddressTable,
    compress::{self, DecodedRow},
    header::{CellFormat, NullPolicy, RasterHeader},
    io::{Error, Result},
    null_mask::NullMaskReader,
    progress::{Outcome, ProgressListener},
    region::Region,
    window::{DecodeSession, NativeRow, RasterData, RasterWindowMapper, ReadOptions, WindowRequest},
    INT_NULL,
};

/// An open map: its parsed header, the cell stream and the optional null
/// bitmap stream.
pub struct RasterReader<R> {
    header: RasterHeader,
    cell: R,
    nulls: Option<NullMaskReader<R>>,
    addresses: Option<RowAddressTable>,
    policy: NullPolicy,
}

impl<R: Read + Seek> RasterReader<R> {
    /// Opens a map. The row address table is read here for compressed maps;
    /// the null policy is fixed by whether a null stream is given.
    pub fn open(header: RasterHeader, mut cell: R, null: Option<R>) -> Result<Self> {
        let rows = header.region.rows();
        let addresses = if header.compressed {
            Some(RowAddressTable::read(&mut cell, rows)?)
        } else {
            check_uncompressed_len(&mut cell, &header)?;
            None
        };
        let policy = NullPolicy::resolve(null.is_some());
        let nulls = null.map(|n| NullMaskReader::new(n, header.region.cols()));
        debug!(
            region = %header.region,
            format = ?header.format,
            compressed = header.compressed,
            ?policy,
            "opened raster"
        );
        Ok(RasterReader {
            header,
            cell,
            nulls,
            addresses,
            policy,
        })
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    pub fn region(&self) -> &Region {
        &self.header.region
    }

    pub fn format(&self) -> CellFormat {
        self.header.format
    }

    pub fn null_policy(&self) -> NullPolicy {
        self.policy
    }

    /// `None` for uncompressed maps.
    pub fn address_table(&self) -> Option<&RowAddressTable> {
        self.addresses.as_ref()
    }

    /// Whether the null bitmap flags cell `(row, col)`. Always false without
    /// a bitmap.
    pub fn is_null(&mut self, row: usize, col: usize) -> Result<bool> {
        match self.nulls.as_mut() {
            Some(nulls) => nulls.is_null(row, col),
            None => Ok(false),
        }
    }

    /// The stored bytes of `row`: the whole record, marker included, for a
    /// compressed map, the fixed-width values otherwise.
    pub fn read_row_record(&mut self, row: usize) -> Result<Vec<u8>> {
        self.check_row(row)?;
        let (start, len) = match &self.addresses {
            Some(table) => table.row_extent(row)?,
            None => {
                let len = (self.header.region.cols() * self.header.format.stored_width()) as u64;
                (row as u64 * len, len)
            }
        };
        self.cell.seek(SeekFrom::Start(start))?;
        let mut record = vec![0_u8; len as usize];
        self.cell.read_exact(&mut record)?;
        Ok(record)
    }

    /// Decodes native row `row` through the single-row cache of `session`.
    pub fn read_native_row<'s>(
        &mut self,
        session: &'s mut DecodeSession,
        row: usize,
    ) -> Result<&'s NativeRow> {
        session.row_or_decode(row, |r| self.decode_native_row(r))
    }

    /// Reads the requested window. Rows outside the native extent come back
    /// as no-data without touching the cell stream.
    pub fn decode_window(
        &mut self,
        session: &mut DecodeSession,
        request: &WindowRequest,
        options: ReadOptions,
        progress: &mut dyn ProgressListener,
        abort: &AtomicBool,
    ) -> Result<Outcome<RasterData>> {
        let mapper = RasterWindowMapper::new(self.header.region, self.header.format);
        mapper.map(request, options, session, progress, abort, |row| {
            self.decode_native_row(row)
        })
    }

    fn decode_native_row(&mut self, row: usize) -> Result<NativeRow> {
        let record = self.read_row_record(row)?;
        let (format, cols) = (self.header.format, self.header.region.cols());
        let mut values = if self.header.compressed {
            compress::decode_row(&record, format, cols)?
        } else {
            compress::decode_uncompressed_row(&record, format, cols)?
        };

        // Stored zeros are no-data before any reclassing.
        if let (NullPolicy::LegacyZeroSentinel, DecodedRow::Int(cells)) = (self.policy, &mut values) {
            cells
                .iter_mut()
                .filter(|v| **v == 0)
                .for_each(|v| *v = INT_NULL);
        }
        if let Some(table) = &self.header.reclass {
            values.apply_reclass(table);
        }

        let nulls = match self.nulls.as_mut() {
            Some(nulls) => Some(nulls.read_row(row)?),
            None => None,
        };
        trace!(row, bytes = record.len(), "decoded native row");
        Ok(NativeRow { values, nulls })
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.header.region.rows() {
            return Err(Error::HeaderCorrupt(format!(
                "row {} is outside a map of {} rows",
                row,
                self.header.region.rows()
            )));
        }
        Ok(())
    }

    pub fn into_inner(self) -> (R, Option<R>) {
        (self.cell, self.nulls.map(NullMaskReader::into_inner))
    }
}

/// An uncompressed cell file must hold every fixed-length row.
fn check_uncompressed_len<R: Seek>(cell: &mut R, header: &RasterHeader) -> Result<()> {
    let region = &header.region;
    let stream_len = cell.seek(SeekFrom::End(0))?;
    let needed = (region.rows() as u64)
        .checked_mul(region.cols() as u64)
        .and_then(|n| n.checked_mul(header.format.stored_width() as u64));
    match needed {
        Some(needed) if needed <= stream_len => Ok(()),
        _ => Err(Error::HeaderCorrupt(format!(
            "{} rows of {} cells do not fit the {} byte cell file",
            region.rows(),
            region.cols(),
            stream_len
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{header::ReclassEntry, header::ReclassTable, progress::DummyProgressListener};

    fn region(rows: usize, cols: usize) -> Region {
        Region::from_rows_cols(0.0, cols as f64, 0.0, rows as f64, rows, cols).unwrap()
    }

    /// A compressed cell file built from ready-made row records.
    fn cell_file(records: &[Vec<u8>]) -> Vec<u8> {
        let header_len = 1 + 4 * (records.len() + 1);
        let mut bytes = vec![4_u8];
        let mut offset = header_len as u32;
        bytes.extend_from_slice(&offset.to_be_bytes());
        for record in records {
            offset += record.len() as u32;
            bytes.extend_from_slice(&offset.to_be_bytes());
        }
        for record in records {
            bytes.extend_from_slice(record);
        }
        bytes
    }

    mod open {
        use super::*;

        #[test]
        fn null_policy_follows_the_null_stream() {
            let cells = cell_file(&[vec![crate::COMPRESSED_ROW, 1, 2, 5]]);
            let header = RasterHeader::new(region(1, 2), CellFormat::Int(1));
            let reader = RasterReader::open(header.clone(), Cursor::new(cells.clone()), None).unwrap();
            assert_eq!(reader.null_policy(), NullPolicy::LegacyZeroSentinel);
            assert_eq!(reader.address_table().unwrap().rows(), 1);

            let reader =
                RasterReader::open(header, Cursor::new(cells), Some(Cursor::new(vec![0]))).unwrap();
            assert_eq!(reader.null_policy(), NullPolicy::ExplicitBitmap);
        }

        #[test]
        fn bad_address_width() {
            let header = RasterHeader::new(region(1, 1), CellFormat::Int(1));
            assert!(matches!(
                RasterReader::open(header, Cursor::new(vec![3_u8, 0, 0, 0]), None),
                Err(Error::UnsupportedAddressWidth(3))
            ));
        }
    }

    mod rows {
        use super::*;

        #[test]
        fn legacy_zero_is_null() {
            // Three cells: 0, 0, 7.
            let cells = cell_file(&[vec![crate::COMPRESSED_ROW, 1, 2, 0, 1, 7]]);
            let header = RasterHeader::new(region(1, 3), CellFormat::Int(1));
            let mut reader = RasterReader::open(header, Cursor::new(cells), None).unwrap();
            let mut session = DecodeSession::new();
            let row = reader.read_native_row(&mut session, 0).unwrap();
            assert_eq!(row.values, DecodedRow::Int(vec![INT_NULL, INT_NULL, 7]));
            assert!(!reader.is_null(0, 0).unwrap());
        }

        #[test]
        fn bitmap_keeps_zero() {
            let cells = cell_file(&[vec![crate::COMPRESSED_ROW, 1, 2, 0, 1, 7]]);
            let header = RasterHeader::new(region(1, 3), CellFormat::Int(1));
            let nulls = Cursor::new(vec![0b0010_0000]);
            let mut reader = RasterReader::open(header, Cursor::new(cells), Some(nulls)).unwrap();
            let mut session = DecodeSession::new();
            let row = reader.read_native_row(&mut session, 0).unwrap().clone();
            assert_eq!(row.values, DecodedRow::Int(vec![0, 0, 7]));
            assert!(row.is_null(2));
            assert!(reader.is_null(0, 2).unwrap());
        }

        #[test]
        fn reclass_after_decode() {
            let cells = cell_file(&[vec![crate::COMPRESSED_ROW, 1, 1, 1, 1, 2, 1, 3]]);
            let mut header = RasterHeader::new(region(1, 3), CellFormat::Int(1));
            header.reclass = Some(ReclassTable::new(vec![
                ReclassEntry::Empty,
                ReclassEntry::Value(10),
                ReclassEntry::Value(20),
            ]));
            let mut reader =
                RasterReader::open(header, Cursor::new(cells), Some(Cursor::new(vec![0]))).unwrap();
            let mut session = DecodeSession::new();
            let row = reader.read_native_row(&mut session, 0).unwrap();
            assert_eq!(row.values, DecodedRow::Int(vec![10, 20, INT_NULL]));
        }

        #[test]
        fn uncompressed_rows_are_fixed_length() {
            let mut header = RasterHeader::new(region(2, 2), CellFormat::Int(2));
            header.compressed = false;
            let cells: Vec<u8> = [1_i16, -2, 3, 4].iter().flat_map(|v| v.to_be_bytes()).collect();
            let mut reader =
                RasterReader::open(header, Cursor::new(cells), Some(Cursor::new(vec![0, 0]))).unwrap();
            assert!(reader.address_table().is_none());
            let mut session = DecodeSession::new();
            assert_eq!(
                reader.read_native_row(&mut session, 1).unwrap().values,
                DecodedRow::Int(vec![3, 4])
            );
            assert_eq!(
                reader.read_native_row(&mut session, 0).unwrap().values,
                DecodedRow::Int(vec![1, -2])
            );
            assert!(matches!(
                reader.read_native_row(&mut session, 2),
                Err(Error::HeaderCorrupt(_))
            ));
        }

        #[test]
        fn truncated_cell_file() {
            let mut cells = cell_file(&[vec![crate::COMPRESSED_ROW, 1, 2, 9]]);
            cells.pop();
            let header = RasterHeader::new(region(1, 2), CellFormat::Int(1));
            assert!(matches!(
                RasterReader::open(header.clone(), Cursor::new(cells), None),
                Err(Error::HeaderCorrupt(_))
            ));

            let mut header = header;
            header.compressed = false;
            assert!(matches!(
                RasterReader::open(header, Cursor::new(vec![1_u8]), None),
                Err(Error::HeaderCorrupt(_))
            ));
        }

        #[test]
        fn oversized_last_row_address() {
            let mut cells = vec![8_u8];
            cells.extend_from_slice(&17_u64.to_be_bytes());
            cells.extend_from_slice(&u64::MAX.to_be_bytes());
            let header = RasterHeader::new(region(1, 2), CellFormat::Float64);
            assert!(matches!(
                RasterReader::open(header, Cursor::new(cells), None),
                Err(Error::HeaderCorrupt(_))
            ));
        }

        #[test]
        fn absurd_row_count() {
            let cellhd = "north: 1\nsouth: 0\neast: 1\nwest: 0\nrows: 4611686018427387904\n\
                          cols: 1\nformat: 0\ncompressed: 1\n";
            let header = RasterHeader::parse(cellhd, None).unwrap();
            assert!(matches!(
                RasterReader::open(header.clone(), Cursor::new(vec![4_u8, 0, 0, 0, 0]), None),
                Err(Error::HeaderCorrupt(_))
            ));

            let mut header = header;
            header.compressed = false;
            assert!(matches!(
                RasterReader::open(header, Cursor::new(vec![0_u8; 8]), None),
                Err(Error::HeaderCorrupt(_))
            ));
        }
    }

    #[test]
    fn window_over_reader() {
        let records: Vec<Vec<u8>> = (1..=3_u8)
            .map(|v| vec![crate::COMPRESSED_ROW, 1, 3, v])
            .collect();
        let header = RasterHeader::new(region(3, 3), CellFormat::Int(1));
        let mut reader = RasterReader::open(
            header,
            Cursor::new(cell_file(&records)),
            Some(Cursor::new(vec![0, 0b1000_0000, 0])),
        )
        .unwrap();
        let mut session = DecodeSession::new();
        let data = reader
            .decode_window(
                &mut session,
                &WindowRequest::full(&region(3, 3)),
                ReadOptions::default(),
                &mut DummyProgressListener,
                &AtomicBool::new(false),
            )
            .unwrap()
            .finished()
            .unwrap();
        assert_eq!(data.get(0, 2), Some(1.0));
        assert!(data.is_null(1, 0));
        assert_eq!(data.get(1, 1), Some(2.0));
        assert_eq!(data.get(2, 0), Some(3.0));
        assert_eq!(session.first_data_row(), Some(0));
        assert_eq!(session.decoded_rows(), 3);
    }
}
