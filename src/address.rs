use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::io::{Error, Result};

/// Byte offsets of every row in a compressed cell file.
///
/// `addresses[i]` is where row `i` starts and `addresses[rows]` is the end of
/// the last row, so row `i` occupies `addresses[i]..addresses[i + 1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowAddressTable {
    address_width: u8,
    addresses: Vec<u64>,
}

impl RowAddressTable {
    /// Width used for the offsets of files this crate writes.
    pub const WRITE_WIDTH: u8 = 4;

    /// Reads the table at the start of a cell file.
    pub fn read<R: Read + Seek>(reader: &mut R, rows: usize) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        let mut first = [0_u8; 1];
        reader.read_exact(&mut first)?;
        let width = first[0];
        if width != 4 && width != 8 {
            return Err(Error::UnsupportedAddressWidth(width));
        }

        let header_len = Self::header_len(width, rows)?;
        if header_len > stream_len {
            return Err(Error::HeaderCorrupt(format!(
                "{} byte address table for {} rows exceeds the {} byte cell file",
                header_len, rows, stream_len
            )));
        }

        // The width byte is read again with the offsets and skipped.
        let mut header = vec![0_u8; header_len as usize];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut header)?;

        let addresses = header[1..]
            .chunks_exact(width as usize)
            .map(|chunk| match *chunk {
                [a, b, c, d] => u32::from_be_bytes([a, b, c, d]) as u64,
                _ => {
                    let mut bytes = [0_u8; 8];
                    bytes.copy_from_slice(chunk);
                    u64::from_be_bytes(bytes)
                }
            })
            .collect::<Vec<_>>();

        let table = RowAddressTable {
            address_width: width,
            addresses,
        };
        table.check_order()?;
        if table.addresses[0] < header_len {
            return Err(Error::HeaderCorrupt(format!(
                "first row starts at {} inside the {} byte address table",
                table.addresses[0], header_len
            )));
        }
        if table.end_offset() > stream_len {
            return Err(Error::HeaderCorrupt(format!(
                "last row ends at {} past the {} byte cell file",
                table.end_offset(),
                stream_len
            )));
        }
        debug!(rows, width, "read row address table");
        Ok(table)
    }

    /// Writes a zeroed placeholder table for `rows` rows at the start of the
    /// stream and returns a table whose first address is the byte after it.
    pub fn reserve<W: Write + Seek>(writer: &mut W, rows: usize) -> Result<Self> {
        let len = Self::header_len(Self::WRITE_WIDTH, rows)?;
        let mut placeholder = vec![0_u8; len as usize];
        placeholder[0] = Self::WRITE_WIDTH;
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&placeholder)?;

        let mut addresses = Vec::with_capacity(rows + 1);
        addresses.push(len);
        Ok(RowAddressTable {
            address_width: Self::WRITE_WIDTH,
            addresses,
        })
    }

    /// Records the end of the next row, `row_len` bytes after the end of
    /// the previous one.
    pub fn push_row(&mut self, row_len: u64) {
        let end = self.end_offset() + row_len;
        self.addresses.push(end);
    }

    /// Rewrites the placeholder with the final offsets. Every row must have
    /// been pushed.
    pub fn finalize<W: Write + Seek>(&self, writer: &mut W) -> Result<()> {
        let mut bytes = Vec::with_capacity(self.addresses.len() * 4);
        for address in self.addresses.iter() {
            let address = u32::try_from(*address).map_err(|_| {
                Error::HeaderCorrupt(format!(
                    "row offset {} does not fit a 4 byte address table",
                    address
                ))
            })?;
            bytes.extend_from_slice(&address.to_be_bytes());
        }
        writer.seek(SeekFrom::Start(1))?;
        writer.write_all(&bytes)?;
        writer.seek(SeekFrom::Start(self.end_offset()))?;
        debug!(rows = self.rows(), end = self.end_offset(), "finalized row address table");
        Ok(())
    }

    /// Byte length of the width byte plus `rows + 1` offsets.
    pub fn header_len(width: u8, rows: usize) -> Result<u64> {
        (rows as u64)
            .checked_add(1)
            .and_then(|n| n.checked_mul(width as u64))
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| {
                Error::HeaderCorrupt(format!("address table for {} rows overflows", rows))
            })
    }

    pub fn address_width(&self) -> u8 {
        self.address_width
    }

    pub fn addresses(&self) -> &[u64] {
        &self.addresses
    }

    /// Number of rows whose extent is known.
    pub fn rows(&self) -> usize {
        self.addresses.len().saturating_sub(1)
    }

    pub fn end_offset(&self) -> u64 {
        self.addresses.last().copied().unwrap_or_default()
    }

    /// Start offset and byte length of `row`.
    pub fn row_extent(&self, row: usize) -> Result<(u64, u64)> {
        match (self.addresses.get(row), self.addresses.get(row + 1)) {
            (Some(&start), Some(&end)) if start <= end => Ok((start, end - start)),
            (Some(start), Some(end)) => Err(Error::HeaderCorrupt(format!(
                "row {} ends at {} before it starts at {}",
                row, end, start
            ))),
            _ => Err(Error::HeaderCorrupt(format!(
                "row {} is outside the {} row address table",
                row,
                self.rows()
            ))),
        }
    }

    fn check_order(&self) -> Result<()> {
        match self.addresses.windows(2).position(|w| w[0] > w[1]) {
            Some(row) => Err(Error::HeaderCorrupt(format!(
                "row addresses decrease at row {}",
                row
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn table_bytes(width: u8, addresses: &[u64]) -> Vec<u8> {
        let mut bytes = vec![width];
        for a in addresses {
            match width {
                4 => bytes.extend_from_slice(&(*a as u32).to_be_bytes()),
                _ => bytes.extend_from_slice(&a.to_be_bytes()),
            }
        }
        bytes
    }

    #[test]
    fn read_four_byte_table() {
        let mut bytes = table_bytes(4, &[13, 20, 20]);
        bytes.resize(20, 0);
        let table = RowAddressTable::read(&mut Cursor::new(bytes), 2).unwrap();
        assert_eq!(table.address_width(), 4);
        assert_eq!(table.addresses(), &[13, 20, 20]);
        assert_eq!(table.row_extent(0).unwrap(), (13, 7));
        assert_eq!(table.row_extent(1).unwrap(), (20, 0));
        assert!(table.row_extent(2).is_err());
    }

    #[test]
    fn read_eight_byte_table() {
        let mut bytes = table_bytes(8, &[17, 30]);
        bytes.resize(30, 0);
        let table = RowAddressTable::read(&mut Cursor::new(bytes), 1).unwrap();
        assert_eq!(table.address_width(), 8);
        assert_eq!(table.addresses(), &[17, 30]);
    }

    #[test]
    fn unsupported_width() {
        let bytes = vec![2_u8, 0, 5, 0, 9];
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(bytes), 1),
            Err(Error::UnsupportedAddressWidth(2))
        ));
    }

    #[test]
    fn decreasing_addresses_are_corrupt() {
        let bytes = table_bytes(4, &[13, 30, 20]);
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(bytes), 2),
            Err(Error::HeaderCorrupt(_))
        ));
    }

    #[test]
    fn last_address_past_end_of_file() {
        let bytes = table_bytes(8, &[17, u64::MAX]);
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(bytes), 1),
            Err(Error::HeaderCorrupt(_))
        ));

        let mut bytes = table_bytes(4, &[9, 12]);
        bytes.extend_from_slice(&[1, 2]);
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(bytes), 1),
            Err(Error::HeaderCorrupt(_))
        ));
    }

    #[test]
    fn huge_row_counts() {
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(vec![4_u8, 0, 0, 0, 0]), usize::MAX / 2),
            Err(Error::HeaderCorrupt(_))
        ));
        assert!(matches!(
            RowAddressTable::read(&mut Cursor::new(vec![8_u8, 0, 0, 0, 0]), usize::MAX),
            Err(Error::HeaderCorrupt(_))
        ));
        assert!(RowAddressTable::header_len(8, usize::MAX).is_err());
        assert_eq!(RowAddressTable::header_len(4, 2).unwrap(), 13);
    }

    #[test]
    fn reserve_then_finalize() {
        let mut cursor = Cursor::new(Vec::new());
        let mut table = RowAddressTable::reserve(&mut cursor, 2).unwrap();
        assert_eq!(table.addresses(), &[13]);
        cursor.write_all(&[1, 2, 3, 4, 5]).unwrap();
        table.push_row(5);
        cursor.write_all(&[6, 7]).unwrap();
        table.push_row(2);
        table.finalize(&mut cursor).unwrap();

        let bytes = cursor.into_inner();
        assert_eq!(bytes.len() as u64, table.end_offset());
        let again = RowAddressTable::read(&mut Cursor::new(bytes), 2).unwrap();
        assert_eq!(again, table);
        assert_eq!(again.addresses(), &[13, 18, 20]);
    }
}
