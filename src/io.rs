use std::fmt::Display;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("corrupt header: {0}")]
    HeaderCorrupt(String),
    #[error("unsupported row address width {0}, expected 4 or 8")]
    UnsupportedAddressWidth(u8),
    #[error("unsupported cell type: {0}")]
    UnsupportedCellType(String),
    #[error("decompression failure: {0}")]
    DecompressionFailure(String),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
}

/// Accumulates bits most-significant-first into bytes. A partially filled
/// byte is zero padded when the text is taken.
#[derive(Default)]
pub struct BitOutputStore {
    scratch: u8,
    n_bits: usize,
    text: Vec<u8>,
}

impl Display for BitOutputStore {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BitOutputStore nBits={}", self.n_bits)
    }
}

impl BitOutputStore {
    pub fn with_capacity(n_bits: usize) -> Self {
        BitOutputStore {
            text: Vec::with_capacity((n_bits + 7) / 8),
            ..Default::default()
        }
    }

    pub fn append_bit(&mut self, value: bool) {
        if value {
            self.scratch |= 0x80 >> (self.n_bits & 7);
        }
        self.n_bits += 1;
        if self.n_bits & 7 == 0 {
            self.move_scratch_to_text();
        }
    }

    pub fn bit_count(&self) -> usize {
        self.n_bits
    }

    pub fn encoded_text(mut self) -> Vec<u8> {
        if self.n_bits & 7 != 0 {
            self.move_scratch_to_text();
        }
        self.text
    }

    fn move_scratch_to_text(&mut self) {
        self.text.push(self.scratch);
        self.scratch = 0;
    }
}

/// Reads bits most-significant-first from a byte slice.
pub struct BitInputStore<'a> {
    text: &'a [u8],
    i_bit: usize,
}

impl<'a> BitInputStore<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        BitInputStore { text, i_bit: 0 }
    }

    pub fn bit(&mut self) -> Result<bool> {
        let value = bit_at(self.text, self.i_bit).ok_or_else(|| {
            Error::DecompressionFailure(format!(
                "attempt to read bit {} past end of {} byte text",
                self.i_bit,
                self.text.len()
            ))
        })?;
        self.i_bit += 1;
        Ok(value)
    }
}

/// Bit `index` of `text`, counting from the high bit of the first byte.
pub fn bit_at(text: &[u8], index: usize) -> Option<bool> {
    text.get(index / 8).map(|b| (b >> (7 - (index % 8))) & 1 == 1)
}

/// Sign or zero extends a big-endian integer of 1, 2 or 4 bytes.
///
/// Single bytes are unsigned, wider values are signed, matching how GRASS
/// category rasters have always been read back.
pub fn widen_be(bytes: &[u8]) -> Result<i32> {
    match *bytes {
        [b] => Ok(b as i32),
        [b0, b1] => Ok(i16::from_be_bytes([b0, b1]) as i32),
        [b0, b1, b2, b3] => Ok(i32::from_be_bytes([b0, b1, b2, b3])),
        _ => Err(Error::UnsupportedCellType(format!(
            "integer cells of {} bytes",
            bytes.len()
        ))),
    }
}

/// Writes the low `width` bytes of `value` big-endian.
pub fn narrow_be(value: i32, width: usize, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[4 - width..]);
}
