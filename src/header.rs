//! Parsing and emission of the textual headers that describe a raster map:
//! the cell header (`cellhd`), the floating point format file (`f_format`)
//! and the reclass indirection header.

use std::collections::HashMap;
use std::fmt::Write;

use tracing::debug;

use crate::{
    io::{Error, Result},
    region::Region,
    DOUBLE_NULL, FLOAT_NULL, INT_NULL,
};

/// Element kind and width of a raster's cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellFormat {
    /// Integer cells stored with 1, 2 or 4 bytes.
    Int(u8),
    Float32,
    Float64,
}

impl CellFormat {
    pub fn from_format_code(code: i32, float_type: Option<&str>) -> Result<Self> {
        if code >= 0 {
            return match code + 1 {
                w @ (1 | 2 | 4) => Ok(CellFormat::Int(w as u8)),
                w => Err(Error::UnsupportedCellType(format!(
                    "format {} declares {} byte integers",
                    code, w
                ))),
            };
        }
        match float_type.map(str::trim) {
            Some(t) if t.eq_ignore_ascii_case("float") => Ok(CellFormat::Float32),
            Some(t) if t.eq_ignore_ascii_case("double") => Ok(CellFormat::Float64),
            Some(t) => Err(Error::HeaderCorrupt(format!(
                "wrong number type in format file: {}",
                t
            ))),
            None => Err(Error::HeaderCorrupt(format!(
                "format {} requires a float format file with a type entry",
                code
            ))),
        }
    }

    pub fn format_code(&self) -> i32 {
        match self {
            CellFormat::Int(width) => *width as i32 - 1,
            CellFormat::Float32 => -1,
            CellFormat::Float64 => -2,
        }
    }

    /// Bytes per value once decoded into memory. Integers are always
    /// widened to four bytes.
    pub fn bytes_per_value(&self) -> usize {
        match self {
            CellFormat::Int(_) | CellFormat::Float32 => 4,
            CellFormat::Float64 => 8,
        }
    }

    /// Bytes per value as written in the cell file.
    pub fn stored_width(&self) -> usize {
        match self {
            CellFormat::Int(width) => *width as usize,
            CellFormat::Float32 => 4,
            CellFormat::Float64 => 8,
        }
    }

    pub fn type_label(&self) -> Option<&'static str> {
        match self {
            CellFormat::Int(_) => None,
            CellFormat::Float32 => Some("float"),
            CellFormat::Float64 => Some("double"),
        }
    }

    /// The in-memory no-data sentinel, widened to a double.
    pub fn null_value(&self) -> f64 {
        match self {
            CellFormat::Int(_) => INT_NULL as f64,
            CellFormat::Float32 => FLOAT_NULL as f64,
            CellFormat::Float64 => DOUBLE_NULL,
        }
    }
}

/// How no-data cells are recognized when reading a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullPolicy {
    /// A null bitmap file accompanies the cell file.
    ExplicitBitmap,
    /// No bitmap exists: a stored integer `0` means no-data.
    LegacyZeroSentinel,
}

impl NullPolicy {
    pub fn resolve(has_null_file: bool) -> Self {
        if has_null_file {
            NullPolicy::ExplicitBitmap
        } else {
            NullPolicy::LegacyZeroSentinel
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclassEntry {
    Empty,
    Value(i64),
}

/// Maps stored category codes of a reclassed map to the values of the map
/// it was derived from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReclassTable {
    entries: Vec<ReclassEntry>,
}

impl ReclassTable {
    pub fn new(entries: Vec<ReclassEntry>) -> Self {
        ReclassTable { entries }
    }

    pub fn entries(&self) -> &[ReclassEntry] {
        &self.entries
    }

    /// The value for a stored code; `None` when the code is unmapped.
    pub fn lookup(&self, code: i32) -> Option<i64> {
        if code < 0 {
            return None;
        }
        match self.entries.get(code as usize) {
            Some(ReclassEntry::Value(v)) => Some(*v),
            _ => None,
        }
    }

    fn set(&mut self, index: usize, entry: ReclassEntry) {
        if self.entries.len() <= index {
            self.entries.resize(index + 1, ReclassEntry::Empty);
        }
        self.entries[index] = entry;
    }
}

/// Name and mapset of another map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapRef {
    pub name: String,
    pub mapset: String,
}

/// A header that declares its map a reclass of another one.
#[derive(Clone, Debug, PartialEq)]
pub struct ReclassHeader {
    pub target: MapRef,
    pub table: ReclassTable,
}

impl ReclassHeader {
    /// Parses a reclass header, or returns `None` when the text is an
    /// ordinary cell header.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let mut lines = text.lines();
        let first = lines
            .next()
            .ok_or_else(|| Error::HeaderCorrupt("empty cell header".to_string()))?;
        if !first.trim().eq_ignore_ascii_case("reclass") {
            return Ok(None);
        }

        let mut name = None;
        let mut mapset = None;
        for _ in 0..2 {
            let line = lines.next().ok_or_else(|| {
                Error::HeaderCorrupt("reclass header ends before the target map".to_string())
            })?;
            if let Some((key, value)) = line.split_once(':') {
                match key.trim().to_ascii_lowercase().as_str() {
                    "name" => name = Some(value.trim().to_string()),
                    "mapset" => mapset = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        let target = match (name, mapset) {
            (Some(name), Some(mapset)) => MapRef { name, mapset },
            _ => {
                return Err(Error::HeaderCorrupt(
                    "reclass header lacks name or mapset".to_string(),
                ))
            }
        };

        let mut table = ReclassTable::default();
        let mut next_index = 1;
        let mut lines = lines.peekable();
        match lines.peek().copied().map(str::trim) {
            Some(line) if line.starts_with('#') => {
                next_index = line[1..].trim().parse::<usize>().map_err(|_| {
                    Error::HeaderCorrupt(format!("bad reclass start line: {}", line))
                })?;
                lines.next();
            }
            None => {
                return Err(Error::HeaderCorrupt(
                    "reclass header has no table".to_string(),
                ))
            }
            _ => {}
        }
        // Entries below the first category stay empty.
        if next_index > 0 {
            table.set(next_index - 1, ReclassEntry::Empty);
        }

        for line in lines {
            let (index, value) = match line.split_once(':') {
                Some((index, value)) => {
                    let index = index.trim().parse::<usize>().map_err(|_| {
                        Error::HeaderCorrupt(format!("bad reclass index: {}", line))
                    })?;
                    (index, value.trim())
                }
                None => (next_index, line.trim()),
            };
            let entry = match value {
                "" | "*" => ReclassEntry::Empty,
                v => ReclassEntry::Value(v.parse::<i64>().map_err(|_| {
                    Error::HeaderCorrupt(format!("bad reclass value: {}", line))
                })?),
            };
            table.set(index, entry);
            next_index = index + 1;
        }

        debug!(
            target_map = %target.name,
            mapset = %target.mapset,
            entries = table.entries.len(),
            "parsed reclass header"
        );
        Ok(Some(ReclassHeader { target, table }))
    }
}

/// Everything a reader needs to know about a map before touching its cells.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterHeader {
    pub region: Region,
    pub format: CellFormat,
    pub compressed: bool,
    pub reclass: Option<ReclassTable>,
    pub proj: i32,
    pub zone: i32,
}

impl RasterHeader {
    pub fn new(region: Region, format: CellFormat) -> Self {
        RasterHeader {
            region,
            format,
            compressed: true,
            reclass: None,
            proj: 0,
            zone: 0,
        }
    }

    /// Parses a plain cell header plus, for floating point maps, the
    /// contents of the float format file.
    pub fn parse(cellhd: &str, float_format: Option<&str>) -> Result<Self> {
        let entries = header_entries(cellhd)?;
        let get = |key: &str| {
            entries
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| Error::HeaderCorrupt(format!("missing header key '{}'", key)))
        };

        let north = parse_coordinate(get("north")?)?;
        let south = parse_coordinate(get("south")?)?;
        let east = parse_coordinate(get("east")?)?;
        let west = parse_coordinate(get("west")?)?;
        let region = if entries.contains_key("n-s res") {
            Region::from_resolution(
                west,
                east,
                south,
                north,
                parse_coordinate(get("e-w res")?)?,
                parse_coordinate(get("n-s res")?)?,
            )?
        } else if entries.contains_key("cols") {
            Region::from_rows_cols(
                west,
                east,
                south,
                north,
                parse_count(get("rows")?)?,
                parse_count(get("cols")?)?,
            )?
        } else {
            return Err(Error::HeaderCorrupt(
                "unable to read the map region: neither resolution nor rows/cols".to_string(),
            ));
        };

        let code = get("format")?
            .parse::<i32>()
            .map_err(|_| Error::HeaderCorrupt(format!("bad format '{}'", entries["format"])))?;
        let float_type = match float_format {
            Some(text) => header_entries(text)?.remove("type"),
            None => None,
        };
        let format = CellFormat::from_format_code(code, float_type.as_deref())?;

        let compressed = match get("compressed")? {
            "1" => true,
            "0" => false,
            other => {
                return Err(Error::HeaderCorrupt(format!(
                    "compressed must be 0 or 1, got '{}'",
                    other
                )))
            }
        };

        let optional_int = |key: &str| {
            entries
                .get(key)
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(0)
        };

        let header = RasterHeader {
            region,
            format,
            compressed,
            reclass: None,
            proj: optional_int("proj"),
            zone: optional_int("zone"),
        };
        debug!(%region, ?format, compressed, "parsed cell header");
        Ok(header)
    }

    /// Parses a cell header, following a reclass indirection when present.
    /// `load_target` returns the cell header and optional float format text
    /// of the map a reclass points at.
    pub fn resolve<F>(cellhd: &str, float_format: Option<&str>, load_target: F) -> Result<Self>
    where
        F: FnOnce(&MapRef) -> Result<(String, Option<String>)>,
    {
        match ReclassHeader::parse(cellhd)? {
            None => RasterHeader::parse(cellhd, float_format),
            Some(reclass) => {
                let (target_cellhd, target_format) = load_target(&reclass.target)?;
                if ReclassHeader::parse(&target_cellhd)?.is_some() {
                    return Err(Error::HeaderCorrupt(format!(
                        "reclass target {}@{} is itself a reclass",
                        reclass.target.name, reclass.target.mapset
                    )));
                }
                let mut header = RasterHeader::parse(&target_cellhd, target_format.as_deref())?;
                header.reclass = Some(reclass.table);
                Ok(header)
            }
        }
    }

    /// Text of the cell header for this map.
    pub fn to_cellhd(&self) -> String {
        let mut text = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_cellhd(&mut text);
        text
    }

    fn write_cellhd(&self, mut writer: impl Write) -> std::fmt::Result {
        writeln!(writer, "proj:       {}", self.proj)?;
        writeln!(writer, "zone:       {}", self.zone)?;
        self.region.write_header_entries(&mut writer)?;
        writeln!(writer, "format:     {}", self.format.format_code())?;
        writeln!(writer, "compressed: {}", if self.compressed { 1 } else { 0 })
    }

    /// Text of the float format file, for floating point maps only.
    pub fn to_float_format(&self) -> Option<String> {
        self.format.type_label().map(|label| {
            format!(
                "type: {}\nbyte_order: xdr\nlzw_compression_bits: -1\n",
                label
            )
        })
    }
}

/// Collects `key: value` entries. `resol` keys are stored as `res`, and
/// degree:minute:second values keep their colons.
fn header_entries(text: &str) -> Result<HashMap<String, String>> {
    let mut entries = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| Error::HeaderCorrupt(format!("malformed header line '{}'", line)))?;
        let key = key.trim().replace("resol", "res");
        entries.insert(key, value.trim().to_string());
    }
    Ok(entries)
}

fn parse_count(value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| Error::HeaderCorrupt(format!("bad row/column count '{}'", value)))
}

/// Parses a plain decimal or a `DD:MM[:SS][NSEW]` value into signed decimal
/// degrees. South and west hemispheres are negative.
pub fn parse_coordinate(value: &str) -> Result<f64> {
    let bad = || Error::HeaderCorrupt(format!("bad coordinate '{}'", value));
    let mut text = value.trim();
    let mut sign = 1.0;
    if let Some(last) = text.chars().last() {
        match last.to_ascii_uppercase() {
            'N' | 'E' => text = &text[..text.len() - 1],
            'S' | 'W' => {
                sign = -1.0;
                text = &text[..text.len() - 1];
            }
            _ => {}
        }
    }

    let mut parts = text.split(':');
    let degrees = parts
        .next()
        .and_then(|p| p.trim().parse::<f64>().ok())
        .ok_or_else(bad)?;
    let mut magnitude = degrees.abs();
    let mut scale = 60.0;
    for part in parts {
        let v = part.trim().parse::<f64>().map_err(|_| bad())?;
        if scale > 3600.0 {
            return Err(bad());
        }
        magnitude += v / scale;
        scale *= 60.0;
    }
    if degrees.is_sign_negative() {
        sign = -sign;
    }
    Ok(sign * magnitude)
}
