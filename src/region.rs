use std::fmt::{Display, Write};

use crate::io::{Error, Result};

/// Geographic extent and grid geometry of a raster.
///
/// The resolutions are always derived from the bounds and the row/column
/// counts, so `cols * ew_res == east - west` holds up to rounding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    west: f64,
    east: f64,
    south: f64,
    north: f64,
    rows: usize,
    cols: usize,
    ew_res: f64,
    ns_res: f64,
}

impl Region {
    pub fn from_rows_cols(
        west: f64,
        east: f64,
        south: f64,
        north: f64,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::HeaderCorrupt(format!(
                "region needs at least one row and column, got {}x{}",
                rows, cols
            )));
        }
        let region = Region {
            west,
            east,
            south,
            north,
            rows,
            cols,
            ew_res: (east - west) / cols as f64,
            ns_res: (north - south) / rows as f64,
        };
        region.validate()?;
        Ok(region)
    }

    /// Builds a region from bounds and resolutions. The row and column counts
    /// are rounded and the resolutions then recomputed from them.
    pub fn from_resolution(
        west: f64,
        east: f64,
        south: f64,
        north: f64,
        ew_res: f64,
        ns_res: f64,
    ) -> Result<Self> {
        if !(ew_res > 0.0 && ns_res > 0.0) {
            return Err(Error::HeaderCorrupt(format!(
                "resolutions must be positive, got e-w {} n-s {}",
                ew_res, ns_res
            )));
        }
        let cols = ((east - west) / ew_res).round();
        let rows = ((north - south) / ns_res).round();
        if !(cols >= 1.0 && rows >= 1.0) {
            return Err(Error::HeaderCorrupt(format!(
                "bounds w={} e={} s={} n={} hold no cell at the given resolution",
                west, east, south, north
            )));
        }
        Region::from_rows_cols(west, east, south, north, rows as usize, cols as usize)
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.west, self.east, self.south, self.north]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.ew_res <= 0.0 || self.ns_res <= 0.0 {
            return Err(Error::HeaderCorrupt(format!("invalid region {}", self)));
        }
        Ok(())
    }

    pub fn west(&self) -> f64 {
        self.west
    }

    pub fn east(&self) -> f64 {
        self.east
    }

    pub fn south(&self) -> f64 {
        self.south
    }

    pub fn north(&self) -> f64 {
        self.north
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ew_res(&self) -> f64 {
        self.ew_res
    }

    pub fn ns_res(&self) -> f64 {
        self.ns_res
    }

    /// Easting and northing of the center of cell `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.west + col as f64 * self.ew_res + self.ew_res / 2.0,
            self.north - row as f64 * self.ns_res - self.ns_res / 2.0,
        )
    }

    /// North, south, east, west edges of cell `(row, col)`.
    pub fn cell_bounds(&self, row: usize, col: usize) -> [f64; 4] {
        let north = self.north - row as f64 * self.ns_res;
        let west = self.west + col as f64 * self.ew_res;
        [north, north - self.ns_res, west + self.ew_res, west]
    }

    /// Row and column of the cell holding a coordinate, or `None` outside
    /// the region. Coordinates on the east or south edge belong to the last
    /// column or row.
    pub fn cell_at(&self, easting: f64, northing: f64) -> Option<(usize, usize)> {
        if easting < self.west
            || easting > self.east
            || northing < self.south
            || northing > self.north
        {
            return None;
        }
        let col = ((easting - self.west) / self.ew_res).floor() as usize;
        let row = ((self.north - northing) / self.ns_res).floor() as usize;
        Some((row.min(self.rows - 1), col.min(self.cols - 1)))
    }

    /// Writes the region keys of a cell header.
    pub fn write_header_entries(&self, mut writer: impl Write) -> std::fmt::Result {
        writeln!(writer, "north:      {}", self.north)?;
        writeln!(writer, "south:      {}", self.south)?;
        writeln!(writer, "east:       {}", self.east)?;
        writeln!(writer, "west:       {}", self.west)?;
        writeln!(writer, "cols:       {}", self.cols)?;
        writeln!(writer, "rows:       {}", self.rows)?;
        writeln!(writer, "e-w resol:  {}", self.ew_res)?;
        writeln!(writer, "n-s resol:  {}", self.ns_res)
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Region w={} e={} s={} n={} rows={} cols={} ewres={} nsres={}",
            self.west, self.east, self.south, self.north, self.rows, self.cols, self.ew_res,
            self.ns_res
        )
    }
}
