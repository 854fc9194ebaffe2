//! Scan-order helper (spec §4.B): given a row and a serpentine flag,
//! returns the `(start, end, step, dir)` tuple a band worker iterates.

/// Direction of a scanline traversal: `+1` left-to-right, `-1` reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOrder {
    pub start: i32,
    pub end: i32,
    pub step: i32,
    pub dir: i32,
}

impl ScanOrder {
    /// Iterate the x-coordinates this scan order visits, in order.
    pub fn columns(self) -> impl Iterator<Item = i32> {
        let ScanOrder { start, end, step, .. } = self;
        let n = ((end - start) / step).unsigned_abs() as usize;
        (0..n).map(move |i| start + step * i as i32)
    }
}

/// CLI/API scan mode (spec §6). `Auto` resolves to raster, matching the
/// `CarryMode::Auto` resolution pattern elsewhere in the configuration
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Auto,
    Raster,
    Serpentine,
}

impl ScanMode {
    pub fn resolved_serpentine(self) -> bool {
        matches!(self, ScanMode::Serpentine)
    }
}

/// Whether serpentine scanning is enabled for a given row, based on the
/// shared parity basis (`band_origin + y`, spec §4.E) so seams between
/// bands stay consistent.
pub fn scan_order(row_parity_basis: i32, width: i32, serpentine: bool) -> ScanOrder {
    let raster = ScanOrder { start: 0, end: width, step: 1, dir: 1 };
    if !serpentine {
        return raster;
    }
    if row_parity_basis.rem_euclid(2) == 1 {
        ScanOrder { start: width - 1, end: -1, step: -1, dir: -1 }
    } else {
        raster
    }
}
