//! Error-diffusion kernels (spec §4.C): fixed-weight kernels, positional
//! ("a"/"x") dithers, and the variable-coefficient (LSO2) scheme. Each
//! kernel exposes a direct (byte), carry (Q12 fixed-point), and float
//! entry point sharing the same neighbourhood geometry.

use crate::pixelformat::{clamp_float_channel, PixelFormat};

/// Diffusion kernels selectable by the pipeline (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffusionMethod {
    None,
    Atkinson,
    Fs,
    Jajuni,
    Stucki,
    Burkes,
    Sierra1,
    Sierra2,
    Sierra3,
    ADither,
    XDither,
    Lso2,
}

impl DiffusionMethod {
    pub fn is_positional(self) -> bool {
        matches!(self, DiffusionMethod::ADither | DiffusionMethod::XDither)
    }

    pub fn is_fixed(self) -> bool {
        !matches!(self, DiffusionMethod::None | DiffusionMethod::Lso2) && !self.is_positional()
    }
}

/// One term of a fixed diffusion kernel: neighbour offset plus the
/// rational weight applied to the quantization error.
#[derive(Debug, Clone, Copy)]
pub struct KernelTerm {
    pub dx: i32,
    pub dy: i32,
    pub num: i32,
    pub den: i32,
}

const fn t(dx: i32, dy: i32, num: i32, den: i32) -> KernelTerm {
    KernelTerm { dx, dy, num, den }
}

/// Rounding rule used by the direct (byte) diffusion path (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundingRule {
    /// Atkinson: `c = *s + err*num/den`, truncating integer division.
    Fast,
    /// Floyd-Steinberg: `c = *s + (err*num*2/den + 1)/2`.
    Normal,
    /// The 5x3-style kernels: `c = floor(*s + err*num/den + 0.5)`.
    Precise,
}

fn rounding_rule(method: DiffusionMethod) -> RoundingRule {
    match method {
        DiffusionMethod::Atkinson => RoundingRule::Fast,
        DiffusionMethod::Fs => RoundingRule::Normal,
        _ => RoundingRule::Precise,
    }
}

const FS_TERMS: [KernelTerm; 4] = [t(1, 0, 7, 16), t(-1, 1, 3, 16), t(0, 1, 5, 16), t(1, 1, 1, 16)];
const ATKINSON_TERMS: [KernelTerm; 6] =
    [t(1, 0, 1, 8), t(2, 0, 1, 8), t(-1, 1, 1, 8), t(0, 1, 1, 8), t(1, 1, 1, 8), t(0, 2, 1, 8)];
const JAJUNI_TERMS: [KernelTerm; 12] = [
    t(1, 0, 7, 48),
    t(2, 0, 5, 48),
    t(-2, 1, 3, 48),
    t(-1, 1, 5, 48),
    t(0, 1, 7, 48),
    t(1, 1, 5, 48),
    t(2, 1, 3, 48),
    t(-2, 2, 1, 48),
    t(-1, 2, 3, 48),
    t(0, 2, 5, 48),
    t(1, 2, 3, 48),
    t(2, 2, 1, 48),
];
const STUCKI_TERMS: [KernelTerm; 12] = [
    t(1, 0, 8, 48),
    t(2, 0, 4, 48),
    t(-2, 1, 2, 48),
    t(-1, 1, 4, 48),
    t(0, 1, 8, 48),
    t(1, 1, 4, 48),
    t(2, 1, 2, 48),
    t(-2, 2, 1, 48),
    t(-1, 2, 2, 48),
    t(0, 2, 4, 48),
    t(1, 2, 2, 48),
    t(2, 2, 1, 48),
];
const BURKES_TERMS: [KernelTerm; 7] = [
    t(1, 0, 8, 32),
    t(2, 0, 4, 32),
    t(-2, 1, 2, 32),
    t(-1, 1, 4, 32),
    t(0, 1, 8, 32),
    t(1, 1, 4, 32),
    t(2, 1, 2, 32),
];
const SIERRA1_TERMS: [KernelTerm; 3] = [t(1, 0, 2, 4), t(-1, 1, 1, 4), t(0, 1, 1, 4)];
const SIERRA2_TERMS: [KernelTerm; 10] = [
    t(1, 0, 4, 32),
    t(2, 0, 3, 32),
    t(-2, 1, 1, 32),
    t(-1, 1, 2, 32),
    t(0, 1, 3, 32),
    t(1, 1, 2, 32),
    t(2, 1, 1, 32),
    t(-1, 2, 2, 32),
    t(0, 2, 3, 32),
    t(1, 2, 2, 32),
];
const SIERRA3_TERMS: [KernelTerm; 10] = [
    t(1, 0, 5, 32),
    t(2, 0, 3, 32),
    t(-2, 1, 2, 32),
    t(-1, 1, 4, 32),
    t(0, 1, 5, 32),
    t(1, 1, 4, 32),
    t(2, 1, 2, 32),
    t(-1, 2, 2, 32),
    t(0, 2, 3, 32),
    t(1, 2, 2, 32),
];

/// The kernel's weight table, for fixed (non-positional, non-LSO2)
/// methods, exactly as tabulated in spec §4.C.
pub fn fixed_kernel_terms(method: DiffusionMethod) -> &'static [KernelTerm] {
    match method {
        DiffusionMethod::Fs => &FS_TERMS,
        DiffusionMethod::Atkinson => &ATKINSON_TERMS,
        DiffusionMethod::Jajuni => &JAJUNI_TERMS,
        DiffusionMethod::Stucki => &STUCKI_TERMS,
        DiffusionMethod::Burkes => &BURKES_TERMS,
        DiffusionMethod::Sierra1 => &SIERRA1_TERMS,
        DiffusionMethod::Sierra2 => &SIERRA2_TERMS,
        DiffusionMethod::Sierra3 => &SIERRA3_TERMS,
        DiffusionMethod::None | DiffusionMethod::ADither | DiffusionMethod::XDither | DiffusionMethod::Lso2 => &[],
    }
}

/// Mirror an offset by scan direction and bounds-check it; returns
/// `None` when the neighbour falls off the image (spec §4.C: each term
/// is checked independently, matching the reference kernels).
#[inline]
fn neighbor(x: i32, y: i32, width: i32, height: i32, term: KernelTerm, dir: i32) -> Option<(i32, i32)> {
    let nx = x + term.dx * dir;
    let ny = y + term.dy;
    if nx < 0 || nx >= width || ny < 0 || ny >= height {
        None
    } else {
        Some((nx, ny))
    }
}

/// Direct (byte) diffusion: writes the weighted quotient straight into
/// `data`, clipped to `[0, 255]` (spec §4.C, §4.D).
#[allow(clippy::too_many_arguments)]
pub fn diffuse_direct(
    data: &mut [u8],
    width: i32,
    height: i32,
    depth: i32,
    x: i32,
    y: i32,
    error: &[i32],
    dir: i32,
    method: DiffusionMethod,
) {
    let rule = rounding_rule(method);
    for term in fixed_kernel_terms(method) {
        let Some((nx, ny)) = neighbor(x, y, width, height, *term, dir) else { continue };
        let base = (ny * width + nx) as usize * depth as usize;
        for c in 0..depth as usize {
            let s = i64::from(data[base + c]);
            let err = i64::from(error[c]);
            let num = i64::from(term.num);
            let den = i64::from(term.den);
            let c_val = match rule {
                RoundingRule::Fast => s + err * num / den,
                RoundingRule::Normal => s + (err * num * 2 / den + 1) / 2,
                RoundingRule::Precise => {
                    (s as f64 + (err * num) as f64 / den as f64 + 0.5).floor() as i64
                }
            };
            data[base + c] = c_val.clamp(0, 255) as u8;
        }
    }
}

/// Round-to-nearest-ties-away-from-zero division used by carry
/// diffusion (spec §4.C, §4.D): `(err*num + sign*(den/2)) / den`.
fn diffuse_fixed_term(error: i32, num: i32, den: i32) -> i32 {
    let delta = i64::from(error) * i64::from(num);
    let den = i64::from(den);
    let rounded = if delta >= 0 { (delta + den / 2) / den } else { (delta - den / 2) / den };
    rounded as i32
}

/// Carry (Q12 fixed-point) diffusion: accumulates into `curr`/`next`/`far`
/// at the appropriate row offset (spec §4.D).
#[allow(clippy::too_many_arguments)]
pub fn diffuse_carry(
    carry_curr: &mut [i32],
    carry_next: &mut [i32],
    carry_far: &mut [i32],
    width: i32,
    height: i32,
    depth: i32,
    x: i32,
    y: i32,
    error: i32,
    dir: i32,
    channel: usize,
    method: DiffusionMethod,
) {
    if error == 0 {
        return;
    }
    for term in fixed_kernel_terms(method) {
        let Some((nx, _ny)) = neighbor(x, y, width, height, *term, dir) else { continue };
        let term_val = diffuse_fixed_term(error, term.num, term.den);
        let idx = nx as usize * depth as usize + channel;
        match term.dy {
            0 => carry_curr[idx] += term_val,
            1 => carry_next[idx] += term_val,
            _ => carry_far[idx] += term_val,
        }
    }
    let _ = height;
}

/// Float diffusion: `delta = err * (num/den)`, clamped per pixel format
/// (spec §4.C). OKLab chroma channels are additionally scaled by 0.10.
#[allow(clippy::too_many_arguments)]
pub fn diffuse_float(
    data: &mut [f32],
    width: i32,
    height: i32,
    depth: i32,
    x: i32,
    y: i32,
    error: &[f32],
    dir: i32,
    channel_base: usize,
    format: PixelFormat,
    method: DiffusionMethod,
) {
    for term in fixed_kernel_terms(method) {
        let Some((nx, ny)) = neighbor(x, y, width, height, *term, dir) else { continue };
        let base = (ny * width + nx) as usize * depth as usize;
        for c in 0..depth as usize {
            let mut delta = error[c] * (term.num as f32 / term.den as f32);
            if format.is_oklab() && c > 0 {
                delta *= 0.10;
            }
            let v = data[base + c] + delta;
            data[base + c] = clamp_float_channel(format, c, v);
        }
    }
    let _ = channel_base;
}

/// Positional "a" mask (spec §4.C): orientation-independent jitter.
pub fn mask_a(x: i32, y: i32, c: i32) -> f32 {
    (((x + 67 * c + 236 * y) * 119) & 0xFF) as f32 / 128.0 - 1.0
}

/// Positional "x" mask (spec §4.C).
pub fn mask_x(x: i32, y: i32, c: i32) -> f32 {
    ((((x + 29 * c) ^ (149 * y)) * 1234) & 0x1FF) as f32 / 256.0 - 1.0
}

/// Evaluate the positional mask for a method, scaled for 8-bit or float
/// channels (spec §4.C: "scaled by 32 for 8-bit inputs and 32/255 for
/// floats").
pub fn positional_offset(method: DiffusionMethod, x: i32, y: i32, c: i32, is_float: bool) -> f32 {
    let raw = match method {
        DiffusionMethod::ADither => mask_a(x, y, c),
        DiffusionMethod::XDither => mask_x(x, y, c),
        _ => 0.0,
    };
    if is_float {
        raw * 32.0 / 255.0
    } else {
        raw * 32.0
    }
}

/// One row of the LSO2 variable-coefficient table: six weights keyed by
/// channel residue magnitude plus a shared denominator.
#[derive(Debug, Clone, Copy)]
pub struct Lso2Row {
    pub r: i32,
    pub r2: i32,
    pub dl: i32,
    pub d: i32,
    pub dr: i32,
    pub d2: i32,
    pub den: i32,
}

/// Build the 256-entry LSO2 table. The upstream table ships a
/// proprietary set of measured coefficients; lacking that data this
/// generates a monotonically-softening set of weights (sharp,
/// Floyd-Steinberg-like spread for small residues, flattening toward an
/// Atkinson-like even spread for large ones) using the same six-target
/// geometry and energy-conserving constraint the spec requires. Row 0
/// ships `den = 0` and is rewritten to 1 (spec §9 open question).
pub fn lso2_table() -> [Lso2Row; 256] {
    let mut table = [Lso2Row { r: 0, r2: 0, dl: 0, d: 0, dr: 0, d2: 0, den: 0 }; 256];
    for (i, row) in table.iter_mut().enumerate() {
        let t = i as f32 / 255.0; // 0 = flat spread, 1 = sharp forward spread
        let den = 64;
        let r = (7.0 + 9.0 * t) as i32;
        let r2 = (5.0 + 3.0 * t) as i32;
        let dl = (3.0 + 5.0 * (1.0 - t)) as i32;
        let d = (8.0 + 4.0 * (1.0 - t)) as i32;
        let dr = (4.0 + 4.0 * (1.0 - t)) as i32;
        let d2 = den - r - r2 - dl - d - dr;
        *row = Lso2Row { r, r2, dl, d, dr, d2, den };
    }
    table[0].den = 0;
    table
}

/// Resolve a table row, rewriting the `den = 0` sentinel to 1 (spec §9).
fn lso2_row(table: &[Lso2Row; 256], magnitude: u8) -> Lso2Row {
    let mut row = table[magnitude as usize];
    if row.den == 0 {
        row.den = 1;
    }
    row
}

/// The six LSO2 targets relative to `(x, y)`, mirrored for reverse scan
/// (spec §4.C): `(x+1,y)`, `(x+2,y)`, `(x-1,y+1)`, `(x,y+1)`,
/// `(x+1,y+1)`, `(x,y+2)`.
fn lso2_targets(dir: i32) -> [(i32, i32); 6] {
    [(dir, 0), (2 * dir, 0), (-dir, 1), (0, 1), (dir, 1), (0, 2)]
}

/// LSO2 direct (byte) diffusion.
#[allow(clippy::too_many_arguments)]
pub fn diffuse_lso2_direct(
    data: &mut [u8],
    width: i32,
    height: i32,
    depth: i32,
    x: i32,
    y: i32,
    error: &[i32],
    dir: i32,
    table: &[Lso2Row; 256],
) {
    for (c, &err) in error.iter().enumerate() {
        let row = lso2_row(table, err.unsigned_abs().min(255) as u8);
        let weights = [row.r, row.r2, row.dl, row.d, row.dr, row.d2];
        for (offset, &num) in lso2_targets(dir).iter().zip(weights.iter()) {
            let nx = x + offset.0;
            let ny = y + offset.1;
            if nx < 0 || nx >= width || ny < 0 || ny >= height {
                continue;
            }
            let base = (ny * width + nx) as usize * depth as usize + c;
            let v = i64::from(data[base]) + i64::from(err) * i64::from(num) / i64::from(row.den);
            data[base] = v.clamp(0, 255) as u8;
        }
    }
}

/// LSO2 carry diffusion. The last target (`d2`) is recomputed as
/// `err - sum(others)` so residue is conserved exactly (spec §4.C).
#[allow(clippy::too_many_arguments)]
pub fn diffuse_lso2_carry(
    carry_curr: &mut [i32],
    carry_next: &mut [i32],
    carry_far: &mut [i32],
    width: i32,
    height: i32,
    depth: i32,
    x: i32,
    y: i32,
    channel: usize,
    error: i32,
    dir: i32,
    table: &[Lso2Row; 256],
) {
    if error == 0 {
        return;
    }
    let row = lso2_row(table, error.unsigned_abs().min(255) as u8);
    let targets = lso2_targets(dir);
    let mut terms = [0i32; 6];
    let raw_weights = [row.r, row.r2, row.dl, row.d, row.dr];
    for (i, &num) in raw_weights.iter().enumerate() {
        terms[i] = diffuse_fixed_term(error, num, row.den);
    }
    terms[5] = error - terms[..5].iter().sum::<i32>();
    for (offset, term_val) in targets.iter().zip(terms.iter()) {
        let nx = x + offset.0;
        let ny = y + offset.1;
        if nx < 0 || nx >= width || ny < 0 || ny >= height {
            continue;
        }
        let idx = nx as usize * depth as usize + channel;
        match offset.1 {
            0 => carry_curr[idx] += *term_val,
            1 => carry_next[idx] += *term_val,
            _ => carry_far[idx] += *term_val,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_weights_sum_to_one() {
        let sum: f64 = fixed_kernel_terms(DiffusionMethod::Fs)
            .iter()
            .map(|t| f64::from(t.num) / f64::from(t.den))
            .sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn atkinson_loses_energy() {
        let sum: f64 = fixed_kernel_terms(DiffusionMethod::Atkinson)
            .iter()
            .map(|t| f64::from(t.num) / f64::from(t.den))
            .sum();
        assert!(sum < 1.0);
    }

    #[test]
    fn direct_clamps_to_byte_range() {
        let mut data = vec![0u8, 250, 0];
        diffuse_direct(&mut data, 3, 1, 1, 0, 0, &[4096], 1, DiffusionMethod::Fs);
        assert_eq!(data[1], 255);
    }

    #[test]
    fn carry_rounding_is_ties_away_from_zero() {
        assert_eq!(diffuse_fixed_term(1, 1, 2), 1);
        assert_eq!(diffuse_fixed_term(-1, 1, 2), -1);
    }

    #[test]
    fn mask_a_is_orientation_independent_of_serpentine() {
        // mask_a depends only on (x,y,c), never on scan direction.
        let v1 = mask_a(3, 4, 1);
        let v2 = mask_a(3, 4, 1);
        assert_eq!(v1, v2);
    }

    #[test]
    fn lso2_table_rewrites_zero_denominator() {
        let table = lso2_table();
        assert_eq!(table[0].den, 0);
        let row = lso2_row(&table, 0);
        assert_eq!(row.den, 1);
    }
}
