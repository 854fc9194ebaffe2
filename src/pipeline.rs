//! Pipeline glue (spec §4.I): orchestrates format promotion, LUT/carry
//! resolution, band dispatch (serial or parallel), and palette-optimize
//! compaction behind one call.

use std::sync::OnceLock;

use tracing::{debug, info_span};

use crate::band::{run_band_floats, BandConfig, DEPTH};
use crate::carry::CarryMode;
use crate::error::{SixelError, SixelResult};
use crate::kernel::{lso2_table, DiffusionMethod, Lso2Row};
use crate::lut::{LutPolicy, PaletteLut, Weights};
use crate::optimize::{build_migration_map, remap_indices, remap_palette};
use crate::palette::Palette;
use crate::pixelformat::{normalize_to_rgb888, promote_to_float, PixelFormat};
use crate::scan::ScanMode;
use crate::scheduler::{run_parallel, DitherJob, ScheduleParams};

/// Resolved dither request (spec §6's CLI/API enums, gathered into one
/// configuration object, following the teacher's `Args` derive pattern
/// but for the library's own call surface rather than `clap`).
#[derive(Debug, Clone, Copy)]
pub struct DitherOptions {
    pub method: DiffusionMethod,
    pub scan_mode: ScanMode,
    pub carry_mode: CarryMode,
    pub lut_policy: LutPolicy,
    pub weights: Weights,
    pub optimize_palette: bool,
    pub band_height: usize,
    pub overlap: usize,
    pub threads: usize,
    /// Promote 8-bit input to float32 internally before dithering (spec
    /// §4.I); ignored by [`apply_palette_float`], whose input is already
    /// float.
    pub prefer_float32: bool,
}

impl Default for DitherOptions {
    fn default() -> Self {
        Self {
            method: DiffusionMethod::Fs,
            scan_mode: ScanMode::Auto,
            carry_mode: CarryMode::Auto,
            lut_policy: LutPolicy::Auto,
            weights: Weights::default(),
            optimize_palette: false,
            band_height: 6,
            overlap: 6,
            threads: 1,
            prefer_float32: false,
        }
    }
}

/// Result of a full dither pass: the index buffer plus the (possibly
/// compacted) palette it indexes into.
#[derive(Debug)]
pub struct DitherOutput {
    pub indices: Vec<u8>,
    pub palette: Palette,
}

/// Resolve the `SIXEL_FLOAT32_DITHER` environment switch once per process
/// (spec §6): empty and `0/false/off/no` disable; anything else (including
/// `kmeans`) enables.
pub fn float32_dither_env_enabled() -> bool {
    static CACHE: OnceLock<bool> = OnceLock::new();
    *CACHE.get_or_init(|| match std::env::var("SIXEL_FLOAT32_DITHER") {
        Ok(v) => {
            let v = v.trim().to_ascii_lowercase();
            !matches!(v.as_str(), "" | "0" | "false" | "off" | "no")
        }
        Err(_) => false,
    })
}

/// Run the full quantize/dither/optionally-compact pipeline over an
/// 8-bit-per-channel image (spec §4.E-I). `pixels` must already be in
/// `format`'s native layout; non-RGB888 byte formats are normalized here
/// (spec §4.I). When `options.prefer_float32` (or the `SIXEL_FLOAT32_DITHER`
/// switch) is set, pixels are promoted to float once and run through the
/// float band worker instead (unless carry is enabled with a fixed
/// kernel, which forces the byte path back on — spec §4.D).
pub fn apply_palette(
    pixels: &[u8],
    width: usize,
    height: usize,
    format: PixelFormat,
    mut palette: Palette,
    options: &DitherOptions,
) -> SixelResult<DitherOutput> {
    if width == 0 || height == 0 {
        return Err(SixelError::BadInput("width/height must be >= 1".into()));
    }
    if format.is_float() {
        return Err(SixelError::BadArgument("float32 formats must go through apply_palette_float".into()));
    }

    let _span = info_span!("apply_palette", width, height, ncolors = palette.ncolors).entered();

    let mut rgb = vec![0u8; width * height * DEPTH];
    if format == PixelFormat::Rgb888 {
        rgb.copy_from_slice(&pixels[..width * height * DEPTH]);
    } else {
        normalize_to_rgb888(&mut rgb, pixels, format, width as i32, height as i32, None)?;
    }

    let want_float = options.prefer_float32 || float32_dither_env_enabled();
    let carry_enabled = options.carry_mode.resolved_enabled();
    let lso2 = if options.method == DiffusionMethod::Lso2 { Some(lso2_table()) } else { None };
    let config = BandConfig { method: options.method, scan_mode: options.scan_mode, weights: options.weights };

    let use_float = want_float && !(carry_enabled && options.method.is_fixed());
    let mut indices = if use_float {
        debug!("apply_palette: promoted to float32 path");
        let mut floats = vec![0f32; width * height * DEPTH];
        promote_to_float(&mut floats, &rgb);
        run_float(&mut floats, width, height, PixelFormat::RgbFloat32, &palette, &config, lso2.as_ref())
    } else {
        debug!(carry_enabled, "apply_palette: byte path");
        run_byte_path(&rgb, width, height, &palette, &config, carry_enabled, lso2.as_ref(), options)?
    };

    if options.optimize_palette {
        compact_palette(&mut indices, &mut palette);
    }

    Ok(DitherOutput { indices, palette })
}

/// Run the pipeline over float32 pixels already in `format`'s native
/// range (spec §3: `RGBFLOAT32`/`LINEARRGBFLOAT32`/`OKLABFLOAT32`).
/// Carry is never used here (spec §4.D).
pub fn apply_palette_float(
    pixels: &[f32],
    width: usize,
    height: usize,
    format: PixelFormat,
    mut palette: Palette,
    options: &DitherOptions,
) -> SixelResult<DitherOutput> {
    if width == 0 || height == 0 {
        return Err(SixelError::BadInput("width/height must be >= 1".into()));
    }
    if !format.is_float() {
        return Err(SixelError::BadArgument("apply_palette_float requires a float32 pixel format".into()));
    }
    let _span = info_span!("apply_palette_float", width, height, ncolors = palette.ncolors).entered();

    let lso2 = if options.method == DiffusionMethod::Lso2 { Some(lso2_table()) } else { None };
    let config = BandConfig { method: options.method, scan_mode: options.scan_mode, weights: options.weights };
    let mut floats = pixels[..width * height * DEPTH].to_vec();
    let mut indices = run_float(&mut floats, width, height, format, &palette, &config, lso2.as_ref());

    if options.optimize_palette {
        compact_palette(&mut indices, &mut palette);
    }

    Ok(DitherOutput { indices, palette })
}

fn compact_palette(indices: &mut [u8], palette: &mut Palette) {
    let (migration, used) = build_migration_map(indices, palette.ncolors);
    let compacted = remap_palette(palette, &migration, used);
    remap_indices(indices, &migration);
    *palette = compacted;
}

#[allow(clippy::too_many_arguments)]
fn run_byte_path(
    rgb: &[u8],
    width: usize,
    height: usize,
    palette: &Palette,
    config: &BandConfig,
    carry_enabled: bool,
    lso2: Option<&[Lso2Row; 256]>,
    options: &DitherOptions,
) -> SixelResult<Vec<u8>> {
    let lut = PaletteLut::configure(palette, DEPTH, options.lut_policy)?;

    // Palette-optimize mutates shared palette state and is racy by
    // construction; it forces the serial path (spec §4.G).
    let threads = if options.optimize_palette { 1 } else { options.threads };
    let job = DitherJob {
        data: rgb,
        width,
        height,
        palette,
        lut: &lut,
        config,
        carry_mode: if carry_enabled { CarryMode::Enable } else { CarryMode::Disable },
        lso2_table: lso2,
    };
    run_parallel(&job, ScheduleParams { band_height: options.band_height, overlap: options.overlap, threads })
}

fn run_float(
    floats: &mut [f32],
    width: usize,
    height: usize,
    format: PixelFormat,
    palette: &Palette,
    config: &BandConfig,
    lso2: Option<&[Lso2Row; 256]>,
) -> Vec<u8> {
    let mirrored;
    let palette_ref = if palette.entries_float.is_some() {
        palette
    } else {
        mirrored = palette.clone().with_float_mirror();
        &mirrored
    };
    let mut indices = vec![0u8; width * height];
    run_band_floats(floats, width, height, palette_ref, format, config, lso2, 0, 0, &mut indices, None);
    indices
}
