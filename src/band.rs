//! Band worker (spec §4.E): for each pixel, compose sample + carry,
//! resolve a palette index, write it (respecting the overlap/ghost-row
//! rule), and diffuse the quantization error.

use crate::carry::CarryBuffers;
use crate::kernel::{self, DiffusionMethod, Lso2Row};
use crate::lut::{nearest_linear_float, PaletteLut, Weights};
use crate::palette::Palette;
use crate::pixelformat::PixelFormat;
use crate::scan::{scan_order, ScanMode};

/// Depth the dither core always operates at (spec §3: "always 3").
pub const DEPTH: usize = 3;

pub struct BandConfig {
    pub method: DiffusionMethod,
    pub scan_mode: ScanMode,
    pub weights: Weights,
}

/// Run one band over an 8-bit sample slab. `data` is `width * height * 3`
/// bytes; `indices_out` is addressed the same way as the caller's shared
/// result buffer slice for this slab (spec §4.G: `&result[in_lo*width]`).
/// `carry`, when `Some`, is consulted and rotated per scanline.
#[allow(clippy::too_many_arguments)]
pub fn run_band_bytes(
    data: &mut [u8],
    width: usize,
    height: usize,
    palette: &Palette,
    lut: &mut PaletteLut,
    config: &BandConfig,
    mut carry: Option<&mut CarryBuffers>,
    lso2_table: Option<&[Lso2Row; 256]>,
    band_origin: i32,
    output_start: i32,
    indices_out: &mut [u8],
    mut row_callback: Option<&mut dyn FnMut(i32)>,
) {
    let w = width as i32;
    let h = height as i32;
    let serpentine = config.scan_mode.resolved_serpentine() && !config.method.is_positional();

    for y in 0..height as i32 {
        let order = scan_order(band_origin + y, w, serpentine);
        for x in order.columns() {
            let base = (y * w + x) as usize * DEPTH;
            let mut pixel = [0u8; DEPTH];
            let mut error_direct = [0i32; DEPTH];
            let mut error_q12 = [0i32; DEPTH];
            let mut acc_q12 = [0i32; DEPTH];

            for (c, slot) in pixel.iter_mut().enumerate() {
                let raw = data[base + c];
                *slot = if let Some(buf) = carry.as_deref_mut() {
                    let idx = x as usize * DEPTH + c;
                    let acc = buf.compose_and_consume(idx, raw);
                    acc_q12[c] = acc;
                    let composed = CarryBuffers::to_byte(acc);
                    data[base + c] = composed;
                    composed
                } else {
                    raw
                };
            }

            if config.method.is_positional() {
                for (c, slot) in pixel.iter_mut().enumerate() {
                    let offset = kernel::positional_offset(config.method, x, band_origin + y, c as i32, false);
                    *slot = (f32::from(*slot) + offset).clamp(0.0, 255.0).round() as u8;
                }
            }

            let index = lut.map_pixel(palette, config.weights, pixel);

            if band_origin + y >= output_start {
                indices_out[(y * w + x) as usize] = index as u8;
            }

            if !config.method.is_positional() {
                let entry = palette.rgb(index);
                for c in 0..DEPTH {
                    error_direct[c] = i32::from(pixel[c]) - i32::from(entry[c]);
                }
                if carry.is_some() {
                    for (c, slot) in error_q12.iter_mut().enumerate() {
                        *slot = acc_q12[c] - (i32::from(entry[c]) << crate::carry::CARRY_SHIFT);
                    }
                }

                if let Some(buf) = carry.as_deref_mut() {
                    for (c, &err) in error_q12.iter().enumerate() {
                        if config.method == DiffusionMethod::Lso2 {
                            if let Some(table) = lso2_table {
                                kernel::diffuse_lso2_carry(
                                    &mut buf.curr,
                                    &mut buf.next,
                                    &mut buf.far,
                                    w,
                                    h,
                                    DEPTH as i32,
                                    x,
                                    y,
                                    c,
                                    err,
                                    order.dir,
                                    table,
                                );
                            }
                        } else {
                            kernel::diffuse_carry(
                                &mut buf.curr,
                                &mut buf.next,
                                &mut buf.far,
                                w,
                                h,
                                DEPTH as i32,
                                x,
                                y,
                                err,
                                order.dir,
                                c,
                                config.method,
                            );
                        }
                    }
                } else if config.method == DiffusionMethod::Lso2 {
                    if let Some(table) = lso2_table {
                        kernel::diffuse_lso2_direct(data, w, h, DEPTH as i32, x, y, &error_direct, order.dir, table);
                    }
                } else if config.method != DiffusionMethod::None {
                    kernel::diffuse_direct(data, w, h, DEPTH as i32, x, y, &error_direct, order.dir, config.method);
                }
            }
        }

        if let Some(buf) = carry.as_deref_mut() {
            buf.rotate();
        }
        if let Some(cb) = row_callback.as_deref_mut() {
            cb(band_origin + y);
        }
    }
}

/// Float32 variant (spec §4.E, §4.I). Carry is never used here (spec
/// §4.D: "carry is forbidden on the float32 fast path"); positional and
/// LSO2 kernels read the float mirror of the palette.
#[allow(clippy::too_many_arguments)]
pub fn run_band_floats(
    data: &mut [f32],
    width: usize,
    height: usize,
    palette: &Palette,
    format: PixelFormat,
    config: &BandConfig,
    lso2_table: Option<&[Lso2Row; 256]>,
    band_origin: i32,
    output_start: i32,
    indices_out: &mut [u8],
    mut row_callback: Option<&mut dyn FnMut(i32)>,
) {
    let w = width as i32;
    let h = height as i32;
    let serpentine = config.scan_mode.resolved_serpentine() && !config.method.is_positional();

    for y in 0..height as i32 {
        let order = scan_order(band_origin + y, w, serpentine);
        for x in order.columns() {
            let base = (y * w + x) as usize * DEPTH;
            let mut pixel = [0f32; DEPTH];
            pixel.copy_from_slice(&data[base..base + DEPTH]);

            if config.method.is_positional() {
                for (c, p) in pixel.iter_mut().enumerate() {
                    let offset = kernel::positional_offset(config.method, x, band_origin + y, c as i32, true);
                    *p = crate::pixelformat::clamp_float_channel(format, c, *p + offset);
                }
            }

            let index = nearest_linear_float(pixel, palette, config.weights);

            if band_origin + y >= output_start {
                indices_out[(y * w + x) as usize] = index as u8;
            }

            if !config.method.is_positional() {
                let Some(entry) = palette.rgb_float(index) else { continue };
                let mut error = [0f32; DEPTH];
                for c in 0..DEPTH {
                    error[c] = pixel[c] - entry[c];
                }
                if config.method == DiffusionMethod::Lso2 {
                    if let Some(table) = lso2_table {
                        diffuse_lso2_float(data, w, h, x, y, &error, order.dir, table, format);
                    }
                } else if config.method != DiffusionMethod::None {
                    kernel::diffuse_float(data, w, h, DEPTH as i32, x, y, &error, order.dir, 0, format, config.method);
                }
            }
        }
        if let Some(cb) = row_callback.as_deref_mut() {
            cb(band_origin + y);
        }
    }
}

/// LSO2 float diffusion, mirroring [`kernel::diffuse_lso2_direct`] for
/// floating-point channels.
#[allow(clippy::too_many_arguments)]
fn diffuse_lso2_float(
    data: &mut [f32],
    width: i32,
    height: i32,
    x: i32,
    y: i32,
    error: &[f32; DEPTH],
    dir: i32,
    table: &[Lso2Row; 256],
    format: PixelFormat,
) {
    for (c, &err) in error.iter().enumerate() {
        let magnitude = (err.abs() * 255.0).round().clamp(0.0, 255.0) as u8;
        let row = {
            let mut r = table[magnitude as usize];
            if r.den == 0 {
                r.den = 1;
            }
            r
        };
        let weights = [row.r, row.r2, row.dl, row.d, row.dr, row.d2];
        let targets = [(dir, 0), (2 * dir, 0), (-dir, 1), (0, 1), (dir, 1), (0, 2)];
        for (offset, &num) in targets.iter().zip(weights.iter()) {
            let nx = x + offset.0;
            let ny = y + offset.1;
            if nx < 0 || nx >= width || ny < 0 || ny >= height {
                continue;
            }
            let base = (ny * width + nx) as usize * DEPTH + c;
            let mut delta = err * (num as f32 / row.den as f32);
            if format.is_oklab() && c > 0 {
                delta *= 0.10;
            }
            data[base] = crate::pixelformat::clamp_float_channel(format, c, data[base] + delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carry::CarryMode;
    use crate::lut::LutPolicy;

    fn mono_palette() -> Palette {
        Palette::new(vec![0, 0, 0, 255, 255, 255]).unwrap()
    }

    /// Seed scenario S1: FS, RGB888, 2-colour palette, 4x1 gradient.
    #[test]
    fn s1_fs_gradient_indices() {
        let palette = mono_palette();
        let mut lut = PaletteLut::configure(&palette, DEPTH, LutPolicy::Linear).unwrap();
        let mut data = vec![0u8, 0, 0, 85, 85, 85, 170, 170, 170, 255, 255, 255];
        let mut indices = vec![0u8; 4];
        let config = BandConfig { method: DiffusionMethod::Fs, scan_mode: ScanMode::Raster, weights: Weights::default() };
        run_band_bytes(&mut data, 4, 1, &palette, &mut lut, &config, None, None, 0, 0, &mut indices, None);
        assert_eq!(indices, vec![0, 0, 1, 1]);
    }

    /// Seed scenario S3: serpentine boundary, alternating colours.
    #[test]
    fn s3_serpentine_row_reversal() {
        let palette = Palette::new(vec![255, 0, 0, 0, 255, 0]).unwrap();
        let mut lut = PaletteLut::configure(&palette, DEPTH, LutPolicy::Linear).unwrap();
        #[rustfmt::skip]
        let mut data = vec![
            255, 0, 0,  0, 255, 0,  255, 0, 0,
            0, 255, 0,  255, 0, 0,  0, 255, 0,
        ];
        let mut indices = vec![0u8; 6];
        let config =
            BandConfig { method: DiffusionMethod::Fs, scan_mode: ScanMode::Serpentine, weights: Weights::default() };
        run_band_bytes(&mut data, 3, 2, &palette, &mut lut, &config, None, None, 0, 0, &mut indices, None);
        assert_eq!(&indices[0..3], &[0, 1, 0]);
        assert_eq!(&indices[3..6], &[1, 0, 1]);
    }

    #[test]
    fn overlap_rows_are_not_written() {
        let palette = mono_palette();
        let mut lut = PaletteLut::configure(&palette, DEPTH, LutPolicy::Linear).unwrap();
        let mut data = vec![0u8; 2 * 3 * 3];
        let mut indices = vec![9u8; 2 * 3];
        let config = BandConfig { method: DiffusionMethod::None, scan_mode: ScanMode::Raster, weights: Weights::default() };
        // band_origin = 0, output_start = 1: row 0 is pure warm-up overlap.
        run_band_bytes(&mut data, 3, 2, &palette, &mut lut, &config, None, None, 0, 1, &mut indices, None);
        assert_eq!(&indices[0..3], &[9, 9, 9]);
        assert_ne!(indices[3], 9);
    }

    #[test]
    fn carry_enabled_rounds_composed_sample_back_into_data() {
        let palette = mono_palette();
        let mut lut = PaletteLut::configure(&palette, DEPTH, LutPolicy::Linear).unwrap();
        let mut carry = CarryBuffers::new(2, DEPTH);
        assert!(!CarryMode::Auto.resolved_enabled());
        let mut data = vec![10u8, 10, 10, 20, 20, 20];
        let mut indices = vec![0u8; 2];
        let config = BandConfig { method: DiffusionMethod::Fs, scan_mode: ScanMode::Raster, weights: Weights::default() };
        run_band_bytes(&mut data, 2, 1, &palette, &mut lut, &config, Some(&mut carry), None, 0, 0, &mut indices, None);
        assert_eq!(indices[0], 0);
    }

    /// The carry path must diffuse the full Q12 accumulator's error
    /// (`acc_q12`), not the already-rounded byte's error — otherwise the
    /// whole point of carrying sub-pixel precision across scanlines is
    /// lost. Regression for a bug where `error_q12` was recomputed from
    /// the rounded `pixel` byte and a zeroed `buf.curr` slot instead of
    /// from the preserved `acc_q12` accumulator.
    #[test]
    fn carry_path_diffuses_full_q12_precision_not_rounded_byte() {
        let palette = mono_palette();
        let mut lut = PaletteLut::configure(&palette, DEPTH, LutPolicy::Linear).unwrap();
        let mut carry = CarryBuffers::new(1, DEPTH);
        // Simulate 818/4096 of incoming fractional carry on every channel;
        // chosen so the rounded-byte recomputation and the true Q12
        // accumulator disagree on the palette-relative error by enough to
        // flip the next scanline's composed byte after diffusion.
        carry.curr.iter_mut().for_each(|v| *v = 818);
        let mut data = vec![11u8, 11, 11, 0, 0, 0];
        let mut indices = vec![0u8; 2];
        let config = BandConfig { method: DiffusionMethod::Fs, scan_mode: ScanMode::Raster, weights: Weights::default() };
        run_band_bytes(&mut data, 1, 2, &palette, &mut lut, &config, Some(&mut carry), None, 0, 0, &mut indices, None);
        assert_eq!(&data[3..6], &[4, 4, 4]);
    }
}
