//! CLI front-end for the `sixela` quantize/dither/SIXEL core.
//!
//! Decodes an image, builds a trivial fixed-step uniform-box palette
//! (median-cut/k-means are explicitly out of scope, spec §1), dithers it
//! through the library's public pipeline, and writes the resulting SIXEL
//! bitstream.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use sixela::carry::CarryMode;
use sixela::kernel::DiffusionMethod;
use sixela::lut::LutPolicy;
use sixela::output::{EncodePolicy, PaletteType};
use sixela::palette::Palette;
use sixela::pipeline::{apply_palette, DitherOptions};
use sixela::pixelformat::PixelFormat;
use sixela::scan::ScanMode;
use sixela::sixel::encode_image;

/// Render an image as a SIXEL escape sequence.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input image path (any format the `image` crate can decode).
    in_img: PathBuf,

    /// Output path for the SIXEL stream; defaults to stdout.
    #[arg(short, long)]
    out_file: Option<PathBuf>,

    /// Number of palette colours to quantize to (a cube of this many
    /// colours is built with uniform spacing; not median-cut).
    #[arg(short, long, default_value_t = 16)]
    colors: usize,

    /// Error-diffusion / positional dithering method.
    #[arg(short, long, value_enum, default_value_t = Method::Fs)]
    method: Method,

    #[arg(long, value_enum, default_value_t = Scan::Auto)]
    scan: Scan,

    #[arg(long, value_enum, default_value_t = Carry::Auto)]
    carry: Carry,

    #[arg(long, value_enum, default_value_t = Lut::Auto)]
    lut: Lut,

    #[arg(long, value_enum, default_value_t = Pal::Auto)]
    palette_type: Pal,

    #[arg(long, value_enum, default_value_t = Policy::Auto)]
    encode_policy: Policy,

    /// Compact the palette to only the colours actually used after
    /// dithering (spec §4.F); disables the parallel scheduler.
    #[arg(long)]
    optimize_palette: bool,

    /// Emit only the SIXEL body, without the DCS header/palette/footer.
    #[arg(long)]
    bodyonly: bool,

    /// Promote pixels to float32 internally before dithering.
    #[arg(long)]
    float32: bool,

    /// Worker threads for the parallel band scheduler.
    #[arg(short, long, default_value_t = 1)]
    threads: usize,

    #[arg(long, default_value_t = 6)]
    band_height: usize,

    #[arg(long, default_value_t = 6)]
    overlap: usize,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Method {
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

impl From<Method> for DiffusionMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::None => DiffusionMethod::None,
            Method::Atkinson => DiffusionMethod::Atkinson,
            Method::Fs => DiffusionMethod::Fs,
            Method::Jajuni => DiffusionMethod::Jajuni,
            Method::Stucki => DiffusionMethod::Stucki,
            Method::Burkes => DiffusionMethod::Burkes,
            Method::Sierra1 => DiffusionMethod::Sierra1,
            Method::Sierra2 => DiffusionMethod::Sierra2,
            Method::Sierra3 => DiffusionMethod::Sierra3,
            Method::ADither => DiffusionMethod::ADither,
            Method::XDither => DiffusionMethod::XDither,
            Method::Lso2 => DiffusionMethod::Lso2,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Scan {
    Auto,
    Raster,
    Serpentine,
}

impl From<Scan> for ScanMode {
    fn from(s: Scan) -> Self {
        match s {
            Scan::Auto => ScanMode::Auto,
            Scan::Raster => ScanMode::Raster,
            Scan::Serpentine => ScanMode::Serpentine,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Carry {
    Auto,
    Disable,
    Enable,
}

impl From<Carry> for CarryMode {
    fn from(c: Carry) -> Self {
        match c {
            Carry::Auto => CarryMode::Auto,
            Carry::Disable => CarryMode::Disable,
            Carry::Enable => CarryMode::Enable,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Lut {
    Auto,
    None,
    Linear,
    Dense5Bit,
    Dense6Bit,
    Certlut,
}

impl From<Lut> for LutPolicy {
    fn from(l: Lut) -> Self {
        match l {
            Lut::Auto => LutPolicy::Auto,
            Lut::None => LutPolicy::None,
            Lut::Linear => LutPolicy::Linear,
            Lut::Dense5Bit => LutPolicy::Dense5Bit,
            Lut::Dense6Bit => LutPolicy::Dense6Bit,
            Lut::Certlut => LutPolicy::Certlut,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Pal {
    Auto,
    Rgb,
    Hls,
}

impl From<Pal> for PaletteType {
    fn from(p: Pal) -> Self {
        match p {
            Pal::Auto => PaletteType::Auto,
            Pal::Rgb => PaletteType::Rgb,
            Pal::Hls => PaletteType::Hls,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Policy {
    Auto,
    Fast,
    Size,
}

impl From<Policy> for EncodePolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Auto => EncodePolicy::Auto,
            Policy::Fast => EncodePolicy::Fast,
            Policy::Size => EncodePolicy::Size,
        }
    }
}

/// Build a palette of (about) `reqcolors` entries, spaced uniformly
/// across the RGB cube. This is deliberately not median-cut/k-means
/// (out of scope, spec §1) — just enough of a palette to run the core
/// end-to-end from the CLI.
fn uniform_box_palette(reqcolors: usize) -> anyhow::Result<Palette> {
    if reqcolors < 1 {
        anyhow::bail!("colors must be >= 1");
    }
    let side = (reqcolors as f64).cbrt().ceil().max(1.0) as usize;
    let mut entries = Vec::with_capacity(reqcolors * 3);
    'outer: for r in 0..side {
        for g in 0..side {
            for b in 0..side {
                if entries.len() / 3 >= reqcolors {
                    break 'outer;
                }
                let scale = |v: usize| -> u8 {
                    if side == 1 {
                        127
                    } else {
                        ((v * 255) / (side - 1)) as u8
                    }
                };
                entries.push(scale(r));
                entries.push(scale(g));
                entries.push(scale(b));
            }
        }
    }
    Ok(Palette::new(entries)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let img = image::open(&args.in_img)
        .with_context(|| format!("failed to decode input image {:?}", args.in_img))?
        .into_rgb8();
    let (width, height) = (img.width() as usize, img.height() as usize);
    let pixels = img.into_raw();

    let palette = uniform_box_palette(args.colors).context("failed to build palette")?;

    let options = DitherOptions {
        method: args.method.into(),
        scan_mode: args.scan.into(),
        carry_mode: args.carry.into(),
        lut_policy: args.lut.into(),
        optimize_palette: args.optimize_palette,
        band_height: args.band_height,
        overlap: args.overlap,
        threads: args.threads,
        prefer_float32: args.float32,
        ..DitherOptions::default()
    };

    let out = apply_palette(&pixels, width, height, PixelFormat::Rgb888, palette, &options)
        .inspect_err(|e| {
            if let Some(msg) = sixela::error::get_additional_message() {
                tracing::error!(%msg, error = %e, "additional diagnostic from dither core");
            }
        })
        .context("dithering failed")?;

    let mut buf = Vec::new();
    encode_image(
        &mut buf,
        &out.indices,
        width,
        height,
        &out.palette,
        args.bodyonly,
        args.palette_type.into(),
        args.encode_policy.into(),
    )
    .context("SIXEL encoding failed")?;

    match args.out_file {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(&path).with_context(|| format!("failed to create {path:?}"))?);
            writer.write_all(&buf)?;
        }
        None => {
            std::io::stdout().write_all(&buf)?;
        }
    }

    Ok(())
}
