//! # sixela
//!
//! A quantize/dither/SIXEL-emission core: given already-quantized RGB
//! pixels and a palette, resolves each pixel to a palette index with
//! error-diffusion (or positional) dithering, optionally across a
//! parallel band scheduler, and renders the result as a SIXEL DCS
//! bitstream.
//!
//! Building the palette itself (median-cut, k-means, ...) and decoding
//! the source image are the caller's job; see the `sixela` binary for a
//! minimal example of both.
//!
//! ## Example
//!
//! ```no_run
//! use sixela::palette::Palette;
//! use sixela::pipeline::{apply_palette, DitherOptions};
//! use sixela::pixelformat::PixelFormat;
//! use sixela::sixel::encode_image;
//! use sixela::output::{EncodePolicy, PaletteType};
//!
//! let pixels = vec![0u8, 0, 0, 255, 255, 255];
//! let palette = Palette::new(vec![0, 0, 0, 255, 255, 255]).unwrap();
//! let out = apply_palette(&pixels, 2, 1, PixelFormat::Rgb888, palette, &DitherOptions::default()).unwrap();
//!
//! let mut sixel_bytes = Vec::new();
//! encode_image(&mut sixel_bytes, &out.indices, 2, 1, &out.palette, false, PaletteType::Auto, EncodePolicy::Auto).unwrap();
//! ```

pub mod band;
pub mod carry;
pub mod error;
pub mod kernel;
pub mod lut;
pub mod optimize;
pub mod output;
pub mod palette;
pub mod pipeline;
pub mod pixelformat;
pub mod scan;
pub mod scheduler;
pub mod sixel;
