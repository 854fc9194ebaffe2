//! Output context (spec §3, §6, §9): the RLE byte sink the SIXEL node
//! builder writes through. The C original passed three function-pointer
//! hooks (`putchar`/`puts`/`printf`) with captured state; per spec §9 we
//! collapse that into a single byte sink (any `std::io::Write`) and do all
//! formatting before calling it, owning the run-length state
//! `(save_pixel, save_count)` as a value on the context rather than in
//! globals (spec §9 "global RLE state").

use std::io::Write;

use crate::error::{SixelError, SixelResult};

const DCS_START_7BIT: &str = "\x1BP";
const DCS_START_8BIT: &str = "\u{0090}";
const DCS_END_7BIT: &str = "\x1B\\";
const DCS_END_8BIT: &str = "\u{009C}";

/// GNU Screen multiplexer packet size (spec §4.I design notes, `tosixel.c`).
const SCREEN_PACKET_SIZE: usize = 256;
/// Packetization threshold for the plain (non-penetrate) buffered writer.
const PACKET_SIZE: usize = 16_384;

/// Palette definition emission mode (spec §6 `PaletteType`; RGB is the
/// case spec §4.H works through in detail, HLS is supplemented from
/// `tosixel.c`'s `output_hls_palette_definition`, spec §SPEC_FULL.md §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteType {
    Auto,
    Rgb,
    Hls,
}

impl PaletteType {
    /// `AUTO` resolves to `RGB`, the format spec §4.H's wire format names.
    pub fn resolved(self) -> PaletteType {
        match self {
            PaletteType::Auto => PaletteType::Rgb,
            other => other,
        }
    }
}

/// Run-fill policy for the body encoder (spec §6 `EncodePolicy`;
/// `Size`'s "fillable" behaviour is supplemented from `sixel_encode_body`,
/// SPEC_FULL.md §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePolicy {
    Auto,
    Fast,
    Size,
}

impl EncodePolicy {
    pub fn resolved(self) -> EncodePolicy {
        match self {
            EncodePolicy::Auto => EncodePolicy::Fast,
            other => other,
        }
    }
}

/// Owns the in-progress SIXEL bitstream state for one encode call (spec
/// §3 "output context... the emitter owns the in-progress run-length
/// state").
pub struct SixelOutput<W: Write> {
    writer: W,
    buffer: String,

    pub palette_type: PaletteType,
    pub encode_policy: EncodePolicy,

    save_pixel: u8,
    save_count: i32,
    active_palette: i32,

    has_8bit_control: bool,
    has_gri_arg_limit: bool,
    skip_dcs_envelope: bool,
    penetrate_multiplexer: bool,
}

impl<W: Write> SixelOutput<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: String::new(),
            palette_type: PaletteType::Auto,
            encode_policy: EncodePolicy::Auto,
            save_pixel: 0,
            save_count: 0,
            active_palette: -1,
            has_8bit_control: false,
            has_gri_arg_limit: true,
            skip_dcs_envelope: false,
            penetrate_multiplexer: false,
        }
    }

    pub fn set_8bit_control(&mut self, enabled: bool) {
        self.has_8bit_control = enabled;
    }

    pub fn set_gri_arg_limit(&mut self, enabled: bool) {
        self.has_gri_arg_limit = enabled;
    }

    pub fn set_skip_dcs_envelope(&mut self, skip: bool) {
        self.skip_dcs_envelope = skip;
    }

    pub fn set_penetrate_multiplexer(&mut self, enabled: bool) {
        self.penetrate_multiplexer = enabled;
    }

    fn putc(&mut self, c: char) {
        self.buffer.push(c);
        self.advance();
    }

    fn puts(&mut self, s: &str) {
        self.buffer.push_str(s);
        self.advance();
    }

    fn puti(&mut self, v: i32) {
        self.puts(&v.to_string());
    }

    /// Split buffered output into DCS-wrapped packets for GNU Screen
    /// (spec SPEC_FULL.md §4 "penetrate packetization").
    fn penetrate(&mut self, nwrite: usize) -> SixelResult<()> {
        let splitsize = SCREEN_PACKET_SIZE - DCS_START_7BIT.len() - DCS_END_7BIT.len();
        let mut pos = 0;
        while pos < nwrite {
            let end = (pos + splitsize).min(self.buffer.len());
            self.write_raw(DCS_START_7BIT.as_bytes())?;
            self.write_raw(self.buffer.as_bytes()[pos..end].to_vec().as_slice())?;
            self.write_raw(DCS_END_7BIT.as_bytes())?;
            pos += splitsize;
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> SixelResult<()> {
        self.writer.write_all(bytes).map_err(|e| SixelError::RuntimeError(e.to_string()))
    }

    /// Flush the buffer once it exceeds the packet threshold, via
    /// `penetrate` when GNU Screen multiplexing is enabled.
    fn advance(&mut self) {
        if self.buffer.len() < PACKET_SIZE {
            return;
        }
        let result = if self.penetrate_multiplexer {
            self.penetrate(PACKET_SIZE)
        } else {
            let head = self.buffer.as_bytes()[..PACKET_SIZE].to_vec();
            self.write_raw(&head)
        };
        // Buffer-flush failures abort emission (spec §7); the error is
        // surfaced by the next fallible call since `advance` itself is
        // called from infallible buffering helpers.
        if result.is_err() {
            self.buffer.clear();
            return;
        }
        self.buffer.drain(0..PACKET_SIZE);
    }

    /// Flush the pending run (spec §4.H step 4): `!<count><byte>` for
    /// `count > 3`, the literal byte repeated otherwise. A per-terminal
    /// guard caps DECGRI's argument at 255 when `has_gri_arg_limit`.
    fn put_flash(&mut self) {
        if self.has_gri_arg_limit {
            while self.save_count > 255 {
                self.puts("!255");
                self.putc(self.save_pixel as char);
                self.save_count -= 255;
            }
        }
        if self.save_count > 3 {
            self.putc('!');
            self.puti(self.save_count);
            self.putc(self.save_pixel as char);
        } else {
            for _ in 0..self.save_count {
                self.putc(self.save_pixel as char);
            }
        }
        self.save_pixel = 0;
        self.save_count = 0;
    }

    /// Queue one sixel byte (spec §4.H step 4): `0x3F + value`.
    fn put_pixel(&mut self, value: u8) {
        let pix = 0x3F + (value & 0x3F);
        if pix == self.save_pixel {
            self.save_count += 1;
        } else {
            self.put_flash();
            self.save_pixel = pix;
            self.save_count = 1;
        }
    }

    /// Write one node's columns (spec §4.H step 3): zero-bit fill up to
    /// `node.start_x`, then the packed map bytes through `node.end_x`.
    pub(crate) fn put_node(&mut self, cursor: &mut i32, node: &super::sixel::SixelNode, ncolors: usize, keycolor: Option<usize>) {
        if (ncolors != 2 || keycolor.is_none())
            && self.active_palette != node.pal {
                self.putc('#');
                self.puti(node.pal);
                self.active_palette = node.pal;
            }
        while *cursor < node.start_x {
            if Some(*cursor as usize) != keycolor {
                self.put_pixel(0);
            }
            *cursor += 1;
        }
        while *cursor < node.end_x {
            if Some(*cursor as usize) != keycolor {
                self.put_pixel(node.map[*cursor as usize]);
            }
            *cursor += 1;
        }
        self.put_flash();
    }

    /// DCS introducer (spec §4.H, §6): `ESC P ; ; q "Pan;Pad;W;H`.
    pub fn encode_header(&mut self, width: i32, height: i32, aspect_num: i32, aspect_den: i32) {
        if !self.skip_dcs_envelope {
            self.puts(if self.has_8bit_control { DCS_START_8BIT } else { DCS_START_7BIT });
        }
        self.putc('q');
        self.puts("\"");
        self.puti(aspect_num);
        self.putc(';');
        self.puti(aspect_den);
        self.putc(';');
        self.puti(width);
        self.putc(';');
        self.puti(height);
        self.putc('\n');
    }

    /// `#<n>;2;<r>;<g>;<b>` (spec §4.H/§6): `round(channel * 100 / 255)`.
    pub fn output_rgb_palette_definition(&mut self, palette: &[u8], n: usize, keycolor: Option<usize>) {
        if keycolor == Some(n) {
            return;
        }
        let pct = |v: u8| (i32::from(v) * 100 + 127) / 255;
        self.putc('#');
        self.puti(n as i32);
        self.puts(";2;");
        self.puti(pct(palette[n * 3]));
        self.putc(';');
        self.puti(pct(palette[n * 3 + 1]));
        self.putc(';');
        self.puti(pct(palette[n * 3 + 2]));
    }

    /// `#<n>;1;<h>;<l>;<s>`, supplemented from `output_hls_palette_definition`
    /// (SPEC_FULL.md §4) for `PaletteType::Hls`.
    pub fn output_hls_palette_definition(&mut self, palette: &[u8], n: usize, keycolor: Option<usize>) {
        if keycolor == Some(n) {
            return;
        }
        let (r, g, b) = (i32::from(palette[n * 3]), i32::from(palette[n * 3 + 1]), i32::from(palette[n * 3 + 2]));
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = ((max + min) * 100 + 255) / 510;
        let (mut h, mut s) = (0, 0);
        if max != min {
            s = if l < 50 { (max - min) * 100 / (max + min) } else { (max - min) * 100 / ((255 - max) + (255 - min)) };
            h = if r == max {
                120 + (g - b) * 60 / (max - min)
            } else if g == max {
                240 + (b - r) * 60 / (max - min)
            } else if r < g {
                360 + (r - g) * 60 / (max - min)
            } else {
                (r - g) * 60 / (max - min)
            };
        }
        self.putc('#');
        self.puti(n as i32);
        self.puts(";1;");
        self.puti(h);
        self.putc(';');
        self.puti(l);
        self.putc(';');
        self.puti(s);
    }

    /// `$` + newline (spec §4.H step 3: carriage return to column 0).
    pub fn put_carriage_return(&mut self) {
        self.putc('$');
        self.putc('\n');
    }

    /// `-` + newline (spec §4.H step 5: DECGNL graphics next line).
    pub fn put_next_line(&mut self) {
        self.putc('-');
        self.putc('\n');
    }

    /// Terminator (spec §4.H, §6): `ESC \`, flushing remaining buffer.
    pub fn encode_footer(&mut self) -> SixelResult<()> {
        if !self.skip_dcs_envelope && !self.penetrate_multiplexer {
            self.puts(if self.has_8bit_control { DCS_END_8BIT } else { DCS_END_7BIT });
        }
        if !self.buffer.is_empty() {
            if self.penetrate_multiplexer {
                self.penetrate(self.buffer.len())?;
                self.write_raw(DCS_END_7BIT.as_bytes())?;
            } else {
                let rest = std::mem::take(&mut self.buffer);
                self.write_raw(rest.as_bytes())?;
            }
        }
        self.writer.flush().map_err(|e| SixelError::RuntimeError(e.to_string()))
    }

    /// Flush the buffered body without the DCS terminator (spec §4.H
    /// wrapper: "unless the caller requested body-only output").
    pub fn flush_body(&mut self) -> SixelResult<()> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.write_raw(rest.as_bytes())?;
        }
        self.writer.flush().map_err(|e| SixelError::RuntimeError(e.to_string()))
    }

    pub(crate) fn active_palette_mut(&mut self) -> &mut i32 {
        &mut self.active_palette
    }
}
