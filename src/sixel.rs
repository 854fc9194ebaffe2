//! SIXEL node builder and bitstream emitter (spec §4.H): bit-packs each
//! 6-row band per palette entry, extracts maximal runs (tolerating short
//! zero gaps), and drives [`crate::output::SixelOutput`] to RLE-compress
//! the runs into the wire format.

use crate::error::SixelResult;
use crate::output::{EncodePolicy, PaletteType, SixelOutput};
use crate::palette::Palette;
use std::io::Write;

/// Maximum zero-byte gap a run may absorb before splitting (spec §4.H
/// step 2: "up to 10 zero bytes and not hitting the band edge").
const MAX_ZERO_GAP: usize = 10;

/// A per-6-row segment for one palette entry (spec §3).
#[derive(Debug, Clone)]
pub struct SixelNode {
    pub pal: i32,
    pub start_x: i32,
    pub end_x: i32,
    pub map: Vec<u8>,
}

/// Pack one 6-row band into per-palette-entry bit maps (spec §4.H step 1):
/// `bits[x]` has bit `i` set iff row `y0+i` carries palette index `p` at
/// column `x`, excluding the key-colour background.
fn pack_band_bits(indices: &[u8], width: usize, y0: usize, rows: usize, ncolors: usize, keycolor: Option<usize>) -> Vec<Vec<u8>> {
    let mut maps = vec![vec![0u8; width]; ncolors];
    for i in 0..rows {
        let row = &indices[(y0 + i) * width..(y0 + i) * width + width];
        for (x, &idx) in row.iter().enumerate() {
            let idx = idx as usize;
            if idx < ncolors && Some(idx) != keycolor {
                maps[idx][x] |= 1 << i;
            }
        }
    }
    maps
}

/// Extract maximal runs from one palette entry's bit map (spec §4.H step
/// 2), absorbing zero gaps up to [`MAX_ZERO_GAP`] that don't reach the
/// band edge.
fn build_runs(pal: usize, map: &[u8], width: usize) -> Vec<SixelNode> {
    let mut nodes = Vec::new();
    let mut sx = 0usize;
    while sx < width {
        if map[sx] == 0 {
            sx += 1;
            continue;
        }
        let mut mx = sx + 1;
        loop {
            while mx < width && map[mx] != 0 {
                mx += 1;
            }
            if mx >= width {
                break;
            }
            let mut n = 0;
            while mx + n < width && map[mx + n] == 0 {
                n += 1;
            }
            if n >= MAX_ZERO_GAP || mx + n >= width {
                break;
            }
            mx += n;
        }
        nodes.push(SixelNode { pal: pal as i32, start_x: sx as i32, end_x: mx as i32, map: map.to_vec() });
        sx = mx;
    }
    nodes
}

/// Sort the run-list by ascending `start_x`, descending `end_x` on ties
/// (spec §3 "SIXEL node").
fn sort_runs(nodes: &mut [SixelNode]) {
    nodes.sort_by(|a, b| a.start_x.cmp(&b.start_x).then(b.end_x.cmp(&a.end_x)));
}

/// Encode a full indexed image as a SIXEL bitstream (spec §4.H, §6).
///
/// `indices` is row-major, one palette index per pixel. `bodyonly` skips
/// the DCS introducer, palette definitions, and terminator (emitting only
/// the pixel body — used when the caller pre-wrapped the stream itself).
#[allow(clippy::too_many_arguments)]
pub fn encode_image<W: Write>(
    writer: W,
    indices: &[u8],
    width: usize,
    height: usize,
    palette: &Palette,
    bodyonly: bool,
    palette_type: PaletteType,
    encode_policy: EncodePolicy,
) -> SixelResult<()> {
    let mut out = SixelOutput::new(writer);
    out.palette_type = palette_type.resolved();
    out.encode_policy = encode_policy.resolved();

    if !bodyonly {
        out.encode_header(width as i32, height as i32, 1, 1);
        if palette.ncolors != 2 || palette.keycolor.is_none() {
            for n in 0..palette.ncolors {
                match out.palette_type {
                    PaletteType::Hls => out.output_hls_palette_definition(&palette.entries, n, palette.keycolor),
                    _ => out.output_rgb_palette_definition(&palette.entries, n, palette.keycolor),
                }
            }
        }
    }

    let fillable_policy = out.encode_policy == EncodePolicy::Size;
    let mut y0 = 0usize;
    while y0 < height {
        let rows = (height - y0).min(6);
        let maps = pack_band_bits(indices, width, y0, rows, palette.ncolors, palette.keycolor);

        let mut runs: Vec<SixelNode> = Vec::new();
        for (pal, map) in maps.iter().enumerate() {
            runs.extend(build_runs(pal, map, width));
        }
        sort_runs(&mut runs);

        if fillable_policy {
            // EncodePolicy::Size (spec SPEC_FULL.md §4, `sixel_encode_body`
            // "fillable" logic): pad each run's tail bits up to the last
            // active row's mask so that short runs compress as a single
            // repeated byte instead of several distinct ones.
            let fill_mask = (1u16 << rows) - 1;
            for node in &mut runs {
                for b in &mut node.map[node.start_x as usize..node.end_x as usize] {
                    *b = fill_mask as u8;
                }
            }
        }

        *out.active_palette_mut() = -1;
        let mut cursor = 0i32;
        for node in &runs {
            if cursor > node.start_x {
                out.put_carriage_return();
                cursor = 0;
            }
            out.put_node(&mut cursor, node, palette.ncolors, palette.keycolor);
        }

        y0 += rows;
        if y0 < height {
            out.put_next_line();
        }
    }

    if !bodyonly {
        out.encode_footer()?;
    } else {
        out.flush_body()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Palette;

    fn red_palette() -> Palette {
        Palette::new(vec![255, 0, 0]).unwrap()
    }

    /// Seed scenario S6: 6x6 all-red image.
    #[test]
    fn s6_emission_is_bit_exact() {
        let palette = red_palette();
        let indices = vec![0u8; 36];
        let mut buf = Vec::new();
        encode_image(&mut buf, &indices, 6, 6, &palette, false, PaletteType::Auto, EncodePolicy::Auto).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("\x1BPq\"1;1;6;6\n#0;2;100;0;0"));
        assert!(text.contains("!6~"));
        assert!(text.ends_with("\x1B\\"));
    }

    #[test]
    fn run_builder_absorbs_small_zero_gaps() {
        let mut map = vec![1u8; 20];
        map[10] = 0;
        let runs = build_runs(0, &map, 20);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].start_x, 0);
        assert_eq!(runs[0].end_x, 20);
    }

    #[test]
    fn run_builder_splits_on_long_zero_gap() {
        let mut map = vec![1u8; 20];
        for b in &mut map[5..16] {
            *b = 0;
        }
        let runs = build_runs(0, &map, 20);
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn runs_sorted_ascending_start_descending_end() {
        let mut nodes = vec![
            SixelNode { pal: 0, start_x: 2, end_x: 5, map: vec![] },
            SixelNode { pal: 1, start_x: 0, end_x: 10, map: vec![] },
            SixelNode { pal: 2, start_x: 0, end_x: 4, map: vec![] },
        ];
        sort_runs(&mut nodes);
        assert_eq!((nodes[0].start_x, nodes[0].end_x), (0, 10));
        assert_eq!((nodes[1].start_x, nodes[1].end_x), (0, 4));
        assert_eq!((nodes[2].start_x, nodes[2].end_x), (2, 5));
    }

    #[test]
    fn rle_packs_runs_over_three_as_bang_count() {
        let palette = red_palette();
        let indices = vec![0u8; 4 * 6]; // 4 columns all lit -> run of 4 '~' bytes
        let mut buf = Vec::new();
        encode_image(&mut buf, &indices, 4, 6, &palette, true, PaletteType::Auto, EncodePolicy::Auto).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("!4~"));
    }

    #[test]
    fn short_runs_are_emitted_literally() {
        let palette = red_palette();
        let indices = vec![0u8; 3 * 6];
        let mut buf = Vec::new();
        encode_image(&mut buf, &indices, 3, 6, &palette, true, PaletteType::Auto, EncodePolicy::Auto).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains('!'));
        assert!(text.contains("~~~"));
    }
}
