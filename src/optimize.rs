//! Palette-optimize re-map (spec §4.F): after a dither pass has produced
//! an index buffer against the full palette, compact it down to only the
//! colours actually used, remapping both the index buffer and the
//! palette (byte and float mirrors in lockstep).

use crate::palette::Palette;

/// Build the `migration_map[256]` (spec §4.F): `migration[old] = new`, or
/// `None` for palette entries never referenced. New slots are assigned in
/// first-seen order while scanning `indices` (spec §4.F: "when a new
/// original appears... ncolors_out is incremented"), not by ascending
/// original index.
pub fn build_migration_map(indices: &[u8], ncolors: usize) -> (Vec<Option<u8>>, usize) {
    let mut migration = vec![None; ncolors];
    let mut next = 0u8;
    for &idx in indices {
        let idx = idx as usize;
        if idx < ncolors && migration[idx].is_none() {
            migration[idx] = Some(next);
            next += 1;
        }
    }
    (migration, next as usize)
}

/// Apply a migration map to an index buffer in place.
pub fn remap_indices(indices: &mut [u8], migration: &[Option<u8>]) {
    for idx in indices.iter_mut() {
        if let Some(new_idx) = migration[*idx as usize] {
            *idx = new_idx;
        }
    }
}

/// Build the compacted palette, carrying the float mirror and key-colour
/// index along (spec §4.F: "migration must apply in lockstep").
pub fn remap_palette(palette: &Palette, migration: &[Option<u8>], used_count: usize) -> Palette {
    let mut entries = vec![0u8; used_count * 3];
    let mut entries_float = palette.entries_float.as_ref().map(|_| vec![0f32; used_count * 3]);
    let mut keycolor = None;
    for (old, slot) in migration.iter().enumerate() {
        let Some(new_idx) = slot else { continue };
        let new_idx = *new_idx as usize;
        let rgb = palette.rgb(old);
        entries[new_idx * 3..new_idx * 3 + 3].copy_from_slice(&rgb);
        if let (Some(dst), Some(src)) = (entries_float.as_mut(), palette.rgb_float(old)) {
            dst[new_idx * 3..new_idx * 3 + 3].copy_from_slice(&src);
        }
        if palette.keycolor == Some(old) {
            keycolor = Some(new_idx);
        }
    }
    let mut remapped = Palette { entries, entries_float, ncolors: used_count, keycolor };
    remapped.set_keycolor(keycolor);
    remapped
}
