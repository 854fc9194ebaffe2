//! Palette LUT accelerator (spec §4.A): resolves one pixel to a palette
//! index under a selected policy, trading warm-up cost for O(1) lookups.

use crate::error::{SixelError, SixelResult};
use crate::palette::Palette;

/// Policies selectable by the CLI/API (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutPolicy {
    Auto,
    None,
    Linear,
    Dense5Bit,
    Dense6Bit,
    Certlut,
}

/// Per-channel weights plus the "complexion" skin-tone bias folded into
/// red (spec §3 glossary, §4.A).
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub complexion: i32,
    pub w_r: f32,
    pub w_g: f32,
    pub w_b: f32,
}

impl Default for Weights {
    fn default() -> Self {
        Self { complexion: 1, w_r: 1.0, w_g: 1.0, w_b: 1.0 }
    }
}

#[inline]
fn squared_distance(p: [u8; 3], q: [u8; 3], weights: Weights) -> i64 {
    let dr = i64::from(p[0]) - i64::from(q[0]);
    let dg = i64::from(p[1]) - i64::from(q[1]);
    let db = i64::from(p[2]) - i64::from(q[2]);
    i64::from(weights.complexion) * dr * dr + dg * dg + db * db
}

#[inline]
fn squared_distance_float(p: [f32; 3], q: [f32; 3], weights: Weights) -> f32 {
    let dr = p[0] - q[0];
    let dg = p[1] - q[1];
    let db = p[2] - q[2];
    weights.complexion as f32 * dr * dr + dg * dg + db * db
}

/// Exhaustive nearest-colour scan over the palette's float mirror (used
/// by the float band worker; spec §4.E "float-palette lookup when both
/// buffers carry float precision").
pub fn nearest_linear_float(pixel: [f32; 3], palette: &Palette, weights: Weights) -> usize {
    let mut best = 0usize;
    let mut best_dist = f32::MAX;
    for i in 0..palette.ncolors {
        let Some(entry) = palette.rgb_float(i) else { break };
        let dist = squared_distance_float(pixel, entry, weights);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// Exhaustive nearest-colour scan (spec §3: "linear — no acceleration").
/// Ties broken by the lowest index (`<` comparator, spec §4.A).
pub fn nearest_linear(pixel: [u8; 3], palette: &Palette, weights: Weights) -> usize {
    let mut best = 0usize;
    let mut best_dist = i64::MAX;
    for i in 0..palette.ncolors {
        let dist = squared_distance(pixel, palette.rgb(i), weights);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}

/// A dense pack/lookup table indexed by packed `bits`-per-channel RGB
/// (spec §4.A "dense5bit"/"dense6bit").
#[derive(Clone)]
pub(crate) struct DenseTable {
    bits: u32,
    table: Vec<i32>, // -1 sentinel = unresolved
}

impl DenseTable {
    fn new(bits: u32) -> Self {
        let size = 1usize << (3 * bits);
        Self { bits, table: vec![-1; size] }
    }

    #[inline]
    fn pack(&self, pixel: [u8; 3]) -> usize {
        let shift = 8 - self.bits;
        let round = if shift > 0 { 1u32 << (shift - 1) } else { 0 };
        let mask = (1u32 << self.bits) - 1;
        let reduce = |v: u8| -> u32 { ((u32::from(v) + round) >> shift).min(mask) };
        let r = reduce(pixel[0]);
        let g = reduce(pixel[1]);
        let b = reduce(pixel[2]);
        ((r << (2 * self.bits)) | (g << self.bits) | b) as usize
    }
}

/// A minimal k-d tree over palette entries, used by the certlut builder
/// to answer nearest/second-nearest queries (spec §4.A).
#[derive(Clone)]
struct KdNode {
    index: usize,
    axis: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

#[derive(Clone)]
struct KdTree {
    root: Option<Box<KdNode>>,
}

impl KdTree {
    fn build(palette: &Palette) -> Self {
        let mut items: Vec<usize> = (0..palette.ncolors).collect();
        let root = Self::build_node(palette, &mut items, 0);
        Self { root }
    }

    fn build_node(palette: &Palette, items: &mut [usize], depth: usize) -> Option<Box<KdNode>> {
        if items.is_empty() {
            return None;
        }
        let axis = depth % 3;
        items.sort_by_key(|&i| palette.rgb(i)[axis]);
        let mid = items.len() / 2;
        let index = items[mid];
        let (left_items, rest) = items.split_at_mut(mid);
        let right_items = &mut rest[1..];
        Some(Box::new(KdNode {
            index,
            axis,
            left: Self::build_node(palette, left_items, depth + 1),
            right: Self::build_node(palette, right_items, depth + 1),
        }))
    }

    /// Best and second-best palette index for `center`, by weighted
    /// squared distance.
    fn nearest_two(&self, center: [u8; 3], palette: &Palette, weights: Weights) -> (usize, i64, usize, i64) {
        let mut best = (usize::MAX, i64::MAX);
        let mut second = (usize::MAX, i64::MAX);
        Self::visit(&self.root, center, palette, weights, &mut best, &mut second);
        (best.0, best.1, second.0, second.1)
    }

    fn visit(
        node: &Option<Box<KdNode>>,
        center: [u8; 3],
        palette: &Palette,
        weights: Weights,
        best: &mut (usize, i64),
        second: &mut (usize, i64),
    ) {
        let Some(n) = node else { return };
        let dist = squared_distance(center, palette.rgb(n.index), weights);
        if dist < best.1 {
            *second = *best;
            *best = (n.index, dist);
        } else if dist < second.1 && n.index != best.0 {
            *second = (n.index, dist);
        }
        let axis_val = i64::from(palette.rgb(n.index)[n.axis]);
        let center_val = i64::from(center[n.axis]);
        let (near, far) = if center_val < axis_val { (&n.left, &n.right) } else { (&n.right, &n.left) };
        Self::visit(near, center, palette, weights, best, second);
        let axis_dist = (center_val - axis_val).pow(2);
        if axis_dist < second.1 {
            Self::visit(far, center, palette, weights, best, second);
        }
    }
}

/// Lazily-built octree cell (spec §4.A "certlut"). Rust's ownership
/// model (a boxed recursive tree) replaces the pool-offset dance the
/// original pointer-based implementation needed to survive reallocation
/// (spec §9): there is nothing to invalidate here.
#[derive(Clone)]
enum CertNode {
    Leaf(usize),
    Branch(Box<[Option<Box<CertNode>>; 8]>),
}

#[derive(Clone)]
pub(crate) struct CertLut {
    kdtree: KdTree,
    grid: Vec<Option<Box<CertNode>>>,
    grid_dim: i32,
    cell_size: i32,
}

impl CertLut {
    const GRID_DIM: i32 = 64;
    const CELL_SIZE: i32 = 256 / Self::GRID_DIM;

    fn new(palette: &Palette) -> Self {
        let kdtree = KdTree::build(palette);
        let n = (Self::GRID_DIM as usize).pow(3);
        Self { kdtree, grid: (0..n).map(|_| None).collect(), grid_dim: Self::GRID_DIM, cell_size: Self::CELL_SIZE }
    }

    fn build_node(&self, palette: &Palette, weights: Weights, rmin: i32, gmin: i32, bmin: i32, size: i32) -> CertNode {
        let center = [
            (rmin + size / 2).clamp(0, 255) as u8,
            (gmin + size / 2).clamp(0, 255) as u8,
            (bmin + size / 2).clamp(0, 255) as u8,
        ];
        let (best, best_dist, second, second_dist) = self.kdtree.nearest_two(center, palette, weights);
        if size <= 1 || second_dist == i64::MAX {
            return CertNode::Leaf(best);
        }
        // Safe to stop subdividing only if every point in this cell is still
        // closer to `best` than to `second`: the center-based margin must
        // cover the worst-case swing of the quadratic form across the cell,
        // which is `size * sum(weight_i * |second_i - best_i|)` (derived from
        // expanding the weighted squared distance around `center`).
        let b = palette.rgb(best);
        let s = palette.rgb(second);
        let dr = (i64::from(s[0]) - i64::from(b[0])).abs();
        let dg = (i64::from(s[1]) - i64::from(b[1])).abs();
        let db = (i64::from(s[2]) - i64::from(b[2])).abs();
        let bound = i64::from(size) * (i64::from(weights.complexion) * dr + dg + db);
        if second_dist - best_dist > bound {
            CertNode::Leaf(best)
        } else {
            CertNode::Branch(Box::new([None, None, None, None, None, None, None, None]))
        }
    }

    fn lookup(&mut self, palette: &Palette, weights: Weights, pixel: [u8; 3]) -> usize {
        let (r, g, b) = (i32::from(pixel[0]), i32::from(pixel[1]), i32::from(pixel[2]));
        let gx = (r / self.cell_size).min(self.grid_dim - 1);
        let gy = (g / self.cell_size).min(self.grid_dim - 1);
        let gz = (b / self.cell_size).min(self.grid_dim - 1);
        let idx = ((gx * self.grid_dim + gy) * self.grid_dim + gz) as usize;
        let size = self.cell_size;
        let (rmin, gmin, bmin) = (gx * size, gy * size, bz_min(gz, size));
        if self.grid[idx].is_none() {
            self.grid[idx] = Some(Box::new(self.build_node(palette, weights, rmin, gmin, bmin, size)));
        }
        self.descend(palette, weights, idx, rmin, gmin, bmin, size, r, g, b)
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &mut self,
        palette: &Palette,
        weights: Weights,
        grid_idx: usize,
        rmin: i32,
        gmin: i32,
        bmin: i32,
        size: i32,
        r: i32,
        g: i32,
        b: i32,
    ) -> usize {
        // Work on an owned path of (parent, child index) coordinates since we
        // must mutate lazily while descending; recursion through `self` would
        // double-borrow, so resolve iteratively using raw indices into the
        // child arrays of the grid root.
        let node = self.grid[grid_idx].take().expect("grid cell just built");
        let (result, node) = Self::descend_node(self, palette, weights, node, rmin, gmin, bmin, size, r, g, b);
        self.grid[grid_idx] = Some(node);
        result
    }

    #[allow(clippy::too_many_arguments, clippy::boxed_local)]
    fn descend_node(
        lut: &Self,
        palette: &Palette,
        weights: Weights,
        node: Box<CertNode>,
        rmin: i32,
        gmin: i32,
        bmin: i32,
        size: i32,
        r: i32,
        g: i32,
        b: i32,
    ) -> (usize, Box<CertNode>) {
        match *node {
            CertNode::Leaf(index) => (index, Box::new(CertNode::Leaf(index))),
            CertNode::Branch(mut children) => {
                let half = size / 2;
                let oct = ((if r >= rmin + half { 1 } else { 0 }) << 2)
                    | ((if g >= gmin + half { 1 } else { 0 }) << 1)
                    | (if b >= bmin + half { 1 } else { 0 });
                let (crmin, cgmin, cbmin) = (
                    rmin + if oct & 4 != 0 { half } else { 0 },
                    gmin + if oct & 2 != 0 { half } else { 0 },
                    bmin + if oct & 1 != 0 { half } else { 0 },
                );
                let child = children[oct].take().unwrap_or_else(|| {
                    Box::new(lut.build_node(palette, weights, crmin, cgmin, cbmin, half.max(1)))
                });
                let (result, child) =
                    Self::descend_node(lut, palette, weights, child, crmin, cgmin, cbmin, half.max(1), r, g, b);
                children[oct] = Some(child);
                (result, Box::new(CertNode::Branch(children)))
            }
        }
    }
}

#[inline]
fn bz_min(gz: i32, cell_size: i32) -> i32 {
    gz * cell_size
}

/// The configured accelerator for one `(palette, policy, weights)`
/// triple (spec §3 lifecycle: memoised and released with the dither
/// handle). The `Dense`/`Cert` payload types stay crate-private; outside
/// callers select a policy via [`LutPolicy`] and never need to name them.
#[derive(Clone)]
#[allow(private_interfaces)]
pub enum PaletteLut {
    Linear,
    Dense(DenseTable),
    Cert(Box<CertLut>),
}

impl PaletteLut {
    /// `configure` (spec §4.A). Fails with `BadArgument` when `depth != 3`
    /// under a dense/certlut policy.
    pub fn configure(palette: &Palette, depth: usize, policy: LutPolicy) -> SixelResult<Self> {
        match policy {
            LutPolicy::None | LutPolicy::Linear | LutPolicy::Auto => Ok(PaletteLut::Linear),
            LutPolicy::Dense5Bit => {
                if depth != 3 {
                    return Err(SixelError::BadArgument("dense5bit requires depth == 3".into()));
                }
                Ok(PaletteLut::Dense(DenseTable::new(5)))
            }
            LutPolicy::Dense6Bit => {
                if depth != 3 {
                    return Err(SixelError::BadArgument("dense6bit requires depth == 3".into()));
                }
                Ok(PaletteLut::Dense(DenseTable::new(6)))
            }
            LutPolicy::Certlut => {
                if depth != 3 {
                    return Err(SixelError::BadArgument("certlut requires depth == 3".into()));
                }
                Ok(PaletteLut::Cert(Box::new(CertLut::new(palette))))
            }
        }
    }

    /// `map_pixel` (spec §4.A): total on any pixel, O(1) amortised for
    /// dense/certlut after warm-up.
    pub fn map_pixel(&mut self, palette: &Palette, weights: Weights, pixel: [u8; 3]) -> usize {
        match self {
            PaletteLut::Linear => nearest_linear(pixel, palette, weights),
            PaletteLut::Dense(table) => {
                let key = table.pack(pixel);
                let hit = table.table[key];
                if hit >= 0 {
                    return hit as usize;
                }
                let resolved = nearest_linear(pixel, palette, weights);
                table.table[key] = resolved as i32;
                resolved
            }
            PaletteLut::Cert(cert) => cert.lookup(palette, weights, pixel),
        }
    }

    /// True when this accelerator lazily mutates shared state on lookup
    /// (spec §5: callers must serialize warm-up before parallel dispatch).
    pub fn is_certlut(&self) -> bool {
        matches!(self, PaletteLut::Cert(_))
    }

    /// Pre-warm a certlut by running lookups serially before handing the
    /// accelerator to parallel band workers (spec §5: lazy subtree
    /// creation in certlut must stay single-threaded).
    pub fn warm_up(&mut self, palette: &Palette, weights: Weights, pixels: impl IntoIterator<Item = [u8; 3]>) {
        for p in pixels {
            self.map_pixel(palette, weights, p);
        }
    }
}
