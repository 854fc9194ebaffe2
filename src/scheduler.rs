//! Parallel band scheduler (spec §4.G): splits the image into overlapping
//! six-row-multiple bands and dispatches them across a bounded worker
//! pool, so dither state still propagates correctly across seams.

use rayon::prelude::*;
use tracing::debug;

use crate::band::{run_band_bytes, BandConfig, DEPTH};
use crate::carry::{CarryBuffers, CarryMode};
use crate::error::{SixelError, SixelResult};
use crate::kernel::Lso2Row;
use crate::lut::PaletteLut;
use crate::palette::Palette;

/// Scheduling parameters (spec §4.G): `band_height` is rounded up to a
/// multiple of 6; `overlap` clamped to `band_height / 2`.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleParams {
    pub band_height: usize,
    pub overlap: usize,
    pub threads: usize,
}

impl ScheduleParams {
    pub fn resolved(self, height: usize) -> Self {
        let band_height = round_up6(self.band_height.max(6)).min(round_up6(height.max(1)));
        let overlap = self.overlap.min(band_height / 2);
        ScheduleParams { band_height, overlap, threads: self.threads.max(1) }
    }
}

fn round_up6(v: usize) -> usize {
    v.div_ceil(6) * 6
}

/// One dispatched unit of work: `[y0, y1)` is the committed output range;
/// `in_lo` extends backward by `overlap` to warm up diffusion state.
#[derive(Debug, Clone, Copy)]
struct Band {
    in_lo: usize,
    y0: usize,
    y1: usize,
}

fn plan_bands(height: usize, params: ScheduleParams) -> Vec<Band> {
    let mut bands = Vec::new();
    let mut y0 = 0;
    while y0 < height {
        let y1 = (y0 + params.band_height).min(height);
        let in_lo = y0.saturating_sub(params.overlap);
        bands.push(Band { in_lo, y0, y1 });
        y0 = y1;
    }
    bands
}

/// Build the "stride interleaved" dispatch order (spec §4.G): spreads
/// initial work across the image so workers don't contend over the first
/// rows and follow-up bands land near each worker's previous one.
fn stride_interleaved_order(nbands: usize, threads: usize) -> Vec<usize> {
    if nbands == 0 {
        return Vec::new();
    }
    let stride = nbands.div_ceil(threads.max(1));
    let mut order = Vec::with_capacity(nbands);
    for offset in 0..stride {
        for band_index in 0..threads.max(1) {
            let idx = band_index * stride + offset;
            if idx < nbands {
                order.push(idx);
            }
        }
    }
    order
}

#[allow(clippy::too_many_arguments)]
pub struct DitherJob<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub palette: &'a Palette,
    pub lut: &'a PaletteLut,
    pub config: &'a BandConfig,
    pub carry_mode: CarryMode,
    pub lso2_table: Option<&'a [Lso2Row; 256]>,
}

/// Run the dither pipeline over the whole image, splitting into bands and
/// dispatching across threads when `params.threads > 1` (spec §4.G, §5).
/// Returns the index buffer. Palette-optimize disables parallelism at the
/// call site (spec §4.G): callers must pass `threads = 1` when optimize is
/// enabled.
pub fn run_parallel(job: &DitherJob, params: ScheduleParams) -> SixelResult<Vec<u8>> {
    let params = params.resolved(job.height);
    let bands = plan_bands(job.height, params);
    let mut indices = vec![0u8; job.width * job.height];

    if params.threads <= 1 || bands.len() <= 1 {
        debug!(bands = bands.len(), "dither: serial band path");
        run_one_band_into(job, job.lut, &Band { in_lo: 0, y0: 0, y1: job.height }, &mut indices)?;
        return Ok(indices);
    }

    let threads = params.threads.min(bands.len());
    let queue_depth = (3 * threads).min(bands.len());
    debug!(bands = bands.len(), threads, queue_depth, "dither: parallel band scheduler");

    // Certlut grows its octree lazily on first touch of each grid cell; that
    // mutation is not safe to race across threads, so every cell the image
    // can reach is built once here, serially, before any band is cloned out
    // to a worker (spec §5).
    let warmed_cert;
    let lut_for_bands: &PaletteLut = if job.lut.is_certlut() {
        debug!("pre-warming certlut accelerator before parallel dispatch");
        let mut warm = job.lut.clone();
        warm.warm_up(job.palette, job.config.weights, job.data.chunks_exact(DEPTH).map(|p| [p[0], p[1], p[2]]));
        warmed_cert = warm;
        &warmed_cert
    } else {
        job.lut
    };

    let order = stride_interleaved_order(bands.len(), threads);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().map_err(|e| {
        crate::error::set_additional_message(format!("thread pool construction failed: {e}"));
        SixelError::RuntimeError(e.to_string())
    })?;

    let results: Vec<SixelResult<(Band, Vec<u8>)>> = pool.install(|| {
        order
            .into_par_iter()
            .map(|band_idx| {
                let band = bands[band_idx];
                let mut local = vec![0u8; job.width * (band.y1 - band.in_lo)];
                run_one_band_into(job, lut_for_bands, &band, &mut local)?;
                Ok((band, local))
            })
            .collect()
    });

    for result in results {
        let (band, local) = result?;
        let committed_lo = band.y0 - band.in_lo;
        let committed_len = (band.y1 - band.y0) * job.width;
        let src = &local[committed_lo * job.width..committed_lo * job.width + committed_len];
        let dst = &mut indices[band.y0 * job.width..band.y1 * job.width];
        dst.copy_from_slice(src);
    }
    Ok(indices)
}

/// Run one band (serial sub-step of [`run_parallel`], or the whole-image
/// serial path) into `indices_out`, sized to the slab `[band.in_lo,
/// band.y1)` and addressed locally starting at row 0 (spec §4.G: "shared
/// result buffer is addressed with `&result[in_lo*width]`").
fn run_one_band_into(job: &DitherJob, base_lut: &PaletteLut, band: &Band, indices_out: &mut [u8]) -> SixelResult<()> {
    let slab_height = band.y1 - band.in_lo;
    let mut slab = job.data[band.in_lo * job.width * DEPTH..band.y1 * job.width * DEPTH].to_vec();
    let mut lut = base_lut.clone();
    let mut carry = if job.carry_mode.resolved_enabled() {
        Some(CarryBuffers::new(job.width, DEPTH))
    } else {
        None
    };
    run_band_bytes(
        &mut slab,
        job.width,
        slab_height,
        job.palette,
        &mut lut,
        job.config,
        carry.as_mut(),
        job.lso2_table,
        band.in_lo as i32,
        band.y0 as i32,
        indices_out,
        None,
    );
    Ok(())
}
