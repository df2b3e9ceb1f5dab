//! Rayon-parallel metric accumulation (feature-gated).
//!
//! Each fixed z-slice of the sampling region is accumulated on its own
//! thread; partial sums are merged in slice order so repeated runs give the
//! same result. Compared to the scalar loop only the summation order
//! differs, so values agree up to floating-point rounding.

use crate::image::pyramid::PyramidLevel;
use crate::metric::scalar::accumulate_slice;
use crate::metric::Accumulator;
use crate::transform::AffineTransform;
use rayon::prelude::*;

pub(crate) fn accumulate_par(
    level: &PyramidLevel,
    transform: &AffineTransform,
    with_gradient: bool,
) -> Accumulator {
    let region = level.region();
    let partials: Vec<Accumulator> = (region.start[2]..region.end()[2])
        .into_par_iter()
        .map(|z| {
            let mut acc = Accumulator::new();
            accumulate_slice(level, transform, z, with_gradient, &mut acc);
            acc
        })
        .collect();

    let mut total = Accumulator::new();
    for partial in &partials {
        total.merge(partial);
    }
    total
}
