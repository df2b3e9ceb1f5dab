//! Separable Gaussian smoothing for `f32` volumes.
//!
//! Each axis is convolved with a normalized 1D kernel of radius `ceil(3σ)`;
//! samples past the border replicate the edge voxel.

use crate::image::Volume;
use crate::util::VoxRegResult;

/// Builds a normalized Gaussian kernel for `sigma` in voxels.
pub(crate) fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let two_sigma2 = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-x * x / two_sigma2).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Smooths `src` along all three axes with the same voxel sigma.
///
/// A sigma at or below `1e-6` returns an unchanged copy.
pub(crate) fn smooth(src: &Volume<f32>, sigma: f64) -> VoxRegResult<Volume<f32>> {
    if sigma <= 1e-6 {
        return Ok(src.clone());
    }
    let kernel = gaussian_kernel(sigma);
    let size = src.size();
    let mut data = src.data().to_vec();
    for axis in 0..3 {
        if size[axis] > 1 {
            data = convolve_axis(&data, size, axis, &kernel);
        }
    }
    Volume::new(data, size, src.geometry())
}

fn convolve_axis(src: &[f32], size: [usize; 3], axis: usize, kernel: &[f64]) -> Vec<f32> {
    let radius = (kernel.len() / 2) as isize;
    let stride = match axis {
        0 => 1,
        1 => size[0],
        _ => size[0] * size[1],
    };
    let n = size[axis] as isize;
    let mut out = vec![0.0f32; src.len()];

    for z in 0..size[2] {
        for y in 0..size[1] {
            for x in 0..size[0] {
                let idx = (z * size[1] + y) * size[0] + x;
                let pos = [x, y, z][axis] as isize;
                let line_start = idx - pos as usize * stride;
                let mut acc = 0.0f64;
                for (k, w) in kernel.iter().enumerate() {
                    let p = (pos + k as isize - radius).clamp(0, n - 1) as usize;
                    acc += w * f64::from(src[line_start + p * stride]);
                }
                out[idx] = acc as f32;
            }
        }
    }
    out
}
