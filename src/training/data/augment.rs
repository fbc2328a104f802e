//! Training-time augmentation

use rand::Rng;

/// Translate a sample by a random integer offset of up to `max_shift` pixels
/// along each of its last two dimensions. Uncovered pixels are zero.
pub fn random_shift<R: Rng + ?Sized>(
    values: &[f32],
    dims: &[usize],
    max_shift: usize,
    rng: &mut R,
) -> Vec<f32> {
    if max_shift == 0 || dims.len() < 2 {
        return values.to_vec();
    }
    let max = max_shift as i64;
    let dy = rng.random_range(-max..=max) as isize;
    let dx = rng.random_range(-max..=max) as isize;
    shift(values, dims, dy, dx)
}

/// Translate by exactly `(dy, dx)`
pub fn shift(values: &[f32], dims: &[usize], dy: isize, dx: isize) -> Vec<f32> {
    if dims.len() < 2 {
        return values.to_vec();
    }
    let height = dims[dims.len() - 2];
    let width = dims[dims.len() - 1];
    let plane = height * width;
    if plane == 0 {
        return values.to_vec();
    }

    let mut shifted = vec![0.0; values.len()];
    for (src_plane, dst_plane) in values.chunks(plane).zip(shifted.chunks_mut(plane)) {
        for y in 0..height {
            let src_y = y as isize - dy;
            if src_y < 0 || src_y >= height as isize {
                continue;
            }
            for x in 0..width {
                let src_x = x as isize - dx;
                if src_x < 0 || src_x >= width as isize {
                    continue;
                }
                dst_plane[y * width + x] = src_plane[src_y as usize * width + src_x as usize];
            }
        }
    }
    shifted
}
