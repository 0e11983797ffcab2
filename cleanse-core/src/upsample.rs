use ndarray::Array2;

/// Replicates each mask cell into a `factor x factor` block, truncated to the
/// full `height x width` resolution. A factor of 1 is the identity.
pub fn upsample_mask(mask: &Array2<f32>, factor: usize, height: usize, width: usize) -> Array2<f32> {
    let f = factor.max(1);
    Array2::from_shape_fn((height, width), |(i, j)| mask[[i / f, j / f]])
}

/// Adjoint of [`upsample_mask`]: folds a full-resolution gradient back to
/// mask resolution by summing each block.
pub fn fold_mask_grad(
    grad_up: &Array2<f32>,
    factor: usize,
    mask_height: usize,
    mask_width: usize,
) -> Array2<f32> {
    let f = factor.max(1);
    let mut out = Array2::zeros((mask_height, mask_width));
    for ((i, j), &g) in grad_up.indexed_iter() {
        out[[i / f, j / f]] += g;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_factor_one_is_identity() {
        let mask = array![[0.1, 0.2], [0.3, 0.4]];
        assert_eq!(upsample_mask(&mask, 1, 2, 2), mask);
    }

    #[test]
    fn test_block_replication() {
        let mask = array![[1.0, 2.0], [3.0, 4.0]];
        let up = upsample_mask(&mask, 2, 4, 4);
        assert_eq!(
            up,
            array![
                [1.0, 1.0, 2.0, 2.0],
                [1.0, 1.0, 2.0, 2.0],
                [3.0, 3.0, 4.0, 4.0],
                [3.0, 3.0, 4.0, 4.0],
            ]
        );
    }

    #[test]
    fn test_truncates_to_odd_resolution() {
        // ceil(3 / 2) = 2 mask cells per axis covering a 3x3 image
        let mask = array![[1.0, 2.0], [3.0, 4.0]];
        let up = upsample_mask(&mask, 2, 3, 3);
        assert_eq!(up, array![[1.0, 1.0, 2.0], [1.0, 1.0, 2.0], [3.0, 3.0, 4.0]]);
    }

    #[test]
    fn test_fold_sums_blocks() {
        let grad = array![
            [1.0, 1.0, 2.0],
            [1.0, 1.0, 2.0],
            [3.0, 3.0, 4.0],
        ];
        let folded = fold_mask_grad(&grad, 2, 2, 2);
        assert_eq!(folded, array![[4.0, 4.0], [6.0, 4.0]]);
    }
}
