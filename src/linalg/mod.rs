pub mod projection;

use faer::{Col, Mat};

use crate::E;

/// Locates the interpolation interval for `t` in a non-decreasing time
/// base. Returns the left node index and the barycentric weight of the
/// right node; queries outside the base clamp to the boundary values.
pub(crate) fn interval_index(times: &[E], t: E) -> (usize, E) {
    debug_assert!(times.len() > 1);
    let idx = times.partition_point(|&ti| ti < t).clamp(1, times.len() - 1);
    let (t_left, t_right) = (times[idx - 1], times[idx]);
    let alpha = if t_right > t_left {
        ((t - t_left) / (t_right - t_left)).clamp(0., 1.)
    } else {
        // Duplicated node times (event pairs) collapse to the right node.
        1.
    };
    (idx - 1, alpha)
}

/// Piecewise-linear interpolation of a vector trajectory. Exact at the
/// nodes: a query at `times[k]` returns `values[k]` bit-for-bit.
pub fn interpolate(times: &[E], values: &[Col<E>], t: E) -> Col<E> {
    debug_assert_eq!(times.len(), values.len());
    if times.len() == 1 {
        return values[0].clone();
    }
    let (i, alpha) = interval_index(times, t);
    (1. - alpha) * &values[i] + alpha * &values[i + 1]
}

/// Piecewise-linear interpolation of a matrix trajectory (feedback gains).
pub fn interpolate_matrices(times: &[E], values: &[Mat<E>], t: E) -> Mat<E> {
    debug_assert_eq!(times.len(), values.len());
    if times.len() == 1 {
        return values[0].clone();
    }
    let (i, alpha) = interval_index(times, t);
    (1. - alpha) * &values[i] + alpha * &values[i + 1]
}

/// L2 norm of a stage-stacked vector sequence.
pub fn stacked_norm(values: &[Col<E>]) -> E {
    values
        .iter()
        .map(|v| {
            let n = v.norm_l2();
            n * n
        })
        .sum::<E>()
        .sqrt()
}
