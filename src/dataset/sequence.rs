//! Sliding-window sequence construction
//!
//! Windows are positional: row `i + lookback` is treated as the year after row
//! `i + lookback - 1` whatever the actual year values are.

use ndarray::{s, Array1, Array2, ArrayView2};

/// Build `(xs, ys)` from normalized rows (`records × fields`, ascending by year).
///
/// `xs[i]` holds rows `[i, i + lookback)` and `ys[i]` is row `i + lookback`. Returns
/// empty vectors when there are not more rows than `lookback`.
pub fn build_windows(
    normalized: ArrayView2<'_, f64>,
    lookback: usize,
) -> (Vec<Array2<f64>>, Vec<Array1<f64>>) {
    let rows = normalized.nrows();
    if lookback == 0 || rows <= lookback {
        return (Vec::new(), Vec::new());
    }

    (lookback..rows)
        .map(|index| {
            let window = normalized.slice(s![index - lookback..index, ..]).to_owned();
            let target = normalized.row(index).to_owned();
            (window, target)
        })
        .unzip()
}
