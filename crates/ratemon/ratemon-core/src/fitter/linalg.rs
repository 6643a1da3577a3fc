//! Dense Gauss-Jordan elimination for the small systems the fitter builds.

/// Relative pivot threshold below which a matrix is treated as singular.
const PIVOT_EPSILON: f64 = 1e-13;

fn pivot_tolerance(a: &[Vec<f64>]) -> f64 {
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    scale * PIVOT_EPSILON
}

/// Solve `a·x = b` with partial pivoting. `None` when `a` is singular or
/// contains non-finite values.
pub fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let tolerance = pivot_tolerance(&a);
    for pivot in 0..n {
        let mut best_row = pivot;
        let mut best_abs = a[pivot][pivot].abs();
        for (row, values) in a.iter().enumerate().skip(pivot + 1) {
            let cand = values[pivot].abs();
            if cand > best_abs {
                best_abs = cand;
                best_row = row;
            }
        }
        if !best_abs.is_finite() || best_abs <= tolerance || best_abs == 0.0 {
            return None;
        }
        if best_row != pivot {
            a.swap(pivot, best_row);
            b.swap(pivot, best_row);
        }

        let pivot_val = a[pivot][pivot];
        for col in pivot..n {
            a[pivot][col] /= pivot_val;
        }
        b[pivot] /= pivot_val;

        for row in 0..n {
            if row == pivot {
                continue;
            }
            let factor = a[row][pivot];
            if factor == 0.0 {
                continue;
            }
            for col in pivot..n {
                a[row][col] -= factor * a[pivot][col];
            }
            b[row] -= factor * b[pivot];
        }
    }
    Some(b)
}

/// Inverse of a square matrix, column by column.
pub fn invert(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut columns = Vec::with_capacity(n);
    for col in 0..n {
        let mut unit = vec![0.0; n];
        unit[col] = 1.0;
        columns.push(solve(a.to_vec(), unit)?);
    }
    Some(
        (0..n)
            .map(|row| columns.iter().map(|column| column[row]).collect())
            .collect(),
    )
}
