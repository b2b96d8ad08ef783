//! Quadratic least-squares fitting
//!
//! Normal equations solved by Gaussian elimination with partial pivoting;
//! small enough that a dense 3x3 solve is the right tool.

use im_common::stats::EPSILON;

/// Fit `y = a*x^2 + b*x + c`. Returns `([a, b, c], r_squared)`, or `None`
/// for degenerate inputs.
pub fn fit_quadratic(xs: &[f64], ys: &[f64]) -> Option<([f64; 3], f64)> {
    let n = xs.len().min(ys.len());
    if n < 3 {
        return None;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];

    // Power sums for the normal equations A^T A x = A^T y with columns
    // [x^2, x, 1]
    let mut s = [0.0f64; 5]; // sum of x^0 .. x^4
    let mut t = [0.0f64; 3]; // sum of y*x^0 .. y*x^2
    for i in 0..n {
        let x = xs[i];
        let y = ys[i];
        let x2 = x * x;
        s[0] += 1.0;
        s[1] += x;
        s[2] += x2;
        s[3] += x2 * x;
        s[4] += x2 * x2;
        t[0] += y;
        t[1] += y * x;
        t[2] += y * x2;
    }

    let matrix = [
        [s[4], s[3], s[2], t[2]],
        [s[3], s[2], s[1], t[1]],
        [s[2], s[1], s[0], t[0]],
    ];
    let coeffs = solve(matrix)?;

    // Coefficient of determination against the fitted curve
    let y_mean = t[0] / n as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..n {
        let predicted = coeffs[0] * xs[i] * xs[i] + coeffs[1] * xs[i] + coeffs[2];
        ss_res += (ys[i] - predicted).powi(2);
        ss_tot += (ys[i] - y_mean).powi(2);
    }
    let r_squared = if ss_tot < EPSILON { 1.0 } else { 1.0 - ss_res / ss_tot };
    Some((coeffs, r_squared))
}

/// Evaluate a fitted quadratic
pub fn eval_quadratic(coeffs: &[f64; 3], x: f64) -> f64 {
    coeffs[0] * x * x + coeffs[1] * x + coeffs[2]
}

/// Gaussian elimination with partial pivoting over a 3x4 augmented matrix
fn solve(mut m: [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        // Partial pivot: move the largest magnitude entry into place
        let pivot_row = (col..3)
            .max_by(|&a, &b| {
                m[a][col].abs().partial_cmp(&m[b][col].abs()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty range");
        if m[pivot_row][col].abs() < EPSILON {
            return None;
        }
        m.swap(col, pivot_row);

        for row in (col + 1)..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut acc = m[row][3];
        for k in (row + 1)..3 {
            acc -= m[row][k] * x[k];
        }
        x[row] = acc / m[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_exact_quadratic_coefficients() {
        let xs: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 0.5 * x * x - 3.0 * x + 7.0).collect();
        let (coeffs, r2) = fit_quadratic(&xs, &ys).unwrap();
        assert_relative_eq!(coeffs[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(coeffs[1], -3.0, epsilon = 1e-6);
        assert_relative_eq!(coeffs[2], 7.0, epsilon = 1e-5);
        assert_relative_eq!(r2, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn noisy_fit_reports_imperfect_r_squared() {
        let xs: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| x * x + if i % 2 == 0 { 50.0 } else { -50.0 })
            .collect();
        let (_, r2) = fit_quadratic(&xs, &ys).unwrap();
        assert!(r2 < 1.0 && r2 > 0.9);
    }

    #[test]
    fn degenerate_inputs_yield_none() {
        assert!(fit_quadratic(&[1.0, 2.0], &[1.0, 2.0]).is_none());
        // All x identical: singular normal matrix
        assert!(fit_quadratic(&[2.0; 10], &[1.0; 10]).is_none());
    }
}
