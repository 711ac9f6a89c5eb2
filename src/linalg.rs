//! Small dense linear algebra routines.
//!
//! Everything here operates on `ndarray` types and is sized for the
//! matrices this crate actually builds (regression designs with a handful
//! of predictors, covariance matrices with one row per series). No BLAS or
//! LAPACK backend is required.

use crate::error::{ForgeError, Result};
use ndarray::{Array1, Array2, Axis};

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let b2 = b.clone().insert_axis(Axis(1));
    let x = solve_multi(a, &b2)?;
    Ok(x.index_axis(Axis(1), 0).to_owned())
}

/// Solve `a * X = B` for multiple right-hand sides.
pub fn solve_multi(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.nrows() != n {
        return Err(ForgeError::ShapeMismatch(format!(
            "solve expects square system, got {}x{} with {} rhs rows",
            a.nrows(),
            a.ncols(),
            b.nrows()
        )));
    }
    let m = b.ncols();
    let mut aug = Array2::zeros((n, n + m));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.slice_mut(ndarray::s![.., n..]).assign(b);

    for k in 0..n {
        // pivot
        let mut piv = k;
        let mut max = aug[[k, k]].abs();
        for i in (k + 1)..n {
            if aug[[i, k]].abs() > max {
                max = aug[[i, k]].abs();
                piv = i;
            }
        }
        if max < 1e-12 {
            return Err(ForgeError::Numerical("singular matrix in solve".into()));
        }
        if piv != k {
            for j in 0..(n + m) {
                aug.swap([k, j], [piv, j]);
            }
        }
        for i in (k + 1)..n {
            let f = aug[[i, k]] / aug[[k, k]];
            if f == 0.0 {
                continue;
            }
            for j in k..(n + m) {
                aug[[i, j]] -= f * aug[[k, j]];
            }
        }
    }

    let mut x = Array2::zeros((n, m));
    for c in 0..m {
        for i in (0..n).rev() {
            let mut s = aug[[i, n + c]];
            for j in (i + 1)..n {
                s -= aug[[i, j]] * x[[j, c]];
            }
            x[[i, c]] = s / aug[[i, i]];
        }
    }
    Ok(x)
}

/// Least squares `min ||x b - y||` via the normal equations with a tiny
/// ridge term for conditioning. Returns coefficients `(p, k)` for a design
/// `(n, p)` and targets `(n, k)`.
pub fn lstsq(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    lstsq_ridge(x, y, 1e-9)
}

/// Ridge-regularized least squares.
pub fn lstsq_ridge(x: &Array2<f64>, y: &Array2<f64>, alpha: f64) -> Result<Array2<f64>> {
    if x.nrows() != y.nrows() {
        return Err(ForgeError::ShapeMismatch(format!(
            "lstsq: {} design rows vs {} target rows",
            x.nrows(),
            y.nrows()
        )));
    }
    let xtx = x.t().dot(x);
    let mut gram = xtx;
    let scale = gram.diag().iter().fold(0.0f64, |m, v| m.max(v.abs())).max(1.0);
    for i in 0..gram.nrows() {
        gram[[i, i]] += alpha * scale;
    }
    let xty = x.t().dot(y);
    solve_multi(&gram, &xty)
}

/// Eigen decomposition of a symmetric matrix via cyclic Jacobi rotations.
/// Returns `(eigenvalues, eigenvectors)` sorted by descending eigenvalue;
/// eigenvectors are the columns of the returned matrix.
pub fn jacobi_eigh(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(ForgeError::ShapeMismatch(
            "eigh expects a square matrix".into(),
        ));
    }
    let mut m = a.clone();
    let mut v: Array2<f64> = Array2::eye(n);

    for _sweep in 0..100 {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += m[[i, j]] * m[[i, j]];
            }
        }
        if off.sqrt() < 1e-12 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if m[[p, q]].abs() < 1e-15 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * m[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        m[[j, j]]
            .partial_cmp(&m[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let eigvals = Array1::from_iter(order.iter().map(|&i| m[[i, i]]));
    let eigvecs = v.select(Axis(1), &order);
    Ok((eigvals, eigvecs))
}

/// Inverse square root of a symmetric positive semi-definite matrix.
/// Eigenvalues below the floor are clamped.
pub fn inv_sqrt_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (vals, vecs) = jacobi_eigh(a)?;
    let floor = vals
        .iter()
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(1e-300)
        * 1e-12;
    let d = Array2::from_diag(&vals.mapv(|v| 1.0 / v.max(floor).sqrt()));
    Ok(vecs.dot(&d).dot(&vecs.t()))
}

/// Solve a symmetric pentadiagonal positive definite system via banded
/// Cholesky, with the matrix given as three bands (main, first, second).
pub fn solve_pentadiagonal(
    d0: &[f64],
    d1: &[f64],
    d2: &[f64],
    b: &Array1<f64>,
) -> Result<Array1<f64>> {
    let n = d0.len();
    if d1.len() + 1 != n || d2.len() + 2 != n || b.len() != n {
        return Err(ForgeError::ShapeMismatch(
            "pentadiagonal band lengths inconsistent".into(),
        ));
    }
    // L with bands l0 (diag), l1, l2 such that L L^T = A
    let mut l0 = vec![0.0; n];
    let mut l1 = vec![0.0; n.saturating_sub(1)];
    let mut l2 = vec![0.0; n.saturating_sub(2)];
    for i in 0..n {
        let mut s = d0[i];
        if i >= 1 {
            s -= l1[i - 1] * l1[i - 1];
        }
        if i >= 2 {
            s -= l2[i - 2] * l2[i - 2];
        }
        if s <= 0.0 {
            return Err(ForgeError::Numerical(
                "pentadiagonal system is not positive definite".into(),
            ));
        }
        l0[i] = s.sqrt();
        if i + 1 < n {
            let mut s1 = d1[i];
            if i >= 1 {
                s1 -= l1[i - 1] * l2[i - 1];
            }
            l1[i] = s1 / l0[i];
        }
        if i + 2 < n {
            l2[i] = d2[i] / l0[i];
        }
    }
    // forward then back substitution
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut s = b[i];
        if i >= 1 {
            s -= l1[i - 1] * y[i - 1];
        }
        if i >= 2 {
            s -= l2[i - 2] * y[i - 2];
        }
        y[i] = s / l0[i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut s = y[i];
        if i + 1 < n {
            s -= l1[i] * x[i + 1];
        }
        if i + 2 < n {
            s -= l2[i] * x[i + 2];
        }
        x[i] = s / l0[i];
    }
    Ok(Array1::from_vec(x))
}
