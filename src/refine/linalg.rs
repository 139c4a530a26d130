//! Dense and banded linear solvers for the fitter and the calibration splines.

/// Smallest pivot accepted by the dense solvers.
const PIVOT_EPS: f64 = 1e-12;

/// Solves `a * x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` if the matrix is singular (pivot too small).
#[allow(clippy::needless_range_loop)]
pub(crate) fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut m = *a;
    let mut rhs = *b;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..N {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        if !(max_val >= PIVOT_EPS) {
            return None;
        }
        if max_row != col {
            m.swap(col, max_row);
            rhs.swap(col, max_row);
        }
        for row in (col + 1)..N {
            let factor = m[row][col] / m[col][col];
            let pivot_row = m[col];
            for (j, v) in m[row].iter_mut().enumerate().skip(col) {
                *v -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= m[i][j] * xj;
        }
        x[i] = sum / m[i][i];
    }
    Some(x)
}

/// Inverts a square matrix by Gauss-Jordan elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
pub(crate) fn invert<const N: usize>(a: &[[f64; N]; N]) -> Option<[[f64; N]; N]> {
    let mut m = *a;
    let mut inv = [[0.0f64; N]; N];
    for (i, row) in inv.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for col in 0..N {
        let mut max_row = col;
        for row in (col + 1)..N {
            if m[row][col].abs() > m[max_row][col].abs() {
                max_row = row;
            }
        }
        if !(m[max_row][col].abs() >= PIVOT_EPS) {
            return None;
        }
        m.swap(col, max_row);
        inv.swap(col, max_row);

        let pivot = m[col][col];
        for j in 0..N {
            m[col][j] /= pivot;
            inv[col][j] /= pivot;
        }
        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..N {
                m[row][j] -= factor * m[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// Symmetric positive definite matrix with half bandwidth two.
///
/// `diag[i] = A[i][i]`, `off1[i] = A[i][i+1]`, `off2[i] = A[i][i+2]`.
#[derive(Clone, Debug)]
pub(crate) struct PentaDiagonal {
    pub diag: Vec<f64>,
    pub off1: Vec<f64>,
    pub off2: Vec<f64>,
}

impl PentaDiagonal {
    pub fn zeros(n: usize) -> Self {
        Self {
            diag: vec![0.0; n],
            off1: vec![0.0; n],
            off2: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    /// Adds `value` to `A[i][j]` (and its mirror); `|i - j|` must be at most 2.
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        match hi - lo {
            0 => self.diag[lo] += value,
            1 => self.off1[lo] += value,
            2 => self.off2[lo] += value,
            _ => debug_assert!(false, "entry outside the band"),
        }
    }

    /// Solves `A x = b` with a banded Cholesky factorization.
    pub fn solve(&self, b: &[f64]) -> Option<Vec<f64>> {
        let n = self.len();
        if b.len() != n {
            return None;
        }
        // L is lower triangular with the same bandwidth: l0 diagonal,
        // l1[i] = L[i][i-1], l2[i] = L[i][i-2].
        let mut l0 = vec![0.0; n];
        let mut l1 = vec![0.0; n];
        let mut l2 = vec![0.0; n];
        for i in 0..n {
            if i >= 2 {
                l2[i] = self.off2[i - 2] / l0[i - 2];
            }
            if i >= 1 {
                let mut v = self.off1[i - 1];
                if i >= 2 {
                    v -= l2[i] * l1[i - 1];
                }
                l1[i] = v / l0[i - 1];
            }
            let d = self.diag[i] - l1[i] * l1[i] - l2[i] * l2[i];
            if !(d > 0.0) {
                return None;
            }
            l0[i] = d.sqrt();
        }

        let mut y = vec![0.0; n];
        for i in 0..n {
            let mut v = b[i];
            if i >= 1 {
                v -= l1[i] * y[i - 1];
            }
            if i >= 2 {
                v -= l2[i] * y[i - 2];
            }
            y[i] = v / l0[i];
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut v = y[i];
            if i + 1 < n {
                v -= l1[i + 1] * x[i + 1];
            }
            if i + 2 < n {
                v -= l2[i + 2] * x[i + 2];
            }
            x[i] = v / l0[i];
        }
        Some(x)
    }
}
