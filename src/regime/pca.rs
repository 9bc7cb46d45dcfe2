// =============================================================================
// Standardization + Principal Component Analysis
// =============================================================================
//
// Batch (retrospective) standardization: every column is centred and scaled
// with statistics taken over the whole analysed window. PCA then projects the
// standardized matrix onto the eigenvectors of its covariance matrix with the
// largest eigenvalues.
//
// The covariance matrix is tiny (features x features) and symmetric, so the
// eigendecomposition uses cyclic Jacobi rotations, which converge
// quadratically and need no random start.
//
// Component signs are made deterministic: the largest-magnitude loading of
// each component is positive.
// =============================================================================

use ndarray::{Array1, Array2, Axis};

const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_TOLERANCE: f64 = 1e-22;

/// Column-wise z-scores with population statistics.
#[derive(Debug, Clone)]
pub struct Standardizer {
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
}

impl Standardizer {
    /// Fit on `data` (rows = observations). Columns with zero variance get a
    /// scale of 1 so they are centred but not blown up.
    pub fn fit(data: &Array2<f64>) -> Self {
        let n = data.nrows().max(1) as f64;
        let means = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(data.ncols()));
        let columns = data.columns().into_iter().zip(means.iter());
        let scales = Array1::from_iter(columns.map(|(col, &m)| {
            let var = col.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 1e-12 && std.is_finite() {
                std
            } else {
                1.0
            }
        }));
        Self { means, scales }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.means) / &self.scales
    }

    pub fn fit_transform(data: &Array2<f64>) -> (Self, Array2<f64>) {
        let scaler = Self::fit(data);
        let scaled = scaler.transform(data);
        (scaler, scaled)
    }
}

/// Fitted PCA model.
#[derive(Debug, Clone)]
pub struct Pca {
    /// Column means of the training data.
    pub mean: Array1<f64>,
    /// `n_components x n_features`, one principal axis per row.
    pub components: Array2<f64>,
    pub explained_variance: Array1<f64>,
    pub explained_variance_ratio: Array1<f64>,
}

impl Pca {
    /// Fit `n_components` principal axes on `data` (at least two rows).
    pub fn fit(data: &Array2<f64>, n_components: usize) -> Self {
        let (n, d) = data.dim();
        let n_components = n_components.min(d);

        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
        let centered = data - &mean;
        let denom = (n.max(2) - 1) as f64;
        let cov = centered.t().dot(&centered) / denom;

        let (eigenvalues, eigenvectors) = symmetric_eigen(&cov);

        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| {
            eigenvalues[b]
                .partial_cmp(&eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total: f64 = eigenvalues.iter().map(|v| v.max(0.0)).sum();
        let mut components = Array2::zeros((n_components, d));
        let mut explained_variance = Array1::zeros(n_components);
        let mut explained_variance_ratio = Array1::zeros(n_components);

        for (row, &idx) in order.iter().take(n_components).enumerate() {
            let mut axis = eigenvectors.column(idx).to_owned();

            // Largest-magnitude loading positive.
            let pivot = axis
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
            if pivot < 0.0 {
                axis.mapv_inplace(|v| -v);
            }

            components.row_mut(row).assign(&axis);
            let var = eigenvalues[idx].max(0.0);
            explained_variance[row] = var;
            explained_variance_ratio[row] = if total > 0.0 { var / total } else { 0.0 };
        }

        Self {
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        }
    }

    /// Project `data` onto the principal axes: `n x n_components`.
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean).dot(&self.components.t())
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvector `i` in column `i`,
/// unsorted.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in 0..n {
                if p != q {
                    off += a[[p, q]] * a[[p, q]];
                }
            }
        }
        if off < JACOBI_TOLERANCE {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
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

    (a.diag().to_owned(), v)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standardizer_zero_mean_unit_variance() {
        let data = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0], [4.0, 10.0]];
        let (_, scaled) = Standardizer::fit_transform(&data);
        let col0 = scaled.column(0);
        assert!(col0.sum().abs() < 1e-12);
        let var = col0.iter().map(|x| x * x).sum::<f64>() / 4.0;
        assert!((var - 1.0).abs() < 1e-12);
        // Constant column is centred only.
        assert!(scaled.column(1).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn jacobi_known_eigenvalues() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let (vals, vecs) = symmetric_eigen(&m);
        let mut sorted = vals.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((sorted[0] - 1.0).abs() < 1e-10);
        assert!((sorted[1] - 3.0).abs() < 1e-10);
        // A v = lambda v for each column.
        for i in 0..2 {
            let v = vecs.column(i);
            let av = m.dot(&v);
            for k in 0..2 {
                assert!((av[k] - vals[i] * v[k]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn pca_finds_dominant_axis() {
        // Points along y = 2x with a little orthogonal spread.
        let data = array![
            [1.0, 2.1],
            [2.0, 3.9],
            [3.0, 6.0],
            [4.0, 8.1],
            [5.0, 9.9],
        ];
        let pca = Pca::fit(&data, 2);
        let axis = pca.components.row(0);
        assert!(axis[0] > 0.0 && axis[1] > 0.0);
        assert!((axis[1] / axis[0] - 2.0).abs() < 0.1);
        assert!(pca.explained_variance_ratio[0] > 0.99);
        assert!(pca.explained_variance[0] >= pca.explained_variance[1]);
    }

    #[test]
    fn pca_transform_shape_and_centering() {
        let data = array![[1.0, 0.0, 3.0], [2.0, 1.0, 1.0], [0.0, 4.0, 2.0], [3.0, 3.0, 0.0]];
        let pca = Pca::fit(&data, 2);
        let projected = pca.transform(&data);
        assert_eq!(projected.dim(), (4, 2));
        for col in projected.columns() {
            assert!(col.sum().abs() < 1e-10);
        }
    }

    #[test]
    fn pca_on_constant_data_is_zero() {
        let data = Array2::from_elem((5, 4), 0.0);
        let pca = Pca::fit(&data, 2);
        let projected = pca.transform(&data);
        assert!(projected.iter().all(|v| v.abs() < 1e-12));
        assert!(pca.explained_variance_ratio.iter().all(|v| *v == 0.0));
    }
}
