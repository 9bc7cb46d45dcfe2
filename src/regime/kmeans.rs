// =============================================================================
// K-Means Clustering (k-means++ seeding, Lloyd iterations)
// =============================================================================
//
// Deterministic for a given seed: the RNG is a `StdRng` seeded once per fit,
// and every restart draws from it in order. The restart with the lowest
// inertia wins; ties keep the earlier restart.
//
// If the data has fewer distinct points than requested clusters, the cluster
// count is reduced to the number of distinct points. Callers read the
// effective count from `KMeansFit::n_clusters`.
// =============================================================================

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_N_INIT: usize = 10;
const DEFAULT_MAX_ITER: usize = 300;
const DEFAULT_TOL: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct KMeans {
    pub n_clusters: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence tolerance relative to the mean per-dimension variance.
    pub tol: f64,
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster label per row, in `[0, n_clusters)`. Every label in that
    /// range has at least one row.
    pub labels: Vec<usize>,
    /// `n_clusters x n_features`.
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub n_clusters: usize,
    pub iterations: usize,
}

impl KMeans {
    pub fn new(n_clusters: usize, seed: u64) -> Self {
        Self {
            n_clusters,
            seed,
            n_init: DEFAULT_N_INIT,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
        }
    }

    /// Cluster the rows of `data`. `data` must have at least one row.
    pub fn fit(&self, data: &Array2<f64>) -> KMeansFit {
        let n = data.nrows();
        let k = self.n_clusters.min(count_distinct_rows(data)).max(1);
        let tol = self.tol * mean_variance(data);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;

        for _ in 0..self.n_init.max(1) {
            let init = kmeans_plus_plus(data, k, &mut rng);
            let fit = lloyd(data, init, self.max_iter, tol);
            let better = best.as_ref().map_or(true, |b| fit.inertia < b.inertia);
            if better {
                best = Some(fit);
            }
        }

        match best {
            Some(fit) => compact(fit),
            None => KMeansFit {
                labels: vec![0; n],
                centroids: Array2::zeros((1, data.ncols())),
                inertia: 0.0,
                n_clusters: 1,
                iterations: 0,
            },
        }
    }
}

/// Drop clusters that ended up without rows and renumber the rest in
/// ascending order of their previous label.
fn compact(fit: KMeansFit) -> KMeansFit {
    let mut used = vec![false; fit.centroids.nrows()];
    for &label in &fit.labels {
        used[label] = true;
    }
    if used.iter().all(|u| *u) {
        return fit;
    }

    let kept: Vec<usize> = (0..used.len()).filter(|&j| used[j]).collect();
    let mut remap = vec![0usize; used.len()];
    for (new, &old) in kept.iter().enumerate() {
        remap[old] = new;
    }

    KMeansFit {
        labels: fit.labels.iter().map(|&l| remap[l]).collect(),
        centroids: fit.centroids.select(Axis(0), &kept),
        inertia: fit.inertia,
        n_clusters: kept.len(),
        iterations: fit.iterations,
    }
}

/// Number of distinct rows, comparing floats bit-for-bit (with -0.0 == 0.0).
pub fn count_distinct_rows(data: &Array2<f64>) -> usize {
    data.axis_iter(Axis(0))
        .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

fn mean_variance(data: &Array2<f64>) -> f64 {
    let n = data.nrows() as f64;
    if n == 0.0 || data.ncols() == 0 {
        return 0.0;
    }
    let total: f64 = data
        .columns()
        .into_iter()
        .map(|col| {
            let m = col.sum() / n;
            col.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / data.ncols() as f64
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Nearest centroid index and its squared distance. Ties go to the lower index.
fn nearest(point: ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centroids.axis_iter(Axis(0)).enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// k-means++: first centre uniform, the rest drawn proportionally to the
/// squared distance to the nearest chosen centre.
fn kmeans_plus_plus(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut centroids = Array2::zeros((k, data.ncols()));

    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    let mut dist: Vec<f64> = data
        .axis_iter(Axis(0))
        .map(|row| squared_distance(row, centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = dist.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = None;
            for (i, d) in dist.iter().enumerate() {
                acc += d;
                if acc > target && *d > 0.0 {
                    pick = Some(i);
                    break;
                }
            }
            // Rounding can leave `acc` just under `target`.
            pick.or_else(|| dist.iter().rposition(|d| *d > 0.0)).unwrap_or(0)
        } else {
            rng.gen_range(0..n)
        };

        centroids.row_mut(c).assign(&data.row(chosen));
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let d = squared_distance(row, centroids.row(c));
            if d < dist[i] {
                dist[i] = d;
            }
        }
    }
    centroids
}

fn lloyd(data: &Array2<f64>, mut centroids: Array2<f64>, max_iter: usize, tol: f64) -> KMeansFit {
    let n = data.nrows();
    let k = centroids.nrows();
    let mut labels = vec![0usize; n];
    let mut iterations = 0;

    for iter in 0..max_iter.max(1) {
        iterations = iter + 1;
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            labels[i] = nearest(row, &centroids).0;
        }

        let mut sums = Array2::<f64>::zeros(centroids.dim());
        let mut counts = vec![0usize; k];
        for (i, row) in data.axis_iter(Axis(0)).enumerate() {
            let mut s = sums.row_mut(labels[i]);
            s += &row;
            counts[labels[i]] += 1;
        }

        let mut shift = 0.0;
        for j in 0..k {
            // An empty cluster keeps its previous centre.
            if counts[j] == 0 {
                continue;
            }
            let updated = sums.row(j).mapv(|v| v / counts[j] as f64);
            shift += squared_distance(updated.view(), centroids.row(j));
            centroids.row_mut(j).assign(&updated);
        }

        if shift <= tol {
            break;
        }
    }

    let mut inertia = 0.0;
    for (i, row) in data.axis_iter(Axis(0)).enumerate() {
        let (label, d) = nearest(row, &centroids);
        labels[i] = label;
        inertia += d;
    }

    KMeansFit {
        labels,
        centroids,
        inertia,
        n_clusters: k,
        iterations,
    }
}
