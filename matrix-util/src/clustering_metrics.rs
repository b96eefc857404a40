//! External clustering-quality scores against ground-truth labels
//!
//! * `accuracy` - fraction of agreements after the best one-to-one
//!   relabelling of predicted clusters (Hungarian matching)
//! * `nmi` - mutual information normalized by the arithmetic mean of
//!   the two entropies
//! * `ari` - Rand index corrected for chance

use nalgebra::DMatrix;
use std::collections::HashMap;

/// The three scores reported for one clustering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterScores {
    pub accuracy: f64,
    pub nmi: f64,
    pub ari: f64,
}

impl ClusterScores {
    pub fn evaluate(pred: &[usize], truth: &[usize]) -> anyhow::Result<Self> {
        Ok(Self {
            accuracy: accuracy(pred, truth)?,
            nmi: nmi(pred, truth)?,
            ari: ari(pred, truth)?,
        })
    }
}

impl std::fmt::Display for ClusterScores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc = {:.5}, nmi = {:.5}, ari = {:.5}",
            self.accuracy, self.nmi, self.ari
        )
    }
}

fn check_labels(pred: &[usize], truth: &[usize]) -> anyhow::Result<()> {
    if pred.len() != truth.len() {
        anyhow::bail!(
            "{} predicted labels vs. {} true labels",
            pred.len(),
            truth.len()
        );
    }
    if pred.is_empty() {
        anyhow::bail!("no labels to score");
    }
    Ok(())
}

/// Contingency table: rows = predicted cluster, columns = true label,
/// both re-indexed densely in order of first appearance
fn contingency(pred: &[usize], truth: &[usize]) -> DMatrix<f64> {
    fn dense_index(labels: &[usize]) -> (Vec<usize>, usize) {
        let mut index = HashMap::new();
        let codes = labels
            .iter()
            .map(|l| {
                let next = index.len();
                *index.entry(*l).or_insert(next)
            })
            .collect();
        (codes, index.len())
    }

    let (p, np) = dense_index(pred);
    let (t, nt) = dense_index(truth);
    let mut table = DMatrix::<f64>::zeros(np, nt);
    for (&a, &b) in p.iter().zip(t.iter()) {
        table[(a, b)] += 1.0;
    }
    table
}

/// Clustering accuracy under the best one-to-one mapping between
/// predicted clusters and true labels.
///
/// ```
/// use matrix_util::clustering_metrics::accuracy;
/// assert_eq!(accuracy(&[1, 1, 0, 0], &[0, 0, 1, 1])?, 1.0);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn accuracy(pred: &[usize], truth: &[usize]) -> anyhow::Result<f64> {
    check_labels(pred, truth)?;

    let table = contingency(pred, truth);
    let nn = table.nrows().max(table.ncols());

    // square profit matrix, padded with zeros
    let mut profit = DMatrix::<f64>::zeros(nn, nn);
    profit
        .view_mut((0, 0), (table.nrows(), table.ncols()))
        .copy_from(&table);

    let assignment = max_weight_matching(&profit);
    let matched: f64 = assignment
        .iter()
        .enumerate()
        .map(|(r, &c)| profit[(r, c)])
        .sum();

    Ok(matched / pred.len() as f64)
}

/// Maximum-weight perfect matching on a square matrix (Hungarian
/// algorithm with potentials, O(n^3)); returns the column matched to
/// each row
pub fn max_weight_matching(profit: &DMatrix<f64>) -> Vec<usize> {
    let nn = profit.nrows();
    debug_assert_eq!(nn, profit.ncols());

    if nn == 0 {
        return vec![];
    }

    let max_val = profit.max();
    let cost = |i: usize, j: usize| max_val - profit[(i, j)];

    // 1-based arrays; index 0 is the virtual start
    let mut u = vec![0.0; nn + 1];
    let mut v = vec![0.0; nn + 1];
    let mut row_of_col = vec![0usize; nn + 1];
    let mut way = vec![0usize; nn + 1];

    for i in 1..=nn {
        row_of_col[0] = i;
        let mut j0 = 0;
        let mut min_v = vec![f64::INFINITY; nn + 1];
        let mut used = vec![false; nn + 1];

        loop {
            used[j0] = true;
            let i0 = row_of_col[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;

            for j in 1..=nn {
                if !used[j] {
                    let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                    if cur < min_v[j] {
                        min_v[j] = cur;
                        way[j] = j0;
                    }
                    if min_v[j] < delta {
                        delta = min_v[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=nn {
                if used[j] {
                    u[row_of_col[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }

            j0 = j1;
            if row_of_col[j0] == 0 {
                break;
            }
        }

        loop {
            let j1 = way[j0];
            row_of_col[j0] = row_of_col[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut col_of_row = vec![0usize; nn];
    for j in 1..=nn {
        if row_of_col[j] > 0 {
            col_of_row[row_of_col[j] - 1] = j - 1;
        }
    }
    col_of_row
}

fn entropy(counts: impl Iterator<Item = f64>, n: f64) -> f64 {
    counts
        .filter(|&c| c > 0.0)
        .map(|c| {
            let p = c / n;
            -p * p.ln()
        })
        .sum()
}

/// Normalized mutual information (arithmetic normalization)
///
/// ```
/// use matrix_util::clustering_metrics::nmi;
/// assert!((nmi(&[0, 0, 1, 1], &[1, 1, 0, 0])? - 1.0).abs() < 1e-10);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn nmi(pred: &[usize], truth: &[usize]) -> anyhow::Result<f64> {
    check_labels(pred, truth)?;

    let table = contingency(pred, truth);
    let n = pred.len() as f64;

    let row_sums = table.column_sum();
    let col_sums = table.row_sum();

    let h_pred = entropy(row_sums.iter().cloned(), n);
    let h_truth = entropy(col_sums.iter().cloned(), n);

    let mut mi = 0.0;
    for i in 0..table.nrows() {
        for j in 0..table.ncols() {
            let nij = table[(i, j)];
            if nij > 0.0 {
                mi += nij / n * (n * nij / (row_sums[i] * col_sums[j])).ln();
            }
        }
    }

    let denom = h_pred + h_truth;
    if denom > 0.0 {
        Ok((2.0 * mi / denom).clamp(0.0, 1.0))
    } else {
        Ok(1.0) // both are constant
    }
}

fn comb2(x: f64) -> f64 {
    x * (x - 1.0) / 2.0
}

/// Adjusted Rand index
///
/// ```
/// use matrix_util::clustering_metrics::ari;
/// assert!((ari(&[0, 0, 1, 1], &[0, 0, 1, 1])? - 1.0).abs() < 1e-10);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn ari(pred: &[usize], truth: &[usize]) -> anyhow::Result<f64> {
    check_labels(pred, truth)?;

    let table = contingency(pred, truth);
    let n = pred.len() as f64;

    let sum_comb_ij: f64 = table.iter().map(|&x| comb2(x)).sum();
    let sum_comb_a: f64 = table.column_sum().iter().map(|&x| comb2(x)).sum();
    let sum_comb_b: f64 = table.row_sum().iter().map(|&x| comb2(x)).sum();

    let expected = sum_comb_a * sum_comb_b / comb2(n).max(1.0);
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return Ok(1.0);
    }

    Ok((sum_comb_ij - expected) / denom)
}
