//! Sparse bipartite interaction graph.
//!
//! The user-item interaction graph is stored as a symmetric, degree-
//! normalized sparse matrix over `num_users + num_items` nodes:
//!
//! ```text
//!         | 0    R |
//! A_hat = | R^T  0 |    normalized as D^{-1/2} A D^{-1/2}
//! ```
//!
//! where `R` is the user-item interaction matrix. Users occupy node
//! indices `[0, num_users)` and items `[num_users, num_users + num_items)`.
//!
//! The matrix is immutable once built. It can be partitioned into row
//! folds ([`Adjacency::Split`]) to bound peak memory during the sparse
//! multiply; the folded form is mathematically equivalent to the whole
//! matrix as long as fold outputs are reassembled in partition order.

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{Error, Result};

/// Sparse matrix in COO layout, the unit of the propagation multiply.
///
/// Column indices address rows of the dense right-hand operand, so a row
/// fold of the full adjacency keeps global column indices while its row
/// indices are local to the fold.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    n_rows: usize,
    n_cols: usize,
    rows: Vec<u32>,
    cols: Vec<u32>,
    vals: Vec<f32>,
}

impl SparseMatrix {
    /// Create from COO triplets. Indices are validated against the shape.
    pub fn new(
        n_rows: usize,
        n_cols: usize,
        rows: Vec<u32>,
        cols: Vec<u32>,
        vals: Vec<f32>,
    ) -> Result<Self> {
        if rows.len() != cols.len() || rows.len() != vals.len() {
            return Err(Error::DimensionMismatch {
                expected: rows.len(),
                got: cols.len().max(vals.len()),
            });
        }
        if let Some(&r) = rows.iter().max() {
            if r as usize >= n_rows {
                return Err(Error::DimensionMismatch {
                    expected: n_rows,
                    got: r as usize + 1,
                });
            }
        }
        if let Some(&c) = cols.iter().max() {
            if c as usize >= n_cols {
                return Err(Error::DimensionMismatch {
                    expected: n_cols,
                    got: c as usize + 1,
                });
            }
        }
        Ok(Self {
            n_rows,
            n_cols,
            rows,
            cols,
            vals,
        })
    }

    /// Shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    /// Sparse-dense multiply: `self * x`, differentiable in `x`.
    ///
    /// Gathers rows of `x` by column index, scales by the stored values and
    /// scatter-adds into the output by row index. All three steps are candle
    /// ops with autograd support, so gradients flow through to `x`.
    pub fn matmul(&self, x: &Tensor) -> Result<Tensor> {
        let (xn, xd) = x.dims2()?;
        if xn != self.n_cols {
            return Err(Error::DimensionMismatch {
                expected: self.n_cols,
                got: xn,
            });
        }
        let device = x.device();
        let out = Tensor::zeros((self.n_rows, xd), x.dtype(), device)?;
        if self.vals.is_empty() {
            return Ok(out);
        }
        let rows = Tensor::from_slice(&self.rows, self.rows.len(), device)?;
        let cols = Tensor::from_slice(&self.cols, self.cols.len(), device)?;
        let vals = Tensor::from_slice(&self.vals, self.vals.len(), device)?;
        let gathered = x.index_select(&cols, 0)?;
        let weighted = gathered.broadcast_mul(&vals.unsqueeze(1)?)?;
        Ok(out.index_add(&rows, &weighted, 0)?)
    }

    /// Inverted dropout: keep each entry iff `uniform < keep_prob`, rescale
    /// kept values by `1/keep_prob`. Returns a new matrix; the base
    /// adjacency is never mutated.
    pub fn dropout(&self, keep_prob: f32, rng: &mut StdRng) -> Self {
        let mut rows = Vec::with_capacity(self.nnz());
        let mut cols = Vec::with_capacity(self.nnz());
        let mut vals = Vec::with_capacity(self.nnz());
        for k in 0..self.nnz() {
            if rng.random::<f32>() < keep_prob {
                rows.push(self.rows[k]);
                cols.push(self.cols[k]);
                vals.push(self.vals[k] / keep_prob);
            }
        }
        Self {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            rows,
            cols,
            vals,
        }
    }

    /// Partition into `n_folds` contiguous row blocks. The last fold takes
    /// the remainder. Fold order is the node partition order; reassembling
    /// fold outputs in this order reproduces the unsplit multiply.
    pub fn split_folds(&self, n_folds: usize) -> Result<Vec<SparseMatrix>> {
        if n_folds == 0 {
            return Err(Error::InvalidConfig("n_folds must be > 0".into()));
        }
        let fold_len = (self.n_rows / n_folds).max(1);
        let mut folds = Vec::new();
        let mut start = 0usize;
        while start < self.n_rows {
            let end = if folds.len() + 1 == n_folds {
                self.n_rows
            } else {
                (start + fold_len).min(self.n_rows)
            };
            let mut rows = Vec::new();
            let mut cols = Vec::new();
            let mut vals = Vec::new();
            for k in 0..self.nnz() {
                let r = self.rows[k] as usize;
                if r >= start && r < end {
                    rows.push((r - start) as u32);
                    cols.push(self.cols[k]);
                    vals.push(self.vals[k]);
                }
            }
            folds.push(SparseMatrix {
                n_rows: end - start,
                n_cols: self.n_cols,
                rows,
                cols,
                vals,
            });
            start = end;
            if folds.len() == n_folds {
                break;
            }
        }
        Ok(folds)
    }

    /// Materialize as a dense tensor. Reference implementation for tests
    /// and small graphs only.
    pub fn to_dense(&self, device: &candle_core::Device) -> Result<Tensor> {
        let mut data = vec![0.0f32; self.n_rows * self.n_cols];
        for k in 0..self.nnz() {
            data[self.rows[k] as usize * self.n_cols + self.cols[k] as usize] += self.vals[k];
        }
        Ok(Tensor::from_slice(&data, (self.n_rows, self.n_cols), device)?)
    }
}

/// Normalized adjacency, whole or partitioned into row folds.
#[derive(Debug, Clone)]
pub enum Adjacency {
    /// The full matrix.
    Single(SparseMatrix),
    /// Row folds in node partition order.
    Split(Vec<SparseMatrix>),
}

impl Adjacency {
    /// Total node count (row dimension of the logical matrix).
    pub fn n_nodes(&self) -> usize {
        match self {
            Self::Single(m) => m.shape().0,
            Self::Split(folds) => folds.iter().map(|m| m.shape().0).sum(),
        }
    }

    /// Multiply by a dense `(n_nodes, d)` matrix.
    ///
    /// For the split form, each fold multiplies against the same full
    /// operand and fold outputs are concatenated along the node axis in
    /// partition order.
    pub fn matmul(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Single(m) => m.matmul(x),
            Self::Split(folds) => {
                let mut parts = Vec::with_capacity(folds.len());
                for fold in folds {
                    parts.push(fold.matmul(x)?);
                }
                Ok(Tensor::cat(&parts, 0)?)
            }
        }
    }

    /// Dropout-perturbed copy, each fold masked independently.
    pub fn dropout(&self, keep_prob: f32, rng: &mut StdRng) -> Self {
        match self {
            Self::Single(m) => Self::Single(m.dropout(keep_prob, rng)),
            Self::Split(folds) => {
                Self::Split(folds.iter().map(|m| m.dropout(keep_prob, rng)).collect())
            }
        }
    }
}

/// Build the symmetric degree-normalized bipartite adjacency from raw
/// (user, item) interactions.
///
/// Each interaction contributes the entries `(u, num_users + i)` and
/// `(num_users + i, u)`, weighted `1 / sqrt(deg(u) * deg(i))`. Nodes with
/// no interactions contribute no entries. Duplicate interactions should be
/// deduplicated by the caller.
pub fn normalized_adjacency(
    num_users: usize,
    num_items: usize,
    interactions: &[(u32, u32)],
) -> Result<SparseMatrix> {
    let n = num_users + num_items;
    let mut user_deg = vec![0usize; num_users];
    let mut item_deg = vec![0usize; num_items];
    for &(u, i) in interactions {
        if u as usize >= num_users {
            return Err(Error::DimensionMismatch {
                expected: num_users,
                got: u as usize + 1,
            });
        }
        if i as usize >= num_items {
            return Err(Error::DimensionMismatch {
                expected: num_items,
                got: i as usize + 1,
            });
        }
        user_deg[u as usize] += 1;
        item_deg[i as usize] += 1;
    }

    let nnz = interactions.len() * 2;
    let mut rows = Vec::with_capacity(nnz);
    let mut cols = Vec::with_capacity(nnz);
    let mut vals = Vec::with_capacity(nnz);
    for &(u, i) in interactions {
        let item_node = (num_users + i as usize) as u32;
        let norm = 1.0 / ((user_deg[u as usize] * item_deg[i as usize]) as f32).sqrt();
        rows.push(u);
        cols.push(item_node);
        vals.push(norm);
        rows.push(item_node);
        cols.push(u);
        vals.push(norm);
    }
    SparseMatrix::new(n, n, rows, cols, vals)
}

/// The dataset collaborator: entity counts and the normalized graph.
///
/// Must remain stable for the lifetime of a model instance.
pub trait InteractionDataset {
    /// Number of users.
    fn num_users(&self) -> usize;
    /// Number of items.
    fn num_items(&self) -> usize;
    /// The normalized bipartite adjacency, whole or pre-split.
    fn sparse_graph(&self) -> Result<Adjacency>;
}

/// In-memory dataset over an explicit interaction list.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    num_users: usize,
    num_items: usize,
    interactions: Vec<(u32, u32)>,
    n_folds: Option<usize>,
}

impl InMemoryDataset {
    /// Create from raw (user, item) interactions.
    pub fn new(num_users: usize, num_items: usize, interactions: Vec<(u32, u32)>) -> Self {
        Self {
            num_users,
            num_items,
            interactions,
            n_folds: None,
        }
    }

    /// Split the adjacency into `n_folds` row folds.
    pub fn with_split(mut self, n_folds: usize) -> Self {
        self.n_folds = Some(n_folds);
        self
    }

    /// The raw interaction list.
    pub fn interactions(&self) -> &[(u32, u32)] {
        &self.interactions
    }
}

impl InteractionDataset for InMemoryDataset {
    fn num_users(&self) -> usize {
        self.num_users
    }

    fn num_items(&self) -> usize {
        self.num_items
    }

    fn sparse_graph(&self) -> Result<Adjacency> {
        let adj = normalized_adjacency(self.num_users, self.num_items, &self.interactions)?;
        match self.n_folds {
            Some(n) => Ok(Adjacency::Split(adj.split_folds(n)?)),
            None => Ok(Adjacency::Single(adj)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    fn toy_interactions() -> Vec<(u32, u32)> {
        // 3 users, 5 items
        vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 3), (2, 4), (0, 4)]
    }

    #[test]
    fn test_normalized_adjacency_entries() {
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        assert_eq!(adj.shape(), (8, 8));
        assert_eq!(adj.nnz(), 14);

        // user 0 has degree 3, item 0 has degree 1: weight 1/sqrt(3)
        let dense = adj.to_dense(&Device::Cpu).unwrap().to_vec2::<f32>().unwrap();
        let expected = 1.0 / 3f32.sqrt();
        assert!((dense[0][3] - expected).abs() < 1e-6);
        // symmetric
        assert!((dense[3][0] - expected).abs() < 1e-6);
        // user-user block is zero
        assert_eq!(dense[0][1], 0.0);
    }

    #[test]
    fn test_matmul_matches_dense() {
        let device = Device::Cpu;
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let x = Tensor::from_slice(
            &(0..8 * 4).map(|v| v as f32 * 0.01).collect::<Vec<_>>(),
            (8, 4),
            &device,
        )
        .unwrap();

        let sparse = adj.matmul(&x).unwrap().to_vec2::<f32>().unwrap();
        let dense = adj
            .to_dense(&device)
            .unwrap()
            .matmul(&x)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();

        for (rs, rd) in sparse.iter().zip(dense.iter()) {
            for (a, b) in rs.iter().zip(rd.iter()) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_matmul_rejects_wrong_operand_height() {
        let device = Device::Cpu;
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let x = Tensor::zeros((7, 4), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(
            adj.matmul(&x),
            Err(Error::DimensionMismatch { expected: 8, got: 7 })
        ));
    }

    #[test]
    fn test_split_folds_cover_rows_in_order() {
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let folds = adj.split_folds(3).unwrap();
        let total: usize = folds.iter().map(|f| f.shape().0).sum();
        assert_eq!(total, 8);
        assert_eq!(
            folds.iter().map(|f| f.nnz()).sum::<usize>(),
            adj.nnz()
        );
        // all folds keep the full column dimension
        for fold in &folds {
            assert_eq!(fold.shape().1, 8);
        }
    }

    #[test]
    fn test_split_matmul_equals_single() {
        let device = Device::Cpu;
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let x = Tensor::from_slice(
            &(0..8 * 4).map(|v| (v as f32 * 0.37).sin()).collect::<Vec<_>>(),
            (8, 4),
            &device,
        )
        .unwrap();

        let whole = Adjacency::Single(adj.clone()).matmul(&x).unwrap();
        let split = Adjacency::Split(adj.split_folds(3).unwrap())
            .matmul(&x)
            .unwrap();

        let a = whole.to_vec2::<f32>().unwrap();
        let b = split.to_vec2::<f32>().unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert!((va - vb).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_dropout_keep_all() {
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let dropped = adj.dropout(1.0, &mut rng);
        assert_eq!(dropped.nnz(), adj.nnz());
        for k in 0..adj.nnz() {
            assert_eq!(dropped.rows[k], adj.rows[k]);
            assert_eq!(dropped.cols[k], adj.cols[k]);
            assert!((dropped.vals[k] - adj.vals[k]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_dropout_rescales_kept_entries() {
        let adj = normalized_adjacency(3, 5, &toy_interactions()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let keep = 0.5f32;
        let dropped = adj.dropout(keep, &mut rng);
        assert!(dropped.nnz() <= adj.nnz());
        for &v in &dropped.vals {
            // every kept value is some original value divided by keep_prob
            let matched = adj
                .vals
                .iter()
                .any(|&orig| (orig / keep - v).abs() < 1e-6);
            assert!(matched);
        }
    }

    #[test]
    fn test_out_of_range_interaction_rejected() {
        assert!(normalized_adjacency(3, 5, &[(3, 0)]).is_err());
        assert!(normalized_adjacency(3, 5, &[(0, 5)]).is_err());
    }
}
