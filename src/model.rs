//! Pairwise ranking models: LightGCN and a matrix-factorization baseline.
//!
//! Both models implement [`PairwiseModel`]: a BPR loss for training and a
//! dense rating matrix for evaluation. The abstraction is at the model
//! level; each implementation keeps its tensors and scoring head internal.
//!
//! # References
//!
//! - He et al. (2020). "LightGCN: Simplifying and Powering Graph
//!   Convolution Network for Recommendation." SIGIR.
//! - Rendle et al. (2009). "BPR: Bayesian Personalized Ranking from
//!   Implicit Feedback." UAI.

use candle_core::{Device, Tensor, Var, D};
use candle_nn::ops::sigmoid;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{HeadKind, ModelConfig};
use crate::embedding::{EmbeddingInit, EmbeddingStore, Entity};
use crate::error::{Error, Result};
use crate::graph::{Adjacency, InteractionDataset};
use crate::propagate::Propagator;
use crate::scoring::{softplus, ScoringHead};

/// The two unscaled components of the BPR objective. The caller combines
/// them as `ranking + lambda * reg`.
#[derive(Debug)]
pub struct BprLoss {
    /// `mean(softplus(neg_score - pos_score))`, a scalar tensor.
    pub ranking: Tensor,
    /// L2 term over the batch's ego embeddings (and head weights for
    /// nonlinear variants), a scalar tensor.
    pub reg: Tensor,
}

/// A model trainable with pairwise ranking and usable as a rating oracle.
pub trait PairwiseModel {
    /// Compute the BPR loss components for equal-length index batches of
    /// users, positive items and negative items.
    fn bpr_loss(&mut self, users: &[u32], pos: &[u32], neg: &[u32]) -> Result<BprLoss>;

    /// Dense rating matrix `(users.len(), num_items)` for evaluation.
    /// Inference-only; detached from gradient tracking.
    fn users_rating(&self, users: &[u32]) -> Result<Tensor>;

    /// Trainable variables, for the external optimizer.
    fn trainable_vars(&self) -> Vec<Var>;

    /// Number of users.
    fn num_users(&self) -> usize;

    /// Number of items.
    fn num_items(&self) -> usize;

    /// Toggle training mode (controls adjacency dropout). Models without
    /// mode-dependent behavior ignore it.
    fn set_training(&mut self, _training: bool) {}
}

fn check_batch(users: &[u32], pos: &[u32], neg: &[u32]) -> Result<()> {
    if users.is_empty() {
        return Err(Error::EmptyBatch);
    }
    if pos.len() != users.len() {
        return Err(Error::DimensionMismatch {
            expected: users.len(),
            got: pos.len(),
        });
    }
    if neg.len() != users.len() {
        return Err(Error::DimensionMismatch {
            expected: users.len(),
            got: neg.len(),
        });
    }
    Ok(())
}

fn index_rows(t: &Tensor, indices: &[u32]) -> Result<Tensor> {
    let idx = Tensor::from_slice(indices, indices.len(), t.device())?;
    Ok(t.index_select(&idx, 0)?)
}

/// Ego-embedding L2 term: `(||u0||^2 + ||p0||^2 + ||n0||^2)`.
fn ego_sq_norm(u0: &Tensor, p0: &Tensor, n0: &Tensor) -> Result<Tensor> {
    let sum = ((u0.sqr()?.sum_all()? + p0.sqr()?.sum_all()?)? + n0.sqr()?.sum_all()?)?;
    Ok(sum)
}

/// LightGCN: graph-convolutional collaborative filtering.
///
/// Ego embeddings are propagated over the normalized bipartite adjacency;
/// the mean of all layer outputs is the final representation consumed by
/// the scoring head.
#[derive(Debug)]
pub struct LightGcn {
    config: ModelConfig,
    n_users: usize,
    n_items: usize,
    store: EmbeddingStore,
    head: ScoringHead,
    propagator: Propagator,
    training: bool,
    rng: StdRng,
}

impl LightGcn {
    /// Build from explicit counts and a pre-normalized adjacency.
    pub fn new(
        config: ModelConfig,
        n_users: usize,
        n_items: usize,
        graph: Adjacency,
        init: EmbeddingInit,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        if graph.n_nodes() != n_users + n_items {
            return Err(Error::DimensionMismatch {
                expected: n_users + n_items,
                got: graph.n_nodes(),
            });
        }
        let store = EmbeddingStore::new(n_users, n_items, config.latent_dim, init, device)?;
        let head = ScoringHead::new(config.head, config.latent_dim, config.init_std, device)?;
        let propagator = Propagator::new(graph, config.n_layers, config.dropout, config.keep_prob);
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            n_users,
            n_items,
            store,
            head,
            propagator,
            training: false,
            rng,
        })
    }

    /// Build from a dataset collaborator. When `a_split` is set and the
    /// dataset hands back a whole matrix, it is partitioned here into
    /// `n_folds` row folds.
    pub fn from_dataset(
        config: ModelConfig,
        dataset: &impl InteractionDataset,
        init: EmbeddingInit,
        device: &Device,
    ) -> Result<Self> {
        let mut graph = dataset.sparse_graph()?;
        if config.a_split {
            if let Adjacency::Single(m) = &graph {
                graph = Adjacency::Split(m.split_folds(config.n_folds)?);
            }
        }
        Self::new(
            config,
            dataset.num_users(),
            dataset.num_items(),
            graph,
            init,
            device,
        )
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Whether the model is in training mode.
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Final user and item representations in evaluation mode (no
    /// dropout): `(num_users, d)` and `(num_items, d)`, index order
    /// preserved.
    pub fn compute_embeddings(&self) -> Result<(Tensor, Tensor)> {
        let out = self.propagator.propagate(&self.store.stacked()?, None)?;
        self.split_nodes(&out)
    }

    /// Training-mode propagation: draws a fresh dropout mask when dropout
    /// is enabled.
    fn compute_embeddings_train(&mut self) -> Result<(Tensor, Tensor)> {
        let ego = self.store.stacked()?;
        let rng = if self.training {
            Some(&mut self.rng)
        } else {
            None
        };
        let out = self.propagator.propagate(&ego, rng)?;
        self.split_nodes(&out)
    }

    fn split_nodes(&self, all: &Tensor) -> Result<(Tensor, Tensor)> {
        let users = all.narrow(0, 0, self.n_users)?;
        let items = all.narrow(0, self.n_users, self.n_items)?;
        Ok((users, items))
    }
}

impl PairwiseModel for LightGcn {
    fn bpr_loss(&mut self, users: &[u32], pos: &[u32], neg: &[u32]) -> Result<BprLoss> {
        check_batch(users, pos, neg)?;

        let (all_users, all_items) = self.compute_embeddings_train()?;
        let u = index_rows(&all_users, users)?;
        let p = index_rows(&all_items, pos)?;
        let n = index_rows(&all_items, neg)?;

        // Ego embeddings feed only the regularizer, never the scores.
        let u0 = self.store.embedding(Entity::User, users)?;
        let p0 = self.store.embedding(Entity::Item, pos)?;
        let n0 = self.store.embedding(Entity::Item, neg)?;

        let pos_scores = self.head.score(&u, &p)?;
        let neg_scores = self.head.score(&u, &n)?;
        let ranking = softplus(&(neg_scores - pos_scores)?)?.mean_all()?;

        let batch = users.len() as f64;
        let mut sq = ego_sq_norm(&u0, &p0, &n0)?;
        if let Some(w) = self.head.weight_penalty()? {
            sq = (sq + w)?;
        }
        let reg = sq.affine(0.5 / batch, 0.0)?;

        Ok(BprLoss { ranking, reg })
    }

    fn users_rating(&self, users: &[u32]) -> Result<Tensor> {
        let (all_users, all_items) = self.compute_embeddings()?;
        let u = index_rows(&all_users, users)?.detach();
        let items = all_items.detach();

        match self.head.kind() {
            HeadKind::Dot => Ok(sigmoid(&u.matmul(&items.t()?)?)?),
            _ => {
                // One pass over the full catalog per user. Sequential and
                // accuracy-first; callers needing full-catalog throughput
                // should prefer the dot head.
                let (m, d) = items.dims2()?;
                let mut rows = Vec::with_capacity(users.len());
                for r in 0..users.len() {
                    let u_row = u.narrow(0, r, 1)?.broadcast_as((m, d))?.contiguous()?;
                    rows.push(self.head.score(&u_row, &items)?);
                }
                Ok(Tensor::stack(&rows, 0)?)
            }
        }
    }

    fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.store.vars();
        vars.extend(self.head.vars());
        vars
    }

    fn num_users(&self) -> usize {
        self.n_users
    }

    fn num_items(&self) -> usize {
        self.n_items
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Pure matrix factorization: BPR over raw embeddings, dot scoring.
///
/// The baseline from the reference implementation. No propagation, no
/// configurable head; embeddings init normal(0, 1).
#[derive(Debug)]
pub struct PureMf {
    n_users: usize,
    n_items: usize,
    store: EmbeddingStore,
}

impl PureMf {
    /// Build with normal(0, 1) initialized embeddings.
    pub fn new(n_users: usize, n_items: usize, latent_dim: usize, device: &Device) -> Result<Self> {
        let store = EmbeddingStore::new(
            n_users,
            n_items,
            latent_dim,
            EmbeddingInit::Normal { std: 1.0 },
            device,
        )?;
        Ok(Self {
            n_users,
            n_items,
            store,
        })
    }

    /// Build with an explicit initialization strategy.
    pub fn with_init(
        n_users: usize,
        n_items: usize,
        latent_dim: usize,
        init: EmbeddingInit,
        device: &Device,
    ) -> Result<Self> {
        let store = EmbeddingStore::new(n_users, n_items, latent_dim, init, device)?;
        Ok(Self {
            n_users,
            n_items,
            store,
        })
    }
}

impl PairwiseModel for PureMf {
    fn bpr_loss(&mut self, users: &[u32], pos: &[u32], neg: &[u32]) -> Result<BprLoss> {
        check_batch(users, pos, neg)?;

        let u = self.store.embedding(Entity::User, users)?;
        let p = self.store.embedding(Entity::Item, pos)?;
        let n = self.store.embedding(Entity::Item, neg)?;

        let pos_scores = (&u * &p)?.sum(D::Minus1)?;
        let neg_scores = (&u * &n)?.sum(D::Minus1)?;
        let ranking = softplus(&(neg_scores - pos_scores)?)?.mean_all()?;

        let batch = users.len() as f64;
        let reg = ego_sq_norm(&u, &p, &n)?.affine(0.5 / batch, 0.0)?;

        Ok(BprLoss { ranking, reg })
    }

    fn users_rating(&self, users: &[u32]) -> Result<Tensor> {
        let u = self.store.embedding(Entity::User, users)?.detach();
        let items = self.store.weights(Entity::Item).detach();
        Ok(sigmoid(&u.matmul(&items.t()?)?)?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.store.vars()
    }

    fn num_users(&self) -> usize {
        self.n_users
    }

    fn num_items(&self) -> usize {
        self.n_items
    }
}
