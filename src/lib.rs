//! Graph-convolutional collaborative filtering.
//!
//! `grafene-rec` implements LightGCN ([He et al. 2020](https://arxiv.org/abs/2002.02126))
//! on top of [candle](https://github.com/huggingface/candle): trainable user
//! and item embeddings, sparse propagation over the normalized interaction
//! graph, and BPR ranking ([Rendle et al. 2009](https://arxiv.org/abs/1205.2618)).
//!
//! ## The Core Idea
//!
//! Classic matrix factorization scores a (user, item) pair from two learned
//! vectors. LightGCN refines those vectors by **averaging them with their
//! graph neighborhood** before scoring: a user's representation absorbs the
//! items they interacted with, those items absorb their other users, and so
//! on for `n_layers` hops.
//!
//! ```text
//!   E^(l+1) = A_hat * E^(l)          one propagation layer
//!   E_final = mean(E^(0) .. E^(L))   mean over the layer stack
//! ```
//!
//! `A_hat` is the symmetric degree-normalized bipartite adjacency. There
//! are no feature transforms or nonlinearities between layers; all
//! capacity lives in the layer-0 embeddings.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`graph`] | Sparse normalized adjacency, folds, dropout, datasets |
//! | [`embedding`] | Trainable ego embeddings with pluggable init |
//! | [`propagate`] | Layer-wise propagation and layer averaging |
//! | [`scoring`] | Dot and stacked-linear scoring heads |
//! | [`model`] | [`LightGcn`], the [`PureMf`] baseline, BPR loss |
//! | [`training`] | Uniform BPR sampling and the AdamW loop |
//! | [`evaluation`] | Masked top-k recall / precision / NDCG |
//!
//! ## Example
//!
//! ```no_run
//! use candle_core::Device;
//! use grafene_rec::{
//!     evaluate_topk, BprTrainer, EmbeddingInit, InMemoryDataset, LightGcn,
//!     ModelConfig, TrainingConfig,
//! };
//!
//! # fn main() -> grafene_rec::Result<()> {
//! let train = InMemoryDataset::new(3, 5, vec![(0, 0), (0, 1), (1, 2), (2, 3)]);
//! let test = InMemoryDataset::new(3, 5, vec![(0, 4), (2, 4)]);
//!
//! let config = ModelConfig::default().with_latent_dim(16).with_n_layers(2);
//! let mut model = LightGcn::from_dataset(
//!     config,
//!     &train,
//!     EmbeddingInit::default(),
//!     &Device::Cpu,
//! )?;
//!
//! let trainer = BprTrainer::new(TrainingConfig::default().with_epochs(20));
//! trainer.fit(&mut model, &train)?;
//!
//! let metrics = evaluate_topk(&model, &train, &test, 2, 64)?;
//! eprintln!("{metrics}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod graph;
pub mod model;
pub mod propagate;
pub mod scoring;
pub mod training;

pub use config::{HeadKind, ModelConfig};
pub use embedding::{EmbeddingInit, EmbeddingStore, Entity};
pub use error::{Error, Result};
pub use evaluation::{evaluate_topk, TopKMetrics};
pub use graph::{
    normalized_adjacency, Adjacency, InMemoryDataset, InteractionDataset, SparseMatrix,
};
pub use model::{BprLoss, LightGcn, PairwiseModel, PureMf};
pub use propagate::Propagator;
pub use scoring::{softplus, ScoringHead};
pub use training::{BprTrainer, TrainingConfig, UniformSampler};
