//! Model configuration.
//!
//! [`ModelConfig`] is an immutable value passed into each component's
//! constructor; no component reads ambient state. Defaults follow the
//! reference LightGCN hyperparameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scoring head variant, selected once at model construction.
///
/// | Variant | Score function |
/// |---------|---------------|
/// | `Dot` | `sum(u * i)` (raw in the loss, sigmoid on the rating path) |
/// | `Linear1` | `sigmoid(W1 [u, i, u*i])` |
/// | `Linear2` | `sigmoid(W1 sigmoid(W2 [u, i, u*i]))` |
/// | `Linear3` | `sigmoid(W1 sigmoid(W2 sigmoid(W3 [u, i, u*i])))` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HeadKind {
    /// Inner product of user and item representations.
    #[default]
    #[serde(rename = "dot")]
    Dot,
    /// Single linear projection over `[u, i, u*i]`.
    #[serde(rename = "1Linear")]
    Linear1,
    /// Two stacked projections with logistic squashing.
    #[serde(rename = "2Linear")]
    Linear2,
    /// Three stacked projections with logistic squashing.
    #[serde(rename = "3Linear")]
    Linear3,
}

impl FromStr for HeadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dot" => Ok(Self::Dot),
            "1Linear" => Ok(Self::Linear1),
            "2Linear" => Ok(Self::Linear2),
            "3Linear" => Ok(Self::Linear3),
            other => Err(Error::UnknownHead(other.to_string())),
        }
    }
}

impl fmt::Display for HeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dot => "dot",
            Self::Linear1 => "1Linear",
            Self::Linear2 => "2Linear",
            Self::Linear3 => "3Linear",
        };
        f.write_str(name)
    }
}

/// LightGCN model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Embedding width (default: 64).
    pub latent_dim: usize,
    /// Propagation depth (default: 3).
    pub n_layers: usize,
    /// Dropout retention probability in (0, 1] (default: 0.6).
    pub keep_prob: f32,
    /// Whether the adjacency is split into row folds (default: false).
    pub a_split: bool,
    /// Number of folds when `a_split` is set (default: 100).
    pub n_folds: usize,
    /// Enable adjacency dropout during training (default: false).
    pub dropout: bool,
    /// Standard deviation for normal(0, std) weight init (default: 0.1).
    pub init_std: f64,
    /// Scoring head variant (default: dot).
    pub head: HeadKind,
    /// Seed for the dropout mask stream (default: 42).
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            latent_dim: 64,
            n_layers: 3,
            keep_prob: 0.6,
            a_split: false,
            n_folds: 100,
            dropout: false,
            init_std: 0.1,
            head: HeadKind::Dot,
            seed: 42,
        }
    }
}

impl ModelConfig {
    pub fn with_latent_dim(mut self, dim: usize) -> Self {
        self.latent_dim = dim;
        self
    }

    pub fn with_n_layers(mut self, n: usize) -> Self {
        self.n_layers = n;
        self
    }

    pub fn with_keep_prob(mut self, p: f32) -> Self {
        self.keep_prob = p;
        self
    }

    pub fn with_split(mut self, n_folds: usize) -> Self {
        self.a_split = true;
        self.n_folds = n_folds;
        self
    }

    pub fn with_dropout(mut self, on: bool) -> Self {
        self.dropout = on;
        self
    }

    pub fn with_init_std(mut self, std: f64) -> Self {
        self.init_std = std;
        self
    }

    pub fn with_head(mut self, head: HeadKind) -> Self {
        self.head = head;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate ranges that would otherwise fail deep inside a forward pass.
    pub fn validate(&self) -> Result<()> {
        if self.latent_dim == 0 {
            return Err(Error::InvalidConfig("latent_dim must be > 0".into()));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        if self.a_split && self.n_folds == 0 {
            return Err(Error::InvalidConfig("n_folds must be > 0 when a_split is set".into()));
        }
        Ok(())
    }
}
