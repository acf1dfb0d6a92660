//! Trainable user and item embeddings.
//!
//! The store owns the layer-0 ("ego") embedding matrices as
//! [`candle_core::Var`]s. Lookups go through `index_select`, so gradients
//! flow back to the variables; the surrounding optimizer updates them
//! between forward/backward passes.

use candle_core::{DType, Device, Tensor, Var};

use crate::error::{Error, Result};

/// Entity type selector for embedding lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Item,
}

/// Initialization strategy, chosen once at construction.
#[derive(Debug, Clone)]
pub enum EmbeddingInit {
    /// Each element drawn independently from normal(0, std).
    Normal {
        /// Standard deviation (the reference implementation uses 0.1).
        std: f64,
    },
    /// Externally supplied pretrained matrices, copied verbatim.
    Pretrained {
        /// User matrix, shape `(num_users, latent_dim)`.
        users: Tensor,
        /// Item matrix, shape `(num_items, latent_dim)`.
        items: Tensor,
    },
}

impl Default for EmbeddingInit {
    fn default() -> Self {
        Self::Normal { std: 0.1 }
    }
}

/// Trainable embedding matrices for both entity types.
#[derive(Debug)]
pub struct EmbeddingStore {
    users: Var,
    items: Var,
    latent_dim: usize,
}

impl EmbeddingStore {
    /// Allocate and initialize both matrices.
    pub fn new(
        num_users: usize,
        num_items: usize,
        latent_dim: usize,
        init: EmbeddingInit,
        device: &Device,
    ) -> Result<Self> {
        let (users, items) = match init {
            EmbeddingInit::Normal { std } => (
                Var::randn(0f32, std as f32, (num_users, latent_dim), device)?,
                Var::randn(0f32, std as f32, (num_items, latent_dim), device)?,
            ),
            EmbeddingInit::Pretrained { users, items } => {
                check_shape(&users, num_users, latent_dim)?;
                check_shape(&items, num_items, latent_dim)?;
                (
                    Var::from_tensor(&users.to_dtype(DType::F32)?.to_device(device)?)?,
                    Var::from_tensor(&items.to_dtype(DType::F32)?.to_device(device)?)?,
                )
            }
        };
        Ok(Self {
            users,
            items,
            latent_dim,
        })
    }

    /// Embedding width.
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Row count for an entity type.
    pub fn count(&self, entity: Entity) -> usize {
        match entity {
            Entity::User => self.users.dims()[0],
            Entity::Item => self.items.dims()[0],
        }
    }

    /// Gradient-trackable lookup: rows of the ego matrix for the given
    /// indices, shape `(indices.len(), latent_dim)`.
    pub fn embedding(&self, entity: Entity, indices: &[u32]) -> Result<Tensor> {
        let weights = self.weights(entity);
        let idx = Tensor::from_slice(indices, indices.len(), weights.device())?;
        Ok(weights.index_select(&idx, 0)?)
    }

    /// The full ego matrix for an entity type.
    pub fn weights(&self, entity: Entity) -> Tensor {
        match entity {
            Entity::User => self.users.as_tensor().clone(),
            Entity::Item => self.items.as_tensor().clone(),
        }
    }

    /// Users and items concatenated along the node axis: the layer-0
    /// matrix of the propagation, shape `(num_users + num_items, latent_dim)`.
    pub fn stacked(&self) -> Result<Tensor> {
        Ok(Tensor::cat(&[self.users.as_tensor(), self.items.as_tensor()], 0)?)
    }

    /// Trainable variables, for the external optimizer.
    pub fn vars(&self) -> Vec<Var> {
        vec![self.users.clone(), self.items.clone()]
    }
}

fn check_shape(t: &Tensor, rows: usize, cols: usize) -> Result<()> {
    let (r, c) = t.dims2()?;
    if r != rows {
        return Err(Error::DimensionMismatch {
            expected: rows,
            got: r,
        });
    }
    if c != cols {
        return Err(Error::DimensionMismatch {
            expected: cols,
            got: c,
        });
    }
    Ok(())
}
