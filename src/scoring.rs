//! Scoring heads over final user/item representations.
//!
//! Every variant consumes the element-wise product `u * i` alongside the
//! raw pair, injecting an explicit interaction feature rather than relying
//! on propagation depth alone:
//!
//! | Variant | Input | Output |
//! |---------|-------|--------|
//! | `Dot` | `(u, i)` | raw `sum(u * i)` |
//! | `Linear1` | `[u, i, u*i]` (3d) | `sigmoid(W1 v)` |
//! | `Linear2` | `[u, i, u*i]` (3d) | `sigmoid(W1 sigmoid(W2 v))` |
//! | `Linear3` | `[u, i, u*i]` (3d) | `sigmoid(W1 sigmoid(W2 sigmoid(W3 v)))` |
//!
//! The dot variant stays unsquashed here: the ranking loss consumes the
//! raw inner product and only the rating path applies the logistic squash.
//! Nonlinear variants squash internally, in both paths.

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::ops::sigmoid;
use candle_nn::{Linear, Module};

use crate::config::HeadKind;
use crate::error::Result;

/// Numerically stable softplus: `max(x, 0) + ln(1 + e^{-|x|})`.
///
/// `mean(softplus(neg - pos))` is the BPR surrogate, equivalent to the mean
/// negative log-sigmoid of the score margin.
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let linear_part = x.relu()?;
    let log_part = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    Ok((linear_part + log_part)?)
}

/// One trainable projection with a normal(0, std) weight and zero bias.
#[derive(Debug)]
pub struct DenseLayer {
    weight: Var,
    bias: Var,
    linear: Linear,
}

impl DenseLayer {
    fn new(in_dim: usize, out_dim: usize, init_std: f64, device: &Device) -> Result<Self> {
        let weight = Var::randn(0f32, init_std as f32, (out_dim, in_dim), device)?;
        let bias = Var::zeros(out_dim, DType::F32, device)?;
        let linear = Linear::new(weight.as_tensor().clone(), Some(bias.as_tensor().clone()));
        Ok(Self {
            weight,
            bias,
            linear,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.linear.forward(x)?)
    }

    /// Squared Frobenius norm of the weight matrix. Biases are excluded
    /// from regularization, matching the reference implementation.
    fn weight_sq_norm(&self) -> Result<Tensor> {
        Ok(self.weight.as_tensor().sqr()?.sum_all()?)
    }
}

/// Tagged scoring head, selected once at construction and dispatched
/// through [`ScoringHead::score`].
#[derive(Debug)]
pub enum ScoringHead {
    /// Raw inner product.
    Dot,
    /// `3d -> 1`.
    Linear1 { out: DenseLayer },
    /// `3d -> d -> 1`.
    Linear2 { hidden: DenseLayer, out: DenseLayer },
    /// `3d -> d -> d -> 1`.
    Linear3 {
        hidden2: DenseLayer,
        hidden: DenseLayer,
        out: DenseLayer,
    },
}

impl ScoringHead {
    /// Build the head for a variant. All projection weights use the same
    /// normal(0, init_std) policy as the embeddings, independent of whether
    /// the embeddings themselves were pretrained.
    pub fn new(kind: HeadKind, latent_dim: usize, init_std: f64, device: &Device) -> Result<Self> {
        let d = latent_dim;
        Ok(match kind {
            HeadKind::Dot => Self::Dot,
            HeadKind::Linear1 => Self::Linear1 {
                out: DenseLayer::new(3 * d, 1, init_std, device)?,
            },
            HeadKind::Linear2 => Self::Linear2 {
                hidden: DenseLayer::new(3 * d, d, init_std, device)?,
                out: DenseLayer::new(d, 1, init_std, device)?,
            },
            HeadKind::Linear3 => Self::Linear3 {
                hidden2: DenseLayer::new(3 * d, d, init_std, device)?,
                hidden: DenseLayer::new(d, d, init_std, device)?,
                out: DenseLayer::new(d, 1, init_std, device)?,
            },
        })
    }

    /// The variant tag.
    pub fn kind(&self) -> HeadKind {
        match self {
            Self::Dot => HeadKind::Dot,
            Self::Linear1 { .. } => HeadKind::Linear1,
            Self::Linear2 { .. } => HeadKind::Linear2,
            Self::Linear3 { .. } => HeadKind::Linear3,
        }
    }

    /// Score a batch of (user, item) representation pairs, one scalar per
    /// row. Differentiable end-to-end.
    pub fn score(&self, users: &Tensor, items: &Tensor) -> Result<Tensor> {
        match self {
            Self::Dot => Ok((users * items)?.sum(D::Minus1)?),
            Self::Linear1 { out } => {
                let v = pair_features(users, items)?;
                Ok(sigmoid(&out.forward(&v)?)?.squeeze(D::Minus1)?)
            }
            Self::Linear2 { hidden, out } => {
                let v = pair_features(users, items)?;
                let h = sigmoid(&hidden.forward(&v)?)?;
                Ok(sigmoid(&out.forward(&h)?)?.squeeze(D::Minus1)?)
            }
            Self::Linear3 {
                hidden2,
                hidden,
                out,
            } => {
                let v = pair_features(users, items)?;
                let h2 = sigmoid(&hidden2.forward(&v)?)?;
                let h = sigmoid(&hidden.forward(&h2)?)?;
                Ok(sigmoid(&out.forward(&h)?)?.squeeze(D::Minus1)?)
            }
        }
    }

    /// Sum of squared weight matrices for every projection the head owns,
    /// or `None` for the dot variant. The ranking loss scales this by
    /// `1/(2 * batch)` alongside the embedding norms.
    pub fn weight_penalty(&self) -> Result<Option<Tensor>> {
        match self {
            Self::Dot => Ok(None),
            Self::Linear1 { out } => Ok(Some(out.weight_sq_norm()?)),
            Self::Linear2 { hidden, out } => {
                let sum = (hidden.weight_sq_norm()? + out.weight_sq_norm()?)?;
                Ok(Some(sum))
            }
            Self::Linear3 {
                hidden2,
                hidden,
                out,
            } => {
                let sum = ((hidden2.weight_sq_norm()? + hidden.weight_sq_norm()?)?
                    + out.weight_sq_norm()?)?;
                Ok(Some(sum))
            }
        }
    }

    /// Trainable variables, for the external optimizer.
    pub fn vars(&self) -> Vec<Var> {
        let layers: Vec<&DenseLayer> = match self {
            Self::Dot => vec![],
            Self::Linear1 { out } => vec![out],
            Self::Linear2 { hidden, out } => vec![hidden, out],
            Self::Linear3 {
                hidden2,
                hidden,
                out,
            } => vec![hidden2, hidden, out],
        };
        layers
            .into_iter()
            .flat_map(|l| [l.weight.clone(), l.bias.clone()])
            .collect()
    }
}

/// `[u, i, u*i]` along the feature axis: `(batch, 3 * latent_dim)`.
fn pair_features(users: &Tensor, items: &Tensor) -> Result<Tensor> {
    let product = (users * items)?;
    Ok(Tensor::cat(&[users, items, &product], D::Minus1)?)
}
