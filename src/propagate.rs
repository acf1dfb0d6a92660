//! LightGCN layer-wise propagation.
//!
//! Each layer multiplies the normalized adjacency by the previous layer's
//! node matrix; the final representation is the element-wise mean over all
//! layers including layer 0. Averaging the layer stack, rather than taking
//! the last layer, is LightGCN's defining choice: multi-hop signal without
//! over-smoothing.
//!
//! # Reference
//!
//! He et al., "LightGCN: Simplifying and Powering Graph Convolution
//! Network for Recommendation", SIGIR 2020.

use candle_core::Tensor;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::graph::Adjacency;

/// Propagates ego embeddings over the interaction graph.
///
/// Holds only the immutable adjacency and the propagation hyperparameters;
/// each call reads the current ego matrix and produces fresh layer outputs.
#[derive(Debug)]
pub struct Propagator {
    graph: Adjacency,
    n_layers: usize,
    dropout: bool,
    keep_prob: f32,
}

impl Propagator {
    /// Create a propagator over a normalized adjacency.
    pub fn new(graph: Adjacency, n_layers: usize, dropout: bool, keep_prob: f32) -> Self {
        Self {
            graph,
            n_layers,
            dropout,
            keep_prob,
        }
    }

    /// Propagation depth.
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    /// Node count of the underlying graph.
    pub fn n_nodes(&self) -> usize {
        self.graph.n_nodes()
    }

    /// Run the propagation over a stacked `(n_nodes, latent_dim)` ego
    /// matrix and return the mean over all `n_layers + 1` layer outputs.
    ///
    /// `dropout_rng` is `Some` only in training mode; when dropout is
    /// enabled a fresh mask is drawn from it per call, so successive calls
    /// see independent masks. Evaluation passes `None` and always uses the
    /// undropped adjacency.
    pub fn propagate(&self, ego: &Tensor, dropout_rng: Option<&mut StdRng>) -> Result<Tensor> {
        let (n, _) = ego.dims2()?;
        if n != self.graph.n_nodes() {
            return Err(Error::DimensionMismatch {
                expected: self.graph.n_nodes(),
                got: n,
            });
        }

        let dropped;
        let graph = match dropout_rng {
            Some(rng) if self.dropout => {
                dropped = self.graph.dropout(self.keep_prob, rng);
                &dropped
            }
            _ => &self.graph,
        };

        let mut layer = ego.clone();
        let mut layers = vec![layer.clone()];
        for _ in 0..self.n_layers {
            layer = graph.matmul(&layer)?;
            layers.push(layer.clone());
        }
        let stacked = Tensor::stack(&layers, 1)?;
        Ok(stacked.mean(1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::normalized_adjacency;
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy_graph() -> Adjacency {
        let interactions = vec![(0, 0), (0, 1), (1, 1), (1, 2), (2, 3), (2, 4), (0, 4)];
        Adjacency::Single(normalized_adjacency(3, 5, &interactions).unwrap())
    }

    fn ego(device: &Device) -> Tensor {
        let data: Vec<f32> = (0..8 * 4).map(|v| (v as f32 * 0.13).cos()).collect();
        Tensor::from_slice(&data, (8, 4), device).unwrap()
    }

    #[test]
    fn test_zero_layers_is_identity() {
        let device = Device::Cpu;
        let prop = Propagator::new(toy_graph(), 0, false, 1.0);
        let x = ego(&device);
        let out = prop.propagate(&x, None).unwrap();

        let a = x.to_vec2::<f32>().unwrap();
        let b = out.to_vec2::<f32>().unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert!((va - vb).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn test_output_shape() {
        let device = Device::Cpu;
        for n_layers in 0..4 {
            let prop = Propagator::new(toy_graph(), n_layers, false, 1.0);
            let out = prop.propagate(&ego(&device), None).unwrap();
            assert_eq!(out.dims(), &[8, 4]);
        }
    }

    #[test]
    fn test_eval_mode_deterministic() {
        let device = Device::Cpu;
        let prop = Propagator::new(toy_graph(), 3, true, 0.5);
        let x = ego(&device);
        let a = prop.propagate(&x, None).unwrap().to_vec2::<f32>().unwrap();
        let b = prop.propagate(&x, None).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_keep_prob_one_matches_no_dropout() {
        let device = Device::Cpu;
        let x = ego(&device);
        let with = Propagator::new(toy_graph(), 2, true, 1.0);
        let without = Propagator::new(toy_graph(), 2, false, 1.0);

        let mut rng = StdRng::seed_from_u64(3);
        let a = with
            .propagate(&x, Some(&mut rng))
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        let b = without.propagate(&x, None).unwrap().to_vec2::<f32>().unwrap();
        for (ra, rb) in a.iter().zip(b.iter()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert!((va - vb).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn test_wrong_node_count_rejected() {
        let device = Device::Cpu;
        let prop = Propagator::new(toy_graph(), 2, false, 1.0);
        let x = Tensor::zeros((7, 4), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(
            prop.propagate(&x, None),
            Err(Error::DimensionMismatch { expected: 8, got: 7 })
        ));
    }
}
