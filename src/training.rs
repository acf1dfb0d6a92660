//! BPR training loop.
//!
//! One epoch draws `|interactions|` uniform (user, pos, neg) triples,
//! shuffles them, and steps AdamW over mini-batches of the combined loss
//! `ranking + decay * reg`. Weight decay inside the optimizer stays off;
//! the L2 term is part of the loss so it scales with the batch like the
//! reference implementation.

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::graph::InMemoryDataset;
use crate::model::PairwiseModel;

/// Training hyperparameters.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// AdamW learning rate (default: 0.001).
    pub learning_rate: f64,
    /// Coefficient on the L2 term (default: 1e-4).
    pub decay: f64,
    /// Number of epochs (default: 100).
    pub epochs: usize,
    /// Triples per optimizer step (default: 2048).
    pub batch_size: usize,
    /// Seed for the sampling stream (default: 2020).
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            decay: 1e-4,
            epochs: 100,
            batch_size: 2048,
            seed: 2020,
        }
    }
}

impl TrainingConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Uniform negative sampler over a training interaction set.
///
/// Each draw picks a random user among those with at least one positive, a
/// random positive of that user, and rejection-samples a negative item the
/// user has not interacted with.
#[derive(Debug)]
pub struct UniformSampler {
    positives: Vec<Vec<u32>>,
    active_users: Vec<u32>,
    num_items: usize,
    n_interactions: usize,
}

impl UniformSampler {
    /// Build from a training dataset. Fails on an empty interaction list
    /// and on a dataset where every item is positive for some user, since
    /// no negative can then be drawn for that user.
    pub fn new(dataset: &InMemoryDataset) -> Result<Self> {
        use crate::graph::InteractionDataset;

        if dataset.interactions().is_empty() {
            return Err(Error::EmptyBatch);
        }
        let mut positives = vec![Vec::new(); dataset.num_users()];
        for &(u, i) in dataset.interactions() {
            positives[u as usize].push(i);
        }
        for items in &mut positives {
            items.sort_unstable();
            items.dedup();
        }
        let active_users: Vec<u32> = positives
            .iter()
            .enumerate()
            .filter(|(_, items)| !items.is_empty())
            .map(|(u, _)| u as u32)
            .collect();
        for &u in &active_users {
            if positives[u as usize].len() >= dataset.num_items() {
                return Err(Error::InvalidConfig(format!(
                    "user {u} has no negative items to sample"
                )));
            }
        }
        Ok(Self {
            positives,
            active_users,
            num_items: dataset.num_items(),
            n_interactions: dataset.interactions().len(),
        })
    }

    /// Number of triples one epoch draws.
    pub fn epoch_len(&self) -> usize {
        self.n_interactions
    }

    /// Draw one (user, pos, neg) triple.
    pub fn sample(&self, rng: &mut StdRng) -> (u32, u32, u32) {
        let u = self.active_users[rng.random_range(0..self.active_users.len())];
        let pos_items = &self.positives[u as usize];
        let pos = pos_items[rng.random_range(0..pos_items.len())];
        let neg = loop {
            let candidate = rng.random_range(0..self.num_items as u32);
            if pos_items.binary_search(&candidate).is_err() {
                break candidate;
            }
        };
        (u, pos, neg)
    }

    /// Draw and shuffle a full epoch of triples.
    pub fn epoch(&self, rng: &mut StdRng) -> Vec<(u32, u32, u32)> {
        let mut triples: Vec<(u32, u32, u32)> = (0..self.epoch_len())
            .map(|_| self.sample(rng))
            .collect();
        triples.shuffle(rng);
        triples
    }
}

/// Runs BPR epochs over a [`PairwiseModel`].
#[derive(Debug)]
pub struct BprTrainer {
    config: TrainingConfig,
}

impl BprTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Train the model in place and return the mean combined loss per
    /// epoch. The model is put in training mode for the duration and
    /// restored to evaluation mode before returning.
    pub fn fit<M: PairwiseModel>(
        &self,
        model: &mut M,
        dataset: &InMemoryDataset,
    ) -> Result<Vec<f32>> {
        let sampler = UniformSampler::new(dataset)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(model.trainable_vars(), params)?;

        model.set_training(true);
        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let triples = sampler.epoch(&mut rng);
            let mut epoch_loss = 0.0f32;
            let mut n_batches = 0usize;
            for batch in triples.chunks(self.config.batch_size) {
                let users: Vec<u32> = batch.iter().map(|t| t.0).collect();
                let pos: Vec<u32> = batch.iter().map(|t| t.1).collect();
                let neg: Vec<u32> = batch.iter().map(|t| t.2).collect();

                let loss = model.bpr_loss(&users, &pos, &neg)?;
                let combined = (loss.ranking + loss.reg.affine(self.config.decay, 0.0)?)?;
                optimizer.backward_step(&combined)?;

                epoch_loss += combined.to_scalar::<f32>()?;
                n_batches += 1;
            }
            let mean = epoch_loss / n_batches.max(1) as f32;
            history.push(mean);
            if epoch % 10 == 0 {
                eprintln!(
                    "epoch {}/{}: loss = {:.6}",
                    epoch + 1,
                    self.config.epochs,
                    mean
                );
            }
        }
        model.set_training(false);
        Ok(history)
    }
}
