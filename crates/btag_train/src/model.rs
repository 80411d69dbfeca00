//! Reference two-input, two-output flavour tagger.
//!
//! ```text
//! tracks   [b, capacity, k_t] -> GRU(5) -> last step [b, 5] --+
//!                                                             |-> concat -> Dense(10, relu) -+-> flavor [b, classes] (softmax)
//! vertices [b, k_j] ------------------------------------------+                              +-> charge [b]
//! ```
//!
//! The flavour head is trained with categorical cross-entropy against the
//! one-hot labels, the charge head with mean squared error against the
//! auxiliary target; the two losses are summed with equal weight.

use crate::contract::TensorContract;
use crate::trainer::{StepMetrics, Trainer};
use anyhow::{ensure, Result};
use btag_data::Batch;
use tch::nn::{self, Module, OptimizerConfig, RNN};
use tch::{Device, Kind, Reduction, Tensor};
use tracing::debug;

/// Layer sizes and optimiser settings of [`FlavorTagger`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaggerConfig {
    /// Hidden size of the GRU summarising the track sequence
    pub gru_hidden: i64,
    /// Width of the shared dense layer
    pub dense_units: i64,
    /// Adam learning rate
    pub learning_rate: f64,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            gru_hidden: 5,
            dense_units: 10,
            learning_rate: 1e-3,
        }
    }
}

pub struct FlavorTagger {
    contract: TensorContract,
    device: Device,
    // Owns the parameters referenced by the layers below
    _vs: nn::VarStore,
    gru: nn::GRU,
    dense: nn::Linear,
    flavor_head: nn::Linear,
    charge_head: nn::Linear,
    optimizer: nn::Optimizer,
}

impl FlavorTagger {
    pub fn new(contract: TensorContract, device: Device) -> Result<Self> {
        Self::with_config(contract, &TaggerConfig::default(), device)
    }

    pub fn with_config(
        contract: TensorContract,
        config: &TaggerConfig,
        device: Device,
    ) -> Result<Self> {
        ensure!(
            contract.tracks[0] > 0,
            "the track input needs at least one slot per event"
        );
        ensure!(
            contract.num_track_features() > 0 && contract.num_jet_features() > 0,
            "both model inputs need at least one feature"
        );
        ensure!(
            contract.num_classes() > 0,
            "the flavor head needs at least one class"
        );

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let gru = nn::gru(
            &root / "tracks_gru",
            contract.num_track_features(),
            config.gru_hidden,
            nn::RNNConfig {
                batch_first: true,
                ..Default::default()
            },
        );
        let dense = nn::linear(
            &root / "dense",
            config.gru_hidden + contract.num_jet_features(),
            config.dense_units,
            Default::default(),
        );
        let flavor_head = nn::linear(
            &root / "flavor",
            config.dense_units,
            contract.num_classes(),
            Default::default(),
        );
        let charge_head = nn::linear(&root / "charge", config.dense_units, 1, Default::default());
        let optimizer = nn::Adam::default().build(&vs, config.learning_rate)?;

        Ok(Self {
            contract,
            device,
            _vs: vs,
            gru,
            dense,
            flavor_head,
            charge_head,
            optimizer,
        })
    }

    /// Returns `(flavor logits [b, classes], charge [b])`.
    pub fn forward(&self, tracks: &Tensor, vertices: &Tensor) -> (Tensor, Tensor) {
        let tracks = tracks.to_kind(Kind::Float).to_device(self.device);
        let vertices = vertices.to_kind(Kind::Float).to_device(self.device);

        let (sequence, _) = self.gru.seq(&tracks);
        let summary = sequence.select(1, -1);
        let hidden = self
            .dense
            .forward(&Tensor::cat(&[summary, vertices], 1))
            .relu();

        let logits = self.flavor_head.forward(&hidden);
        let charge = self.charge_head.forward(&hidden).squeeze_dim(1);
        (logits, charge)
    }

    /// Class probabilities and charge predictions for a batch, without
    /// tracking gradients.
    pub fn predict(&self, batch: &Batch) -> (Tensor, Tensor) {
        tch::no_grad(|| {
            let (tracks, vertices) = batch.inputs();
            let (logits, charge) = self.forward(tracks, vertices);
            (logits.softmax(-1, Kind::Float), charge)
        })
    }
}

impl Trainer for FlavorTagger {
    fn contract(&self) -> &TensorContract {
        &self.contract
    }

    fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics> {
        let (tracks, vertices) = batch.inputs();
        let (labels, charge_target) = batch.targets();
        let labels = labels.to_kind(Kind::Float).to_device(self.device);
        let charge_target = charge_target.to_kind(Kind::Float).to_device(self.device);

        let (logits, charge) = self.forward(tracks, vertices);

        // All-zero label rows contribute no flavour loss
        let flavor_loss = -(logits.log_softmax(-1, Kind::Float) * &labels)
            .sum_dim_intlist([1i64].as_slice(), false, Kind::Float)
            .mean(Kind::Float);
        let charge_loss = charge.mse_loss(&charge_target, Reduction::Mean);
        let loss = &flavor_loss + &charge_loss;
        self.optimizer.backward_step(&loss);

        let labelled = labels.sum_dim_intlist([1i64].as_slice(), false, Kind::Float).gt(0.0);
        let hits = logits
            .argmax(-1, false)
            .eq_tensor(&labels.argmax(-1, false))
            .logical_and(&labelled);
        let accuracy = hits.to_kind(Kind::Float).mean(Kind::Float);

        let metrics = StepMetrics {
            loss: loss.double_value(&[]),
            flavor_loss: flavor_loss.double_value(&[]),
            charge_loss: charge_loss.double_value(&[]),
            flavor_accuracy: accuracy.double_value(&[]),
        };
        debug!(start = batch.start, loss = metrics.loss, "optimizer step");
        Ok(metrics)
    }
}
