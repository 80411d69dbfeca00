use crate::contract::TensorContract;
use anyhow::{anyhow, Context, Result};
use btag_data::{Batch, DataError};
use std::ops::AddAssign;
use tracing::{debug, info};

/// Scalar results of one optimisation step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMetrics {
    /// Sum of the two head losses
    pub loss: f64,
    pub flavor_loss: f64,
    pub charge_loss: f64,
    /// Fraction of rows whose most probable class is the labelled one
    pub flavor_accuracy: f64,
}

impl AddAssign for StepMetrics {
    fn add_assign(&mut self, other: Self) {
        self.loss += other.loss;
        self.flavor_loss += other.flavor_loss;
        self.charge_loss += other.charge_loss;
        self.flavor_accuracy += other.flavor_accuracy;
    }
}

impl StepMetrics {
    fn scaled(self, factor: f64) -> Self {
        Self {
            loss: self.loss * factor,
            flavor_loss: self.flavor_loss * factor,
            charge_loss: self.charge_loss * factor,
            flavor_accuracy: self.flavor_accuracy * factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub steps: usize,
    /// Per-step metrics averaged over the epoch
    pub mean: StepMetrics,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitHistory {
    pub epochs: Vec<EpochSummary>,
}

impl FitHistory {
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }
}

/// A `Trainer` consumes model-ready batches, one optimisation step each.
///
/// `contract()` describes the batch shapes the underlying model was built
/// for; [`fit_generator`] checks every batch against it before stepping.
pub trait Trainer {
    fn contract(&self) -> &TensorContract;

    fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics>;
}

/// Pulls exactly `steps_per_epoch * epochs` batches from `batches` and runs
/// one training step on each.
///
/// `batches` is expected to be endless; the step counts alone bound the run.
/// An error from the stream ends the fit with that error, as does a contract
/// mismatch or a failed step.
pub fn fit_generator<T, I>(
    trainer: &mut T,
    batches: I,
    steps_per_epoch: usize,
    epochs: usize,
) -> Result<FitHistory>
where
    T: Trainer + ?Sized,
    I: IntoIterator<Item = Result<Batch>>,
{
    if steps_per_epoch == 0 || epochs == 0 {
        return Err(DataError::Config(format!(
            "steps_per_epoch and epochs must be > 0, but got steps_per_epoch={}, epochs={}",
            steps_per_epoch, epochs
        ))
        .into());
    }

    let mut batches = batches.into_iter();
    let mut history = FitHistory::default();

    for epoch in 0..epochs {
        let mut total = StepMetrics::default();
        for step in 0..steps_per_epoch {
            let batch = batches
                .next()
                .ok_or_else(|| anyhow!("Batch stream ended at epoch {}, step {}", epoch, step))?
                .with_context(|| format!("Failed to pull batch {} of epoch {}", step, epoch))?;

            trainer.contract().check(&batch)?;
            let metrics = trainer.train_step(&batch)?;
            debug!(epoch, step, start = batch.start, loss = metrics.loss, "train step");
            total += metrics;
        }

        let mean = total.scaled(1.0 / steps_per_epoch as f64);
        info!(
            epoch,
            loss = mean.loss,
            flavor_loss = mean.flavor_loss,
            charge_loss = mean.charge_loss,
            flavor_accuracy = mean.flavor_accuracy,
            "epoch finished"
        );
        history.epochs.push(EpochSummary {
            epoch,
            steps: steps_per_epoch,
            mean,
        });
    }
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use btag_data::StreamConfig;
    use tch::{Device, Kind, Tensor};

    /// Records the start offset of every batch it sees; its loss is that offset.
    struct RecordingTrainer {
        contract: TensorContract,
        starts: Vec<usize>,
    }

    impl RecordingTrainer {
        fn new() -> Self {
            Self {
                contract: TensorContract::for_stream(&StreamConfig::default(), 3),
                starts: Vec::new(),
            }
        }
    }

    impl Trainer for RecordingTrainer {
        fn contract(&self) -> &TensorContract {
            &self.contract
        }

        fn train_step(&mut self, batch: &Batch) -> Result<StepMetrics> {
            self.starts.push(batch.start);
            Ok(StepMetrics {
                loss: batch.start as f64,
                ..StepMetrics::default()
            })
        }
    }

    fn make_batch(start: usize, capacity: i64) -> Batch {
        let options = (Kind::Double, Device::Cpu);
        Batch {
            start,
            subobjects: Tensor::zeros([2, capacity, 2], options),
            events: Tensor::zeros([2, 2], options),
            labels: Tensor::zeros([2, 4], options),
            aux_target: Tensor::zeros([2], options),
        }
    }

    /// An endless generator of well-formed batches with starts 0, 1, 2, ...
    fn endless() -> impl Iterator<Item = Result<Batch>> {
        (0..).map(|start| Ok(make_batch(start, 3)))
    }

    #[test]
    fn test_pulls_exactly_steps_times_epochs() -> Result<()> {
        let mut trainer = RecordingTrainer::new();
        let mut source = endless();
        let history = fit_generator(&mut trainer, source.by_ref(), 4, 3)?;

        assert_eq!(trainer.starts, (0..12).collect::<Vec<_>>());
        assert_eq!(history.epochs.len(), 3);
        assert_eq!(history.epochs[0].steps, 4);
        // mean of starts 4..8
        assert_eq!(history.epochs[1].mean.loss, 5.5);
        assert_eq!(history.last().map(|e| e.epoch), Some(2));

        // the generator is left positioned right after the last pulled batch
        let next_start = source.next().and_then(|b| b.ok()).map(|b| b.start);
        assert_eq!(next_start, Some(12));
        Ok(())
    }

    #[test]
    fn test_rejects_zero_steps() {
        let mut trainer = RecordingTrainer::new();
        for (steps, epochs) in [(0, 1), (1, 0)] {
            let err = fit_generator(&mut trainer, endless(), steps, epochs).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::Config(_))
            ));
        }
        assert!(trainer.starts.is_empty());
    }

    #[test]
    fn test_stream_error_ends_fit() {
        let mut trainer = RecordingTrainer::new();
        let batches: Vec<Result<Batch>> = vec![
            Ok(make_batch(0, 3)),
            Err(DataError::Storage("disk".into()).into()),
            Ok(make_batch(2, 3)),
        ];
        let err = fit_generator(&mut trainer, batches, 3, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Storage(_))
        ));
        assert_eq!(trainer.starts, vec![0]);
    }

    #[test]
    fn test_short_stream_and_contract_mismatch() {
        let mut trainer = RecordingTrainer::new();
        let short = (0..2).map(|start| Ok::<_, anyhow::Error>(make_batch(start, 3)));
        assert!(fit_generator(&mut trainer, short, 3, 1).is_err());

        let mut trainer = RecordingTrainer::new();
        let wrong_capacity = std::iter::once(Ok::<_, anyhow::Error>(make_batch(0, 7)));
        let err = fit_generator(&mut trainer, wrong_capacity, 1, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Config(_))
        ));
        assert!(trainer.starts.is_empty());
    }
}
