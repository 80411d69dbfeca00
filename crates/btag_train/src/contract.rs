use anyhow::Result;
use btag_data::{Batch, DataError, StreamConfig};

/// Named inputs of the two-input model, in `Batch::inputs()` order.
pub const INPUT_NAMES: [&str; 2] = ["tracks", "vertices"];
/// Named outputs of the two-output model, in `Batch::targets()` order.
pub const OUTPUT_NAMES: [&str; 2] = ["flavor", "charge"];

/// Per-sample shapes a model built for one stream configuration expects.
///
/// The leading (batch) axis is left out: every batch of the stream shares
/// the same trailing shapes, whatever its size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorContract {
    /// `[capacity, number of sub-object fields]`
    pub tracks: [i64; 2],
    /// `[number of per-event fields]`
    pub vertices: [i64; 1],
    /// `[number of label codes]`
    pub flavor: [i64; 1],
}

impl TensorContract {
    pub fn for_stream(config: &StreamConfig, capacity: usize) -> Self {
        Self {
            tracks: [capacity as i64, config.subobject_fields.len() as i64],
            vertices: [config.event_fields.len() as i64],
            flavor: [config.label_codes.len() as i64],
        }
    }

    pub fn num_track_features(&self) -> i64 {
        self.tracks[1]
    }

    pub fn num_jet_features(&self) -> i64 {
        self.vertices[0]
    }

    pub fn num_classes(&self) -> i64 {
        self.flavor[0]
    }

    /// Fails with a [`DataError::Config`] naming the first tensor whose shape
    /// does not match the contract.
    pub fn check(&self, batch: &Batch) -> Result<()> {
        let rows = batch.batch_size() as i64;
        let (tracks, vertices) = batch.inputs();
        let (flavor, charge) = batch.targets();

        let expected: [(&str, Vec<i64>, Vec<i64>); 4] = [
            (
                INPUT_NAMES[0],
                vec![rows, self.tracks[0], self.tracks[1]],
                tracks.size(),
            ),
            (INPUT_NAMES[1], vec![rows, self.vertices[0]], vertices.size()),
            (OUTPUT_NAMES[0], vec![rows, self.flavor[0]], flavor.size()),
            (OUTPUT_NAMES[1], vec![rows], charge.size()),
        ];

        for (name, want, got) in expected {
            if want != got {
                return Err(DataError::Config(format!(
                    "Tensor '{}' has shape {:?}, but the model expects {:?}",
                    name, got, want
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind, Tensor};

    fn zeros(shape: &[i64]) -> Tensor {
        Tensor::zeros(shape, (Kind::Double, Device::Cpu))
    }

    fn make_batch(tracks: &[i64], vertices: &[i64], flavor: &[i64], charge: &[i64]) -> Batch {
        Batch {
            start: 0,
            subobjects: zeros(tracks),
            events: zeros(vertices),
            labels: zeros(flavor),
            aux_target: zeros(charge),
        }
    }

    #[test]
    fn test_contract_from_default_config() {
        let contract = TensorContract::for_stream(&StreamConfig::default(), 60);
        assert_eq!(contract.tracks, [60, 2]);
        assert_eq!(contract.vertices, [2]);
        assert_eq!(contract.flavor, [4]);
        assert_eq!(contract.num_classes(), 4);
    }

    #[test]
    fn test_check_accepts_matching_batch() -> Result<()> {
        let contract = TensorContract::for_stream(&StreamConfig::default(), 5);
        contract.check(&make_batch(&[3, 5, 2], &[3, 2], &[3, 4], &[3]))?;
        contract.check(&make_batch(&[1, 5, 2], &[1, 2], &[1, 4], &[1]))?;
        Ok(())
    }

    #[test]
    fn test_check_names_the_mismatched_tensor() {
        let contract = TensorContract::for_stream(&StreamConfig::default(), 5);
        let cases = [
            (make_batch(&[3, 6, 2], &[3, 2], &[3, 4], &[3]), "tracks"),
            (make_batch(&[3, 5, 2], &[3, 3], &[3, 4], &[3]), "vertices"),
            (make_batch(&[3, 5, 2], &[3, 2], &[3, 2], &[3]), "flavor"),
            (make_batch(&[3, 5, 2], &[3, 2], &[3, 4], &[3, 1]), "charge"),
        ];
        for (batch, name) in cases {
            let err = contract.check(&batch).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DataError>(),
                Some(DataError::Config(message)) if message.contains(name)
            ));
        }
    }
}
