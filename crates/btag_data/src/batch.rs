use crate::records::Column;
use tch::{Device, Tensor};

/// One model-ready batch of `b` consecutive events.
///
/// All tensors are `f64` with leading dimension `b`:
/// - `subobjects`: flattened sub-object fields, `[b, capacity, k_s]`
/// - `events`: flattened per-event fields, `[b, k_e]`
/// - `labels`: one-hot class encoding, `[b, num_classes]`
/// - `aux_target`: auxiliary regression target, `[b]`
///
/// `inputs()` and `targets()` return them in the order a two-input,
/// two-output model consumes them.
#[derive(Debug)]
pub struct Batch {
    /// Offset of the first event of the window this batch was read from.
    pub start: usize,
    pub subobjects: Tensor,
    pub events: Tensor,
    pub labels: Tensor,
    pub aux_target: Tensor,
}

impl Batch {
    /// `(subobjects, events)`
    pub fn inputs(&self) -> (&Tensor, &Tensor) {
        (&self.subobjects, &self.events)
    }

    /// `(one-hot labels, auxiliary target)`
    pub fn targets(&self) -> (&Tensor, &Tensor) {
        (&self.labels, &self.aux_target)
    }

    /// Consumes the batch, returning `((subobjects, events), (labels, aux_target))`.
    pub fn into_parts(self) -> ((Tensor, Tensor), (Tensor, Tensor)) {
        ((self.subobjects, self.events), (self.labels, self.aux_target))
    }

    pub fn batch_size(&self) -> usize {
        self.events.size().first().copied().unwrap_or(0) as usize
    }

    /// Transfers all tensors to the target device (CPU/GPU)
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            start: self.start,
            subobjects: self.subobjects.to_device(device),
            events: self.events.to_device(device),
            labels: self.labels.to_device(device),
            aux_target: self.aux_target.to_device(device),
        }
    }
}

/// Encodes `labels` against `codes`: row `i` has a 1 in column `j` iff
/// `labels[i] == codes[j]`.
///
/// Integer labels are compared exactly; float labels match only when they
/// hold an integral value. A label that matches no code yields an all-zero
/// row. The number of such rows is returned alongside the `[n, codes.len()]`
/// tensor so the caller can report it.
pub fn one_hot(labels: &Column, codes: &[i64]) -> (Tensor, usize) {
    let values = integral_labels(labels);
    let mut encoded = vec![0f64; values.len() * codes.len()];
    let mut unmatched = 0;

    for (row, label) in values.iter().enumerate() {
        match codes.iter().position(|&code| *label == Some(i128::from(code))) {
            Some(column) => encoded[row * codes.len() + column] = 1.0,
            None => unmatched += 1,
        }
    }

    let tensor = Tensor::from_slice(&encoded).reshape([values.len() as i64, codes.len() as i64]);
    (tensor, unmatched)
}

/// Label values in a common integer domain; `None` for non-integral floats.
fn integral_labels(labels: &Column) -> Vec<Option<i128>> {
    fn exact<T: Copy + Into<i128>>(values: &[T]) -> Vec<Option<i128>> {
        values.iter().map(|&x| Some(x.into())).collect()
    }

    match labels {
        Column::Bool(v) => v.iter().map(|&b| Some(i128::from(b))).collect(),
        Column::U8(v) => exact(v.as_slice()),
        Column::I8(v) => exact(v.as_slice()),
        Column::I16(v) => exact(v.as_slice()),
        Column::U16(v) => exact(v.as_slice()),
        Column::I32(v) => exact(v.as_slice()),
        Column::U32(v) => exact(v.as_slice()),
        Column::I64(v) => exact(v.as_slice()),
        Column::U64(v) => exact(v.as_slice()),
        Column::F32(_) | Column::F64(_) => labels
            .to_f64_vec()
            .into_iter()
            .map(|x| (x.is_finite() && x.fract() == 0.0).then(|| x as i128))
            .collect(),
    }
}
