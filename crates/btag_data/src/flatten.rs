use crate::error::DataError;
use crate::records::RecordArray;
use anyhow::Result;
use tch::Tensor;

/// Converts structured records into a dense `f64` tensor with one extra
/// trailing axis enumerating the selected fields.
///
/// For records of shape `S` and `k` selected fields the output has shape
/// `S + [k]`, and element `[..., i]` is the value of `field_order[i]` widened
/// to `f64`. The trailing axis always follows the caller's order, never the
/// declaration order of the schema.
///
/// # Example
/// ```ignore
/// let flattener = RecordFlattener::new(["pt", "eta"])?;
/// let jets = flattener.flatten(&jet_records)?;      // [n_events, 2]
/// let tracks = RecordFlattener::new(["d0", "charge"])?
///     .flatten(&track_records)?;                      // [n_events, capacity, 2]
/// ```
#[derive(Debug, Clone)]
pub struct RecordFlattener {
    field_order: Vec<String>,
}

impl RecordFlattener {
    /// Fails with [`DataError::EmptySelection`] if no field is named.
    pub fn new<I, S>(field_order: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field_order: Vec<String> = field_order.into_iter().map(Into::into).collect();
        if field_order.is_empty() {
            return Err(DataError::EmptySelection.into());
        }
        Ok(Self { field_order })
    }

    pub fn field_order(&self) -> &[String] {
        &self.field_order
    }

    pub fn num_fields(&self) -> usize {
        self.field_order.len()
    }

    pub fn flatten(&self, records: &RecordArray) -> Result<Tensor> {
        flatten(records, self.field_order.as_slice())
    }
}

/// Flattens `records` on `field_order`. See [`RecordFlattener`].
///
/// # Errors
/// - [`DataError::EmptySelection`] if `field_order` is empty.
/// - [`DataError::Schema`] if any name is not a field of `records`.
pub fn flatten<S: AsRef<str>>(records: &RecordArray, field_order: &[S]) -> Result<Tensor> {
    if field_order.is_empty() {
        return Err(DataError::EmptySelection.into());
    }

    // Resolve (and validate) every name before touching any values
    let columns = field_order
        .iter()
        .map(|name| records.field(name.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let widened: Vec<Vec<f64>> = columns.iter().map(|column| column.to_f64_vec()).collect();

    // Interleave so that the field index is the fastest-moving axis
    let num_elements = records.num_elements();
    let mut flat = Vec::with_capacity(num_elements * widened.len());
    for position in 0..num_elements {
        flat.extend(widened.iter().map(|values| values[position]));
    }

    let mut shape: Vec<i64> = records.shape().iter().map(|&d| d as i64).collect();
    shape.push(widened.len() as i64);
    Ok(Tensor::from_slice(&flat).reshape(&shape))
}

/// Flattens every field in schema declaration order.
pub fn flatten_all(records: &RecordArray) -> Result<Tensor> {
    let names: Vec<&str> = records.field_names().collect();
    flatten(records, names.as_slice())
}
