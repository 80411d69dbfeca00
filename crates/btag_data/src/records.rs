use crate::error::{check_window, DataError};
use anyhow::{ensure, Result};
use bytemuck::Pod;
use std::collections::HashSet;
use std::ops::Range;

/// Element type of a single record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl FieldType {
    /// Size of one element in bytes, as laid out on disk.
    pub fn size(self) -> usize {
        match self {
            FieldType::Bool | FieldType::U8 | FieldType::I8 => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
        }
    }
}

/// The values of one field across a record collection, stored contiguously
/// in row-major order of the collection shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Bool(v) => v.len(),
            Column::U8(v) => v.len(),
            Column::I8(v) => v.len(),
            Column::I16(v) => v.len(),
            Column::U16(v) => v.len(),
            Column::I32(v) => v.len(),
            Column::U32(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::U64(v) => v.len(),
            Column::F32(v) => v.len(),
            Column::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Column::Bool(_) => FieldType::Bool,
            Column::U8(_) => FieldType::U8,
            Column::I8(_) => FieldType::I8,
            Column::I16(_) => FieldType::I16,
            Column::U16(_) => FieldType::U16,
            Column::I32(_) => FieldType::I32,
            Column::U32(_) => FieldType::U32,
            Column::I64(_) => FieldType::I64,
            Column::U64(_) => FieldType::U64,
            Column::F32(_) => FieldType::F32,
            Column::F64(_) => FieldType::F64,
        }
    }

    /// Widens every value to `f64`.
    ///
    /// Booleans become `0.0`/`1.0`. Integers up to 32 bits and `f32` convert
    /// exactly; 64-bit integers beyond 2^53 round to the nearest `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Column::Bool(v) => v.iter().map(|&b| f64::from(u8::from(b))).collect(),
            Column::U8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::I8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::I16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::U16(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::U32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::I64(v) => v.iter().map(|&x| x as f64).collect(),
            Column::U64(v) => v.iter().map(|&x| x as f64).collect(),
            Column::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Column::F64(v) => v.clone(),
        }
    }

    /// Copies out the elements in `range`.
    pub fn slice(&self, range: Range<usize>) -> Column {
        match self {
            Column::Bool(v) => Column::Bool(v[range].to_vec()),
            Column::U8(v) => Column::U8(v[range].to_vec()),
            Column::I8(v) => Column::I8(v[range].to_vec()),
            Column::I16(v) => Column::I16(v[range].to_vec()),
            Column::U16(v) => Column::U16(v[range].to_vec()),
            Column::I32(v) => Column::I32(v[range].to_vec()),
            Column::U32(v) => Column::U32(v[range].to_vec()),
            Column::I64(v) => Column::I64(v[range].to_vec()),
            Column::U64(v) => Column::U64(v[range].to_vec()),
            Column::F32(v) => Column::F32(v[range].to_vec()),
            Column::F64(v) => Column::F64(v[range].to_vec()),
        }
    }

    /// Decodes little-endian element bytes into native values on any host.
    /// `bytes` need not be aligned.
    pub fn decode(field_type: FieldType, bytes: &[u8]) -> Result<Column> {
        if bytes.len() % field_type.size() != 0 {
            return Err(DataError::storage(format!(
                "{} bytes is not a whole number of {:?} elements",
                bytes.len(),
                field_type
            ))
            .into());
        }
        let column = match field_type {
            FieldType::Bool => Column::Bool(bytes.iter().map(|&b| b != 0).collect()),
            FieldType::U8 => Column::U8(bytes.to_vec()),
            FieldType::I8 => Column::I8(read_unaligned(bytes)),
            FieldType::I16 => Column::I16(read_unaligned(bytes)),
            FieldType::U16 => Column::U16(read_unaligned(bytes)),
            FieldType::I32 => Column::I32(read_unaligned(bytes)),
            FieldType::U32 => Column::U32(read_unaligned(bytes)),
            FieldType::I64 => Column::I64(read_unaligned(bytes)),
            FieldType::U64 => Column::U64(read_unaligned(bytes)),
            FieldType::F32 => Column::F32(read_unaligned(bytes)),
            FieldType::F64 => Column::F64(read_unaligned(bytes)),
        };
        Ok(column)
    }

    /// Encodes the values as little-endian bytes (the inverse of [`Column::decode`]).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Column::Bool(v) => v.iter().map(|&b| u8::from(b)).collect(),
            Column::U8(v) => v.clone(),
            Column::I8(v) => write_le(v),
            Column::I16(v) => write_le(v),
            Column::U16(v) => write_le(v),
            Column::I32(v) => write_le(v),
            Column::U32(v) => write_le(v),
            Column::I64(v) => write_le(v),
            Column::U64(v) => write_le(v),
            Column::F32(v) => write_le(v),
            Column::F64(v) => write_le(v),
        }
    }
}

/// Element type stored on disk in little-endian order.
trait LittleEndian: Pod {
    /// Swaps between little-endian and native order. A no-op on
    /// little-endian hosts; applying it twice restores the value.
    fn swap_le(self) -> Self;
}

macro_rules! little_endian_int {
    ($($t:ty),*) => {
        $(impl LittleEndian for $t {
            fn swap_le(self) -> Self {
                <$t>::from_le(self)
            }
        })*
    };
}

little_endian_int!(i8, i16, u16, i32, u32, i64, u64);

impl LittleEndian for f32 {
    fn swap_le(self) -> Self {
        f32::from_bits(u32::from_le(self.to_bits()))
    }
}

impl LittleEndian for f64 {
    fn swap_le(self) -> Self {
        f64::from_bits(u64::from_le(self.to_bits()))
    }
}

fn write_le<T: LittleEndian>(values: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(bytemuck::bytes_of(&value.swap_le()));
    }
    bytes
}

// Memory-mapped windows start at arbitrary byte offsets, so `cast_slice`
// (which requires alignment) cannot be used here.
fn read_unaligned<T: LittleEndian>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(|chunk| bytemuck::pod_read_unaligned::<T>(chunk).swap_le())
        .collect()
}

/// Field names and types of a collection, in declaration order, together with
/// the per-event shape (`[]` for one record per event, `[capacity]` for a
/// padded sequence of sub-records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    event_shape: Vec<usize>,
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    pub fn new(event_shape: Vec<usize>, fields: Vec<(String, FieldType)>) -> Self {
        Self {
            event_shape,
            fields,
        }
    }

    pub fn event_shape(&self) -> &[usize] {
        &self.event_shape
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| *ty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field_type(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fails with a schema error naming the first requested field that is absent.
    pub fn require<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            let name = name.as_ref();
            if !self.contains(name) {
                return Err(DataError::Schema {
                    field: name.to_string(),
                    available: self.names().map(String::from).collect(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// A structured record collection: a fixed set of named, independently typed
/// fields sharing one shape.
///
/// The leading axis of `shape` is the event axis. A `jets` collection has
/// shape `[n_events]`; a `tracks` collection has shape `[n_events, capacity]`.
/// Every column stores `shape.iter().product()` values.
///
/// # Example
/// ```ignore
/// let jets = RecordArray::new([3])
///     .with_field("pt", Column::F32(vec![20.0, 35.5, 41.0]))?
///     .with_field("LabDr_HadF", Column::I32(vec![0, 5, 4]))?;
/// assert_eq!(jets.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RecordArray {
    shape: Vec<usize>,
    fields: Vec<(String, Column)>,
}

impl RecordArray {
    /// Creates a collection with the given shape and no fields.
    pub fn new(shape: impl Into<Vec<usize>>) -> Self {
        Self {
            shape: shape.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field, keeping declaration order.
    pub fn with_field(mut self, name: impl Into<String>, column: Column) -> Result<Self> {
        let name = name.into();
        ensure!(!self.shape.is_empty(), "Record collections need at least one axis");
        ensure!(
            column.len() == self.num_elements(),
            "Field '{}' has {} values but shape {:?} needs {}",
            name,
            column.len(),
            self.shape,
            self.num_elements()
        );
        ensure!(
            !self.fields.iter().any(|(existing, _)| *existing == name),
            "Duplicate field '{}'",
            name
        );
        self.fields.push((name, column));
        Ok(self)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of events (length of the leading axis).
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values stored per field.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Values per field belonging to one event.
    pub fn elements_per_event(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Returns a field's column, or a schema error when it is absent.
    pub fn field(&self, name: &str) -> Result<&Column> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, column)| column)
            .ok_or_else(|| {
                DataError::Schema {
                    field: name.to_string(),
                    available: self.field_names().map(String::from).collect(),
                }
                .into()
            })
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.shape.get(1..).unwrap_or_default().to_vec(),
            self.fields
                .iter()
                .map(|(name, column)| (name.clone(), column.field_type()))
                .collect(),
        )
    }

    /// Projects onto `names`, in exactly that order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<RecordArray> {
        if names.is_empty() {
            return Err(DataError::EmptySelection.into());
        }
        let mut seen = HashSet::with_capacity(names.len());
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            ensure!(seen.insert(name), "Field '{}' selected twice", name);
            fields.push((name.to_string(), self.field(name)?.clone()));
        }
        Ok(RecordArray {
            shape: self.shape.clone(),
            fields,
        })
    }

    /// Copies out events `[start, start + length)` from every field.
    pub fn slice_events(&self, start: usize, length: usize) -> Result<RecordArray> {
        check_window(start, length, self.len())?;
        let per_event = self.elements_per_event();
        let range = start * per_event..(start + length) * per_event;
        let mut shape = self.shape.clone();
        shape[0] = length;
        Ok(RecordArray {
            shape,
            fields: self
                .fields
                .iter()
                .map(|(name, column)| (name.clone(), column.slice(range.clone())))
                .collect(),
        })
    }
}
