//! On-disk record store.
//!
//! A store is a single safetensors file holding several named record
//! collections, column by column. Field `f` of collection `c` is the tensor
//! `"c/f"`; all fields of a collection share one shape whose leading axis is
//! the event axis (`jets/pt: [N]`, `tracks/d0: [N, capacity]`).
//!
//! The header metadata entry `"c.fields"` records the declaration order of the
//! fields as a comma-separated list. safetensors itself lays tensors out by
//! dtype and name, so without that entry the order falls back to the on-disk
//! data offsets.
//!
//! ```text
//! [u64 header len][JSON header: tensor dtypes/shapes/offsets + __metadata__][raw column bytes]
//! ```

use crate::error::{check_window, DataError};
use crate::records::{Column, FieldType, RecordArray, Schema};
use anyhow::{ensure, Context, Result};
use safetensors::tensor::{Dtype, TensorInfo, TensorView};
use safetensors::{serialize_to_file, SafeTensors};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Separates the collection name from the field name in tensor names.
pub const FIELD_SEPARATOR: char = '/';

/// Size of the little-endian header length prefix.
const HEADER_PREFIX: usize = 8;

fn fields_key(collection: &str) -> String {
    format!("{collection}.fields")
}

impl TryFrom<Dtype> for FieldType {
    type Error = DataError;

    fn try_from(dtype: Dtype) -> Result<Self, DataError> {
        let field_type = match dtype {
            Dtype::BOOL => FieldType::Bool,
            Dtype::U8 => FieldType::U8,
            Dtype::I8 => FieldType::I8,
            Dtype::I16 => FieldType::I16,
            Dtype::U16 => FieldType::U16,
            Dtype::I32 => FieldType::I32,
            Dtype::U32 => FieldType::U32,
            Dtype::I64 => FieldType::I64,
            Dtype::U64 => FieldType::U64,
            Dtype::F32 => FieldType::F32,
            Dtype::F64 => FieldType::F64,
            Dtype::F16 | Dtype::BF16 => {
                return Err(DataError::storage(
                    "Half-precision floats (F16/BF16) are not supported. \
                     Store record fields as F32 or F64.",
                ))
            }
            other => {
                return Err(DataError::storage(format!(
                    "Unsupported dtype '{:?}'. Supported: BOOL, U8, I8, I16, U16, I32, U32, I64, U64, F32, F64",
                    other
                )))
            }
        };
        Ok(field_type)
    }
}

impl From<FieldType> for Dtype {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Bool => Dtype::BOOL,
            FieldType::U8 => Dtype::U8,
            FieldType::I8 => Dtype::I8,
            FieldType::I16 => Dtype::I16,
            FieldType::U16 => Dtype::U16,
            FieldType::I32 => Dtype::I32,
            FieldType::U32 => Dtype::U32,
            FieldType::I64 => Dtype::I64,
            FieldType::U64 => Dtype::U64,
            FieldType::F32 => Dtype::F32,
            FieldType::F64 => Dtype::F64,
        }
    }
}

/// Writes record collections into one store file.
///
/// # Example
/// ```ignore
/// StoreWriter::new()
///     .with_collection("jets", jets)?
///     .with_collection("tracks", tracks)?
///     .write("events.safetensors")?;
/// ```
#[derive(Debug, Default)]
pub struct StoreWriter {
    collections: Vec<(String, RecordArray)>,
}

impl StoreWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        records: RecordArray,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            !name.is_empty() && !name.contains(FIELD_SEPARATOR),
            "Invalid collection name '{}'",
            name
        );
        ensure!(
            !self.collections.iter().any(|(existing, _)| *existing == name),
            "Duplicate collection '{}'",
            name
        );
        ensure!(records.num_fields() > 0, "Collection '{}' has no fields", name);
        for field in records.field_names() {
            ensure!(
                !field.is_empty() && !field.contains(',') && !field.contains(FIELD_SEPARATOR),
                "Invalid field name '{}' in collection '{}'",
                field,
                name
            );
        }
        self.collections.push((name, records));
        Ok(self)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut metadata = HashMap::with_capacity(self.collections.len());
        let mut encoded = Vec::new();

        for (collection, records) in &self.collections {
            let names: Vec<&str> = records.field_names().collect();
            metadata.insert(fields_key(collection), names.join(","));
            for name in names {
                let column = records.field(name)?;
                encoded.push((
                    format!("{collection}{FIELD_SEPARATOR}{name}"),
                    Dtype::from(column.field_type()),
                    records.shape().to_vec(),
                    column.to_bytes(),
                ));
            }
        }

        let views = encoded
            .iter()
            .map(|(name, dtype, shape, bytes)| {
                let view = TensorView::new(*dtype, shape.clone(), bytes)
                    .map_err(|e| anyhow::anyhow!("Failed to encode tensor '{}': {:?}", name, e))?;
                Ok((name.clone(), view))
            })
            .collect::<Result<Vec<_>>>()?;

        serialize_to_file(views, &Some(metadata), path)
            .with_context(|| format!("Failed to write record store: {}", path.display()))?;
        debug!(path = %path.display(), collections = self.collections.len(), "wrote record store");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FieldLocation {
    name: String,
    field_type: FieldType,
    // Absolute byte range of the whole column within the file
    begin: usize,
    end: usize,
}

/// Location and schema of one collection inside a store file.
#[derive(Debug, Clone)]
pub struct CollectionLayout {
    name: String,
    shape: Vec<usize>,
    fields: Vec<FieldLocation>,
}

impl CollectionLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of events (leading axis).
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.shape[1..].to_vec(),
            self.fields
                .iter()
                .map(|field| (field.name.clone(), field.field_type))
                .collect(),
        )
    }

    /// Decodes events `[start, start + length)` of every field from the store
    /// bytes, touching only the bytes of that window.
    pub fn read_window(&self, bytes: &[u8], start: usize, length: usize) -> Result<RecordArray> {
        check_window(start, length, self.len())?;

        let per_event: usize = self.shape[1..].iter().product();
        let mut shape = self.shape.clone();
        shape[0] = length;

        let mut records = RecordArray::new(shape);
        for field in &self.fields {
            let row_bytes = per_event * field.field_type.size();
            let begin = field.begin + start * row_bytes;
            let end = begin + length * row_bytes;
            debug_assert!(end <= field.end, "window checked against the event count");
            let window = bytes.get(begin..end).ok_or_else(|| {
                DataError::storage(format!(
                    "Store is truncated: '{}/{}' needs bytes {}..{} but only {} are mapped",
                    self.name,
                    field.name,
                    begin,
                    end,
                    bytes.len()
                ))
            })?;
            let column = Column::decode(field.field_type, window)
                .with_context(|| format!("Failed to decode '{}/{}'", self.name, field.name))?;
            records = records.with_field(field.name.clone(), column)?;
        }
        Ok(records)
    }
}

/// The parsed header of a store: every collection with its field schema and
/// byte locations. Parsed once; reads reuse it.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    collections: Vec<CollectionLayout>,
}

impl StoreLayout {
    /// Parses the store header at the start of `bytes`.
    ///
    /// Tensors whose names carry no collection prefix are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (header_size, metadata) = SafeTensors::read_metadata(bytes)
            .map_err(|e| DataError::storage(format!("Not a valid record store: {:?}", e)))?;
        let data_start = HEADER_PREFIX + header_size;
        let declared = metadata.metadata().clone().unwrap_or_default();

        let tensors = metadata.tensors();
        let mut grouped: BTreeMap<&str, Vec<(&str, &TensorInfo)>> = BTreeMap::new();
        for (tensor_name, info) in &tensors {
            match tensor_name.split_once(FIELD_SEPARATOR) {
                Some((collection, field)) => {
                    grouped.entry(collection).or_default().push((field, *info))
                }
                None => debug!(tensor = %tensor_name, "ignoring tensor outside any collection"),
            }
        }

        let collections = grouped
            .into_iter()
            .map(|(collection, fields)| {
                parse_collection(
                    collection,
                    fields,
                    declared.get(&fields_key(collection)),
                    data_start,
                    bytes.len(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { collections })
    }

    /// Returns the named collection, or a storage error if the store lacks it.
    pub fn collection(&self, name: &str) -> Result<&CollectionLayout> {
        self.collections
            .iter()
            .find(|collection| collection.name == name)
            .ok_or_else(|| {
                DataError::storage(format!(
                    "Missing collection '{}'. Available: {:?}",
                    name,
                    self.collection_names().collect::<Vec<_>>()
                ))
                .into()
            })
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|collection| collection.name.as_str())
    }
}

fn parse_collection(
    collection: &str,
    mut fields: Vec<(&str, &TensorInfo)>,
    declared_order: Option<&String>,
    data_start: usize,
    file_len: usize,
) -> Result<CollectionLayout> {
    // Restore declaration order
    match declared_order {
        Some(order) => {
            let order: Vec<&str> = order.split(',').collect();
            let present: HashSet<&str> = fields.iter().map(|(name, _)| *name).collect();
            let declared: HashSet<&str> = order.iter().copied().collect();
            if present != declared || order.len() != declared.len() {
                return Err(DataError::storage(format!(
                    "Collection '{}' declares fields {:?} but stores {:?}",
                    collection, order, present
                ))
                .into());
            }
            fields.sort_by_key(|(name, _)| order.iter().position(|d| d == name));
        }
        None => fields.sort_by_key(|(_, info)| info.data_offsets.0),
    }

    let shape = fields[0].1.shape.clone();
    if shape.is_empty() {
        return Err(DataError::storage(format!(
            "Collection '{}' has scalar fields; an event axis is required",
            collection
        ))
        .into());
    }

    let mut locations = Vec::with_capacity(fields.len());
    for (name, info) in fields {
        if info.shape != shape {
            return Err(DataError::storage(format!(
                "Field '{}/{}' has shape {:?}, expected {:?} like the rest of the collection",
                collection, name, info.shape, shape
            ))
            .into());
        }
        let field_type = FieldType::try_from(info.dtype)
            .with_context(|| format!("Field '{}/{}'", collection, name))?;

        let (begin, end) = (
            data_start + info.data_offsets.0,
            data_start + info.data_offsets.1,
        );
        let expected = shape.iter().product::<usize>() * field_type.size();
        if end - begin != expected || end > file_len {
            return Err(DataError::storage(format!(
                "Field '{}/{}' occupies bytes {}..{} but {} bytes were expected (file is {} bytes)",
                collection, name, begin, end, expected, file_len
            ))
            .into());
        }

        locations.push(FieldLocation {
            name: name.to_string(),
            field_type,
            begin,
            end,
        });
    }

    Ok(CollectionLayout {
        name: collection.to_string(),
        shape,
        fields: locations,
    })
}
