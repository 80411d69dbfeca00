use anyhow::Result;
use btag_data::{store::StoreWriter, Column, RecordArray};
use std::path::Path;

pub const NUM_EVENTS: usize = 10;
pub const CAPACITY: usize = 3;

/// Writes a 10-event store whose values encode the event index:
/// - jets: `pt = 100 i`, `eta = i / 10`, `LabDr_HadF = [0, 4, 5, 15][i % 4]`,
///   `mv2c10 = -i`
/// - tracks: `d0 = i + j / 10` for slot `j`, `charge = (-1)^j`,
///   `numberOfPixelHits = j`
pub fn write_indexed_store(path: &Path) -> Result<()> {
    let codes = [0, 4, 5, 15];
    let jets = RecordArray::new([NUM_EVENTS])
        .with_field(
            "pt",
            Column::F32((0..NUM_EVENTS).map(|i| 100.0 * i as f32).collect()),
        )?
        .with_field(
            "eta",
            Column::F64((0..NUM_EVENTS).map(|i| i as f64 / 10.0).collect()),
        )?
        .with_field(
            "LabDr_HadF",
            Column::I32((0..NUM_EVENTS).map(|i| codes[i % 4]).collect()),
        )?
        .with_field(
            "mv2c10",
            Column::F64((0..NUM_EVENTS).map(|i| -(i as f64)).collect()),
        )?;

    let slots = NUM_EVENTS * CAPACITY;
    let tracks = RecordArray::new([NUM_EVENTS, CAPACITY])
        .with_field(
            "d0",
            Column::F64(
                (0..slots)
                    .map(|k| (k / CAPACITY) as f64 + (k % CAPACITY) as f64 / 10.0)
                    .collect(),
            ),
        )?
        .with_field(
            "charge",
            Column::I8(
                (0..slots)
                    .map(|k| if k % CAPACITY % 2 == 0 { 1 } else { -1 })
                    .collect(),
            ),
        )?
        .with_field(
            "numberOfPixelHits",
            Column::U8((0..slots).map(|k| (k % CAPACITY) as u8).collect()),
        )?;

    StoreWriter::new()
        .with_collection("jets", jets)?
        .with_collection("tracks", tracks)?
        .write(path)
}

/// Event index encoded in the `pt` input of a flattened jet row.
pub fn event_index(pt: f64) -> usize {
    (pt / 100.0).round() as usize
}
