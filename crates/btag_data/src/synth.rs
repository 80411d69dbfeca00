//! Synthetic `jets`/`tracks` stores for demos and benchmarks.

use crate::records::{Column, RecordArray};
use crate::store::StoreWriter;
use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use tracing::info;

/// Label codes drawn for synthetic jets: light, charm, bottom, tau.
const FLAVOR_CODES: [i32; 4] = [0, 4, 5, 15];

/// Generates a store of `events` jets, each with up to `capacity` tracks.
///
/// Jets carry `pt`, `eta`, `LabDr_HadF` and `mv2c10`; tracks carry `pt`,
/// `eta`, `d0`, `charge`, `numberOfPixelHits` and a `valid` flag. Unused
/// track slots are zeroed and marked invalid. The same `seed` always
/// produces the same file.
#[derive(Debug, Clone)]
pub struct SyntheticStore {
    pub events: usize,
    pub capacity: usize,
    pub seed: u64,
}

impl SyntheticStore {
    pub fn new(events: usize, capacity: usize, seed: u64) -> Self {
        Self {
            events,
            capacity,
            seed,
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let (jets, tracks) = self.generate()?;
        StoreWriter::new()
            .with_collection("jets", jets)?
            .with_collection("tracks", tracks)?
            .write(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            events = self.events,
            capacity = self.capacity,
            "wrote synthetic store"
        );
        Ok(())
    }

    /// Generates the `(jets, tracks)` collections in memory.
    pub fn generate(&self) -> Result<(RecordArray, RecordArray)> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.events;
        let slots = n * self.capacity;

        let mut jet_pt = Vec::with_capacity(n);
        let mut jet_eta = Vec::with_capacity(n);
        let mut label = Vec::with_capacity(n);
        let mut score = Vec::with_capacity(n);

        let mut trk_pt = vec![0f32; slots];
        let mut trk_eta = vec![0f32; slots];
        let mut d0 = vec![0f32; slots];
        let mut charge = vec![0i8; slots];
        let mut pixel_hits = vec![0u8; slots];
        let mut valid = vec![false; slots];

        for event in 0..n {
            let flavor = FLAVOR_CODES[rng.random_range(0..FLAVOR_CODES.len())];
            let eta: f32 = rng.random_range(-2.5..2.5);
            jet_pt.push(rng.random_range(20_000.0f32..250_000.0));
            jet_eta.push(eta);
            label.push(flavor);

            // heavy-flavour jets get displaced tracks and a higher tagger score
            let displacement = if flavor == 5 { 0.3 } else { 0.05 };
            let baseline = if flavor == 5 { 0.6 } else { -0.4 };
            score.push(baseline + rng.random_range(-0.4..0.4));

            let filled = if self.capacity == 0 {
                0
            } else {
                rng.random_range(1..=self.capacity)
            };
            for slot in event * self.capacity..event * self.capacity + filled {
                trk_pt[slot] = rng.random_range(500.0f32..20_000.0);
                trk_eta[slot] = eta + rng.random_range(-0.4f32..0.4);
                d0[slot] = rng.random_range(-displacement..displacement);
                charge[slot] = if rng.random_bool(0.5) { 1 } else { -1 };
                pixel_hits[slot] = rng.random_range(0..=4);
                valid[slot] = true;
            }
        }

        let jets = RecordArray::new([n])
            .with_field("pt", Column::F32(jet_pt))?
            .with_field("eta", Column::F32(jet_eta))?
            .with_field("LabDr_HadF", Column::I32(label))?
            .with_field("mv2c10", Column::F64(score))?;
        let tracks = RecordArray::new([n, self.capacity])
            .with_field("pt", Column::F32(trk_pt))?
            .with_field("eta", Column::F32(trk_eta))?
            .with_field("d0", Column::F32(d0))?
            .with_field("charge", Column::I8(charge))?
            .with_field("numberOfPixelHits", Column::U8(pixel_hits))?
            .with_field("valid", Column::Bool(valid))?;
        Ok((jets, tracks))
    }
}
