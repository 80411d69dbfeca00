//! Endless batch stream over an [`EventSource`].
//!
//! Each pull reads one window of `batch_size` consecutive events, flattens the
//! configured sub-object and per-event fields, one-hot encodes the label and
//! passes the auxiliary target through. Window starts come from a
//! [`Sampler`]; when a cycle is exhausted the epoch counter is bumped and the
//! walk restarts at the first start of the next cycle.
//!
//! The stream never ends on its own. A failed pull is yielded once as an error
//! and every later pull returns `None`.

use crate::batch::{one_hot, Batch};
use crate::config::StreamConfig;
use crate::error::DataError;
use crate::flatten::RecordFlattener;
use crate::sampler::{Sampler, SequentialWindowSampler, ShuffledWindowSampler};
use crate::source::EventSource;
use anyhow::{Context, Result};
use tch::Tensor;
use tracing::{debug, error, info, warn};

pub struct BatchStreamer<S: EventSource> {
    source: S,
    config: StreamConfig,
    sampler: Box<dyn Sampler>,
    subobject_flattener: RecordFlattener,
    event_flattener: RecordFlattener,
    /// Window starts of the current cycle, in visiting order
    offsets: Vec<usize>,
    epoch: usize,
    step: usize,
    usable_span: usize,
    aborted: bool,
}

impl<S: EventSource> BatchStreamer<S> {
    /// Creates a stream that visits windows in ascending order, or in a
    /// per-epoch shuffled order when `config.shuffle` is set.
    ///
    /// # Errors
    /// - [`DataError::Config`] or [`DataError::EmptySelection`] if `config`
    ///   is invalid for this source.
    /// - [`DataError::Schema`] if a configured field is missing from the source.
    pub fn new(source: S, config: StreamConfig) -> Result<Self> {
        config.validate(source.total_events())?;
        let total = source.total_events();
        let sampler: Box<dyn Sampler> = if config.shuffle {
            Box::new(ShuffledWindowSampler::new(
                total,
                config.batch_size,
                config.seed.unwrap_or(0),
            )?)
        } else {
            Box::new(SequentialWindowSampler::new(total, config.batch_size)?)
        };
        Self::with_sampler(source, config, sampler)
    }

    /// Creates a stream whose window starts come from `sampler`.
    ///
    /// The sampler alone decides the visiting order; `config.shuffle` and
    /// `config.seed` are ignored on this path.
    ///
    /// # Errors
    /// As [`new`](Self::new), plus [`DataError::Config`] if the sampler yields
    /// no starts or a start past [`usable_span`](Self::usable_span), e.g. a
    /// sampler built for a different batch size.
    pub fn with_sampler(
        source: S,
        config: StreamConfig,
        sampler: Box<dyn Sampler>,
    ) -> Result<Self> {
        config.validate(source.total_events())?;
        let usable_span = source.usable_span(config.batch_size)?;

        // Fail on typos now rather than on the first pull
        source
            .subobject_schema()
            .require(config.subobject_fields.as_slice())?;
        source.event_schema().require(config.event_fields.as_slice())?;
        source
            .event_schema()
            .require(&[&config.label_field, &config.aux_target_field])?;

        let offsets = cycle_offsets(&*sampler, 0, usable_span)?;

        info!(
            total_events = source.total_events(),
            batch_size = config.batch_size,
            usable_span,
            steps_per_cycle = sampler.len(),
            "batch stream ready"
        );

        Ok(Self {
            subobject_flattener: RecordFlattener::new(config.subobject_fields.iter().cloned())?,
            event_flattener: RecordFlattener::new(config.event_fields.iter().cloned())?,
            offsets,
            sampler,
            source,
            config,
            epoch: 0,
            step: 0,
            usable_span,
            aborted: false,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Last valid window start, `total_events - batch_size`.
    pub fn usable_span(&self) -> usize {
        self.usable_span
    }

    /// Number of batches in one full cycle over the source.
    pub fn steps_per_cycle(&self) -> usize {
        self.sampler.len()
    }

    /// `(epoch, step)`: the current cycle and the number of batches already
    /// yielded within it.
    pub fn position(&self) -> (usize, usize) {
        (self.epoch, self.step)
    }

    /// Ends the stream and hands the source back, e.g. to close it.
    pub fn into_source(self) -> S {
        self.source
    }

    fn read_batch(&mut self, start: usize) -> Result<Batch> {
        let batch_size = self.config.batch_size;
        let (events, subobjects) = self
            .source
            .read(start, batch_size)
            .with_context(|| format!("Failed to read window at offset {}", start))?;

        if events.len() != batch_size || subobjects.len() != batch_size {
            return Err(DataError::storage(format!(
                "Source returned {} events and {} sub-object rows for a window of {}",
                events.len(),
                subobjects.len(),
                batch_size
            ))
            .into());
        }

        let (labels, unmatched) = one_hot(
            events.field(&self.config.label_field)?,
            &self.config.label_codes,
        );
        if unmatched > 0 {
            warn!(
                start,
                unmatched,
                label_field = %self.config.label_field,
                "labels outside the configured codes encoded as all-zero rows"
            );
        }

        let aux_target =
            Tensor::from_slice(&events.field(&self.config.aux_target_field)?.to_f64_vec());

        Ok(Batch {
            start,
            subobjects: self.subobject_flattener.flatten(&subobjects)?,
            events: self.event_flattener.flatten(&events)?,
            labels,
            aux_target,
        })
    }
}

/// Collects the window starts of one cycle, rejecting any start from which a
/// full window would not fit.
fn cycle_offsets(
    sampler: &dyn Sampler,
    epoch: usize,
    usable_span: usize,
) -> std::result::Result<Vec<usize>, DataError> {
    let offsets: Vec<usize> = sampler.iter(epoch).collect();
    if offsets.is_empty() {
        return Err(DataError::config(format!(
            "sampler yields no window starts for epoch {}",
            epoch
        )));
    }
    if let Some(&start) = offsets.iter().find(|&&start| start > usable_span) {
        return Err(DataError::config(format!(
            "sampler yields window start {} past the last full window start {}",
            start, usable_span
        )));
    }
    Ok(offsets)
}

impl<S: EventSource> Iterator for BatchStreamer<S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.aborted {
            return None;
        }

        if self.step == self.offsets.len() {
            self.epoch += 1;
            self.step = 0;
            match cycle_offsets(&*self.sampler, self.epoch, self.usable_span) {
                Ok(offsets) => self.offsets = offsets,
                Err(e) => {
                    error!(epoch = self.epoch, error = %e, "aborting batch stream");
                    self.aborted = true;
                    return Some(Err(e.into()));
                }
            }
            debug!(epoch = self.epoch, "starting new cycle");
        }

        let start = *self.offsets.get(self.step)?;
        self.step += 1;

        match self.read_batch(start) {
            Ok(batch) => {
                debug!(epoch = self.epoch, step = self.step, start, "batch ready");
                Some(Ok(batch))
            }
            Err(e) => {
                error!(start, error = %e, "aborting batch stream");
                self.aborted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Column, RecordArray, Schema};
    use crate::source::InMemorySource;

    const N: usize = 10;
    const CAPACITY: usize = 2;

    /// Event `i` has `pt = i`, `eta = -i` and label code `[0, 4, 5, 15][i % 4]`.
    /// Sub-object `(i, j)` has `d0 = 10 i + j`.
    fn make_source(n: usize) -> InMemorySource {
        let codes = [0, 4, 5, 15];
        let jets = RecordArray::new([n])
            .with_field("pt", Column::F32((0..n).map(|i| i as f32).collect()))
            .unwrap()
            .with_field("eta", Column::F64((0..n).map(|i| -(i as f64)).collect()))
            .unwrap()
            .with_field(
                "LabDr_HadF",
                Column::I32((0..n).map(|i| codes[i % 4]).collect()),
            )
            .unwrap()
            .with_field("mv2c10", Column::F64((0..n).map(|i| i as f64 / 10.0).collect()))
            .unwrap();
        let tracks = RecordArray::new([n, CAPACITY])
            .with_field(
                "d0",
                Column::F32(
                    (0..n * CAPACITY)
                        .map(|k| (10 * (k / CAPACITY) + k % CAPACITY) as f32)
                        .collect(),
                ),
            )
            .unwrap()
            .with_field("charge", Column::I8(vec![1; n * CAPACITY]))
            .unwrap();
        InMemorySource::new(jets, tracks).unwrap()
    }

    fn config(batch_size: usize) -> StreamConfig {
        StreamConfig::builder().batch_size(batch_size).build()
    }

    #[test]
    fn test_sequential_windows_wrap_around() -> Result<()> {
        let mut stream = BatchStreamer::new(make_source(N), config(3))?;
        assert_eq!(stream.steps_per_cycle(), 3);
        assert_eq!(stream.usable_span(), 7);

        let starts: Vec<usize> = stream
            .by_ref()
            .take(7)
            .map(|batch| batch.map(|b| b.start))
            .collect::<Result<_>>()?;
        assert_eq!(starts, vec![0, 3, 6, 0, 3, 6, 0]);
        assert_eq!(stream.position(), (2, 1));
        Ok(())
    }

    #[test]
    fn test_batch_contents() -> Result<()> {
        let mut stream = BatchStreamer::new(make_source(N), config(3))?;
        stream.next();
        let batch = stream.next().ok_or_else(|| anyhow::anyhow!("stream ended"))??;

        assert_eq!(batch.start, 3);
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.subobjects.size(), vec![3, CAPACITY as i64, 2]);
        assert_eq!(batch.events.size(), vec![3, 2]);
        assert_eq!(batch.labels.size(), vec![3, 4]);
        assert_eq!(batch.aux_target.size(), vec![3]);

        // event 4, track 1: d0 then charge
        assert_eq!(batch.subobjects.double_value(&[1, 1, 0]), 41.0);
        assert_eq!(batch.subobjects.double_value(&[1, 1, 1]), 1.0);
        // event 5: pt then eta
        assert_eq!(batch.events.double_value(&[2, 0]), 5.0);
        assert_eq!(batch.events.double_value(&[2, 1]), -5.0);
        // events 3, 4, 5 carry codes 15, 0, 4
        let hot: Vec<i64> = batch.labels.argmax(1, false).try_into()?;
        assert_eq!(hot, vec![3, 0, 1]);
        let aux: Vec<f64> = batch.aux_target.try_into()?;
        assert_eq!(aux, vec![0.3, 0.4, 0.5]);
        Ok(())
    }

    #[test]
    fn test_construction_errors() {
        let err = BatchStreamer::new(make_source(N), config(11)).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Config(_))
        ));

        let bad_field = StreamConfig::builder()
            .batch_size(3)
            .subobject_fields(["d0", "nonexistent_field"])
            .build();
        let err = BatchStreamer::new(make_source(N), bad_field).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Schema { field, .. }) if field == "nonexistent_field"
        ));

        let bad_label = StreamConfig::builder()
            .batch_size(3)
            .label_field("flavour")
            .build();
        assert!(BatchStreamer::new(make_source(N), bad_label).is_err());
    }

    #[test]
    fn test_whole_source_as_one_batch() -> Result<()> {
        let mut stream = BatchStreamer::new(make_source(N), config(N))?;
        for _ in 0..3 {
            let batch = stream.next().ok_or_else(|| anyhow::anyhow!("stream ended"))??;
            assert_eq!(batch.start, 0);
            assert_eq!(batch.batch_size(), N);
        }
        Ok(())
    }

    #[test]
    fn test_shuffled_cycles_cover_every_window() -> Result<()> {
        let config = StreamConfig::builder()
            .batch_size(3)
            .shuffle(true)
            .seed(11)
            .build();
        let mut stream = BatchStreamer::new(make_source(N), config)?;
        for _ in 0..4 {
            let mut starts: Vec<usize> = stream
                .by_ref()
                .take(3)
                .map(|batch| batch.map(|b| b.start))
                .collect::<Result<_>>()?;
            starts.sort_unstable();
            assert_eq!(starts, vec![0, 3, 6]);
        }
        Ok(())
    }

    #[test]
    fn test_unmatched_labels_are_zero_rows() -> Result<()> {
        let config = StreamConfig::builder()
            .batch_size(4)
            .label_codes([5, 15])
            .build();
        let mut stream = BatchStreamer::new(make_source(N), config)?;
        let batch = stream.next().ok_or_else(|| anyhow::anyhow!("stream ended"))??;
        let row_sums: Vec<f64> = batch
            .labels
            .sum_dim_intlist([1i64].as_slice(), false, tch::Kind::Double)
            .try_into()?;
        assert_eq!(row_sums, vec![0.0, 0.0, 1.0, 1.0]);
        Ok(())
    }

    /// Fails every read after the first `healthy_reads`.
    struct FlakySource {
        inner: InMemorySource,
        healthy_reads: usize,
    }

    impl EventSource for FlakySource {
        fn total_events(&self) -> usize {
            self.inner.total_events()
        }

        fn event_schema(&self) -> &Schema {
            self.inner.event_schema()
        }

        fn subobject_schema(&self) -> &Schema {
            self.inner.subobject_schema()
        }

        fn read(&mut self, start: usize, length: usize) -> Result<(RecordArray, RecordArray)> {
            if self.healthy_reads == 0 {
                return Err(DataError::storage("device went away").into());
            }
            self.healthy_reads -= 1;
            self.inner.read(start, length)
        }
    }

    #[test]
    fn test_read_error_aborts_stream() -> Result<()> {
        let source = FlakySource {
            inner: make_source(N),
            healthy_reads: 2,
        };
        let mut stream = BatchStreamer::new(source, config(3))?;
        assert!(stream.next().is_some_and(|b| b.is_ok()));
        assert!(stream.next().is_some_and(|b| b.is_ok()));

        let err = stream
            .next()
            .ok_or_else(|| anyhow::anyhow!("stream ended"))?
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Storage(_))
        ));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
        Ok(())
    }

    #[test]
    fn test_into_source_returns_the_source() -> Result<()> {
        let mut stream = BatchStreamer::new(make_source(N), config(5))?;
        stream.next();
        let mut source = stream.into_source();
        let (jets, _) = source.read(9, 1)?;
        assert_eq!(jets.field("pt")?, &Column::F32(vec![9.0]));
        Ok(())
    }

    #[test]
    fn test_sampler_built_for_another_batch_size() {
        // starts 0, 3, 6 leave no room for a window of 5 at offset 6
        let sampler = Box::new(SequentialWindowSampler::new(N, 3).unwrap());
        let err = BatchStreamer::with_sampler(make_source(N), config(5), sampler)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Config(_))
        ));

        // the same sampler fits a batch size it was not built for, as long as
        // every start leaves room for a full window
        let sampler = Box::new(SequentialWindowSampler::new(N, 3).unwrap());
        assert!(BatchStreamer::with_sampler(make_source(N), config(4), sampler).is_ok());
    }

    /// Yields start 0 for the first cycle and a start past the end afterwards.
    struct DriftingSampler;

    impl Sampler for DriftingSampler {
        fn iter(&self, epoch: usize) -> Box<dyn Iterator<Item = usize> + Send + '_> {
            let start = if epoch == 0 { 0 } else { N };
            Box::new(std::iter::once(start))
        }

        fn len(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_out_of_span_start_in_later_cycle_aborts() -> Result<()> {
        let config = StreamConfig::builder().batch_size(3).shuffle(true).build();
        let mut stream =
            BatchStreamer::with_sampler(make_source(N), config, Box::new(DriftingSampler))?;

        // `config.shuffle` is ignored: the sampler alone decides the order
        let batch = stream.next().ok_or_else(|| anyhow::anyhow!("stream ended"))??;
        assert_eq!(batch.start, 0);

        let err = stream
            .next()
            .ok_or_else(|| anyhow::anyhow!("stream ended"))?
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Config(_))
        ));
        assert!(stream.next().is_none());
        Ok(())
    }
}
