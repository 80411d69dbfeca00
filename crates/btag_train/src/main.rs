use anyhow::{Context, Result};
use btag_data::synth::SyntheticStore;
use btag_data::{flatten, AlignedCursor, BatchStreamer, EventSource, StreamConfig};
use btag_train::{fit_generator, FlavorTagger, TensorContract};
use tch::Device;
use tracing::info;
use tracing_subscriber::EnvFilter;

const NUM_EVENTS: usize = 2_000;
const TRACK_CAPACITY: usize = 60;
const SEED: u64 = 42;
const STEPS_PER_EPOCH: usize = 20;
const EPOCHS: usize = 3;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .init();

    let dir = std::env::temp_dir().join("btag-train-demo");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join("events.safetensors");
    SyntheticStore::new(NUM_EVENTS, TRACK_CAPACITY, SEED).write(&path)?;

    let mut cursor = AlignedCursor::open(&path)?;

    // Inspect the first three events
    let (jets, tracks) = cursor.read(0, 3)?;
    println!("Jets (pt, eta):");
    println!("{}", flatten(&jets, &["pt", "eta"])?);
    println!("\nTracks (pt, numberOfPixelHits), first 5 slots:");
    println!(
        "{}",
        flatten(&tracks, &["pt", "numberOfPixelHits"])?.narrow(1, 0, 5)
    );

    let config = StreamConfig::default();
    let capacity = cursor.subobject_capacity();
    let mut stream = BatchStreamer::new(cursor, config.clone())?;
    info!(
        steps_per_cycle = stream.steps_per_cycle(),
        usable_span = stream.usable_span(),
        "streaming"
    );

    for batch in stream.by_ref().take(3) {
        let batch = batch?;
        let (tracks, jets) = batch.inputs();
        let (labels, aux) = batch.targets();
        info!(
            start = batch.start,
            tracks = ?tracks.size(),
            jets = ?jets.size(),
            labels = ?labels.size(),
            aux = ?aux.size(),
            "batch"
        );
    }

    let contract = TensorContract::for_stream(&config, capacity);
    let mut tagger = FlavorTagger::new(contract, Device::cuda_if_available())?;
    let history = fit_generator(&mut tagger, stream.by_ref(), STEPS_PER_EPOCH, EPOCHS)?;

    println!("\nEpoch  loss      flavor    charge    accuracy");
    for summary in &history.epochs {
        println!(
            "{:>5}  {:<8.4}  {:<8.4}  {:<8.4}  {:.3}",
            summary.epoch,
            summary.mean.loss,
            summary.mean.flavor_loss,
            summary.mean.charge_loss,
            summary.mean.flavor_accuracy
        );
    }

    let (epoch, step) = stream.position();
    info!(epoch, step, "stream position after fit");
    stream.into_source().close();
    std::fs::remove_file(&path)
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(())
}
