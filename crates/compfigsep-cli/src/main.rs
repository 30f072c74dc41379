use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use compfigsep_rs::{
    ChannelCommunicator, DatasetEvaluator, DatasetRegistry, EvalParams, ExportConfig,
    JsonFigureProvider, ModelInput, ModelOutput, PanelSegEvaluator, TaskMetrics,
};

/// Name the ground-truth file is registered under.
const DATASET: &str = "cli";

#[derive(Parser)]
#[command(name = "figsep-eval")]
#[command(
    about = "Compound figure separation evaluation: panel splitting, label recognition and panel segmentation metrics"
)]
struct Cli {
    /// Path to ground-truth figures JSON file
    #[arg(long)]
    gt: PathBuf,

    /// Path to predictions JSON file (array of {image_id, panels, labels})
    #[arg(long)]
    dt: PathBuf,

    /// Task: panel_splitting, label_recognition or panel_segmentation
    #[arg(long, default_value = "panel_splitting")]
    task: String,

    /// Evaluation parameters JSON file (iou_thr, rec_thrs, max_dets)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IoU threshold, overrides the config file
    #[arg(long)]
    iou_thr: Option<f64>,

    /// Number of workers the predictions are sharded across
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Predictions handed to `process` at once
    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    /// Export merged figures to this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Export file name (timestamped when omitted)
    #[arg(long)]
    export_name: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One line of the predictions file.
#[derive(Deserialize)]
struct PredictionRecord {
    #[serde(flatten)]
    input: ModelInput,
    #[serde(flatten)]
    output: ModelOutput,
}

fn load_params(cli: &Cli) -> Result<EvalParams, Box<dyn std::error::Error>> {
    let mut params: EvalParams = match &cli.config {
        Some(path) => {
            let reader = std::io::BufReader::new(std::fs::File::open(path)?);
            serde_json::from_reader(reader)?
        }
        None => EvalParams::default(),
    };
    if let Some(iou_thr) = cli.iou_thr {
        params.iou_thr = iou_thr;
    }
    Ok(params)
}

fn load_predictions(path: &Path) -> Result<Vec<PredictionRecord>, Box<dyn std::error::Error>> {
    let reader = std::io::BufReader::new(std::fs::File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Run one worker over its shard; only the coordinator returns metrics.
fn run_worker(
    evaluator: &mut PanelSegEvaluator<ChannelCommunicator>,
    shard: &[PredictionRecord],
    batch_size: usize,
) -> compfigsep_rs::Result<Option<TaskMetrics>> {
    evaluator.reset();
    for batch in shard.chunks(batch_size.max(1)) {
        let inputs: Vec<ModelInput> = batch.iter().map(|r| r.input.clone()).collect();
        let outputs: Vec<ModelOutput> = batch.iter().map(|r| r.output.clone()).collect();
        evaluator.process(&inputs, &outputs);
    }
    evaluator.evaluate()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let params = load_params(&cli)?;

    let mut registry = DatasetRegistry::new();
    registry.register(DATASET, Arc::new(JsonFigureProvider::new(&cli.gt)?));

    tracing::info!(path = %cli.dt.display(), "loading predictions");
    let records = load_predictions(&cli.dt)?;

    let export = (cli.export_dir.is_some() || cli.export_name.is_some()).then(|| ExportConfig {
        output_dir: cli.export_dir.clone(),
        file_name: cli.export_name.clone(),
    });

    // Build every evaluator up front so configuration errors surface before
    // any worker blocks on the gather.
    let workers = cli.workers.max(1);
    let mut evaluators = Vec::with_capacity(workers);
    for comm in ChannelCommunicator::group(workers) {
        let evaluator =
            PanelSegEvaluator::new(&registry, DATASET, &cli.task, params.clone(), comm)?;
        evaluators.push(match &export {
            Some(config) => evaluator.with_export(config.clone()),
            None => evaluator,
        });
    }

    let mut shards: Vec<Vec<PredictionRecord>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, record) in records.into_iter().enumerate() {
        shards[i % workers].push(record);
    }

    let batch_size = cli.batch_size;
    let results: Vec<compfigsep_rs::Result<Option<TaskMetrics>>> = thread::scope(|s| {
        let handles: Vec<_> = evaluators
            .into_iter()
            .zip(&shards)
            .map(|(mut evaluator, shard)| {
                s.spawn(move || run_worker(&mut evaluator, shard, batch_size))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(_) => Err(compfigsep_rs::Error::Gather("worker panicked".into())),
            })
            .collect()
    });

    for result in results {
        if let Some(metrics) = result? {
            for (task, values) in &metrics {
                for (name, value) in values {
                    println!("{}/{} = {:.6}", task, name, value);
                }
            }
        }
    }

    Ok(())
}
