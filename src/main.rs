mod bincount;
mod dump;
mod error;
mod labels;
mod metrics;
mod tracker;
use std::{error::Error, path::PathBuf};

use clap::Parser;
use labels::Dataset;
use metrics::{format_summary_named, StreamSegMetrics};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tracker::BestScore;

#[derive(Parser, Debug)]
#[command(name = "segeval")]
#[command(about = "Streaming IoU/accuracy evaluation of semantic segmentation predictions")]
struct Cli {
    /// Parquet file of label pairs; each file is one validation round
    #[arg(short, long, required = true)]
    input: Vec<PathBuf>,

    /// Dataset the labels belong to
    #[arg(short, long, value_enum, default_value = "cityscapes")]
    dataset: Dataset,

    /// Override the dataset's class count
    #[arg(long)]
    num_classes: Option<usize>,

    /// Label pairs handed to the accumulator per update
    #[arg(short, long, default_value = "6")]
    batch_size: usize,

    /// Write the per-round scores and best round as JSON
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.batch_size == 0 {
        return Err(error::Error::InvalidConfig("batch size must be positive".into()).into());
    }

    let num_classes = cli.num_classes.unwrap_or_else(|| cli.dataset.num_classes());
    let mut metrics = StreamSegMetrics::new(num_classes)?;
    let mut best = BestScore::new(cli.dataset);

    info!(dataset = ?cli.dataset, num_classes, rounds = cli.input.len(), "starting evaluation");

    for (round, path) in cli.input.iter().enumerate() {
        let round = round + 1;
        let pairs = dump::read_pairs(path)?;
        info!(round, path = %path.display(), images = pairs.len(), "validation...");

        // Counts from the previous round must not leak into this one
        metrics.reset();
        for batch in pairs.chunks(cli.batch_size) {
            let (targets, predictions) = dump::unzip(batch);
            metrics.update(&targets, &predictions)?;
        }

        let scores = metrics.compute_results();
        println!("{}", format_summary_named(&scores, cli.dataset.class_names()));
        info!(
            round,
            pixels = metrics.total(),
            overall_acc = scores.overall_acc,
            mean_iou = scores.mean_iou,
            "round evaluated"
        );

        if best.observe(round, &scores) {
            info!(round, best_score = best.best_score(), "new best mean IoU");
        }
    }

    match best.best_round() {
        Some(round) => info!(round, best_score = best.best_score(), "evaluation finished"),
        None => info!("evaluation finished without a positive mean IoU"),
    }

    if let Some(path) = &cli.report {
        best.save_to_file(&mut std::fs::File::create(path)?)?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}
