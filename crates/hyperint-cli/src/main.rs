//! hyperint CLI
//!
//! Task-agnostic evaluation of interval hypernetwork classifiers.
//!
//! # Commands
//!
//! - `hyperint evaluate <bundle>` - Evaluate one trained model
//! - `hyperint sweep <bundle>... --alpha a --alpha b` - Evaluate several models at several alphas
//! - `hyperint inspect <bundle>` - Show what a bundle contains

use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use hyperint_core::io::read_json_maybe_gzip;
use hyperint_core::num_weights;
use hyperint_eval::results::summaries_to_delimited;
use hyperint_eval::{
    load_bundle, AlphaSummary, EvaluationConfig, Evaluator, ExperimentBundle, ModelSummary,
    ParallelConfig, ResultTable,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hyperint")]
#[command(about = "Entropy-based task inference for interval hypernetwork classifiers")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one trained model without task identities
    Evaluate {
        /// Experiment bundle (.json or .json.gz)
        bundle: PathBuf,
        /// Index used in the result file name
        #[arg(short, long, default_value = "0")]
        model_index: usize,
        /// Override the interval half-width stored in the bundle
        #[arg(long)]
        alpha: Option<f32>,
        /// Output directory (defaults to the bundle's saving folder)
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        options: EvalOptions,
    },
    /// Evaluate several models at several alphas
    Sweep {
        /// Experiment bundles; their position is the model index
        #[arg(required = true)]
        bundles: Vec<PathBuf>,
        /// Alpha values to evaluate (repeatable)
        #[arg(short, long = "alpha", required = true)]
        alphas: Vec<f32>,
        /// Root directory; one timestamped subdirectory is created per alpha
        #[arg(short, long, default_value = "Results")]
        out: PathBuf,
        #[command(flatten)]
        options: EvalOptions,
    },
    /// Show the contents of a bundle
    Inspect {
        /// Experiment bundle (.json or .json.gz)
        bundle: PathBuf,
    },
}

#[derive(Args)]
struct EvalOptions {
    /// Evaluation config file (JSON, optionally gzip compressed)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Score candidates by plain entropy
    #[arg(long, overrides_with = "no_vanilla")]
    vanilla: bool,
    /// Score candidates by interval-weighted entropy
    #[arg(long, overrides_with = "vanilla")]
    no_vanilla: bool,
    /// Generate interval weights instead of a point estimate
    #[arg(long, overrides_with = "no_full_interval")]
    full_interval: bool,
    /// Generate a point estimate only
    #[arg(long, overrides_with = "full_interval")]
    no_full_interval: bool,
    /// Result table delimiter
    #[arg(short, long)]
    delimiter: Option<char>,
    /// Also write result tables as JSON
    #[arg(long)]
    json: bool,
    /// Record failed tasks and continue
    #[arg(long)]
    isolate_failures: bool,
    /// Number of worker threads for per-sample scoring
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

impl EvalOptions {
    fn evaluation_config(&self) -> anyhow::Result<EvaluationConfig> {
        let mut config: EvaluationConfig = match &self.config {
            Some(path) => read_json_maybe_gzip(path)?,
            None => EvaluationConfig::default(),
        };
        if let Some(delimiter) = self.delimiter {
            config.delimiter = delimiter;
        }
        if let Some(threads) = self.threads {
            config.parallel = ParallelConfig {
                max_threads: Some(threads),
                ..config.parallel
            };
        }
        config.write_json |= self.json;
        config.isolate_failures |= self.isolate_failures;
        Ok(config)
    }

    fn vanilla_override(&self) -> Option<bool> {
        switch(self.vanilla, self.no_vanilla)
    }

    fn full_interval_override(&self) -> Option<bool> {
        switch(self.full_interval, self.no_full_interval)
    }

    fn apply(&self, bundle: &mut ExperimentBundle) {
        let hp = &mut bundle.hyperparameters;
        if let Some(vanilla) = self.vanilla_override() {
            hp.vanilla_entropy = vanilla;
        }
        if let Some(full_interval) = self.full_interval_override() {
            hp.full_interval = full_interval;
        }
    }
}

/// `Some` when one of a `--x`/`--no-x` pair was given.
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<ExperimentBundle> {
    load_bundle(path).with_context(|| format!("Failed to load bundle {}", path.display()))
}

fn print_table(table: &ResultTable, delimiter: char) {
    print!("{}", table.to_delimited(delimiter));
    for failure in &table.failures {
        eprintln!("task {} failed: {}", failure.task, failure.error);
    }
}

fn evaluate(
    bundle_path: &Path,
    model_index: usize,
    alpha: Option<f32>,
    out: Option<&Path>,
    options: &EvalOptions,
) -> anyhow::Result<()> {
    let config = options.evaluation_config()?;
    let mut bundle = load(bundle_path)?;
    options.apply(&mut bundle);
    if let Some(alpha) = alpha {
        bundle.hyperparameters.alpha = alpha;
    }

    let evaluator = Evaluator::new(config);
    let table = evaluator.evaluate_and_save(&bundle, model_index, out)?;
    print_table(&table, evaluator.config().delimiter);
    Ok(())
}

fn sweep(bundles: &[PathBuf], alphas: &[f32], out: &Path, options: &EvalOptions) -> anyhow::Result<()> {
    let config = options.evaluation_config()?;
    let delimiter = config.delimiter;
    let evaluator = Evaluator::new(config);

    let mut loaded = Vec::with_capacity(bundles.len());
    for path in bundles {
        let mut bundle = load(path)?;
        options.apply(&mut bundle);
        loaded.push(bundle);
    }
    let dataset = loaded
        .first()
        .map(|b| b.hyperparameters.dataset.clone())
        .unwrap_or_default();

    for &alpha in alphas {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let dir = out.join(&dataset).join(format!("{}_alpha-{}", timestamp, alpha));
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        info!(alpha, dir = %dir.display(), "Starting alpha");

        let mut summaries = Vec::with_capacity(loaded.len());
        let mut dropped = 0;
        for (model_index, bundle) in loaded.iter_mut().enumerate() {
            bundle.hyperparameters.alpha = alpha;
            let table = evaluator.evaluate_and_save(bundle, model_index, Some(&dir))?;
            match ModelSummary::from_table(&table) {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!(model_index, alpha, error = %e, "Model left out of the summary");
                    dropped += 1;
                }
            }
        }

        fs::write(
            dir.join("entropy_mean_results"),
            summaries_to_delimited(&summaries, delimiter),
        )?;
        let summary = AlphaSummary::from_models(alpha, &summaries)
            .with_context(|| format!("No model could be summarised at alpha {}", alpha))?;
        fs::write(dir.join("hyperparameters"), summary.to_delimited(delimiter))?;
        println!(
            "alpha {}: final mean {:.2}, stdev {:.2} ({} models, {} dropped)",
            alpha,
            summary.final_mean,
            summary.final_stdev,
            summaries.len(),
            dropped
        );
    }
    Ok(())
}

fn inspect(bundle_path: &Path) -> anyhow::Result<()> {
    let bundle = load(bundle_path)?;
    let hp = &bundle.hyperparameters;
    println!("Dataset:        {}", hp.dataset);
    println!("Target network: {}", hp.target_network);
    println!("Tasks:          {}", hp.number_of_tasks);
    println!("Alpha:          {}", hp.alpha);
    println!("Full interval:  {}", hp.full_interval);
    println!("Vanilla:        {}", hp.vanilla_entropy);

    let target = bundle.target_network.as_ref();
    println!(
        "Target: {} inputs, {} outputs, {} parameters in {} tensors",
        target.input_size(),
        target.num_outputs(),
        num_weights(target.param_shapes()),
        target.param_shapes().len()
    );
    let hnet = bundle.hypernetwork.as_ref();
    println!(
        "Hypernetwork: {} tasks, {} parameters in {} tensors",
        hnet.num_tasks(),
        num_weights(hnet.param_shapes()),
        hnet.param_shapes().len()
    );
    for task in 0..bundle.test_sets.num_tasks() {
        let set = bundle.test_sets.extract_test_set(task)?;
        println!("Test set {}: {} samples", task, set.len());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Evaluate {
            bundle,
            model_index,
            alpha,
            out,
            options,
        } => {
            evaluate(&bundle, model_index, alpha, out.as_deref(), &options)?;
        }
        Commands::Sweep {
            bundles,
            alphas,
            out,
            options,
        } => {
            sweep(&bundles, &alphas, &out, &options)?;
        }
        Commands::Inspect { bundle } => {
            inspect(&bundle)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> EvalOptions {
        let argv = ["hyperint", "evaluate", "model.json"].iter().chain(args).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Evaluate { options, .. } => options,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_switches_default_to_bundle_values() {
        let opts = options(&[]);
        assert_eq!(opts.vanilla_override(), None);
        assert_eq!(opts.full_interval_override(), None);
    }

    #[test]
    fn test_no_flags_turn_bundle_switches_off() {
        let opts = options(&["--no-full-interval", "--no-vanilla"]);
        assert_eq!(opts.full_interval_override(), Some(false));
        assert_eq!(opts.vanilla_override(), Some(false));
    }

    #[test]
    fn test_last_switch_wins() {
        let opts = options(&["--vanilla", "--no-vanilla", "--no-full-interval", "--full-interval"]);
        assert_eq!(opts.vanilla_override(), Some(false));
        assert_eq!(opts.full_interval_override(), Some(true));
    }

    #[test]
    fn test_threads_and_delimiter_reach_config() {
        let config = options(&["-j", "3", "--delimiter", "|"]).evaluation_config().unwrap();
        assert_eq!(config.parallel.max_threads, Some(3));
        assert_eq!(config.delimiter, '|');
    }
}
