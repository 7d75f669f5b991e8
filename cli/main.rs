#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process;

use eiger::pipeline::{
    ExperimentReport, MetricTable, RegressionKind, TrainedArtifact, TrainingConfig,
    TrainingOutcome, is_json_path, run_experiment, train, write_predictions,
};
use eiger::regress::BasisKind;

#[derive(Clone, Copy, ValueEnum)]
pub enum RegressionCli {
    Stepwise,
    Mars,
}

impl From<RegressionCli> for RegressionKind {
    fn from(value: RegressionCli) -> Self {
        match value {
            RegressionCli::Stepwise => RegressionKind::Stepwise,
            RegressionCli::Mars => RegressionKind::Mars,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatCli {
    Text,
    Json,
}

#[derive(Args)]
pub struct TrainArgs {
    /// Metric table (TSV or CSV) with one trial per row
    #[arg(value_name = "TABLE")]
    pub table: PathBuf,

    /// Name of the column holding the measured performance
    #[arg(long, value_name = "NAME")]
    pub performance_metric: String,

    /// TOML file with training settings; flags below override it
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of k-means clusters
    #[arg(long, value_name = "K")]
    pub clusters: Option<usize>,

    /// Adjusted R² gain required to accept another basis function
    #[arg(long, value_name = "T")]
    pub threshold: Option<f64>,

    /// Number of cross-validation folds for stepwise selection
    #[arg(long, value_name = "F")]
    pub folds: Option<usize>,

    /// Seed for the fold shuffle
    #[arg(long, value_name = "S")]
    pub seed: Option<u64>,

    #[arg(long, value_enum)]
    pub regression: Option<RegressionCli>,

    /// Comma-separated basis kinds (constant, power, cross, log, sqrt)
    #[arg(long, value_delimiter = ',', value_name = "KINDS")]
    pub basis: Option<Vec<BasisKind>>,

    /// Keep components until this fraction of variance is explained
    #[arg(long, value_name = "FRACTION")]
    pub target_variance: Option<f64>,

    /// Keep at most this many components
    #[arg(long, value_name = "N")]
    pub target_components: Option<usize>,

    /// Do not divide metrics by their standard deviation before PCA
    #[arg(long)]
    pub no_scale: bool,

    /// Skip the VARIMAX rotation
    #[arg(long)]
    pub no_rotate: bool,

    /// Where to write the trained model (default: model.eiger or model.json)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Model file format when --output has no .json extension
    #[arg(long, value_enum, default_value_t = FormatCli::Text)]
    pub format: FormatCli,

    /// Predict the training table with the new model and report the error
    #[arg(long)]
    pub test_fit: bool,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Metric table with the same predictor metrics as the training table
    #[arg(value_name = "TABLE")]
    pub table: PathBuf,

    /// Trained model file (.json for JSON, anything else for text)
    #[arg(long, value_name = "PATH")]
    pub model: PathBuf,

    #[arg(long, value_name = "NAME")]
    pub performance_metric: String,

    /// Where to write per-trial predictions
    #[arg(long, value_name = "PATH", default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "eiger",
    about = "Statistical performance modeling from application and machine metrics",
    long_about = "Reduces application metrics with PCA and VARIMAX, clusters trials with k-means \
                 and fits one regression model per cluster to predict performance."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model from a metric table
    #[command(about = "Train a performance model (outputs: model.eiger)")]
    Train(TrainArgs),

    /// Predict performance for a metric table
    #[command(about = "Apply a trained model to new trials (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    /// Convert a model file between the text and JSON encodings
    #[command(about = "Convert a model between text and JSON by file extension")]
    Convert {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Train(args)) => run_train(args),
        Some(Commands::Predict(args)) => run_predict(args),
        Some(Commands::Convert { input, output }) => run_convert(&input, &output),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn training_config(args: &TrainArgs) -> Result<TrainingConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(clusters) = args.clusters {
        config.clusters = clusters;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(folds) = args.folds {
        config.folds = folds;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(regression) = args.regression {
        config.regression = regression.into();
    }
    if let Some(basis) = &args.basis {
        config.basis_kinds = basis.clone();
    }
    if args.target_variance.is_some() {
        config.target_variance = args.target_variance;
    }
    if args.target_components.is_some() {
        config.target_components = args.target_components;
    }
    if args.no_scale {
        config.scale = false;
    }
    if args.no_rotate {
        config.rotate = false;
    }
    config.validate()?;
    Ok(config)
}

pub fn run_train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = training_config(&args)?;
    println!("Loading metric table from: {}", args.table.display());
    let table = MetricTable::load(&args.table)?;

    let outcome = train(&table, &args.performance_metric, &config)?;
    print_training_summary(&outcome);

    let output = args.output.clone().unwrap_or_else(|| match args.format {
        FormatCli::Text => PathBuf::from("model.eiger"),
        FormatCli::Json => PathBuf::from("model.json"),
    });
    match args.format {
        FormatCli::Json if !is_json_path(&output) => outcome.artifact.save_json(&output)?,
        _ => outcome.artifact.save(&output)?,
    }
    println!("Model saved to: {}", output.display());

    if args.test_fit {
        let report = run_experiment(&outcome.artifact, &table, &args.performance_metric)?;
        println!("Fit on the training table:");
        print_statistics(&report);
    }
    Ok(())
}

pub fn run_predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let artifact = TrainedArtifact::load(&args.model)?;
    println!("Loading metric table from: {}", args.table.display());
    let table = MetricTable::load(&args.table)?;

    let report = run_experiment(&artifact, &table, &args.performance_metric)?;
    print_statistics(&report);
    write_predictions(&args.output, &report)?;
    println!("Predictions saved to: {}", args.output.display());
    Ok(())
}

fn run_convert(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = TrainedArtifact::load(input)?;
    artifact.save(output)?;
    println!(
        "Converted {} to {} ({})",
        input.display(),
        output.display(),
        if is_json_path(output) { "JSON" } else { "text" }
    );
    Ok(())
}

fn print_training_summary(outcome: &TrainingOutcome) {
    let reduction = &outcome.reduction;
    println!(
        "Reduced {} metrics to {} components ({:.2}% of variance){}",
        reduction.metrics,
        reduction.components,
        100.0 * reduction.captured_variance,
        if reduction.degraded {
            "; PCA failed, identity basis used"
        } else {
            ""
        }
    );
    println!(
        "Clustering finished after {} iterations{}",
        outcome.cluster_iterations,
        if outcome.cluster_converged {
            ""
        } else {
            " without converging"
        }
    );
    for (summary, cluster) in outcome.clusters.iter().zip(outcome.artifact.clusters()) {
        let quality = match (summary.r_squared, summary.gcv) {
            (Some(r2), _) => format!("R² = {r2:.6}"),
            (_, Some(gcv)) => format!("GCV = {gcv:.6e}"),
            _ => "no model".to_string(),
        };
        println!(
            "  Cluster {}: {} trials, {} terms, {}",
            summary.cluster, summary.trials, summary.terms, quality
        );
        println!("    {}", cluster.model);
    }
}

fn print_statistics(report: &ExperimentReport) {
    let stats = &report.statistics;
    println!("  Trials: {}", stats.trials);
    println!("  MSE:    {:.6e}", stats.mse);
    println!("  RMSE:   {:.6e}", stats.rmse);
    match stats.mape {
        Some(mape) => println!("  MAPE:   {mape:.3}%"),
        None => println!("  MAPE:   n/a (every actual value is zero)"),
    }
}
