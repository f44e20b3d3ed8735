#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process;

use medcost::config::TrainingConfig;
use medcost::data::{load_training_table, read_delimited};
use medcost::estimate::train as train_model;
use medcost::predict::{PredictError, PredictionRequest, Predictor, requests_from_frame};
use medcost::registry::{ARTIFACTS_DIR, PromotionOutcome, REPORT_FILE, Registry};

const DEFAULT_REGISTRY: &str = "models";

#[derive(Args)]
pub struct TrainArgs {
    /// Path to the patient table (CSV, or TSV with a .tsv extension)
    pub training_data: PathBuf,

    /// Model registry directory
    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,

    /// TOML training configuration; unset fields keep their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Experiment name used as the model id prefix
    #[arg(long)]
    pub experiment: Option<String>,

    /// Number of trees in the forest
    #[arg(long, value_name = "N")]
    pub trees: Option<usize>,

    /// Held-out R² a model must exceed to be promoted
    #[arg(long, value_name = "R2")]
    pub threshold: Option<f64>,

    /// Also write the evaluation report here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Args)]
pub struct InferArgs {
    /// Delimited file with age, bmi, nb_children, sex, smoker, region columns
    pub input: PathBuf,

    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,

    /// Output TSV path (row, prediction, error)
    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct QuoteArgs {
    #[arg(long)]
    pub age: f64,
    #[arg(long)]
    pub bmi: f64,
    #[arg(long)]
    pub children: f64,
    #[arg(long)]
    pub sex: String,
    #[arg(long)]
    pub smoker: String,
    #[arg(long)]
    pub region: String,

    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "medcost",
    about = "Insurance cost model training and serving",
    long_about = "Trains a cross-validated random-forest model of insurance cost from a patient \
                  table, keeps accepted models in a file-system registry, and serves predictions \
                  from the current production model."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, evaluate and (if accepted) promote a model
    Train(TrainArgs),
    /// Predict costs for every row of a file
    Infer(InferArgs),
    /// Predict the cost of a single profile
    Quote(QuoteArgs),
    /// Show the production model and its feature contract
    Status {
        #[arg(long, default_value = DEFAULT_REGISTRY)]
        registry: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Infer(args)) => infer(args),
        Some(Commands::Quote(args)) => quote(args),
        Some(Commands::Status { registry }) => status(registry),
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

pub fn train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(experiment) = args.experiment {
        config.experiment = experiment;
    }
    if let Some(trees) = args.trees {
        config.forest.n_estimators = trees;
    }
    if let Some(threshold) = args.threshold {
        config.acceptance_threshold = threshold;
    }

    let table = load_training_table(&args.training_data)?;
    let outcome = train_model(&table, &config)?;

    if let Some(path) = &args.report {
        outcome.report.save(path)?;
        println!("Evaluation report written to {}", path.display());
    }

    let registry = Registry::open(&args.registry)?;
    match registry.promote(&outcome, config.acceptance_threshold)? {
        PromotionOutcome::Promoted { model_id, r2 } => {
            println!("Model {model_id} promoted to production (held-out R² {r2:.3}).");
            println!(
                "Report: {}",
                registry
                    .root()
                    .join(ARTIFACTS_DIR)
                    .join(&model_id)
                    .join(REPORT_FILE)
                    .display()
            );
        }
        PromotionOutcome::Rejected { r2, threshold } => {
            println!(
                "Model not promoted: held-out R² {r2:.3} does not exceed {threshold:.2}. \
                 The previous production model (if any) is unchanged."
            );
        }
    }
    Ok(())
}

pub fn infer(args: InferArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::open(&args.registry)?;
    let mut predictor = Predictor::new();
    predictor.load(&registry)?;

    let df = read_delimited(&args.input)?;
    let requests = requests_from_frame(&df)?;
    println!("Loaded {} requests from {}", requests.len(), args.input.display());
    let predictions = predictor.predict(&requests)?;

    let mut rejected = 0usize;
    let mut file = std::io::BufWriter::new(std::fs::File::create(&args.output)?);
    writeln!(file, "row\tprediction\terror")?;
    for (i, prediction) in predictions.iter().enumerate() {
        match prediction {
            Ok(value) => writeln!(file, "{}\t{value:.2}\t", i + 1)?,
            Err(PredictError::FeatureMismatch { reason, .. }) => {
                rejected += 1;
                writeln!(file, "{}\t\t{reason}", i + 1)?;
            }
            Err(e) => {
                rejected += 1;
                writeln!(file, "{}\t\t{e}", i + 1)?;
            }
        }
    }
    file.flush()?;
    if rejected > 0 {
        log::warn!(
            "{rejected} of {} requests did not match the model and were not scored.",
            requests.len()
        );
    }
    println!("Predictions saved to: {}", args.output.display());
    Ok(())
}

pub fn quote(args: QuoteArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::open(&args.registry)?;
    let mut predictor = Predictor::new();
    predictor.load(&registry)?;

    let request = PredictionRequest {
        age: Some(args.age),
        bmi: Some(args.bmi),
        nb_children: Some(args.children),
        sex: Some(args.sex),
        smoker: Some(args.smoker),
        region: Some(args.region),
    };
    let prediction = predictor.predict_one(&request)?;
    println!("{prediction:.2}");
    Ok(())
}

pub fn status(registry: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Registry::open(registry)?;
    let Some(id) = registry.production_id()? else {
        println!("No production model in {}", registry.root().display());
        return Ok(());
    };
    let metadata = registry.load_metadata(&id)?;
    println!("Production model: {id}");
    println!("Experiment:       {}", metadata.experiment);
    println!("Feature schema:   v{}", metadata.schema_version);
    println!("Interactions:     {:?}", metadata.interaction);
    println!("Target transform: {:?}", metadata.target_transform);
    println!("Feature columns:  {}", metadata.feature_columns.join(", "));
    println!("Encoded columns:  {}", metadata.encoded_columns.len());
    if let Ok(report) = registry.load_report(&id) {
        let hw = &report.confidence_half_widths;
        println!(
            "Held-out R²:      {:.3} (+/- {:.3}) over {} folds, {} rows",
            report.metrics.r2, hw.r2, report.folds, report.rows
        );
        println!("RMSE:             {:.0} (+/- {:.0})", report.metrics.rmse, hw.rmse);
    }
    let others = registry.list_artifacts()?.len().saturating_sub(1);
    println!("Other artifacts:  {others}");
    Ok(())
}
