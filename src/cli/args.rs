//! Command line argument parsing for the Medisight CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_LABEL_COLUMN;
use crate::predict::DEFAULT_TOP_N;

/// Medisight - multi-model disease prediction
#[derive(Parser, Debug, Clone)]
#[command(name = "medisight")]
#[command(about = "Train, inspect and query multi-model disease prediction bundles")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct MedisightArgs {
    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl MedisightArgs {
    /// Effective verbosity: 0 quiet, 1 normal, 2 info, 3 debug, 4+ trace.
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            1 + self.verbose
        }
    }

    /// Log level filter matching the verbosity flags.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity() {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Train every classifier on a dataset and write a bundle
    Train(TrainArgs),

    /// Predict from symptoms or measurements with a bundle
    Predict(PredictArgs),

    /// Show what a bundle contains
    Inspect(InspectArgs),

    /// List the models of a serving registry
    Models(RegistryArgs),

    /// Answer a JSON prediction request through the serving layer
    Request(RequestArgs),

    /// Write the export manifest for a registry
    Manifest(ManifestArgs),

    /// Delete a persisted bundle
    Delete(InspectArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct TrainArgs {
    /// Pivoted CSV dataset (one 0/1 column per feature plus a label column)
    #[arg(value_name = "DATASET")]
    pub dataset: PathBuf,

    /// Where to write the bundle
    #[arg(short, long, value_name = "BUNDLE")]
    pub output: PathBuf,

    /// Name of the label column
    #[arg(long, default_value = DEFAULT_LABEL_COLUMN)]
    pub label_column: String,

    /// Training configuration (JSON)
    #[arg(short, long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Worker threads (overrides the configuration)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

#[derive(Parser, Debug, Clone)]
pub struct PredictArgs {
    /// Bundle to predict with
    #[arg(value_name = "BUNDLE")]
    pub bundle: PathBuf,

    /// Observed symptoms
    #[arg(value_name = "SYMPTOM", conflicts_with = "field")]
    pub symptoms: Vec<String>,

    /// Named measurement, repeatable (e.g. --field glucose=148)
    #[arg(long, value_name = "NAME=VALUE", value_parser = parse_field)]
    pub field: Vec<(String, f64)>,

    /// Variant to use: best, ensemble or a variant key
    #[arg(short, long, default_value = "best")]
    pub mode: String,

    /// Number of ranked labels to show
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    #[arg(value_name = "BUNDLE")]
    pub bundle: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct RegistryArgs {
    /// Registry configuration (JSON); the built-in registry when absent
    #[arg(short, long, value_name = "REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Override the registry's base directory
    #[arg(long, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct RequestArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Request body, e.g. '{"model":"common","data":{"symptoms":["fever"]}}'
    #[arg(value_name = "JSON")]
    pub body: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ManifestArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Keys to include; every registry key when empty
    #[arg(value_name = "KEY")]
    pub keys: Vec<String>,

    /// Manifest path; `models_manifest.json` in the models directory by default
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Extension of the exported model files
    #[arg(long, default_value = "onnx")]
    pub extension: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

fn parse_field(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}
