//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::bundle::{BundleSummary, ExportManifest};
use crate::cli::args::{MedisightArgs, OutputFormat};
use crate::error::Result;
use crate::predict::PredictionResult;
use crate::serving::{ErrorResponse, ModelInfo, PredictResponse};

/// Result of the `train` command.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingReport {
    pub output: String,
    pub duration_ms: u64,
    pub summary: BundleSummary,
}

/// Result of the `delete` command.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletionReport {
    pub deleted: String,
}

/// Result of the `models` command.
#[derive(Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelList(pub Vec<ModelInfo>);

/// Plain-text rendering for the `human` output format.
pub trait HumanReadable {
    fn to_human(&self) -> String;
}

/// Print `result` in the format selected on the command line.
pub fn output_result<T: Serialize + HumanReadable>(result: &T, args: &MedisightArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                print!("{}", result.to_human());
            }
        }
        OutputFormat::Json => output_json(result, args)?,
    }
    Ok(())
}

fn output_json<T: Serialize>(result: &T, args: &MedisightArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn percent(p: f64) -> String {
    format!("{:6.2}%", p * 100.0)
}

/// Join rendered lines, each terminated by a newline.
fn render(lines: Vec<String>) -> String {
    lines.into_iter().map(|line| line + "\n").collect()
}

impl HumanReadable for BundleSummary {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Format version: {}", self.format_version),
            format!("Trained at:     {}", self.trained_at.to_rfc3339()),
            format!("Samples:        {}", self.n_samples),
            format!("Features:       {}", self.n_features),
            format!("Labels:         {}", self.labels.len()),
            String::new(),
            format!("{:<22} {:<20} {:<8} {:>8}", "Variant", "Family", "Input", "Accuracy"),
            "─".repeat(61),
        ];
        lines.extend(self.variants.iter().map(|v| {
            let marker = if v.key == self.best.key { " *" } else { "" };
            format!(
                "{:<22} {:<20} {:<8} {}{marker}",
                v.key,
                v.family,
                v.representation.to_string(),
                percent(v.accuracy)
            )
        }));
        lines.push(String::new());
        lines.push(format!(
            "Best model: {} ({})",
            self.best.key,
            percent(self.best.accuracy).trim()
        ));
        render(lines)
    }
}

impl HumanReadable for TrainingReport {
    fn to_human(&self) -> String {
        format!(
            "Bundle written to {} in {:.1}s\n\n{}",
            self.output,
            self.duration_ms as f64 / 1000.0,
            self.summary.to_human()
        )
    }
}

impl HumanReadable for PredictionResult {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Model:      {} (mode {})", self.model_used, self.mode),
            format!(
                "Prediction: {} ({})",
                self.primary_prediction,
                percent(self.confidence).trim()
            ),
        ];
        if !self.recognized.is_empty() {
            lines.push(format!("Recognized: {}", self.recognized.join(", ")));
        }
        if !self.unrecognized.is_empty() {
            lines.push(format!("Ignored:    {}", self.unrecognized.join(", ")));
        }
        lines.push(String::new());
        lines.extend(
            self.predictions
                .iter()
                .map(|p| format!("{:>3}. {} {}", p.rank, percent(p.probability), p.label)),
        );
        render(lines)
    }
}

impl HumanReadable for PredictResponse {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Model:      {} ({})", self.model, self.variant),
            format!("Prediction: {} ({})", self.prediction, percent(self.confidence).trim()),
        ];
        lines.extend(
            self.probabilities
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{:>3}. {} {}", i + 1, percent(p.probability), p.label)),
        );
        render(lines)
    }
}

impl HumanReadable for ErrorResponse {
    fn to_human(&self) -> String {
        format!("{} {}: {}\n", self.status, self.kind, self.detail)
    }
}

impl HumanReadable for ModelList {
    fn to_human(&self) -> String {
        render(
            self.0
                .iter()
                .map(|m| {
                    let status = if m.available { "available" } else { "missing" };
                    let width = if m.features.is_empty() {
                        "bundle schema".to_string()
                    } else {
                        format!("{} fields", m.features.len())
                    };
                    let input = format!("{:?}", m.input).to_lowercase();
                    format!("{:<14} {input:<13} {status:<10} {width}", m.key)
                })
                .collect(),
        )
    }
}

impl HumanReadable for ExportManifest {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Manifest generated at {}",
            self.generated_at.to_rfc3339()
        )];
        lines.extend(self.models.iter().map(|m| {
            let width = m.n_features.map_or_else(|| "?".to_string(), |n| n.to_string());
            format!("  {:<14} {:<20} {width} features", m.key, m.file)
        }));
        render(lines)
    }
}

impl HumanReadable for DeletionReport {
    fn to_human(&self) -> String {
        format!("Deleted {}\n", self.deleted)
    }
}
