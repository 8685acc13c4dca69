//! Command implementations for the Medisight CLI.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use crate::bundle::ModelBundle;
use crate::bundle::manifest::{ExportManifest, MANIFEST_FILE_NAME};
use crate::cli::args::*;
use crate::cli::output::*;
use crate::dataset::Dataset;
use crate::predict::{ModelSelector, predict};
use crate::serving::{ModelRegistry, PredictionService, RegistryConfig};
use crate::training::{Trainer, TrainingConfig};
use crate::vectorize::FeatureInput;

/// Execute a CLI command.
pub fn execute_command(args: MedisightArgs) -> Result<()> {
    match &args.command {
        Command::Train(train_args) => train(train_args, &args),
        Command::Predict(predict_args) => predict_with_bundle(predict_args, &args),
        Command::Inspect(inspect_args) => inspect(inspect_args, &args),
        Command::Models(registry_args) => list_models(registry_args, &args),
        Command::Request(request_args) => answer_request(request_args, &args),
        Command::Manifest(manifest_args) => write_manifest(manifest_args, &args),
        Command::Delete(delete_args) => delete(delete_args, &args),
    }
}

fn train(train_args: &TrainArgs, cli_args: &MedisightArgs) -> Result<()> {
    let mut config = match &train_args.config {
        Some(path) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("failed to read training config {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if train_args.threads.is_some() {
        config.threads = train_args.threads;
    }

    let dataset = Dataset::from_csv_path(&train_args.dataset, &train_args.label_column)
        .with_context(|| format!("failed to load dataset {}", train_args.dataset.display()))?;

    let started = Instant::now();
    let bundle = Trainer::new(config)?.train(&dataset).context("training failed")?;
    bundle
        .save(&train_args.output)
        .with_context(|| format!("failed to write bundle {}", train_args.output.display()))?;

    output_result(
        &TrainingReport {
            output: train_args.output.display().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            summary: bundle.summary(),
        },
        cli_args,
    )?;
    Ok(())
}

fn load_bundle(path: &std::path::Path) -> Result<ModelBundle> {
    ModelBundle::load(path).with_context(|| format!("failed to load bundle {}", path.display()))
}

fn predict_with_bundle(predict_args: &PredictArgs, cli_args: &MedisightArgs) -> Result<()> {
    let bundle = load_bundle(&predict_args.bundle)?;
    let selector: ModelSelector = predict_args.mode.parse()?;

    let input = if predict_args.field.is_empty() {
        FeatureInput::Symptoms(predict_args.symptoms.clone())
    } else {
        FeatureInput::Measurements(predict_args.field.iter().cloned().collect::<BTreeMap<_, _>>())
    };

    let result = predict(&bundle, &input, &selector, predict_args.top_n)?;
    output_result(&result, cli_args)?;
    Ok(())
}

fn inspect(inspect_args: &InspectArgs, cli_args: &MedisightArgs) -> Result<()> {
    let bundle = load_bundle(&inspect_args.bundle)?;
    output_result(&bundle.summary(), cli_args)?;
    Ok(())
}

fn delete(delete_args: &InspectArgs, cli_args: &MedisightArgs) -> Result<()> {
    ModelBundle::delete(&delete_args.bundle)
        .with_context(|| format!("failed to delete {}", delete_args.bundle.display()))?;
    output_result(
        &DeletionReport {
            deleted: delete_args.bundle.display().to_string(),
        },
        cli_args,
    )?;
    Ok(())
}

fn registry(registry_args: &RegistryArgs) -> Result<ModelRegistry> {
    let mut config = match &registry_args.registry {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("failed to read registry {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    if let Some(dir) = &registry_args.models_dir {
        config.base_dir = dir.clone();
    }
    Ok(ModelRegistry::new(config))
}

fn list_models(registry_args: &RegistryArgs, cli_args: &MedisightArgs) -> Result<()> {
    let service = PredictionService::from_registry(registry(registry_args)?);
    output_result(&ModelList(service.models()), cli_args)?;
    Ok(())
}

fn answer_request(request_args: &RequestArgs, cli_args: &MedisightArgs) -> Result<()> {
    let service = PredictionService::from_registry(registry(&request_args.registry)?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match runtime.block_on(service.handle_json(&request_args.body)) {
        Ok(response) => {
            output_result(&response, cli_args)?;
            Ok(())
        }
        Err(error) => {
            output_result(&error, cli_args)?;
            bail!("request failed with status {}", error.status)
        }
    }
}

fn write_manifest(manifest_args: &ManifestArgs, cli_args: &MedisightArgs) -> Result<()> {
    let registry = registry(&manifest_args.registry)?;
    let keys: Vec<String> = if manifest_args.keys.is_empty() {
        registry.keys().map(str::to_string).collect()
    } else {
        manifest_args.keys.clone()
    };

    let mut manifest = ExportManifest::new();
    for key in &keys {
        let bundle = registry
            .artifact_path(key)
            .and_then(ModelBundle::load)
            .map_err(|e| log::warn!("Skipping width of '{key}': {e}"))
            .ok();
        manifest.add(key, format!("{key}.{}", manifest_args.extension), bundle.as_ref());
    }

    let path = manifest_args
        .output
        .clone()
        .unwrap_or_else(|| registry.config().base_dir.join(MANIFEST_FILE_NAME));
    manifest
        .write_json(&path)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    output_result(&manifest, cli_args)?;
    Ok(())
}
