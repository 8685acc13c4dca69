//! Criterion benchmarks for training and prediction.

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use medisight::bundle::ModelBundle;
use medisight::dataset::Dataset;
use medisight::predict::{ModelSelector, predict, predict_batch};
use medisight::schema::FeatureSchema;
use medisight::training::{Trainer, TrainingConfig};
use medisight::vectorize::FeatureInput;

const N_SYMPTOMS: usize = 40;
const N_DISEASES: usize = 8;

fn symptom_name(i: usize) -> String {
    format!("symptom_{i}")
}

/// Each disease owns five symptoms; rows carry most of them plus one stray.
fn generate_dataset(samples_per_disease: usize) -> Dataset {
    let schema = FeatureSchema::new((0..N_SYMPTOMS).map(symptom_name)).unwrap();
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for disease in 0..N_DISEASES {
        for s in 0..samples_per_disease {
            let mut row = vec![0.0; N_SYMPTOMS];
            for k in 0..5 {
                if (s + k) % 5 != 0 {
                    row[disease * 5 + k] = 1.0;
                }
            }
            row[(disease * 7 + s * 3) % N_SYMPTOMS] = 1.0;
            rows.push(row);
            labels.push(format!("disease_{disease}"));
        }
    }
    Dataset::new(schema, rows, labels).unwrap()
}

fn bench_config() -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.random_forest.n_estimators = 20;
    config.gradient_boosting.n_estimators = 20;
    config
}

fn trained_bundle() -> ModelBundle {
    Trainer::new(bench_config())
        .unwrap()
        .train(&generate_dataset(20))
        .unwrap()
}

fn queries(count: usize) -> Vec<FeatureInput> {
    (0..count)
        .map(|i| {
            let disease = i % N_DISEASES;
            FeatureInput::symptoms([symptom_name(disease * 5), symptom_name(disease * 5 + 2)])
        })
        .collect()
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10);

    let dataset = generate_dataset(20);
    group.bench_function("train_full_roster", |b| {
        b.iter(|| {
            let bundle = Trainer::new(bench_config())
                .unwrap()
                .train(black_box(&dataset))
                .unwrap();
            black_box(bundle)
        })
    });

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");
    let bundle = trained_bundle();
    let input = &queries(1)[0];

    for key in ["best", "ensemble", "svm", "logistic_regression", "naive_bayes"] {
        let selector: ModelSelector = key.parse().unwrap();
        group.bench_function(format!("single_{key}"), |b| {
            b.iter(|| black_box(predict(&bundle, black_box(input), &selector, 5).unwrap()))
        });
    }

    let batch = queries(256);
    group.throughput(Throughput::Elements(batch.len() as u64));
    group.bench_function("batch_ensemble", |b| {
        b.iter(|| {
            black_box(predict_batch(&bundle, black_box(&batch), &ModelSelector::Ensemble, 5).unwrap())
        })
    });

    group.finish();
}

fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");
    let bundle = trained_bundle();
    let bytes = bundle.to_bytes().unwrap();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("encode_bundle", |b| b.iter(|| black_box(bundle.to_bytes().unwrap())));
    group.bench_function("decode_bundle", |b| {
        b.iter(|| black_box(ModelBundle::from_bytes(black_box(&bytes)).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction, bench_persistence);
criterion_main!(benches);
