use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use serde::Deserialize;

use compfigsep_rs::{
    ChannelCommunicator, DatasetEvaluator, DatasetRegistry, EvalParams, ExportConfig, Figure,
    FigureProvider, JsonFigureProvider, ModelInput, ModelOutput, PanelSegEvaluator, TaskMetrics,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[derive(Deserialize)]
struct Record {
    #[serde(flatten)]
    input: ModelInput,
    #[serde(flatten)]
    output: ModelOutput,
}

fn load_predictions() -> (Vec<ModelInput>, Vec<ModelOutput>) {
    let text = std::fs::read_to_string(fixtures_dir().join("predictions.json"))
        .expect("Failed to read predictions");
    let records: Vec<Record> = serde_json::from_str(&text).expect("Failed to parse predictions");
    records.into_iter().map(|r| (r.input, r.output)).unzip()
}

fn registry() -> DatasetRegistry {
    let provider = JsonFigureProvider::new(fixtures_dir().join("figures.json"))
        .expect("Failed to open figures");
    let mut registry = DatasetRegistry::new();
    registry.register("fixtures", Arc::new(provider));
    registry
}

fn run_task(task: &str) -> BTreeMap<String, f64> {
    let registry = registry();
    let mut evaluator =
        PanelSegEvaluator::local(&registry, "fixtures", task, EvalParams::default()).unwrap();
    let (inputs, outputs) = load_predictions();
    evaluator.reset();
    evaluator.process(&inputs, &outputs);
    let mut results = evaluator.evaluate().unwrap().expect("Coordinator should get metrics");
    results.remove(task).expect("Metrics should be keyed by task")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_load_figures() {
    let registry = registry();
    let provider = registry.get("fixtures").unwrap();
    let figures: Vec<Figure> = provider.figures().map(|f| f.unwrap()).collect();
    assert_eq!(figures.len(), 3);
    assert_eq!(figures[0].gt_label_texts(), vec!["A", "B"]);
    assert_eq!(figures[2].gt_label_texts(), vec!["_"]);
}

#[test]
fn test_panel_splitting() {
    let metrics = run_task("panel_splitting");
    assert_eq!(metrics["true_positives"], 4.0);
    assert_eq!(metrics["false_positives"], 1.0);
    assert_eq!(metrics["false_negatives"], 1.0);
    assert_close(metrics["precision"], 0.8);
    assert_close(metrics["recall"], 0.8);
    // Precision is 1 up to recall 0.8, then never reached: 81 of 101 thresholds.
    assert_close(metrics["AP50"], 81.0 / 101.0);
    assert_close(metrics["imageclef_accuracy"], 2.0 / 3.0);
}

#[test]
fn test_label_recognition() {
    let metrics = run_task("label_recognition");
    assert_eq!(metrics["true_positives"], 4.0);
    assert_eq!(metrics["false_positives"], 0.0);
    assert_eq!(metrics["AP50"], 1.0);
    for class in ["A", "B", "1", "2"] {
        assert_eq!(metrics[&format!("AP50/{}", class)], 1.0);
    }
    assert!(!metrics.contains_key("imageclef_accuracy"));
}

#[test]
fn test_panel_segmentation() {
    let metrics = run_task("panel_segmentation");
    assert_eq!(metrics["true_positives"], 4.0);
    assert_eq!(metrics["false_positives"], 1.0);
    assert_close(metrics["label_structure_accuracy"], 1.0);
    assert_close(metrics["imageclef_accuracy"], 2.0 / 3.0);
}

#[test]
fn test_sharded_workers_match_single_process() {
    let single = run_task("panel_segmentation");

    let registry = registry();
    let (inputs, outputs) = load_predictions();
    let comms = ChannelCommunicator::group(3);
    let results: Vec<Option<TaskMetrics>> = thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let registry = &registry;
                let input = inputs[rank].clone();
                let output = outputs[rank].clone();
                s.spawn(move || {
                    let mut evaluator = PanelSegEvaluator::new(
                        registry,
                        "fixtures",
                        "panel_segmentation",
                        EvalParams::default(),
                        comm,
                    )
                    .unwrap();
                    evaluator.process(&[input], &[output]);
                    evaluator.evaluate().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    let sharded = results[0].as_ref().unwrap();
    assert_eq!(sharded["panel_segmentation"], single);
}

#[test]
fn test_export_round_trips_through_provider() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry();
    let mut evaluator = PanelSegEvaluator::local(
        &registry,
        "fixtures",
        "panel_segmentation",
        EvalParams::default(),
    )
    .unwrap()
    .with_export(ExportConfig {
        output_dir: Some(dir.path().to_path_buf()),
        file_name: Some("merged.json".into()),
    });
    let (inputs, outputs) = load_predictions();
    evaluator.process(&inputs, &outputs);
    evaluator.evaluate().unwrap();

    // The exported file is itself a valid figure source.
    let exported = JsonFigureProvider::new(dir.path().join("merged.json")).unwrap();
    let figures: Vec<Figure> = exported.figures().map(|f| f.unwrap()).collect();
    assert_eq!(figures.len(), 3);
    let fig_0 = figures
        .iter()
        .find(|f| f.image_filename() == "fig_0.png")
        .unwrap();
    assert_eq!(fig_0.detected_label_texts(), vec!["A", "B"]);
}
