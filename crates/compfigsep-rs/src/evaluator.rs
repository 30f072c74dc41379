//! The evaluator façade: `reset`, `process` batches, then `evaluate`.

use std::collections::{BTreeMap, HashSet};
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::augment::augment_figure;
use crate::dataset::{DatasetRegistry, FigureProvider};
use crate::error::Result;
use crate::eval::evaluate_figures;
use crate::export::export_figures_to_json;
use crate::params::{EvalParams, ExportConfig, Task};
use crate::predictions::{ModelInput, ModelOutput, PredictionStore};
use crate::reduce::{merge, Communicator, LocalCommunicator};
use crate::types::Figure;

/// Metrics per task name, then per metric name.
pub type TaskMetrics = BTreeMap<String, BTreeMap<String, f64>>;

/// Lifecycle shared by every data set evaluator.
pub trait DatasetEvaluator {
    /// Drop everything accumulated so far.
    fn reset(&mut self);

    /// Record one batch of model inputs and the matching outputs.
    fn process(&mut self, inputs: &[ModelInput], outputs: &[ModelOutput]);

    /// Score the accumulated predictions.
    ///
    /// Returns `Ok(None)` on every worker but the coordinator.
    fn evaluate(&mut self) -> Result<Option<TaskMetrics>>;
}

/// Evaluator for one figure data set and one task.
pub struct PanelSegEvaluator<C: Communicator = LocalCommunicator> {
    dataset_name: String,
    task: Task,
    params: EvalParams,
    provider: Arc<dyn FigureProvider>,
    comm: C,
    export: Option<ExportConfig>,
    store: PredictionStore,
}

impl PanelSegEvaluator<LocalCommunicator> {
    /// Single-process evaluator.
    pub fn local(
        registry: &DatasetRegistry,
        dataset_name: &str,
        task_name: &str,
        params: EvalParams,
    ) -> Result<Self> {
        Self::new(registry, dataset_name, task_name, params, LocalCommunicator)
    }
}

impl<C: Communicator> PanelSegEvaluator<C> {
    /// Resolve the data set and parse the task; both fail before any batch is
    /// processed.
    pub fn new(
        registry: &DatasetRegistry,
        dataset_name: &str,
        task_name: &str,
        params: EvalParams,
        comm: C,
    ) -> Result<Self> {
        let task: Task = task_name.parse()?;
        params.validate()?;
        let provider = registry.get(dataset_name)?;
        Ok(PanelSegEvaluator {
            dataset_name: dataset_name.to_string(),
            task,
            params,
            provider,
            comm,
            export: None,
            store: PredictionStore::new(),
        })
    }

    /// Export the augmented figures on every `evaluate`.
    pub fn with_export(mut self, config: ExportConfig) -> Self {
        self.export = Some(config);
        self
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn params(&self) -> &EvalParams {
        &self.params
    }

    /// Predictions accumulated on this worker since the last reset.
    pub fn store(&self) -> &PredictionStore {
        &self.store
    }

    /// Attach merged predictions to the provider's figures.
    fn augmented_figures(&self, merged: &PredictionStore) -> Vec<Figure> {
        let empty = ModelOutput::default();
        let mut seen = HashSet::new();
        let mut figures = Vec::new();
        for item in self.provider.figures() {
            let mut figure = match item {
                Ok(f) => f,
                Err(e) => {
                    warn!(dataset = %self.dataset_name, "skipping figure: {}", e);
                    continue;
                }
            };
            let output = merged.get(figure.index).unwrap_or(&empty);
            augment_figure(&mut figure, output, self.task, &self.params);
            seen.insert(figure.index);
            figures.push(figure);
        }

        let orphans = merged.iter().filter(|(id, _)| !seen.contains(id)).count();
        if orphans > 0 {
            warn!(
                dataset = %self.dataset_name,
                orphans,
                "predictions for images absent from the data set were ignored"
            );
        }
        figures
    }
}

impl<C: Communicator> DatasetEvaluator for PanelSegEvaluator<C> {
    fn reset(&mut self) {
        self.store.clear();
    }

    fn process(&mut self, inputs: &[ModelInput], outputs: &[ModelOutput]) {
        if inputs.len() != outputs.len() {
            warn!(
                inputs = inputs.len(),
                outputs = outputs.len(),
                "batch size mismatch, extra elements ignored"
            );
        }
        for (input, output) in inputs.iter().zip(outputs) {
            self.store.append(input.image_id, output.for_task(self.task));
        }
    }

    fn evaluate(&mut self) -> Result<Option<TaskMetrics>> {
        let local = mem::take(&mut self.store);
        let gathered = match self.comm.gather(local)? {
            Some(stores) => stores,
            None => {
                debug!(rank = self.comm.rank(), "not the coordinator, no metrics");
                return Ok(None);
            }
        };

        let merged = merge(gathered);
        info!(
            dataset = %self.dataset_name,
            task = %self.task,
            images = merged.len(),
            detections = merged.num_detections(),
            "evaluating"
        );

        let figures = self.augmented_figures(&merged);
        let metrics = evaluate_figures(&figures, self.task, &self.params);

        if let Some(config) = &self.export {
            if let Err(e) = export_figures_to_json(&figures, config) {
                warn!("export failed: {}", e);
            }
        }

        let mut results = TaskMetrics::new();
        results.insert(self.task.name().to_string(), metrics);
        Ok(Some(results))
    }
}
