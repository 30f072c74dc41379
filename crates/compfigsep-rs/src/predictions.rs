//! Raw model outputs and the per-worker prediction accumulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::Task;

/// The part of a model input the evaluator needs: which image it was.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelInput {
    pub image_id: u64,
    #[serde(default)]
    pub file_name: String,
}

/// One predicted region.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f64; 4],
    #[serde(default)]
    pub class_id: u32,
    pub score: f64,
}

/// What the model returned for one input image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelOutput {
    #[serde(default)]
    pub panels: Vec<Detection>,
    /// Label detections; `class_id` indexes the label class vocabulary.
    #[serde(default)]
    pub labels: Vec<Detection>,
}

impl ModelOutput {
    /// Keep only what `task` scores.
    pub fn for_task(&self, task: Task) -> ModelOutput {
        match task {
            Task::PanelSplitting => ModelOutput {
                panels: self.panels.clone(),
                labels: Vec::new(),
            },
            Task::LabelRecognition => ModelOutput {
                panels: Vec::new(),
                labels: self.labels.clone(),
            },
            Task::PanelSegmentation => self.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty() && self.labels.is_empty()
    }
}

/// Predictions collected by one worker, keyed by image id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PredictionStore {
    entries: BTreeMap<u64, ModelOutput>,
}

impl PredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append detections for an image, extending anything already stored.
    pub fn append(&mut self, image_id: u64, output: ModelOutput) {
        let entry = self.entries.entry(image_id).or_default();
        entry.panels.extend(output.panels);
        entry.labels.extend(output.labels);
    }

    /// Store `output` for `image_id`, replacing a previous entry.
    pub fn insert(&mut self, image_id: u64, output: ModelOutput) {
        self.entries.insert(image_id, output);
    }

    pub fn get(&self, image_id: u64) -> Option<&ModelOutput> {
        self.entries.get(&image_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Total number of stored detections, panels and labels.
    pub fn num_detections(&self) -> usize {
        self.entries
            .values()
            .map(|o| o.panels.len() + o.labels.len())
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &ModelOutput)> {
        self.entries.iter().map(|(&k, v)| (k, v))
    }
}

impl IntoIterator for PredictionStore {
    type Item = (u64, ModelOutput);
    type IntoIter = std::collections::btree_map::IntoIter<u64, ModelOutput>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f64, score: f64) -> Detection {
        Detection {
            bbox: [x, x, x + 10.0, x + 10.0],
            class_id: 0,
            score,
        }
    }

    #[test]
    fn test_append_extends() {
        let mut store = PredictionStore::new();
        store.append(
            3,
            ModelOutput {
                panels: vec![det(0.0, 0.9)],
                labels: vec![],
            },
        );
        store.append(
            3,
            ModelOutput {
                panels: vec![det(5.0, 0.4)],
                labels: vec![det(1.0, 0.3)],
            },
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.num_detections(), 3);
        assert_eq!(store.get(3).unwrap().panels.len(), 2);
    }

    #[test]
    fn test_for_task_filters() {
        let out = ModelOutput {
            panels: vec![det(0.0, 0.9)],
            labels: vec![det(1.0, 0.8)],
        };
        assert!(out.for_task(Task::PanelSplitting).labels.is_empty());
        assert!(out.for_task(Task::LabelRecognition).panels.is_empty());
        assert_eq!(out.for_task(Task::PanelSegmentation), out);
    }

    #[test]
    fn test_clear() {
        let mut store = PredictionStore::new();
        store.insert(1, ModelOutput::default());
        store.clear();
        assert!(store.is_empty());
    }
}
