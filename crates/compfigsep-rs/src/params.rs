use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The evaluation task, which decides what is matched and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Panel boxes only.
    PanelSplitting,
    /// Label boxes plus label class.
    LabelRecognition,
    /// Panel boxes jointly with their associated label.
    PanelSegmentation,
}

impl Task {
    pub const ALL: [Task; 3] = [
        Task::PanelSplitting,
        Task::LabelRecognition,
        Task::PanelSegmentation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Task::PanelSplitting => "panel_splitting",
            Task::LabelRecognition => "label_recognition",
            Task::PanelSegmentation => "panel_segmentation",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Task {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Task::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| Error::UnknownTask(s.to_string()))
    }
}

/// Evaluation parameters controlling matching and the precision-recall curve.
///
/// Defaults: a single IoU threshold of 0.5, 101 recall thresholds
/// (0.00, 0.01, ..., 1.00) for interpolated precision and at most 100
/// detections kept per image.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EvalParams {
    /// Minimum IoU for a prediction to match a ground truth.
    pub iou_thr: f64,
    /// Recall thresholds for interpolated precision.
    pub rec_thrs: Vec<f64>,
    /// Maximum detections per image, highest scores first.
    pub max_dets: usize,
}

impl Default for EvalParams {
    fn default() -> Self {
        EvalParams {
            iou_thr: 0.5,
            rec_thrs: (0..=100).map(|i| i as f64 / 100.0).collect(),
            max_dets: 100,
        }
    }
}

impl EvalParams {
    pub fn with_iou_thr(iou_thr: f64) -> Self {
        EvalParams {
            iou_thr,
            ..EvalParams::default()
        }
    }

    /// Reject thresholds outside `[0, 1]` and empty recall grids.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.iou_thr) {
            return Err(Error::InvalidConfig(format!(
                "iou_thr must lie in [0, 1], got {}",
                self.iou_thr
            )));
        }
        if self.rec_thrs.is_empty() {
            return Err(Error::InvalidConfig("rec_thrs must not be empty".into()));
        }
        if self.max_dets == 0 {
            return Err(Error::InvalidConfig("max_dets must be positive".into()));
        }
        Ok(())
    }

    /// Name of the AP metric at this threshold, e.g. `AP50`.
    pub fn ap_name(&self) -> String {
        format!("AP{}", (self.iou_thr * 100.0).round() as u32)
    }
}

/// Where and under which name merged figures are exported.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output directory. Falls back to the parent of `file_name` when that is
    /// a path, and to `output/` otherwise.
    pub output_dir: Option<PathBuf>,
    /// Output file name. A timestamped name is generated when absent.
    pub file_name: Option<PathBuf>,
}
