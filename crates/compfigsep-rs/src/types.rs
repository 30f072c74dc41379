use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;
use crate::label::PLACEHOLDER;

/// A sub-figure region.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Panel {
    #[serde(rename = "box")]
    pub bbox: BBox,
    /// Detection score (present only on predicted panels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Panel {
    pub fn new(bbox: BBox) -> Self {
        Panel { bbox, score: None }
    }

    pub fn detected(bbox: BBox, score: f64) -> Self {
        Panel {
            bbox,
            score: Some(score),
        }
    }
}

/// An ordinal marker printed next to a panel ("A", "3", "iv", ...).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Label {
    /// Missing when the label was transcribed but never localized.
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(default = "placeholder_text")]
    pub text: String,
    /// Detection score (present only on predicted labels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn placeholder_text() -> String {
    PLACEHOLDER.to_string()
}

impl Label {
    pub fn new(bbox: Option<BBox>, text: impl Into<String>) -> Self {
        Label {
            bbox,
            text: text.into(),
            score: None,
        }
    }

    pub fn detected(bbox: BBox, text: impl Into<String>, score: f64) -> Self {
        Label {
            bbox: Some(bbox),
            text: text.into(),
            score: Some(score),
        }
    }
}

/// One panel and its (optional) label.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubFigure {
    pub panel: Panel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
}

impl SubFigure {
    pub fn new(panel: Panel, label: Option<Label>) -> Self {
        SubFigure { panel, label }
    }

    /// Label text, or the placeholder when the sub-figure is unlabelled.
    pub fn label_text(&self) -> &str {
        self.label.as_ref().map_or(PLACEHOLDER, |l| l.text.as_str())
    }
}

/// A compound figure: image identity plus ground truth and, once augmented, predictions.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Figure {
    /// Image identity used to key model predictions.
    #[serde(default)]
    pub index: u64,
    pub image_path: String,
    #[serde(default)]
    pub image_width: u32,
    #[serde(default)]
    pub image_height: u32,
    #[serde(default)]
    pub gt_subfigures: Vec<SubFigure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_subfigures: Vec<SubFigure>,
    /// Predicted labels that are not attached to any panel (label recognition).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_labels: Vec<Label>,
}

impl Figure {
    pub fn new(index: u64, image_path: impl Into<String>, width: u32, height: u32) -> Self {
        Figure {
            index,
            image_path: image_path.into(),
            image_width: width,
            image_height: height,
            gt_subfigures: Vec::new(),
            detected_subfigures: Vec::new(),
            detected_labels: Vec::new(),
        }
    }

    /// File name component of the image path.
    pub fn image_filename(&self) -> String {
        Path::new(&self.image_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.image_path.clone())
    }

    /// Ground-truth label texts in sub-figure order.
    pub fn gt_label_texts(&self) -> Vec<&str> {
        self.gt_subfigures.iter().map(SubFigure::label_text).collect()
    }

    /// Predicted label texts in sub-figure order.
    pub fn detected_label_texts(&self) -> Vec<&str> {
        self.detected_subfigures
            .iter()
            .map(SubFigure::label_text)
            .collect()
    }
}
