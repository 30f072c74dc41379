//! Attaching raw model predictions to their ground-truth figure.

use std::cmp::Ordering;

use tracing::warn;

use crate::geometry::BBox;
use crate::label::label_class_text;
use crate::params::{EvalParams, Task};
use crate::predictions::{Detection, ModelOutput};
use crate::types::{Figure, Label, Panel, SubFigure};

fn by_score_desc(a: &Detection, b: &Detection) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// Highest-scoring detections first, at most `max_dets`.
fn top_detections(dets: &[Detection], max_dets: usize) -> Vec<&Detection> {
    let mut sorted: Vec<&Detection> = dets.iter().collect();
    sorted.sort_by(|a, b| by_score_desc(a, b));
    sorted.truncate(max_dets);
    sorted
}

fn to_panels(dets: &[Detection], max_dets: usize) -> Vec<Panel> {
    top_detections(dets, max_dets)
        .into_iter()
        .map(|d| Panel::detected(BBox::from_xyxy(d.bbox), d.score))
        .collect()
}

fn to_labels(dets: &[Detection], max_dets: usize) -> Vec<Label> {
    top_detections(dets, max_dets)
        .into_iter()
        .filter_map(|d| match label_class_text(d.class_id) {
            Some(text) => Some(Label::detected(BBox::from_xyxy(d.bbox), text, d.score)),
            None => {
                warn!(class_id = d.class_id, "label class id outside the vocabulary");
                None
            }
        })
        .collect()
}

/// Attach each label to the free panel covering the largest part of it.
///
/// Labels are handled by decreasing score and every panel takes at most one
/// label. A label touching no free panel is dropped. Panels are expected in
/// decreasing score order, which breaks coverage ties.
pub fn assign_labels_to_panels(panels: Vec<Panel>, labels: Vec<Label>) -> Vec<SubFigure> {
    let mut subfigures: Vec<SubFigure> = panels
        .into_iter()
        .map(|p| SubFigure::new(p, None))
        .collect();

    let mut labels = labels;
    labels.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .partial_cmp(&a.score.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });

    for label in labels {
        let label_box = match label.bbox {
            Some(b) => b,
            None => continue,
        };
        let mut best: Option<(usize, f64)> = None;
        for (i, subfigure) in subfigures.iter().enumerate() {
            if subfigure.label.is_some() {
                continue;
            }
            let coverage = label_box.overlap_ratio(&subfigure.panel.bbox);
            if coverage <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, c)| coverage > c) {
                best = Some((i, coverage));
            }
        }
        if let Some((i, _)) = best {
            subfigures[i].label = Some(label);
        }
    }
    subfigures
}

/// Annotate `figure` with the predictions relevant to `task`.
pub fn augment_figure(figure: &mut Figure, output: &ModelOutput, task: Task, params: &EvalParams) {
    match task {
        Task::PanelSplitting => {
            figure.detected_subfigures = to_panels(&output.panels, params.max_dets)
                .into_iter()
                .map(|p| SubFigure::new(p, None))
                .collect();
        }
        Task::LabelRecognition => {
            figure.detected_labels = to_labels(&output.labels, params.max_dets);
        }
        Task::PanelSegmentation => {
            let panels = to_panels(&output.panels, params.max_dets);
            let labels = to_labels(&output.labels, params.max_dets);
            figure.detected_subfigures = assign_labels_to_panels(panels, labels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::label_class_id;

    fn det(bbox: [f64; 4], class_id: u32, score: f64) -> Detection {
        Detection {
            bbox,
            class_id,
            score,
        }
    }

    #[test]
    fn test_panel_splitting_sorts_and_truncates() {
        let mut figure = Figure::new(0, "a.png", 100, 100);
        let output = ModelOutput {
            panels: vec![
                det([0.0, 0.0, 10.0, 10.0], 0, 0.2),
                det([20.0, 0.0, 30.0, 10.0], 0, 0.9),
                det([40.0, 0.0, 50.0, 10.0], 0, 0.5),
            ],
            labels: vec![det([0.0, 0.0, 2.0, 2.0], 10, 0.9)],
        };
        let params = EvalParams {
            max_dets: 2,
            ..EvalParams::default()
        };
        augment_figure(&mut figure, &output, Task::PanelSplitting, &params);
        let scores: Vec<f64> = figure
            .detected_subfigures
            .iter()
            .map(|s| s.panel.score.unwrap())
            .collect();
        assert_eq!(scores, vec![0.9, 0.5]);
        assert!(figure.detected_labels.is_empty());
    }

    #[test]
    fn test_label_recognition_maps_class_ids() {
        let mut figure = Figure::new(0, "a.png", 100, 100);
        let a = label_class_id("a").unwrap();
        let output = ModelOutput {
            panels: vec![],
            labels: vec![
                det([0.0, 0.0, 2.0, 2.0], a, 0.9),
                det([5.0, 5.0, 7.0, 7.0], 999, 0.8),
            ],
        };
        augment_figure(&mut figure, &output, Task::LabelRecognition, &EvalParams::default());
        assert_eq!(figure.detected_labels.len(), 1);
        assert_eq!(figure.detected_labels[0].text, "a");
        assert!(figure.detected_subfigures.is_empty());
    }

    #[test]
    fn test_assign_labels_to_panels() {
        let panels = vec![
            Panel::detected(BBox::new(0, 0, 50, 50), 0.9),
            Panel::detected(BBox::new(50, 0, 100, 50), 0.8),
        ];
        let labels = vec![
            // Mostly inside the second panel.
            Label::detected(BBox::new(48, 0, 58, 10), "b", 0.7),
            Label::detected(BBox::new(2, 2, 10, 10), "a", 0.9),
            // Outside every panel.
            Label::detected(BBox::new(200, 200, 210, 210), "c", 0.95),
        ];
        let subfigures = assign_labels_to_panels(panels, labels);
        assert_eq!(subfigures.len(), 2);
        assert_eq!(subfigures[0].label_text(), "a");
        assert_eq!(subfigures[1].label_text(), "b");
    }

    #[test]
    fn test_each_panel_takes_one_label() {
        let panels = vec![Panel::detected(BBox::new(0, 0, 50, 50), 0.9)];
        let labels = vec![
            Label::detected(BBox::new(2, 2, 10, 10), "a", 0.6),
            Label::detected(BBox::new(20, 20, 28, 28), "b", 0.8),
        ];
        let subfigures = assign_labels_to_panels(panels, labels);
        assert_eq!(subfigures[0].label_text(), "b");
    }
}
