//! Matching and scoring engine for the three figure separation tasks.
//!
//! Evaluation runs in three steps:
//! [`FigureEval::evaluate`] matches detections to ground truth figure by
//! figure, [`FigureEval::accumulate`] builds per-class precision-recall
//! curves and AP, and [`FigureEval::summarize`] reduces them to the metrics
//! mapping.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::geometry::{iou_matrix, BBox};
use crate::label::{label_class_id, map_label, LabelStructure};
use crate::params::{EvalParams, Task};
use crate::types::{Figure, Label};

/// Class key used by the panel tasks.
pub const PANEL_CLASS: &str = "panel";

/// Matched detections of one class, gathered over figures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassStats {
    /// Ground truths taking part in scoring.
    pub num_gt: usize,
    /// Detection scores.
    pub scores: Vec<f64>,
    /// Whether each detection is a true positive.
    pub is_tp: Vec<bool>,
}

impl ClassStats {
    fn push(&mut self, score: f64, tp: bool) {
        self.scores.push(score);
        self.is_tp.push(tp);
    }

    fn extend(&mut self, other: ClassStats) {
        self.num_gt += other.num_gt;
        self.scores.extend(other.scores);
        self.is_tp.extend(other.is_tp);
    }

    pub fn true_positives(&self) -> usize {
        self.is_tp.iter().filter(|&&t| t).count()
    }

    pub fn false_positives(&self) -> usize {
        self.is_tp.len() - self.true_positives()
    }

    pub fn false_negatives(&self) -> usize {
        self.num_gt.saturating_sub(self.true_positives())
    }

    /// Cumulative (recall, precision) over detections sorted by decreasing score.
    pub fn precision_recall_curve(&self) -> (Vec<f64>, Vec<f64>) {
        let mut inds: Vec<usize> = (0..self.scores.len()).collect();
        inds.sort_by(|&a, &b| {
            self.scores[b]
                .partial_cmp(&self.scores[a])
                .unwrap_or(Ordering::Equal)
        });

        let mut rc = Vec::with_capacity(inds.len());
        let mut pr = Vec::with_capacity(inds.len());
        let (mut tp, mut fp) = (0.0f64, 0.0f64);
        for &i in &inds {
            if self.is_tp[i] {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            rc.push(if self.num_gt > 0 {
                tp / self.num_gt as f64
            } else {
                0.0
            });
            pr.push(tp / (tp + fp));
        }
        (rc, pr)
    }

    /// Precision interpolated at each recall threshold, 0 where the recall
    /// is never reached.
    pub fn interpolated_precision(&self, rec_thrs: &[f64]) -> Vec<f64> {
        let (rc, mut pr) = self.precision_recall_curve();
        for d in (0..pr.len().saturating_sub(1)).rev() {
            pr[d] = pr[d].max(pr[d + 1]);
        }
        rec_thrs
            .iter()
            .map(|&thr| match rc.iter().position(|&r| r >= thr) {
                Some(pos) => pr[pos],
                None => 0.0,
            })
            .collect()
    }

    /// Average precision over the recall thresholds; `None` without ground truth.
    pub fn average_precision(&self, rec_thrs: &[f64]) -> Option<f64> {
        if self.num_gt == 0 || rec_thrs.is_empty() {
            return None;
        }
        let precision = self.interpolated_precision(rec_thrs);
        Some(precision.iter().sum::<f64>() / precision.len() as f64)
    }
}

/// Greedy matching of detections against ground truths.
///
/// Detections are visited by decreasing score. Each one picks the unmatched
/// ground truth of highest IoU among those with IoU ≥ `iou_thr` for which
/// `eligible(d, g)` holds. The pair is kept only when `accept(d, g)` holds;
/// otherwise the detection is unmatched and the ground truth stays free.
/// Returns, per detection in input order, the index of its ground truth.
/// Detections without a score in `scores` rank as if scored 0.
pub fn greedy_match<E, A>(
    dt: &[BBox],
    scores: &[f64],
    gt: &[BBox],
    iou_thr: f64,
    eligible: E,
    accept: A,
) -> Vec<Option<usize>>
where
    E: Fn(usize, usize) -> bool,
    A: Fn(usize, usize) -> bool,
{
    let mut dt_matches = vec![None; dt.len()];
    if dt.is_empty() || gt.is_empty() {
        return dt_matches;
    }

    let ious = iou_matrix(dt, gt);
    let mut gt_matched = vec![false; gt.len()];

    let mut order: Vec<usize> = (0..dt.len()).collect();
    let score = |d: usize| scores.get(d).copied().unwrap_or(0.0);
    order.sort_by(|&a, &b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));

    for d in order {
        let mut best: Option<(usize, f64)> = None;
        for (g, &iou) in ious[d].iter().enumerate() {
            if gt_matched[g] || iou < iou_thr || !eligible(d, g) {
                continue;
            }
            if best.map_or(true, |(_, b)| iou > b) {
                best = Some((g, iou));
            }
        }
        if let Some((g, _)) = best {
            if accept(d, g) {
                gt_matched[g] = true;
                dt_matches[d] = Some(g);
            }
        }
    }
    dt_matches
}

/// Class key of a label, when it is meaningful for scoring.
fn label_class_key(label: &Label) -> Option<String> {
    map_label(&label.text).map(String::from)
}

/// Matching result of one figure.
#[derive(Debug, Clone, Default)]
struct FigureMatch {
    classes: BTreeMap<String, ClassStats>,
    /// `correct / max(#gt, #detections)`, for figures with any panel.
    accuracy: Option<f64>,
    /// Whether predicted and ground-truth label structures agree.
    structure_hit: Option<bool>,
}

fn accuracy(correct: usize, num_gt: usize, num_dt: usize) -> Option<f64> {
    let denom = num_gt.max(num_dt);
    (denom > 0).then(|| correct as f64 / denom as f64)
}

fn match_panel_splitting(figure: &Figure, params: &EvalParams) -> FigureMatch {
    let gt: Vec<BBox> = figure.gt_subfigures.iter().map(|s| s.panel.bbox).collect();
    let dt: Vec<BBox> = figure
        .detected_subfigures
        .iter()
        .map(|s| s.panel.bbox)
        .collect();
    let scores: Vec<f64> = figure
        .detected_subfigures
        .iter()
        .map(|s| s.panel.score.unwrap_or(0.0))
        .collect();

    let matches = greedy_match(&dt, &scores, &gt, params.iou_thr, |_, _| true, |_, _| true);

    let mut stats = ClassStats {
        num_gt: gt.len(),
        ..ClassStats::default()
    };
    for (score, m) in scores.iter().zip(&matches) {
        stats.push(*score, m.is_some());
    }
    let correct = stats.true_positives();

    FigureMatch {
        accuracy: accuracy(correct, gt.len(), dt.len()),
        classes: BTreeMap::from([(PANEL_CLASS.to_string(), stats)]),
        structure_hit: None,
    }
}

fn match_label_recognition(figure: &Figure, params: &EvalParams) -> FigureMatch {
    // Unlocalized labels and labels that are not one meaningful character
    // are left out of scoring altogether.
    let gt: Vec<(BBox, String)> = figure
        .gt_subfigures
        .iter()
        .filter_map(|s| {
            let label = s.label.as_ref()?;
            Some((label.bbox?, label_class_key(label)?))
        })
        .collect();
    let dt: Vec<(BBox, String, f64)> = figure
        .detected_labels
        .iter()
        .filter_map(|l| Some((l.bbox?, label_class_key(l)?, l.score.unwrap_or(0.0))))
        .collect();

    let gt_boxes: Vec<BBox> = gt.iter().map(|(b, _)| *b).collect();
    let dt_boxes: Vec<BBox> = dt.iter().map(|(b, _, _)| *b).collect();
    let scores: Vec<f64> = dt.iter().map(|(_, _, s)| *s).collect();

    let matches = greedy_match(
        &dt_boxes,
        &scores,
        &gt_boxes,
        params.iou_thr,
        |d, g| dt[d].1 == gt[g].1,
        |_, _| true,
    );

    let mut classes: BTreeMap<String, ClassStats> = BTreeMap::new();
    for (_, class) in &gt {
        classes.entry(class.clone()).or_default().num_gt += 1;
    }
    for ((_, class, score), m) in dt.iter().zip(&matches) {
        classes.entry(class.clone()).or_default().push(*score, m.is_some());
    }

    FigureMatch {
        classes,
        accuracy: None,
        structure_hit: None,
    }
}

fn match_panel_segmentation(figure: &Figure, params: &EvalParams) -> FigureMatch {
    let gt: Vec<BBox> = figure.gt_subfigures.iter().map(|s| s.panel.bbox).collect();
    // Only localized single-character labels constrain the match.
    let gt_classes: Vec<Option<u32>> = figure
        .gt_subfigures
        .iter()
        .map(|s| {
            s.label
                .as_ref()
                .filter(|l| l.bbox.is_some())
                .and_then(|l| label_class_id(&l.text))
        })
        .collect();

    let dt: Vec<BBox> = figure
        .detected_subfigures
        .iter()
        .map(|s| s.panel.bbox)
        .collect();
    let dt_classes: Vec<Option<u32>> = figure
        .detected_subfigures
        .iter()
        .map(|s| s.label.as_ref().and_then(|l| label_class_id(&l.text)))
        .collect();
    let scores: Vec<f64> = figure
        .detected_subfigures
        .iter()
        .map(|s| s.panel.score.unwrap_or(0.0))
        .collect();

    let matches = greedy_match(
        &dt,
        &scores,
        &gt,
        params.iou_thr,
        |_, _| true,
        |d, g| match gt_classes[g] {
            Some(class) => dt_classes[d] == Some(class),
            None => true,
        },
    );

    let mut stats = ClassStats {
        num_gt: gt.len(),
        ..ClassStats::default()
    };
    for (score, m) in scores.iter().zip(&matches) {
        stats.push(*score, m.is_some());
    }
    let correct = stats.true_positives();

    let structure_hit = (!figure.gt_subfigures.is_empty()).then(|| {
        LabelStructure::infer(&figure.gt_label_texts())
            == LabelStructure::infer(&figure.detected_label_texts())
    });

    FigureMatch {
        accuracy: accuracy(correct, gt.len(), dt.len()),
        classes: BTreeMap::from([(PANEL_CLASS.to_string(), stats)]),
        structure_hit,
    }
}

/// Per-class accumulated results.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassEval {
    pub num_gt: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    /// Interpolated precision at each recall threshold.
    pub precision: Vec<f64>,
    /// Final recall, `None` without ground truth.
    pub recall: Option<f64>,
    pub ap: Option<f64>,
}

/// Accumulated evaluation results over all figures.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedEval {
    pub classes: BTreeMap<String, ClassEval>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub imageclef_accuracy: Option<f64>,
    pub label_structure_accuracy: Option<f64>,
}

impl AccumulatedEval {
    /// Mean AP over classes having at least one ground truth.
    pub fn mean_ap(&self) -> Option<f64> {
        let aps: Vec<f64> = self.classes.values().filter_map(|c| c.ap).collect();
        if aps.is_empty() {
            None
        } else {
            Some(aps.iter().sum::<f64>() / aps.len() as f64)
        }
    }

    pub fn precision(&self) -> Option<f64> {
        let det = self.true_positives + self.false_positives;
        (det > 0).then(|| self.true_positives as f64 / det as f64)
    }

    pub fn recall(&self) -> Option<f64> {
        let gt = self.true_positives + self.false_negatives;
        (gt > 0).then(|| self.true_positives as f64 / gt as f64)
    }
}

/// The figure evaluation object.
pub struct FigureEval {
    pub task: Task,
    pub params: EvalParams,
    eval_figs: Vec<FigureMatch>,
    pub eval: Option<AccumulatedEval>,
}

impl FigureEval {
    pub fn new(task: Task, params: EvalParams) -> Self {
        FigureEval {
            task,
            params,
            eval_figs: Vec::new(),
            eval: None,
        }
    }

    /// Run per-figure matching.
    pub fn evaluate(&mut self, figures: &[Figure]) {
        let task = self.task;
        let params = &self.params;
        self.eval_figs = figures
            .par_iter()
            .map(|figure| match task {
                Task::PanelSplitting => match_panel_splitting(figure, params),
                Task::LabelRecognition => match_label_recognition(figure, params),
                Task::PanelSegmentation => match_panel_segmentation(figure, params),
            })
            .collect();
        self.eval = None;
    }

    /// Accumulate per-figure matches into per-class curves and counts.
    pub fn accumulate(&mut self) {
        let mut classes: BTreeMap<String, ClassStats> = BTreeMap::new();
        let mut accuracies = Vec::new();
        let mut structure_hits = Vec::new();
        for fig in &self.eval_figs {
            for (class, stats) in &fig.classes {
                classes.entry(class.clone()).or_default().extend(stats.clone());
            }
            accuracies.extend(fig.accuracy);
            structure_hits.extend(fig.structure_hit);
        }

        let rec_thrs = &self.params.rec_thrs;
        let class_evals: BTreeMap<String, ClassEval> = classes
            .par_iter()
            .map(|(class, stats)| {
                let tp = stats.true_positives();
                let eval = ClassEval {
                    num_gt: stats.num_gt,
                    true_positives: tp,
                    false_positives: stats.false_positives(),
                    precision: stats.interpolated_precision(rec_thrs),
                    recall: (stats.num_gt > 0).then(|| tp as f64 / stats.num_gt as f64),
                    ap: stats.average_precision(rec_thrs),
                };
                (class.clone(), eval)
            })
            .collect();

        let mean = |v: &[f64]| (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64);
        let hits: Vec<f64> = structure_hits
            .iter()
            .map(|&h| if h { 1.0 } else { 0.0 })
            .collect();

        self.eval = Some(AccumulatedEval {
            true_positives: classes.values().map(ClassStats::true_positives).sum(),
            false_positives: classes.values().map(ClassStats::false_positives).sum(),
            false_negatives: classes.values().map(ClassStats::false_negatives).sum(),
            classes: class_evals,
            imageclef_accuracy: mean(accuracies.as_slice()),
            label_structure_accuracy: mean(hits.as_slice()),
        });
    }

    /// Reduce the accumulated results to `{metric name: score}` and log them.
    ///
    /// Metrics with an empty denominator are left out.
    pub fn summarize(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        let eval = match &self.eval {
            Some(e) => e,
            None => {
                warn!("summarize called before evaluate() and accumulate()");
                return metrics;
            }
        };

        metrics.insert("true_positives".to_string(), eval.true_positives as f64);
        metrics.insert("false_positives".to_string(), eval.false_positives as f64);
        metrics.insert("false_negatives".to_string(), eval.false_negatives as f64);
        if let Some(p) = eval.precision() {
            metrics.insert("precision".to_string(), p);
        }
        if let Some(r) = eval.recall() {
            metrics.insert("recall".to_string(), r);
        }

        let ap_name = self.params.ap_name();
        if let Some(map) = eval.mean_ap() {
            metrics.insert(ap_name.clone(), map);
        }

        match self.task {
            Task::PanelSplitting | Task::PanelSegmentation => {
                if let Some(acc) = eval.imageclef_accuracy {
                    metrics.insert("imageclef_accuracy".to_string(), acc);
                }
            }
            Task::LabelRecognition => {
                for (class, c) in &eval.classes {
                    if let Some(ap) = c.ap {
                        metrics.insert(format!("{}/{}", ap_name, class), ap);
                    }
                }
            }
        }
        if self.task == Task::PanelSegmentation {
            if let Some(acc) = eval.label_structure_accuracy {
                metrics.insert("label_structure_accuracy".to_string(), acc);
            }
        }

        for (name, value) in &metrics {
            info!(task = %self.task, "{:<28} = {:0.4}", name, value);
        }
        metrics
    }
}

/// Run the full evaluate / accumulate / summarize sequence.
pub fn evaluate_figures(
    figures: &[Figure],
    task: Task,
    params: &EvalParams,
) -> BTreeMap<String, f64> {
    let mut eval = FigureEval::new(task, params.clone());
    eval.evaluate(figures);
    eval.accumulate();
    eval.summarize()
}
