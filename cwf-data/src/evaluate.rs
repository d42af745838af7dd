//! Scores model predictions written back by the notebooks.

use anyhow::Context;
use csv::ReaderBuilder;
use cwf_core::ascii_grid;
use cwf_core::grid::Raster;
use cwf_core::layout::DataLayout;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::split::VALIDATION_FOLD;
use crate::target::Target;

/// Probabilities are clipped to `[EPS, 1 - EPS]` for log loss.
const EPS: f64 = 1e-15;

/// One row of a predictions CSV:
/// `cell_id,year,month,label,score[,fold]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub cell_id: u32,
    pub year: i32,
    pub month: u32,
    pub label: i32,
    pub score: f64,
    #[serde(default)]
    pub fold: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub rows: usize,
    pub positives: usize,
    pub positive_rate: f64,
    /// Undefined when only one class is present.
    pub auc: Option<f64>,
    pub average_precision: Option<f64>,
    pub brier: f64,
    pub log_loss: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub overall: Metrics,
    pub validation: Option<Metrics>,
    pub folds: BTreeMap<i32, Metrics>,
}

pub fn read_predictions(path: &Path) -> anyhow::Result<Vec<Prediction>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut predictions = Vec::new();
    for (line, record) in rdr.deserialize::<Prediction>().enumerate() {
        let prediction: Prediction =
            record.with_context(|| format!("{}: row {}", path.display(), line + 1))?;
        if !(0.0..=1.0).contains(&prediction.score) {
            anyhow::bail!(
                "{}: row {} has score {} outside [0, 1]",
                path.display(),
                line + 1,
                prediction.score
            );
        }
        predictions.push(prediction);
    }
    Ok(predictions)
}

/// ROC AUC from the Mann-Whitney U statistic; tied scores share the
/// average of their ranks.
pub fn roc_auc(labels: &[bool], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; the tie group spans start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|i| labels[**i]).count();
        positive_rank_sum += rank * tied_positives as f64;
        start = end;
    }
    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Average precision: precision at each distinct score threshold,
/// weighted by the recall gained there.
pub fn average_precision(labels: &[bool], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    if positives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut previous_recall = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            if labels[order[end]] {
                tp += 1;
            } else {
                fp += 1;
            }
            end += 1;
        }
        let precision = tp as f64 / (tp + fp) as f64;
        let recall = tp as f64 / positives as f64;
        ap += (recall - previous_recall) * precision;
        previous_recall = recall;
        start = end;
    }
    Some(ap)
}

pub fn brier_score(labels: &[bool], scores: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(scores)
        .map(|(l, s)| {
            let y = if *l { 1.0 } else { 0.0 };
            (s - y).powi(2)
        })
        .sum();
    total / labels.len() as f64
}

pub fn log_loss(labels: &[bool], scores: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(scores)
        .map(|(l, s)| {
            let p = s.clamp(EPS, 1.0 - EPS);
            if *l {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / labels.len() as f64
}

/// Precision, recall and F1 when scores at or above `threshold` are
/// called positive. Empty denominators give 0.
pub fn threshold_scores(labels: &[bool], scores: &[f64], threshold: f64) -> (f64, f64, f64) {
    let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
    for (label, score) in labels.iter().zip(scores) {
        match (*score >= threshold, *label) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    let ratio = |a: usize, b: usize| if b == 0 { 0.0 } else { a as f64 / b as f64 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}

pub fn compute_metrics(predictions: &[&Prediction], threshold: f64) -> Metrics {
    let labels: Vec<bool> = predictions.iter().map(|p| p.label == 1).collect();
    let scores: Vec<f64> = predictions.iter().map(|p| p.score).collect();
    let positives = labels.iter().filter(|l| **l).count();
    let (precision, recall, f1) = threshold_scores(&labels, &scores, threshold);
    Metrics {
        rows: labels.len(),
        positives,
        positive_rate: if labels.is_empty() {
            0.0
        } else {
            positives as f64 / labels.len() as f64
        },
        auc: roc_auc(&labels, &scores),
        average_precision: average_precision(&labels, &scores),
        brier: brier_score(&labels, &scores),
        log_loss: log_loss(&labels, &scores),
        precision,
        recall,
        f1,
    }
}

/// Metrics over all rows, the validation rows and each training fold.
pub fn evaluate(predictions: &[Prediction], threshold: f64) -> EvaluationReport {
    let all: Vec<&Prediction> = predictions.iter().collect();
    let mut by_fold: BTreeMap<i32, Vec<&Prediction>> = BTreeMap::new();
    for prediction in predictions {
        if let Some(fold) = prediction.fold {
            by_fold.entry(fold).or_default().push(prediction);
        }
    }
    let validation = by_fold
        .remove(&VALIDATION_FOLD)
        .map(|rows| compute_metrics(&rows, threshold));
    EvaluationReport {
        threshold,
        overall: compute_metrics(&all, threshold),
        validation,
        folds: by_fold
            .into_iter()
            .map(|(fold, rows)| (fold, compute_metrics(&rows, threshold)))
            .collect(),
    }
}

/// Mean score of every region cell over all predicted months.
pub fn mean_score_map(predictions: &[Prediction], target: &Target) -> Raster {
    let grid = &target.grid;
    let mut sums = vec![(0.0f64, 0usize); grid.len()];
    let mut outside = 0usize;
    for prediction in predictions {
        let index = prediction.cell_id as usize;
        if index >= grid.len() {
            outside += 1;
            continue;
        }
        sums[index].0 += prediction.score;
        sums[index].1 += 1;
    }
    if outside > 0 {
        warn!("{} predictions have a cell_id outside the grid", outside);
    }
    let mut raster = Raster::nodata(*grid);
    for (value, (sum, count)) in raster.values.iter_mut().zip(sums) {
        if count > 0 {
            *value = (sum / count as f64) as f32;
        }
    }
    raster.apply_mask(&target.mask);
    raster
}

fn log_metrics(name: &str, m: &Metrics) {
    let fmt = |v: Option<f64>| v.map_or("n/a".to_string(), |v| format!("{:.4}", v));
    info!(
        "{}: {} rows, {} positive, AUC {}, AP {}, Brier {:.5}, log loss {:.5}, F1 {:.4}",
        name,
        m.rows,
        m.positives,
        fmt(m.auc),
        fmt(m.average_precision),
        m.brier,
        m.log_loss,
        m.f1
    );
}

/// Scores `predictions`, writes `evaluation/metrics.json` and, when
/// asked, the mean score map.
pub fn evaluate_predictions(
    layout: &DataLayout,
    predictions: &Path,
    threshold: f64,
    write_map: bool,
) -> anyhow::Result<EvaluationReport> {
    let rows = read_predictions(predictions)?;
    if rows.is_empty() {
        anyhow::bail!("{} has no predictions", predictions.display());
    }
    info!("Read {} predictions from {}", rows.len(), predictions.display());
    let report = evaluate(&rows, threshold);
    log_metrics("overall", &report.overall);
    if let Some(validation) = &report.validation {
        log_metrics("validation", validation);
    }
    for (fold, metrics) in &report.folds {
        log_metrics(&format!("fold {}", fold), metrics);
    }

    fs::create_dir_all(layout.evaluation_dir())?;
    let json = serde_json::to_string_pretty(&report)?;
    fs::write(layout.metrics(), json)?;
    info!("Wrote {}", layout.metrics().display());

    if write_map {
        let target = Target::load(layout)?;
        let map = mean_score_map(&rows, &target);
        ascii_grid::write(&layout.score_map(), &map)?;
        info!("Wrote {}", layout.score_map().display());
    }
    Ok(report)
}
