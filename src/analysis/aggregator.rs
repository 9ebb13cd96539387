//! Group aggregation and accuracy statistics.
//!
//! This module holds the numeric side of test-time augmentation: trimming
//! outlier copies from a group, averaging what remains, and summarizing
//! per-sample outcomes into accuracies.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::collections::BTreeMap;

use crate::error::{Result, TtaError};
use crate::models::{ClassAccuracy, ClassIndex, SampleOutcome};

/// Rows of `preds` kept after trimming `exclude` outliers, in original order.
///
/// Copies are ranked by their maximum class score. Trimming alternates
/// between the most confident remaining copy and the least confident one,
/// starting with the most confident.
pub fn retained_indices(preds: ArrayView2<'_, f32>, exclude: usize) -> Vec<usize> {
    let copies = preds.nrows();
    if exclude == 0 {
        return (0..copies).collect();
    }

    let mut ranked: Vec<(usize, f32)> = preds
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| (i, row.fold(f32::NEG_INFINITY, |m, &v| m.max(v))))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut low = 0;
    let mut high = copies;
    for i in 0..exclude.min(copies) {
        if i % 2 == 0 {
            high -= 1;
        } else {
            low += 1;
        }
    }

    let mut kept: Vec<usize> = ranked[low..high].iter().map(|(i, _)| *i).collect();
    kept.sort_unstable();
    kept
}

/// Drop `exclude` outlier copies from a group's predictions.
pub fn remove_outliers(preds: ArrayView2<'_, f32>, exclude: usize) -> Array2<f32> {
    if exclude == 0 {
        return preds.to_owned();
    }
    preds.select(Axis(0), &retained_indices(preds, exclude))
}

/// Element-wise mean over the copies of a group.
pub fn average(preds: ArrayView2<'_, f32>) -> Result<Array1<f32>> {
    preds
        .mean_axis(Axis(0))
        .ok_or_else(|| TtaError::ShapeMismatch("cannot average an empty group".to_string()))
}

/// Trim outliers, then average.
pub fn aggregate_group(preds: ArrayView2<'_, f32>, exclude: usize) -> Result<Array1<f32>> {
    average(remove_outliers(preds, exclude).view())
}

/// Index of the highest score; the first one wins ties.
pub fn argmax(scores: ArrayView1<'_, f32>) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Copies whose own arg-max equals `label_index`.
pub fn count_correct_copies(preds: ArrayView2<'_, f32>, label_index: usize) -> usize {
    preds
        .rows()
        .into_iter()
        .filter(|row| argmax(row.view()) == Some(label_index))
        .count()
}

/// Fraction of samples whose aggregated prediction was correct.
pub fn accuracy(outcomes: &[SampleOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    outcomes.iter().filter(|o| o.correct).count() as f64 / outcomes.len() as f64
}

/// Fraction of individual copies that were correct on their own.
pub fn baseline_accuracy(outcomes: &[SampleOutcome]) -> f64 {
    let copies: usize = outcomes.iter().map(|o| o.copies).sum();
    if copies == 0 {
        return 0.0;
    }
    let correct: usize = outcomes.iter().map(|o| o.copies_correct).sum();
    correct as f64 / copies as f64
}

/// Accuracy per class, in class index order. Classes without samples are omitted.
pub fn per_class_accuracy(outcomes: &[SampleOutcome], classes: &ClassIndex) -> Vec<ClassAccuracy> {
    let mut grouped: BTreeMap<usize, (usize, usize)> = BTreeMap::new();

    for outcome in outcomes {
        let entry = grouped.entry(outcome.label_index).or_default();
        entry.0 += 1;
        if outcome.correct {
            entry.1 += 1;
        }
    }

    grouped
        .into_iter()
        .map(|(index, (samples, correct))| ClassAccuracy {
            label: classes
                .name_of(index)
                .map(String::from)
                .unwrap_or_else(|| index.to_string()),
            samples,
            correct,
            accuracy: correct as f64 / samples as f64,
        })
        .collect()
}

/// Identify the classes most often predicted instead of the true one.
pub fn confusions(outcomes: &[SampleOutcome]) -> Vec<((String, String), usize)> {
    let mut counts: BTreeMap<(String, String), usize> = BTreeMap::new();

    for outcome in outcomes.iter().filter(|o| !o.correct) {
        let predicted = outcome
            .predicted_label
            .clone()
            .unwrap_or_else(|| outcome.predicted_index.to_string());
        *counts
            .entry((outcome.label.clone(), predicted))
            .or_default() += 1;
    }

    let mut pairs: Vec<_> = counts.into_iter().collect();
    pairs.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    pairs
}
