use std::fmt::{self, Write};

use indexmap::IndexMap;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bincount::{bincount, IGNORE_INDEX};
use crate::error::{Error, Result};

/// A `height x width` map holding one class index per pixel.
pub type LabelMap = Array2<u8>;

/// Pixel counts indexed by `[ground truth][prediction]`, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Box<[u64]>,
}

impl ConfusionMatrix {
    fn zeros(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![0; num_classes * num_classes].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Number of pixels of class `target` that were predicted as `pred`.
    #[inline]
    pub fn get(&self, target: usize, pred: usize) -> u64 {
        self.counts[target * self.num_classes + pred]
    }

    pub fn row_sum(&self, class: usize) -> u64 {
        let start = class * self.num_classes;
        self.counts[start..start + self.num_classes].iter().sum()
    }

    pub fn col_sum(&self, class: usize) -> u64 {
        self.counts
            .iter()
            .skip(class)
            .step_by(self.num_classes)
            .sum()
    }

    #[inline]
    pub fn diagonal(&self, class: usize) -> u64 {
        self.get(class, class)
    }

    /// Total number of counted (non-ignored) pixels.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Fraction of pixels on the diagonal, `0.0` for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..self.num_classes).map(|c| self.diagonal(c)).sum();
        correct as f64 / total as f64
    }

    /// Per-class pixel accuracy, `None` if the class never occurs in the ground truth.
    pub fn recall(&self, class: usize) -> Option<f64> {
        let actual = self.row_sum(class);
        (actual > 0).then(|| self.diagonal(class) as f64 / actual as f64)
    }

    /// Intersection over union of `class`, `None` when the class appears in neither
    /// ground truth nor prediction.
    pub fn iou(&self, class: usize) -> Option<f64> {
        let intersection = self.diagonal(class);
        let union = self.row_sum(class) + self.col_sum(class) - intersection;
        (union > 0).then(|| intersection as f64 / union as f64)
    }

    fn add(&mut self, hist: &[u64]) {
        self.counts
            .iter_mut()
            .zip(hist.iter())
            .for_each(|(count, &n)| *count += n);
    }

    fn clear(&mut self) {
        self.counts.fill(0);
    }
}

/// Scores derived from a confusion matrix.
///
/// Every ratio lies in `[0, 1]`. Ratios with a zero denominator are reported as `0.0`;
/// classes without a defined IoU are absent from `class_iou`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegScores {
    #[serde(rename = "Overall Acc")]
    pub overall_acc: f64,
    #[serde(rename = "Mean Acc")]
    pub mean_acc: f64,
    /// Frequency-weighted IoU.
    #[serde(rename = "FreqW Acc")]
    pub freq_w_acc: f64,
    #[serde(rename = "Mean IoU")]
    pub mean_iou: f64,
    #[serde(rename = "Class IoU")]
    pub class_iou: IndexMap<usize, f64>,
}

impl SegScores {
    fn write_summary(&self, out: &mut impl Write, class_names: &[&str]) -> fmt::Result {
        writeln!(out, "Overall Acc: {:.6}", self.overall_acc)?;
        writeln!(out, "Mean Acc: {:.6}", self.mean_acc)?;
        writeln!(out, "FreqW Acc: {:.6}", self.freq_w_acc)?;
        writeln!(out, "Mean IoU: {:.6}", self.mean_iou)?;
        writeln!(out, "Class IoU:")?;
        for (&class, iou) in &self.class_iou {
            match class_names.get(class) {
                Some(name) => writeln!(out, "\tclass {class} ({name}): {iou:.6}")?,
                None => writeln!(out, "\tclass {class}: {iou:.6}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for SegScores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_summary(f, &[])
    }
}

/// Multi-line report of `scores` with a per-class IoU table.
pub fn format_summary(scores: &SegScores) -> String {
    scores.to_string()
}

/// Same as [`format_summary`], labelling each class row with `class_names[class]`.
pub fn format_summary_named(scores: &SegScores, class_names: &[&str]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = scores.write_summary(&mut out, class_names);
    out
}

/// Confusion matrix accumulated over any number of evaluation batches.
///
/// Counts only ever grow until [`StreamSegMetrics::reset`]; the caller resets between
/// validation rounds.
#[derive(Debug, Clone)]
pub struct StreamSegMetrics {
    matrix: ConfusionMatrix,
}

impl StreamSegMetrics {
    /// Creates an empty accumulator. Labels are `u8` and [`IGNORE_INDEX`] is reserved,
    /// so at most 255 classes are supported.
    pub fn new(num_classes: usize) -> Result<Self> {
        if num_classes == 0 || num_classes > IGNORE_INDEX as usize {
            return Err(Error::InvalidConfig(format!(
                "num_classes must be in 1..={IGNORE_INDEX}, got {num_classes}"
            )));
        }
        Ok(Self {
            matrix: ConfusionMatrix::zeros(num_classes),
        })
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.matrix.num_classes()
    }

    pub fn confusion_matrix(&self) -> &ConfusionMatrix {
        &self.matrix
    }

    /// Number of pixels counted since construction or the last reset.
    pub fn total(&self) -> u64 {
        self.matrix.total()
    }

    /// Counts every `(targets[i], preds[i])` pixel pair of a batch.
    ///
    /// The whole batch is validated before the matrix changes: on error nothing is counted.
    pub fn update(&mut self, targets: &[LabelMap], preds: &[LabelMap]) -> Result<()> {
        if targets.len() != preds.len() {
            return Err(Error::BatchLength {
                targets: targets.len(),
                predictions: preds.len(),
            });
        }

        let num_classes = self.num_classes();
        let bins = num_classes * num_classes;

        let hist = targets
            .par_iter()
            .zip(preds.par_iter())
            .enumerate()
            .try_fold(
                || vec![0u64; bins],
                |mut hist, (image, (target, pred))| {
                    count_image(&mut hist, target, pred, num_classes, image)?;
                    Ok::<_, Error>(hist)
                },
            )
            .try_reduce(
                || vec![0u64; bins],
                |mut acc, hist| {
                    acc.iter_mut().zip(hist).for_each(|(a, b)| *a += b);
                    Ok(acc)
                },
            )?;

        self.matrix.add(&hist);
        debug!(
            images = targets.len(),
            pixels = hist.iter().sum::<u64>(),
            "confusion matrix updated"
        );
        Ok(())
    }

    /// Adds the counts of another accumulator, e.g. one filled by a different worker.
    pub fn merge(&mut self, other: &StreamSegMetrics) -> Result<()> {
        if other.num_classes() != self.num_classes() {
            return Err(Error::InvalidConfig(format!(
                "cannot merge {} classes into {}",
                other.num_classes(),
                self.num_classes()
            )));
        }
        self.matrix.add(&other.matrix.counts);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.matrix.clear();
    }

    pub fn compute_results(&self) -> SegScores {
        let m = &self.matrix;
        let classes = 0..m.num_classes();

        let recalls: Vec<f64> = classes.clone().filter_map(|c| m.recall(c)).collect();
        let class_iou: IndexMap<usize, f64> = classes
            .filter_map(|c| m.iou(c).map(|iou| (c, iou)))
            .collect();

        let total = m.total();
        let freq_w_acc = if total == 0 {
            0.0
        } else {
            class_iou
                .iter()
                .map(|(&c, iou)| m.row_sum(c) as f64 / total as f64 * iou)
                .sum()
        };

        SegScores {
            overall_acc: m.accuracy(),
            mean_acc: mean(recalls.iter().copied()),
            freq_w_acc,
            mean_iou: mean(class_iou.values().copied()),
            class_iou,
        }
    }
}

fn count_image(
    hist: &mut [u64],
    target: &LabelMap,
    pred: &LabelMap,
    num_classes: usize,
    image: usize,
) -> Result<()> {
    if target.shape() != pred.shape() {
        return Err(Error::ShapeMismatch {
            image,
            target: target.shape().to_vec(),
            prediction: pred.shape().to_vec(),
        });
    }

    let target = target.as_standard_layout();
    let pred = pred.as_standard_layout();
    match (target.as_slice(), pred.as_slice()) {
        (Some(t), Some(p)) => bincount(hist, t, p, num_classes, image),
        _ => Err(Error::InvalidData(format!(
            "label maps of image {image} are not contiguous"
        ))),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}
