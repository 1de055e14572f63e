use serde::{de::Error as _, Deserialize, Serialize};
use std::io::Read;

use crate::labels::Dataset;
use crate::metrics::SegScores;

/// Scores of one validation round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub scores: SegScores,
}

/// Keeps the best mean IoU seen across validation rounds.
///
/// A round only counts as an improvement when it is strictly better, so the first of
/// several equal rounds stays the best one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestScore {
    dataset: Dataset,
    best_score: f64,
    best_round: Option<usize>,
    history: Vec<RoundRecord>,
}

impl BestScore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            best_score: 0.0,
            best_round: None,
            history: Vec::new(),
        }
    }

    /// Records a round and returns whether it set a new best mean IoU.
    pub fn observe(&mut self, round: usize, scores: &SegScores) -> bool {
        self.history.push(RoundRecord {
            round,
            scores: scores.clone(),
        });

        if scores.mean_iou > self.best_score {
            self.best_score = scores.mean_iou;
            self.best_round = Some(round);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    #[inline]
    pub fn best_round(&self) -> Option<usize> {
        self.best_round
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Loads a record from a file.
    pub fn load_from_file(file: &mut dyn Read) -> Result<Self, serde_json::Error> {
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)
            .map_err(serde_json::Error::custom)?;
        serde_json::from_str(&buffer)
    }

    /// Saves the record to a file.
    pub fn save_to_file(&self, file: &mut dyn std::io::Write) -> Result<(), serde_json::Error> {
        let serialized = serde_json::to_string_pretty(self)?;
        file.write_all(serialized.as_bytes())
            .map_err(serde_json::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn scores(mean_iou: f64) -> SegScores {
        SegScores {
            overall_acc: 0.9,
            mean_acc: 0.8,
            freq_w_acc: 0.85,
            mean_iou,
            class_iou: IndexMap::from([(0, mean_iou), (2, mean_iou)]),
        }
    }

    #[test]
    fn only_strict_improvements_count() {
        let mut best = BestScore::new(Dataset::Cityscapes);
        assert_eq!(best.best_round(), None);

        assert!(best.observe(1, &scores(0.4)));
        assert!(!best.observe(2, &scores(0.3)));
        assert!(!best.observe(3, &scores(0.4)));
        assert!(best.observe(4, &scores(0.55)));

        assert_eq!(best.best_round(), Some(4));
        assert_eq!(best.best_score(), 0.55);
        assert_eq!(best.history().len(), 4);
    }

    #[test]
    fn empty_round_never_becomes_best() {
        let mut best = BestScore::new(Dataset::Voc);
        assert!(!best.observe(1, &scores(0.0)));
        assert_eq!(best.best_round(), None);
    }

    #[test]
    fn record_reloads_from_json() {
        let mut best = BestScore::new(Dataset::Voc);
        best.observe(1, &scores(0.25));
        best.observe(2, &scores(0.5));

        let mut buffer = Vec::new();
        best.save_to_file(&mut buffer).unwrap();
        let json = String::from_utf8(buffer.clone()).unwrap();
        assert!(json.contains("\"dataset\": \"voc\""));
        assert!(json.contains("\"Mean IoU\": 0.5"));

        let loaded = BestScore::load_from_file(&mut buffer.as_slice()).unwrap();
        assert_eq!(loaded, best);
    }
}
