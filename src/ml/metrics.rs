//! Multiclass classification metrics over SELL/HOLD/BUY indices.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::SignalClass;

const K: usize = SignalClass::COUNT;

/// `matrix[actual][predicted]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub matrix: [[usize; K]; K],
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut matrix = [[0; K]; K];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < K && p < K {
                matrix[t][p] += 1;
            }
        }
        Self { matrix }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..K).map(|k| self.matrix[k][k]).sum()
    }

    /// Number of true samples of a class
    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    fn predicted(&self, class: usize) -> usize {
        (0..K).map(|t| self.matrix[t][class]).sum()
    }

    pub fn precision(&self, class: usize) -> f64 {
        ratio(self.matrix[class][class], self.predicted(class))
    }

    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.matrix[class][class], self.support(class))
    }

    pub fn f1(&self, class: usize) -> f64 {
        let p = self.precision(class);
        let r = self.recall(class);
        if p + r < 1e-12 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>8} {:>6} {:>6} {:>6}", "", "SELL", "HOLD", "BUY")?;
        for class in SignalClass::ALL {
            let row = &self.matrix[class.index()];
            writeln!(f, "{:>8} {:>6} {:>6} {:>6}", class.as_str(), row[0], row[1], row[2])?;
        }
        Ok(())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    ConfusionMatrix::from_predictions(y_true, y_pred).accuracy()
}

/// F1 averaged over classes, weighted by true support
pub fn weighted_f1(y_true: &[usize], y_pred: &[usize]) -> f64 {
    ClassificationReport::new(y_true, y_pred).weighted_f1
}

impl ConfusionMatrix {
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: SignalClass,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision/recall/F1 plus averages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_f1: f64,
    pub weighted_f1: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(y_true, y_pred);
        let classes: Vec<ClassMetrics> = SignalClass::ALL
            .iter()
            .map(|&class| {
                let k = class.index();
                ClassMetrics {
                    class,
                    precision: confusion.precision(k),
                    recall: confusion.recall(k),
                    f1: confusion.f1(k),
                    support: confusion.support(k),
                }
            })
            .collect();

        let total = confusion.total();
        let macro_f1 = classes.iter().map(|c| c.f1).sum::<f64>() / K as f64;
        let weighted_f1 = if total == 0 {
            0.0
        } else {
            classes.iter().map(|c| c.f1 * c.support as f64).sum::<f64>() / total as f64
        };

        Self {
            accuracy: confusion.accuracy(),
            classes,
            macro_f1,
            weighted_f1,
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>12} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.class.as_str(),
                c.precision,
                c.recall,
                c.f1,
                c.support
            )?;
        }
        let total = self.confusion.total();
        writeln!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "accuracy", "", "", self.accuracy, total)?;
        writeln!(f, "{:>12} {:>9} {:>9} {:>9.2} {:>9}", "macro avg", "", "", self.macro_f1, total)?;
        write!(
            f,
            "{:>12} {:>9} {:>9} {:>9.2} {:>9}",
            "weighted avg", "", "", self.weighted_f1, total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let y = [0, 1, 2, 2, 1, 0];
        assert_eq!(accuracy(&y, &y), 1.0);
        assert!((weighted_f1(&y, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_confusion_counts() {
        let y_true = [0, 0, 1, 2, 2, 2];
        let y_pred = [0, 1, 1, 2, 0, 2];
        let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred);
        assert_eq!(cm.matrix[0], [1, 1, 0]);
        assert_eq!(cm.matrix[2], [1, 0, 2]);
        assert_eq!(cm.correct(), 4);
        assert!((cm.accuracy() - 4.0 / 6.0).abs() < 1e-12);
        assert!((cm.precision(0) - 0.5).abs() < 1e-12);
        assert!((cm.recall(2) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_f1_uses_support() {
        // SELL: p=0.5 r=0.5 f1=0.5 (support 2); HOLD: p=0.5 r=1 f1=2/3 (1);
        // BUY: p=1 r=2/3 f1=0.8 (3)
        let y_true = [0, 0, 1, 2, 2, 2];
        let y_pred = [0, 1, 1, 2, 0, 2];
        let expected = (0.5 * 2.0 + (2.0 / 3.0) + 0.8 * 3.0) / 6.0;
        assert!((weighted_f1(&y_true, &y_pred) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(accuracy(&[], &[]), 0.0);
        assert_eq!(weighted_f1(&[], &[]), 0.0);
    }

    #[test]
    fn test_report_display_lists_classes() {
        let report = ClassificationReport::new(&[0, 1, 2], &[0, 1, 1]);
        let text = report.to_string();
        assert!(text.contains("SELL") && text.contains("BUY") && text.contains("weighted avg"));
    }
}
