//! # Métricas de Avaliação
//!
//! Métricas por token ("flat"): todas as sentenças são concatenadas e cada
//! posição conta como uma predição. Para cada label:
//!
//! ```text
//! precision = tp / (tp + fp)
//! recall    = tp / (tp + fn)
//! f1        = 2 · p · r / (p + r)
//! ```
//!
//! O agregado é a média das F1 ponderada pelo suporte (nº de tokens gold).
//! `O` normalmente fica de fora: dominaria a média sem dizer nada sobre as
//! entidades.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NerError, Result};
use crate::tagger::Label;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Tokens gold com esta label.
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_label: Vec<LabelScore>,
    /// F1 ponderada pelo suporte.
    pub weighted_f1: f64,
    pub total_support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Relatório por label para `labels` (na ordem dada).
pub fn classification_report(
    y_true: &[Vec<Label>],
    y_pred: &[Vec<Label>],
    labels: &[Label],
) -> Result<ClassificationReport> {
    if y_true.len() != y_pred.len() {
        return Err(NerError::LengthMismatch {
            what: "sentenças gold vs preditas",
            left: y_true.len(),
            right: y_pred.len(),
        });
    }

    let n = labels.len();
    let mut tp = vec![0usize; n];
    let mut fp = vec![0usize; n];
    let mut fn_ = vec![0usize; n];
    let position = |label: &Label| labels.iter().position(|l| l == label);

    for (gold, pred) in y_true.iter().zip(y_pred) {
        if gold.len() != pred.len() {
            return Err(NerError::LengthMismatch {
                what: "tokens gold vs preditos",
                left: gold.len(),
                right: pred.len(),
            });
        }
        for (g, p) in gold.iter().zip(pred) {
            if g == p {
                if let Some(i) = position(g) {
                    tp[i] += 1;
                }
                continue;
            }
            if let Some(i) = position(p) {
                fp[i] += 1;
            }
            if let Some(i) = position(g) {
                fn_[i] += 1;
            }
        }
    }

    let per_label: Vec<LabelScore> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let precision = ratio(tp[i], tp[i] + fp[i]);
            let recall = ratio(tp[i], tp[i] + fn_[i]);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            LabelScore {
                label: *label,
                precision,
                recall,
                f1,
                support: tp[i] + fn_[i],
            }
        })
        .collect();

    let total_support: usize = per_label.iter().map(|s| s.support).sum();
    let weighted_f1 = if total_support == 0 {
        0.0
    } else {
        per_label
            .iter()
            .map(|s| s.f1 * s.support as f64)
            .sum::<f64>()
            / total_support as f64
    };

    Ok(ClassificationReport {
        per_label,
        weighted_f1,
        total_support,
    })
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for s in &self.per_label {
            writeln!(
                f,
                "{:>12} {:>10.3} {:>10.3} {:>10.3} {:>10}",
                s.label.to_string(),
                s.precision,
                s.recall,
                s.f1,
                s.support
            )?;
        }
        writeln!(f)?;
        write!(
            f,
            "{:>12} {:>10} {:>10} {:>10.3} {:>10}",
            "weighted", "", "", self.weighted_f1, self.total_support
        )
    }
}
