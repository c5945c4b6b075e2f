use serde::{ser::SerializeMap, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TumorLabel {
    Glioma,
    Meningioma,
    #[serde(rename = "No Tumour")]
    NoTumour,
    Pituitary,
}

/// Label order of the classifier's output vector.
pub const TUMOR_LABELS: [TumorLabel; 4] = [
    TumorLabel::Glioma,
    TumorLabel::Meningioma,
    TumorLabel::NoTumour,
    TumorLabel::Pituitary,
];

impl TumorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TumorLabel::Glioma => "Glioma",
            TumorLabel::Meningioma => "Meningioma",
            TumorLabel::NoTumour => "No Tumour",
            TumorLabel::Pituitary => "Pituitary",
        }
    }
}

impl fmt::Display for TumorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ClassificationError {
    #[error("expected {expected} class probabilities, model returned {actual}")]
    UnexpectedOutputLength { expected: usize, actual: usize },
    #[error("model returned a non-finite probability at index {0}")]
    NonFiniteProbability(usize),
}

/// Percentages per label, serialized as a JSON object in label order.
#[derive(Debug, Clone, PartialEq)]
pub struct Probabilities([f64; 4]);

impl Probabilities {
    pub fn get(&self, label: TumorLabel) -> f64 {
        let index = TUMOR_LABELS
            .iter()
            .position(|l| *l == label)
            .unwrap_or_default();
        self.0[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TumorLabel, f64)> + '_ {
        TUMOR_LABELS.iter().copied().zip(self.0.iter().copied())
    }
}

impl Serialize for Probabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(TUMOR_LABELS.len()))?;
        for (label, percent) in self.iter() {
            map.serialize_entry(label.as_str(), &percent)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub tumor: TumorLabel,
    pub confidence: f64,
    pub probabilities: Probabilities,
}

impl ClassificationResult {
    /// Shapes a raw softmax vector into percentages rounded to two decimals.
    /// Each value is rounded on its own, so the percentages may sum to
    /// 100 +/- 0.02 rather than exactly 100.
    pub fn from_probabilities(raw: &[f32]) -> Result<Self, ClassificationError> {
        if raw.len() != TUMOR_LABELS.len() {
            return Err(ClassificationError::UnexpectedOutputLength {
                expected: TUMOR_LABELS.len(),
                actual: raw.len(),
            });
        }
        if let Some(index) = raw.iter().position(|p| !p.is_finite()) {
            return Err(ClassificationError::NonFiniteProbability(index));
        }

        // First occurrence wins on ties.
        let (best_index, best_probability) = raw.iter().copied().enumerate().fold(
            (0, raw[0]),
            |best, (index, probability)| {
                if probability > best.1 {
                    (index, probability)
                } else {
                    best
                }
            },
        );

        let mut percentages = [0.0; 4];
        for (slot, probability) in percentages.iter_mut().zip(raw) {
            *slot = to_percent(*probability);
        }

        Ok(Self {
            tumor: TUMOR_LABELS[best_index],
            confidence: to_percent(best_probability),
            probabilities: Probabilities(percentages),
        })
    }
}

fn to_percent(probability: f32) -> f64 {
    (f64::from(probability) * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picks_highest_probability() {
        let result =
            ClassificationResult::from_probabilities(&[0.05, 0.10, 0.80, 0.05]).unwrap();

        assert_eq!(result.tumor, TumorLabel::NoTumour);
        assert_eq!(result.confidence, 80.0);
        assert_eq!(result.probabilities.get(TumorLabel::Meningioma), 10.0);
    }

    #[test]
    fn test_ties_resolve_to_first_label() {
        let result = ClassificationResult::from_probabilities(&[0.4, 0.1, 0.1, 0.4]).unwrap();
        assert_eq!(result.tumor, TumorLabel::Glioma);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        let result =
            ClassificationResult::from_probabilities(&[0.912_345, 0.05, 0.03, 0.004_655])
                .unwrap();

        assert_eq!(result.tumor, TumorLabel::Glioma);
        assert_eq!(result.confidence, 91.23);
        assert_eq!(result.probabilities.get(TumorLabel::Pituitary), 0.47);
    }

    #[test]
    fn test_percentages_sum_to_about_one_hundred() {
        let raw = [0.123_456, 0.234_567, 0.345_678, 0.296_299];
        let result = ClassificationResult::from_probabilities(&raw).unwrap();
        let total: f64 = result.probabilities.iter().map(|(_, p)| p).sum();

        assert!((total - 100.0).abs() <= 0.1, "total was {}", total);
        let max = result
            .probabilities
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert_eq!(max.0, result.tumor);
    }

    #[test]
    fn test_rejects_wrong_output_length() {
        let err = ClassificationResult::from_probabilities(&[0.5, 0.5]).unwrap_err();
        assert_eq!(
            err,
            ClassificationError::UnexpectedOutputLength {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_rejects_nan() {
        let err = ClassificationResult::from_probabilities(&[0.5, f32::NAN, 0.2, 0.3]).unwrap_err();
        assert_eq!(err, ClassificationError::NonFiniteProbability(1));
    }

    #[test]
    fn test_serializes_in_label_order() {
        let result = ClassificationResult::from_probabilities(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.starts_with(r#"{"tumor":"Pituitary","confidence":40.0"#));
        let glioma = json.find("\"Glioma\"").unwrap();
        let meningioma = json.find("\"Meningioma\"").unwrap();
        let no_tumour = json.find("\"No Tumour\"").unwrap();
        let pituitary = json.rfind("\"Pituitary\"").unwrap();
        assert!(glioma < meningioma && meningioma < no_tumour && no_tumour < pituitary);
    }
}
