use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use castpulse_core::types::SentimentLabel;

/// Class probabilities from any scorer, always fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelProbs {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl LabelProbs {
    pub const NEUTRAL_DEFAULT: LabelProbs = LabelProbs {
        negative: 0.0,
        neutral: 1.0,
        positive: 0.0,
    };

    pub fn get(&self, label: SentimentLabel) -> f64 {
        match label {
            SentimentLabel::Negative => self.negative,
            SentimentLabel::Neutral => self.neutral,
            SentimentLabel::Positive => self.positive,
        }
    }

    pub fn max(&self) -> f64 {
        self.negative.max(self.neutral).max(self.positive)
    }

    /// Winning label plus the top-1 − top-2 margin.
    pub fn top_label_and_margin(&self) -> (SentimentLabel, f64) {
        let mut entries = [
            (SentimentLabel::Negative, self.negative),
            (SentimentLabel::Neutral, self.neutral),
            (SentimentLabel::Positive, self.positive),
        ];
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        (entries[0].0, entries[0].1 - entries[1].1)
    }
}

/// One primary-model prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryPrediction {
    pub label: SentimentLabel,
    pub score: f64,
    pub margin: f64,
    pub probabilities: LabelProbs,
}

impl PrimaryPrediction {
    /// Stand-in used when the primary scorer fails: neutral, zero
    /// confidence, zero margin — guaranteed to trip the fallback gate.
    pub fn neutral_default() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
            margin: 0.0,
            probabilities: LabelProbs::NEUTRAL_DEFAULT,
        }
    }
}

/// The uniform result every scoring source reduces to.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedSentiment {
    pub cast_member_id: Option<i64>,
    pub cast_member: Option<String>,
    pub sentiment_label: SentimentLabel,
    pub sentiment_score: f64,
    pub source_model: String,
    pub reasoning: Option<String>,
    pub probabilities: Option<LabelProbs>,
    pub margin: Option<f64>,
}

/// Audit-trail entry for one model that contributed to a result.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSentiment {
    pub name: String,
    pub sentiment_label: SentimentLabel,
    pub sentiment_score: f64,
    pub reasoning: Option<String>,
}

/// Outcome of `analyze_comment`: the resolved sentiment plus the
/// per-model log the comment row stores as its breakdown.
#[derive(Debug, Clone)]
pub struct SentimentAnalysisResult {
    pub resolved: NormalizedSentiment,
    pub models: Vec<ModelSentiment>,
    pub combined_score: f64,
}

impl SentimentAnalysisResult {
    /// The structured per-model log persisted on the comment row.
    pub fn breakdown_json(&self) -> serde_json::Value {
        serde_json::json!({
            "models": self.models,
            "combined_score": self.combined_score,
            "final_label": self.resolved.sentiment_label,
            "final_source": self.resolved.source_model,
        })
    }
}

/// Per-target output of `analyze_freeform`.
#[derive(Debug, Clone, Serialize)]
pub struct FreeformTargetResult {
    pub label: SentimentLabel,
    pub score: f64,
    pub probs: BTreeMap<String, f64>,
    pub margin: f64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreeformModelInfo {
    pub id: String,
    pub rev: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreeformAnalysis {
    pub text: String,
    pub model: FreeformModelInfo,
    pub targets: BTreeMap<String, FreeformTargetResult>,
    pub fallback_used: bool,
}

/// Round to two decimals the way the freeform surface reports scores.
pub fn round_score(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Abbreviated probability map (`neg`/`neu`/`pos`) for freeform output.
pub fn abbreviated_probs(probs: Option<LabelProbs>) -> BTreeMap<String, f64> {
    let mut formatted = BTreeMap::new();
    let probs = probs.unwrap_or(LabelProbs {
        negative: 0.0,
        neutral: 0.0,
        positive: 0.0,
    });
    formatted.insert("neg".to_string(), round_score(probs.negative));
    formatted.insert("neu".to_string(), round_score(probs.neutral));
    formatted.insert("pos".to_string(), round_score(probs.positive));
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_label_and_margin() {
        let probs = LabelProbs {
            negative: 0.1,
            neutral: 0.2,
            positive: 0.7,
        };
        let (label, margin) = probs.top_label_and_margin();
        assert_eq!(label, SentimentLabel::Positive);
        assert!((margin - 0.5).abs() < 1e-9);
    }

    #[test]
    fn breakdown_json_shape() {
        let result = SentimentAnalysisResult {
            resolved: NormalizedSentiment {
                cast_member_id: None,
                cast_member: None,
                sentiment_label: SentimentLabel::Positive,
                sentiment_score: 0.9,
                source_model: "primary".to_string(),
                reasoning: None,
                probabilities: None,
                margin: None,
            },
            models: vec![ModelSentiment {
                name: "primary".to_string(),
                sentiment_label: SentimentLabel::Positive,
                sentiment_score: 0.9,
                reasoning: Some("why".to_string()),
            }],
            combined_score: 0.9,
        };
        let json = result.breakdown_json();
        assert_eq!(json["final_label"], "positive");
        assert_eq!(json["final_source"], "primary");
        assert_eq!(json["models"].as_array().unwrap().len(), 1);
    }
}
