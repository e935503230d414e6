use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MlError, Result};

/// REST client for the cloud opinion-mining fallback.
///
/// The service scores whole documents and, with opinion mining on,
/// attributes per-target attitudes inside each sentence.
pub struct OpinionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    documents: Vec<AnalyzeDocument<'a>>,
    opinion_mining: bool,
}

#[derive(Debug, Serialize)]
struct AnalyzeDocument<'a> {
    id: String,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    documents: Vec<DocumentSentiment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceScores {
    #[serde(default)]
    pub positive: f64,
    #[serde(default)]
    pub neutral: f64,
    #[serde(default)]
    pub negative: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpinionTarget {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sentiment: String,
    pub confidence_scores: Option<ConfidenceScores>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Opinion {
    pub target: Option<OpinionTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentenceSentiment {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub opinions: Vec<Opinion>,
}

/// Document-level response with per-sentence opinion targets.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSentiment {
    #[serde(default)]
    pub sentiment: String,
    pub confidence_scores: Option<ConfidenceScores>,
    #[serde(default)]
    pub sentences: Vec<SentenceSentiment>,
}

impl OpinionClient {
    pub fn new(endpoint: &str, api_key: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
        })
    }

    /// Analyze documents with opinion mining enabled. Returns one
    /// result per input document.
    pub async fn analyze(&self, documents: &[String]) -> Result<Vec<DocumentSentiment>> {
        let request = AnalyzeRequest {
            documents: documents
                .iter()
                .enumerate()
                .map(|(i, text)| AnalyzeDocument {
                    id: (i + 1).to_string(),
                    text,
                })
                .collect(),
            opinion_mining: true,
        };

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("opinion mining request failed ({status}): {text}");
            return Err(MlError::Fallback(format!("{status}: {text}")));
        }

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| MlError::Fallback(format!("invalid response: {e}")))?;
        Ok(parsed.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_opinion_targets() {
        let raw = r#"{
            "documents": [{
                "sentiment": "mixed",
                "confidence_scores": {"positive": 0.4, "neutral": 0.1, "negative": 0.5},
                "sentences": [{
                    "text": "I love Jane but John is terrible.",
                    "opinions": [
                        {"target": {"text": "Jane", "sentiment": "positive",
                            "confidence_scores": {"positive": 0.95, "neutral": 0.03, "negative": 0.02}}},
                        {"target": {"text": "John", "sentiment": "negative",
                            "confidence_scores": {"positive": 0.01, "neutral": 0.04, "negative": 0.95}}}
                    ]
                }]
            }]
        }"#;
        let parsed: AnalyzeResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.documents.len(), 1);
        let document = &parsed.documents[0];
        assert_eq!(document.sentiment, "mixed");
        let opinions = &document.sentences[0].opinions;
        assert_eq!(opinions.len(), 2);
        let jane = opinions[0].target.as_ref().unwrap();
        assert_eq!(jane.text, "Jane");
        assert_eq!(jane.sentiment, "positive");
    }
}
