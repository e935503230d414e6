use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{info, warn};

use crate::error::{MlError, Result};
use crate::sentiment::types::{LabelProbs, PrimaryPrediction};

/// Softmax sharpening over cosine similarities. Similarities live in a
/// narrow band, so they need scaling before the exponential separates
/// the classes.
const SIMILARITY_TEMPERATURE: f64 = 12.0;

/// The primary scoring contract. CPU-bound and synchronous; the
/// pipeline treats a failure as a low-confidence neutral.
pub trait SentimentScorer: Send + Sync {
    fn model_id(&self) -> &str;

    fn revision(&self) -> &str {
        "unknown"
    }

    fn score(&self, texts: &[String]) -> Result<Vec<PrimaryPrediction>>;
}

/// Anchor phrases embedded once per class; the mean vector is the
/// class prototype scored texts are compared against.
const POSITIVE_ANCHORS: &[&str] = &[
    "I absolutely love her, she was amazing tonight",
    "she is my favorite, what a great episode",
    "so proud of her, she handled that perfectly",
    "that was hilarious and iconic, total queen move",
    "great performance, she keeps getting better",
];

const NEUTRAL_ANCHORS: &[&str] = &[
    "she was on the episode tonight",
    "they talked about the trip at dinner",
    "the episode aired at the usual time",
    "she wore a black dress to the party",
    "the season continues next week",
];

const NEGATIVE_ANCHORS: &[&str] = &[
    "I can't stand her, she was awful tonight",
    "she is terrible and so rude to everyone",
    "what a horrible thing to say, I'm disgusted",
    "she ruined the whole episode, so annoying",
    "worst behavior I've seen on this show",
];

struct Prototypes {
    positive: Vec<f32>,
    neutral: Vec<f32>,
    negative: Vec<f32>,
}

/// Transformer-embedding scorer: embeds the input and softmaxes its
/// cosine similarity to the class prototypes.
pub struct EmbeddingScorer {
    model: Mutex<TextEmbedding>,
    model_id: String,
    revision: String,
    cache_dir: Option<PathBuf>,
    prototypes: Prototypes,
}

impl EmbeddingScorer {
    /// Loads (downloading on first run) the embedding model named by
    /// `model_id` and embeds the class anchors.
    pub fn new(model_id: &str, cache_dir: Option<&Path>) -> Result<Self> {
        let model_choice = resolve_model(model_id);
        let mut options = InitOptions::new(model_choice).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir.to_path_buf());
        }
        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| MlError::Model(format!("embedding model init failed: {e}")))?;

        let prototypes = build_prototypes(&mut model)?;
        info!("sentiment scorer ready | model={model_id}");

        Ok(Self {
            model: Mutex::new(model),
            model_id: model_id.to_string(),
            revision: format!("fastembed/{model_id}"),
            cache_dir: cache_dir.map(Path::to_path_buf),
            prototypes,
        })
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

impl SentimentScorer for EmbeddingScorer {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn score(&self, texts: &[String]) -> Result<Vec<PrimaryPrediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = {
            let mut model = self.model.lock().expect("scorer mutex poisoned");
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| MlError::Model(format!("embedding failed: {e}")))?
        };

        let predictions = embeddings
            .iter()
            .map(|embedding| {
                let probs = softmax3(
                    cosine(embedding, &self.prototypes.negative),
                    cosine(embedding, &self.prototypes.neutral),
                    cosine(embedding, &self.prototypes.positive),
                );
                let (label, margin) = probs.top_label_and_margin();
                PrimaryPrediction {
                    label,
                    score: probs.get(label),
                    margin,
                    probabilities: probs,
                }
            })
            .collect();
        Ok(predictions)
    }
}

fn resolve_model(model_id: &str) -> EmbeddingModel {
    match model_id.to_lowercase().as_str() {
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        other => {
            warn!("unknown primary model {other:?}; defaulting to bge-small-en-v1.5");
            EmbeddingModel::BGESmallENV15
        }
    }
}

fn build_prototypes(model: &mut TextEmbedding) -> Result<Prototypes> {
    let mut embed_class = |anchors: &[&str]| -> Result<Vec<f32>> {
        let embeddings = model
            .embed(anchors.iter().map(|s| s.to_string()).collect::<Vec<_>>(), None)
            .map_err(|e| MlError::Model(format!("anchor embedding failed: {e}")))?;
        Ok(mean_vector(&embeddings))
    };
    Ok(Prototypes {
        positive: embed_class(POSITIVE_ANCHORS)?,
        neutral: embed_class(NEUTRAL_ANCHORS)?,
        negative: embed_class(NEGATIVE_ANCHORS)?,
    })
}

fn mean_vector(vectors: &[Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dims = vectors[0].len();
    let mut mean = vec![0.0f32; dims];
    for vector in vectors {
        for (slot, value) in mean.iter_mut().zip(vector) {
            *slot += value;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut mean {
        *slot /= count;
    }
    mean
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn softmax3(negative: f64, neutral: f64, positive: f64) -> LabelProbs {
    let scaled = [
        negative * SIMILARITY_TEMPERATURE,
        neutral * SIMILARITY_TEMPERATURE,
        positive * SIMILARITY_TEMPERATURE,
    ];
    let max = scaled.iter().cloned().fold(f64::MIN, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    LabelProbs {
        negative: exps[0] / sum,
        neutral: exps[1] / sum,
        positive: exps[2] / sum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, -0.2, 0.8];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn softmax_orders_by_similarity() {
        let probs = softmax3(0.1, 0.2, 0.6);
        assert!(probs.positive > probs.neutral);
        assert!(probs.neutral > probs.negative);
        let total = probs.positive + probs.neutral + probs.negative;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mean_vector_averages_components() {
        let mean = mean_vector(&[vec![1.0, 3.0], vec![3.0, 5.0]]);
        assert_eq!(mean, vec![2.0, 4.0]);
    }
}
