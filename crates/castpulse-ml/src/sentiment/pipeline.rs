use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use castpulse_core::config::SentimentConfig;
use castpulse_core::metrics;
use castpulse_core::types::SentimentLabel;

use crate::catalog::CastCatalogEntry;
use crate::linker::MentionCandidate;
use crate::sentiment::heuristics;
use crate::sentiment::opinion::{ConfidenceScores, DocumentSentiment, OpinionClient};
use crate::sentiment::scorer::SentimentScorer;
use crate::sentiment::types::{
    abbreviated_probs, round_score, FreeformAnalysis, FreeformModelInfo, FreeformTargetResult,
    LabelProbs, ModelSentiment, NormalizedSentiment, PrimaryPrediction, SentimentAnalysisResult,
};
use crate::text;

/// Confidence gate never sits below this, whatever the config says.
const MIN_CONFIDENCE_FLOOR: f64 = 0.55;
/// Margin gate floor.
const MIN_MARGIN_FLOOR: f64 = 0.10;
/// Model-cache gauge sampling interval.
const CACHE_GAUGE_INTERVAL_SECS: u64 = 300;
/// Third-person tokens that carry a sentence to the last-named target.
const PRONOUN_TOKENS: &[&str] = &["she", "her", "hers"];
const CANARY_TEXT: &str = "sentiment fallback canary";

struct TargetMeta {
    name: String,
    normalized_aliases: HashSet<String>,
}

struct TargetSpec {
    key: String,
    meta: Option<usize>,
    alias_tokens: HashSet<String>,
}

struct CacheGaugeState {
    last_sample: Option<Instant>,
}

/// Primary + fallback sentiment pipeline.
///
/// Construct once per worker and share; all state after construction
/// is immutable apart from the cache-size sampling stamp.
pub struct SentimentPipeline {
    scorer: Arc<dyn SentimentScorer>,
    fallback: Option<OpinionClient>,
    fallback_service: String,
    fallback_enabled: bool,
    min_confidence: f64,
    min_margin: f64,
    targets: Vec<TargetMeta>,
    lookup: HashMap<String, usize>,
    cache_dir: Option<PathBuf>,
    cache_gauge: Mutex<CacheGaugeState>,
}

impl SentimentPipeline {
    /// Builds the target registry from the active catalog and runs the
    /// one-shot fallback canary when the fallback is enabled.
    pub async fn new(
        scorer: Arc<dyn SentimentScorer>,
        fallback: Option<OpinionClient>,
        config: &SentimentConfig,
        catalog: &[CastCatalogEntry],
        cache_dir: Option<PathBuf>,
    ) -> Self {
        let mut targets = Vec::new();
        let mut lookup = HashMap::new();
        for entry in catalog {
            register_target(&mut targets, &mut lookup, entry);
        }

        let pipeline = Self {
            scorer,
            fallback,
            fallback_service: config.fallback_service.clone(),
            fallback_enabled: config.fallback_enabled,
            min_confidence: config.min_confidence.max(MIN_CONFIDENCE_FLOOR),
            min_margin: config.min_margin.max(MIN_MARGIN_FLOOR),
            targets,
            lookup,
            cache_dir,
            cache_gauge: Mutex::new(CacheGaugeState { last_sample: None }),
        };

        pipeline.run_fallback_canary().await;
        pipeline
    }

    pub fn model_id(&self) -> &str {
        self.scorer.model_id()
    }

    fn fallback_available(&self) -> bool {
        self.fallback_enabled && self.fallback.is_some()
    }

    fn should_use_fallback(&self, prediction: &PrimaryPrediction, has_context: bool) -> bool {
        if !self.fallback_available() {
            return false;
        }
        if !has_context {
            return true;
        }
        prediction.score < self.min_confidence || prediction.margin < self.min_margin
    }

    /// Verify fallback connectivity once at construction.
    async fn run_fallback_canary(&self) {
        if !self.fallback_available() {
            return;
        }
        let Some(client) = &self.fallback else { return };
        let started = Instant::now();
        match client.analyze(&[CANARY_TEXT.to_string()]).await {
            Ok(documents) if !documents.is_empty() => {
                info!(
                    "fallback canary ok | latency_ms={:.2}",
                    started.elapsed().as_secs_f64() * 1000.0
                );
                self.emit_metrics("canary", "ok", started);
            }
            Ok(_) => {
                warn!("fallback canary returned no document");
                metrics::inc_sentiment_infer("canary", "error");
            }
            Err(e) => {
                warn!("fallback canary failed: {e}");
                metrics::inc_sentiment_infer("canary", "error");
            }
        }
    }

    // ---- Public API -------------------------------------------------------

    /// Normalized sentiment for a whole comment, with the per-model
    /// audit trail.
    pub async fn analyze_comment(&self, text_input: &str) -> SentimentAnalysisResult {
        self.maybe_sample_cache_size();
        let started = Instant::now();

        let (predictions, primary_error) = self.score_primary_aligned(&[text_input.to_string()]);
        let prediction = predictions
            .into_iter()
            .next()
            .unwrap_or_else(PrimaryPrediction::neutral_default);

        let primary_reason = self.primary_reasoning(&prediction, "comment");
        let mut models = vec![ModelSentiment {
            name: self.scorer.model_id().to_string(),
            sentiment_label: prediction.label,
            sentiment_score: prediction.score,
            reasoning: Some(primary_reason.clone()),
        }];
        let mut resolved = NormalizedSentiment {
            cast_member_id: None,
            cast_member: None,
            sentiment_label: prediction.label,
            sentiment_score: prediction.score,
            source_model: self.scorer.model_id().to_string(),
            reasoning: Some(primary_reason),
            probabilities: Some(prediction.probabilities),
            margin: Some(prediction.margin),
        };

        let mut fallback_used = false;
        if self.should_use_fallback(&prediction, true) {
            let document = self.fetch_document(text_input).await;
            if let Some(fallback) = self.document_sentiment(document.as_ref(), None, None, "comment")
            {
                models.push(ModelSentiment {
                    name: fallback.source_model.clone(),
                    sentiment_label: fallback.sentiment_label,
                    sentiment_score: fallback.sentiment_score,
                    reasoning: fallback.reasoning.clone(),
                });
                resolved = fallback;
                fallback_used = true;
            }
        }

        let combined_score: f64 = models.iter().map(|m| m.sentiment_score).sum();
        let status = status_of(fallback_used, primary_error);
        self.emit_metrics("comment", status, started);
        debug!(
            "comment sentiment via {} -> {} ({:.3})",
            resolved.source_model, resolved.sentiment_label, resolved.sentiment_score
        );

        SentimentAnalysisResult {
            resolved,
            models,
            combined_score,
        }
    }

    /// Normalized sentiment for each mention candidate in a comment.
    ///
    /// A single distinct target scores its context directly; multiple
    /// targets go through opinion attribution and, failing that, the
    /// clause heuristic so one polarity doesn't smear across everyone.
    pub async fn analyze_mentions(
        &self,
        comment_text: &str,
        candidates: &[MentionCandidate],
        contexts: &[String],
        catalog: &HashMap<i64, CastCatalogEntry>,
    ) -> Vec<NormalizedSentiment> {
        if candidates.is_empty() || contexts.is_empty() {
            return Vec::new();
        }
        self.maybe_sample_cache_size();

        let unique_targets: HashSet<i64> =
            candidates.iter().map(|c| c.cast_member_id).collect();
        if unique_targets.len() <= 1 {
            self.analyze_single_target(comment_text, candidates, contexts, catalog)
                .await
        } else {
            self.analyze_multi_target(comment_text, candidates, contexts, catalog)
                .await
        }
    }

    async fn analyze_single_target(
        &self,
        comment_text: &str,
        candidates: &[MentionCandidate],
        contexts: &[String],
        catalog: &HashMap<i64, CastCatalogEntry>,
    ) -> Vec<NormalizedSentiment> {
        let paired: Vec<(&MentionCandidate, &String)> =
            candidates.iter().zip(contexts.iter()).collect();
        let (predictions, primary_error) =
            self.score_primary_aligned(&paired.iter().map(|(_, c)| (*c).clone()).collect::<Vec<_>>());

        let mut document: Option<Option<DocumentSentiment>> = None;
        let mut results = Vec::with_capacity(paired.len());

        for ((candidate, context), prediction) in paired.into_iter().zip(predictions) {
            let started = Instant::now();
            let entry = catalog.get(&candidate.cast_member_id);
            let cast_name = entry.map(|e| e.canonical_name.clone());
            let subject = cast_name.clone().unwrap_or_else(|| "mention".to_string());

            let mut result =
                self.primary_normalized(&prediction, candidate.cast_member_id, cast_name.clone(), &subject);
            let mut fallback_used = false;

            let has_context = !context.trim().is_empty();
            if self.should_use_fallback(&prediction, has_context) {
                if document.is_none() {
                    document = Some(self.fetch_document(comment_text).await);
                }
                let doc = document.as_ref().and_then(|d| d.as_ref());
                let fallback = self
                    .opinion_sentiment(doc, candidate, entry)
                    .or_else(|| {
                        self.document_sentiment(
                            doc,
                            cast_name.as_deref(),
                            Some(candidate.cast_member_id),
                            &subject,
                        )
                    });
                if let Some(fallback) = fallback {
                    result = fallback;
                    fallback_used = true;
                }
            }

            self.emit_metrics("mention", status_of(fallback_used, primary_error), started);
            results.push(result);
        }
        results
    }

    async fn analyze_multi_target(
        &self,
        comment_text: &str,
        candidates: &[MentionCandidate],
        contexts: &[String],
        catalog: &HashMap<i64, CastCatalogEntry>,
    ) -> Vec<NormalizedSentiment> {
        let paired: Vec<(&MentionCandidate, &String)> =
            candidates.iter().zip(contexts.iter()).collect();
        let (predictions, primary_error) =
            self.score_primary_aligned(&paired.iter().map(|(_, c)| (*c).clone()).collect::<Vec<_>>());

        // One document fetch serves every candidate in the comment.
        let document = if self.fallback_available() {
            self.fetch_document(comment_text).await
        } else {
            None
        };

        let mut results = Vec::with_capacity(paired.len());
        for ((candidate, context), prediction) in paired.into_iter().zip(predictions) {
            let started = Instant::now();
            let entry = catalog.get(&candidate.cast_member_id);
            let cast_name = entry.map(|e| e.canonical_name.clone());
            let subject = cast_name.clone().unwrap_or_else(|| "mention".to_string());

            let mut result =
                self.primary_normalized(&prediction, candidate.cast_member_id, cast_name.clone(), &subject);
            let mut fallback_used = false;

            let has_context = !context.trim().is_empty();
            let mut fallback = None;
            if self.should_use_fallback(&prediction, has_context) && document.is_some() {
                fallback = self
                    .opinion_sentiment(document.as_ref(), candidate, entry)
                    .or_else(|| {
                        self.document_sentiment(
                            document.as_ref(),
                            cast_name.as_deref(),
                            Some(candidate.cast_member_id),
                            &subject,
                        )
                    });
            }

            if let Some(fallback) = fallback {
                result = fallback;
                fallback_used = true;
            } else if let Some(heuristic) =
                self.heuristic_sentiment(comment_text, candidate, entry, &prediction, context)
            {
                result = heuristic;
            }

            self.emit_metrics("mention", status_of(fallback_used, primary_error), started);
            results.push(result);
        }
        results
    }

    /// Per-target analysis of arbitrary text. With explicit targets,
    /// each gets a context of the sentences naming it plus follow-on
    /// pronoun sentences; otherwise targets are auto-detected from the
    /// registered aliases.
    pub async fn analyze_freeform(
        &self,
        text_input: &str,
        target_labels: Option<&[String]>,
    ) -> FreeformAnalysis {
        self.maybe_sample_cache_size();
        let mut sentences = text::split_sentences(text_input);
        if sentences.is_empty() && !text_input.trim().is_empty() {
            sentences.push(text_input.trim());
        }

        let specs = self.prepare_target_specs(text_input, target_labels);
        let mut contexts: Vec<Vec<&str>> = specs.iter().map(|_| Vec::new()).collect();

        let mut last_target: Option<usize> = None;
        for &sentence in &sentences {
            let normalized = text::normalize(sentence);
            let mut matched = false;
            for (index, spec) in specs.iter().enumerate() {
                if !spec.alias_tokens.is_empty()
                    && spec.alias_tokens.iter().any(|a| normalized.contains(a))
                {
                    contexts[index].push(sentence);
                    last_target = Some(index);
                    matched = true;
                }
            }
            if matched {
                continue;
            }
            if let Some(target) = last_target {
                let words: HashSet<&str> = normalized.split_whitespace().collect();
                if PRONOUN_TOKENS.iter().any(|p| words.contains(p)) {
                    contexts[target].push(sentence);
                }
            }
        }

        let score_inputs: Vec<String> = specs
            .iter()
            .enumerate()
            .map(|(index, _)| {
                let joined = contexts[index].join(" ");
                if joined.trim().is_empty() {
                    text_input.to_string()
                } else {
                    joined
                }
            })
            .collect();

        let (predictions, primary_error) = self.score_primary_aligned(&score_inputs);

        let mut document: Option<Option<DocumentSentiment>> = None;
        let mut target_results: BTreeMap<String, FreeformTargetResult> = BTreeMap::new();
        let mut fallback_used_any = false;

        for ((spec, prediction), context_sentences) in
            specs.iter().zip(&predictions).zip(&contexts)
        {
            let started = Instant::now();
            let has_context = !context_sentences.is_empty();
            let mut label = prediction.label;
            let mut score = prediction.score;
            let mut probs = Some(prediction.probabilities);
            let mut margin = prediction.margin;
            let mut source = "primary".to_string();
            let mut fallback_used = false;

            if self.should_use_fallback(prediction, has_context) {
                if document.is_none() {
                    document = Some(self.fetch_document(text_input).await);
                }
                let doc = document.as_ref().and_then(|d| d.as_ref());
                let aliases = if spec.alias_tokens.is_empty() {
                    [text::normalize(&spec.key)].into_iter().collect()
                } else {
                    spec.alias_tokens.clone()
                };
                let cast_name = spec.meta.map(|i| self.targets[i].name.clone());
                let fallback = self
                    .opinion_sentiment_for_aliases(doc, &aliases, None, cast_name.as_deref())
                    .or_else(|| {
                        self.document_sentiment(
                            doc,
                            cast_name.as_deref().or(Some(spec.key.as_str())),
                            None,
                            "target",
                        )
                    });
                if let Some(fallback) = fallback {
                    label = fallback.sentiment_label;
                    score = fallback.sentiment_score;
                    probs = fallback.probabilities.or(probs);
                    margin = fallback.margin.unwrap_or(margin);
                    source = "fallback".to_string();
                    fallback_used = true;
                }
            }

            fallback_used_any |= fallback_used;
            self.emit_metrics("freeform", status_of(fallback_used, primary_error), started);
            target_results.insert(
                spec.key.clone(),
                FreeformTargetResult {
                    label,
                    score: round_score(score),
                    probs: abbreviated_probs(probs),
                    margin: round_score(margin),
                    source,
                },
            );
        }

        FreeformAnalysis {
            text: text_input.to_string(),
            model: FreeformModelInfo {
                id: self.scorer.model_id().to_string(),
                rev: self.scorer.revision().to_string(),
                source: "local".to_string(),
            },
            targets: target_results,
            fallback_used: fallback_used_any,
        }
    }

    // ---- Internal helpers -------------------------------------------------

    /// Primary scoring with error masking and length alignment: a
    /// failure becomes one low-confidence neutral per input.
    fn score_primary_aligned(&self, texts: &[String]) -> (Vec<PrimaryPrediction>, bool) {
        match self.scorer.score(texts) {
            Ok(mut predictions) => {
                if predictions.len() != texts.len() {
                    warn!(
                        "primary scorer produced {} predictions for {} inputs; aligning",
                        predictions.len(),
                        texts.len()
                    );
                    predictions.truncate(texts.len());
                    while predictions.len() < texts.len() {
                        predictions.push(PrimaryPrediction::neutral_default());
                    }
                    (predictions, true)
                } else {
                    (predictions, false)
                }
            }
            Err(e) => {
                warn!("primary sentiment failed: {e}");
                (
                    texts
                        .iter()
                        .map(|_| PrimaryPrediction::neutral_default())
                        .collect(),
                    true,
                )
            }
        }
    }

    fn primary_reasoning(&self, prediction: &PrimaryPrediction, subject: &str) -> String {
        format!(
            "{} predicted {} with {:.1}% confidence for the {}.",
            self.scorer.model_id(),
            prediction.label,
            prediction.score * 100.0,
            subject
        )
    }

    fn primary_normalized(
        &self,
        prediction: &PrimaryPrediction,
        cast_member_id: i64,
        cast_member: Option<String>,
        subject: &str,
    ) -> NormalizedSentiment {
        NormalizedSentiment {
            cast_member_id: Some(cast_member_id),
            cast_member,
            sentiment_label: prediction.label,
            sentiment_score: prediction.score,
            source_model: self.scorer.model_id().to_string(),
            reasoning: Some(self.primary_reasoning(prediction, subject)),
            probabilities: Some(prediction.probabilities),
            margin: Some(prediction.margin),
        }
    }

    async fn fetch_document(&self, text_input: &str) -> Option<DocumentSentiment> {
        let client = self.fallback.as_ref()?;
        match client.analyze(&[text_input.to_string()]).await {
            Ok(documents) => documents.into_iter().next(),
            Err(e) => {
                warn!("opinion mining fallback failed: {e}");
                None
            }
        }
    }

    fn document_sentiment(
        &self,
        document: Option<&DocumentSentiment>,
        cast_member_name: Option<&str>,
        cast_member_id: Option<i64>,
        subject: &str,
    ) -> Option<NormalizedSentiment> {
        let document = document?;
        let label = normalize_label(&document.sentiment);
        let probabilities = document.confidence_scores.as_ref().map(probs_from_scores);
        let score = probabilities
            .map(|p| {
                let by_label = p.get(label);
                if by_label > 0.0 {
                    by_label
                } else {
                    p.max()
                }
            })
            .unwrap_or(0.0);

        Some(NormalizedSentiment {
            cast_member_id,
            cast_member: cast_member_name.map(String::from),
            sentiment_label: label,
            sentiment_score: score,
            source_model: self.fallback_service.clone(),
            reasoning: Some(format!(
                "{} inferred {} sentiment ({:.1}%) for the {}.",
                self.fallback_service,
                label,
                score * 100.0,
                cast_member_name.unwrap_or(subject)
            )),
            probabilities,
            margin: None,
        })
    }

    fn opinion_sentiment(
        &self,
        document: Option<&DocumentSentiment>,
        candidate: &MentionCandidate,
        entry: Option<&CastCatalogEntry>,
    ) -> Option<NormalizedSentiment> {
        let aliases = candidate_aliases(candidate, entry);
        let cast_name = entry.map(|e| e.canonical_name.as_str());
        self.opinion_sentiment_for_aliases(
            document,
            &aliases,
            Some(candidate.cast_member_id),
            cast_name,
        )
    }

    /// First opinion target whose text overlaps the alias set.
    fn opinion_sentiment_for_aliases(
        &self,
        document: Option<&DocumentSentiment>,
        aliases: &HashSet<String>,
        cast_member_id: Option<i64>,
        cast_name: Option<&str>,
    ) -> Option<NormalizedSentiment> {
        let document = document?;
        for sentence in &document.sentences {
            for opinion in &sentence.opinions {
                let Some(target) = &opinion.target else {
                    continue;
                };
                let normalized_target = target.text.to_lowercase();
                let matches = aliases.is_empty()
                    || aliases
                        .iter()
                        .any(|alias| normalized_target.contains(alias.as_str()));
                if !matches {
                    continue;
                }

                let label = normalize_label(&target.sentiment);
                let probabilities = target.confidence_scores.as_ref().map(probs_from_scores);
                let score = probabilities
                    .map(|p| {
                        let by_label = p.get(label);
                        if by_label > 0.0 {
                            by_label
                        } else {
                            p.max()
                        }
                    })
                    .unwrap_or(0.0);

                return Some(NormalizedSentiment {
                    cast_member_id,
                    cast_member: cast_name
                        .map(String::from)
                        .or_else(|| Some(target.text.clone())),
                    sentiment_label: label,
                    sentiment_score: score,
                    source_model: self.fallback_service.clone(),
                    reasoning: Some(format!(
                        "{} opinion target '{}' predicted {} sentiment ({:.1}%).",
                        self.fallback_service,
                        target.text,
                        label,
                        score * 100.0
                    )),
                    probabilities,
                    margin: None,
                });
            }
        }
        None
    }

    /// Clause-selection heuristic for a multi-target mention.
    fn heuristic_sentiment(
        &self,
        comment_text: &str,
        candidate: &MentionCandidate,
        entry: Option<&CastCatalogEntry>,
        default_prediction: &PrimaryPrediction,
        context: &str,
    ) -> Option<NormalizedSentiment> {
        let aliases = candidate_aliases(candidate, entry);
        if aliases.is_empty() {
            return None;
        }

        let sentence = heuristics::candidate_sentence(comment_text, &aliases)?;
        let selection = heuristics::select_clause(sentence, &aliases);
        let (clause, pivot) = match &selection {
            Some(selection) => (selection.text.as_str(), selection.pivot.as_deref()),
            None => {
                let fallback = if context.trim().is_empty() {
                    sentence
                } else {
                    context
                };
                (fallback, None)
            }
        };
        let text_to_score = clause.trim();
        if text_to_score.is_empty() {
            return None;
        }

        let (label, score, probabilities, margin) =
            match self.scorer.score(&[text_to_score.to_string()]) {
                Ok(predictions) if !predictions.is_empty() => {
                    let p = &predictions[0];
                    (p.label, p.score, Some(p.probabilities), Some(p.margin))
                }
                _ => {
                    debug!("heuristic scoring failed, keeping primary defaults");
                    (
                        default_prediction.label,
                        default_prediction.score,
                        None,
                        None,
                    )
                }
            };

        let snippet: String = text_to_score.chars().take(80).collect();
        let reasoning = match pivot {
            Some(pivot) => format!(
                "Heuristic clause selection used {} on '{}', prioritizing clause after '{}'.",
                self.scorer.model_id(),
                snippet,
                pivot
            ),
            None => format!(
                "Heuristic clause selection used {} on '{}'.",
                self.scorer.model_id(),
                snippet
            ),
        };

        Some(NormalizedSentiment {
            cast_member_id: Some(candidate.cast_member_id),
            cast_member: entry.map(|e| e.canonical_name.clone()),
            sentiment_label: label,
            sentiment_score: score,
            source_model: format!("{}+heuristic", self.scorer.model_id()),
            reasoning: Some(reasoning),
            probabilities,
            margin,
        })
    }

    fn prepare_target_specs(
        &self,
        text_input: &str,
        target_labels: Option<&[String]>,
    ) -> Vec<TargetSpec> {
        if let Some(labels) = target_labels {
            if !labels.is_empty() {
                return labels
                    .iter()
                    .map(|label| {
                        let normalized = text::normalize(label);
                        let meta = self.lookup.get(&normalized).copied();
                        let alias_tokens = match meta {
                            Some(index) => self.targets[index].normalized_aliases.clone(),
                            None if !normalized.is_empty() => {
                                [normalized].into_iter().collect()
                            }
                            None => HashSet::new(),
                        };
                        TargetSpec {
                            key: label.clone(),
                            meta,
                            alias_tokens,
                        }
                    })
                    .collect();
            }
        }

        let normalized_text = text::normalize(text_input);
        let mut detected: Vec<usize> = Vec::new();
        for (alias, index) in &self.lookup {
            if !alias.is_empty() && normalized_text.contains(alias) && !detected.contains(index) {
                detected.push(*index);
            }
        }
        detected.sort_unstable();

        if detected.is_empty() {
            return vec![TargetSpec {
                key: "comment".to_string(),
                meta: None,
                alias_tokens: HashSet::new(),
            }];
        }

        detected
            .into_iter()
            .map(|index| TargetSpec {
                key: self.targets[index].name.clone(),
                meta: Some(index),
                alias_tokens: self.targets[index].normalized_aliases.clone(),
            })
            .collect()
    }

    fn emit_metrics(&self, scope: &str, status: &str, started: Instant) {
        metrics::inc_sentiment_infer(scope, status);
        metrics::observe_sentiment_latency_ms(scope, started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Sample the on-disk model cache size at most every five minutes.
    fn maybe_sample_cache_size(&self) {
        let Some(cache_dir) = &self.cache_dir else {
            return;
        };
        {
            let mut state = self.cache_gauge.lock().expect("cache gauge mutex poisoned");
            let due = state
                .last_sample
                .map(|at| at.elapsed().as_secs() >= CACHE_GAUGE_INTERVAL_SECS)
                .unwrap_or(true);
            if !due {
                return;
            }
            state.last_sample = Some(Instant::now());
        }
        let bytes = dir_size_bytes(cache_dir);
        metrics::set_model_cache_bytes(bytes);
    }
}

fn register_target(
    targets: &mut Vec<TargetMeta>,
    lookup: &mut HashMap<String, usize>,
    entry: &CastCatalogEntry,
) {
    let canonical = entry.canonical_name.trim().to_string();
    if canonical.is_empty() {
        return;
    }

    let mut aliases: HashSet<String> = entry.aliases.clone();
    aliases.insert(canonical.clone());
    if let Some(slug) = &entry.slug {
        aliases.insert(slug.clone());
        aliases.insert(slug.replace('-', " "));
    }

    let normalized_aliases: HashSet<String> = aliases
        .iter()
        .map(|a| text::normalize(a))
        .filter(|a| !a.is_empty())
        .collect();

    let index = targets.len();
    targets.push(TargetMeta {
        name: canonical,
        normalized_aliases: normalized_aliases.clone(),
    });
    for alias in normalized_aliases {
        lookup.entry(alias).or_insert(index);
    }
}

fn candidate_aliases(
    candidate: &MentionCandidate,
    entry: Option<&CastCatalogEntry>,
) -> HashSet<String> {
    let mut aliases: HashSet<String> = HashSet::new();
    if let Some(entry) = entry {
        aliases.extend(entry.lowered_aliases());
    }
    let quote = candidate.quote.trim().to_lowercase();
    if !quote.is_empty() {
        aliases.insert(quote);
    }
    aliases
}

fn probs_from_scores(scores: &ConfidenceScores) -> LabelProbs {
    LabelProbs {
        negative: scores.negative,
        neutral: scores.neutral,
        positive: scores.positive,
    }
}

fn normalize_label(raw: &str) -> SentimentLabel {
    match raw.to_lowercase().as_str() {
        "positive" | "label_2" => SentimentLabel::Positive,
        "negative" | "label_0" => SentimentLabel::Negative,
        _ => SentimentLabel::Neutral,
    }
}

fn status_of(fallback_used: bool, primary_error: bool) -> &'static str {
    if fallback_used {
        "fallback"
    } else if primary_error {
        "error"
    } else {
        "ok"
    }
}

fn dir_size_bytes(dir: &std::path::Path) -> i64 {
    fn walk(dir: &std::path::Path, total: &mut u64) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, total);
            } else if let Ok(meta) = entry.metadata() {
                *total += meta.len();
            }
        }
    }
    let mut total = 0u64;
    walk(dir, &mut total);
    total.min(i64::MAX as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MlError;
    use castpulse_core::types::MentionMethod;

    /// Keyword scorer: confident positive for praise words, confident
    /// negative for insults, confident neutral otherwise.
    struct KeywordScorer;

    impl SentimentScorer for KeywordScorer {
        fn model_id(&self) -> &str {
            "stub-scorer"
        }

        fn score(&self, texts: &[String]) -> crate::error::Result<Vec<PrimaryPrediction>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lowered = text.to_lowercase();
                    let (label, probs) = if lowered.contains("love")
                        || lowered.contains("great")
                        || lowered.contains("owned")
                    {
                        (
                            SentimentLabel::Positive,
                            LabelProbs {
                                negative: 0.05,
                                neutral: 0.05,
                                positive: 0.9,
                            },
                        )
                    } else if lowered.contains("terrible") || lowered.contains("awful") {
                        (
                            SentimentLabel::Negative,
                            LabelProbs {
                                negative: 0.9,
                                neutral: 0.05,
                                positive: 0.05,
                            },
                        )
                    } else {
                        (
                            SentimentLabel::Neutral,
                            LabelProbs {
                                negative: 0.03,
                                neutral: 0.94,
                                positive: 0.03,
                            },
                        )
                    };
                    let (top, margin) = probs.top_label_and_margin();
                    debug_assert_eq!(top, label);
                    PrimaryPrediction {
                        label,
                        score: probs.get(label),
                        margin,
                        probabilities: probs,
                    }
                })
                .collect())
        }
    }

    struct FailingScorer;

    impl SentimentScorer for FailingScorer {
        fn model_id(&self) -> &str {
            "broken-scorer"
        }

        fn score(&self, _texts: &[String]) -> crate::error::Result<Vec<PrimaryPrediction>> {
            Err(MlError::Model("scorer exploded".into()))
        }
    }

    fn catalog_entries() -> Vec<CastCatalogEntry> {
        vec![
            CastCatalogEntry {
                cast_member_id: 1,
                canonical_name: "Jane".to_string(),
                slug: Some("jane".to_string()),
                aliases: ["Jane".to_string()].into(),
            },
            CastCatalogEntry {
                cast_member_id: 2,
                canonical_name: "John".to_string(),
                slug: Some("john".to_string()),
                aliases: ["John".to_string()].into(),
            },
        ]
    }

    fn catalog_map() -> HashMap<i64, CastCatalogEntry> {
        catalog_entries()
            .into_iter()
            .map(|e| (e.cast_member_id, e))
            .collect()
    }

    async fn pipeline_with(scorer: Arc<dyn SentimentScorer>) -> SentimentPipeline {
        let config = SentimentConfig {
            fallback_enabled: false,
            ..Default::default()
        };
        SentimentPipeline::new(scorer, None, &config, &catalog_entries(), None).await
    }

    fn candidate(id: i64, quote: &str) -> MentionCandidate {
        MentionCandidate {
            cast_member_id: id,
            confidence: 0.95,
            method: MentionMethod::Exact,
            quote: quote.to_string(),
        }
    }

    #[tokio::test]
    async fn confident_primary_is_final() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let result = pipeline.analyze_comment("I love this episode").await;

        assert_eq!(result.resolved.sentiment_label, SentimentLabel::Positive);
        assert_eq!(result.resolved.source_model, "stub-scorer");
        assert_eq!(result.models.len(), 1);
        assert!((result.combined_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn primary_failure_without_fallback_is_neutral_zero() {
        let pipeline = pipeline_with(Arc::new(FailingScorer)).await;
        let result = pipeline.analyze_comment("whatever text").await;

        assert_eq!(result.resolved.sentiment_label, SentimentLabel::Neutral);
        assert_eq!(result.resolved.sentiment_score, 0.0);
        assert_eq!(result.models.len(), 1);
    }

    #[tokio::test]
    async fn multi_target_clause_heuristic_splits_polarity() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let text_input = "I love Jane but John is terrible.";
        let candidates = vec![candidate(1, "Jane"), candidate(2, "John")];
        let contexts = vec![text_input.to_string(), text_input.to_string()];

        let results = pipeline
            .analyze_mentions(text_input, &candidates, &contexts, &catalog_map())
            .await;

        assert_eq!(results.len(), 2);
        let jane = &results[0];
        assert_eq!(jane.sentiment_label, SentimentLabel::Positive);
        assert!(jane.sentiment_score >= 0.85);
        assert!(jane.source_model.ends_with("+heuristic"));
        assert!(jane.reasoning.as_deref().unwrap().contains("clause"));

        let john = &results[1];
        assert_eq!(john.sentiment_label, SentimentLabel::Negative);
        assert!(john.sentiment_score >= 0.85);
        assert!(john.source_model.ends_with("+heuristic"));
    }

    #[tokio::test]
    async fn single_target_keeps_primary_when_confident() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let text_input = "Jane owned the reunion.";
        let candidates = vec![candidate(1, "Jane")];
        let contexts = vec![text_input.to_string()];

        let results = pipeline
            .analyze_mentions(text_input, &candidates, &contexts, &catalog_map())
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sentiment_label, SentimentLabel::Positive);
        assert_eq!(results[0].source_model, "stub-scorer");
        assert_eq!(results[0].cast_member.as_deref(), Some("Jane"));
    }

    #[tokio::test]
    async fn freeform_builds_pronoun_carried_contexts() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let text_input = "Jane was great tonight. She really delivered. John was terrible.";
        let targets = vec!["Jane".to_string(), "John".to_string()];

        let analysis = pipeline.analyze_freeform(text_input, Some(&targets)).await;

        assert!(!analysis.fallback_used);
        assert_eq!(analysis.model.id, "stub-scorer");
        let jane = &analysis.targets["Jane"];
        assert_eq!(jane.label, SentimentLabel::Positive);
        assert_eq!(jane.source, "primary");
        let john = &analysis.targets["John"];
        assert_eq!(john.label, SentimentLabel::Negative);
    }

    #[tokio::test]
    async fn freeform_autodetects_targets_from_catalog() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let analysis = pipeline
            .analyze_freeform("Honestly Jane was great in this one.", None)
            .await;
        assert_eq!(analysis.targets.len(), 1);
        assert!(analysis.targets.contains_key("Jane"));
    }

    #[tokio::test]
    async fn freeform_without_targets_scores_whole_comment() {
        let pipeline = pipeline_with(Arc::new(KeywordScorer)).await;
        let analysis = pipeline
            .analyze_freeform("A perfectly ordinary recap paragraph.", None)
            .await;
        assert_eq!(analysis.targets.len(), 1);
        assert!(analysis.targets.contains_key("comment"));
        assert_eq!(
            analysis.targets["comment"].label,
            SentimentLabel::Neutral
        );
    }
}
