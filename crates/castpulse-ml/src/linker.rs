use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use castpulse_core::types::MentionMethod;

use crate::catalog::CastCatalogEntry;
use crate::ner;
use crate::text;

/// Aliases shorter than this are roster noise and never registered.
const MIN_ALIAS_LEN: usize = 3;
/// Fuzzy candidates below this partial-ratio score are discarded.
const FUZZY_THRESHOLD: f64 = 85.0;

const EXACT_CONFIDENCE: f64 = 0.95;
const EXACT_NER_CONFIDENCE: f64 = 0.98;

#[derive(Debug, Clone, PartialEq)]
pub struct MentionCandidate {
    pub cast_member_id: i64,
    pub confidence: f64,
    pub method: MentionMethod,
    pub quote: String,
}

/// Resolves cast-member mentions in free text.
///
/// Built once per linking batch from the active catalog. Each alias is
/// compiled into a case-insensitive pattern with simulated word
/// boundaries (the regex engine has no lookaround, so the boundary is
/// a non-alphanumeric group around a captured alias).
pub struct EntityLinker {
    alias_lookup: HashMap<String, i64>,
    alias_choices: Vec<String>,
    alias_patterns: Vec<(String, Regex)>,
}

impl EntityLinker {
    pub fn new(catalog: &[CastCatalogEntry]) -> Self {
        let mut linker = Self {
            alias_lookup: HashMap::new(),
            alias_choices: Vec::new(),
            alias_patterns: Vec::new(),
        };

        for entry in catalog {
            let canonical = entry.canonical_name.trim().to_lowercase();
            if !canonical.is_empty() {
                linker.register_alias(&canonical, entry.cast_member_id);
            }
            for alias in &entry.aliases {
                let normalized = alias.trim().to_lowercase();
                if normalized.chars().count() < MIN_ALIAS_LEN {
                    continue;
                }
                linker.register_alias(&normalized, entry.cast_member_id);
            }
        }
        linker
    }

    fn register_alias(&mut self, alias: &str, cast_member_id: i64) {
        if self.alias_lookup.contains_key(alias) {
            return;
        }
        let pattern = format!(
            "(?i)(?:^|[^0-9a-zA-Z])({})(?:[^0-9a-zA-Z]|$)",
            regex::escape(alias)
        );
        match Regex::new(&pattern) {
            Ok(regex) => {
                self.alias_lookup.insert(alias.to_string(), cast_member_id);
                self.alias_choices.push(alias.to_string());
                self.alias_patterns.push((alias.to_string(), regex));
            }
            Err(e) => debug!("skipping unpatternable alias {alias:?}: {e}"),
        }
    }

    /// Find at most one candidate per cast member, highest confidence
    /// winning: exact alias scan, then the entity pass with exact and
    /// fuzzy resolution.
    pub fn find_mentions(&self, text_input: &str) -> Vec<MentionCandidate> {
        if text_input.is_empty() {
            return Vec::new();
        }

        let mut candidates: HashMap<i64, MentionCandidate> = HashMap::new();

        for (alias, pattern) in &self.alias_patterns {
            let Some(cast_id) = self.alias_lookup.get(alias).copied() else {
                continue;
            };
            if let Some(captures) = pattern.captures(text_input) {
                let quote = captures
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| alias.clone());
                register_candidate(
                    &mut candidates,
                    MentionCandidate {
                        cast_member_id: cast_id,
                        confidence: EXACT_CONFIDENCE,
                        method: MentionMethod::Exact,
                        quote,
                    },
                );
            }
        }

        for entity in ner::extract_entities(text_input) {
            let normalized = entity.text.to_lowercase();
            if let Some(cast_id) = self.alias_lookup.get(&normalized).copied() {
                register_candidate(
                    &mut candidates,
                    MentionCandidate {
                        cast_member_id: cast_id,
                        confidence: EXACT_NER_CONFIDENCE,
                        method: MentionMethod::ExactNer,
                        quote: entity.text.clone(),
                    },
                );
                continue;
            }

            if let Some((alias, score)) = self.best_fuzzy_match(&normalized) {
                if let Some(cast_id) = self.alias_lookup.get(&alias).copied() {
                    register_candidate(
                        &mut candidates,
                        MentionCandidate {
                            cast_member_id: cast_id,
                            confidence: score / 100.0,
                            method: MentionMethod::Fuzzy,
                            quote: entity.text.clone(),
                        },
                    );
                }
            }
        }

        let mut result: Vec<MentionCandidate> = candidates.into_values().collect();
        result.sort_by_key(|c| c.cast_member_id);
        result
    }

    fn best_fuzzy_match(&self, entity_text: &str) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for alias in &self.alias_choices {
            let score = text::partial_ratio(entity_text, alias);
            if score < FUZZY_THRESHOLD {
                continue;
            }
            match &best {
                Some((_, current)) if *current >= score => {}
                _ => best = Some((alias.clone(), score)),
            }
        }
        best
    }
}

fn register_candidate(candidates: &mut HashMap<i64, MentionCandidate>, candidate: MentionCandidate) {
    match candidates.get(&candidate.cast_member_id) {
        Some(existing) if existing.confidence >= candidate.confidence => {}
        _ => {
            candidates.insert(candidate.cast_member_id, candidate);
        }
    }
}
