//! Clause selection for multi-target comments.
//!
//! When a comment names several cast members and opinion mining has
//! nothing to attribute, the primary model would smear one polarity
//! over every target. Selecting the clause that actually talks about
//! the target — split at a contrastive pivot, or a token window around
//! the alias — recovers per-target polarity.

use std::collections::HashSet;

use crate::text::split_sentences;

/// Contrastive pivots, padded so only whole words match.
const PIVOT_TERMS: &[&str] = &[
    " however ",
    " but ",
    " though ",
    " although ",
    " yet ",
    " nevertheless ",
    " still ",
];

/// Words taken either side of the alias in the window fallback.
const WINDOW_TOKENS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSelection {
    pub text: String,
    /// The pivot word the sentence was split at, if any.
    pub pivot: Option<String>,
}

/// First sentence whose lowercase form contains any of the aliases.
pub fn candidate_sentence<'a>(text: &'a str, lowered_aliases: &HashSet<String>) -> Option<&'a str> {
    split_sentences(text).into_iter().find(|sentence| {
        let lowered = sentence.to_lowercase();
        lowered_aliases.iter().any(|alias| lowered.contains(alias))
    })
}

/// Choose the clause of `sentence` that belongs to the alias.
///
/// Splits at the rightmost contrastive pivot, keeping the side the
/// alias sits on; falls back to a token window centred on the alias.
pub fn select_clause(sentence: &str, lowered_aliases: &HashSet<String>) -> Option<ClauseSelection> {
    if sentence.is_empty() {
        return None;
    }
    let lowered = sentence.to_lowercase();
    // Byte offsets found in the lowered copy only index the original
    // safely for ASCII input; otherwise slice the lowered copy itself.
    let sliceable: &str = if sentence.is_ascii() {
        sentence
    } else {
        &lowered
    };

    let alias_index = lowered_aliases
        .iter()
        .filter_map(|alias| lowered.find(alias.as_str()))
        .min();

    for pivot in PIVOT_TERMS {
        let Some(pivot_index) = lowered.rfind(pivot) else {
            continue;
        };
        let pivot_clean = pivot.trim().to_string();
        let pivot_end = pivot_index + pivot.len();

        if let Some(alias_index) = alias_index {
            let clause = if alias_index >= pivot_end {
                sliceable[pivot_end..].trim_matches([' ', ',', ';', '-'])
            } else {
                sliceable[..pivot_index].trim_matches([' ', ',', ';', '-'])
            };
            if !clause.is_empty() {
                return Some(ClauseSelection {
                    text: clause.to_string(),
                    pivot: Some(pivot_clean),
                });
            }
        }
    }

    // Window fallback: the tokens around the alias occurrence.
    let alias_index = alias_index?;
    let tokens: Vec<(usize, &str)> = lowered
        .split_whitespace()
        .scan(0usize, |offset, token| {
            let start = lowered[*offset..].find(token).map(|i| *offset + i)?;
            *offset = start + token.len();
            Some((start, token))
        })
        .collect();
    let position = tokens
        .iter()
        .position(|(start, token)| *start <= alias_index && alias_index < start + token.len())?;

    let begin = position.saturating_sub(WINDOW_TOKENS);
    let end = (position + WINDOW_TOKENS + 1).min(tokens.len());
    let window_start = tokens[begin].0;
    let last = tokens[end - 1];
    let window_end = last.0 + last.1.len();
    let clause = sliceable[window_start..window_end].trim();

    if clause.is_empty() || clause.eq_ignore_ascii_case(sentence.trim()) {
        return None;
    }
    Some(ClauseSelection {
        text: clause.to_string(),
        pivot: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_lowercase()).collect()
    }

    #[test]
    fn pivot_split_keeps_the_alias_side() {
        let sentence = "I love Jane but John is terrible.";

        let jane = select_clause(sentence, &aliases(&["jane"])).unwrap();
        assert_eq!(jane.text, "I love Jane");
        assert_eq!(jane.pivot.as_deref(), Some("but"));

        let john = select_clause(sentence, &aliases(&["john"])).unwrap();
        assert_eq!(john.text, "John is terrible.");
        assert_eq!(john.pivot.as_deref(), Some("but"));
    }

    #[test]
    fn rightmost_pivot_wins() {
        let sentence = "She tried but failed but Whitney was great.";
        let selection = select_clause(sentence, &aliases(&["whitney"])).unwrap();
        assert_eq!(selection.text, "Whitney was great.");
    }

    #[test]
    fn window_fallback_without_pivot() {
        let sentence = "Everyone at that dinner kept ignoring Angie the entire awkward night sadly";
        let selection = select_clause(sentence, &aliases(&["angie"])).unwrap();
        assert!(selection.pivot.is_none());
        assert!(selection.text.contains("angie") || selection.text.contains("Angie"));
        assert!(selection.text.len() < sentence.len());
    }

    #[test]
    fn no_alias_occurrence_yields_none() {
        let sentence = "Nothing about anyone in particular here.";
        assert!(select_clause(sentence, &aliases(&["jane"])).is_none());
    }

    #[test]
    fn candidate_sentence_finds_the_alias_sentence() {
        let text = "The trip was great. Jane was a nightmare though. Dinner was fine.";
        let sentence = candidate_sentence(text, &aliases(&["jane"])).unwrap();
        assert_eq!(sentence, "Jane was a nightmare though.");
    }
}
