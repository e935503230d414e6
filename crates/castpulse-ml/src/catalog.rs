use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

/// One cast member as seen by the linker and the sentiment pipeline.
///
/// The alias set is assembled by the caller from the member's full
/// name, display name, slug (dashes as spaces), admin-managed aliases
/// and roster-file aliases.
#[derive(Debug, Clone)]
pub struct CastCatalogEntry {
    pub cast_member_id: i64,
    pub canonical_name: String,
    pub slug: Option<String>,
    pub aliases: HashSet<String>,
}

impl CastCatalogEntry {
    /// Canonical name plus every alias, lowercased.
    pub fn lowered_aliases(&self) -> HashSet<String> {
        let mut set: HashSet<String> = self
            .aliases
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        let canonical = self.canonical_name.trim().to_lowercase();
        if !canonical.is_empty() {
            set.insert(canonical);
        }
        set
    }
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    members: Vec<RosterMember>,
}

#[derive(Debug, Deserialize)]
struct RosterMember {
    slug: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Aliases contributed by roster JSON files, keyed by cast slug.
///
/// Files that fail to parse are skipped with a warning; a missing
/// directory yields an empty map.
pub fn roster_aliases(dir: &Path) -> HashMap<String, HashSet<String>> {
    let mut result: HashMap<String, HashSet<String>> = HashMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return result,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("unable to read roster file {}: {e}", path.display());
                continue;
            }
        };
        let roster: RosterFile = match serde_json::from_str(&raw) {
            Ok(roster) => roster,
            Err(e) => {
                warn!("invalid roster file {}: {e}", path.display());
                continue;
            }
        };
        for member in roster.members {
            let aliases = result.entry(member.slug).or_default();
            aliases.extend(
                member
                    .aliases
                    .into_iter()
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty()),
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowered_aliases_include_canonical() {
        let entry = CastCatalogEntry {
            cast_member_id: 1,
            canonical_name: "Lisa Barlow".to_string(),
            slug: Some("lisa-barlow".to_string()),
            aliases: ["Lisa".to_string(), "Baby Gorgeous".to_string()].into(),
        };
        let lowered = entry.lowered_aliases();
        assert!(lowered.contains("lisa barlow"));
        assert!(lowered.contains("lisa"));
        assert!(lowered.contains("baby gorgeous"));
    }

    #[test]
    fn roster_dir_missing_is_empty() {
        let aliases = roster_aliases(Path::new("/nonexistent/castpulse-rosters"));
        assert!(aliases.is_empty());
    }
}
