//! FAQ catalog and fuzzy matcher.
//!
//! Curated question/answer pairs are checked before any retrieval. Matching
//! is purely lexical: the normalized query is compared against every
//! normalized trigger phrase with a normalized Levenshtein ratio.

use mentor_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Lowercase, turn punctuation into spaces, collapse whitespace.
///
/// Also used as the response cache key, so equivalent phrasings share one
/// cache entry.
pub fn normalize(query: &str) -> String {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A curated question/answer pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaqEntry {
    pub trigger_phrases: Vec<String>,
    pub canonical_answer: String,

    /// Editorial ranking carried for the surrounding application. Matching
    /// ignores it: ties go to the entry declared first.
    #[serde(default)]
    pub priority: i32,
}

/// Immutable set of FAQ entries in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaqCatalog {
    entries: Vec<FaqEntry>,
}

impl FaqCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a catalog, normalizing every trigger phrase.
    ///
    /// Entries without a usable trigger phrase or answer are rejected.
    pub fn from_entries(entries: Vec<FaqEntry>) -> AppResult<Self> {
        let mut normalized = Vec::with_capacity(entries.len());

        for (i, mut entry) in entries.into_iter().enumerate() {
            entry.trigger_phrases = entry
                .trigger_phrases
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !p.is_empty())
                .collect();

            if entry.trigger_phrases.is_empty() {
                return Err(AppError::Config(format!(
                    "FAQ entry {} has no trigger phrases",
                    i + 1
                )));
            }
            if entry.canonical_answer.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "FAQ entry {} has an empty answer",
                    i + 1
                )));
            }

            normalized.push(entry);
        }

        Ok(Self {
            entries: normalized,
        })
    }

    /// Load a catalog from a YAML (or JSON) list of entries.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read FAQ catalog at {:?}: {}", path, e))
        })?;

        let entries: Vec<FaqEntry> = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse FAQ catalog at {:?}: {}", path, e))
        })?;

        let catalog = Self::from_entries(entries)?;
        tracing::debug!("Loaded {} FAQ entries from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A catalog entry matched by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct FaqMatch<'a> {
    pub entry: &'a FaqEntry,

    /// Best similarity ratio over the entry's trigger phrases, in [0, 1]
    pub ratio: f32,
}

/// Threshold-gated lookup over a catalog.
#[derive(Debug, Clone)]
pub struct FaqMatcher {
    catalog: FaqCatalog,
    threshold: f32,
}

impl FaqMatcher {
    pub fn new(catalog: FaqCatalog, threshold: f32) -> Self {
        Self { catalog, threshold }
    }

    pub fn catalog(&self) -> &FaqCatalog {
        &self.catalog
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Best entry whose similarity reaches the threshold.
    ///
    /// Highest ratio wins; equal ratios go to the entry declared first.
    pub fn find(&self, query: &str) -> Option<FaqMatch<'_>> {
        let query = normalize(query);
        if query.is_empty() {
            return None;
        }

        let mut best: Option<FaqMatch<'_>> = None;
        for entry in &self.catalog.entries {
            let ratio = entry
                .trigger_phrases
                .iter()
                .map(|phrase| strsim::normalized_levenshtein(&query, phrase) as f32)
                .fold(0.0f32, f32::max);

            if ratio < self.threshold {
                continue;
            }

            // Strictly greater, so a later entry never displaces an equal one.
            if best.as_ref().map_or(true, |current| ratio > current.ratio) {
                best = Some(FaqMatch { entry, ratio });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(phrases: &[&str], answer: &str, priority: i32) -> FaqEntry {
        FaqEntry {
            trigger_phrases: phrases.iter().map(|p| p.to_string()).collect(),
            canonical_answer: answer.to_string(),
            priority,
        }
    }

    fn matcher(entries: Vec<FaqEntry>) -> FaqMatcher {
        FaqMatcher::new(FaqCatalog::from_entries(entries).unwrap(), 0.8)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("  How do I RESET my password?! "),
            "how do i reset my password"
        );
        assert_eq!(normalize("refund\tpolicy...\nplease"), "refund policy please");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn test_exact_match_after_normalization() {
        let m = matcher(vec![entry(
            &["how do i reset my password"],
            "Use the Forgot Password link.",
            0,
        )]);

        let found = m.find("How do I reset my password?").unwrap();
        assert_eq!(found.entry.canonical_answer, "Use the Forgot Password link.");
        assert_eq!(found.ratio, 1.0);
    }

    #[test]
    fn test_near_match_and_threshold() {
        let m = matcher(vec![entry(&["how do i reset my password"], "Forgot link.", 0)]);

        let found = m.find("how can i reset my password").unwrap();
        assert!(found.ratio >= 0.8 && found.ratio < 1.0);

        assert!(m.find("what is the refund policy").is_none());
        assert!(m.find("").is_none());
    }

    #[test]
    fn test_tie_goes_to_earlier_entry() {
        let m = matcher(vec![
            entry(&["exam dates"], "first", 0),
            entry(&["exam dates"], "second", 0),
        ]);

        for _ in 0..3 {
            assert_eq!(m.find("Exam dates?").unwrap().entry.canonical_answer, "first");
        }
    }

    #[test]
    fn test_tie_ignores_priority() {
        let m = matcher(vec![
            entry(&["exam dates"], "first", 0),
            entry(&["exam dates"], "second", 5),
        ]);
        assert_eq!(m.find("exam dates").unwrap().entry.canonical_answer, "first");
    }

    #[test]
    fn test_higher_ratio_beats_earlier_entry() {
        let m = matcher(vec![
            entry(&["exam date"], "close", 9),
            entry(&["exam dates"], "exact", 0),
        ]);
        assert_eq!(m.find("exam dates").unwrap().entry.canonical_answer, "exact");
    }

    #[test]
    fn test_invalid_entries_rejected() {
        assert!(FaqCatalog::from_entries(vec![entry(&["?!"], "answer", 0)]).is_err());
        assert!(FaqCatalog::from_entries(vec![entry(&["hello"], " ", 0)]).is_err());
    }

    #[test]
    fn test_load_yaml_catalog() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("faq.yaml");
        fs::write(
            &path,
            r#"
- trigger_phrases: ["How do I reset my password?"]
  canonical_answer: Use the Forgot Password link.
- trigger_phrases: ["office hours", "when is the office open"]
  canonical_answer: Weekdays 9 to 5.
  priority: 2
"#,
        )
        .unwrap();

        let catalog = FaqCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.entries()[0].trigger_phrases,
            vec!["how do i reset my password"]
        );
        assert_eq!(catalog.entries()[1].priority, 2);
    }

    #[test]
    fn test_load_missing_catalog_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = FaqCatalog::load(&temp.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
