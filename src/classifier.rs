//! Bank classifier — keyword tagging and noise filtering for incoming emails.
//!
//! Two independent matchers with deliberately different semantics:
//! - `classify` uses case-insensitive *whole-word* keyword matching, so a
//!   short tag keyword like "db" never fires inside "database".
//! - `is_noise` uses plain substring containment over the lowercased text,
//!   with no word boundaries. The asymmetry is intentional and load-bearing:
//!   noise phrases ("teams meeting", "add to calendar") are long enough that
//!   substring matching is safe, and boundary-matching them would miss
//!   run-together subject lines.

use regex::Regex;
use tracing::debug;

/// A single bank's keyword rule: ordered phrases compiled to word-boundary
/// regexes.
#[derive(Debug, Clone)]
struct BankRule {
    tag: String,
    patterns: Vec<Regex>,
}

/// Keyword-driven classifier mapping free text to a bank tag.
///
/// Rules are evaluated in declaration order and the **first matching bank
/// wins** — not best-match, not longest-match. This tie-break mirrors the
/// ordering of the production keyword table and is relied on by downstream
/// consumers, so it must not be "improved" to a scoring scheme.
pub struct BankClassifier {
    rules: Vec<BankRule>,
    noise: Vec<String>,
    default_tag: String,
}

impl BankClassifier {
    /// Build a classifier from an ordered `(tag, keyword phrases)` table and
    /// a substring denylist. Keywords are matched case-insensitively on word
    /// boundaries; denylist entries are lowercased at construction.
    pub fn new(
        rules: Vec<(&str, Vec<&str>)>,
        noise: Vec<&str>,
        default_tag: &str,
    ) -> Result<Self, regex::Error> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (tag, phrases) in rules {
            let patterns = phrases
                .iter()
                .map(|phrase| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))))
                .collect::<Result<Vec<_>, _>>()?;
            compiled.push(BankRule {
                tag: tag.to_string(),
                patterns,
            });
        }
        Ok(Self {
            rules: compiled,
            noise: noise.iter().map(|s| s.to_lowercase()).collect(),
            default_tag: default_tag.to_string(),
        })
    }

    /// Classifier with the production bank keyword table.
    pub fn default_rules() -> Self {
        Self::new(
            vec![
                ("GS", vec!["goldman", "goldman sachs"]),
                ("Citi", vec!["citi", "citigroup", "citibank"]),
                ("MS", vec!["morgan stanley"]),
                ("JPM", vec!["jpm", "jp morgan", "j.p. morgan"]),
                ("UBS", vec!["ubs"]),
                ("Barclays", vec!["barclays"]),
                ("BofA", vec!["bofa", "bank of america"]),
                ("HSBC", vec!["hsbc"]),
                ("ANZ", vec!["anz"]),
                ("RV", vec!["rv", "rvcapital"]),
                ("DB", vec!["db", "deutsche bank", "deutsche"]),
                ("Nomura", vec!["nomura"]),
                ("SCB", vec!["standard chartered bank", "scb", "standard chartered"]),
                (
                    "CBA",
                    vec!["commonwealth bank of australia", "commonwealth bank", "commbank"],
                ),
            ],
            vec![
                "microsoft teams",
                "teams meeting",
                "zoom",
                "webex",
                "google meet",
                "slack",
                "chat message",
                "missed call",
                "voicemail",
                "invited",
                "github",
                "welcome",
                "password",
                "training",
                "webcast",
                "add to calendar",
                "activation code",
            ],
            "MISC",
        )
        .expect("default classifier rules must compile")
    }

    /// An empty classifier (for testing): everything maps to the default tag.
    pub fn empty(default_tag: &str) -> Self {
        Self {
            rules: Vec::new(),
            noise: Vec::new(),
            default_tag: default_tag.to_string(),
        }
    }

    /// The tag returned when no keyword matches.
    pub fn default_tag(&self) -> &str {
        &self.default_tag
    }

    /// Map free text (subject + body) to a bank tag.
    pub fn classify(&self, text: &str) -> &str {
        for rule in &self.rules {
            if rule.patterns.iter().any(|p| p.is_match(text)) {
                debug!(tag = %rule.tag, "Text matched bank keyword");
                return &rule.tag;
            }
        }
        &self.default_tag
    }

    /// True if the text looks like calendar/IT/chat noise rather than research.
    pub fn is_noise(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.noise.iter().any(|kw| lower.contains(kw))
    }
}
