//! Deterministic install phrasings.
//!
//! Patterns are tried in order against the lowercased request and the first
//! hit wins. Anything before the trigger phrase is ignored, so "hey, could
//! you please install numpy thanks" still matches.

use lazy_static::lazy_static;
use regex::Regex;
use warden_types::{ConfidenceSource, Intent};

const PACKAGE: &str = r"(?:the\s+|a\s+|an\s+)?(?:package\s+|library\s+|module\s+)?([a-z0-9][a-z0-9._-]*)";
const VERSION: &str = r"(\d+(?:\.\d+)*(?:[a-z]+\d*)?)";

/// Trigger phrases, most specific first.
const TRIGGERS: &[&str] = &[
    r"\bpip3?\s+install\s+(?:-u\s+|--upgrade\s+)?",
    r"\bconda\s+install\s+",
    r"\bplease\s+install\s+",
    r"\bcan\s+you\s+install\s+",
    r"\binstall\s+",
    r"\bi\s+need\s+",
    r"\bset\s*up\s+",
    r"\badd\s+",
    r"\bdownload\s+",
    r"\bget\s+",
];

/// Words that follow a trigger but are never package names.
const STOP_WORDS: &[&str] = &[
    "it", "this", "that", "me", "my", "some", "to", "help", "started", "access", "rid", "with",
    "for", "on", "in", "and", "or", "is", "are",
];

lazy_static! {
    static ref TRIGGER_PATTERNS: Vec<Regex> = TRIGGERS
        .iter()
        .map(|trigger| Regex::new(&format!("{trigger}{PACKAGE}")).expect("valid trigger pattern"))
        .collect();

    /// Version immediately after the package: `numpy==1.2`, `numpy 1.2`,
    /// `numpy version 1.2`, `numpy v1.2`.
    static ref TRAILING_VERSION: Regex = Regex::new(&format!(
        r"^\s*(?:==\s*|@\s*|\s(?:version\s+|v)?){VERSION}\b"
    ))
    .expect("valid trailing version pattern");

    /// Version mentioned elsewhere in the sentence.
    static ref LOOSE_VERSIONS: Vec<Regex> = [
        format!(r"\bversion\s+{VERSION}"),
        format!(r"\bv{VERSION}\b"),
        format!(r"==\s*{VERSION}"),
        format!(r">=\s*{VERSION}"),
        format!(r"{VERSION}\s*version\b"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid version pattern"))
    .collect();
}

/// Apply the rule set. `None` means no rule was conclusive.
pub fn match_rules(text: &str) -> Option<Intent> {
    let lowered = text.to_lowercase();

    for pattern in TRIGGER_PATTERNS.iter() {
        let Some(captures) = pattern.captures(&lowered) else {
            continue;
        };
        let Some(package) = captures.get(1) else {
            continue;
        };

        let name = package.as_str().trim_end_matches(['.', '-', '_']);
        if name.is_empty() || STOP_WORDS.contains(&name) {
            continue;
        }

        let rest = &lowered[package.end()..];
        let version = extract_version(rest, &lowered);
        tracing::debug!(package = name, version = ?version, "Rule-matched install intent");
        return Some(Intent::install(name, version, ConfidenceSource::Rule));
    }

    None
}

fn extract_version(after_package: &str, whole: &str) -> Option<String> {
    if let Some(found) = TRAILING_VERSION
        .captures(after_package)
        .and_then(|c| c.get(1))
    {
        return Some(found.as_str().to_string());
    }

    LOOSE_VERSIONS
        .iter()
        .find_map(|pattern| pattern.captures(whole).and_then(|c| c.get(1)))
        .map(|found| found.as_str().to_string())
}
