//! Knowledge items and the fixed domain partition

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four fixed knowledge domains.
///
/// Every curated item belongs to exactly one domain; the pipeline fans out
/// one review branch per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Economics and business
    Business,
    /// Science and technology
    Science,
    /// History and society
    History,
    /// Humanities and self-development
    Humanities,
}

impl Domain {
    /// All domains, in declaration order. The fan-out width is fixed to this.
    pub const ALL: [Domain; 4] = [
        Domain::Business,
        Domain::Science,
        Domain::History,
        Domain::Humanities,
    ];

    /// Stable lowercase identifier, used in anchor ids and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Business => "business",
            Domain::Science => "science",
            Domain::History => "history",
            Domain::Humanities => "humanities",
        }
    }

    /// Human-readable label for assembled documents.
    pub fn label(&self) -> &'static str {
        match self {
            Domain::Business => "Economics & Business",
            Domain::Science => "Science & Technology",
            Domain::History => "History & Society",
            Domain::Humanities => "Humanities & Self-Development",
        }
    }

    /// Deterministic fallback anchor assigned when retrieval finds nothing
    /// for this domain. Not an index member; the validator's anchor universe
    /// must include it once assigned.
    pub fn sentinel_anchor(&self) -> String {
        format!("{}_default_001", self.as_str())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business" => Ok(Domain::Business),
            "science" => Ok(Domain::Science),
            "history" => Ok(Domain::History),
            "humanities" => Ok(Domain::Humanities),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// One curated insight from the knowledge corpus. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    /// Item id, unique across the corpus (e.g. `kb_business_0001`)
    pub id: String,
    /// Owning domain
    pub domain: Domain,
    /// Subcategory section the item was parsed from
    pub subcategory: String,
    /// Citation key, globally unique across the corpus
    pub anchor_id: String,
    /// The insight text
    pub content: String,
    /// Insight spans multiple reference works
    pub is_fusion: bool,
    /// Synthesized cross-cutting statement for its subcategory;
    /// carries no reference list
    pub is_integrated: bool,
    /// Ordered reference works; empty when integrated
    pub reference_works: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_round_trips_through_str() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
    }

    #[test]
    fn sentinel_anchor_is_deterministic() {
        assert_eq!(Domain::Science.sentinel_anchor(), "science_default_001");
        assert_eq!(
            Domain::Science.sentinel_anchor(),
            Domain::Science.sentinel_anchor()
        );
    }

    #[test]
    fn domain_serde_uses_lowercase() {
        let json = serde_json::to_string(&Domain::Humanities).unwrap();
        assert_eq!(json, "\"humanities\"");
        let back: Domain = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Domain::Humanities);
    }
}
