//! Keyword-based intent classification.
//!
//! Deterministic fallback for when the LLM classifier is unavailable, slow,
//! or unsure. Matches worker vocabularies against the utterance and extracts
//! coarse parameters (locations, business types, job titles) with regexes.
//! Infallible: always produces an intent, down to `general_query` with zero
//! confidence when nothing matches.

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::adapters::{ClassificationAdapter, ClassifiedIntent};
use crate::error::AdapterError;
use crate::jobs::model::TaskType;

/// Vocabulary that marks an utterance as lead discovery work.
const DISCOVERY_TERMS: &str =
    r"(?i)\b(leads?|prospects?|prospecting|find\s+(?:companies|customers|clients|contacts))\b";

/// Vocabulary for profile / organization research.
const RESEARCH_TERMS: &str =
    r"(?i)\b(research|profile|background|reputation|who\s+is|look\s*up|tell\s+me\s+about)\b";

/// Vocabulary for outbound messaging.
const MESSAGING_TERMS: &str =
    r"(?i)\b(message|outreach|campaign|email\s+them|follow\s*-?\s*up|send\s+(?:a\s+)?(?:message|email)|draft)\b";

/// Vocabulary for inbox monitoring.
const INBOX_TERMS: &str = r"(?i)\b(inbox|unread|replies|responses|monitor|incoming)\b";

/// Business / industry descriptors recognized as search parameters.
const BUSINESS_TERMS: &str = r"(?i)\b(software|saas|tech(?:nology)?|fintech|finance|banking|insurance|healthcare|medical|legal|law|real\s+estate|construction|retail|restaurant|hospitality|e-?commerce|manufacturing|logistics|consulting|marketing|media|education|energy)\b";

/// Job titles and seniority markers recognized as search parameters.
const TITLE_TERMS: &str = r"(?i)\b(ceo|cto|cfo|coo|cmo|vp|vice\s+president|president|founder|co-?founder|owner|director|head\s+of\s+\w+|manager|partner|principal)\b";

/// Capitalized phrase after a location preposition ("in Austin",
/// "near San Francisco").
const LOCATION_PATTERN: &str =
    r"\b(?:in|near|around|from)\s+([A-Z][a-z']+(?:\s+[A-Z][a-z']+)*)";

pub struct KeywordClassifier {
    discovery: Regex,
    research: Regex,
    messaging: Regex,
    inbox: Regex,
    businesses: Regex,
    titles: Regex,
    locations: Regex,
    /// Confidence reported for a single clean vocabulary match.
    confidence: f32,
}

impl KeywordClassifier {
    pub fn new(confidence: f32) -> Self {
        // The patterns are compile-time constants; construction cannot fail.
        Self {
            discovery: Regex::new(DISCOVERY_TERMS).unwrap(),
            research: Regex::new(RESEARCH_TERMS).unwrap(),
            messaging: Regex::new(MESSAGING_TERMS).unwrap(),
            inbox: Regex::new(INBOX_TERMS).unwrap(),
            businesses: Regex::new(BUSINESS_TERMS).unwrap(),
            titles: Regex::new(TITLE_TERMS).unwrap(),
            locations: Regex::new(LOCATION_PATTERN).unwrap(),
            confidence,
        }
    }

    /// Classify by vocabulary match. When several worker vocabularies match,
    /// discovery wins over research wins over messaging wins over inbox, at
    /// reduced confidence.
    pub fn classify_keywords(&self, utterance: &str) -> ClassifiedIntent {
        let matches: Vec<TaskType> = [
            (&self.discovery, TaskType::LeadGeneration),
            (&self.research, TaskType::ProfileResearch),
            (&self.messaging, TaskType::MessageCampaign),
            (&self.inbox, TaskType::InboxMonitoring),
        ]
        .into_iter()
        .filter(|(re, _)| re.is_match(utterance))
        .map(|(_, t)| t)
        .collect();

        let (task_type, confidence) = match matches.as_slice() {
            [] => (TaskType::GeneralQuery, 0.0),
            [single] => (*single, self.confidence),
            [first, ..] => (*first, (self.confidence - 0.15).max(0.0)),
        };

        let parameters = if task_type.has_worker() {
            self.extract_parameters(utterance)
        } else {
            json!({})
        };

        ClassifiedIntent {
            task_type,
            confidence,
            parameters,
        }
    }

    fn extract_parameters(&self, utterance: &str) -> serde_json::Value {
        let locations: Vec<String> = self
            .locations
            .captures_iter(utterance)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect();
        let businesses: Vec<String> = self
            .businesses
            .find_iter(utterance)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let titles: Vec<String> = self
            .titles
            .find_iter(utterance)
            .map(|m| m.as_str().to_uppercase())
            .collect();

        json!({
            "locations": locations,
            "businesses": businesses,
            "jobTitles": titles,
        })
    }
}

#[async_trait]
impl ClassificationAdapter for KeywordClassifier {
    async fn classify(
        &self,
        utterance: &str,
        _context: &str,
    ) -> Result<ClassifiedIntent, AdapterError> {
        Ok(self.classify_keywords(utterance))
    }
}
