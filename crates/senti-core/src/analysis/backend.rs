use crate::errors::CoreError;
use crate::models::{AnalysisOptions, BackendKind, Sentiment};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Faults a remote backend can raise. The router absorbs all of them through
/// the fallback chain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend rate limited: {0}")]
    RateLimited(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Transient faults are retried with backoff before falling through.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Timeout(_))
    }
}

/// A label with a backend-reported score.
#[derive(Debug, Clone, PartialEq)]
pub struct RawScore {
    pub label: String,
    pub score: f64,
}

/// One item as a backend reported it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAnalysis {
    /// Backend-specific sentiment label.
    pub label: String,
    pub confidence: f64,
    pub emotions: Vec<RawScore>,
    /// `None` when the backend did not deliver key phrases for this item.
    pub key_phrases: Option<Vec<RawScore>>,
}

impl RawAnalysis {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
            emotions: Vec::new(),
            key_phrases: None,
        }
    }
}

/// Per-item outcome of a batch call, in input order. A rejected item does
/// not fail its neighbours.
pub type BatchOutcome = Vec<Result<RawAnalysis, BackendError>>;

/// Capability interface for remote sentiment backends. Sync only; the router
/// runs calls on its own worker threads.
pub trait AnalysisBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Largest accepted text, in UTF-8 bytes.
    fn max_text_bytes(&self) -> usize;

    /// Largest accepted batch, in texts.
    fn max_batch_size(&self) -> usize;

    /// The backend's documented sentiment vocabulary.
    fn vocabulary(&self) -> &LabelVocabulary;

    /// Whether the backend reports emotions itself.
    fn supports_emotions(&self) -> bool {
        false
    }

    /// Whether `analyze_batch` enforces the request timeout itself. Such
    /// backends are called directly instead of on a watchdog thread, so a
    /// call that already billed is never abandoned mid-way.
    fn enforces_timeout(&self) -> bool {
        false
    }

    /// Analyze one text.
    fn analyze_sentiment(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<RawAnalysis, BackendError> {
        let mut outcome = self.analyze_batch(&[text.to_string()], options)?;
        outcome
            .pop()
            .unwrap_or_else(|| Err(BackendError::Unavailable("empty batch response".to_string())))
    }

    /// Analyze many texts in one round trip. A whole-call `Err` fails every
    /// item; an `Ok` carries one outcome per input.
    fn analyze_batch(
        &self,
        texts: &[String],
        options: &AnalysisOptions,
    ) -> Result<BatchOutcome, BackendError>;
}

/// Maps a backend's raw labels onto the four canonical labels.
#[derive(Debug, Clone)]
pub struct LabelVocabulary {
    backend: String,
    labels: HashMap<String, Sentiment>,
}

impl LabelVocabulary {
    pub fn new<I, S>(backend: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = (S, Sentiment)>,
        S: AsRef<str>,
    {
        Self {
            backend: backend.into(),
            labels: labels
                .into_iter()
                .map(|(raw, s)| (raw.as_ref().trim().to_lowercase(), s))
                .collect(),
        }
    }

    /// Vocabulary whose raw labels are the canonical names themselves.
    pub fn canonical(backend: impl Into<String>) -> Self {
        Self::new(backend, Sentiment::ALL.iter().map(|s| (s.to_string(), *s)))
    }

    /// Map a raw label. Labels outside the vocabulary are a contract
    /// violation and are never guessed.
    pub fn normalize(&self, raw: &str) -> Result<Sentiment, CoreError> {
        self.labels
            .get(&raw.trim().to_lowercase())
            .copied()
            .ok_or_else(|| CoreError::UnmappableSentiment {
                backend: self.backend.clone(),
                label: raw.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_vocabulary_closure() {
        let vocab = LabelVocabulary::canonical("comprehend");
        for raw in ["POSITIVE", "NEGATIVE", "NEUTRAL", "MIXED"] {
            let s = vocab.normalize(raw).unwrap();
            assert!(Sentiment::ALL.contains(&s));
            assert_eq!(s.to_string(), raw);
        }
    }

    #[test]
    fn test_custom_vocabulary_closure() {
        let vocab = LabelVocabulary::new(
            "command",
            [
                ("LABEL_0", Sentiment::Negative),
                ("LABEL_1", Sentiment::Neutral),
                ("LABEL_2", Sentiment::Positive),
            ],
        );
        assert_eq!(vocab.normalize("LABEL_0").unwrap(), Sentiment::Negative);
        assert_eq!(vocab.normalize("label_2").unwrap(), Sentiment::Positive);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_out_of_vocabulary_rejected() {
        let vocab = LabelVocabulary::canonical("comprehend");
        for raw in ["HAPPY", "", "BUSINESS_NEGATIVE", "POSITIVE!"] {
            match vocab.normalize(raw) {
                Err(CoreError::UnmappableSentiment { backend, label }) => {
                    assert_eq!(backend, "comprehend");
                    assert_eq!(label, raw);
                }
                other => panic!("expected UnmappableSentiment, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::RateLimited("slow down".into()).is_transient());
        assert!(BackendError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!BackendError::Unavailable("down".into()).is_transient());
    }
}
