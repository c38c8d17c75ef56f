use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Canonical sentiment labels ──

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "POSITIVE"),
            Self::Negative => write!(f, "NEGATIVE"),
            Self::Neutral => write!(f, "NEUTRAL"),
            Self::Mixed => write!(f, "MIXED"),
        }
    }
}

impl Sentiment {
    pub const ALL: [Sentiment; 4] = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::Mixed,
    ];

    /// Parse one of the four canonical label spellings (case-insensitive).
    pub fn from_canonical(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" => Some(Self::Positive),
            "NEGATIVE" => Some(Self::Negative),
            "NEUTRAL" => Some(Self::Neutral),
            "MIXED" => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// Which stage of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SourceBackend {
    Primary,
    Secondary,
    LocalFallback,
}

impl std::fmt::Display for SourceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
            Self::LocalFallback => write!(f, "local-fallback"),
        }
    }
}

// ── Backend selection ──

/// Concrete remote backend implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Comprehend,
    Command,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Comprehend => write!(f, "comprehend"),
            Self::Command => write!(f, "command"),
        }
    }
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comprehend" => Some(Self::Comprehend),
            "command" => Some(Self::Command),
            _ => None,
        }
    }
}

// ── Requests ──

/// Per-request analysis options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisOptions {
    #[serde(default)]
    pub detect_emotions: bool,
    #[serde(default)]
    pub extract_key_phrases: bool,
    /// Restricts the remote chain to these backends (in this order).
    /// `None` uses the configured chain; an empty list means local-only.
    #[serde(default)]
    pub backends: Option<Vec<BackendKind>>,
}

impl AnalysisOptions {
    /// Short fingerprint of the options that change the result shape.
    /// Backend selection is excluded: it changes fidelity, not shape.
    pub fn fingerprint(&self) -> String {
        let mut fp = String::from("s");
        if self.detect_emotions {
            fp.push('e');
        }
        if self.extract_key_phrases {
            fp.push('k');
        }
        fp
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
    #[serde(default)]
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: AnalysisOptions::default(),
        }
    }

    pub fn with_options(text: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            text: text.into(),
            options,
        }
    }
}

// ── Canonical result ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Emotion {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyPhrase {
    pub text: String,
    pub confidence: f64,
}

/// The canonical output shape every backend is normalized into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub sentiment: Sentiment,
    pub confidence: f64,
    /// Highest confidence first.
    #[serde(default)]
    pub emotions: Option<Vec<Emotion>>,
    #[serde(default)]
    pub key_phrases: Option<Vec<KeyPhrase>>,
    pub source_backend: SourceBackend,
    pub cost_estimate: f64,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    /// Compare two results ignoring the observational `processing_time_ms`.
    pub fn same_analysis(&self, other: &AnalysisResult) -> bool {
        self.sentiment == other.sentiment
            && self.confidence == other.confidence
            && self.emotions == other.emotions
            && self.key_phrases == other.key_phrases
            && self.source_backend == other.source_backend
            && self.cost_estimate == other.cost_estimate
            && self.timestamp == other.timestamp
    }
}

// ── Observability ──

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub size: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyReport {
    pub day: chrono::NaiveDate,
    pub spent_today: f64,
    pub daily_limit: f64,
    pub request_count: u64,
    pub cache_hit_count: u64,
    pub remaining: f64,
}
