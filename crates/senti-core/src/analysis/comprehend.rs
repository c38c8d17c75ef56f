use crate::config::ComprehendConfig;
use crate::models::{AnalysisOptions, BackendKind};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::backend::{
    AnalysisBackend, BackendError, BatchOutcome, LabelVocabulary, RawAnalysis, RawScore,
};
use super::process::{self, truncate_for_error};

/// Service-side limits for the batch APIs.
const COMPREHEND_MAX_BATCH: usize = 25;
const COMPREHEND_MAX_TEXT_BYTES: usize = 5000;

/// AWS Comprehend, driven through the `aws` CLI.
///
/// `batch-detect-sentiment` supplies the label and its score; when key
/// phrases are requested a second `batch-detect-key-phrases` call is made
/// for the same texts. Both calls share one deadline of `timeout`. The two
/// calls are billed separately, so a failed key-phrase call leaves the
/// sentiment results standing with no key phrases. Comprehend has no emotion
/// API.
pub struct ComprehendBackend {
    program: String,
    region: String,
    language_code: String,
    max_text_bytes: usize,
    max_batch_size: usize,
    timeout: Duration,
    vocabulary: LabelVocabulary,
}

impl ComprehendBackend {
    pub fn new(config: &ComprehendConfig, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            region: config.region.clone(),
            language_code: config.language_code.clone(),
            max_text_bytes: config.max_text_bytes.clamp(1, COMPREHEND_MAX_TEXT_BYTES),
            max_batch_size: config.max_batch_size.clamp(1, COMPREHEND_MAX_BATCH),
            timeout,
            vocabulary: LabelVocabulary::canonical(BackendKind::Comprehend.to_string()),
        }
    }

    /// Check if the aws CLI is available on PATH.
    pub fn is_available(&self) -> bool {
        process::is_available(&self.program, &["--version"])
    }

    fn run(
        &self,
        operation: &str,
        texts: &[String],
        timeout: Duration,
    ) -> Result<String, BackendError> {
        let payload = serde_json::json!({
            "TextList": texts,
            "LanguageCode": self.language_code,
        });
        let args = vec![
            "comprehend".to_string(),
            operation.to_string(),
            "--region".to_string(),
            self.region.clone(),
            "--output".to_string(),
            "json".to_string(),
            "--cli-input-json".to_string(),
            payload.to_string(),
        ];

        debug!(operation, texts = texts.len(), "calling comprehend");
        let output = process::run_with_timeout(&self.program, &args, None, timeout)?;
        if !output.status.success() {
            return Err(classify_cli_failure(&output.stderr, timeout));
        }
        Ok(output.stdout)
    }
}

impl AnalysisBackend for ComprehendBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Comprehend
    }

    fn max_text_bytes(&self) -> usize {
        self.max_text_bytes
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    fn enforces_timeout(&self) -> bool {
        true
    }

    fn analyze_batch(
        &self,
        texts: &[String],
        options: &AnalysisOptions,
    ) -> Result<BatchOutcome, BackendError> {
        let deadline = Instant::now() + self.timeout;
        let stdout = self.run("batch-detect-sentiment", texts, self.timeout)?;
        let mut outcome = parse_sentiment_response(&stdout, texts.len())?;

        if options.extract_key_phrases {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let phrases = if remaining.is_zero() {
                Err(BackendError::Timeout(self.timeout))
            } else {
                self.run("batch-detect-key-phrases", texts, remaining)
            };
            if let Err(e) = phrases.and_then(|stdout| merge_key_phrases_response(&mut outcome, &stdout)) {
                warn!(error = %e, "key phrase call failed, keeping sentiment results");
            }
        }
        Ok(outcome)
    }
}

// ── Response shapes ──

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SentimentResponse {
    #[serde(default)]
    result_list: Vec<SentimentItem>,
    #[serde(default)]
    error_list: Vec<ItemError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SentimentItem {
    index: usize,
    sentiment: String,
    #[serde(default)]
    sentiment_score: Option<SentimentScore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SentimentScore {
    #[serde(default)]
    positive: f64,
    #[serde(default)]
    negative: f64,
    #[serde(default)]
    neutral: f64,
    #[serde(default)]
    mixed: f64,
}

impl SentimentScore {
    fn for_label(&self, label: &str) -> f64 {
        match label.to_ascii_uppercase().as_str() {
            "POSITIVE" => self.positive,
            "NEGATIVE" => self.negative,
            "NEUTRAL" => self.neutral,
            "MIXED" => self.mixed,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemError {
    index: usize,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPhrasesResponse {
    #[serde(default)]
    result_list: Vec<KeyPhrasesItem>,
    #[serde(default)]
    error_list: Vec<ItemError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPhrasesItem {
    index: usize,
    #[serde(default)]
    key_phrases: Vec<KeyPhraseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyPhraseEntry {
    text: String,
    #[serde(default)]
    score: f64,
}

fn item_error(e: &ItemError) -> BackendError {
    let message = format!("{}: {}", e.error_code, e.error_message);
    if e.error_code.contains("Throttling") || e.error_code.contains("TooManyRequests") {
        BackendError::RateLimited(message)
    } else {
        BackendError::Unavailable(message)
    }
}

/// Map a failed CLI invocation to a backend fault.
fn classify_cli_failure(stderr: &str, timeout: Duration) -> BackendError {
    let msg = truncate_for_error(stderr.trim()).to_string();
    if stderr.contains("ThrottlingException")
        || stderr.contains("TooManyRequests")
        || stderr.contains("Rate exceeded")
    {
        BackendError::RateLimited(msg)
    } else if stderr.contains("timed out") || stderr.contains("Read timeout") {
        BackendError::Timeout(timeout)
    } else {
        BackendError::Unavailable(msg)
    }
}

fn parse_sentiment_response(stdout: &str, expected: usize) -> Result<BatchOutcome, BackendError> {
    let response: SentimentResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
        BackendError::Unavailable(format!(
            "failed to parse comprehend output: {e}\nraw output: {}",
            truncate_for_error(stdout)
        ))
    })?;

    let mut outcome: BatchOutcome = (0..expected)
        .map(|_| Err(BackendError::Unavailable("no result returned for item".to_string())))
        .collect();

    for item in response.result_list {
        if let Some(slot) = outcome.get_mut(item.index) {
            let confidence = item
                .sentiment_score
                .as_ref()
                .map(|s| s.for_label(&item.sentiment))
                .unwrap_or(0.0);
            *slot = Ok(RawAnalysis::new(item.sentiment, confidence));
        }
    }
    for err in &response.error_list {
        if let Some(slot) = outcome.get_mut(err.index) {
            *slot = Err(item_error(err));
        }
    }
    Ok(outcome)
}

fn merge_key_phrases_response(outcome: &mut BatchOutcome, stdout: &str) -> Result<(), BackendError> {
    let response: KeyPhrasesResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
        BackendError::Unavailable(format!(
            "failed to parse comprehend key phrase output: {e}\nraw output: {}",
            truncate_for_error(stdout)
        ))
    })?;

    for item in response.result_list {
        if let Some(Ok(raw)) = outcome.get_mut(item.index) {
            raw.key_phrases = Some(
                item.key_phrases
                    .into_iter()
                    .map(|kp| RawScore {
                        label: kp.text,
                        score: kp.score,
                    })
                    .collect(),
            );
        }
    }
    // A rejected item keeps its sentiment; it just has no key phrases.
    for err in &response.error_list {
        debug!(index = err.index, error = %item_error(err), "key phrases rejected for item");
    }
    Ok(())
}
