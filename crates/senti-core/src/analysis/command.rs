use crate::config::CommandConfig;
use crate::models::{AnalysisOptions, BackendKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::backend::{
    AnalysisBackend, BackendError, BatchOutcome, LabelVocabulary, RawAnalysis, RawScore,
};
use super::process::{self, truncate_for_error};

/// Exit code a command uses to signal throttling (`EX_TEMPFAIL`).
const EXIT_TEMPFAIL: i32 = 75;

/// Any local program that speaks the batch JSON protocol on stdin/stdout.
///
/// Input: `{"texts": [...], "emotions": bool, "key_phrases": bool}`.
/// Output: `{"results": [{"index", "label", "score", "emotions", "key_phrases"}],
/// "errors": [{"index", "message", "retryable"}]}`.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    max_text_bytes: usize,
    max_batch_size: usize,
    reports_emotions: bool,
    timeout: Duration,
    vocabulary: LabelVocabulary,
}

impl CommandBackend {
    pub fn new(config: &CommandConfig, timeout: Duration) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            max_text_bytes: config.max_text_bytes.max(1),
            max_batch_size: config.max_batch_size.max(1),
            reports_emotions: config.reports_emotions,
            timeout,
            vocabulary: LabelVocabulary::new(
                BackendKind::Command.to_string(),
                config.labels.iter().map(|(raw, s)| (raw.as_str(), *s)),
            ),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.program.trim().is_empty()
    }
}

#[derive(Serialize)]
struct CommandRequest<'a> {
    texts: &'a [String],
    emotions: bool,
    key_phrases: bool,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    results: Vec<CommandItem>,
    #[serde(default)]
    errors: Vec<CommandItemError>,
}

#[derive(Debug, Deserialize)]
struct CommandItem {
    index: usize,
    label: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    emotions: Vec<LabelScore>,
    #[serde(default)]
    key_phrases: Vec<TextScore>,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct TextScore {
    text: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct CommandItemError {
    index: usize,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retryable: bool,
}

impl AnalysisBackend for CommandBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Command
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

    fn supports_emotions(&self) -> bool {
        self.reports_emotions
    }

    fn enforces_timeout(&self) -> bool {
        true
    }

    fn analyze_batch(
        &self,
        texts: &[String],
        options: &AnalysisOptions,
    ) -> Result<BatchOutcome, BackendError> {
        if !self.is_configured() {
            return Err(BackendError::Unavailable(
                "no command configured for the command backend".to_string(),
            ));
        }

        let request = CommandRequest {
            texts,
            emotions: options.detect_emotions && self.reports_emotions,
            key_phrases: options.extract_key_phrases,
        };
        let stdin = serde_json::to_vec(&request)
            .map_err(|e| BackendError::Unavailable(format!("failed to encode request: {e}")))?;

        debug!(program = %self.program, texts = texts.len(), "calling command backend");
        let output = process::run_with_timeout(&self.program, &self.args, Some(stdin), self.timeout)?;

        if !output.status.success() {
            let msg = truncate_for_error(output.stderr.trim()).to_string();
            return Err(match output.status.code() {
                Some(EXIT_TEMPFAIL) => BackendError::RateLimited(msg),
                code => BackendError::Unavailable(format!(
                    "{} exited with {}: {msg}",
                    self.program,
                    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
                )),
            });
        }

        parse_command_response(&output.stdout, texts.len())
    }
}

fn parse_command_response(stdout: &str, expected: usize) -> Result<BatchOutcome, BackendError> {
    let response: CommandResponse = serde_json::from_str(stdout.trim()).map_err(|e| {
        BackendError::Unavailable(format!(
            "failed to parse command output: {e}\nraw output: {}",
            truncate_for_error(stdout)
        ))
    })?;

    let mut outcome: BatchOutcome = (0..expected)
        .map(|_| Err(BackendError::Unavailable("no result returned for item".to_string())))
        .collect();

    for item in response.results {
        if let Some(slot) = outcome.get_mut(item.index) {
            let mut raw = RawAnalysis::new(item.label, item.score);
            raw.emotions = item
                .emotions
                .into_iter()
                .map(|e| RawScore {
                    label: e.label,
                    score: e.score,
                })
                .collect();
            raw.key_phrases = Some(
                item.key_phrases
                    .into_iter()
                    .map(|k| RawScore {
                        label: k.text,
                        score: k.score,
                    })
                    .collect(),
            );
            *slot = Ok(raw);
        }
    }
    for err in response.errors {
        if let Some(slot) = outcome.get_mut(err.index) {
            *slot = Err(if err.retryable {
                BackendError::RateLimited(err.message)
            } else {
                BackendError::Unavailable(err.message)
            });
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Sentiment;

    fn backend_with_script(script: &str) -> CommandBackend {
        let mut config = Config::default().backends.command;
        config.program = "sh".to_string();
        config.args = vec!["-c".to_string(), script.to_string()];
        CommandBackend::new(&config, Duration::from_secs(5))
    }

    #[test]
    fn test_parse_command_response() {
        let json = r#"{
            "results": [
                {"index": 0, "label": "pos", "score": 0.88,
                 "emotions": [{"label": "joy", "score": 0.7}],
                 "key_phrases": [{"text": "great team", "score": 0.9}]}
            ],
            "errors": [{"index": 1, "message": "busy", "retryable": true}]
        }"#;
        let outcome = parse_command_response(json, 3).unwrap();
        let first = outcome[0].as_ref().unwrap();
        assert_eq!(first.label, "pos");
        assert_eq!(first.emotions[0].label, "joy");
        assert_eq!(first.key_phrases.as_ref().unwrap()[0].label, "great team");
        assert!(matches!(outcome[1], Err(BackendError::RateLimited(_))));
        assert!(matches!(outcome[2], Err(BackendError::Unavailable(_))));
    }

    #[test]
    fn test_vocabulary_from_config() {
        let backend = backend_with_script("true");
        assert_eq!(
            backend.vocabulary().normalize("NEG").unwrap(),
            Sentiment::Negative
        );
        assert!(backend.vocabulary().normalize("angry").is_err());
    }

    #[test]
    fn test_unconfigured_is_unavailable() {
        let backend = CommandBackend::new(&Config::default().backends.command, Duration::from_secs(1));
        assert!(!backend.is_configured());
        let err = backend
            .analyze_batch(&["text".to_string()], &AnalysisOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_through_program() {
        let backend = backend_with_script(
            r#"cat >/dev/null; echo '{"results":[{"index":0,"label":"neutral","score":0.6},{"index":1,"label":"negative","score":0.9}]}'"#,
        );
        let texts = vec!["first".to_string(), "second".to_string()];
        let outcome = backend
            .analyze_batch(&texts, &AnalysisOptions::default())
            .unwrap();
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome[1].as_ref().unwrap().label, "negative");
    }

    #[cfg(unix)]
    #[test]
    fn test_tempfail_exit_is_rate_limited() {
        let backend = backend_with_script("cat >/dev/null; echo throttled >&2; exit 75");
        let err = backend
            .analyze_batch(&["x".to_string()], &AnalysisOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::RateLimited(_)));

        let backend = backend_with_script("cat >/dev/null; exit 1");
        let err = backend
            .analyze_batch(&["x".to_string()], &AnalysisOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
