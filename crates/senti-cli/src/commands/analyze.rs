use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use senti_core::errors::CoreError;
use senti_core::models::{
    AnalysisOptions, AnalysisRequest, AnalysisResult, BackendKind, Sentiment, SourceBackend,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{open_engine, preview};

pub struct AnalyzeArgs {
    pub text: Option<String>,
    pub file: Option<PathBuf>,
    pub emotions: bool,
    pub key_phrases: bool,
    pub backends: Option<String>,
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(default)]
    id: Option<String>,
    text: String,
}

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let options = AnalysisOptions {
        detect_emotions: args.emotions,
        extract_key_phrases: args.key_phrases,
        backends: args.backends.as_deref().map(parse_backends).transpose()?,
    };

    let records: Vec<(String, AnalysisRequest)> = match (&args.text, &args.file) {
        (Some(text), _) => vec![(
            "text".to_string(),
            AnalysisRequest::with_options(text.clone(), options),
        )],
        (None, Some(path)) => read_records(path)?
            .into_iter()
            .map(|(id, text)| (id, AnalysisRequest::with_options(text, options.clone())))
            .collect(),
        (None, None) => anyhow::bail!("nothing to analyze: pass TEXT or --file <path>"),
    };

    let (_paths, engine) = open_engine()?;
    let from_file = args.file.is_some();
    tracing::debug!(records = records.len(), chain = ?engine.router().chain(), "analyzing");

    let results = if from_file {
        engine.analyze_records(&records)?
    } else {
        let requests: Vec<AnalysisRequest> = records.iter().map(|(_, r)| r.clone()).collect();
        engine.analyze_batch(&requests)
    };
    engine.flush().context("flushing cache and budget")?;

    let mut failures = 0usize;
    for ((id, request), result) in records.iter().zip(&results) {
        if result.is_err() {
            failures += 1;
        }
        if args.json {
            print_json(id, result)?;
        } else {
            print_human(id, &request.text, result, from_file);
        }
    }

    if !args.json {
        let report = engine.daily_report();
        let stats = engine.cache_stats();
        println!();
        println!(
            "  {} analyzed, {} failed, {} cache hits today, {} spent of {}",
            (results.len() - failures).to_string().cyan(),
            if failures > 0 {
                failures.to_string().red()
            } else {
                failures.to_string().green()
            },
            report.cache_hit_count.to_string().cyan(),
            format!("${:.4}", report.spent_today).yellow(),
            format!("${:.2}", report.daily_limit),
        );
        if stats.evictions > 0 {
            println!(
                "  {} {} cache evictions this run",
                "Note".dimmed(),
                stats.evictions
            );
        }
    }

    if failures > 0 && !from_file {
        anyhow::bail!("analysis failed");
    }
    Ok(())
}

fn parse_backends(value: &str) -> Result<Vec<BackendKind>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| BackendKind::parse(name).with_context(|| format!("unknown backend {name:?}")))
        .collect()
}

/// Read JSONL records. Blank lines are skipped; a record without an id gets
/// `line-N`.
fn read_records(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_records(&contents)
}

fn parse_records(contents: &str) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(line)
            .with_context(|| format!("line {}: expected {{\"id\", \"text\"}}", n + 1))?;
        let id = record.id.unwrap_or_else(|| format!("line-{}", n + 1));
        records.push((id, record.text));
    }
    Ok(records)
}

fn print_json(id: &str, result: &Result<AnalysisResult, CoreError>) -> Result<()> {
    let line = match result {
        Ok(r) => serde_json::json!({ "id": id, "result": r }),
        Err(e) => serde_json::json!({ "id": id, "error": e.to_string() }),
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn print_human(id: &str, text: &str, result: &Result<AnalysisResult, CoreError>, show_id: bool) {
    let label = if show_id {
        format!("{} ", id.dimmed())
    } else {
        String::new()
    };
    match result {
        Ok(r) => {
            println!(
                "  {}{} {:.2}  {}  {}  {}",
                label,
                colored_sentiment(r.sentiment),
                r.confidence,
                colored_source(r.source_backend),
                format!("${:.4}", r.cost_estimate).dimmed(),
                preview(text, 60)
            );
            if let Some(emotions) = &r.emotions {
                let shown: Vec<String> = emotions
                    .iter()
                    .take(3)
                    .map(|e| format!("{} {:.2}", e.label, e.confidence))
                    .collect();
                if !shown.is_empty() {
                    println!("      {} {}", "emotions:".white(), shown.join(", "));
                }
            }
            if let Some(phrases) = &r.key_phrases {
                let shown: Vec<&str> = phrases.iter().take(5).map(|k| k.text.as_str()).collect();
                if !shown.is_empty() {
                    println!("      {} {}", "key phrases:".white(), shown.join(", "));
                }
            }
        }
        Err(e) => {
            println!("  {}{} {}", label, "error".red(), e);
        }
    }
}

fn colored_sentiment(sentiment: Sentiment) -> ColoredString {
    let text = format!("{:<8}", sentiment.to_string());
    match sentiment {
        Sentiment::Positive => text.green(),
        Sentiment::Negative => text.red(),
        Sentiment::Neutral => text.white(),
        Sentiment::Mixed => text.yellow(),
    }
}

fn colored_source(source: SourceBackend) -> ColoredString {
    let text = format!("{:<14}", source.to_string());
    match source {
        SourceBackend::Primary => text.cyan(),
        SourceBackend::Secondary => text.blue(),
        SourceBackend::LocalFallback => text.dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backends() {
        assert_eq!(
            parse_backends("comprehend, command").unwrap(),
            vec![BackendKind::Comprehend, BackendKind::Command]
        );
        assert!(parse_backends("").unwrap().is_empty());
        assert!(parse_backends("openai").is_err());
    }

    #[test]
    fn test_parse_records() {
        let input = r#"{"id": "t3_a", "text": "love it"}

{"text": "no id here"}
"#;
        let records = parse_records(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], ("t3_a".to_string(), "love it".to_string()));
        assert_eq!(records[1].0, "line-3");
    }

    #[test]
    fn test_parse_records_reports_line() {
        let err = parse_records("{\"id\": \"a\"}").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }
}
