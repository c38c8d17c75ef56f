use crate::config::LexiconConfig;
use crate::errors::CoreError;
use crate::models::{
    AnalysisOptions, AnalysisResult, Emotion, KeyPhrase, Sentiment, SourceBackend,
};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::chunk::sort_emotions;

static TOKEN: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN.get_or_init(|| Regex::new(r"[a-z0-9']+").unwrap())
}

/// Confidence attached to key phrases the lexicon reports.
const LEXICON_PHRASE_CONFIDENCE: f64 = 0.5;
/// Confidence for texts with no lexicon signal at all.
const NO_SIGNAL_CONFIDENCE: f64 = 0.6;
const MIXED_CONFIDENCE: f64 = 0.55;

const NEGATORS: &[&str] = &[
    "not", "no", "never", "don't", "dont", "doesn't", "didn't", "isn't", "wasn't", "aren't",
    "won't", "can't", "cannot", "hardly", "without",
];

const POSITIVE_TERMS: &[&str] = &[
    // generic
    "good", "great", "love", "like", "happy", "glad", "awesome", "excellent", "nice", "best",
    "better", "thanks", "thank you", "helpful", "fair", "easy", "enjoy", "amazing", "appreciate",
    // genuine satisfaction
    "love working here", "great company", "fair treatment", "good benefits", "competitive pay",
    "work-life balance", "supportive management", "career growth", "opportunities",
    // policy approval
    "good change", "finally", "about time", "step in right direction", "improvement",
    "better than before", "fair decision", "raise",
    // retention positive
    "staying", "committed", "long-term", "career here", "recommend working here",
    "proud to work here",
];

const NEGATIVE_TERMS: &[&str] = &[
    // generic
    "bad", "terrible", "awful", "hate", "worst", "angry", "sad", "horrible", "sucks", "annoying",
    "worse", "problem", "disappointed", "stress", "stressful", "unfair",
    // retention risk
    "quit", "quitting", "leaving", "fed up", "looking for another job", "job hunting",
    "resignation", "two weeks notice",
    // compensation dissatisfaction
    "underpaid", "joke", "insulting", "pathetic", "not enough", "barely surviving",
    "can't afford", "poverty wages", "slave wages", "rip off", "shafted", "screwed over",
    "getting screwed",
    // policy backlash
    "stupid policy", "ridiculous", "makes no sense", "terrible decision",
    "management doesn't care", "out of touch",
    // operational concerns
    "unsafe", "dangerous", "injury", "hurt", "pain", "burnout", "exhausted", "overworked",
    "understaffed", "impossible quotas", "unrealistic expectations",
    // morale issues
    "hate this place", "toxic", "depressing", "soul crushing", "no respect",
    "treated like garbage", "dehumanizing", "don't care about us", "just a number",
];

const BUILTIN_EMOTIONS: &[(&str, &[&str])] = &[
    (
        "anger",
        &["angry", "furious", "pissed", "rage", "hate", "outraged", "insulting", "fed up", "sick of"],
    ),
    (
        "joy",
        &["happy", "glad", "love", "excited", "awesome", "thrilled", "finally", "amazing"],
    ),
    (
        "sadness",
        &["sad", "depressing", "miserable", "crying", "soul crushing", "hopeless", "lonely"],
    ),
    (
        "fear",
        &["worried", "scared", "afraid", "anxious", "nervous", "unsafe", "dangerous", "layoffs"],
    ),
    (
        "trust",
        &["fair", "supportive", "reliable", "committed", "respect", "proud"],
    ),
    (
        "disgust",
        &["gross", "disgusting", "dehumanizing", "treated like garbage"],
    ),
];

/// A lexicon entry, pre-tokenized.
#[derive(Debug, Clone)]
struct Term {
    text: String,
    tokens: Vec<String>,
}

impl Term {
    fn new(raw: &str) -> Option<Self> {
        let tokens = tokenize(raw);
        if tokens.is_empty() {
            return None;
        }
        Some(Self {
            text: tokens.join(" "),
            tokens,
        })
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    token_re()
        .find_iter(&lowered)
        .map(|m| m.as_str().trim_matches('\'').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Offline, deterministic keyword scoring. The guaranteed last stage of the
/// fallback chain: it never calls out and always produces a result for
/// non-empty input.
#[derive(Debug, Clone)]
pub struct LexiconAnalyzer {
    positive: Vec<Term>,
    negative: Vec<Term>,
    emotions: Vec<(String, Vec<Term>)>,
}

/// Term hits, in order of first appearance.
struct Hits {
    positive: f64,
    negative: f64,
    matched: Vec<String>,
}

impl LexiconAnalyzer {
    pub fn new(config: &LexiconConfig) -> Self {
        let positive = POSITIVE_TERMS
            .iter()
            .copied()
            .chain(config.extra_positive.iter().map(String::as_str))
            .filter_map(Term::new)
            .collect();
        let negative = NEGATIVE_TERMS
            .iter()
            .copied()
            .chain(config.extra_negative.iter().map(String::as_str))
            .filter_map(Term::new)
            .collect();

        let emotions = if config.emotions.is_empty() {
            BUILTIN_EMOTIONS
                .iter()
                .map(|(label, terms)| {
                    (label.to_string(), terms.iter().copied().filter_map(Term::new).collect())
                })
                .collect()
        } else {
            config
                .emotions
                .iter()
                .map(|(label, terms)| {
                    (
                        label.clone(),
                        terms.iter().map(String::as_str).filter_map(Term::new).collect(),
                    )
                })
                .collect()
        };

        Self {
            positive,
            negative,
            emotions,
        }
    }

    /// Analyze one text. Only empty input fails.
    pub fn analyze(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, CoreError> {
        let tokens = tokenize(text);
        if tokens.is_empty() && text.trim().is_empty() {
            return Err(CoreError::EmptyInput);
        }

        let hits = self.score(&tokens);
        let (sentiment, confidence) = verdict(hits.positive, hits.negative);

        let emotions = options
            .detect_emotions
            .then(|| self.emotions_for_tokens(&tokens));
        let key_phrases = options
            .extract_key_phrases
            .then(|| phrases_from(&hits.matched));

        Ok(AnalysisResult {
            sentiment,
            confidence,
            emotions,
            key_phrases,
            source_backend: SourceBackend::LocalFallback,
            cost_estimate: 0.0,
            processing_time_ms: 0,
            timestamp: Utc::now(),
        })
    }

    /// Emotion scores alone, for backends that do not report emotions.
    pub fn detect_emotions(&self, text: &str) -> Vec<Emotion> {
        self.emotions_for_tokens(&tokenize(text))
    }

    /// Matched lexicon phrases alone, for backends that delivered none.
    pub fn key_phrases(&self, text: &str) -> Vec<KeyPhrase> {
        phrases_from(&self.score(&tokenize(text)).matched)
    }

    fn emotions_for_tokens(&self, tokens: &[String]) -> Vec<Emotion> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for (label, terms) in &self.emotions {
            let n: usize = terms.iter().map(|t| occurrences(tokens, t).len()).sum();
            if n > 0 {
                counts.insert(label.as_str(), n);
            }
        }
        let total: usize = counts.values().sum();
        let mut emotions: Vec<Emotion> = counts
            .into_iter()
            .map(|(label, n)| Emotion {
                label: label.to_string(),
                confidence: n as f64 / total as f64,
            })
            .collect();
        sort_emotions(&mut emotions);
        emotions
    }

    fn score(&self, tokens: &[String]) -> Hits {
        let mut positive = 0.0;
        let mut negative = 0.0;
        let mut matched: Vec<(usize, String)> = Vec::new();

        for (terms, is_positive) in [(&self.positive, true), (&self.negative, false)] {
            for term in terms {
                for start in occurrences(tokens, term) {
                    // Multi-word phrases are stronger evidence than single words.
                    let weight = if term.tokens.len() > 1 { 2.0 } else { 1.0 };
                    let flipped = is_negated(tokens, start);
                    if is_positive != flipped {
                        positive += weight;
                    } else {
                        negative += weight;
                    }
                    if !matched.iter().any(|(_, t)| *t == term.text) {
                        matched.push((start, term.text.clone()));
                    }
                }
            }
        }

        matched.sort_by_key(|(start, _)| *start);
        Hits {
            positive,
            negative,
            matched: matched.into_iter().map(|(_, t)| t).collect(),
        }
    }
}

/// Start indexes of every occurrence of `term` in `tokens`.
fn occurrences(tokens: &[String], term: &Term) -> Vec<usize> {
    let n = term.tokens.len();
    if n == 0 || tokens.len() < n {
        return Vec::new();
    }
    (0..=tokens.len() - n)
        .filter(|&i| tokens[i..i + n] == term.tokens[..])
        .collect()
}

/// A negator within the two preceding tokens flips polarity.
fn is_negated(tokens: &[String], start: usize) -> bool {
    tokens[start.saturating_sub(2)..start]
        .iter()
        .any(|t| NEGATORS.contains(&t.as_str()))
}

fn verdict(positive: f64, negative: f64) -> (Sentiment, f64) {
    let total = positive + negative;
    if total == 0.0 {
        return (Sentiment::Neutral, NO_SIGNAL_CONFIDENCE);
    }
    if positive > 0.0 && negative > 0.0 && positive.min(negative) / positive.max(negative) >= 0.5
    {
        return (Sentiment::Mixed, MIXED_CONFIDENCE);
    }
    let sentiment = if positive > negative {
        Sentiment::Positive
    } else {
        Sentiment::Negative
    };
    let margin = (positive - negative).abs() / total;
    let strength = (total / 3.0).min(1.0);
    (sentiment, (0.5 + 0.4 * margin * strength).clamp(0.0, 1.0))
}

fn phrases_from(matched: &[String]) -> Vec<KeyPhrase> {
    matched
        .iter()
        .map(|text| KeyPhrase {
            text: text.clone(),
            confidence: LEXICON_PHRASE_CONFIDENCE,
        })
        .collect()
}
