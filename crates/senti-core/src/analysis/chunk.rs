use crate::models::{Emotion, KeyPhrase, Sentiment};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

static PARAGRAPH_BREAK: OnceLock<Regex> = OnceLock::new();
static SENTENCE_END: OnceLock<Regex> = OnceLock::new();

fn paragraph_break() -> &'static Regex {
    PARAGRAPH_BREAK.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

fn sentence_end() -> &'static Regex {
    // Terminal punctuation, optional closing quotes/brackets, then whitespace.
    SENTENCE_END.get_or_init(|| Regex::new(r#"[.!?]+["')\]]*\s+"#).unwrap())
}

/// Split text into chunks of at most `max_bytes` UTF-8 bytes.
///
/// Boundaries are preferred in this order: paragraph, sentence, word. A
/// single word longer than `max_bytes` is the only thing ever cut, and then
/// only on a char boundary.
pub fn split_into_chunks(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let trimmed = text.trim();
    if trimmed.len() <= max_bytes {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in paragraph_break().split(trimmed) {
        let mut first_in_paragraph = true;
        for sentence in sentences(paragraph) {
            let sep = if current.is_empty() {
                ""
            } else if first_in_paragraph {
                "\n\n"
            } else {
                " "
            };
            first_in_paragraph = false;

            if current.len() + sep.len() + sentence.len() <= max_bytes {
                current.push_str(sep);
                current.push_str(sentence);
                continue;
            }

            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if sentence.len() <= max_bytes {
                current.push_str(sentence);
            } else {
                let mut pieces = split_words(sentence, max_bytes);
                // Keep the tail open so following sentences can join it.
                if let Some(last) = pieces.pop() {
                    chunks.extend(pieces);
                    current = last;
                }
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in sentence_end().find_iter(paragraph) {
        let s = paragraph[last..m.end()].trim();
        if !s.is_empty() {
            out.push(s);
        }
        last = m.end();
    }
    let rest = paragraph[last..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn split_words(sentence: &str, max_bytes: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let sep = if current.is_empty() { "" } else { " " };
        if current.len() + sep.len() + word.len() <= max_bytes {
            current.push_str(sep);
            current.push_str(word);
            continue;
        }
        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if word.len() <= max_bytes {
            current.push_str(word);
        } else {
            let mut rest = word;
            while rest.len() > max_bytes {
                let mut cut = max_bytes;
                while cut > 0 && !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                if cut == 0 {
                    // max_bytes is smaller than one char; emit that char whole.
                    cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
                }
                pieces.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// One chunk's normalized verdict, weighted by chunk length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkVerdict {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub weight: usize,
}

/// Majority vote on label, ties broken toward NEUTRAL; confidence is the
/// length-weighted average of chunk confidences.
pub fn aggregate_verdicts(verdicts: &[ChunkVerdict]) -> (Sentiment, f64) {
    if verdicts.is_empty() {
        return (Sentiment::Neutral, 0.0);
    }

    let mut votes: BTreeMap<Sentiment, usize> = BTreeMap::new();
    for v in verdicts {
        *votes.entry(v.sentiment).or_insert(0) += 1;
    }
    let top = votes.values().copied().max().unwrap_or(0);
    let leaders: Vec<Sentiment> = votes
        .iter()
        .filter(|(_, n)| **n == top)
        .map(|(s, _)| *s)
        .collect();
    let sentiment = match leaders.as_slice() {
        [only] => *only,
        _ => Sentiment::Neutral,
    };

    let total_weight: usize = verdicts.iter().map(|v| v.weight).sum();
    let confidence = if total_weight == 0 {
        verdicts.iter().map(|v| v.confidence).sum::<f64>() / verdicts.len() as f64
    } else {
        verdicts
            .iter()
            .map(|v| v.confidence * v.weight as f64)
            .sum::<f64>()
            / total_weight as f64
    };
    (sentiment, confidence.clamp(0.0, 1.0))
}

/// Combine per-chunk emotions: length-weighted average per label (a chunk
/// without a label contributes zero), highest first.
pub fn merge_emotions(per_chunk: &[(Vec<Emotion>, usize)]) -> Vec<Emotion> {
    let total: usize = per_chunk.iter().map(|(_, w)| *w).sum::<usize>().max(1);
    let mut sums: HashMap<String, f64> = HashMap::new();
    for (emotions, weight) in per_chunk {
        for e in emotions {
            *sums.entry(e.label.clone()).or_insert(0.0) += e.confidence * *weight as f64;
        }
    }
    let mut merged: Vec<Emotion> = sums
        .into_iter()
        .map(|(label, sum)| Emotion {
            label,
            confidence: sum / total as f64,
        })
        .collect();
    sort_emotions(&mut merged);
    merged
}

/// Highest confidence first; equal confidences ordered by label so the
/// order is deterministic.
pub fn sort_emotions(emotions: &mut [Emotion]) {
    emotions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.label.cmp(&b.label))
    });
}

/// Union of key phrases, case-insensitive, keeping the highest confidence
/// and first-seen spelling and order.
pub fn merge_key_phrases(per_chunk: &[Vec<KeyPhrase>]) -> Vec<KeyPhrase> {
    let mut merged: Vec<KeyPhrase> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for phrases in per_chunk {
        for p in phrases {
            let norm = p.text.to_lowercase();
            match index.get(&norm) {
                Some(&i) => {
                    if p.confidence > merged[i].confidence {
                        merged[i].confidence = p.confidence;
                    }
                }
                None => {
                    index.insert(norm, merged.len());
                    merged.push(p.clone());
                }
            }
        }
    }
    merged
}
