pub mod backend;
pub mod chunk;
pub mod command;
pub mod comprehend;
pub mod lexicon;
pub mod pool;
pub mod process;

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::config::BackendsConfig;
use crate::cost::CostMonitor;
use crate::errors::CoreError;
use crate::key::{self, CacheKey};
use crate::models::{
    AnalysisOptions, AnalysisRequest, AnalysisResult, BackendKind, Emotion, KeyPhrase, Sentiment,
    SourceBackend,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use backend::{AnalysisBackend, BackendError, BatchOutcome, RawAnalysis};
use chunk::{ChunkVerdict, aggregate_verdicts, merge_emotions, merge_key_phrases, sort_emotions};
use lexicon::LexiconAnalyzer;

/// Remote stages in the fallback chain: primary, then secondary.
const REMOTE_STAGES: [SourceBackend; 2] = [SourceBackend::Primary, SourceBackend::Secondary];

/// Backoff doubles per retry up to this multiple of the base delay.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub request_timeout: Duration,
    /// Retries after the first attempt, for transient faults only.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub batch_size: usize,
    pub max_in_flight: usize,
}

impl RouterSettings {
    pub fn from_config(config: &BackendsConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            batch_size: config.batch_size.max(1),
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry).min(MAX_BACKOFF_FACTOR);
        self.retry_backoff.saturating_mul(factor)
    }
}

/// Routes texts through cache, budget, the remote fallback chain and the
/// local analyzer, and writes the canonical result back to the cache.
///
/// Every request runs the same per-item sequence: cache check, chunking,
/// budget check, primary call, secondary call, local fallback, label
/// normalization, cache write. Batches group cache misses into backend
/// batch calls without changing that sequence for any single item.
///
/// The router holds no lock of its own. Cache and budget locks are only
/// taken between backend calls, never across one.
pub struct Router {
    cache: Arc<CacheStore>,
    cost: Arc<CostMonitor>,
    /// Configured remote chain in priority order.
    backends: Vec<Arc<dyn AnalysisBackend>>,
    lexicon: LexiconAnalyzer,
    settings: RouterSettings,
    clock: Arc<dyn Clock>,
}

/// One distinct cache miss and the requests waiting on it.
struct Job {
    key: CacheKey,
    options: AnalysisOptions,
    chain: Vec<Arc<dyn AnalysisBackend>>,
    chunks: Vec<String>,
    requests: Vec<usize>,
}

/// A chunk of a job: (job index, chunk index).
type Unit = (usize, usize);

struct Batch {
    backend: Arc<dyn AnalysisBackend>,
    options: AnalysisOptions,
    units: Vec<Unit>,
}

/// Normalized analysis of one chunk.
struct ChunkOutcome {
    sentiment: Sentiment,
    confidence: f64,
    emotions: Option<Vec<Emotion>>,
    key_phrases: Option<Vec<KeyPhrase>>,
    source: SourceBackend,
    cost: f64,
    weight: usize,
}

impl Router {
    pub fn new(
        cache: Arc<CacheStore>,
        cost: Arc<CostMonitor>,
        backends: Vec<Arc<dyn AnalysisBackend>>,
        lexicon: LexiconAnalyzer,
        settings: RouterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if backends.len() > REMOTE_STAGES.len() {
            warn!(
                configured = backends.len(),
                "only the first two remote backends take part in the fallback chain"
            );
        }
        Self {
            cache,
            cost,
            backends,
            lexicon,
            settings,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn cost(&self) -> &Arc<CostMonitor> {
        &self.cost
    }

    /// Kinds of the configured remote chain, in priority order.
    pub fn chain(&self) -> Vec<BackendKind> {
        self.backends
            .iter()
            .take(REMOTE_STAGES.len())
            .map(|b| b.kind())
            .collect()
    }

    /// Analyze one text.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CoreError> {
        self.analyze_batch(std::slice::from_ref(request))
            .pop()
            .unwrap_or_else(|| Err(CoreError::AnalysisFailed("no result produced".to_string())))
    }

    /// Analyze many texts. The output has one entry per request, in order.
    /// A failure on one item never fails another.
    pub fn analyze_batch(
        &self,
        requests: &[AnalysisRequest],
    ) -> Vec<Result<AnalysisResult, CoreError>> {
        let started = Instant::now();
        let mut results: Vec<Option<Result<AnalysisResult, CoreError>>> =
            (0..requests.len()).map(|_| None).collect();

        // Cache check, with identical misses folded into one job.
        let mut jobs: Vec<Job> = Vec::new();
        let mut job_index: HashMap<(CacheKey, Option<Vec<BackendKind>>), usize> = HashMap::new();
        let mut cache_hits = 0usize;

        for (i, request) in requests.iter().enumerate() {
            let key = match key::cache_key(&request.text, &request.options) {
                Ok(key) => key,
                Err(e) => {
                    results[i] = Some(Err(e));
                    continue;
                }
            };

            if let Some(cached) = self.cache.get(&key) {
                self.cost.record_cache_hit();
                cache_hits += 1;
                debug!(key = %key, "cache hit");
                results[i] = Some(Ok(cached));
                continue;
            }

            // Keys are case-folded, so the first spelling of a duplicate is
            // the one sent to the backend.
            let dedupe = (key.clone(), request.options.backends.clone());
            if let Some(&j) = job_index.get(&dedupe) {
                jobs[j].requests.push(i);
                continue;
            }

            let chain = self.resolve_chain(&request.options);
            let chunks = match chain.iter().map(|b| b.max_text_bytes()).min() {
                Some(max_bytes) => chunk::split_into_chunks(&request.text, max_bytes),
                None => vec![request.text.trim().to_string()],
            };
            if chunks.len() > 1 {
                debug!(key = %key, chunks = chunks.len(), "text chunked");
            }
            job_index.insert(dedupe, jobs.len());
            jobs.push(Job {
                key,
                options: request.options.clone(),
                chain,
                chunks,
                requests: vec![i],
            });
        }

        if !jobs.is_empty() {
            let outcomes = self.run_chain(&jobs);
            for (job, chunk_outcomes) in jobs.iter().zip(outcomes) {
                let result = self.assemble(chunk_outcomes, started);
                if let Ok(r) = &result {
                    self.cache.put(job.key.clone(), r.clone(), None);
                }
                for &i in &job.requests {
                    results[i] = Some(result.clone());
                }
            }
        }

        info!(
            requests = requests.len(),
            cache_hits,
            analyzed = jobs.len(),
            elapsed_ms = elapsed_ms(started),
            "analysis complete"
        );

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(CoreError::AnalysisFailed("request was not routed".to_string())))
            })
            .collect()
    }

    /// The remote chain for a request: the configured chain, or the
    /// request's own selection restricted to configured backends.
    fn resolve_chain(&self, options: &AnalysisOptions) -> Vec<Arc<dyn AnalysisBackend>> {
        let chain: Vec<Arc<dyn AnalysisBackend>> = match &options.backends {
            None => self.backends.clone(),
            Some(kinds) => kinds
                .iter()
                .filter_map(|kind| self.backends.iter().find(|b| b.kind() == *kind).cloned())
                .collect(),
        };
        chain.into_iter().take(REMOTE_STAGES.len()).collect()
    }

    /// Drive every chunk of every job through the fallback chain. Returns
    /// per-job, per-chunk outcomes.
    fn run_chain(&self, jobs: &[Job]) -> Vec<Vec<Result<ChunkOutcome, CoreError>>> {
        let mut outcomes: Vec<Vec<Option<Result<ChunkOutcome, CoreError>>>> = jobs
            .iter()
            .map(|job| job.chunks.iter().map(|_| None).collect())
            .collect();

        let mut pending: Vec<Unit> = jobs
            .iter()
            .enumerate()
            .flat_map(|(j, job)| (0..job.chunks.len()).map(move |c| (j, c)))
            .collect();
        let mut local: Vec<Unit> = Vec::new();

        for (stage, source) in REMOTE_STAGES.iter().enumerate() {
            if pending.is_empty() {
                break;
            }
            let batches = self.plan_stage(jobs, stage, std::mem::take(&mut pending), &mut local);
            if batches.is_empty() {
                continue;
            }

            let results = pool::run_bounded(batches, self.settings.max_in_flight, |batch| {
                let texts: Vec<String> = batch
                    .units
                    .iter()
                    .map(|&(j, c)| jobs[j].chunks[c].clone())
                    .collect();
                let outcome = self.call_with_retries(&batch.backend, texts, &batch.options);
                (batch, outcome)
            });

            for (batch, outcome) in results {
                let kind = batch.backend.kind();
                for (&(j, c), item) in batch.units.iter().zip(outcome) {
                    let text = &jobs[j].chunks[c];
                    match item {
                        Ok(raw) => {
                            // Bill what the backend delivered: key phrases
                            // are a separate charge and may have failed.
                            let phrases_billed = batch.options.extract_key_phrases
                                && raw.key_phrases.is_some();
                            let cost = self.cost.estimate_request_cost(text, kind, phrases_billed);
                            self.cost.record(cost);
                            outcomes[j][c] = Some(self.normalize(
                                batch.backend.as_ref(),
                                raw,
                                text,
                                &jobs[j].options,
                                *source,
                                cost,
                            ));
                        }
                        Err(e) => {
                            warn!(backend = %kind, stage = %source, error = %e, "backend failed item, falling through");
                            pending.push((j, c));
                        }
                    }
                }
            }
        }

        local.append(&mut pending);
        for (j, c) in local {
            outcomes[j][c] = Some(self.analyze_locally(&jobs[j].chunks[c], &jobs[j].options));
        }

        outcomes
            .into_iter()
            .map(|chunks| {
                chunks
                    .into_iter()
                    .map(|o| {
                        o.unwrap_or_else(|| {
                            Err(CoreError::AnalysisFailed("chunk was not analyzed".to_string()))
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Budget-check the units reaching `stage` and group the affordable ones
    /// into backend batches. Units with no backend at this stage, or that
    /// cannot be afforded, go to the local analyzer.
    fn plan_stage(
        &self,
        jobs: &[Job],
        stage: usize,
        units: Vec<Unit>,
        local: &mut Vec<Unit>,
    ) -> Vec<Batch> {
        let mut groups: Vec<Batch> = Vec::new();
        // Spend already committed to earlier units of this stage.
        let mut reserved = 0.0;

        for (j, c) in units {
            let job = &jobs[j];
            let Some(backend) = job.chain.get(stage) else {
                local.push((j, c));
                continue;
            };
            let estimate = self.cost.estimate_request_cost(
                &job.chunks[c],
                backend.kind(),
                job.options.extract_key_phrases,
            );
            if !self.cost.can_afford(reserved + estimate) {
                debug!(backend = %backend.kind(), estimate, "budget exhausted, using local analyzer");
                local.push((j, c));
                continue;
            }
            reserved += estimate;

            let extras = (job.options.detect_emotions, job.options.extract_key_phrases);
            let existing = groups.iter_mut().find(|g| {
                g.backend.kind() == backend.kind()
                    && (g.options.detect_emotions, g.options.extract_key_phrases) == extras
            });
            match existing {
                Some(group) => group.units.push((j, c)),
                None => groups.push(Batch {
                    backend: Arc::clone(backend),
                    options: AnalysisOptions {
                        detect_emotions: extras.0,
                        extract_key_phrases: extras.1,
                        backends: None,
                    },
                    units: vec![(j, c)],
                }),
            }
        }

        let mut batches = Vec::new();
        for group in groups {
            let size = self
                .settings
                .batch_size
                .min(group.backend.max_batch_size())
                .max(1);
            for units in group.units.chunks(size) {
                batches.push(Batch {
                    backend: Arc::clone(&group.backend),
                    options: group.options.clone(),
                    units: units.to_vec(),
                });
            }
        }
        batches
    }

    /// One batch call with timeout, retrying transient faults with
    /// exponential backoff. Only items that failed transiently are resent.
    /// Always returns one outcome per text.
    fn call_with_retries(
        &self,
        backend: &Arc<dyn AnalysisBackend>,
        texts: Vec<String>,
        options: &AnalysisOptions,
    ) -> BatchOutcome {
        let mut outcome: BatchOutcome = texts
            .iter()
            .map(|_| Err(BackendError::Unavailable("not attempted".to_string())))
            .collect();
        let mut outstanding: Vec<usize> = (0..texts.len()).collect();

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.settings.backoff(attempt - 1);
                warn!(
                    backend = %backend.kind(),
                    attempt,
                    items = outstanding.len(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying transient backend failure"
                );
                std::thread::sleep(delay);
            }

            let sent: Vec<String> = outstanding.iter().map(|&i| texts[i].clone()).collect();
            let items = match self.call_once(backend, sent, options) {
                Ok(items) if items.len() == outstanding.len() => items,
                Ok(items) => {
                    let err = BackendError::Unavailable(format!(
                        "backend returned {} results for {} texts",
                        items.len(),
                        outstanding.len()
                    ));
                    outstanding.iter().map(|_| Err(err.clone())).collect()
                }
                Err(e) => outstanding.iter().map(|_| Err(e.clone())).collect(),
            };

            let mut retry = Vec::new();
            for (&i, item) in outstanding.iter().zip(items) {
                if matches!(&item, Err(e) if e.is_transient()) {
                    retry.push(i);
                }
                outcome[i] = item;
            }
            if retry.is_empty() {
                break;
            }
            outstanding = retry;
        }
        outcome
    }

    /// A single backend call bounded by the request timeout. Backends that
    /// enforce the timeout themselves are called directly; any other call
    /// runs on its own thread and a late answer is dropped.
    fn call_once(
        &self,
        backend: &Arc<dyn AnalysisBackend>,
        texts: Vec<String>,
        options: &AnalysisOptions,
    ) -> Result<BatchOutcome, BackendError> {
        if backend.enforces_timeout() {
            return backend.analyze_batch(&texts, options);
        }
        let timeout = self.settings.request_timeout;
        let worker = Arc::clone(backend);
        let options = options.clone();
        pool::call_with_timeout(timeout, move || worker.analyze_batch(&texts, &options))
            .unwrap_or(Err(BackendError::Timeout(timeout)))
    }

    /// Map a raw backend answer onto the canonical shape.
    fn normalize(
        &self,
        backend: &dyn AnalysisBackend,
        raw: RawAnalysis,
        text: &str,
        options: &AnalysisOptions,
        source: SourceBackend,
        cost: f64,
    ) -> Result<ChunkOutcome, CoreError> {
        let sentiment = backend.vocabulary().normalize(&raw.label)?;

        let emotions = options.detect_emotions.then(|| {
            if backend.supports_emotions() {
                let mut emotions: Vec<Emotion> = raw
                    .emotions
                    .into_iter()
                    .map(|e| Emotion {
                        label: e.label.to_lowercase(),
                        confidence: unit_interval(e.score),
                    })
                    .collect();
                sort_emotions(&mut emotions);
                emotions
            } else {
                self.lexicon.detect_emotions(text)
            }
        });
        let key_phrases = options.extract_key_phrases.then(|| match raw.key_phrases {
            Some(phrases) => phrases
                .into_iter()
                .map(|k| KeyPhrase {
                    text: k.label,
                    confidence: unit_interval(k.score),
                })
                .collect(),
            None => {
                debug!(backend = %backend.kind(), "no key phrases from backend, using lexicon");
                self.lexicon.key_phrases(text)
            }
        });

        Ok(ChunkOutcome {
            sentiment,
            confidence: unit_interval(raw.confidence),
            emotions,
            key_phrases,
            source,
            cost,
            weight: text.chars().count(),
        })
    }

    fn analyze_locally(
        &self,
        text: &str,
        options: &AnalysisOptions,
    ) -> Result<ChunkOutcome, CoreError> {
        let result = self
            .lexicon
            .analyze(text, options)
            .map_err(|e| CoreError::AnalysisFailed(format!("local analyzer failed: {e}")))?;
        Ok(ChunkOutcome {
            sentiment: result.sentiment,
            confidence: result.confidence,
            emotions: result.emotions,
            key_phrases: result.key_phrases,
            source: SourceBackend::LocalFallback,
            cost: 0.0,
            weight: text.chars().count(),
        })
    }

    /// Combine chunk outcomes into one result. A contract violation in any
    /// chunk fails the whole text.
    fn assemble(
        &self,
        chunks: Vec<Result<ChunkOutcome, CoreError>>,
        started: Instant,
    ) -> Result<AnalysisResult, CoreError> {
        let chunks: Vec<ChunkOutcome> = chunks.into_iter().collect::<Result<_, _>>()?;

        let verdicts: Vec<ChunkVerdict> = chunks
            .iter()
            .map(|c| ChunkVerdict {
                sentiment: c.sentiment,
                confidence: c.confidence,
                weight: c.weight,
            })
            .collect();
        let (sentiment, confidence) = match verdicts.as_slice() {
            [only] => (only.sentiment, only.confidence),
            _ => aggregate_verdicts(&verdicts),
        };

        let emotions = if chunks.iter().any(|c| c.emotions.is_some()) {
            let weighted: Vec<(Vec<Emotion>, usize)> = chunks
                .iter()
                .map(|c| (c.emotions.clone().unwrap_or_default(), c.weight))
                .collect();
            Some(match weighted.as_slice() {
                [(only, _)] => only.clone(),
                _ => merge_emotions(&weighted),
            })
        } else {
            None
        };
        let key_phrases = if chunks.iter().any(|c| c.key_phrases.is_some()) {
            let per_chunk: Vec<Vec<KeyPhrase>> = chunks
                .iter()
                .map(|c| c.key_phrases.clone().unwrap_or_default())
                .collect();
            Some(merge_key_phrases(&per_chunk))
        } else {
            None
        };

        // The result is only as good as its weakest chunk.
        let source_backend = chunks
            .iter()
            .map(|c| c.source)
            .max()
            .unwrap_or(SourceBackend::LocalFallback);

        Ok(AnalysisResult {
            sentiment,
            confidence,
            emotions,
            key_phrases,
            source_backend,
            cost_estimate: chunks.iter().map(|c| c.cost).sum(),
            processing_time_ms: elapsed_ms(started),
            timestamp: self.clock.now(),
        })
    }
}

fn unit_interval(x: f64) -> f64 {
    if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
