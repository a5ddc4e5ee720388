use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, warn};

use crate::config::{Config, MinQueryLength};
use crate::model::{Candidate, Query, ResultSet, SourceType};
use crate::preference_store::{ExclusionPurpose, PreferenceStore, StoreError};
use crate::ranking;
use crate::sources::{SearchFilters, SearchSource, SourceError};
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub min_query_length: MinQueryLength,
    pub usage_sort: bool,
    pub max_results_per_section: usize,
    /// Skip the direct source call when a shorter prefix of the query already
    /// came back empty. Nickname supplementation still runs.
    pub skip_after_empty_prefix: bool,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            min_query_length: MinQueryLength::default(),
            usage_sort: false,
            max_results_per_section: 20,
            skip_after_empty_prefix: false,
        }
    }
}

impl AggregatorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_query_length: cfg.min_query_length,
            usage_sort: cfg.sort_by_usage,
            max_results_per_section: cfg.max_results_per_section,
            skip_after_empty_prefix: cfg.skip_after_empty_prefix,
        }
    }
}

/// One section's result, tagged with the generation it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCompletion {
    pub generation: u64,
    pub source: SourceType,
    pub results: ResultSet,
}

#[derive(Debug, thiserror::Error)]
enum CollectError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A query that came back empty, valid only while the source's revision holds.
#[derive(Debug, Clone)]
struct EmptyPrefix {
    normalized: String,
    revision: u64,
}

/// Fans a query out to every registered source and merges each source's
/// direct hits with nickname matches, minus exclusions, ranked.
pub struct SourceAggregator {
    sources: BTreeMap<SourceType, Arc<dyn SearchSource>>,
    preferences: Arc<dyn PreferenceStore>,
    settings: AggregatorSettings,
    empty_prefixes: Mutex<HashMap<SourceType, EmptyPrefix>>,
}

impl SourceAggregator {
    pub fn new(preferences: Arc<dyn PreferenceStore>, settings: AggregatorSettings) -> Self {
        Self {
            sources: BTreeMap::new(),
            preferences,
            settings,
            empty_prefixes: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a source; a later source of the same type replaces the earlier one.
    pub fn with_source(mut self, source: Arc<dyn SearchSource>) -> Self {
        self.sources.insert(source.source_type(), source);
        self
    }

    pub fn has_source(&self, source: SourceType) -> bool {
        self.sources.contains_key(&source)
    }

    pub fn source_types(&self) -> Vec<SourceType> {
        self.sources.keys().copied().collect()
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn passes_gate(&self, source: SourceType, query: &Query) -> bool {
        !query.is_blank() && query.char_len() >= self.settings.min_query_length.for_source(source)
    }

    /// Runs one source to completion on the calling thread.
    ///
    /// Never fails: errors and panics inside the source become an empty set.
    pub fn search_source(
        &self,
        source: SourceType,
        query: &Query,
        filters: &SearchFilters,
    ) -> ResultSet {
        let generation = query.generation();
        if !self.passes_gate(source, query) {
            return ResultSet::empty(source, generation);
        }
        let Some(provider) = self.sources.get(&source) else {
            return ResultSet::empty(source, generation);
        };

        match catch_unwind(AssertUnwindSafe(|| {
            self.collect(provider.as_ref(), query, filters)
        })) {
            Ok(Ok(results)) => results,
            Ok(Err(error)) => {
                warn!(source = %source, generation, %error, "source search failed");
                ResultSet::empty(source, generation)
            }
            Err(_) => {
                warn!(source = %source, generation, "source search panicked");
                ResultSet::empty(source, generation)
            }
        }
    }

    fn collect(
        &self,
        provider: &dyn SearchSource,
        query: &Query,
        filters: &SearchFilters,
    ) -> Result<ResultSet, CollectError> {
        let source = provider.source_type();
        let generation = query.generation();

        let revision = provider.revision();
        let mut candidates = if self.skip_direct_search(source, query, revision) {
            debug!(source = %source, generation, "direct search skipped after empty prefix");
            Vec::new()
        } else {
            let direct = provider.search(query, filters)?;
            self.record_prefix_outcome(source, query, revision, direct.is_empty());
            direct
        };

        let nickname_ids = self
            .preferences
            .find_by_nickname_match(source, query.normalized())?;
        let known: HashSet<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        let missing: Vec<String> = nickname_ids
            .into_iter()
            .filter(|id| !known.contains(id.as_str()))
            .collect();
        if !missing.is_empty() {
            candidates.extend(provider.fetch_by_ids(&missing, filters)?);
        }

        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.key.clone()));

        let excluded = self
            .preferences
            .excluded(source, ExclusionPurpose::Results)?;
        candidates.retain(|candidate| !excluded.contains(&candidate.key));

        let candidates = self.attach_nicknames(source, candidates);
        let pinned: HashSet<String> = self.preferences.pinned(source)?.into_iter().collect();

        let mut ranked = ranking::rank(candidates, query, self.settings.usage_sort);
        ranked.truncate(self.settings.max_results_per_section);
        for item in &mut ranked {
            item.pinned = pinned.contains(&item.candidate.key);
        }

        debug!(source = %source, generation, count = ranked.len(), "source ranked");
        Ok(ResultSet::new(source, generation, ranked))
    }

    fn attach_nicknames(&self, source: SourceType, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .map(|mut candidate| {
                if candidate.nickname.is_none() {
                    match self.preferences.nickname(source, &candidate.key) {
                        Ok(nickname) => candidate.nickname = nickname,
                        Err(error) => {
                            debug!(source = %source, key = %candidate.key, %error, "nickname lookup failed");
                        }
                    }
                }
                candidate
            })
            .collect()
    }

    fn skip_direct_search(&self, source: SourceType, query: &Query, revision: u64) -> bool {
        if !self.settings.skip_after_empty_prefix {
            return false;
        }
        self.empty_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&source)
            .is_some_and(|prefix| {
                prefix.revision == revision
                    && query.normalized().starts_with(prefix.normalized.as_str())
            })
    }

    fn record_prefix_outcome(
        &self,
        source: SourceType,
        query: &Query,
        revision: u64,
        empty: bool,
    ) {
        if !self.settings.skip_after_empty_prefix {
            return;
        }
        let mut prefixes = self
            .empty_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if empty {
            prefixes.insert(
                source,
                EmptyPrefix {
                    normalized: query.normalized().to_string(),
                    revision,
                },
            );
        } else {
            prefixes.remove(&source);
        }
    }

    pub fn reset_empty_prefixes(&self) {
        self.empty_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Queues one job per source and returns the sources that will report.
    ///
    /// Sources below their minimum query length report an empty set right away
    /// without touching the pool. Unregistered sources are skipped.
    pub fn dispatch(
        self: &Arc<Self>,
        pool: &WorkerPool,
        query: &Query,
        sources: &[SourceType],
        filters: &SearchFilters,
        sink: &Sender<SourceCompletion>,
    ) -> Vec<SourceType> {
        let generation = query.generation();
        let mut dispatched = Vec::with_capacity(sources.len());

        for &source in sources {
            if !self.has_source(source) {
                continue;
            }
            dispatched.push(source);

            if !self.passes_gate(source, query) {
                let _ = sink.send(SourceCompletion {
                    generation,
                    source,
                    results: ResultSet::empty(source, generation),
                });
                continue;
            }

            let aggregator = Arc::clone(self);
            let job_query = query.clone();
            let job_filters = filters.clone();
            let job_sink = sink.clone();
            let queued = pool.execute(move || {
                let results = aggregator.search_source(source, &job_query, &job_filters);
                let _ = job_sink.send(SourceCompletion {
                    generation,
                    source,
                    results,
                });
            });

            if let Err(error) = queued {
                warn!(source = %source, generation, %error, "failed to queue source search");
                let _ = sink.send(SourceCompletion {
                    generation,
                    source,
                    results: ResultSet::empty(source, generation),
                });
            }
        }

        debug!(generation, sources = dispatched.len(), "query dispatched");
        dispatched
    }

    /// Dispatches and blocks until every dispatched source has reported.
    pub fn search(
        self: &Arc<Self>,
        pool: &WorkerPool,
        query: &Query,
        sources: &[SourceType],
        filters: &SearchFilters,
    ) -> BTreeMap<SourceType, ResultSet> {
        let (sender, receiver) = unbounded();
        let dispatched = self.dispatch(pool, query, sources, filters, &sender);
        drop(sender);

        let mut out = BTreeMap::new();
        while out.len() < dispatched.len() {
            match receiver.recv() {
                Ok(completion) => {
                    out.insert(completion.source, completion.results);
                }
                Err(_) => break,
            }
        }
        out
    }

    /// Blank-query candidates for `source`, minus suggestion exclusions and pins.
    pub fn suggestions(&self, source: SourceType, limit: usize) -> Vec<Candidate> {
        let Some(provider) = self.sources.get(&source) else {
            return Vec::new();
        };
        let result = (|| -> Result<Vec<Candidate>, CollectError> {
            let excluded = self
                .preferences
                .excluded(source, ExclusionPurpose::Suggestions)?;
            let pinned: HashSet<String> = self.preferences.pinned(source)?.into_iter().collect();
            let mut items = provider.suggestions(limit.saturating_add(excluded.len() + pinned.len()))?;
            items.retain(|item| !excluded.contains(&item.key) && !pinned.contains(&item.key));
            items.truncate(limit);
            Ok(items)
        })();

        result.unwrap_or_else(|error| {
            warn!(source = %source, %error, "suggestions unavailable");
            Vec::new()
        })
    }

    /// Pinned items of `source` in pin order; ids the source no longer knows are dropped.
    pub fn pinned_candidates(&self, source: SourceType, filters: &SearchFilters) -> Vec<Candidate> {
        let Some(provider) = self.sources.get(&source) else {
            return Vec::new();
        };
        let result = (|| -> Result<Vec<Candidate>, CollectError> {
            let ids = self.preferences.pinned(source)?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut fetched = provider.fetch_by_ids(&ids, filters)?;
            let mut ordered = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(index) = fetched.iter().position(|item| &item.key == id) {
                    ordered.push(fetched.swap_remove(index));
                }
            }
            Ok(self.attach_nicknames(source, ordered))
        })();

        result.unwrap_or_else(|error| {
            warn!(source = %source, %error, "favorites unavailable");
            Vec::new()
        })
    }
}
