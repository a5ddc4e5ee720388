use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::{SourceAggregator, SourceCompletion};
use crate::calculator::{CalculatorClassifier, CalculatorResult, DisabledCalculator};
use crate::config::Config;
use crate::model::{Candidate, Query, ResultSet, SourceType};
use crate::preference_store::PreferenceStore;
use crate::section_order::{self, Layout, PermissionProvider, Slot};
use crate::shortcuts::{NavigationEvent, ShortcutResolver, ShortcutTable};
use crate::sources::SearchFilters;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPhase {
    Idle,
    Evaluating,
    ShortCircuited,
}

/// Everything the presentation layer needs for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSnapshot {
    pub generation: u64,
    pub phase: QueryPhase,
    /// Effective query after shortcut codes were stripped.
    pub query: String,
    pub layout: Vec<Slot>,
    pub sections: BTreeMap<SourceType, ResultSet>,
    pub calculator: Option<CalculatorResult>,
    pub navigation: Option<NavigationEvent>,
    pub favorites: Vec<Candidate>,
    pub suggestions: Vec<Candidate>,
    /// Sources dispatched for this generation that have not reported yet.
    pub pending: BTreeSet<SourceType>,
}

impl SearchSnapshot {
    fn idle(generation: u64) -> Self {
        Self {
            generation,
            phase: QueryPhase::Idle,
            query: String::new(),
            layout: Vec::new(),
            sections: BTreeMap::new(),
            calculator: None,
            navigation: None,
            favorites: Vec::new(),
            suggestions: Vec::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn section(&self, source: SourceType) -> Option<&ResultSet> {
        self.sections.get(&source)
    }

    pub fn enabled_sections(&self) -> Vec<SourceType> {
        section_order::enabled_sections(&self.layout)
    }

    /// Sections with results, in layout order.
    pub fn ordered_sections(&self) -> Vec<&ResultSet> {
        self.enabled_sections()
            .into_iter()
            .filter_map(|source| self.sections.get(&source))
            .collect()
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub filters: SearchFilters,
    pub debounce: Duration,
    pub suggestion_count: usize,
    /// In-memory source ranked synchronously on the owner thread.
    pub primary_source: Option<SourceType>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            filters: SearchFilters::default(),
            debounce: Duration::from_millis(150),
            suggestion_count: 8,
            primary_source: Some(SourceType::App),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            filters: cfg.filters.clone(),
            debounce: Duration::from_millis(cfg.debounce_ms),
            suggestion_count: cfg.suggestion_count,
            primary_source: Some(SourceType::App),
        }
    }
}

/// Single owner of the query state machine.
///
/// Every input change bumps the generation. Worker completions come back over a
/// channel and are applied on the owner thread only when their generation is
/// still current; anything older is dropped.
pub struct QueryController {
    aggregator: Arc<SourceAggregator>,
    pool: Arc<WorkerPool>,
    preferences: Arc<dyn PreferenceStore>,
    permissions: Arc<dyn PermissionProvider>,
    calculator: Box<dyn CalculatorClassifier>,
    shortcuts: Box<dyn ShortcutResolver>,
    settings: ControllerSettings,
    generation: u64,
    last_input: String,
    pending_input: Option<(String, Instant)>,
    completions_tx: Sender<SourceCompletion>,
    completions_rx: Receiver<SourceCompletion>,
    snapshot: SearchSnapshot,
    discarded: u64,
}

impl QueryController {
    pub fn new(
        aggregator: Arc<SourceAggregator>,
        pool: Arc<WorkerPool>,
        preferences: Arc<dyn PreferenceStore>,
        permissions: Arc<dyn PermissionProvider>,
        settings: ControllerSettings,
    ) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        let mut controller = Self {
            aggregator,
            pool,
            preferences,
            permissions,
            calculator: Box::new(DisabledCalculator),
            shortcuts: Box::new(ShortcutTable::empty()),
            settings,
            generation: 0,
            last_input: String::new(),
            pending_input: None,
            completions_tx,
            completions_rx,
            snapshot: SearchSnapshot::idle(0),
            discarded: 0,
        };
        controller.enter_idle();
        controller
    }

    pub fn with_calculator(mut self, calculator: Box<dyn CalculatorClassifier>) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_shortcuts(mut self, shortcuts: Box<dyn ShortcutResolver>) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    pub fn snapshot(&self) -> &SearchSnapshot {
        &self.snapshot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> QueryPhase {
        self.snapshot.phase
    }

    /// Completions dropped because a newer generation had started.
    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }

    /// Hands the pending navigation event to the caller exactly once.
    pub fn take_navigation(&mut self) -> Option<NavigationEvent> {
        self.snapshot.navigation.take()
    }

    /// Applies `raw` immediately, bypassing the debounce window.
    pub fn set_query(&mut self, raw: &str) -> &SearchSnapshot {
        self.pending_input = None;
        self.last_input = raw.to_string();
        self.apply_input(raw);
        &self.snapshot
    }

    pub fn clear(&mut self) -> &SearchSnapshot {
        self.set_query("")
    }

    /// Records a keystroke; it takes effect on the first `tick` after the debounce window.
    pub fn on_keystroke(&mut self, raw: &str, at: Instant) {
        self.pending_input = Some((raw.to_string(), at));
    }

    /// Applies the debounced input if its window has elapsed. Returns whether it did.
    pub fn tick(&mut self, now: Instant) -> bool {
        let due = self
            .pending_input
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) >= self.settings.debounce);
        if !due {
            return false;
        }
        match self.pending_input.take() {
            Some((raw, _)) => {
                self.set_query(&raw);
                true
            }
            None => false,
        }
    }

    /// Re-evaluates the last applied input under a new generation.
    ///
    /// Source data or preferences may have changed, so recorded empty
    /// prefixes are forgotten first.
    pub fn rerun(&mut self) -> &SearchSnapshot {
        self.aggregator.reset_empty_prefixes();
        let raw = self.last_input.clone();
        self.apply_input(&raw);
        &self.snapshot
    }

    /// Recomputes the slot layout from current preferences and permissions
    /// without starting a new generation. Sections that left the layout are
    /// dropped from the snapshot; sections that joined it while a query is
    /// evaluating are dispatched under the current generation.
    pub fn refresh_layout(&mut self) {
        let layout = match self.snapshot.phase {
            QueryPhase::Idle => Layout::Idle,
            QueryPhase::Evaluating | QueryPhase::ShortCircuited => Layout::Searching,
        };
        self.snapshot.layout = self.compute_layout(layout);
        let enabled = self.snapshot.enabled_sections();
        let enabled_set: HashSet<SourceType> = enabled.iter().copied().collect();
        self.snapshot.sections.retain(|source, _| enabled_set.contains(source));
        self.snapshot.pending.retain(|source| enabled_set.contains(source));

        if self.snapshot.phase != QueryPhase::Evaluating {
            return;
        }
        let joined: Vec<SourceType> = enabled
            .into_iter()
            .filter(|source| {
                !self.snapshot.sections.contains_key(source)
                    && !self.snapshot.pending.contains(source)
            })
            .collect();
        if joined.is_empty() {
            return;
        }
        let query = Query::new(&self.snapshot.query, self.generation);
        let dispatched = self.aggregator.dispatch(
            &self.pool,
            &query,
            &joined,
            &self.settings.filters,
            &self.completions_tx,
        );
        debug!(
            generation = self.generation,
            dispatched = dispatched.len(),
            "re-enabled sections dispatched"
        );
        self.snapshot.pending.extend(dispatched);
    }

    fn apply_input(&mut self, raw: &str) {
        self.generation += 1;
        let generation = self.generation;

        let mut text = raw.trim().to_string();
        if text.is_empty() {
            self.enter_idle();
            return;
        }

        let mut navigation = None;
        while let Some(found) = self.shortcuts.detect_trailing_code(&text) {
            if navigation.is_none() {
                navigation = Some(found.target.navigation_for(&found.residual));
            }
            text = found.residual;
        }
        if let Some(event) = &navigation {
            info!(generation, code = %event.code, "shortcut navigation requested");
        }

        if let Some(result) = self.calculator.evaluate(&text) {
            debug!(generation, display = %result.display, "calculator short-circuit");
            self.snapshot = SearchSnapshot {
                generation,
                phase: QueryPhase::ShortCircuited,
                query: text,
                layout: self.compute_layout(Layout::Searching),
                sections: BTreeMap::new(),
                calculator: Some(result),
                navigation,
                favorites: Vec::new(),
                suggestions: Vec::new(),
                pending: BTreeSet::new(),
            };
            return;
        }

        self.evaluate(generation, text, navigation);
    }

    fn evaluate(&mut self, generation: u64, text: String, navigation: Option<NavigationEvent>) {
        let query = Query::new(&text, generation);
        let layout = self.compute_layout(Layout::Searching);
        let enabled = section_order::enabled_sections(&layout);

        let mut sections = std::mem::take(&mut self.snapshot.sections);
        sections.retain(|source, _| enabled.contains(source));

        let primary = self
            .settings
            .primary_source
            .filter(|source| enabled.contains(source) && self.aggregator.has_source(*source));
        if let Some(source) = primary {
            let results = self
                .aggregator
                .search_source(source, &query, &self.settings.filters);
            sections.insert(source, results);
        }

        let background: Vec<SourceType> = enabled
            .iter()
            .copied()
            .filter(|source| Some(*source) != primary)
            .collect();
        let dispatched = self.aggregator.dispatch(
            &self.pool,
            &query,
            &background,
            &self.settings.filters,
            &self.completions_tx,
        );

        debug!(generation, query = %text, dispatched = dispatched.len(), "evaluating query");
        self.snapshot = SearchSnapshot {
            generation,
            phase: QueryPhase::Evaluating,
            query: text,
            layout,
            sections,
            calculator: None,
            navigation,
            favorites: Vec::new(),
            suggestions: Vec::new(),
            pending: dispatched.into_iter().collect(),
        };
    }

    fn enter_idle(&mut self) {
        self.aggregator.reset_empty_prefixes();
        let mut snapshot = SearchSnapshot::idle(self.generation);
        snapshot.layout = self.compute_layout(Layout::Idle);
        if let Some(primary) = self.settings.primary_source {
            snapshot.favorites = self
                .aggregator
                .pinned_candidates(primary, &self.settings.filters);
            snapshot.suggestions = self
                .aggregator
                .suggestions(primary, self.settings.suggestion_count);
        }
        debug!(generation = self.generation, "query cleared");
        self.snapshot = snapshot;
    }

    fn compute_layout(&self, layout: Layout) -> Vec<Slot> {
        let user_order = self.preferences.section_order().unwrap_or_else(|error| {
            warn!(%error, "section order unavailable; using default order");
            Vec::new()
        });
        let user_disabled = self.preferences.disabled_sections().unwrap_or_else(|error| {
            warn!(%error, "disabled sections unavailable; treating all as enabled");
            HashSet::new()
        });
        let forced = section_order::permission_disabled(self.permissions.as_ref());
        section_order::order(layout, &user_order, &user_disabled, &forced)
    }

    /// Publishes `completion` if it belongs to the current generation.
    pub fn apply_completion(&mut self, completion: SourceCompletion) -> bool {
        if completion.generation != self.generation {
            self.discarded += 1;
            debug!(
                source = %completion.source,
                completion_generation = completion.generation,
                current_generation = self.generation,
                "stale completion discarded"
            );
            return false;
        }
        if !self.snapshot.pending.remove(&completion.source) {
            debug!(source = %completion.source, "unexpected completion ignored");
            return false;
        }
        self.snapshot
            .sections
            .insert(completion.source, completion.results);
        true
    }

    /// Applies every completion already queued. Returns how many were published.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks until one current-generation completion is published or `timeout` passes.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completions_rx.recv_timeout(remaining) {
                Ok(completion) => {
                    if self.apply_completion(completion) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
    }

    /// Waits until every dispatched source of the current generation has reported.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.drain_completions();
        while !self.snapshot.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for_completion(remaining) {
                warn!(
                    generation = self.generation,
                    pending = self.snapshot.pending.len(),
                    "sources still pending after settle timeout"
                );
                return false;
            }
        }
        true
    }
}
