//! Registry of configured sources and their refresh lifecycle.
//!
//! This is the single source of truth for refresh status. Each store owns
//! one instance with its own interval; all state is mutated under the
//! internal lock, and a global slot budget bounds concurrent refreshes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::StoreError;
use crate::source::{Source, SourceId};

/// Refresh lifecycle state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Idle,
    Initializing,
    Updating,
    Ready,
    Error,
}

impl SourceState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Updating => "updating",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Refresh status of one source, reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub state: SourceState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_refresh_duration: Duration,
    pub last_error: Option<String>,
    /// Latches to true on the first successful refresh and never resets.
    pub initialized: bool,
}

impl SourceStatus {
    fn new() -> Self {
        Self {
            state: SourceState::Idle,
            last_refresh: None,
            last_refresh_duration: Duration::ZERO,
            last_error: None,
            initialized: false,
        }
    }
}

struct SourceEntry {
    source: Arc<Source>,
    status: SourceStatus,
    locked: bool,
    locked_at: Option<Instant>,
}

struct State {
    entries: HashMap<SourceId, SourceEntry>,
    slots_in_use: usize,
}

/// Per-store registry of sources with refresh bookkeeping.
pub struct SourcesStore {
    refresh_interval: Duration,
    refresh_parallelism: usize,
    order: Vec<SourceId>,
    state: RwLock<State>,
}

impl SourcesStore {
    #[must_use]
    pub fn new(
        sources: Vec<Arc<Source>>,
        refresh_interval: Duration,
        refresh_parallelism: usize,
    ) -> Self {
        let order: Vec<SourceId> = sources.iter().map(|s| s.id.clone()).collect();
        let entries = sources
            .into_iter()
            .map(|source| {
                (
                    source.id.clone(),
                    SourceEntry {
                        source,
                        status: SourceStatus::new(),
                        locked: false,
                        locked_at: None,
                    },
                )
            })
            .collect();
        Self {
            refresh_interval,
            refresh_parallelism: refresh_parallelism.max(1),
            order,
            state: RwLock::new(State {
                entries,
                slots_in_use: 0,
            }),
        }
    }

    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// All source IDs in configuration order.
    #[must_use]
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.order.clone()
    }

    /// Source IDs that are due and not currently locked.
    #[must_use]
    pub fn source_ids_for_refresh(&self) -> Vec<SourceId> {
        let state = self.state.read();
        self.order
            .iter()
            .filter(|id| {
                state
                    .entries
                    .get(id)
                    .is_some_and(|entry| !entry.locked && self.is_due(&entry.status))
            })
            .cloned()
            .collect()
    }

    fn is_due(&self, status: &SourceStatus) -> bool {
        match status.last_refresh {
            None => true,
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed.to_std().is_ok_and(|e| e >= self.refresh_interval)
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: &SourceId) -> Option<Arc<Source>> {
        self.state
            .read()
            .entries
            .get(id)
            .map(|entry| Arc::clone(&entry.source))
    }

    #[must_use]
    pub fn get_name(&self, id: &SourceId) -> Option<String> {
        self.state
            .read()
            .entries
            .get(id)
            .map(|entry| entry.source.name.clone())
    }

    pub fn get_status(&self, id: &SourceId) -> Result<SourceStatus, StoreError> {
        self.state
            .read()
            .entries
            .get(id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| StoreError::SourceNotFound(id.clone()))
    }

    /// Whether a refresh should start now: the interval has passed and no
    /// refresh is in flight. Race-safe only together with [`lock_source`];
    /// workers re-check by locking.
    ///
    /// [`lock_source`]: Self::lock_source
    #[must_use]
    pub fn should_refresh(&self, id: &SourceId) -> bool {
        let state = self.state.read();
        state
            .entries
            .get(id)
            .is_some_and(|entry| !entry.locked && self.is_due(&entry.status))
    }

    /// Acquire the refresh lock for a source, claiming a parallelism slot.
    ///
    /// Returns the source on success so the worker can reach its adapter
    /// without a second lookup.
    pub fn lock_source(&self, id: &SourceId) -> Result<Arc<Source>, StoreError> {
        let mut state = self.state.write();
        if state.slots_in_use >= self.refresh_parallelism {
            return Err(StoreError::ParallelismExhausted);
        }
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::SourceNotFound(id.clone()))?;
        if entry.locked {
            return Err(StoreError::SourceAlreadyLocked(id.clone()));
        }
        entry.locked = true;
        entry.locked_at = Some(Instant::now());
        entry.status.state = if entry.status.initialized {
            SourceState::Updating
        } else {
            SourceState::Initializing
        };
        let source = Arc::clone(&entry.source);
        state.slots_in_use += 1;
        Ok(source)
    }

    /// Terminal transition after a successful refresh.
    pub fn refresh_success(&self, id: &SourceId) {
        let mut state = self.state.write();
        let released = match state.entries.get_mut(id) {
            Some(entry) => {
                let released = entry.locked;
                entry.status.state = SourceState::Ready;
                entry.status.last_refresh = Some(Utc::now());
                entry.status.last_refresh_duration = entry
                    .locked_at
                    .take()
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                entry.status.last_error = None;
                entry.status.initialized = true;
                entry.locked = false;
                released
            }
            None => false,
        };
        if released {
            state.slots_in_use -= 1;
        }
    }

    /// Terminal transition after a failed refresh.
    pub fn refresh_error(&self, id: &SourceId, error: &str) {
        let mut state = self.state.write();
        let released = match state.entries.get_mut(id) {
            Some(entry) => {
                let released = entry.locked;
                entry.status.state = SourceState::Error;
                entry.status.last_refresh = Some(Utc::now());
                entry.status.last_refresh_duration = entry
                    .locked_at
                    .take()
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                entry.status.last_error = Some(error.to_string());
                entry.locked = false;
                released
            }
            None => false,
        };
        if released {
            state.slots_in_use -= 1;
        }
    }

    /// Release the refresh lock without recording an outcome. Used when a
    /// refresh is abandoned by shutdown: the worker unwinds, the lock must
    /// not stay held, and the previous status is restored.
    pub fn release_source(&self, id: &SourceId) {
        let mut state = self.state.write();
        let released = match state.entries.get_mut(id) {
            Some(entry) => {
                let released = entry.locked;
                entry.locked = false;
                entry.locked_at = None;
                entry.status.state = if !entry.status.initialized {
                    SourceState::Idle
                } else if entry.status.last_error.is_some() {
                    SourceState::Error
                } else {
                    SourceState::Ready
                };
                released
            }
            None => false,
        };
        if released {
            state.slots_in_use -= 1;
        }
    }

    /// Whether the source completed at least one successful refresh.
    #[must_use]
    pub fn is_initialized(&self, id: &SourceId) -> bool {
        self.state
            .read()
            .entries
            .get(id)
            .is_some_and(|entry| entry.status.initialized)
    }

    /// Time of the oldest per-source refresh, i.e. the age of the most
    /// stale partition of the dataset. `None` while any source has never
    /// completed a refresh attempt.
    #[must_use]
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.read();
        let mut oldest: Option<DateTime<Utc>> = None;
        for entry in state.entries.values() {
            let last = entry.status.last_refresh?;
            oldest = Some(match oldest {
                Some(current) if current <= last => current,
                _ => last,
            });
        }
        oldest
    }

    /// Earliest upcoming refresh across all sources.
    #[must_use]
    pub fn next_refresh(&self) -> Option<DateTime<Utc>> {
        self.cached_at().map(|at| at + self.refresh_interval)
    }

    /// Upcoming refresh time of one source.
    #[must_use]
    pub fn next_refresh_at(&self, id: &SourceId) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .entries
            .get(id)
            .and_then(|entry| entry.status.last_refresh)
            .map(|last| last + self.refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NeighborsResponse, RoutesResponse};
    use crate::error::SourceError;
    use crate::source::{SourceAdapter, StatusResponse};
    use async_trait::async_trait;

    struct NullAdapter;

    #[async_trait]
    impl SourceAdapter for NullAdapter {
        async fn status(&self) -> Result<StatusResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn neighbors(&self) -> Result<NeighborsResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn routes(&self, _: &str) -> Result<RoutesResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn routes_received(&self, _: &str) -> Result<RoutesResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn routes_filtered(&self, _: &str) -> Result<RoutesResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn routes_not_exported(&self, _: &str) -> Result<RoutesResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
        async fn all_routes(&self) -> Result<RoutesResponse, SourceError> {
            Err(SourceError::NotImplemented)
        }
    }

    fn source(id: &str) -> Arc<Source> {
        Arc::new(Source::new(
            SourceId::try_from(id).unwrap(),
            id.to_uppercase(),
            Arc::new(NullAdapter),
        ))
    }

    fn store(parallelism: usize) -> SourcesStore {
        SourcesStore::new(
            vec![source("rs1"), source("rs2")],
            Duration::from_secs(300),
            parallelism,
        )
    }

    fn id(raw: &str) -> SourceId {
        SourceId::try_from(raw).unwrap()
    }

    #[test]
    fn fresh_sources_are_due_for_refresh() {
        let store = store(2);
        assert!(store.should_refresh(&id("rs1")));
        assert_eq!(store.source_ids_for_refresh().len(), 2);
    }

    #[test]
    fn locking_walks_the_state_machine() {
        let store = store(2);
        let rs1 = id("rs1");

        assert_eq!(store.get_status(&rs1).unwrap().state, SourceState::Idle);

        store.lock_source(&rs1).unwrap();
        assert_eq!(
            store.get_status(&rs1).unwrap().state,
            SourceState::Initializing
        );
        assert!(!store.should_refresh(&rs1));

        store.refresh_success(&rs1);
        let status = store.get_status(&rs1).unwrap();
        assert_eq!(status.state, SourceState::Ready);
        assert!(status.initialized);
        assert!(status.last_refresh.is_some());

        // Initialized sources go to Updating on the next lock.
        store.lock_source(&rs1).unwrap();
        assert_eq!(store.get_status(&rs1).unwrap().state, SourceState::Updating);

        store.refresh_error(&rs1, "unreachable");
        let status = store.get_status(&rs1).unwrap();
        assert_eq!(status.state, SourceState::Error);
        assert_eq!(status.last_error.as_deref(), Some("unreachable"));
        // Initialization survives later failures.
        assert!(status.initialized);
    }

    #[test]
    fn double_lock_is_rejected() {
        let store = store(2);
        let rs1 = id("rs1");
        store.lock_source(&rs1).unwrap();
        assert!(matches!(
            store.lock_source(&rs1),
            Err(StoreError::SourceAlreadyLocked(_))
        ));
    }

    #[test]
    fn parallelism_budget_is_enforced() {
        let store = store(1);
        store.lock_source(&id("rs1")).unwrap();
        assert!(matches!(
            store.lock_source(&id("rs2")),
            Err(StoreError::ParallelismExhausted)
        ));

        store.refresh_success(&id("rs1"));
        assert!(store.lock_source(&id("rs2")).is_ok());
    }

    #[test]
    fn refreshed_sources_are_not_due_until_the_interval_passes() {
        let store = store(2);
        let rs1 = id("rs1");
        store.lock_source(&rs1).unwrap();
        store.refresh_success(&rs1);

        assert!(!store.should_refresh(&rs1));
        assert!(store
            .source_ids_for_refresh()
            .iter()
            .all(|due| due != &rs1));
    }

    #[test]
    fn cached_at_is_the_oldest_refresh() {
        let store = store(2);
        assert!(store.cached_at().is_none());

        store.lock_source(&id("rs1")).unwrap();
        store.refresh_success(&id("rs1"));
        // rs2 never refreshed, the dataset has no established age yet.
        assert!(store.cached_at().is_none());

        store.lock_source(&id("rs2")).unwrap();
        store.refresh_success(&id("rs2"));
        let cached_at = store.cached_at().unwrap();
        assert!(cached_at <= Utc::now());
        assert_eq!(store.next_refresh(), Some(cached_at + store.refresh_interval()));
    }

    #[test]
    fn release_restores_the_previous_state() {
        let store = store(2);
        let rs1 = id("rs1");
        store.lock_source(&rs1).unwrap();
        store.refresh_success(&rs1);

        store.lock_source(&rs1).unwrap();
        store.release_source(&rs1);
        let status = store.get_status(&rs1).unwrap();
        assert_eq!(status.state, SourceState::Ready);
        assert!(store.should_refresh(&rs1) || status.last_refresh.is_some());
    }

    #[test]
    fn unknown_sources_are_reported() {
        let store = store(2);
        assert!(matches!(
            store.get_status(&id("nope")),
            Err(StoreError::SourceNotFound(_))
        ));
    }
}
