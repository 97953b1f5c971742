//! The synchronization engine.
//!
//! One [`SyncEngine`] owns every open project: the in-memory
//! [`LinkStore`] per project, per-project sync state, the read cache, and
//! the phase channel UI code observes during a download. All mutation of
//! one project's store goes through this engine, which serializes it
//! behind an async mutex; there is no parallel mutation of the same
//! project.

use std::collections::HashMap;
use std::sync::Arc;

use concord_engine::{
    sanitize, AlignmentLink, BulkOutcome, BulkProgress, Journal, LinkStore, ProjectId, Revision,
    SaveOptions, Side,
};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::client::{ProjectDescriptor, RemoteApi, TokenRecord};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::now_ms;
use crate::payloads::FilePayloadStore;
use crate::persistence::LinkPersistencePort;
use crate::state::{ProjectLocation, ProjectSyncState, SyncPhase};

/// What a completed download produced.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub project: ProjectDescriptor,
    /// Target-side word lists grouped by corpus, built in bounded chunks
    pub words_by_corpus: HashMap<String, Vec<String>>,
    pub link_count: usize,
}

/// Bridges the store's chunk-boundary cancellation polling to a
/// [`CancellationToken`].
struct TokenProgress<'a> {
    cancel: &'a CancellationToken,
    label: &'static str,
}

impl BulkProgress for TokenProgress<'_> {
    fn progress(&mut self, done: usize, total: usize) {
        debug!(op = self.label, done, total, "bulk progress");
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct SyncEngine<R, P> {
    remote: Arc<R>,
    persistence: Arc<P>,
    config: SyncConfig,
    stores: Arc<Mutex<HashMap<ProjectId, LinkStore>>>,
    states: Mutex<HashMap<ProjectId, ProjectSyncState>>,
    phases: Mutex<HashMap<ProjectId, Arc<watch::Sender<SyncPhase>>>>,
    cache: QueryCache,
}

impl<R: RemoteApi, P: LinkPersistencePort> SyncEngine<R, P> {
    pub fn new(remote: R, persistence: P, config: SyncConfig) -> Self {
        let cache = QueryCache::new(&config);
        Self {
            remote: Arc::new(remote),
            persistence: Arc::new(persistence),
            config,
            stores: Arc::new(Mutex::new(HashMap::new())),
            states: Mutex::new(HashMap::new()),
            phases: Mutex::new(HashMap::new()),
            cache,
        }
    }

    // ---- project lifecycle ----------------------------------------------

    /// Create a brand-new local project.
    pub async fn create_project(&self, project_id: impl Into<ProjectId>) -> Result<()> {
        let project_id = project_id.into();
        self.ensure_store(&project_id).await?;

        let state =
            ProjectSyncState::new_local(project_id.clone(), chrono::Utc::now());
        self.persistence.save_state(&state).await?;
        self.states.lock().await.insert(project_id, state);
        Ok(())
    }

    /// Open a project that already exists in durable storage, loading its
    /// links into the in-memory store without journaling.
    pub async fn open_project(&self, project_id: &str) -> Result<usize> {
        let loaded = self.ensure_store(project_id).await?;

        if let Some(state) = self.persistence.load_state(project_id).await? {
            self.states
                .lock()
                .await
                .insert(project_id.to_string(), state);
        }
        Ok(loaded)
    }

    /// Register a project the server advertises.
    ///
    /// If local data for it already exists the server copy is considered a
    /// counterpart and the project becomes `Synced`; otherwise it is listed
    /// display-only as `Remote` until explicitly downloaded.
    pub async fn register_remote_project(
        &self,
        descriptor: &ProjectDescriptor,
    ) -> Result<ProjectLocation> {
        let now = chrono::Utc::now();
        let mut states = self.states.lock().await;

        let location = match states.get_mut(&descriptor.id) {
            Some(state) if state.location != ProjectLocation::Remote => {
                state.location = ProjectLocation::Synced;
                state.updated_at = now;
                self.persistence.save_state(state).await?;
                ProjectLocation::Synced
            }
            Some(_) => ProjectLocation::Remote,
            None => {
                let state = ProjectSyncState::new_remote(descriptor.id.clone(), now);
                self.persistence.save_state(&state).await?;
                states.insert(descriptor.id.clone(), state);
                ProjectLocation::Remote
            }
        };
        Ok(location)
    }

    pub async fn project_state(&self, project_id: &str) -> Option<ProjectSyncState> {
        self.states.lock().await.get(project_id).cloned()
    }

    // ---- link editing ---------------------------------------------------

    /// Save a link, journaling the mutation and mirroring it to durable
    /// storage.
    pub async fn save_link(
        &self,
        project_id: &str,
        link: AlignmentLink,
    ) -> Result<AlignmentLink> {
        let saved = {
            let mut stores = self.stores.lock().await;
            let store = self.store_mut(&mut stores, project_id)?;
            store.save(link, now_ms())?
        };
        self.persistence
            .save_links(project_id, std::slice::from_ref(&saved))
            .await?;
        self.touch(project_id).await?;
        Ok(saved)
    }

    /// Remove a link by id. Returns the removed link, if it existed.
    pub async fn remove_link(
        &self,
        project_id: &str,
        link_id: &str,
    ) -> Result<Option<AlignmentLink>> {
        let removed = {
            let mut stores = self.stores.lock().await;
            let store = self.store_mut(&mut stores, project_id)?;
            store.remove(link_id, now_ms())?
        };
        if let Some(removed) = &removed {
            self.persistence
                .delete_links(project_id, std::slice::from_ref(&removed.id))
                .await?;
            self.touch(project_id).await?;
        }
        Ok(removed)
    }

    /// Save many links in chunks, yielding between chunks so cancellation
    /// and progress reporting stay responsive.
    pub async fn save_links_bulk(
        &self,
        project_id: &str,
        links: Vec<AlignmentLink>,
        opts: SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome> {
        let outcome = {
            let mut stores = self.stores.lock().await;
            let store = self.store_mut(&mut stores, project_id)?;
            let mut progress = TokenProgress {
                cancel,
                label: "save_all",
            };
            store.save_all(links, now_ms(), opts, &mut progress)?
        };

        // Mirror whatever the store now holds; idempotent ids make the
        // written set authoritative even after a mid-bulk cancellation.
        let current = self.all_links(project_id).await?;
        self.persistence
            .replace_project(project_id, &current)
            .await?;
        self.touch(project_id).await?;
        info!(
            project = project_id,
            affected = outcome.affected,
            canceled = outcome.canceled,
            "bulk save finished"
        );
        Ok(outcome)
    }

    /// Remove many links in chunks with the same cancellation semantics as
    /// [`SyncEngine::save_links_bulk`].
    pub async fn remove_links_bulk(
        &self,
        project_id: &str,
        ids: &[String],
        opts: SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome> {
        let outcome = {
            let mut stores = self.stores.lock().await;
            let store = self.store_mut(&mut stores, project_id)?;
            let mut progress = TokenProgress {
                cancel,
                label: "remove_all",
            };
            store.remove_all(ids, now_ms(), opts, &mut progress)?
        };

        // A cancellation stops at a chunk boundary, so mirror the store's
        // surviving set rather than deleting every requested id.
        let current = self.all_links(project_id).await?;
        self.persistence
            .replace_project(project_id, &current)
            .await?;
        self.touch(project_id).await?;
        Ok(outcome)
    }

    // ---- queries --------------------------------------------------------

    pub async fn get_link(&self, project_id: &str, link_id: &str) -> Result<Option<AlignmentLink>> {
        let stores = self.stores.lock().await;
        let store = self.store_ref(&stores, project_id)?;
        Ok(store.get(link_id).cloned())
    }

    pub async fn all_links(&self, project_id: &str) -> Result<Vec<AlignmentLink>> {
        let stores = self.stores.lock().await;
        let store = self.store_ref(&stores, project_id)?;
        Ok(store.get_all().into_iter().cloned().collect())
    }

    /// Find links touching a reference, read-through cached.
    ///
    /// The cache key carries the store revision, so any store write makes
    /// prior entries unreachable without explicit invalidation.
    pub async fn find_by_reference(
        &self,
        project_id: &str,
        side: Side,
        reference: &str,
    ) -> Result<Vec<AlignmentLink>> {
        let stores = self.stores.lock().await;
        let store = self.store_ref(&stores, project_id)?;

        let key = QueryKey {
            project_id: project_id.to_string(),
            side,
            key: sanitize(reference).to_string(),
            revision: store.revision(),
        };
        Ok(self.cache.get_or_compute(key, || {
            store
                .find_by_reference(side, reference)
                .into_iter()
                .cloned()
                .collect()
        }))
    }

    pub async fn revision(&self, project_id: &str) -> Result<Revision> {
        let stores = self.stores.lock().await;
        Ok(self.store_ref(&stores, project_id)?.revision())
    }

    /// Poll a project's revision counter on an interval and publish changes
    /// on a watch channel. This is how cross-component readers learn the
    /// store changed without push notification; staleness is bounded by the
    /// polling interval.
    pub fn spawn_revision_poller(
        &self,
        project_id: impl Into<ProjectId>,
        cancel: CancellationToken,
    ) -> watch::Receiver<Revision> {
        let project_id = project_id.into();
        let (tx, rx) = watch::channel(0);
        let stores = Arc::clone(&self.stores);
        let interval = self.config.revision_poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let revision = stores
                            .lock()
                            .await
                            .get(&project_id)
                            .map(|store| store.revision())
                            .unwrap_or(0);
                        if *tx.borrow() != revision && tx.send(revision).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        rx
    }

    // ---- download -------------------------------------------------------

    /// Observe a project's sync phase.
    pub async fn watch_phase(&self, project_id: &str) -> watch::Receiver<SyncPhase> {
        self.phase_sender(project_id).await.subscribe()
    }

    pub async fn current_phase(&self, project_id: &str) -> SyncPhase {
        *self.phase_sender(project_id).await.borrow()
    }

    /// Pull a project from the server and replace local state with it.
    ///
    /// Walks the phase machine, checking the cancellation token between
    /// phases. On error or cancellation everything written so far for the
    /// project is rolled back: links restored from the pre-download
    /// snapshot, sync markers reset, original location restored. The
    /// terminal phase auto-resets to idle after the configured delay.
    pub async fn download_project(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        // A concurrent sync for this project leaves the phase non-idle;
        // reject without touching its state.
        self.set_phase(project_id, SyncPhase::RetrievingProject)
            .await?;

        let prior_links = self.persistence.load_project(project_id).await?;
        let prior_state = self.states.lock().await.get(project_id).cloned();

        match self.download_inner(project_id, cancel).await {
            Ok(outcome) => {
                self.set_phase(project_id, SyncPhase::Success).await?;
                self.schedule_phase_reset(project_id).await;
                info!(
                    project = project_id,
                    links = outcome.link_count,
                    "download complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.rollback(project_id, prior_links, prior_state).await;
                let terminal = if matches!(err, SyncError::Canceled) {
                    SyncPhase::Canceled
                } else {
                    SyncPhase::Failed
                };
                warn!(project = project_id, phase = ?terminal, error = %err, "download aborted");
                self.set_phase(project_id, terminal).await.ok();
                self.schedule_phase_reset(project_id).await;
                Err(err)
            }
        }
    }

    async fn download_inner(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let project = self
            .remote
            .get_project(project_id)
            .await?
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))?;

        self.check_cancel(cancel)?;
        self.set_phase(project_id, SyncPhase::RetrievingTokens)
            .await?;
        let tokens = self.remote.get_tokens(project_id, "targets").await?;

        self.check_cancel(cancel)?;
        self.set_phase(project_id, SyncPhase::FormattingResponse)
            .await?;
        let words_by_corpus =
            format_word_lists(&tokens, self.config.ui_chunk_size, cancel).await?;

        // Links are requested only after token formatting completes.
        self.check_cancel(cancel)?;
        let links = self.remote.get_links(project_id).await?;

        self.check_cancel(cancel)?;
        self.set_phase(project_id, SyncPhase::Updating).await?;
        let link_count = {
            self.ensure_store(project_id).await?;
            let mut stores = self.stores.lock().await;
            let store = self.store_mut(&mut stores, project_id)?;
            store.replace_all(links)?
        };
        let current = self.all_links(project_id).await?;
        self.persistence
            .replace_project(project_id, &current)
            .await?;

        self.check_cancel(cancel)?;
        self.set_phase(project_id, SyncPhase::RefreshingContainers)
            .await?;
        self.cache.reset();

        let now = chrono::Utc::now();
        let mut states = self.states.lock().await;
        let state = states
            .entry(project_id.to_string())
            .or_insert_with(|| ProjectSyncState::new_remote(project_id.to_string(), now));
        state.mark_synced(now);
        state.last_sync_server_time = project.updated_at;
        self.persistence.save_state(state).await?;
        drop(states);

        Ok(DownloadOutcome {
            project,
            words_by_corpus,
            link_count,
        })
    }

    async fn rollback(
        &self,
        project_id: &str,
        prior_links: Vec<AlignmentLink>,
        prior_state: Option<ProjectSyncState>,
    ) {
        debug!(project = project_id, "rolling back partial download");

        {
            let mut stores = self.stores.lock().await;
            if let Some(store) = stores.get_mut(project_id) {
                if store.replace_all(prior_links.clone()).is_err() {
                    warn!(project = project_id, "store rollback failed");
                }
            }
        }
        if self
            .persistence
            .replace_project(project_id, &prior_links)
            .await
            .is_err()
        {
            warn!(project = project_id, "persistence rollback failed");
        }

        let mut states = self.states.lock().await;
        match prior_state {
            Some(state) => {
                self.persistence.save_state(&state).await.ok();
                states.insert(project_id.to_string(), state);
            }
            None => {
                states.remove(project_id);
            }
        }
        self.cache.reset();
    }

    // ---- upload ---------------------------------------------------------

    /// Drain the project's journal to the server.
    ///
    /// Reads journal pages, transmits each page in server-sized chunks, and
    /// acknowledges entries only after the server confirms them; a
    /// cancellation or crash between chunks leaves the unconfirmed tail in
    /// the journal for the next attempt. Returns the number of entries the
    /// server accepted.
    pub async fn upload_project(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut total = 0;

        loop {
            self.check_cancel(cancel)?;

            let page = {
                let mut stores = self.stores.lock().await;
                let store = self.store_mut(&mut stores, project_id)?;
                store.journal_mut().upload_page(self.config.db_page_size)?
            };
            if page.is_empty() {
                break;
            }

            for chunk in page.chunks(self.config.server_chunk_size.max(1)) {
                self.check_cancel(cancel)?;

                let receipt = self.remote.push_journal(project_id, chunk).await?;
                {
                    let mut stores = self.stores.lock().await;
                    let store = self.store_mut(&mut stores, project_id)?;
                    store.journal_mut().acknowledge(&receipt.accepted);
                }
                if receipt.accepted.len() != chunk.len() {
                    return Err(SyncError::InvalidResponse(format!(
                        "server accepted {} of {} journal entries",
                        receipt.accepted.len(),
                        chunk.len()
                    )));
                }
                total += chunk.len();
            }
        }

        let now = chrono::Utc::now();
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(project_id) {
            state.mark_synced(now);
            self.persistence.save_state(state).await?;
        }
        info!(project = project_id, entries = total, "upload complete");
        Ok(total)
    }

    /// Journal entries still awaiting upload.
    pub async fn pending_entries(&self, project_id: &str) -> Result<usize> {
        let stores = self.stores.lock().await;
        Ok(self.store_ref(&stores, project_id)?.journal().len())
    }

    // ---- internals ------------------------------------------------------

    /// Create the in-memory store if absent, loading persisted links into
    /// it without journaling. Returns the number of links loaded.
    async fn ensure_store(&self, project_id: &str) -> Result<usize> {
        {
            let stores = self.stores.lock().await;
            if stores.contains_key(project_id) {
                return Ok(0);
            }
        }

        let payloads = FilePayloadStore::new(self.config.payload_dir.clone())?;
        let journal = Journal::new(Box::new(payloads));
        let mut store = LinkStore::new(project_id.to_string(), journal)
            .with_bulk_chunk_size(self.config.bulk_chunk_size);

        let persisted = self.persistence.load_project(project_id).await?;
        let loaded = store.replace_all(persisted)?;

        self.stores
            .lock()
            .await
            .insert(project_id.to_string(), store);
        Ok(loaded)
    }

    fn store_ref<'a>(
        &self,
        stores: &'a HashMap<ProjectId, LinkStore>,
        project_id: &str,
    ) -> Result<&'a LinkStore> {
        stores
            .get(project_id)
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))
    }

    fn store_mut<'a>(
        &self,
        stores: &'a mut HashMap<ProjectId, LinkStore>,
        project_id: &str,
    ) -> Result<&'a mut LinkStore> {
        stores
            .get_mut(project_id)
            .ok_or_else(|| SyncError::UnknownProject(project_id.to_string()))
    }

    /// Bump the project's local-change marker after an edit.
    async fn touch(&self, project_id: &str) -> Result<()> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(project_id) {
            state.updated_at = chrono::Utc::now();
            self.persistence.save_state(state).await?;
        }
        Ok(())
    }

    async fn phase_sender(&self, project_id: &str) -> Arc<watch::Sender<SyncPhase>> {
        let mut phases = self.phases.lock().await;
        Arc::clone(phases.entry(project_id.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(SyncPhase::Idle);
            Arc::new(tx)
        }))
    }

    async fn set_phase(&self, project_id: &str, next: SyncPhase) -> Result<()> {
        let sender = self.phase_sender(project_id).await;
        let current = *sender.borrow();
        if !current.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        debug!(project = project_id, from = ?current, to = ?next, "sync phase");
        sender.send_replace(next);
        Ok(())
    }

    /// Auto-reset a terminal phase back to idle after the configured delay.
    async fn schedule_phase_reset(&self, project_id: &str) {
        let sender = self.phase_sender(project_id).await;
        let delay = self.config.status_reset_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.borrow().is_terminal() {
                sender.send_replace(SyncPhase::Idle);
            }
        });
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(SyncError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Group target tokens into per-corpus word lists, a bounded chunk at a
/// time, yielding to the scheduler between chunks.
async fn format_word_lists(
    tokens: &[TokenRecord],
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<HashMap<String, Vec<String>>> {
    let mut words: HashMap<String, Vec<String>> = HashMap::new();
    for chunk in tokens.chunks(chunk_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(SyncError::Canceled);
        }
        for token in chunk {
            words
                .entry(token.corpus_id.clone())
                .or_default()
                .push(token.text.clone());
        }
        tokio::task::yield_now().await;
    }
    Ok(words)
}
