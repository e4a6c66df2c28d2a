use crate::cache::OptimisticList;
use crate::data::{CategoryId, DictionaryEntryRef, FavoriteRow, RemoveFavorite};
use crate::error::FavoritesError;
use crate::gateway::{AuthProvider, RemoteFavorites, Session};
use crate::key::{FavoriteKeySource, FavoriteWordKey, build_key};
use crate::lock::{PendingGuard, PendingMap};
use crate::selection::SelectionStore;
use parking_lot::RwLock;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FLOW_ID_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Language tag sent with every gloss.
    pub gloss_lang: String,
    /// Rows requested per LIST page during a reload.
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gloss_lang: "en".to_string(),
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleOptions {
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Forces the direction instead of deriving it from the cache.
    #[serde(default)]
    pub action: Option<ToggleAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToggleOutcome {
    Added { senses: usize },
    Removed,
    /// Another toggle on the same word was still in flight.
    Dropped,
    Anonymous,
    /// Empty headword.
    Ignored,
}

/// Correlation id of one toggle transaction, only used in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowId(String);

impl FlowId {
    pub fn mint() -> Self {
        let suffix: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(FLOW_ID_LEN)
            .map(char::from)
            .collect();
        FlowId(suffix)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct PendingOperation {
    flow_id: FlowId,
    snapshot: Vec<FavoriteRow>,
}

enum Plan {
    Add { category_id: CategoryId },
    Remove { category_id: CategoryId },
}

/// Client-side favorites state: the optimistic cache plus the toggle engine
/// that keeps it in step with the remote service.
#[derive(Clone)]
pub struct FavoritesEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    gateway: Arc<dyn RemoteFavorites>,
    auth: Arc<dyn AuthProvider>,
    selection: Arc<dyn SelectionStore>,
    config: EngineConfig,
    cache: RwLock<OptimisticList>,
    pending: PendingMap<FavoriteWordKey, PendingOperation>,
}

impl FavoritesEngine {
    pub fn new(
        gateway: Arc<dyn RemoteFavorites>,
        auth: Arc<dyn AuthProvider>,
        selection: Arc<dyn SelectionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                gateway,
                auth,
                selection,
                config,
                cache: RwLock::new(OptimisticList::default()),
                pending: PendingMap::new(),
            }),
        }
    }

    pub fn is_favorited<S: FavoriteKeySource + ?Sized>(&self, entry: &S) -> bool {
        self.shared.cache.read().contains(&build_key(entry))
    }

    pub fn is_pending<S: FavoriteKeySource + ?Sized>(&self, entry: &S) -> bool {
        self.shared.pending.contains(&build_key(entry))
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn favorites(&self) -> Vec<FavoriteRow> {
        self.shared.cache.read().snapshot()
    }

    /// Category whose favorites the cache mirrors; `None` means all of them.
    pub fn selected_category(&self) -> Option<CategoryId> {
        let session = self.shared.auth.current_session()?;
        self.shared.selection.selected(&session.user_id)
    }

    /// Replaces the cache with the active view's rows from the remote service.
    ///
    /// Anonymous callers get an empty list.
    pub async fn reload(&self) -> Result<usize, FavoritesError> {
        let rows = match self.shared.auth.current_session() {
            Some(session) => self.fetch_view(&session).await?,
            None => Vec::new(),
        };
        let count = rows.len();
        self.shared.cache.write().replace(rows);
        debug!(rows = count, "favorites reloaded");
        Ok(count)
    }

    pub async fn select_category(
        &self,
        category_id: Option<CategoryId>,
    ) -> Result<usize, FavoritesError> {
        let session = self
            .shared
            .auth
            .current_session()
            .ok_or(FavoritesError::NotAuthenticated)?;
        self.shared
            .selection
            .set_selected(&session.user_id, category_id);
        info!(category = ?category_id, "favorites category selected");
        self.reload().await
    }

    /// Adds the entry to favorites, or removes it if it is already there.
    ///
    /// The cache is updated before any remote call and rolled back if the
    /// remote fan-out or the follow-up reload fails. A toggle on a word that
    /// already has one in flight returns [`ToggleOutcome::Dropped`] untouched.
    pub async fn toggle_favorite(
        &self,
        entry: &DictionaryEntryRef,
        options: ToggleOptions,
    ) -> Result<ToggleOutcome, FavoritesError> {
        let Some(session) = self.shared.auth.current_session() else {
            debug!(headword = %entry.headword, "ignoring toggle from anonymous caller");
            return Ok(ToggleOutcome::Anonymous);
        };
        if entry.headword.trim().is_empty() {
            return Ok(ToggleOutcome::Ignored);
        }
        let key = build_key(entry);
        if self.shared.pending.contains(&key) {
            debug!(%key, "toggle already in flight, dropping request");
            return Ok(ToggleOutcome::Dropped);
        }
        let category_id = options
            .category_id
            .or_else(|| self.shared.selection.selected(&session.user_id));
        let flow_id = FlowId::mint();

        let (plan, existed_before, guard) = {
            let mut cache = self.shared.cache.write();
            let existed_before = cache.contains(&key);
            let action = options.action.unwrap_or(if existed_before {
                ToggleAction::Remove
            } else {
                ToggleAction::Add
            });
            let plan = match (action, category_id) {
                (ToggleAction::Add, Some(category_id)) => Plan::Add { category_id },
                (ToggleAction::Remove, Some(category_id)) => Plan::Remove { category_id },
                (ToggleAction::Add, None) => {
                    return Err(FavoritesError::validation(format!(
                        "no category selected to add {:?} to",
                        entry.headword
                    )));
                }
                (ToggleAction::Remove, None) => {
                    return Err(FavoritesError::validation(format!(
                        "no category selected to remove {:?} from",
                        entry.headword
                    )));
                }
            };
            let operation = PendingOperation {
                flow_id: flow_id.clone(),
                snapshot: cache.snapshot(),
            };
            let Some(guard) = self.shared.pending.try_acquire(key.clone(), operation) else {
                debug!(%key, "toggle already in flight, dropping request");
                return Ok(ToggleOutcome::Dropped);
            };
            match &plan {
                Plan::Remove { .. } => {
                    cache.remove_identity(&key);
                }
                Plan::Add { category_id } => {
                    cache.insert_front(FavoriteRow::optimistic(entry, Some(*category_id)));
                }
            }
            (plan, existed_before, guard)
        };

        let txn = Transaction {
            shared: &self.shared,
            key,
            guard: Some(guard),
        };
        info!(flow = %flow_id, key = %txn.key, "favorite toggle started");

        let fanout = match plan {
            Plan::Remove { category_id } => self
                .remove_remote(&session, entry, category_id)
                .await
                .map(|()| ToggleOutcome::Removed),
            Plan::Add { category_id } => {
                self.add_remote(&session, entry, category_id, existed_before, &flow_id)
                    .await
            }
        };
        let outcome = match fanout {
            Ok(outcome) => outcome,
            Err(err) => {
                txn.rollback(&err);
                return Err(err);
            }
        };
        match self.fetch_view(&session).await {
            Ok(rows) => {
                txn.commit(rows);
                info!(flow = %flow_id, outcome = ?outcome, "favorite toggle committed");
                Ok(outcome)
            }
            Err(err) => {
                txn.rollback(&err);
                Err(err)
            }
        }
    }

    async fn remove_remote(
        &self,
        session: &Session,
        entry: &DictionaryEntryRef,
        category_id: CategoryId,
    ) -> Result<(), FavoritesError> {
        let request = RemoveFavorite {
            headword: entry.headword.clone(),
            canonical_pos: entry.canonical_pos.clone(),
            category_id,
        };
        self.shared
            .gateway
            .remove_favorite(session, &request)
            .await
            .map_err(FavoritesError::from)
    }

    async fn add_remote(
        &self,
        session: &Session,
        entry: &DictionaryEntryRef,
        category_id: CategoryId,
        existed_before: bool,
        flow_id: &FlowId,
    ) -> Result<ToggleOutcome, FavoritesError> {
        let payloads = entry.add_payloads(Some(category_id), &self.shared.config.gloss_lang);
        let total = payloads.len();
        for (written, payload) in payloads.iter().enumerate() {
            if let Err(err) = self.shared.gateway.add_favorite(session, payload).await {
                if written > 0 {
                    self.compensate_partial_add(
                        session,
                        entry,
                        category_id,
                        existed_before,
                        flow_id,
                    )
                    .await;
                    warn!(flow = %flow_id, written, total, "favorite fan-out failed part way");
                }
                return Err(err.into());
            }
        }
        Ok(ToggleOutcome::Added { senses: total })
    }

    /// Undoes the sense rows a failed fan-out already wrote, when the cache
    /// proves the word had no rows in that category beforehand.
    async fn compensate_partial_add(
        &self,
        session: &Session,
        entry: &DictionaryEntryRef,
        category_id: CategoryId,
        existed_before: bool,
        flow_id: &FlowId,
    ) {
        let view = self.shared.selection.selected(&session.user_id);
        if existed_before || view.is_some_and(|view| view != category_id) {
            warn!(
                flow = %flow_id,
                category = %category_id,
                "leaving partially written senses until the next reload"
            );
            return;
        }
        if let Err(err) = self.remove_remote(session, entry, category_id).await {
            warn!(flow = %flow_id, error = %err, "failed to undo partially written senses");
        }
    }

    async fn fetch_view(&self, session: &Session) -> Result<Vec<FavoriteRow>, FavoritesError> {
        let view = self.shared.selection.selected(&session.user_id);
        let page_size = self.shared.config.page_size.max(1);
        let mut rows = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .shared
                .gateway
                .list_favorites(session, view, cursor.take(), page_size)
                .await?;
            rows.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(rows)
    }
}

/// Lock and rollback point of one toggle; rolls back if dropped unfinished.
struct Transaction<'a> {
    shared: &'a EngineShared,
    key: FavoriteWordKey,
    guard: Option<PendingGuard<'a, FavoriteWordKey, PendingOperation>>,
}

impl Transaction<'_> {
    fn commit(mut self, rows: Vec<FavoriteRow>) {
        let mut cache = self.shared.cache.write();
        cache.replace(rows);
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }

    fn rollback(mut self, err: &FavoritesError) {
        self.restore(&err.to_string());
    }

    fn restore(&mut self, reason: &str) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mut cache = self.shared.cache.write();
        if let Some(operation) = guard.release() {
            cache.restore_identity(&operation.snapshot, &self.key);
            warn!(
                flow = %operation.flow_id,
                key = %self.key,
                reason,
                "favorite toggle rolled back"
            );
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.restore("transaction abandoned");
    }
}
