use crate::data::{AddFavorite, Category, CategoryId, FavoritePage, RemoveFavorite};
use crate::error::GatewayError;
use crate::gateway::{GatewayResult, RemoteFavorites, Session, StaticSession};
use crate::memory::MemoryFavoritesService;
use crate::selection::MemorySelectionStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Add,
    Remove,
    ListCategories,
    Create,
    Rename,
    Reorder,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(Option<CategoryId>),
    Add(AddFavorite),
    Remove(RemoveFavorite),
    ListCategories,
    Create(String),
    Rename(CategoryId, String),
    Reorder(Vec<CategoryId>),
    Archive(CategoryId),
}

impl Call {
    fn op(&self) -> Op {
        match self {
            Call::List(_) => Op::List,
            Call::Add(_) => Op::Add,
            Call::Remove(_) => Op::Remove,
            Call::ListCategories => Op::ListCategories,
            Call::Create(_) => Op::Create,
            Call::Rename(..) => Op::Rename,
            Call::Reorder(_) => Op::Reorder,
            Call::Archive(_) => Op::Archive,
        }
    }
}

struct Failure {
    op: Op,
    skip: usize,
    error: GatewayError,
}

/// Gateway double over the in-memory service that records every call, fails
/// chosen calls, and can park mutating calls until the test opens the gate.
pub struct ScriptedGateway {
    pub service: MemoryFavoritesService,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Vec<Failure>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            service: MemoryFavoritesService::ephemeral(),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    /// Fails the `(skip + 1)`-th upcoming call of `op` with `error`.
    pub fn fail(&self, op: Op, skip: usize, error: GatewayError) {
        self.failures.lock().push(Failure { op, skip, error });
    }

    /// Parks mutating calls until [`ScriptedGateway::open_gate`] is called.
    pub fn close_gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.op() == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, call: Call, mutating: bool) -> GatewayResult<()> {
        let op = call.op();
        self.calls.lock().push(call);
        if mutating {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
        }
        let mut failures = self.failures.lock();
        if let Some(position) = failures.iter().position(|failure| failure.op == op) {
            if failures[position].skip == 0 {
                return Err(failures.remove(position).error);
            }
            failures[position].skip -= 1;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFavorites for ScriptedGateway {
    async fn list_favorites(
        &self,
        session: &Session,
        category_id: Option<CategoryId>,
        cursor: Option<String>,
        limit: usize,
    ) -> GatewayResult<FavoritePage> {
        self.enter(Call::List(category_id), false).await?;
        self.service
            .list_favorites(session, category_id, cursor, limit)
            .await
    }

    async fn add_favorite(&self, session: &Session, request: &AddFavorite) -> GatewayResult<()> {
        self.enter(Call::Add(request.clone()), true).await?;
        self.service.add_favorite(session, request).await
    }

    async fn remove_favorite(
        &self,
        session: &Session,
        request: &RemoveFavorite,
    ) -> GatewayResult<()> {
        self.enter(Call::Remove(request.clone()), true).await?;
        self.service.remove_favorite(session, request).await
    }

    async fn list_categories(&self, session: &Session) -> GatewayResult<Vec<Category>> {
        self.enter(Call::ListCategories, false).await?;
        self.service.list_categories(session).await
    }

    async fn create_category(&self, session: &Session, name: &str) -> GatewayResult<Category> {
        self.enter(Call::Create(name.to_string()), true).await?;
        self.service.create_category(session, name).await
    }

    async fn rename_category(
        &self,
        session: &Session,
        id: CategoryId,
        name: &str,
    ) -> GatewayResult<()> {
        self.enter(Call::Rename(id, name.to_string()), true).await?;
        self.service.rename_category(session, id, name).await
    }

    async fn reorder_categories(&self, session: &Session, ids: &[CategoryId]) -> GatewayResult<()> {
        self.enter(Call::Reorder(ids.to_vec()), true).await?;
        self.service.reorder_categories(session, ids).await
    }

    async fn archive_category(&self, session: &Session, id: CategoryId) -> GatewayResult<()> {
        self.enter(Call::Archive(id), true).await?;
        self.service.archive_category(session, id).await
    }
}

/// Everything a test needs to drive the engine and the controller.
pub struct Fixture {
    pub gateway: Arc<ScriptedGateway>,
    pub auth: Arc<StaticSession>,
    pub selection: Arc<MemorySelectionStore>,
    pub session: Session,
}

impl Fixture {
    pub fn new() -> Self {
        let gateway = Arc::new(ScriptedGateway::new());
        let session = gateway.service.issue_session("ana");
        Self {
            gateway,
            auth: Arc::new(StaticSession::new(Some(session.clone()))),
            selection: Arc::new(MemorySelectionStore::new()),
            session,
        }
    }

    pub fn transport(message: &str) -> GatewayError {
        GatewayError::Transport(message.to_string())
    }
}
