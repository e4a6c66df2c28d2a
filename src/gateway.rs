use crate::data::{AddFavorite, Category, CategoryId, FavoritePage, RemoveFavorite};
use crate::error::GatewayError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub type GatewayResult<T> = Result<T, GatewayError>;

/// An authenticated session as handed out by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

/// Source of the current session; `None` means the caller is anonymous.
pub trait AuthProvider: Send + Sync {
    fn current_session(&self) -> Option<Session>;
}

/// Auth provider holding one session that can be swapped at login/logout.
#[derive(Debug, Default)]
pub struct StaticSession {
    session: RwLock<Option<Session>>,
}

impl StaticSession {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub fn set(&self, session: Option<Session>) {
        *self.session.write() = session;
    }
}

impl AuthProvider for StaticSession {
    fn current_session(&self) -> Option<Session> {
        self.session.read().clone()
    }
}

/// Request/response contract of the remote favorites service.
///
/// Every call carries the caller's session; implementations reject unknown
/// sessions with [`GatewayError::Unauthenticated`].
#[async_trait]
pub trait RemoteFavorites: Send + Sync {
    async fn list_favorites(
        &self,
        session: &Session,
        category_id: Option<CategoryId>,
        cursor: Option<String>,
        limit: usize,
    ) -> GatewayResult<FavoritePage>;

    /// Upserts a single sense row, keyed by identity, sense index and category.
    async fn add_favorite(&self, session: &Session, request: &AddFavorite) -> GatewayResult<()>;

    /// Deletes every sense row of the identity within the category.
    async fn remove_favorite(&self, session: &Session, request: &RemoveFavorite)
    -> GatewayResult<()>;

    /// Non-archived categories ordered by `order_index`.
    async fn list_categories(&self, session: &Session) -> GatewayResult<Vec<Category>>;

    async fn create_category(&self, session: &Session, name: &str) -> GatewayResult<Category>;

    async fn rename_category(
        &self,
        session: &Session,
        id: CategoryId,
        name: &str,
    ) -> GatewayResult<()>;

    async fn reorder_categories(&self, session: &Session, ids: &[CategoryId]) -> GatewayResult<()>;

    async fn archive_category(&self, session: &Session, id: CategoryId) -> GatewayResult<()>;
}
