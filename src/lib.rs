mod cache;
mod categories;
mod data;
mod engine;
mod error;
mod gateway;
mod key;
mod lock;
mod memory;
mod selection;
#[cfg(test)]
mod testing;
#[cfg(feature = "web")]
pub mod web;

pub use cache::OptimisticList;
pub use categories::CategoryController;
pub use data::{
    AddFavorite, Category, CategoryId, DictionaryEntryRef, FavoritePage, FavoriteRow,
    RemoveFavorite, Sense,
};
pub use engine::{
    EngineConfig, FavoritesEngine, FlowId, ToggleAction, ToggleOptions, ToggleOutcome,
};
pub use error::{FavoritesError, GatewayError};
pub use gateway::{AuthProvider, GatewayResult, RemoteFavorites, Session, StaticSession};
pub use key::{FavoriteKeySource, FavoriteWordKey, build_key, key_for};
pub use lock::{PendingGuard, PendingMap};
pub use memory::MemoryFavoritesService;
pub use selection::{JsonFileSelectionStore, MemorySelectionStore, SelectionStore};

use std::sync::Arc;

/// Favorites engine and category controller wired to the same collaborators.
///
/// This is the whole surface a UI layer talks to.
#[derive(Clone)]
pub struct FavoritesWorkspace {
    pub favorites: FavoritesEngine,
    pub categories: CategoryController,
}

impl FavoritesWorkspace {
    pub fn new(
        gateway: Arc<dyn RemoteFavorites>,
        auth: Arc<dyn AuthProvider>,
        selection: Arc<dyn SelectionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            favorites: FavoritesEngine::new(
                gateway.clone(),
                auth.clone(),
                selection.clone(),
                config,
            ),
            categories: CategoryController::new(gateway, auth, selection),
        }
    }

    /// Loads categories and the active favorites view.
    ///
    /// A selection pointing at a category that no longer exists is cleared
    /// before the favorites are fetched.
    pub async fn load(&self) -> Result<(), FavoritesError> {
        let categories = self.categories.reload().await?;
        if let Some(selected) = self.favorites.selected_category() {
            if !categories.iter().any(|category| category.id == selected) {
                self.favorites.select_category(None).await?;
                return Ok(());
            }
        }
        self.favorites.reload().await?;
        Ok(())
    }
}
