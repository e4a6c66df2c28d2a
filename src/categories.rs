use crate::data::{Category, CategoryId};
use crate::error::FavoritesError;
use crate::gateway::{AuthProvider, RemoteFavorites, Session};
use crate::key::normalize;
use crate::lock::{PendingGuard, PendingMap};
use crate::selection::SelectionStore;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Create/rename/reorder/archive for favorites categories.
///
/// Operations are strictly sequential: while one is being saved, every other
/// call fails with [`FavoritesError::Saving`]. Nothing is applied locally until
/// the remote service confirms, after which the list is reloaded.
#[derive(Clone)]
pub struct CategoryController {
    shared: Arc<CategoryShared>,
}

struct CategoryShared {
    gateway: Arc<dyn RemoteFavorites>,
    auth: Arc<dyn AuthProvider>,
    selection: Arc<dyn SelectionStore>,
    categories: RwLock<Vec<Category>>,
    saving: PendingMap<(), ()>,
}

impl CategoryController {
    pub fn new(
        gateway: Arc<dyn RemoteFavorites>,
        auth: Arc<dyn AuthProvider>,
        selection: Arc<dyn SelectionStore>,
    ) -> Self {
        Self {
            shared: Arc::new(CategoryShared {
                gateway,
                auth,
                selection,
                categories: RwLock::new(Vec::new()),
                saving: PendingMap::new(),
            }),
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        self.shared.categories.read().clone()
    }

    pub fn is_saving(&self) -> bool {
        self.shared.saving.contains(&())
    }

    pub async fn reload(&self) -> Result<Vec<Category>, FavoritesError> {
        let session = self.session()?;
        self.fetch(&session).await
    }

    pub async fn create(&self, name: &str) -> Result<Category, FavoritesError> {
        let session = self.session()?;
        let _saving = self.begin_saving()?;
        let name = validate_name(name)?;
        if self.name_taken(&name, None) {
            return Err(duplicate_name(&name));
        }
        let created = self
            .shared
            .gateway
            .create_category(&session, &name)
            .await?;
        info!(id = %created.id, name = %created.name, "category created");
        self.refresh_after_save(&session).await;
        Ok(created)
    }

    pub async fn rename(&self, id: CategoryId, name: &str) -> Result<(), FavoritesError> {
        let session = self.session()?;
        let _saving = self.begin_saving()?;
        let name = validate_name(name)?;
        self.ensure_known(id)?;
        if self.name_taken(&name, Some(id)) {
            return Err(duplicate_name(&name));
        }
        let result = self
            .shared
            .gateway
            .rename_category(&session, id, &name)
            .await
            .map_err(FavoritesError::from);
        self.finish(&session, result).await?;
        info!(%id, %name, "category renamed");
        Ok(())
    }

    /// Reorders categories; `ids` must list every loaded category exactly once.
    pub async fn reorder(&self, ids: &[CategoryId]) -> Result<(), FavoritesError> {
        let session = self.session()?;
        let _saving = self.begin_saving()?;
        self.validate_permutation(ids)?;
        self.shared
            .gateway
            .reorder_categories(&session, ids)
            .await?;
        info!(count = ids.len(), "categories reordered");
        self.refresh_after_save(&session).await;
        Ok(())
    }

    /// Archives a category. Its favorite rows stay on the remote side.
    pub async fn archive(&self, id: CategoryId) -> Result<(), FavoritesError> {
        let session = self.session()?;
        let _saving = self.begin_saving()?;
        self.ensure_known(id)?;
        let result = self
            .shared
            .gateway
            .archive_category(&session, id)
            .await
            .map_err(FavoritesError::from);
        self.finish(&session, result).await?;
        if self.shared.selection.selected(&session.user_id) == Some(id) {
            self.shared.selection.set_selected(&session.user_id, None);
        }
        info!(%id, "category archived");
        Ok(())
    }

    fn session(&self) -> Result<Session, FavoritesError> {
        self.shared
            .auth
            .current_session()
            .ok_or(FavoritesError::NotAuthenticated)
    }

    fn begin_saving(&self) -> Result<PendingGuard<'_, (), ()>, FavoritesError> {
        self.shared
            .saving
            .try_acquire((), ())
            .ok_or(FavoritesError::Saving)
    }

    async fn fetch(&self, session: &Session) -> Result<Vec<Category>, FavoritesError> {
        let mut categories = self.shared.gateway.list_categories(session).await?;
        categories.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
        *self.shared.categories.write() = categories.clone();
        Ok(categories)
    }

    /// Reloads after a confirmed save; a failure here only goes to the log.
    async fn refresh_after_save(&self, session: &Session) {
        if let Err(err) = self.fetch(session).await {
            warn!(error = %err, "category list reload failed after save");
        }
    }

    /// Reloads on success and on not-found, so a stale list heals itself.
    async fn finish(
        &self,
        session: &Session,
        result: Result<(), FavoritesError>,
    ) -> Result<(), FavoritesError> {
        match result {
            Ok(()) => {
                self.refresh_after_save(session).await;
                Ok(())
            }
            Err(err @ FavoritesError::NotFound(_)) => {
                self.refresh_after_save(session).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn ensure_known(&self, id: CategoryId) -> Result<(), FavoritesError> {
        if self.shared.categories.read().iter().any(|c| c.id == id) {
            Ok(())
        } else {
            Err(FavoritesError::validation(format!("unknown category id {id}")))
        }
    }

    fn name_taken(&self, name: &str, except: Option<CategoryId>) -> bool {
        let wanted = normalize(name);
        self.shared
            .categories
            .read()
            .iter()
            .any(|c| Some(c.id) != except && normalize(&c.name) == wanted)
    }

    fn validate_permutation(&self, ids: &[CategoryId]) -> Result<(), FavoritesError> {
        let known: HashSet<CategoryId> = self.shared.categories.read().iter().map(|c| c.id).collect();
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                return Err(FavoritesError::validation(format!(
                    "category {id} listed more than once"
                )));
            }
            if !known.contains(id) {
                return Err(FavoritesError::validation(format!("unknown category id {id}")));
            }
        }
        let mut missing: Vec<CategoryId> = known.difference(&seen).copied().collect();
        if !missing.is_empty() {
            missing.sort();
            let listed: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(FavoritesError::validation(format!(
                "reorder must list every category; missing {}",
                listed.join(", ")
            )));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<String, FavoritesError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FavoritesError::validation("category name cannot be empty"));
    }
    Ok(trimmed.to_string())
}

fn duplicate_name(name: &str) -> FavoritesError {
    FavoritesError::Conflict(format!("a category named {name:?} already exists"))
}
