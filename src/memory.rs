use crate::data::{
    AddFavorite, Category, CategoryId, FavoritePage, FavoriteRow, RemoveFavorite, now_ts,
};
use crate::error::GatewayError;
use crate::gateway::{GatewayResult, RemoteFavorites, Session};
use crate::key::{FavoriteKeySource, key_for, normalize};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const TOKEN_LEN: usize = 32;

/// In-process favorites service speaking the same contract as the remote one.
///
/// With a path it behaves like a tiny durable store: the JSON state is loaded
/// on open and rewritten after every successful mutation.
pub struct MemoryFavoritesService {
    inner: RwLock<ServiceData>,
    path: Option<PathBuf>,
}

#[derive(Default, Serialize, Deserialize)]
struct ServiceData {
    #[serde(skip)]
    sessions: HashMap<String, String>,
    users: BTreeMap<String, UserData>,
    next_category_id: u64,
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct UserData {
    categories: Vec<StoredCategory>,
    /// Oldest first; listings walk it backwards.
    favorites: Vec<FavoriteRow>,
}

#[derive(Clone, Serialize, Deserialize)]
struct StoredCategory {
    id: CategoryId,
    name: String,
    order_index: u32,
    archived: bool,
}

impl StoredCategory {
    fn as_category(&self) -> Category {
        Category {
            id: self.id,
            name: self.name.clone(),
            order_index: self.order_index,
        }
    }
}

impl UserData {
    fn active_category(&self, id: CategoryId) -> Option<&StoredCategory> {
        self.categories
            .iter()
            .find(|category| category.id == id && !category.archived)
    }

    fn name_taken(&self, name: &str, except: Option<CategoryId>) -> bool {
        let wanted = normalize(name);
        self.categories.iter().any(|category| {
            !category.archived && Some(category.id) != except && normalize(&category.name) == wanted
        })
    }
}

impl MemoryFavoritesService {
    pub fn ephemeral() -> Self {
        Self {
            inner: RwLock::new(ServiceData::default()),
            path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => ServiceData::default(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            inner: RwLock::new(data),
            path: Some(path),
        })
    }

    /// Logs `user_id` in and returns a fresh session token.
    pub fn issue_session(&self, user_id: &str) -> Session {
        let token: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let mut guard = self.inner.write();
        guard.sessions.insert(token.clone(), user_id.to_string());
        guard.users.entry(user_id.to_string()).or_default();
        Session {
            user_id: user_id.to_string(),
            token,
        }
    }

    pub fn revoke_session(&self, token: &str) {
        self.inner.write().sessions.remove(token);
    }

    fn read<T>(
        &self,
        session: &Session,
        f: impl FnOnce(&UserData) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let guard = self.inner.read();
        let user = authorize(&guard, session)?;
        match guard.users.get(&user) {
            Some(data) => f(data),
            None => f(&UserData::default()),
        }
    }

    fn mutate<T>(
        &self,
        session: &Session,
        f: impl FnOnce(&mut UserData, &mut u64) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let mut guard = self.inner.write();
        let user = authorize(&guard, session)?;
        let ServiceData {
            users,
            next_category_id,
            ..
        } = &mut *guard;
        let data = users.entry(user.clone()).or_default();
        let previous = (data.clone(), *next_category_id);
        let result = f(data, next_category_id).and_then(|value| {
            // Written under the lock so snapshots reach disk in mutation order.
            if let Some(path) = &self.path {
                persist(path, &guard)?;
            }
            Ok(value)
        });
        if result.is_err() {
            let (data, next_category_id) = previous;
            guard.users.insert(user, data);
            guard.next_category_id = next_category_id;
        }
        result
    }
}

fn persist(path: &Path, data: &ServiceData) -> GatewayResult<()> {
    let bytes =
        serde_json::to_vec_pretty(data).map_err(|err| GatewayError::Transport(err.to_string()))?;
    write_atomically(path, &bytes).map_err(|err| {
        GatewayError::Transport(format!("failed to persist {}: {err}", path.display()))
    })
}

fn authorize(data: &ServiceData, session: &Session) -> GatewayResult<String> {
    match data.sessions.get(&session.token) {
        Some(user) if *user == session.user_id => Ok(user.clone()),
        _ => Err(GatewayError::Unauthenticated),
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn parse_cursor(cursor: Option<String>) -> GatewayResult<usize> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| GatewayError::Transport(format!("malformed cursor {raw:?}"))),
    }
}

#[async_trait]
impl RemoteFavorites for MemoryFavoritesService {
    async fn list_favorites(
        &self,
        session: &Session,
        category_id: Option<CategoryId>,
        cursor: Option<String>,
        limit: usize,
    ) -> GatewayResult<FavoritePage> {
        let offset = parse_cursor(cursor)?;
        let limit = limit.max(1);
        self.read(session, |data| {
            let matching: Vec<&FavoriteRow> = data
                .favorites
                .iter()
                .rev()
                .filter(|row| category_id.is_none() || row.category_id == category_id)
                .collect();
            let items: Vec<FavoriteRow> = matching
                .iter()
                .skip(offset)
                .take(limit)
                .map(|row| (*row).clone())
                .collect();
            let consumed = offset + items.len();
            let next_cursor = (consumed < matching.len()).then(|| consumed.to_string());
            Ok(FavoritePage { items, next_cursor })
        })
    }

    async fn add_favorite(&self, session: &Session, request: &AddFavorite) -> GatewayResult<()> {
        self.mutate(session, |data, _| {
            if let Some(id) = request.category_id {
                if data.active_category(id).is_none() {
                    return Err(GatewayError::NotFound(format!("category {id} does not exist")));
                }
            }
            let key = key_for(&request.headword, &request.canonical_pos);
            let existing = data.favorites.iter_mut().find(|row| {
                row.sense_index == request.sense_index
                    && row.category_id == request.category_id
                    && row.favorite_key() == key
            });
            match existing {
                Some(row) => {
                    row.gloss = request.gloss.clone();
                    row.gloss_lang = request.gloss_lang.clone();
                }
                None => data.favorites.push(FavoriteRow {
                    headword: request.headword.clone(),
                    canonical_pos: request.canonical_pos.clone(),
                    sense_index: request.sense_index,
                    gloss: request.gloss.clone(),
                    gloss_lang: request.gloss_lang.clone(),
                    category_id: request.category_id,
                    created_at: now_ts(),
                }),
            }
            debug!(%key, sense = request.sense_index, "stored favorite sense");
            Ok(())
        })
    }

    async fn remove_favorite(
        &self,
        session: &Session,
        request: &RemoveFavorite,
    ) -> GatewayResult<()> {
        self.mutate(session, |data, _| {
            if !data
                .categories
                .iter()
                .any(|category| category.id == request.category_id)
            {
                return Err(GatewayError::NotFound(format!(
                    "category {} does not exist",
                    request.category_id
                )));
            }
            let key = key_for(&request.headword, &request.canonical_pos);
            data.favorites.retain(|row| {
                row.category_id != Some(request.category_id) || row.favorite_key() != key
            });
            Ok(())
        })
    }

    async fn list_categories(&self, session: &Session) -> GatewayResult<Vec<Category>> {
        self.read(session, |data| {
            let mut categories: Vec<Category> = data
                .categories
                .iter()
                .filter(|category| !category.archived)
                .map(StoredCategory::as_category)
                .collect();
            categories.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.id.cmp(&b.id)));
            Ok(categories)
        })
    }

    async fn create_category(&self, session: &Session, name: &str) -> GatewayResult<Category> {
        let name = name.trim().to_string();
        self.mutate(session, |data, next_id| {
            if data.name_taken(&name, None) {
                return Err(GatewayError::Conflict(format!(
                    "a category named {name:?} already exists"
                )));
            }
            *next_id += 1;
            let order_index = data
                .categories
                .iter()
                .filter(|category| !category.archived)
                .map(|category| category.order_index + 1)
                .max()
                .unwrap_or(0);
            let stored = StoredCategory {
                id: CategoryId(*next_id),
                name,
                order_index,
                archived: false,
            };
            let category = stored.as_category();
            data.categories.push(stored);
            Ok(category)
        })
    }

    async fn rename_category(
        &self,
        session: &Session,
        id: CategoryId,
        name: &str,
    ) -> GatewayResult<()> {
        let name = name.trim().to_string();
        self.mutate(session, |data, _| {
            if data.active_category(id).is_none() {
                return Err(GatewayError::NotFound(format!("category {id} does not exist")));
            }
            if data.name_taken(&name, Some(id)) {
                return Err(GatewayError::Conflict(format!(
                    "a category named {name:?} already exists"
                )));
            }
            if let Some(category) = data.categories.iter_mut().find(|c| c.id == id) {
                category.name = name;
            }
            Ok(())
        })
    }

    async fn reorder_categories(&self, session: &Session, ids: &[CategoryId]) -> GatewayResult<()> {
        self.mutate(session, |data, _| {
            for id in ids {
                if data.active_category(*id).is_none() {
                    return Err(GatewayError::NotFound(format!("category {id} does not exist")));
                }
            }
            let mut order: Vec<CategoryId> = Vec::with_capacity(ids.len());
            for id in ids {
                if !order.contains(id) {
                    order.push(*id);
                }
            }
            let mut rest: Vec<&StoredCategory> = data
                .categories
                .iter()
                .filter(|category| !category.archived && !order.contains(&category.id))
                .collect();
            rest.sort_by_key(|category| category.order_index);
            let tail: Vec<CategoryId> = rest.iter().map(|category| category.id).collect();
            order.extend(tail);
            for (position, id) in order.iter().enumerate() {
                if let Some(category) = data.categories.iter_mut().find(|c| c.id == *id) {
                    category.order_index = position as u32;
                }
            }
            Ok(())
        })
    }

    async fn archive_category(&self, session: &Session, id: CategoryId) -> GatewayResult<()> {
        self.mutate(session, |data, _| {
            match data
                .categories
                .iter_mut()
                .find(|category| category.id == id && !category.archived)
            {
                Some(category) => {
                    category.archived = true;
                    Ok(())
                }
                None => Err(GatewayError::NotFound(format!("category {id} does not exist"))),
            }
        })
    }
}
