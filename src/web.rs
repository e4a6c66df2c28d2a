use crate::{
    Category, CategoryId, DictionaryEntryRef, EngineConfig, FavoriteRow, FavoritesError,
    FavoritesWorkspace, JsonFileSelectionStore, MemoryFavoritesService, MemorySelectionStore,
    SelectionStore, Session, StaticSession, ToggleAction, ToggleOptions, ToggleOutcome, build_key,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use cookie::{Cookie, SameSite};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::info;

type SharedState = Arc<AppState>;
const SESSION_COOKIE: &str = "glossbook_session";

pub struct AppState {
    service: Arc<MemoryFavoritesService>,
    selection: Arc<dyn SelectionStore>,
    engine: EngineConfig,
    sessions: RwLock<SessionTable>,
}

/// One workspace per user; `tokens` maps the live cookie of each user to it.
#[derive(Default)]
struct SessionTable {
    tokens: HashMap<String, String>,
    users: HashMap<String, UserSlot>,
}

struct UserSlot {
    token: String,
    auth: Arc<StaticSession>,
    workspace: FavoritesWorkspace,
}

impl AppState {
    pub fn new(
        service: Arc<MemoryFavoritesService>,
        selection: Arc<dyn SelectionStore>,
        engine: EngineConfig,
    ) -> Self {
        Self {
            service,
            selection,
            engine,
            sessions: RwLock::new(SessionTable::default()),
        }
    }

    fn workspace(&self, headers: &HeaderMap) -> Result<FavoritesWorkspace, ApiError> {
        let token = session_token(headers).ok_or_else(ApiError::not_logged_in)?;
        let table = self.sessions.read();
        table
            .tokens
            .get(&token)
            .and_then(|user| table.users.get(user))
            .map(|slot| slot.workspace.clone())
            .ok_or_else(ApiError::not_logged_in)
    }

    fn new_slot(&self, session: &Session) -> UserSlot {
        let auth = Arc::new(StaticSession::new(Some(session.clone())));
        let workspace = FavoritesWorkspace::new(
            self.service.clone(),
            auth.clone(),
            self.selection.clone(),
            self.engine.clone(),
        );
        UserSlot {
            token: session.token.clone(),
            auth,
            workspace,
        }
    }

    /// Binds `session` to the user's workspace, creating it from `fresh` or
    /// on the spot. A previous token of the same user is revoked.
    fn bind(&self, session: &Session, fresh: Option<UserSlot>) -> FavoritesWorkspace {
        let mut table = self.sessions.write();
        let SessionTable { tokens, users } = &mut *table;
        let slot = match users.entry(session.user_id.clone()) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                let stale = std::mem::replace(&mut slot.token, session.token.clone());
                tokens.remove(&stale);
                self.service.revoke_session(&stale);
                slot.auth.set(Some(session.clone()));
                slot
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh.unwrap_or_else(|| self.new_slot(session)))
            }
        };
        tokens.insert(session.token.clone(), session.user_id.clone());
        slot.workspace.clone()
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    /// Where the favorites store keeps its JSON state; in memory when unset.
    pub state_path: Option<PathBuf>,
    pub selection_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            state_path: None,
            selection_path: None,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let service = match &config.state_path {
        Some(path) => MemoryFavoritesService::open(path)?,
        None => MemoryFavoritesService::ephemeral(),
    };
    let selection: Arc<dyn SelectionStore> = match &config.selection_path {
        Some(path) => Arc::new(JsonFileSelectionStore::open(path)),
        None => Arc::new(MemorySelectionStore::new()),
    };
    let state = Arc::new(AppState::new(
        Arc::new(service),
        selection,
        config.engine.clone(),
    ));
    let router = build_router(state);
    info!(
        %config.addr,
        state = ?config.state_path,
        gloss_lang = %config.engine.gloss_lang,
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
        }
    }

    fn not_logged_in() -> Self {
        FavoritesError::NotAuthenticated.into()
    }
}

impl From<FavoritesError> for ApiError {
    fn from(err: FavoritesError) -> Self {
        let status = match &err {
            FavoritesError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            FavoritesError::Validation(_) => StatusCode::BAD_REQUEST,
            FavoritesError::Conflict(_) | FavoritesError::Saving => StatusCode::CONFLICT,
            FavoritesError::NotFound(_) => StatusCode::NOT_FOUND,
            FavoritesError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message, "kind": self.kind });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/session", post(login).delete(logout))
        .route("/api/favorites", get(list_favorites))
        .route("/api/favorites/toggle", post(toggle_favorite))
        .route("/api/favorites/status", get(favorite_status))
        .route("/api/categories", get(list_categories).post(create_category))
        .route("/api/categories/saving", get(categories_saving))
        .route("/api/categories/reorder", post(reorder_categories))
        .route(
            "/api/categories/:id",
            patch(rename_category).delete(archive_category),
        )
        .route("/api/selection", put(select_category))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(token: &str, remove: bool) -> Result<HeaderValue, ApiError> {
    let mut builder = Cookie::build((SESSION_COOKIE, token.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    if remove {
        builder = builder.max_age(cookie::time::Duration::ZERO);
    }
    HeaderValue::from_str(&builder.build().to_string())
        .map_err(|_| ApiError::bad_request("session token is not a valid header value"))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "glossbook-web" }))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    user: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    user: String,
    categories: Vec<Category>,
    favorites: usize,
}

async fn login(
    State(state): State<SharedState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = request.user.trim();
    if user.is_empty() {
        return Err(ApiError::bad_request("`user` is required"));
    }
    let session = state.service.issue_session(user);
    let known = state.sessions.read().users.contains_key(&session.user_id);
    let fresh = if known {
        None
    } else {
        let slot = state.new_slot(&session);
        if let Err(err) = slot.workspace.load().await {
            state.service.revoke_session(&session.token);
            return Err(err.into());
        }
        Some(slot)
    };
    let workspace = state.bind(&session, fresh);
    let payload = LoginResponse {
        user: session.user_id.clone(),
        categories: workspace.categories.categories(),
        favorites: workspace.favorites.favorites().len(),
    };
    info!(user = %session.user_id, "session opened");
    let cookie = session_cookie(&session.token, false)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(payload)).into_response())
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let token = session_token(&headers).ok_or_else(ApiError::not_logged_in)?;
    {
        let mut table = state.sessions.write();
        let SessionTable { tokens, users } = &mut *table;
        if let Some(slot) = tokens.remove(&token).and_then(|user| users.get(&user)) {
            if slot.token == token {
                slot.auth.set(None);
            }
        }
    }
    state.service.revoke_session(&token);
    let cookie = session_cookie(&token, true)?;
    Ok(([(header::SET_COOKIE, cookie)], StatusCode::NO_CONTENT).into_response())
}

#[derive(Debug, Serialize, Deserialize)]
struct FavoritesPayload {
    selected_category: Option<CategoryId>,
    items: Vec<FavoriteRow>,
}

async fn list_favorites(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<FavoritesPayload>, ApiError> {
    let workspace = state.workspace(&headers)?;
    Ok(Json(FavoritesPayload {
        selected_category: workspace.favorites.selected_category(),
        items: workspace.favorites.favorites(),
    }))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    entry: DictionaryEntryRef,
    #[serde(default)]
    category_id: Option<CategoryId>,
    #[serde(default)]
    action: Option<ToggleAction>,
}

async fn toggle_favorite(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>, ApiError> {
    let workspace = state.workspace(&headers)?;
    let options = ToggleOptions {
        category_id: request.category_id,
        action: request.action,
    };
    let outcome = workspace
        .favorites
        .toggle_favorite(&request.entry, options)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    headword: Option<String>,
    pos: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusPayload {
    key: String,
    favorited: bool,
    pending: bool,
}

async fn favorite_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusPayload>, ApiError> {
    let workspace = state.workspace(&headers)?;
    let headword = params
        .headword
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("Query parameter `headword` is required"))?;
    let entry = DictionaryEntryRef::new(headword, params.pos.as_deref().unwrap_or_default());
    Ok(Json(StatusPayload {
        key: build_key(&entry).to_string(),
        favorited: workspace.favorites.is_favorited(&entry),
        pending: workspace.favorites.is_pending(&entry),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct CategoriesPayload {
    categories: Vec<Category>,
    saving: bool,
}

async fn list_categories(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<CategoriesPayload>, ApiError> {
    let workspace = state.workspace(&headers)?;
    Ok(Json(CategoriesPayload {
        categories: workspace.categories.categories(),
        saving: workspace.categories.is_saving(),
    }))
}

async fn categories_saving(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state.workspace(&headers)?;
    Ok(Json(json!({ "saving": workspace.categories.is_saving() })))
}

#[derive(Debug, Deserialize)]
struct NameRequest {
    name: String,
}

async fn create_category(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<NameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state.workspace(&headers)?;
    let category = workspace.categories.create(&request.name).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn rename_category(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(request): Json<NameRequest>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.workspace(&headers)?;
    workspace
        .categories
        .rename(CategoryId(id), &request.name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ReorderRequest {
    ids: Vec<CategoryId>,
}

async fn reorder_categories(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ReorderRequest>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.workspace(&headers)?;
    workspace.categories.reorder(&request.ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_category(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let workspace = state.workspace(&headers)?;
    let id = CategoryId(id);
    let was_selected = workspace.favorites.selected_category() == Some(id);
    workspace.categories.archive(id).await?;
    if was_selected {
        workspace.favorites.reload().await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SelectionRequest {
    #[serde(default)]
    category_id: Option<CategoryId>,
}

async fn select_category(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<FavoritesPayload>, ApiError> {
    let workspace = state.workspace(&headers)?;
    if let Some(id) = request.category_id {
        if !workspace.categories.categories().iter().any(|c| c.id == id) {
            return Err(ApiError::bad_request(format!("unknown category id {id}")));
        }
    }
    workspace
        .favorites
        .select_category(request.category_id)
        .await?;
    Ok(Json(FavoritesPayload {
        selected_category: workspace.favorites.selected_category(),
        items: workspace.favorites.favorites(),
    }))
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use axum::{body, body::Body, http::Request};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryFavoritesService::ephemeral()),
            Arc::new(MemorySelectionStore::new()),
            EngineConfig::default(),
        ));
        build_router(state)
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str, cookie: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login_cookie(router: &Router) -> String {
        let response = send(
            router,
            json_request("POST", "/api/session", None, json!({ "user": "ana" })),
        )
        .await;
        assert!(response.status().is_success());
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        let parsed = Cookie::parse(set_cookie.to_string()).unwrap();
        format!("{}={}", parsed.name(), parsed.value())
    }

    #[tokio::test]
    async fn health_is_public() {
        let router = test_router();
        let response = send(&router, Request::get("/healthz").body(Body::empty()).unwrap()).await;
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn requests_without_session_are_unauthorized() {
        let router = test_router();
        let response = send(&router, Request::get("/api/favorites").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let payload: serde_json::Value = read_json(response).await;
        assert_eq!(payload["kind"], "not_authenticated");
    }

    #[tokio::test]
    async fn toggle_and_status_round_trip() {
        let router = test_router();
        let cookie = login_cookie(&router).await;

        let created = send(
            &router,
            json_request("POST", "/api/categories", Some(&cookie), json!({ "name": "Vocab" })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let vocab: Category = read_json(created).await;

        let selected = send(
            &router,
            json_request(
                "PUT",
                "/api/selection",
                Some(&cookie),
                json!({ "category_id": vocab.id }),
            ),
        )
        .await;
        assert!(selected.status().is_success());

        let toggled = send(
            &router,
            json_request(
                "POST",
                "/api/favorites/toggle",
                Some(&cookie),
                json!({
                    "entry": {
                        "headword": "Haus",
                        "canonicalPos": "Nomen",
                        "senses": ["house", { "gloss": "home" }]
                    }
                }),
            ),
        )
        .await;
        assert!(toggled.status().is_success());
        let outcome: serde_json::Value = read_json(toggled).await;
        assert_eq!(outcome["outcome"], "added");
        assert_eq!(outcome["senses"], 2);

        let status = send(
            &router,
            get_request("/api/favorites/status?headword=%20haus&pos=NOMEN", &cookie),
        )
        .await;
        let status: StatusPayload = read_json(status).await;
        assert!(status.favorited);
        assert!(!status.pending);
        assert_eq!(status.key, "haus::nomen");

        let listed: FavoritesPayload = read_json(send(&router, get_request("/api/favorites", &cookie)).await).await;
        assert_eq!(listed.selected_category, Some(vocab.id));
        assert_eq!(listed.items.len(), 2);
    }

    #[tokio::test]
    async fn category_errors_keep_their_kind() {
        let router = test_router();
        let cookie = login_cookie(&router).await;
        send(
            &router,
            json_request("POST", "/api/categories", Some(&cookie), json!({ "name": "vocab" })),
        )
        .await;

        let conflict = send(
            &router,
            json_request("POST", "/api/categories", Some(&cookie), json!({ "name": "Vocab" })),
        )
        .await;
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let payload: serde_json::Value = read_json(conflict).await;
        assert_eq!(payload["kind"], "conflict");

        let reorder = send(
            &router,
            json_request(
                "POST",
                "/api/categories/reorder",
                Some(&cookie),
                json!({ "ids": [3, 1, 2] }),
            ),
        )
        .await;
        assert_eq!(reorder.status(), StatusCode::BAD_REQUEST);

        let listed: CategoriesPayload =
            read_json(send(&router, get_request("/api/categories", &cookie)).await).await;
        assert_eq!(listed.categories.len(), 1);
        assert!(!listed.saving);
    }

    #[tokio::test]
    async fn remove_without_selection_is_a_validation_error() {
        let router = test_router();
        let cookie = login_cookie(&router).await;
        let body = json!({
            "entry": { "headword": "Haus", "canonical_pos": "Nomen" },
            "action": "remove"
        });
        let response = send(
            &router,
            json_request("POST", "/api/favorites/toggle", Some(&cookie), body),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_forgets_the_session() {
        let router = test_router();
        let cookie = login_cookie(&router).await;
        let response = send(
            &router,
            Request::delete("/api/session")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&router, get_request("/api/favorites", &cookie)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_login_shares_the_workspace_and_retires_the_old_cookie() {
        let router = test_router();
        let first = login_cookie(&router).await;
        let created = send(
            &router,
            json_request("POST", "/api/categories", Some(&first), json!({ "name": "Vocab" })),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);

        let second = login_cookie(&router).await;
        assert_ne!(first, second);

        let stale = send(&router, get_request("/api/categories", &first)).await;
        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);

        let listed: CategoriesPayload =
            read_json(send(&router, get_request("/api/categories", &second)).await).await;
        assert_eq!(listed.categories.len(), 1);
        assert_eq!(listed.categories[0].name, "Vocab");
    }
}
