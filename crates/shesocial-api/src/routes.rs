use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shesocial_core::clock::Clock;
use shesocial_core::models::{
    AdminLevel, AdminRole, AdminStatus, AdminUser, Collection, Document, DocumentId, Fields,
    PermissionAtom, PullResponse, WILDCARD_PERMISSION,
};
use shesocial_core::permissions::{join_violations, EffectivePermissions, PermissionCatalog};
use shesocial_core::util::timestamp_from_value;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtAuthority, TokenPair};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{user_fingerprint, RateLimitMetricsSnapshot, WriteRateLimiter};
use crate::store::{ReplaceOutcome, ServerStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: ServerStore,
    authority: Arc<JwtAuthority>,
    catalog: Arc<RwLock<PermissionCatalog>>,
    rate_limiter: Arc<WriteRateLimiter>,
}

impl AppState {
    /// Open storage, load the permission catalog and seed the owner account.
    pub async fn initialize(
        config: Arc<AppConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, shesocial_core::Error> {
        let store = ServerStore::open(&config.db_path, clock, config.conflict_window).await?;

        let mut catalog = PermissionCatalog::platform_default();
        for role in store.roles().await? {
            let role_id = role.role_id.clone();
            if let Err(error) = catalog.insert_role(role) {
                tracing::warn!(role = %role_id, %error, "Skipping invalid stored role");
            }
        }

        if let Some(owner_id) = config.owner_id.as_deref() {
            if store.admin(owner_id).await?.is_none() {
                store
                    .save_admin(&AdminUser {
                        admin_id: owner_id.to_string(),
                        username: owner_id.to_string(),
                        email: String::new(),
                        password_hash: String::new(),
                        role_id: "super_admin".to_string(),
                        custom_permissions: BTreeSet::new(),
                        level: AdminLevel::Owner,
                        status: AdminStatus::Active,
                    })
                    .await?;
                tracing::info!(admin = user_fingerprint(owner_id), "Seeded owner account");
            }
        }

        Ok(Self {
            authority: Arc::new(JwtAuthority::new(config.clone())),
            rate_limiter: Arc::new(WriteRateLimiter::from_config(config.as_ref())),
            catalog: Arc::new(RwLock::new(catalog)),
            store,
            config,
        })
    }

    pub fn authority(&self) -> &JwtAuthority {
        &self.authority
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/admin/me/permissions", get(my_permissions))
        .route("/admin/roles", get(list_roles).post(create_role))
        .route("/admin/atoms", get(list_atoms))
        .route("/admin/permissions/validate", post(validate_permissions))
        .route("/admin/users/{id}/permissions", put(set_user_permissions))
        .route("/{collection}", post(create_document))
        .route(
            "/{collection}/{id}",
            put(replace_document).delete(delete_document),
        )
        .route("/{collection}/sync/{since}", get(sync_delta))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/refresh", post(refresh_session))
        .nest("/api", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.authority.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

async fn refresh_session(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AppError> {
    let user = state
        .authority
        .verify_refresh_token(request.refresh_token.trim())?;
    let pair = state.authority.issue_pair(&user.user_id)?;
    tracing::info!(
        endpoint = "auth_refresh",
        user = user_fingerprint(&user.user_id),
        session = user.session_id.as_deref().unwrap_or("none"),
        "Refreshed session"
    );
    Ok(Json(pair))
}

// Collections

#[derive(Debug, Clone, Copy)]
enum WriteAction {
    Create,
    Update,
    Delete,
}

impl WriteAction {
    const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Atom an admin needs to write documents owned by someone else.
const fn write_atom(collection: Collection, action: WriteAction) -> &'static str {
    match (collection, action) {
        (Collection::Users, WriteAction::Delete) => "users:delete",
        (Collection::Users, _) => "users:update",
        (Collection::Events, WriteAction::Create) => "events:create",
        (Collection::Events, WriteAction::Update) => "events:update",
        (Collection::Events, WriteAction::Delete) => "events:delete",
        (Collection::Bookings, _) => "bookings:update",
    }
}

/// Member that owns a document: the user itself, or the booking's `userId`.
fn document_owner(collection: Collection, document: &Document) -> Option<&str> {
    match collection {
        Collection::Users => Some(document.id.as_str()),
        Collection::Bookings => document.str_field("userId"),
        Collection::Events => None,
    }
}

fn parse_collection(raw: &str) -> Result<Collection, AppError> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("Unknown collection `{raw}`")))
}

/// Build a document from a client body, keeping client id and timestamps when present.
fn document_from_body(mut body: Fields, now: i64) -> Document {
    let id = body
        .get("id")
        .or_else(|| body.get("_id"))
        .and_then(Value::as_str)
        .map(DocumentId::from)
        .filter(|id| !id.is_empty());
    let created_at = body.get("createdAt").and_then(timestamp_from_value);
    let updated_at = body.get("updatedAt").and_then(timestamp_from_value);
    body.remove("deleted");

    let mut document = Document::new(body, now);
    if let Some(id) = id {
        document.id = id;
    }
    document.created_at = created_at.unwrap_or(now);
    document.updated_at = updated_at.unwrap_or(document.created_at);
    document
}

async fn authorize_write(
    state: &AppState,
    user: &AuthenticatedUser,
    collection: Collection,
    action: WriteAction,
    owner: Option<&str>,
) -> Result<(), AppError> {
    if owner == Some(user.user_id.as_str()) {
        return Ok(());
    }

    let atom = write_atom(collection, action);
    let Some(admin) = state.store.admin(&user.user_id).await? else {
        tracing::info!(
            endpoint = "collection_write",
            user = user_fingerprint(&user.user_id),
            %collection,
            action = action.label(),
            "Rejected write on a document the caller does not own"
        );
        return Err(AppError::forbidden(format!(
            "`{atom}` is required to {} this document",
            action.label()
        )));
    };
    state.catalog.read().await.authorize(&admin, atom)?;
    Ok(())
}

async fn create_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(collection): Path<String>,
    Json(body): Json<Fields>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let collection = parse_collection(&collection)?;
    state.rate_limiter.check(&user.user_id).await?;

    let document = document_from_body(body, state.store.now());
    authorize_write(
        &state,
        &user,
        collection,
        WriteAction::Create,
        document_owner(collection, &document),
    )
    .await?;

    let (stored, written) = state.store.insert(collection, document).await?;
    tracing::info!(
        endpoint = "collection_create",
        user = user_fingerprint(&user.user_id),
        %collection,
        written,
        "Stored document"
    );
    let status = if written {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(stored)))
}

async fn replace_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<Fields>,
) -> Result<Json<Document>, AppError> {
    let collection = parse_collection(&collection)?;
    state.rate_limiter.check(&user.user_id).await?;

    let id = DocumentId::from(id);
    let stored = state
        .store
        .get(collection, &id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{collection}/{id}")))?;
    authorize_write(
        &state,
        &user,
        collection,
        WriteAction::Update,
        document_owner(collection, &stored),
    )
    .await?;

    let mut document = document_from_body(body, state.store.now());
    document.id = id;
    let canonical = match state
        .store
        .replace(collection, document, &user.user_id)
        .await?
    {
        ReplaceOutcome::Stored(document) => document,
        ReplaceOutcome::Stale(stored) => {
            tracing::info!(
                endpoint = "collection_replace",
                user = user_fingerprint(&user.user_id),
                %collection,
                "Stale write kept out and reported as conflict"
            );
            stored
        }
    };
    Ok(Json(canonical))
}

async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let collection = parse_collection(&collection)?;
    state.rate_limiter.check(&user.user_id).await?;

    let id = DocumentId::from(id);
    if let Some(stored) = state.store.get(collection, &id).await? {
        authorize_write(
            &state,
            &user,
            collection,
            WriteAction::Delete,
            document_owner(collection, &stored),
        )
        .await?;
    }

    if state.store.delete(collection, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("{collection}/{id}")))
    }
}

async fn sync_delta(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((collection, since)): Path<(String, i64)>,
) -> Result<Json<PullResponse>, AppError> {
    let collection = parse_collection(&collection)?;
    if since < 0 {
        return Err(AppError::bad_request("`since` must not be negative"));
    }

    let delta = state
        .store
        .changes_since(collection, since, &user.user_id)
        .await?;
    tracing::debug!(
        endpoint = "sync_delta",
        user = user_fingerprint(&user.user_id),
        %collection,
        since,
        changes = delta.changes.len(),
        conflicts = delta.conflicts.len(),
        "Served delta"
    );
    Ok(Json(delta))
}

// Admin

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminView {
    admin_id: String,
    username: String,
    email: String,
    role_id: String,
    custom_permissions: BTreeSet<String>,
    level: AdminLevel,
    status: AdminStatus,
}

impl From<AdminUser> for AdminView {
    fn from(admin: AdminUser) -> Self {
        Self {
            admin_id: admin.admin_id,
            username: admin.username,
            email: admin.email,
            role_id: admin.role_id,
            custom_permissions: admin.custom_permissions,
            level: admin.level,
            status: admin.status,
        }
    }
}

/// Load the caller's admin record; only active admins get through.
async fn require_admin(state: &AppState, user: &AuthenticatedUser) -> Result<AdminUser, AppError> {
    let admin = state
        .store
        .admin(&user.user_id)
        .await?
        .ok_or_else(|| AppError::forbidden("Caller is not an administrator"))?;
    if admin.status != AdminStatus::Active {
        return Err(AppError::forbidden("Admin account is not active"));
    }
    Ok(admin)
}

/// Load the caller's admin record and check `atom`.
async fn require_permission(
    state: &AppState,
    user: &AuthenticatedUser,
    atom: &str,
) -> Result<AdminUser, AppError> {
    let admin = require_admin(state, user).await?;
    state.catalog.read().await.authorize(&admin, atom)?;
    Ok(admin)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MyPermissionsResponse {
    admin_id: String,
    level: AdminLevel,
    permissions: EffectivePermissions,
}

async fn my_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MyPermissionsResponse>, AppError> {
    let admin = require_admin(&state, &user).await?;
    let permissions = state.catalog.read().await.effective_permissions(&admin);
    Ok(Json(MyPermissionsResponse {
        admin_id: admin.admin_id,
        level: admin.level,
        permissions,
    }))
}

async fn list_roles(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<AdminRole>>, AppError> {
    require_admin(&state, &user).await?;
    let roles = state.catalog.read().await.roles().cloned().collect();
    Ok(Json(roles))
}

async fn create_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(mut role): Json<AdminRole>,
) -> Result<(StatusCode, Json<AdminRole>), AppError> {
    let caller = require_permission(&state, &user, "admin:roles").await?;
    if role.permissions.contains(WILDCARD_PERMISSION) && !caller.level.is_top_tier() {
        return Err(AppError::forbidden(
            "Only owner or founder admins may create wildcard roles",
        ));
    }
    role.is_custom = true;

    {
        let mut catalog = state.catalog.write().await;
        if catalog.role(&role.role_id).is_some() {
            return Err(AppError::conflict(format!(
                "Role `{}` already exists",
                role.role_id
            )));
        }
        catalog.insert_role(role.clone())?;
    }
    state.store.save_role(&role).await?;
    tracing::info!(
        endpoint = "admin_roles",
        user = user_fingerprint(&user.user_id),
        role = %role.role_id,
        "Saved role"
    );
    Ok((StatusCode::CREATED, Json(role)))
}

async fn list_atoms(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<PermissionAtom>>, AppError> {
    require_admin(&state, &user).await?;
    let atoms = state.catalog.read().await.atoms().cloned().collect();
    Ok(Json(atoms))
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    violations: Vec<String>,
}

async fn validate_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AppError> {
    require_permission(&state, &user, "admin:permissions").await?;
    let violations: Vec<String> = state
        .catalog
        .read()
        .await
        .validate_combination(
            request
                .permissions
                .iter()
                .map(String::as_str)
                .filter(|atom| *atom != WILDCARD_PERMISSION),
        )
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(Json(ValidateResponse {
        valid: violations.is_empty(),
        violations,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPermissionsRequest {
    custom_permissions: BTreeSet<String>,
}

async fn set_user_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(admin_id): Path<String>,
    Json(request): Json<SetPermissionsRequest>,
) -> Result<Json<AdminView>, AppError> {
    let caller = require_permission(&state, &user, "admin:permissions").await?;
    if request.custom_permissions.contains(WILDCARD_PERMISSION) && !caller.level.is_top_tier() {
        return Err(AppError::forbidden(
            "Only owner or founder accounts may grant `*`",
        ));
    }

    let mut target = state
        .store
        .admin(&admin_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("admin `{admin_id}`")))?;

    {
        let catalog = state.catalog.read().await;
        let role_permissions = catalog
            .role(&target.role_id)
            .filter(|role| role.is_active)
            .map(|role| role.permissions.clone())
            .unwrap_or_default();
        let combined: BTreeSet<&str> = role_permissions
            .iter()
            .chain(request.custom_permissions.iter())
            .map(String::as_str)
            .filter(|atom| *atom != WILDCARD_PERMISSION)
            .collect();
        let violations = catalog.validate_combination(combined);
        if !violations.is_empty() {
            return Err(AppError::bad_request(join_violations(&violations)));
        }
    }

    target.custom_permissions = request.custom_permissions;
    state.store.save_admin(&target).await?;
    tracing::info!(
        endpoint = "admin_permissions",
        user = user_fingerprint(&user.user_id),
        target = user_fingerprint(&target.admin_id),
        "Updated custom permissions"
    );
    Ok(Json(target.into()))
}
