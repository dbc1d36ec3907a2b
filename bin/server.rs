// HeySave - Web Server
// JSON API over the core operations. One opaque token per browser session.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use heysave::{
    auth::{Session, Step1Input, Step2Input},
    db, detect_card_network, goals, ledger, logging, profile, tips, AppConfig, HeySaveError,
    RewardCatalog, Settlement,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const SESSION_HEADER: &str = "x-session-token";

/// Idle sessions are forgotten after this long
const SESSION_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_SESSIONS: usize = 10_000;

/// Room above the photo cap so oversized uploads reach `update_photo`
/// and get its validation message instead of a bare 413
const PHOTO_BODY_LIMIT: usize = profile::MAX_PHOTO_BYTES + 64 * 1024;

// ============================================================================
// Sessions
// ============================================================================

struct SessionEntry {
    session: Session,
    last_seen: Instant,
}

/// Token -> session. Idle entries expire; when full, the least recently
/// used entry makes room for a new one.
struct SessionStore {
    entries: HashMap<String, SessionEntry>,
    ttl: Duration,
    capacity: usize,
}

impl SessionStore {
    fn new(ttl: Duration, capacity: usize) -> Self {
        SessionStore {
            entries: HashMap::new(),
            ttl,
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_seen) < ttl);
    }

    fn insert(&mut self, token: String, session: Session, now: Instant) {
        self.sweep(now);
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(token, _)| token.clone());
            match oldest {
                Some(token) => {
                    self.entries.remove(&token);
                }
                None => break,
            }
        }
        self.entries.insert(
            token,
            SessionEntry {
                session,
                last_seen: now,
            },
        );
    }

    /// Copy of a live session. Touching it extends its lifetime.
    fn checkout(&mut self, token: &str, now: Instant) -> Option<Session> {
        let live = now.duration_since(self.entries.get(token)?.last_seen) < self.ttl;
        if !live {
            self.entries.remove(token);
            return None;
        }
        let entry = self.entries.get_mut(token)?;
        entry.last_seen = now;
        Some(entry.session.clone())
    }

    /// Store the updated session, unless it was removed meanwhile
    fn checkin(&mut self, token: &str, session: Session) {
        if let Some(entry) = self.entries.get_mut(token) {
            entry.session = session;
        }
    }

    fn remove(&mut self, token: &str) -> Option<Session> {
        self.entries.remove(token).map(|entry| entry.session)
    }
}

// ============================================================================
// State and responses
// ============================================================================

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    sessions: Arc<Mutex<SessionStore>>,
    catalog: Arc<RewardCatalog>,
    require_address: bool,
}

impl AppState {
    fn new(conn: Connection, require_address: bool) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            sessions: Arc::new(Mutex::new(SessionStore::new(SESSION_TTL, MAX_SESSIONS))),
            catalog: Arc::new(RewardCatalog::default()),
            require_address,
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            errors: Vec::new(),
        })
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    errors: Vec<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        ApiError {
            status,
            errors: vec![message.to_string()],
        }
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    fn unknown_session() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unknown session")
    }
}

impl From<HeySaveError> for ApiError {
    fn from(err: HeySaveError) -> Self {
        let status = match &err {
            HeySaveError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HeySaveError::InsufficientFunds { .. }
            | HeySaveError::InsufficientPoints { .. }
            | HeySaveError::UsernameTaken(_)
            | HeySaveError::GoalNotCompleted { .. }
            | HeySaveError::GoalAlreadyCompleted
            | HeySaveError::WrongStep { .. } => StatusCode::CONFLICT,
            HeySaveError::InvalidCredentials | HeySaveError::NotAuthenticated => {
                StatusCode::UNAUTHORIZED
            }
            HeySaveError::NotFound { .. } => StatusCode::NOT_FOUND,
            HeySaveError::Persistence(_) | HeySaveError::Credential(_) => {
                tracing::error!(error = %err, "request failed");
                return ApiError::internal();
            }
        };
        ApiError {
            status,
            errors: err.messages(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            errors: self.errors,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn session_token(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing session token"))
}

/// Run `f` against the caller's session and the database on the blocking
/// pool. Password hashing and SQLite I/O never run on an async worker, and
/// the session map is only locked while copying the session in and out.
async fn with_session<T, F>(state: &AppState, headers: &HeaderMap, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection, &mut Session) -> heysave::Result<T> + Send + 'static,
{
    let token = session_token(headers)?;
    let state = state.clone();

    tokio::task::spawn_blocking(move || -> Result<T, ApiError> {
        let mut session = state
            .sessions
            .lock()
            .map_err(|_| ApiError::internal())?
            .checkout(&token, Instant::now())
            .ok_or_else(ApiError::unknown_session)?;

        let result = {
            let conn = state.db.lock().map_err(|_| ApiError::internal())?;
            f(&*conn, &mut session)
        };

        state
            .sessions
            .lock()
            .map_err(|_| ApiError::internal())?
            .checkin(&token, session);

        Ok(result?)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        ApiError::internal()
    })?
}

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct EntryRequest {
    description: String,
    amount: f64,
}

#[derive(Deserialize)]
struct NewGoalRequest {
    name: String,
    target: f64,
}

#[derive(Deserialize)]
struct AmountRequest {
    amount: f64,
}

#[derive(Serialize)]
struct SessionCreated {
    token: String,
}

#[derive(Serialize)]
struct WizardState {
    step: u8,
}

#[derive(Serialize)]
struct CardResponse {
    bank: String,
    network: String,
    registered_as: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/session - Start an anonymous session
async fn create_session(State(state): State<AppState>) -> ApiResult<SessionCreated> {
    let token = uuid::Uuid::new_v4().to_string();
    state
        .sessions
        .lock()
        .map_err(|_| ApiError::internal())?
        .insert(token.clone(), Session::new(state.require_address), Instant::now());
    Ok(ApiResponse::ok(SessionCreated { token }))
}

/// POST /api/logout, DELETE /api/session - End the session and forget the token
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<bool> {
    let token = session_token(&headers)?;
    let removed = state
        .sessions
        .lock()
        .map_err(|_| ApiError::internal())?
        .remove(&token);

    match removed {
        Some(mut session) => {
            session.logout();
            Ok(ApiResponse::ok(true))
        }
        None => Err(ApiError::unknown_session()),
    }
}

/// POST /api/register/step1
async fn register_step1(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<Step1Input>,
) -> ApiResult<WizardState> {
    let step = with_session(&state, &headers, move |conn, session| {
        session.wizard.submit_step1(conn, &input)?;
        Ok(session.wizard.step_number())
    })
    .await?;
    Ok(ApiResponse::ok(WizardState { step }))
}

/// POST /api/register/step2
async fn register_step2(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<Step2Input>,
) -> ApiResult<i64> {
    let user_id = with_session(&state, &headers, move |conn, session| {
        session.wizard.submit_step2(conn, &input)
    })
    .await?;
    Ok(ApiResponse::ok(user_id))
}

/// POST /api/register/back
async fn register_back(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<WizardState> {
    let step = with_session(&state, &headers, |_, session| {
        session.wizard.back();
        Ok(session.wizard.step_number())
    })
    .await?;
    Ok(ApiResponse::ok(WizardState { step }))
}

/// POST /api/login
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, move |conn, session| {
        let user = session.login(conn, &req.username, &req.password)?;
        ledger::snapshot(conn, user.id)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// GET /api/me - Dashboard snapshot
async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, |conn, session| {
        ledger::snapshot(conn, session.require_user()?)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// POST /api/expenses
async fn add_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EntryRequest>,
) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, move |conn, session| {
        ledger::record_expense(conn, session, &req.description, req.amount)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// POST /api/income
async fn add_income(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EntryRequest>,
) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, move |conn, session| {
        ledger::record_income(conn, session, &req.description, req.amount)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// GET /api/transactions - Full history, most recent first
async fn get_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<db::Transaction>> {
    let transactions = with_session(&state, &headers, |conn, session| {
        ledger::recent_transactions(conn, session, None)
    })
    .await?;
    Ok(ApiResponse::ok(transactions))
}

/// GET /api/goals
async fn get_goals(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<db::Goal>> {
    let goals = with_session(&state, &headers, |conn, session| goals::list_goals(conn, session)).await?;
    Ok(ApiResponse::ok(goals))
}

/// POST /api/goals
async fn create_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewGoalRequest>,
) -> ApiResult<db::Goal> {
    let goal = with_session(&state, &headers, move |conn, session| {
        goals::create_goal(conn, session, &req.name, req.target)
    })
    .await?;
    Ok(ApiResponse::ok(goal))
}

/// POST /api/goals/:id/deposit
async fn deposit_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(goal_id): Path<i64>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, move |conn, session| {
        goals::deposit(conn, session, goal_id, req.amount)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// POST /api/goals/:id/settle - keep, withdraw or transfer a completed goal
async fn settle_goal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(goal_id): Path<i64>,
    Json(settlement): Json<Settlement>,
) -> ApiResult<ledger::AccountSnapshot> {
    let snapshot = with_session(&state, &headers, move |conn, session| {
        goals::settle(conn, session, goal_id, &settlement)
    })
    .await?;
    Ok(ApiResponse::ok(snapshot))
}

/// GET /api/tips
async fn get_tips(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<String>> {
    let tips = with_session(&state, &headers, |conn, session| {
        tips::generate_tips(conn, session.require_user()?)
    })
    .await?;
    Ok(ApiResponse::ok(tips))
}

/// GET /api/rewards
async fn get_rewards(State(state): State<AppState>) -> ApiResult<Vec<heysave::Reward>> {
    Ok(ApiResponse::ok(state.catalog.all().to_vec()))
}

/// POST /api/rewards/:index/redeem
async fn redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> ApiResult<ledger::Redemption> {
    let reward = state
        .catalog
        .get(index)
        .cloned()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "unknown reward"))?;

    let redemption = with_session(&state, &headers, move |conn, session| {
        ledger::redeem_reward(conn, session, &reward)
    })
    .await?;
    Ok(ApiResponse::ok(redemption))
}

/// GET /api/profile
async fn get_profile(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<profile::Profile> {
    let profile = with_session(&state, &headers, |conn, session| profile::profile(conn, session)).await?;
    Ok(ApiResponse::ok(profile))
}

/// GET /api/profile/photo - Raw image bytes
async fn get_photo(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let photo = with_session(&state, &headers, |conn, session| profile::photo(conn, session)).await?;
    match photo {
        Some(bytes) => Ok((StatusCode::OK, bytes).into_response()),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "no photo")),
    }
}

/// PUT /api/profile/photo - Raw image bytes in the body
async fn put_photo(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<bool> {
    with_session(&state, &headers, move |conn, session| {
        profile::update_photo(conn, session, &body)
    })
    .await?;
    Ok(ApiResponse::ok(true))
}

/// DELETE /api/profile/photo
async fn delete_photo(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<bool> {
    with_session(&state, &headers, |conn, session| profile::clear_photo(conn, session)).await?;
    Ok(ApiResponse::ok(true))
}

/// GET /api/card/:number - Live card detection while the user types
async fn detect_card(Path(number): Path<String>) -> ApiResult<CardResponse> {
    let detection = detect_card_network(&number);
    Ok(ApiResponse::ok(CardResponse {
        network: detection.network_name().to_string(),
        registered_as: detection.registered_bank_name(),
        bank: detection.bank,
    }))
}

// ============================================================================
// Router
// ============================================================================

fn app(state: AppState) -> Router {
    let photo_routes = put(put_photo)
        .get(get_photo)
        .delete(delete_photo)
        .layer(DefaultBodyLimit::max(PHOTO_BODY_LIMIT));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/session", post(create_session).delete(logout))
        .route("/register/step1", post(register_step1))
        .route("/register/step2", post(register_step2))
        .route("/register/back", post(register_back))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/expenses", post(add_expense))
        .route("/income", post(add_income))
        .route("/transactions", get(get_transactions))
        .route("/goals", get(get_goals).post(create_goal))
        .route("/goals/:id/deposit", post(deposit_goal))
        .route("/goals/:id/settle", post(settle_goal))
        .route("/tips", get(get_tips))
        .route("/rewards", get(get_rewards))
        .route("/rewards/:index/redeem", post(redeem))
        .route("/profile", get(get_profile))
        .route("/profile/photo", photo_routes)
        .route("/card/:number", get(detect_card))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    logging::init(&config);

    let conn = db::open_database(&config.database_path)?;
    let state = AppState::new(conn, config.require_address);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!(addr = %config.server_addr, "server listening");

    axum::serve(listener, app(state)).await?;
    Ok(())
}
