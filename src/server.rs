//! HTTP server (axum)
//!
//! Local API for the medication registry, reminder scheduler, vitals,
//! analyses, chat helper and backend panels, plus the `/chat-assistant`
//! gateway proxy.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{Local, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::{Any, CorsLayer};

use crate::alerts::{AlertPlan, NoticeBoard};
use crate::analysis;
use crate::assistant::{self, GatewayClient};
use crate::backend::{BackendClient, BloodTestForm, SessionUser};
use crate::chat::{ChatAssistant, ChatReply, Language};
use crate::error::{AppError, AppResult};
use crate::medications::parse_date;
use crate::models::{
    AnalysisValues, BloodAnalysis, BloodTest, MedicationEntry, MedicationStatus, Notice,
    NotificationSettings, Profile, StatusState, VitalsReading,
};
use crate::notification::{ReminderService, SchedulerSnapshot};
use crate::storage::Repository;
use crate::vitals::{self, TrendPoint};

/// Shared server state
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Mutex<Repository>>,
    pub reminders: Arc<ReminderService>,
    pub notices: Arc<NoticeBoard>,
    pub chat: Arc<ChatAssistant>,
    pub gateway: Arc<GatewayClient>,
    pub backend: Option<Arc<BackendClient>>,
}

impl AppState {
    fn repo(&self) -> AppResult<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| AppError::Custom("Repository lock error".to_string()))
    }

    fn backend(&self) -> AppResult<&BackendClient> {
        self.backend
            .as_deref()
            .ok_or_else(|| AppError::Config("backend database is not configured".to_string()))
    }
}

/// JSON body whose rejection is an `{error}` body like every other failure
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| AppError::InvalidInput(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// Build the router
pub fn create_router(state: AppState) -> Router {
    let gateway = state.gateway.clone();
    Router::new()
        .route("/health", get(health_handler))
        // medication registry
        .route("/api/entries", get(list_entries).post(create_entry))
        .route("/api/entries/{id}", delete(delete_entry))
        .route("/api/entries/{id}/status", put(set_status))
        .route("/api/statuses", get(list_statuses))
        // alerts and scheduler
        .route("/api/settings", get(get_settings).put(update_settings))
        .route("/api/settings/test", post(test_alert))
        .route("/api/scheduler", get(get_scheduler).put(update_scheduler))
        .route("/api/notices", get(list_notices))
        // vitals and analyses
        .route("/api/vitals", get(list_vitals).post(create_reading))
        .route("/api/trend", get(weekly_trend))
        .route("/api/analyses", get(list_analyses).post(save_analysis))
        .route("/api/analyses/{id}", delete(delete_analysis))
        // chat
        .route("/api/chat", post(chat_handler))
        // backend database
        .route("/api/auth/sign-in", post(sign_in))
        .route("/api/auth/sign-out", post(sign_out))
        .route("/api/auth/user", get(current_user))
        .route("/api/blood-tests", get(list_blood_tests).post(insert_blood_test))
        .route("/api/profile", get(get_profile))
        .with_state(state)
        .merge(assistant::router(gateway))
}

/// Serve until `shutdown` resolves
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Custom(format!("Server bind error: {}", e)))?;
    log::info!("[Server] listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Custom(format!("Server error: {}", e)))?;

    Ok(())
}

// ============ Handlers ============

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

/// Entries of `?date=`, or of the scheduler's selected day
async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> AppResult<Json<Vec<MedicationEntry>>> {
    let date = match query.date {
        Some(date) => parse_date(&date)?,
        None => state.reminders.snapshot()?.date,
    };
    Ok(Json(state.reminders.entries_for_date(date)?))
}

#[derive(Debug, Deserialize)]
struct NewEntry {
    name: String,
    date: String,
    time: String,
}

async fn create_entry(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewEntry>,
) -> AppResult<(StatusCode, Json<MedicationEntry>)> {
    let entry = state.reminders.add_entry(&body.name, &body.date, &body.time)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<MedicationEntry>> {
    Ok(Json(state.reminders.delete_entry(id)?))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    state: StatusState,
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ApiJson(body): ApiJson<StatusUpdate>,
) -> AppResult<Json<MedicationStatus>> {
    Ok(Json(state.reminders.set_status(id, body.state)?))
}

async fn list_statuses(State(state): State<AppState>) -> AppResult<Json<Vec<MedicationStatus>>> {
    Ok(Json(state.reminders.statuses()?))
}

async fn get_settings(State(state): State<AppState>) -> AppResult<Json<NotificationSettings>> {
    Ok(Json(state.reminders.settings()?))
}

async fn update_settings(
    State(state): State<AppState>,
    ApiJson(settings): ApiJson<NotificationSettings>,
) -> AppResult<Json<NotificationSettings>> {
    state.reminders.update_settings(&settings)?;
    Ok(Json(settings))
}

async fn test_alert(State(state): State<AppState>) -> AppResult<Json<AlertPlan>> {
    Ok(Json(state.reminders.test_alert()?))
}

async fn get_scheduler(State(state): State<AppState>) -> AppResult<Json<SchedulerSnapshot>> {
    Ok(Json(state.reminders.snapshot()?))
}

#[derive(Debug, Deserialize)]
struct SchedulerUpdate {
    date: Option<String>,
    #[serde(default)]
    follow_today: bool,
    enabled: Option<bool>,
}

/// `date` pins the viewed day, `follow_today` goes back to tracking today
async fn update_scheduler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SchedulerUpdate>,
) -> AppResult<Json<SchedulerSnapshot>> {
    if body.follow_today {
        state.reminders.follow_today(Local::now().date_naive())?;
    } else if let Some(date) = body.date {
        state.reminders.select_date(parse_date(&date)?)?;
    }
    if let Some(enabled) = body.enabled {
        state.reminders.set_enabled(enabled)?;
    }
    Ok(Json(state.reminders.snapshot()?))
}

async fn list_notices(State(state): State<AppState>) -> Json<Vec<Notice>> {
    Json(state.notices.recent())
}

async fn list_vitals(State(state): State<AppState>) -> AppResult<Json<Vec<VitalsReading>>> {
    let mut readings = state.repo()?.load_vitals()?;
    readings.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
    Ok(Json(readings))
}

#[derive(Debug, Deserialize)]
struct NewReading {
    date: String,
    blood_pressure: Option<String>,
    glucose: Option<String>,
}

async fn create_reading(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewReading>,
) -> AppResult<(StatusCode, Json<VitalsReading>)> {
    let mut repo = state.repo()?;
    let mut readings = repo.load_vitals()?;
    let reading = vitals::record_reading(
        &readings,
        &body.date,
        body.blood_pressure.as_deref(),
        body.glucose.as_deref(),
        Utc::now(),
    )?;
    readings.push(reading.clone());
    repo.save_vitals(&readings)?;
    Ok((StatusCode::CREATED, Json(reading)))
}

/// Seven days ending at `?date=` (default today)
async fn weekly_trend(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> AppResult<Json<Vec<TrendPoint>>> {
    let today: NaiveDate = match query.date {
        Some(date) => parse_date(&date)?,
        None => Local::now().date_naive(),
    };
    let readings = state.repo()?.load_vitals()?;
    Ok(Json(vitals::weekly_trend(&readings, today)))
}

async fn list_analyses(State(state): State<AppState>) -> AppResult<Json<Vec<BloodAnalysis>>> {
    let analyses = state.repo()?.load_analyses()?;
    Ok(Json(analysis::sorted_newest_first(&analyses)))
}

#[derive(Debug, Deserialize)]
struct NewAnalysis {
    date: String,
    #[serde(flatten)]
    values: AnalysisValues,
}

async fn save_analysis(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewAnalysis>,
) -> AppResult<(StatusCode, Json<BloodAnalysis>)> {
    let mut repo = state.repo()?;
    let analyses = repo.load_analyses()?;
    let (analyses, saved) = analysis::save_analysis(analyses, &body.date, body.values, Utc::now())?;
    repo.save_analyses(&analyses)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<BloodAnalysis>> {
    let mut repo = state.repo()?;
    let mut analyses = repo.load_analyses()?;
    let removed = analysis::delete_analysis(&mut analyses, id)?;
    repo.save_analyses(&analyses)?;
    Ok(Json(removed))
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    message: String,
    language: Option<String>,
    online: Option<bool>,
}

async fn chat_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChatBody>,
) -> AppResult<Json<ChatReply>> {
    let language = Language::from_code(body.language.as_deref().unwrap_or_default());
    let reply = state
        .chat
        .reply(&body.message, language, body.online.unwrap_or(true))
        .await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn sign_in(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Credentials>,
) -> AppResult<Json<SessionUser>> {
    Ok(Json(state.backend()?.sign_in(&body.email, &body.password).await?))
}

async fn sign_out(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.backend()?.sign_out().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_user(State(state): State<AppState>) -> AppResult<Json<Option<SessionUser>>> {
    Ok(Json(state.backend()?.current_user()?))
}

async fn list_blood_tests(State(state): State<AppState>) -> AppResult<Json<Vec<BloodTest>>> {
    Ok(Json(state.backend()?.list_blood_tests().await?))
}

async fn insert_blood_test(
    State(state): State<AppState>,
    ApiJson(form): ApiJson<BloodTestForm>,
) -> AppResult<impl IntoResponse> {
    let input = form.into_input()?;
    state.backend()?.insert_blood_test(&input).await?;
    Ok(StatusCode::CREATED)
}

async fn get_profile(State(state): State<AppState>) -> AppResult<Json<Profile>> {
    state
        .backend()?
        .get_profile()
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("profile".to_string()))
}
