use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{Local, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use nutri_core::auth::Session;
use nutri_core::cascade::DeletionReport;
use nutri_core::db::SqlOutcome;
use nutri_core::error::{DbError, ErrorKind, classify};
use nutri_core::models::{
    DietLogEntry, Feedback, Ingredient, MealPlan, MealPlanView, NewIngredient, NewMealPlan,
    NewRecipe, NewUser, NutritionFacts, ProfileUpdate, Recipe, RecipeIngredient, Role, User,
    WeightHistoryEntry,
};
use nutri_core::routines::{Args, Function, Procedure};
use nutri_core::service::{NutritionService, RoutineInfo, TriggerCheck};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<NutritionService>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl AppState {
    fn new(service: NutritionService) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn service(&self) -> MutexGuard<'_, NutritionService> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_session(&self, session: Session) -> String {
        let token = new_token();
        self.sessions().insert(token.clone(), session);
        token
    }
}

fn new_token() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

/// Bearer token of the current request, set by `require_session`.
#[derive(Clone)]
struct SessionToken(String);

// --- Request / Response types ---

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    #[serde(flatten)]
    session: Session,
}

#[derive(Deserialize)]
struct MealPlanItemRequest {
    recipe_id: i64,
    meal_type: String,
    day_of_week: String,
}

#[derive(Deserialize)]
struct WeightRequest {
    weight_kg: f64,
}

fn default_portion() -> f64 {
    1.0
}

#[derive(Deserialize)]
struct DietLogRequest {
    recipe_id: i64,
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    #[serde(default = "default_portion")]
    portion_size: f64,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct FinishedRequest {
    finished: bool,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    recipe_id: i64,
    rating: i64,
    comments: Option<String>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    email: String,
    password: String,
    role: Option<Role>,
}

#[derive(Deserialize)]
struct PasswordRequest {
    password: String,
}

#[derive(Deserialize)]
struct RecipeIngredientRequest {
    ingredient_id: i64,
    quantity: f64,
}

#[derive(Deserialize)]
struct NutritionRequest {
    calories: f64,
    protein_g: Option<f64>,
    carbs_g: Option<f64>,
    fat_g: Option<f64>,
}

#[derive(Deserialize)]
struct MealPlanQuery {
    user_id: Option<i64>,
}

#[derive(Deserialize)]
struct FeedbackQuery {
    recipe_id: Option<i64>,
}

#[derive(Deserialize)]
struct SqlRequest {
    sql: String,
}

#[derive(Deserialize)]
struct TriggerCheckRequest {
    trigger: String,
    user_id: Option<i64>,
}

#[derive(Serialize)]
struct RecipeDetail {
    #[serde(flatten)]
    recipe: Recipe,
    ingredients: Vec<RecipeIngredient>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        match classify(&err) {
            ErrorKind::Invalid | ErrorKind::Malformed => Self::BadRequest(message),
            ErrorKind::Unauthorized => Self::Unauthorized(message),
            ErrorKind::Forbidden => Self::Forbidden(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Constraint => Self::Conflict(message),
            ErrorKind::Unavailable => Self::Unavailable("Database unavailable".to_string()),
            ErrorKind::Other => Self::Internal(err),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        anyhow::Error::from(err).into()
    }
}

// --- Middleware ---

async fn require_session(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let cached = token
        .as_ref()
        .and_then(|t| state.sessions().get(t).cloned());
    let (Some(token), Some(cached)) = (token, cached) else {
        return ApiError::Unauthorized("Login required".to_string()).into_response();
    };

    // Role and existence are re-read on every request.
    let current = state.service().session_for(cached.user_id);
    let session = match current {
        Ok(session) => session,
        Err(err) if classify(&err) == ErrorKind::NotFound => {
            state.sessions().remove(&token);
            warn!(user_id = cached.user_id, "session dropped: user no longer exists");
            return ApiError::Unauthorized("Login required".to_string()).into_response();
        }
        Err(err) => return ApiError::from(err).into_response(),
    };
    if session != cached {
        state.sessions().insert(token.clone(), session.clone());
    }

    request.extensions_mut().insert(session);
    request.extensions_mut().insert(SessionToken(token));
    next.run(request).await
}

async fn require_admin(request: Request, next: Next) -> Response {
    let is_admin = request
        .extensions()
        .get::<Session>()
        .is_some_and(Session::is_admin);
    if !is_admin {
        return ApiError::Forbidden("Administrator access required".to_string()).into_response();
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

// --- Auth handlers ---

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let session = state
        .service()
        .register(&req.name, &req.email, &req.password)?;
    let token = state.open_session(session.clone());
    Ok((StatusCode::CREATED, Json(LoginResponse { token, session })))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state.service().login(&req.email, &req.password)?;
    let token = state.open_session(session.clone());
    Ok(Json(LoginResponse { token, session }))
}

async fn admin_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state.service().admin_login(&req.email, &req.password)?;
    let token = state.open_session(session.clone());
    Ok(Json(LoginResponse { token, session }))
}

async fn logout(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> StatusCode {
    state.sessions().remove(&token);
    StatusCode::NO_CONTENT
}

// --- User portal handlers ---

async fn get_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<User>, ApiError> {
    let user = state.service().profile(&session)?;
    Ok(Json(user))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Response, ApiError> {
    match state.service().update_profile(&session, &update)? {
        Some(user) => Ok(Json(user).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn get_meal_plan(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<MealPlanView>, ApiError> {
    let view = state
        .service()
        .my_meal_plan(&session)?
        .ok_or_else(|| ApiError::NotFound("No meal plan yet".to_string()))?;
    Ok(Json(view))
}

async fn add_meal_plan_item(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<MealPlanItemRequest>,
) -> Result<(StatusCode, Json<MealPlanView>), ApiError> {
    let view = state.service().add_to_my_meal_plan(
        &session,
        req.recipe_id,
        &req.meal_type,
        &req.day_of_week,
    )?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn remove_meal_plan_item(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<SqlOutcome>, ApiError> {
    let removed = state.service().remove_from_my_meal_plan(&session, id)?;
    Ok(Json(SqlOutcome::Affected {
        rows: usize::from(removed),
    }))
}

async fn get_weight_history(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<WeightHistoryEntry>>, ApiError> {
    let history = state.service().weight_history(&session)?;
    Ok(Json(history))
}

async fn update_weight(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<WeightRequest>,
) -> Result<Json<Vec<WeightHistoryEntry>>, ApiError> {
    let history = state.service().update_weight(&session, req.weight_kg)?;
    Ok(Json(history))
}

async fn get_diet_log(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<DietLogEntry>>, ApiError> {
    let entries = state.service().diet_log(&session)?;
    Ok(Json(entries))
}

async fn log_meal(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<DietLogRequest>,
) -> Result<(StatusCode, Json<DietLogEntry>), ApiError> {
    let now = Local::now();
    let date = req.date.unwrap_or_else(|| now.date_naive());
    let time = match req.time {
        Some(t) => t,
        None => NaiveTime::from_hms_opt(now.hour(), now.minute(), 0)
            .ok_or_else(|| ApiError::BadRequest("Invalid time".to_string()))?,
    };
    let entry = state.service().log_meal(
        &session,
        req.recipe_id,
        date,
        time,
        req.portion_size,
        req.notes,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn set_meal_finished(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(req): Json<FinishedRequest>,
) -> Result<Json<SqlOutcome>, ApiError> {
    let changed = state
        .service()
        .set_meal_finished(&session, id, req.finished)?;
    Ok(Json(SqlOutcome::Affected {
        rows: usize::from(changed),
    }))
}

async fn delete_diet_log(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<SqlOutcome>, ApiError> {
    let deleted = state.service().delete_diet_log(&session, id)?;
    Ok(Json(SqlOutcome::Affected {
        rows: usize::from(deleted),
    }))
}

async fn submit_feedback(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), ApiError> {
    let feedback =
        state
            .service()
            .submit_feedback(&session, req.recipe_id, req.rating, req.comments)?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

async fn list_feedback(
    State(state): State<AppState>,
    Query(q): Query<FeedbackQuery>,
) -> Result<Json<Vec<Feedback>>, ApiError> {
    let feedback = state.service().list_feedback(q.recipe_id)?;
    Ok(Json(feedback))
}

async fn list_recipes(State(state): State<AppState>) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state.service().browse_recipes()?;
    Ok(Json(recipes))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let svc = state.service();
    let recipe = svc.recipe(id)?;
    let ingredients = svc.recipe_ingredients(id)?;
    Ok(Json(RecipeDetail {
        recipe,
        ingredients,
    }))
}

// --- Admin handlers ---

async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.service().list_users(&session)?;
    Ok(Json(users))
}

async fn create_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.service().add_user(
        &session,
        &NewUser {
            name: req.name,
            email: req.email,
            password: req.password,
            role: req.role.unwrap_or(Role::User),
        },
    )?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<DeletionReport>, ApiError> {
    let report = state.service().delete_user(&session, id)?;
    state.sessions().retain(|_, s| s.user_id != id);
    Ok(Json(report))
}

async fn reset_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(req): Json<PasswordRequest>,
) -> Result<Json<SqlOutcome>, ApiError> {
    let rows = state.service().reset_password(&session, id, &req.password)?;
    Ok(Json(SqlOutcome::Affected { rows }))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(recipe): Json<NewRecipe>,
) -> Result<(StatusCode, Json<Recipe>), ApiError> {
    let recipe = state.service().add_recipe(&session, &recipe)?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<DeletionReport>, ApiError> {
    let report = state.service().delete_recipe(&session, id)?;
    Ok(Json(report))
}

async fn add_recipe_ingredient(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(req): Json<RecipeIngredientRequest>,
) -> Result<(StatusCode, Json<RecipeIngredient>), ApiError> {
    let added =
        state
            .service()
            .add_recipe_ingredient(&session, id, req.ingredient_id, req.quantity)?;
    Ok((StatusCode::CREATED, Json(added)))
}

async fn list_ingredients(State(state): State<AppState>) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state.service().list_ingredients()?;
    Ok(Json(ingredients))
}

async fn create_ingredient(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(ingredient): Json<NewIngredient>,
) -> Result<(StatusCode, Json<Ingredient>), ApiError> {
    let ingredient = state.service().add_ingredient(&session, &ingredient)?;
    Ok((StatusCode::CREATED, Json(ingredient)))
}

async fn set_nutrition(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
    Json(req): Json<NutritionRequest>,
) -> Result<Json<NutritionFacts>, ApiError> {
    let facts = state.service().set_nutrition(
        &session,
        &NutritionFacts {
            ingredient_id: id,
            calories: req.calories,
            protein_g: req.protein_g,
            carbs_g: req.carbs_g,
            fat_g: req.fat_g,
        },
    )?;
    Ok(Json(facts))
}

async fn delete_ingredient(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<i64>,
) -> Result<Json<DeletionReport>, ApiError> {
    let report = state.service().delete_ingredient(&session, id)?;
    Ok(Json(report))
}

async fn list_meal_plans(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(q): Query<MealPlanQuery>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let plans = state.service().list_meal_plans(&session, q.user_id)?;
    Ok(Json(plans))
}

async fn create_meal_plan(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(plan): Json<NewMealPlan>,
) -> Result<(StatusCode, Json<MealPlan>), ApiError> {
    let plan = state.service().add_meal_plan(&session, &plan)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn list_tables(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let tables = state.service().list_tables()?;
    Ok(Json(tables))
}

async fn get_table(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<serde_json::Map<String, serde_json::Value>>>, ApiError> {
    let table = state.service().load_data(&name)?;
    Ok(Json(table.to_records()))
}

async fn run_sql(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<SqlRequest>,
) -> Result<Json<SqlOutcome>, ApiError> {
    let outcome = state.service().raw_sql(&session, &req.sql)?;
    Ok(Json(outcome))
}

async fn list_triggers(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<serde_json::Map<String, serde_json::Value>>>, ApiError> {
    let triggers = state.service().list_triggers(&session)?;
    Ok(Json(triggers.to_records()))
}

async fn check_trigger(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(req): Json<TriggerCheckRequest>,
) -> Result<Json<Vec<serde_json::Map<String, serde_json::Value>>>, ApiError> {
    let check = match (req.trigger.as_str(), req.user_id) {
        ("recipe-insert", _) => TriggerCheck::RecipeInsertLog,
        ("weight", Some(user_id)) => TriggerCheck::WeightHistory { user_id },
        ("weight", None) => {
            return Err(ApiError::BadRequest(
                "The weight trigger check needs user_id".to_string(),
            ));
        }
        (other, _) => {
            return Err(ApiError::BadRequest(format!(
                "Unknown trigger '{other}'. Use 'recipe-insert' or 'weight'"
            )));
        }
    };
    let result = state.service().check_trigger(&session, check)?;
    Ok(Json(result.to_records()))
}

async fn list_routines(State(state): State<AppState>) -> Json<Vec<RoutineInfo>> {
    Json(state.service().list_routines())
}

async fn call_routine(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(args): Json<Args>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let svc = state.service();
    if let Ok(function) = name.parse::<Function>() {
        let value = svc.call_function(function, &args)?;
        return Ok(Json(serde_json::json!({ "result": value })));
    }
    let procedure: Procedure = name.parse()?;
    let outcome = svc.call_procedure(procedure, &args)?;
    let body = serde_json::to_value(outcome).map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(body))
}

async fn rehash_passwords(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<nutri_core::auth::RehashSummary>, ApiError> {
    let summary = state.service().rehash_plaintext_passwords(&session)?;
    Ok(Json(summary))
}

fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/{id}", delete(delete_user))
        .route("/api/admin/users/{id}/password", put(reset_password))
        .route("/api/admin/recipes", post(create_recipe))
        .route("/api/admin/recipes/{id}", delete(delete_recipe))
        .route(
            "/api/admin/recipes/{id}/ingredients",
            post(add_recipe_ingredient),
        )
        .route(
            "/api/admin/ingredients",
            get(list_ingredients).post(create_ingredient),
        )
        .route("/api/admin/ingredients/{id}", delete(delete_ingredient))
        .route(
            "/api/admin/ingredients/{id}/nutrition",
            put(set_nutrition),
        )
        .route(
            "/api/admin/meal-plans",
            get(list_meal_plans).post(create_meal_plan),
        )
        .route("/api/admin/tables", get(list_tables))
        .route("/api/admin/tables/{name}", get(get_table))
        .route("/api/admin/sql", post(run_sql))
        .route("/api/admin/triggers", get(list_triggers))
        .route("/api/admin/triggers/check", post(check_trigger))
        .route("/api/admin/routines", get(list_routines))
        .route("/api/admin/routines/{name}", post(call_routine))
        .route("/api/admin/rehash-passwords", post(rehash_passwords))
        .route_layer(middleware::from_fn(require_admin));

    let authed = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/me", get(get_profile).put(update_profile))
        .route("/api/me/meal-plan", get(get_meal_plan))
        .route("/api/me/meal-plan/items", post(add_meal_plan_item))
        .route(
            "/api/me/meal-plan/items/{id}",
            delete(remove_meal_plan_item),
        )
        .route(
            "/api/me/weight",
            get(get_weight_history).post(update_weight),
        )
        .route("/api/me/diet-log", get(get_diet_log).post(log_meal))
        .route("/api/me/diet-log/{id}", delete(delete_diet_log))
        .route("/api/me/diet-log/{id}/finished", put(set_meal_finished))
        .route("/api/me/feedback", post(submit_feedback))
        .route("/api/recipes", get(list_recipes))
        .route("/api/recipes/{id}", get(get_recipe))
        .route("/api/feedback", get(list_feedback))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/admin-login", post(admin_login))
        .merge(authed)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(service: NutritionService, port: u16, bind: &str) -> anyhow::Result<()> {
    let app = build_router(AppState::new(service));

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!(bind, "listening beyond localhost; tokens travel in cleartext over HTTP");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("listening on http://{bind}:{port}");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let service = NutritionService::new_in_memory().unwrap();
        service
            .db()
            .create_admin("Root", "root@example.com", "s3cret", "s3cret")
            .unwrap();
        AppState::new(service)
    }

    async fn send(app: &Router, request: axum::http::Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, token: Option<&str>, body: &Value) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::post(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn put_json(uri: &str, token: &str, body: &Value) -> axum::http::Request<Body> {
        axum::http::Request::put(uri)
            .header("content-type", "application/json")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn delete_with(uri: &str, token: &str) -> axum::http::Request<Body> {
        axum::http::Request::delete(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn login_token(app: &Router, email: &str, password: &str) -> String {
        let (status, body) = send(
            app,
            post_json(
                "/api/auth/login",
                None,
                &json!({"email": email, "password": password}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn register_token(app: &Router) -> String {
        let (status, body) = send(
            app,
            post_json(
                "/api/auth/register",
                None,
                &json!({"name": "Ada", "email": "ada@example.com", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "user");
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn missing_token_returns_401() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::get("/api/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn register_then_profile() {
        let app = build_router(test_state());
        let token = register_token(&app).await;

        let (status, body) = send(&app, get_with("/api/me", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn wrong_password_returns_401() {
        let app = build_router(test_state());
        let (status, body) = send(
            &app,
            post_json(
                "/api/auth/login",
                None,
                &json!({"email": "root@example.com", "password": "nope"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let app = build_router(test_state());
        register_token(&app).await;
        let (status, _) = send(
            &app,
            post_json(
                "/api/auth/register",
                None,
                &json!({"name": "Again", "email": "ada@example.com", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn logout_invalidates_token() {
        let app = build_router(test_state());
        let token = register_token(&app).await;
        let (status, _) = send(&app, post_json("/api/auth/logout", Some(&token), &json!({}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, get_with("/api/me", &token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_rows_are_zero_row_successes() {
        let app = build_router(test_state());
        let token = register_token(&app).await;
        let none = json!({"kind": "affected", "rows": 0});

        let (status, body) = send(&app, delete_with("/api/me/diet-log/999999", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, none);

        let (status, body) = send(
            &app,
            put_json("/api/me/diet-log/999999/finished", &token, &json!({"finished": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, none);

        let (status, body) = send(&app, delete_with("/api/me/meal-plan/items/999999", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, none);
    }

    #[tokio::test]
    async fn deleted_admin_token_is_rejected() {
        let app = build_router(test_state());
        let root = login_token(&app, "root@example.com", "s3cret").await;
        let (status, bob) = send(
            &app,
            post_json(
                "/api/admin/users",
                Some(&root),
                &json!({"name": "Bob", "email": "bob@example.com", "password": "pw", "role": "admin"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let bob_id = bob["id"].as_i64().unwrap();
        let bob_token = login_token(&app, "bob@example.com", "pw").await;
        let sql = json!({"sql": "SELECT 1"});

        let (status, _) = send(&app, post_json("/api/admin/sql", Some(&bob_token), &sql)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, delete_with(&format!("/api/admin/users/{bob_id}"), &root)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, post_json("/api/admin/sql", Some(&bob_token), &sql)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, post_json("/api/admin/sql", Some(&root), &sql)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn demoted_admin_loses_admin_routes() {
        let app = build_router(test_state());
        let root = login_token(&app, "root@example.com", "s3cret").await;
        let (status, _) = send(
            &app,
            post_json(
                "/api/admin/users",
                Some(&root),
                &json!({"name": "Bob", "email": "bob@example.com", "password": "pw", "role": "admin"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let bob_token = login_token(&app, "bob@example.com", "pw").await;

        let (status, _) = send(
            &app,
            post_json(
                "/api/admin/sql",
                Some(&root),
                &json!({"sql": "UPDATE User SET Role = 'user' WHERE Email = 'bob@example.com'"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, get_with("/api/admin/users", &bob_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&app, get_with("/api/me", &bob_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "user");
    }

    #[tokio::test]
    async fn admin_resets_password() {
        let app = build_router(test_state());
        let root = login_token(&app, "root@example.com", "s3cret").await;
        let user = register_token(&app).await;
        let (_, me) = send(&app, get_with("/api/me", &user)).await;
        let id = me["id"].as_i64().unwrap();

        let (status, body) = send(
            &app,
            put_json(&format!("/api/admin/users/{id}/password"), &root, &json!({"password": "fresh"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"], 1);
        login_token(&app, "ada@example.com", "fresh").await;

        let (status, _) = send(
            &app,
            put_json(&format!("/api/admin/users/{id}/password"), &user, &json!({"password": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_reject_regular_users() {
        let app = build_router(test_state());
        let token = register_token(&app).await;
        let (status, body) = send(&app, get_with("/api/admin/users", &token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Administrator access required");

        let (status, _) = send(
            &app,
            post_json("/api/admin/sql", Some(&token), &json!({"sql": "DELETE FROM User"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_login_requires_admin_role() {
        let app = build_router(test_state());
        register_token(&app).await;
        let (status, _) = send(
            &app,
            post_json(
                "/api/auth/admin-login",
                None,
                &json!({"email": "ada@example.com", "password": "pw"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn meal_plan_and_recipe_cascade() {
        let app = build_router(test_state());
        let admin = login_token(&app, "root@example.com", "s3cret").await;
        let user = register_token(&app).await;

        let (status, recipe) = send(
            &app,
            post_json(
                "/api/admin/recipes",
                Some(&admin),
                &json!({"name": "Porridge", "cooking_time_minutes": 10}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let recipe_id = recipe["id"].as_i64().unwrap();

        let (status, _) = send(&app, get_with("/api/me/meal-plan", &user)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, view) = send(
            &app,
            post_json(
                "/api/me/meal-plan/items",
                Some(&user),
                &json!({"recipe_id": recipe_id, "meal_type": "breakfast", "day_of_week": "friday"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(view["items"][0]["meal_type"], "Breakfast");
        assert_eq!(view["plan"]["plan_name"], "My Meal Plan");

        let (status, _) = send(
            &app,
            post_json(
                "/api/me/meal-plan/items",
                Some(&user),
                &json!({"recipe_id": recipe_id, "meal_type": "brunch", "day_of_week": "friday"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, report) = send(
            &app,
            axum::http::Request::delete(format!("/api/admin/recipes/{recipe_id}"))
                .header("Authorization", format!("Bearer {admin}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["root"], "recipe");

        let (_, view) = send(&app, get_with("/api/me/meal-plan", &user)).await;
        assert_eq!(view["items"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn weight_update_returns_history() {
        let app = build_router(test_state());
        let user = register_token(&app).await;
        let (status, history) = send(
            &app,
            post_json("/api/me/weight", Some(&user), &json!({"weight_kg": 72.5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["new_weight"], 72.5);

        let (status, _) = send(
            &app,
            post_json("/api/me/weight", Some(&user), &json!({"weight_kg": 5.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_table_is_bad_request() {
        let app = build_router(test_state());
        let admin = login_token(&app, "root@example.com", "s3cret").await;

        let (status, rows) = send(&app, get_with("/api/admin/tables/user", &admin)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, get_with("/api/admin/tables/sqlite_master", &admin)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_sql_returns_rows() {
        let app = build_router(test_state());
        let admin = login_token(&app, "root@example.com", "s3cret").await;
        let (status, body) = send(
            &app,
            post_json(
                "/api/admin/sql",
                Some(&admin),
                &json!({"sql": "SELECT Email FROM User"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "rows");
        assert_eq!(body["rows"][0][0], "root@example.com");

        let (status, _) = send(
            &app,
            post_json("/api/admin/sql", Some(&admin), &json!({"sql": "SELEC nonsense"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn call_function_routine() {
        let app = build_router(test_state());
        let admin = login_token(&app, "root@example.com", "s3cret").await;
        let (status, body) = send(
            &app,
            post_json(
                "/api/admin/routines/CalculateBMI",
                Some(&admin),
                &json!({"height_cm": 180, "weight_kg": 81}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], 25.0);

        let (status, _) = send(
            &app,
            post_json("/api/admin/routines/DropEverything", Some(&admin), &json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = build_router(test_state());
        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::from(anyhow::anyhow!("secret database path /home/user/nutri.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
