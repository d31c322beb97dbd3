//! Purpose: Provide the web front-end (HTML pages) and JSON API for studentdb.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum server; every handler maps to exactly one store operation.
//! Invariants: Store calls run on the blocking pool; the async runtime never blocks on SQLite.
//! Invariants: JSON error envelopes carry stable kinds; HTML errors re-render or redirect.
//! Invariants: Loopback-only unless explicitly allowed.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Form, Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::html::{self, Flash, FlashLevel, FormMode, StudentForm};
use studentdb::api::{Error, ErrorKind, StudentFields, StudentRecord, StudentStore, parse_age};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

#[derive(Clone)]
struct AppState {
    store: Arc<StudentStore>,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let store = StudentStore::open(&config.db_path)?;
    let state = Arc::new(AppState {
        store: Arc::new(store),
    });
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, db = %config.db_path.display(), "studentdb web server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/add", get(add_form).post(add_submit))
        .route("/edit/:id", get(edit_form).post(edit_submit))
        .route("/delete/:id", post(delete_submit))
        .route("/search", get(search_form).post(search_submit))
        .route("/healthz", get(healthz))
        .route("/api/students", get(api_list).post(api_create))
        .route("/api/students/search", get(api_search))
        .route(
            "/api/students/:id",
            get(api_get).put(api_update).delete(api_delete),
        )
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 65536."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

/// Runs one store operation on the blocking pool.
async fn with_store<T, F>(state: &AppState, op: F) -> Result<T, Error>
where
    F: FnOnce(&StudentStore) -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("store task failed")
                .with_source(err)
        })?
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateEmail => StatusCode::CONFLICT,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn user_message(err: &Error) -> String {
    match err.kind() {
        ErrorKind::DuplicateEmail => "Email already exists!".to_string(),
        ErrorKind::NotFound => "Student not found!".to_string(),
        ErrorKind::Validation => match err.message() {
            Some(message) if !message.ends_with(" is required") => message.to_string(),
            _ => "All fields are required!".to_string(),
        },
        _ => err.message().unwrap_or("Something went wrong.").to_string(),
    }
}

// HTML pages

#[derive(Debug, Default, Deserialize)]
struct FlashQuery {
    flash: Option<String>,
    level: Option<String>,
}

impl FlashQuery {
    fn into_flash(self) -> Option<Flash> {
        let message = self.flash.filter(|message| !message.is_empty())?;
        let level = FlashLevel::parse(self.level.as_deref().unwrap_or_default());
        Some(Flash::new(level, message))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchForm {
    search_term: String,
}

fn redirect_with_flash(level: FlashLevel, message: &str) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("level", level.as_str())
        .append_pair("flash", message)
        .finish();
    Redirect::to(&format!("/?{query}")).into_response()
}

fn html_error(err: &Error) -> Response {
    if matches!(err.kind(), ErrorKind::Io | ErrorKind::Internal) {
        warn!(error = %err, "request failed");
    }
    (status_for(err.kind()), Html(html::error_page(&user_message(err)))).into_response()
}

fn form_error(mode: FormMode, form: &StudentForm, err: &Error) -> Response {
    if matches!(err.kind(), ErrorKind::Io | ErrorKind::Internal) {
        warn!(error = %err, "request failed");
    }
    let message = user_message(err);
    let page = html::student_form_page(mode, form, Some(message.as_str()));
    (status_for(err.kind()), Html(page)).into_response()
}

fn form_fields(form: &StudentForm) -> Result<StudentFields, Error> {
    let age = parse_age(&form.age)?;
    Ok(StudentFields::new(
        form.name.clone(),
        age,
        form.grade.clone(),
        form.email.clone(),
    ))
}

async fn index(State(state): State<Arc<AppState>>, Query(query): Query<FlashQuery>) -> Response {
    match with_store(&state, |store| store.list_all()).await {
        Ok(records) => {
            Html(html::index_page(&records, query.into_flash().as_ref())).into_response()
        }
        Err(err) => html_error(&err),
    }
}

async fn add_form() -> Html<String> {
    Html(html::student_form_page(
        FormMode::Add,
        &StudentForm::default(),
        None,
    ))
}

async fn add_submit(State(state): State<Arc<AppState>>, Form(form): Form<StudentForm>) -> Response {
    let fields = match form_fields(&form) {
        Ok(fields) => fields,
        Err(err) => return form_error(FormMode::Add, &form, &err),
    };
    let name = fields.name.clone();
    match with_store(&state, move |store| store.create(&fields)).await {
        Ok(_) => redirect_with_flash(
            FlashLevel::Success,
            &format!("Student {name} added successfully!"),
        ),
        Err(err) => form_error(FormMode::Add, &form, &err),
    }
}

async fn edit_form(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<i64>) -> Response {
    match with_store(&state, move |store| store.get(id)).await {
        Ok(record) => Html(html::student_form_page(
            FormMode::Edit(id),
            &StudentForm::from_record(&record),
            None,
        ))
        .into_response(),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            redirect_with_flash(FlashLevel::Error, "Student not found!")
        }
        Err(err) => html_error(&err),
    }
}

async fn edit_submit(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    Form(form): Form<StudentForm>,
) -> Response {
    let fields = match form_fields(&form) {
        Ok(fields) => fields,
        Err(err) => {
            // A missing record outranks bad input.
            return match with_store(&state, move |store| store.get(id)).await {
                Err(lookup) if lookup.kind() == ErrorKind::NotFound => {
                    redirect_with_flash(FlashLevel::Error, "Student not found!")
                }
                _ => form_error(FormMode::Edit(id), &form, &err),
            };
        }
    };
    match with_store(&state, move |store| store.update(id, &fields)).await {
        Ok(record) => redirect_with_flash(
            FlashLevel::Success,
            &format!("Student {} updated successfully!", record.name),
        ),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            redirect_with_flash(FlashLevel::Error, "Student not found!")
        }
        Err(err) => form_error(FormMode::Edit(id), &form, &err),
    }
}

async fn delete_submit(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
) -> Response {
    match with_store(&state, move |store| store.delete(id)).await {
        Ok(name) => redirect_with_flash(
            FlashLevel::Success,
            &format!("Student {name} deleted successfully!"),
        ),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            redirect_with_flash(FlashLevel::Error, "Student not found!")
        }
        Err(err) => html_error(&err),
    }
}

async fn search_form() -> Html<String> {
    Html(html::search_page(None, &[], None))
}

async fn search_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SearchForm>,
) -> Response {
    let term = form.search_term;
    let query = term.clone();
    match with_store(&state, move |store| store.search(&query)).await {
        Ok(records) => {
            let flash = records.is_empty().then(|| {
                Flash::new(
                    FlashLevel::Info,
                    format!("No students found matching \"{term}\""),
                )
            });
            Html(html::search_page(Some(&term), &records, flash.as_ref())).into_response()
        }
        Err(err) => html_error(&err),
    }
}

// JSON API

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StudentRequest {
    name: String,
    age: Option<i64>,
    grade: String,
    email: String,
}

impl StudentRequest {
    fn into_fields(self) -> Result<StudentFields, Error> {
        let age = self.age.ok_or_else(|| {
            Error::new(ErrorKind::Validation)
                .with_message("age is required")
                .with_field("age")
        })?;
        Ok(StudentFields::new(self.name, age, self.grade, self.email))
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'static str>,
}

fn json_error(err: Error) -> Response {
    if matches!(err.kind(), ErrorKind::Io | ErrorKind::Internal) {
        warn!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            id: err.id(),
            field: err.field(),
        },
    };
    (status_for(err.kind()), Json(body)).into_response()
}

fn request_body(
    payload: Result<Json<StudentRequest>, JsonRejection>,
) -> Result<StudentFields, Error> {
    let Json(request) = payload.map_err(|rejection| {
        Error::new(ErrorKind::Usage)
            .with_message(rejection.body_text())
            .with_hint("Send a JSON object with name, age, grade, and email.")
    })?;
    request.into_fields()
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match with_store(&state, |store| store.count()).await {
        Ok(count) => Json(json!({ "ok": true, "students": count })).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_list(State(state): State<Arc<AppState>>) -> Response {
    match with_store(&state, |store| store.list_all()).await {
        Ok(records) => Json(json!({ "students": records })).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_create(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StudentRequest>, JsonRejection>,
) -> Response {
    let fields = match request_body(payload) {
        Ok(fields) => fields,
        Err(err) => return json_error(err),
    };
    match with_store(&state, move |store| {
        store.create(&fields).map(|id| StudentRecord {
            id,
            name: fields.name,
            age: fields.age,
            grade: fields.grade,
            email: fields.email,
        })
    })
    .await
    {
        Ok(record) => (StatusCode::CREATED, Json(json!({ "student": record }))).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_get(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<i64>) -> Response {
    match with_store(&state, move |store| store.get(id)).await {
        Ok(record) => Json(json!({ "student": record })).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_update(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<i64>,
    payload: Result<Json<StudentRequest>, JsonRejection>,
) -> Response {
    let fields = match request_body(payload) {
        Ok(fields) => fields,
        Err(err) => return json_error(err),
    };
    match with_store(&state, move |store| store.update(id, &fields)).await {
        Ok(record) => Json(json!({ "student": record })).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_delete(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<i64>) -> Response {
    match with_store(&state, move |store| store.delete(id)).await {
        Ok(name) => Json(json!({ "deleted": { "id": id, "name": name } })).into_response(),
        Err(err) => json_error(err),
    }
}

async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let term = query.q.unwrap_or_default();
    match with_store(&state, move |store| store.search(&term)).await {
        Ok(records) => Json(json!({ "students": records })).into_response(),
        Err(err) => json_error(err),
    }
}
