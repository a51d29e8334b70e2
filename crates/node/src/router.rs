use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_sql::{SqlConnection, SqlParam};
use serde::{Deserialize, Serialize};
use tracing::error;

static INSERT_DEBUG_SQL: &str = "INSERT INTO debug (note) VALUES (?1)";
static INCREMENT_COUNTER_SQL: &str = "UPDATE counter SET count = count + 1 WHERE id = 1";
static SELECT_COUNTER_SQL: &str = "SELECT count FROM counter WHERE id = 1";

#[derive(Clone)]
struct AppState<C> {
    connection: C,
}

/// Body accepted by `POST /debug`.
#[derive(Debug, Deserialize)]
pub struct DebugNote {
    /// Free-form note.
    pub note: String,
}

/// Record returned by `POST /debug`.
#[derive(Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct DebugRecord {
    /// Row id of the stored record.
    pub id: i64,

    /// The stored note.
    pub note: String,
}

/// Builds the client-facing router over an open, migrated connection.
pub fn router<C>(connection: C) -> Router
where
    C: SqlConnection,
{
    Router::new()
        .route("/", get(count::<C>))
        .route("/debug", post(create_debug::<C>))
        .route("/inc", get(increment::<C>))
        .route("/ping", get(ping))
        .with_state(AppState { connection })
}

async fn ping() -> &'static str {
    "pong"
}

async fn create_debug<C>(
    State(state): State<AppState<C>>,
    body: Bytes,
) -> Response
where
    C: SqlConnection,
{
    // Content-Type is not checked; any body that decodes is accepted.
    let DebugNote { note } = match serde_json::from_slice::<DebugNote>(&body) {
        Ok(decoded) => decoded,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state
        .connection
        .execute(INSERT_DEBUG_SQL, vec![SqlParam::Text(note.clone())])
        .await
    {
        Ok(executed) => {
            let id = executed.last_insert_rowid;

            (
                StatusCode::CREATED,
                [(header::CONTENT_LOCATION, format!("/debug/{id}"))],
                Json(DebugRecord { id, note }),
            )
                .into_response()
        }
        Err(e) => internal_error(&e),
    }
}

async fn increment<C>(State(state): State<AppState<C>>) -> Response
where
    C: SqlConnection,
{
    match state.connection.execute(INCREMENT_COUNTER_SQL, vec![]).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => internal_error(&e),
    }
}

async fn count<C>(State(state): State<AppState<C>>) -> Response
where
    C: SqlConnection,
{
    match state.connection.query(SELECT_COUNTER_SQL, vec![]).await {
        Ok(rows) => match rows.row(0).and_then(|row| row.get_integer(0)) {
            Some(count) => format!("count: {count}\n").into_response(),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "counter row missing").into_response(),
        },
        Err(e) => internal_error(&e),
    }
}

fn internal_error(e: &impl std::error::Error) -> Response {
    error!("request failed: {e}");

    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
