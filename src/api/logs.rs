//! Log endpoints: recent history and a live SSE tail.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::security;

#[derive(Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[axum::debug_handler]
pub async fn logs(
    State(st): State<Arc<AppState>>,
    Query(q): Query<LogQuery>,
) -> Result<Json<Value>, AppError> {
    let entries = st.sink.query(q.level.as_deref(), q.category.as_deref())?;
    Ok(Json(json!({ "logs": entries })))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Live tail of the deployment log. EventSource clients cannot set
/// headers, so the session token is also accepted as `?token=`.
#[axum::debug_handler]
pub async fn events(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    security::require_authenticated(&st.sessions, &headers, q.token.as_deref())?;
    let path = st.sink.log_file().to_path_buf();

    let stream = stream! {
        // Start at the end; history is served by /logs.
        let mut offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let len = match std::fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            if len < offset {
                offset = 0;
            }
            if len == offset {
                continue;
            }
            let Ok(file) = std::fs::File::open(&path) else {
                continue;
            };
            let mut reader = BufReader::new(file);
            if reader.seek(SeekFrom::Start(offset)).is_err() {
                continue;
            }
            let mut line = String::new();
            loop {
                line.clear();
                let read = match reader.read_line(&mut line) {
                    Ok(n) => n,
                    Err(_) => break,
                };
                // Partial trailing lines wait for the next pass.
                if read == 0 || !line.ends_with('\n') {
                    break;
                }
                offset += read as u64;
                let data = line.trim_end().to_string();
                if data.is_empty() {
                    continue;
                }
                yield Ok::<Event, std::convert::Infallible>(Event::default().data(data));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
