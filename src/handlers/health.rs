use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    {
        let conn = state.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    }
    Ok(Json(json!({ "status": "ok" })))
}
