//! Entity register search.

use axum::Json;
use axum::extract::{RawQuery, State};
use serde_json::value::RawValue;

use super::resource_url;
use crate::{AppState, ServerError};

/// Search entities. The query string is forwarded as is.
pub async fn handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<Box<RawValue>>, ServerError> {
    let url = resource_url(&state.config.upstream.enheter_url, &[])?;
    let json = state.fetcher.fetch_public(url, query.as_deref()).await?;

    Ok(Json(json))
}
