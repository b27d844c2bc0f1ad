//! Annual accounts of an organization.

use axum::Json;
use axum::extract::{Path, RawQuery, State};
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::Instrument;
use validator::{Validate, ValidationError};

use super::resource_url;
use crate::{AppState, ServerError};

const ORGNR_LENGTH: usize = 9;

fn validate_orgnr(orgnr: &str) -> Result<(), ValidationError> {
    if orgnr.len() != ORGNR_LENGTH || !orgnr.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new("orgnr"));
    }

    Ok(())
}

#[derive(Debug, Validate, Deserialize)]
pub struct Organization {
    #[validate(custom(
        function = "validate_orgnr",
        message = "\"orgnr\" must be an organization number of nine digits."
    ))]
    orgnr: String,
}

/// Public annual accounts.
pub async fn handler(
    State(state): State<AppState>,
    Path(organization): Path<Organization>,
    RawQuery(query): RawQuery,
) -> Result<Json<Box<RawValue>>, ServerError> {
    organization.validate()?;

    let url =
        resource_url(&state.config.upstream.regnskap_url, &[&organization.orgnr])?;
    let json = state.fetcher.fetch_public(url, query.as_deref()).await?;

    Ok(Json(json))
}

/// Accounting history, behind Maskinporten.
///
/// A new token is obtained for every request, then used for exactly one
/// registry call.
pub async fn historikk(
    State(state): State<AppState>,
    Path(organization): Path<Organization>,
    RawQuery(query): RawQuery,
) -> Result<Json<Box<RawValue>>, ServerError> {
    organization.validate()?;

    let url = resource_url(
        &state.config.upstream.historikk_url,
        &[&organization.orgnr, "historikk"],
    )?;
    let span = tracing::info_span!("historikk", orgnr = %organization.orgnr);

    async move {
        tracing::debug!(stage = "exchanging_token");
        let token = state.exchanger.exchange().await?;

        tracing::debug!(stage = "fetching");
        let json = state.fetcher.fetch(url, &token, query.as_deref()).await?;

        tracing::debug!(stage = "success");
        Ok::<_, ServerError>(Json(json))
    }
    .instrument(span)
    .await
}
