//! HTTP handlers for the GA4GH DRS endpoints.
//! Extract credentials and parameters, then delegate to `DrsService`.

use crate::{
    errors::{AppError, DrsError},
    models::drs_object::{DrsAccessUrl, DrsAuthorizations, DrsObject, DrsPassportRequest, DrsServiceInfo},
    services::{
        collaborators::AuthenticatedUser,
        drs_service::{DrsCredentials, DrsService},
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
};
use serde::Deserialize;

/// Header set by the auth proxy with the caller's verified email
/// (`OIDC_CLAIM_email`; header names are case-insensitive).
pub const EMAIL_CLAIM_HEADER: &str = "oidc_claim_email";

#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    pub expand: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccessQuery {
    pub access_project: Option<String>,
}

/// Bearer credentials from `Authorization: Bearer <token>`.
fn bearer_credentials(headers: &HeaderMap) -> Result<DrsCredentials, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DrsError::Unauthorized("A bearer token is required".into()))?;
    let email = headers
        .get(EMAIL_CLAIM_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Ok(DrsCredentials::Bearer(AuthenticatedUser {
        email: email.to_string(),
        token: token.to_string(),
    }))
}

/// Passports when the body has any, the bearer token otherwise.
fn passport_or_bearer(body: &DrsPassportRequest, headers: &HeaderMap) -> Result<DrsCredentials, AppError> {
    if body.passports.is_empty() {
        bearer_credentials(headers)
    } else {
        Ok(DrsCredentials::Passport(body.passports.clone()))
    }
}

/// `GET /ga4gh/drs/v1/objects/{object_id}`
pub async fn get_object(
    State(service): State<DrsService>,
    Path(object_id): Path<String>,
    Query(query): Query<ObjectQuery>,
    headers: HeaderMap,
) -> Result<Json<DrsObject>, AppError> {
    let credentials = bearer_credentials(&headers)?;
    let object = service.lookup_object(&object_id, &credentials, query.expand).await?;
    Ok(Json(object))
}

/// `POST /ga4gh/drs/v1/objects/{object_id}`
pub async fn post_object(
    State(service): State<DrsService>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DrsPassportRequest>,
) -> Result<Json<DrsObject>, AppError> {
    let credentials = passport_or_bearer(&body, &headers)?;
    let object = service.lookup_object(&object_id, &credentials, body.expand).await?;
    Ok(Json(object))
}

/// `OPTIONS /ga4gh/drs/v1/objects/{object_id}`
pub async fn options_object(
    State(service): State<DrsService>,
    Path(object_id): Path<String>,
) -> Result<Json<DrsAuthorizations>, AppError> {
    Ok(Json(service.lookup_authorizations(&object_id).await?))
}

/// `GET /ga4gh/drs/v1/objects/{object_id}/access/{access_id}`
pub async fn get_access_url(
    State(service): State<DrsService>,
    Path((object_id, access_id)): Path<(String, String)>,
    Query(query): Query<AccessQuery>,
    headers: HeaderMap,
) -> Result<Json<DrsAccessUrl>, AppError> {
    let credentials = bearer_credentials(&headers)?;
    let url = service
        .get_access_url(&object_id, &access_id, &credentials, query.access_project.as_deref())
        .await?;
    Ok(Json(url))
}

/// `POST /ga4gh/drs/v1/objects/{object_id}/access/{access_id}`
pub async fn post_access_url(
    State(service): State<DrsService>,
    Path((object_id, access_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DrsPassportRequest>,
) -> Result<Json<DrsAccessUrl>, AppError> {
    let credentials = passport_or_bearer(&body, &headers)?;
    let url = service
        .get_access_url(&object_id, &access_id, &credentials, body.access_project.as_deref())
        .await?;
    Ok(Json(url))
}

/// `GET /ga4gh/drs/v1/service-info`
pub async fn service_info(State(service): State<DrsService>) -> Json<DrsServiceInfo> {
    Json(service.service_info())
}
