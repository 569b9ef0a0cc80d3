//! Defines routes for the GA4GH DRS API.
//!
//! ## Structure
//! - **Object endpoints** (prefix `/ga4gh/drs/v1`)
//!   - `GET     /objects/{object_id}`: resolve with a bearer token (`?expand=true` for full trees)
//!   - `POST    /objects/{object_id}`: resolve with passports
//!   - `OPTIONS /objects/{object_id}`: accepted authorization schemes
//!
//! - **Access endpoints**
//!   - `GET  /objects/{object_id}/access/{access_id}`: signed URL, bearer token
//!   - `POST /objects/{object_id}/access/{access_id}`: signed URL, passports
//!
//! - `GET /service-info`, plus `/healthz` and `/readyz` at the root.

use crate::{
    handlers::{
        drs_handlers::{get_access_url, get_object, options_object, post_access_url, post_object, service_info},
        health_handlers::{healthz, readyz},
    },
    services::drs_service::DrsService,
};
use axum::{Router, routing::get};

pub const DRS_API_PREFIX: &str = "/ga4gh/drs/v1";

/// Build the router for all DRS routes.
///
/// The router carries shared state (`DrsService`) to all handlers.
pub fn routes() -> Router<DrsService> {
    let drs = Router::new()
        .route("/service-info", get(service_info))
        .route(
            "/objects/{object_id}",
            get(get_object).post(post_object).options(options_object),
        )
        .route(
            "/objects/{object_id}/access/{access_id}",
            get(get_access_url).post(post_access_url),
        );

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest(DRS_API_PREFIX, drs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::drs_handlers::tests::{SNAPSHOT, test_service},
        services::iam::tests::serve,
    };
    use reqwest::{Method, StatusCode};

    #[tokio::test]
    async fn drs_routes_are_mounted_under_the_api_prefix() {
        let base = serve(routes().with_state(test_service().await)).await;
        let client = reqwest::Client::new();
        let send = |method: Method, path: String, token: Option<&'static str>| {
            let mut request = client.request(method, format!("{}{}", base, path));
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            async move { request.send().await.unwrap().status() }
        };

        let object = format!("{}/objects/v1_{}_f1", DRS_API_PREFIX, SNAPSHOT);
        assert_eq!(send(Method::GET, object.clone(), Some("tok")).await, StatusCode::OK);
        assert_eq!(send(Method::GET, object.clone(), None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(send(Method::OPTIONS, object.clone(), None).await, StatusCode::OK);
        assert_eq!(
            send(Method::GET, format!("{}/access/gcp-nowhere", object), Some("tok")).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            send(Method::GET, format!("{}/service-info", DRS_API_PREFIX), None).await,
            StatusCode::OK
        );
        assert_eq!(send(Method::GET, "/readyz".to_string(), None).await, StatusCode::OK);
    }
}
