//! HTTP surface. Handlers stay thin: they parse input, call into the
//! services held by [`AppState`] and shape the JSON answer.

mod admin;
mod auth;
mod jwxt;
mod user;

use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::err::{self, Error};
use crate::state::AppState;
use crate::{proceeds, Payload, RefStr};

#[derive(Debug, Serialize)]
pub struct Message {
    pub msg: RefStr,
}

/// Builds the CORS policy. A `*` entry admits every origin; with credentials
/// enabled the request's own origin, method and headers are echoed back, as
/// browsers refuse a literal `*` on credentialed requests.
pub fn cors_layer(origins: &[String], allow_credentials: bool) -> Result<CorsLayer, Error> {
    let any_origin = origins.iter().any(|o| o.trim() == "*");
    let origin = if any_origin && allow_credentials {
        AllowOrigin::mirror_request()
    } else if any_origin {
        AllowOrigin::any()
    } else {
        let list = origins
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).map_err(|_| {
                    Error::internal("ConfigError", format!("invalid CORS origin `{}`", o))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(list)
    };

    let layer = CorsLayer::new().allow_origin(origin);
    Ok(if allow_credentials {
        layer
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        layer
            .allow_methods(AllowMethods::any())
            .allow_headers(AllowHeaders::any())
    })
}

pub fn app(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/user/resetpw", post(user::reset_password))
        .route("/api/user/profile", get(user::profile))
        .route("/api/user/setprofile", post(user::set_profile))
        .route("/api/user/testrecords", get(user::test_records))
        .route("/api/user/addtestrecord", post(user::add_test_record))
        .route("/api/jwxt/bind", post(jwxt::bind))
        .route("/api/jwxt/sync", post(jwxt::sync))
        .route("/api/jwxt/info", get(jwxt::info))
        .route("/api/jwxt/unbind", delete(jwxt::unbind))
        .route("/api/admin/users/:username/status", post(admin::set_status))
        .fallback(err::handler404)
        .layer(Extension(state))
        .layer(cors)
}

#[derive(Debug, Serialize)]
struct Health {
    status: RefStr,
}

async fn health() -> Payload<Health> {
    proceeds(Health { status: "ok" })
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/ping")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
            .body(Body::empty())
            .unwrap()
    }

    fn router(origins: &[&str], credentials: bool) -> Router {
        let origins: Vec<String> = origins.iter().map(|o| o.to_string()).collect();
        Router::new()
            .route("/ping", post(|| async { "pong" }))
            .layer(cors_layer(&origins, credentials).unwrap())
    }

    #[tokio::test]
    async fn wildcard_with_credentials_echoes_the_origin() {
        let response = router(&["*"], true)
            .oneshot(preflight("https://anywhere.example"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://anywhere.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST");
    }

    #[tokio::test]
    async fn wildcard_without_credentials_answers_star() {
        let response = router(&["*"], false)
            .oneshot(preflight("https://anywhere.example"))
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[tokio::test]
    async fn listed_origins_only() {
        let app = router(&["https://portal.example"], true);
        let allowed = app
            .clone()
            .oneshot(preflight("https://portal.example"))
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://portal.example"
        );

        let other = app.oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(other
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn malformed_origin_is_a_config_error() {
        let origins = vec!["https://bad\norigin".to_string()];
        assert!(matches!(
            cors_layer(&origins, false),
            Err(Error::InternalError { kind: "ConfigError", .. })
        ));
    }
}
