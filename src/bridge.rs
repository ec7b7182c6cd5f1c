//! Adapter for the campus academic-affairs (JWXT) HTTP service.
//!
//! The remote answers in an ad-hoc JSON shape and is outside our control, so
//! every call is translated into a typed outcome with a `success` flag and a
//! human-readable `message`. Transport errors never leave this module.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "http://jwxt.gduf.edu.cn/app.do";

const MSG_LOGIN_FAILED: &str = "Academic-affairs login failed";
const MSG_TIMEOUT: &str = "Request timed out, please try again later";
const MSG_SYSTEM: &str = "System error, please contact the administrator";

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: Option<String>,
    pub success: bool,
    pub message: String,
}

impl LoginOutcome {
    fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            token: None,
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileOutcome {
    pub success: bool,
    pub data: Option<ExternalProfile>,
    pub message: String,
}

impl ProfileOutcome {
    pub fn fetched(profile: ExternalProfile) -> Self {
        Self {
            success: true,
            data: Some(profile),
            message: "Success".to_string(),
        }
    }

    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
        }
    }
}

/// Student details as reported by the academic-affairs system.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalProfile {
    pub student_id: Option<String>,
    pub name: Option<String>,
    pub college: Option<String>,
    pub major: Option<String>,
    pub class_name: Option<String>,
    pub grade: Option<String>,
    pub raw: Value,
}

impl ExternalProfile {
    /// Reads the remote's field names: `xh` student id, `xm` name, `yxmc`
    /// college, `zymc` major, `bj` class, `nj` grade.
    pub fn from_remote(raw: Value) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        Some(Self {
            student_id: text(&raw, "xh"),
            name: text(&raw, "xm"),
            college: text(&raw, "yxmc"),
            major: text(&raw, "zymc"),
            class_name: text(&raw, "bj"),
            grade: text(&raw, "nj"),
            raw,
        })
    }
}

fn text(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait AcademicAffairs: Send + Sync {
    async fn login(&self, student_id: &str, password: &str) -> LoginOutcome;

    async fn fetch_profile(&self, student_id: &str, token: &str) -> ProfileOutcome;

    /// Logs in and, only if that worked, fetches the profile.
    async fn validate_and_fetch(&self, student_id: &str, password: &str) -> ProfileOutcome {
        let login = self.login(student_id, password).await;
        let token = match login.token {
            Some(token) if login.success => token,
            _ => return ProfileOutcome::failed(login.message),
        };
        self.fetch_profile(student_id, &token).await
    }
}

pub struct JwxtClient {
    client: reqwest::Client,
    base_url: String,
}

impl JwxtClient {
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn describe(&self, call: &str, student_id: &str, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            log::error!("JWXT {} timeout for student_id: {}", call, student_id);
            MSG_TIMEOUT.to_string()
        } else if let Some(status) = err.status() {
            log::error!(
                "JWXT {} HTTP error for student_id: {}, status: {}",
                call,
                student_id,
                status
            );
            format!("Network error: {}", status.as_u16())
        } else {
            log::error!("JWXT {} error for student_id: {}, error: {}", call, student_id, err);
            MSG_SYSTEM.to_string()
        }
    }
}

#[async_trait]
impl AcademicAffairs for JwxtClient {
    async fn login(&self, student_id: &str, password: &str) -> LoginOutcome {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("method", "authUser"), ("xh", student_id), ("pwd", password)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let body = match response {
            Ok(response) => response.bytes().await,
            Err(e) => return LoginOutcome::failed(self.describe("login", student_id, &e)),
        };
        let body = match body {
            Ok(body) => body,
            Err(e) => return LoginOutcome::failed(self.describe("login", student_id, &e)),
        };

        let data: Value = if body.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_slice(&body) {
                Ok(data) => data,
                Err(e) => {
                    log::error!(
                        "JWXT login returned non-JSON body for student_id: {}, error: {}",
                        student_id,
                        e
                    );
                    return LoginOutcome::failed(MSG_SYSTEM);
                }
            }
        };

        let succeeded = data.get("success").and_then(Value::as_bool).unwrap_or(false);
        match data.get("token").and_then(Value::as_str) {
            Some(token) if succeeded && !token.is_empty() => LoginOutcome {
                token: Some(token.to_string()),
                success: true,
                message: "Login succeeded".to_string(),
            },
            _ => LoginOutcome::failed(
                data.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(MSG_LOGIN_FAILED),
            ),
        }
    }

    async fn fetch_profile(&self, student_id: &str, token: &str) -> ProfileOutcome {
        let response = self
            .client
            .post(&self.base_url)
            .query(&[("method", "getUserInfo"), ("xh", student_id)])
            .header("tokens", token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        let data = match response {
            Ok(response) => response.json::<Value>().await,
            Err(e) => return ProfileOutcome::failed(self.describe("get user info", student_id, &e)),
        };

        match data {
            Ok(data) => match ExternalProfile::from_remote(data) {
                Some(profile) => ProfileOutcome::fetched(profile),
                None => {
                    log::error!("JWXT user info for student_id: {} is not an object", student_id);
                    ProfileOutcome::failed(MSG_SYSTEM)
                }
            },
            Err(e) => ProfileOutcome::failed(self.describe("get user info", student_id, &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    use super::*;

    async fn remote(
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        match params.get("method").map(String::as_str) {
            Some("authUser") => {
                if params.get("pwd").map(String::as_str) == Some("right") {
                    Json(json!({"success": true, "token": "remote-token"})).into_response()
                } else {
                    Json(json!({"success": false, "message": "bad password"})).into_response()
                }
            }
            Some("getUserInfo") => {
                if headers.get("tokens").and_then(|v| v.to_str().ok()) != Some("remote-token") {
                    return StatusCode::FORBIDDEN.into_response();
                }
                Json(json!({
                    "xh": params.get("xh"),
                    "xm": "Bob",
                    "yxmc": "Engineering",
                    "zymc": "Computer Science",
                    "bj": "CS-1",
                    "nj": "2021",
                    "xz": 4
                }))
                .into_response()
            }
            _ => StatusCode::BAD_REQUEST.into_response(),
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/app.do", addr)
    }

    async fn client() -> JwxtClient {
        let base = serve(Router::new().route("/app.do", get(remote).post(remote))).await;
        JwxtClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn remote_fields_are_translated() {
        let profile = ExternalProfile::from_remote(json!({
            "xm": "Bob", "yxmc": "Eng", "zymc": "CS", "bj": "1", "nj": 2021, "qq": null
        }))
        .unwrap();
        assert_eq!(profile.name.as_deref(), Some("Bob"));
        assert_eq!(profile.college.as_deref(), Some("Eng"));
        assert_eq!(profile.major.as_deref(), Some("CS"));
        assert_eq!(profile.class_name.as_deref(), Some("1"));
        assert_eq!(profile.grade.as_deref(), Some("2021"));
        assert!(ExternalProfile::from_remote(json!(["not", "an", "object"])).is_none());
    }

    #[tokio::test]
    async fn validate_and_fetch_returns_profile() {
        let outcome = client().await.validate_and_fetch("2021001", "right").await;
        assert!(outcome.success, "{}", outcome.message);
        let profile = outcome.data.unwrap();
        assert_eq!(profile.name.as_deref(), Some("Bob"));
        assert_eq!(profile.student_id.as_deref(), Some("2021001"));
    }

    #[tokio::test]
    async fn remote_rejection_message_is_passed_through() {
        let outcome = client().await.login("2021001", "wrong").await;
        assert!(!outcome.success);
        assert!(outcome.token.is_none());
        assert_eq!(outcome.message, "bad password");
    }

    #[tokio::test]
    async fn http_status_errors_are_reported() {
        let outcome = client().await.fetch_profile("2021001", "stale-token").await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Network error: 403");
    }

    #[tokio::test]
    async fn timeouts_are_reported() {
        let base = serve(Router::new().route(
            "/app.do",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({"success": true, "token": "late"}))
            }),
        ))
        .await;
        let client = JwxtClient::new(base, Duration::from_millis(200)).unwrap();
        let outcome = client.login("2021001", "right").await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, MSG_TIMEOUT);
    }

    #[tokio::test]
    async fn unreachable_remote_is_a_system_error() {
        let client = JwxtClient::new("http://127.0.0.1:9/app.do", Duration::from_secs(2)).unwrap();
        let outcome = client.login("2021001", "right").await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, MSG_SYSTEM);
    }

    struct Counting {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl AcademicAffairs for Counting {
        async fn login(&self, _: &str, _: &str) -> LoginOutcome {
            LoginOutcome::failed("nope")
        }

        async fn fetch_profile(&self, _: &str, _: &str) -> ProfileOutcome {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            ProfileOutcome::fetched(ExternalProfile::default())
        }
    }

    #[tokio::test]
    async fn failed_login_short_circuits() {
        let bridge = Arc::new(Counting {
            fetches: AtomicUsize::new(0),
        });
        let outcome = bridge.validate_and_fetch("2021001", "pw").await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "nope");
        assert_eq!(bridge.fetches.load(Ordering::SeqCst), 0);
    }
}
