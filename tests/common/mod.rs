#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use student_portal::api::cors_layer;
use student_portal::auth::AuthService;
use student_portal::binding::BindingService;
use student_portal::bridge::{AcademicAffairs, ExternalProfile, LoginOutcome, ProfileOutcome};
use student_portal::revocation::MemoryRevocationStore;
use student_portal::state::AppState;
use student_portal::store::MemoryStore;
use student_portal::token::TokenService;
use student_portal::vault::Vault;

pub const PORTAL_ORIGIN: &str = "https://portal.example";

/// Academic-affairs stand-in: one accepted password, a settable name.
pub struct StubBridge {
    pub password: Mutex<String>,
    pub name: Mutex<String>,
}

#[async_trait]
impl AcademicAffairs for StubBridge {
    async fn login(&self, _: &str, password: &str) -> LoginOutcome {
        if *self.password.lock().unwrap() == password {
            LoginOutcome {
                token: Some("remote-token".into()),
                success: true,
                message: "Login succeeded".into(),
            }
        } else {
            LoginOutcome {
                token: None,
                success: false,
                message: "Incorrect student id or password".into(),
            }
        }
    }

    async fn fetch_profile(&self, student_id: &str, _: &str) -> ProfileOutcome {
        let name = self.name.lock().unwrap().clone();
        ProfileOutcome::fetched(ExternalProfile {
            student_id: Some(student_id.to_string()),
            name: Some(name.clone()),
            college: Some("Engineering".into()),
            major: Some("Computer Science".into()),
            class_name: Some("CS-1".into()),
            grade: Some("2021".into()),
            raw: serde_json::json!({ "xh": student_id, "xm": name }),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub bridge: Arc<StubBridge>,
}

pub fn app() -> TestApp {
    build(false)
}

pub fn app_allowing_admins() -> TestApp {
    build(true)
}

fn build(allow_admin_registration: bool) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let bridge = Arc::new(StubBridge {
        password: Mutex::new("jwxt-pw".into()),
        name: Mutex::new("Bob".into()),
    });
    let vault = Vault::new(&format!("{}=", "A".repeat(43))).unwrap();
    let state = AppState {
        store: store.clone(),
        tokens: Arc::new(
            TokenService::new("integration-secret", "HS256", chrono::Duration::minutes(60))
                .unwrap(),
        ),
        revocations: Arc::new(MemoryRevocationStore::new()),
        auth: Arc::new(AuthService::new(store.clone(), 1_000, allow_admin_registration).unwrap()),
        bindings: Arc::new(BindingService::new(
            store,
            Arc::new(vault),
            bridge.clone(),
            chrono::Duration::days(90),
        )),
    };
    TestApp {
        router: student_portal::app(state.clone(), cors_layer(&[PORTAL_ORIGIN.to_string()], true).unwrap()),
        state,
        bridge,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    pub async fn register(&self, username: &str, password: &str, role: Option<&str>) -> Reply {
        let mut body = serde_json::json!({
            "username": username,
            "realname": username.to_uppercase(),
            "email": format!("{}@x.edu", username),
            "password": password,
        });
        if let Some(role) = role {
            body["role"] = Value::from(role);
        }
        self.call(Method::POST, "/api/auth/register", None, Some(body)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Reply {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={}&password={}", username, password)))
            .unwrap();
        self.send(request).await
    }

    /// Registers and logs in, returning the access token.
    pub async fn session(&self, username: &str, password: &str, role: Option<&str>) -> String {
        let registered = self.register(username, password, role).await;
        assert_eq!(registered.status, StatusCode::OK, "{}", registered.body);
        let login = self.login(username, password).await;
        assert_eq!(login.status, StatusCode::OK, "{}", login.body);
        login.body["access_token"].as_str().unwrap().to_string()
    }
}
