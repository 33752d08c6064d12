use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use time::{macros::datetime, Duration};
use tourauth::{
    app::build_app,
    auth::{
        memory::MemoryUserStore,
        repo::UserStore,
        repo_types::{Role, UserChanges},
    },
    clock::ManualClock,
    config::{AppConfig, Environment},
    mail::MemoryMailer,
    state::AppState,
};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    users: Arc<MemoryUserStore>,
    mailer: Arc<MemoryMailer>,
    clock: Arc<ManualClock>,
}

impl TestApp {
    fn spawn() -> Self {
        Self::with_config(AppConfig::for_tests())
    }

    fn with_config(config: AppConfig) -> Self {
        let users = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(MemoryMailer::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 8:00 UTC)));
        let state = AppState::from_parts(config, users.clone(), mailer.clone(), clock.clone())
            .expect("state");
        Self {
            router: build_app(state),
            users,
            mailer,
            clock,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        auth: Option<&str>,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .expect("request");

        let res = self.router.clone().oneshot(req).await.expect("response");
        let status = res.status();
        let set_cookie = res
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, set_cookie, json)
    }

    async fn signup(&self, email: &str, password: &str) -> (String, String) {
        let (status, _, body) = self
            .call(
                Method::POST,
                "/api/v1/users/signup",
                None,
                None,
                Some(json!({
                    "email": email,
                    "password": password,
                    "passwordConfirm": password,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["token"].as_str().expect("token").to_string(),
            body["data"]["user"]["id"].as_str().expect("id").to_string(),
        )
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        let (status, _, body) = self
            .call(
                Method::POST,
                "/api/v1/users/login",
                None,
                None,
                Some(json!({ "email": email, "password": password })),
            )
            .await;
        (status, body)
    }

    fn last_secret(&self) -> String {
        let mail = self.mailer.attempts().pop().expect("mail attempted");
        mail.body
            .split("/resetPassword/")
            .nth(1)
            .and_then(|rest| rest.split('.').next())
            .expect("reset url")
            .to_string()
    }

    async fn promote(&self, id: &str, role: Role) {
        let id = id.parse().expect("uuid");
        self.users
            .update_user(
                id,
                UserChanges {
                    role: Some(role),
                    ..UserChanges::default()
                },
            )
            .await
            .expect("store")
            .expect("user");
    }
}

#[tokio::test]
async fn signup_then_login_returns_fresh_token_for_same_user() {
    let app = TestApp::spawn();
    let (signup_token, id) = app.signup("a@x.com", "secret123").await;

    let (status, body) = app.login("a@x.com", "secret123").await;
    assert_eq!(status, StatusCode::OK);
    let login_token = body["token"].as_str().unwrap();
    assert_ne!(login_token, signup_token);
    assert_eq!(body["data"]["user"]["id"], id);
    assert!(body["data"]["user"].get("passwordHash").is_none());

    let (status, _, me) = app
        .call(Method::GET, "/api/v1/users/me", Some(login_token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["data"]["user"]["id"], id);
    assert_eq!(me["data"]["user"]["role"], "user");
}

#[tokio::test]
async fn signup_sets_http_only_cookie_usable_for_auth() {
    let app = TestApp::spawn();
    let (_, set_cookie, body) = app
        .call(
            Method::POST,
            "/api/v1/users/signup",
            None,
            None,
            Some(json!({
                "email": "a@x.com",
                "password": "secret123",
                "passwordConfirm": "secret123",
            })),
        )
        .await;
    let set_cookie = set_cookie.expect("cookie set");
    assert!(set_cookie.contains("HttpOnly"));
    let token = body["token"].as_str().unwrap();
    assert!(set_cookie.starts_with(&format!("jwt={token}")));

    let (status, _, _) = app
        .call(
            Method::GET,
            "/api/v1/users/me",
            None,
            Some(&format!("jwt={token}")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn signup_errors() {
    let app = TestApp::spawn();
    app.signup("a@x.com", "secret123").await;

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/signup",
            None,
            None,
            Some(json!({
                "email": "A@X.com",
                "password": "secret123",
                "passwordConfirm": "secret123",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "fail");

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/signup",
            None,
            None,
            Some(json!({
                "email": "b@x.com",
                "password": "secret123",
                "passwordConfirm": "secret321",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Passwords do not match");
}

#[tokio::test]
async fn login_does_not_reveal_which_field_was_wrong() {
    let app = TestApp::spawn();
    app.signup("a@x.com", "secret123").await;

    let (s1, b1) = app.login("nobody@x.com", "secret123").await;
    let (s2, b2) = app.login("a@x.com", "wrongpass").await;
    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1["message"], b2["message"]);

    let (s3, _) = app.login("a@x.com", "").await;
    assert_eq!(s3, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_token() {
    let app = TestApp::spawn();
    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/me", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["message"],
        "You are not logged in! Please log in to get access."
    );

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", Some("forged.token.value"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_stops_working_after_expiry() {
    let app = TestApp::spawn();
    let (token, _) = app.signup("a@x.com", "secret123").await;
    app.clock.advance(Duration::days(89));
    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(Duration::days(1));
    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/me", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Your token has expired! Please log in again.");
}

#[tokio::test]
async fn update_password_invalidates_earlier_tokens() {
    let app = TestApp::spawn();
    let (old_token, _) = app.signup("a@x.com", "secret123").await;
    app.clock.advance(Duration::minutes(5));

    let (status, _, body) = app
        .call(
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&old_token),
            None,
            Some(json!({
                "passwordCurrent": "secret123",
                "password": "newsecret1",
                "passwordConfirm": "newsecret1",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let new_token = body["token"].as_str().unwrap().to_string();

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/me", Some(&old_token), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["message"],
        "User recently changed password! Please log in again."
    );

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", Some(&new_token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn update_password_rejects_wrong_current_password() {
    let app = TestApp::spawn();
    let (token, _) = app.signup("a@x.com", "secret123").await;
    let (status, _, _) = app
        .call(
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&token),
            None,
            Some(json!({
                "passwordCurrent": "nope-nope",
                "password": "newsecret1",
                "passwordConfirm": "newsecret1",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("a@x.com", "secret123").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reset_secret_is_single_use() {
    let app = TestApp::spawn();
    let (old_token, _) = app.signup("a@x.com", "secret123").await;
    app.clock.advance(Duration::minutes(1));

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({ "email": "a@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(!body.to_string().contains(&app.last_secret()));

    let secret = app.last_secret();
    let uri = format!("/api/v1/users/resetPassword/{secret}");
    let payload = json!({ "password": "brandnew1", "passwordConfirm": "brandnew1" });

    let (status, _, body) = app
        .call(Method::PATCH, &uri, None, None, Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["token"].is_string());

    let (status, _, body) = app
        .call(Method::PATCH, &uri, None, None, Some(payload))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Token is invalid or has expired");

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", Some(&old_token), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.login("a@x.com", "brandnew1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reset_secret_expires_after_window() {
    let app = TestApp::spawn();
    app.signup("a@x.com", "secret123").await;
    app.call(
        Method::POST,
        "/api/v1/users/forgotPassword",
        None,
        None,
        Some(json!({ "email": "a@x.com" })),
    )
    .await;
    let secret = app.last_secret();
    app.clock.advance(Duration::minutes(11));

    let (status, _, _) = app
        .call(
            Method::PATCH,
            &format!("/api/v1/users/resetPassword/{secret}"),
            None,
            None,
            Some(json!({ "password": "brandnew1", "passwordConfirm": "brandnew1" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_email_rolls_back_reset_secret() {
    let app = TestApp::spawn();
    app.signup("a@x.com", "secret123").await;
    app.mailer.set_failing(true);

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({ "email": "a@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body["message"],
        "There was an error sending the email. Try again later!"
    );

    let secret = app.last_secret();
    let (status, _, body) = app
        .call(
            Method::PATCH,
            &format!("/api/v1/users/resetPassword/{secret}"),
            None,
            None,
            Some(json!({ "password": "brandnew1", "passwordConfirm": "brandnew1" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Token is invalid or has expired");
}

#[tokio::test]
async fn forgot_password_for_unknown_email_is_not_found() {
    let app = TestApp::spawn();
    let (status, _, _) = app
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({ "email": "ghost@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_are_role_gated() {
    let app = TestApp::spawn();
    let (guide_token, guide_id) = app.signup("guide@x.com", "secret123").await;
    let (admin_token, admin_id) = app.signup("admin@x.com", "secret123").await;
    app.promote(&guide_id, Role::Guide).await;
    app.promote(&admin_id, Role::Admin).await;

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users", Some(&guide_token), None, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You do not have permission to perform this action");

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users", Some(&admin_token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 2);

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = app
        .call(
            Method::PATCH,
            &format!("/api/v1/users/{guide_id}"),
            Some(&admin_token),
            None,
            Some(json!({ "role": "lead-guide" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["role"], "lead-guide");

    let (status, _, _) = app
        .call(
            Method::DELETE,
            &format!("/api/v1/users/{guide_id}"),
            Some(&admin_token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .call(
            Method::GET,
            &format!("/api/v1/users/{guide_id}"),
            Some(&admin_token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_me_deactivates_account() {
    let app = TestApp::spawn();
    let (token, _) = app.signup("a@x.com", "secret123").await;
    let (status, _, _) = app
        .call(Method::DELETE, "/api/v1/users/deleteMe", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("a@x.com", "secret123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_me_changes_profile_but_not_password() {
    let app = TestApp::spawn();
    let (token, _) = app.signup("a@x.com", "secret123").await;

    let (status, _, _) = app
        .call(
            Method::PATCH,
            "/api/v1/users/updateMe",
            Some(&token),
            None,
            Some(json!({ "password": "sneaky123", "passwordConfirm": "sneaky123" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = app
        .call(
            Method::PATCH,
            "/api/v1/users/updateMe",
            Some(&token),
            None,
            Some(json!({ "name": "Annabel" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["name"], "Annabel");
}

#[tokio::test]
async fn session_route_never_rejects() {
    let app = TestApp::spawn();
    let (token, id) = app.signup("a@x.com", "secret123").await;

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/session", None, None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["user"].is_null());

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/session", Some("garbage"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["user"].is_null());

    let (status, _, body) = app
        .call(
            Method::GET,
            "/api/v1/users/session",
            None,
            Some(&format!("jwt={token}")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["id"], id);
}

#[tokio::test]
async fn logout_replaces_cookie() {
    let app = TestApp::spawn();
    let (status, set_cookie, _) = app
        .call(Method::GET, "/api/v1/users/logout", None, None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let set_cookie = set_cookie.expect("cookie");
    assert!(set_cookie.starts_with("jwt=loggedout"));

    let (status, _, _) = app
        .call(Method::GET, "/api/v1/users/me", None, Some("jwt=loggedout"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn development_mode_adds_error_detail() {
    let mut config = AppConfig::for_tests();
    config.env = Environment::Development;
    let app = TestApp::with_config(config);
    app.mailer.set_failing(true);
    app.signup("a@x.com", "secret123").await;

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({ "email": "a@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("mail gateway unavailable"));

    let (status, _, body) = TestApp::spawn()
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({ "email": "a@x.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.get("detail").is_none());
}

#[tokio::test]
async fn malformed_bodies_get_json_error_envelope() {
    let app = TestApp::spawn();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/users/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let res = app.router.clone().oneshot(req).await.expect("response");
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["status"], "fail");
    assert!(body["message"].is_string());

    let (status, _, body) = app
        .call(Method::POST, "/api/v1/users/login", None, None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn malformed_user_id_gets_json_error_envelope() {
    let app = TestApp::spawn();
    let (token, id) = app.signup("admin@x.com", "secret123").await;
    app.promote(&id, Role::Admin).await;

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/not-a-uuid", Some(&token), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "fail");
}

#[tokio::test]
async fn forgot_password_without_email_is_bad_request() {
    let app = TestApp::spawn();
    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/v1/users/forgotPassword",
            None,
            None,
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please provide an email");
}

#[tokio::test]
async fn session_ignores_token_from_before_password_change() {
    let app = TestApp::spawn();
    let (old_token, _) = app.signup("a@x.com", "secret123").await;
    app.clock.advance(Duration::seconds(30));

    let (status, _, _) = app
        .call(
            Method::PATCH,
            "/api/v1/users/updateMyPassword",
            Some(&old_token),
            None,
            Some(json!({
                "passwordCurrent": "secret123",
                "password": "newsecret1",
                "passwordConfirm": "newsecret1",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = app
        .call(Method::GET, "/api/v1/users/session", Some(&old_token), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["user"].is_null());
}
