use actix_web::web;
use chrono::Duration;
use jsonwebtoken::Algorithm;
use phone_auth::auth::{
    AuthService, BcryptHasher, GlobalKey, RateLimitKey, RateLimiter, TokenCodec, TokenPolicy,
};
use phone_auth::startup::run;
use phone_auth::store::InMemoryCredentialStore;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

struct AppOptions {
    rotate_refresh_tokens: bool,
    max_attempts: u32,
    rate_limit_key: Arc<dyn RateLimitKey>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            rotate_refresh_tokens: false,
            max_attempts: 5,
            rate_limit_key: Arc::new(GlobalKey),
        }
    }
}

fn spawn_app() -> TestApp {
    spawn_app_with(AppOptions::default())
}

fn spawn_app_with(options: AppOptions) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let service = AuthService::new(
        Arc::new(InMemoryCredentialStore::new()),
        Arc::new(BcryptHasher::new(4)),
        TokenCodec::new(&SecretString::from(SECRET.to_string()), Algorithm::HS256),
        RateLimiter::new(options.max_attempts, std::time::Duration::from_secs(180)),
        options.rate_limit_key,
        TokenPolicy {
            access_ttl: Duration::minutes(30),
            refresh_ttl: Duration::days(7),
            rotate_refresh_tokens: options.rotate_refresh_tokens,
        },
    )
    .expect("Failed to build auth service");

    let server = run(listener, web::Data::new(service)).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/auth/register",
            &json!({ "username": username, "password": password }),
        )
        .await
    }

    async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/auth/login",
            &json!({ "username": username, "password": password }),
        )
        .await
    }

    /// Register then log in, returning the parsed token pair
    async fn signed_in(&self, username: &str) -> Value {
        assert_eq!(201, self.register(username, "Secret123!").await.status().as_u16());
        let response = self.login(username, "Secret123!").await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    async fn me(&self, bearer: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(&format!("{}/auth/me", self.address));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request.")
    }
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    body["code"].as_str().unwrap_or_default().to_string()
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_for_valid_data() {
    let app = spawn_app();

    let response = app
        .post_json(
            "/auth/register",
            &json!({
                "username": "alice",
                "password": "Secret123!",
                "first_name": "Alice",
                "phone_number": "+1 555 0100",
                "age": 30
            }),
        )
        .await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body.get("message").is_some());
    assert!(body.get("access_token").is_none());
}

#[tokio::test]
async fn register_returns_400_for_duplicate_username() {
    let app = spawn_app();

    assert_eq!(201, app.register("alice", "Secret123!").await.status().as_u16());
    let response = app.register("alice", "Another123!").await;

    assert_eq!(400, response.status().as_u16());
    assert_eq!("DUPLICATE_HANDLE", error_code(response).await);
}

#[tokio::test]
async fn register_returns_400_when_data_is_invalid() {
    let app = spawn_app();
    let test_cases = vec![
        (json!({ "username": "", "password": "Secret123!" }), "empty username"),
        (json!({ "username": "al", "password": "Secret123!" }), "short username"),
        (json!({ "username": "bad name", "password": "Secret123!" }), "space in username"),
        (json!({ "username": "alice", "password": "short" }), "short password"),
        (
            json!({ "username": "alice", "password": "p".repeat(72) }),
            "password past bcrypt limit",
        ),
        (
            json!({ "username": "alice", "password": "Secret123!", "age": 200 }),
            "age out of range",
        ),
        (
            json!({ "username": "alice", "password": "Secret123!", "phone_number": "call me" }),
            "malformed phone number",
        ),
    ];

    for (body, description) in test_cases {
        let response = app.post_json("/auth/register", &body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
        assert_eq!("VALIDATION_ERROR", error_code(response).await, "{}", description);
    }
}

#[tokio::test]
async fn register_returns_400_when_fields_are_missing() {
    let app = spawn_app();

    let response = app
        .post_json("/auth/register", &json!({ "username": "alice" }))
        .await;

    assert_eq!(400, response.status().as_u16());
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_token_pair_for_valid_credentials() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;

    assert_eq!(tokens["token_type"], "bearer");
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();
    assert_eq!(access.split('.').count(), 3);
    assert_eq!(refresh.split('.').count(), 3);
    assert_ne!(access, refresh);
}

#[tokio::test]
async fn login_accepts_form_encoded_credentials() {
    let app = spawn_app();
    app.register("alice", "Secret123!").await;

    let response = app
        .client
        .post(&format!("{}/auth/login", app.address))
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("grant_type=password&username=alice&password=Secret123%21")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    app.register("alice", "Secret123!").await;

    let wrong_password = app.login("alice", "Wrong1234!").await;
    let unknown_user = app.login("mallory", "Secret123!").await;

    assert_eq!(401, wrong_password.status().as_u16());
    assert_eq!(401, unknown_user.status().as_u16());

    let first: Value = wrong_password.json().await.unwrap();
    let second: Value = unknown_user.json().await.unwrap();
    assert_eq!(first["code"], "INVALID_CREDENTIALS");
    assert_eq!(first["code"], second["code"]);
    assert_eq!(first["message"], second["message"]);
}

#[tokio::test]
async fn login_rejects_password_extended_past_bcrypt_limit() {
    let app = spawn_app();
    let longest = "p".repeat(71);
    assert_eq!(201, app.register("alice", &longest).await.status().as_u16());

    assert_eq!(200, app.login("alice", &longest).await.status().as_u16());

    let response = app.login("alice", &format!("{}WRONG-SUFFIX", longest)).await;
    assert_eq!(401, response.status().as_u16());
    assert_eq!("INVALID_CREDENTIALS", error_code(response).await);
}

#[tokio::test]
async fn sixth_login_within_window_is_rate_limited() {
    let app = spawn_app();
    app.register("alice", "Secret123!").await;

    for _ in 0..5 {
        let response = app.login("alice", "Wrong1234!").await;
        assert_eq!(401, response.status().as_u16());
    }

    // correct credentials are refused too once the budget is spent
    let response = app.login("alice", "Secret123!").await;
    assert_eq!(429, response.status().as_u16());

    let retry_after: u64 = response
        .headers()
        .get("Retry-After")
        .expect("Missing Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1 && retry_after <= 180);
    assert_eq!("RATE_LIMITED", error_code(response).await);
}

#[tokio::test]
async fn global_budget_is_shared_between_usernames() {
    let app = spawn_app_with(AppOptions {
        max_attempts: 2,
        ..AppOptions::default()
    });

    app.login("alice", "Secret123!").await;
    app.login("bob", "Secret123!").await;

    assert_eq!(429, app.login("carol", "Secret123!").await.status().as_u16());
}

#[tokio::test]
async fn per_username_budgets_are_independent() {
    let app = spawn_app_with(AppOptions {
        max_attempts: 1,
        rate_limit_key: Arc::new(phone_auth::auth::PerHandleKey),
        ..AppOptions::default()
    });

    assert_eq!(401, app.login("alice", "Secret123!").await.status().as_u16());
    assert_eq!(401, app.login("bob", "Secret123!").await.status().as_u16());
    assert_eq!(429, app.login("alice", "Secret123!").await.status().as_u16());
}

// --- Refresh Tests ---

#[tokio::test]
async fn refresh_returns_new_access_token() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;

    let response = app
        .post_json(
            "/auth/refresh",
            &json!({ "refresh_token": tokens["refresh_token"] }),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["token_type"], "bearer");
    assert!(body.get("refresh_token").is_none());

    let access = body["access_token"].as_str().unwrap();
    assert_eq!(200, app.me(Some(access)).await.status().as_u16());
}

#[tokio::test]
async fn refresh_token_can_be_reused_without_rotation() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;
    let body = json!({ "refresh_token": tokens["refresh_token"] });

    assert_eq!(200, app.post_json("/auth/refresh", &body).await.status().as_u16());
    assert_eq!(200, app.post_json("/auth/refresh", &body).await.status().as_u16());
}

#[tokio::test]
async fn rotation_invalidates_the_presented_refresh_token() {
    let app = spawn_app_with(AppOptions {
        rotate_refresh_tokens: true,
        ..AppOptions::default()
    });
    let tokens = app.signed_in("alice").await;

    let response = app
        .post_json(
            "/auth/refresh",
            &json!({ "refresh_token": tokens["refresh_token"] }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();
    let next = rotated["refresh_token"].as_str().expect("Missing rotated token");
    assert_ne!(next, tokens["refresh_token"].as_str().unwrap());

    let replay = app
        .post_json(
            "/auth/refresh",
            &json!({ "refresh_token": tokens["refresh_token"] }),
        )
        .await;
    assert_eq!(401, replay.status().as_u16());

    let response = app
        .post_json("/auth/refresh", &json!({ "refresh_token": next }))
        .await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_rejects_unknown_and_access_tokens() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;

    let cases = vec![
        (json!({ "refresh_token": "not-a-token" }), "garbage"),
        (json!({ "refresh_token": tokens["access_token"] }), "access token"),
    ];

    for (body, description) in cases {
        let response = app.post_json("/auth/refresh", &body).await;
        assert_eq!(401, response.status().as_u16(), "{}", description);
        assert_eq!("INVALID_TOKEN", error_code(response).await, "{}", description);
    }
}

// --- Logout Tests ---

#[tokio::test]
async fn logout_revokes_refresh_token() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;
    let body = json!({ "refresh_token": tokens["refresh_token"] });

    let response = app.post_json("/auth/logout", &body).await;
    assert_eq!(200, response.status().as_u16());

    assert_eq!(401, app.post_json("/auth/refresh", &body).await.status().as_u16());
    assert_eq!(401, app.post_json("/auth/logout", &body).await.status().as_u16());
}

#[tokio::test]
async fn logout_leaves_other_sessions_alive() {
    let app = spawn_app();
    let first = app.signed_in("alice").await;
    let second: Value = app
        .login("alice", "Secret123!")
        .await
        .json()
        .await
        .unwrap();

    app.post_json(
        "/auth/logout",
        &json!({ "refresh_token": first["refresh_token"] }),
    )
    .await;

    let response = app
        .post_json(
            "/auth/refresh",
            &json!({ "refresh_token": second["refresh_token"] }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let app = spawn_app();
    let first = app.signed_in("alice").await;
    let second: Value = app
        .login("alice", "Secret123!")
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .post_json(
            "/auth/logout_all",
            &json!({ "refresh_token": first["refresh_token"] }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revoked"], 2);

    let response = app
        .post_json(
            "/auth/refresh",
            &json!({ "refresh_token": second["refresh_token"] }),
        )
        .await;
    assert_eq!(401, response.status().as_u16());
}

// --- Protected Route Tests ---

#[tokio::test]
async fn me_returns_profile_for_valid_access_token() {
    let app = spawn_app();
    app.post_json(
        "/auth/register",
        &json!({
            "username": "alice",
            "password": "Secret123!",
            "first_name": "Alice",
            "age": 30
        }),
    )
    .await;
    let tokens: Value = app.login("alice", "Secret123!").await.json().await.unwrap();

    let response = app.me(tokens["access_token"].as_str()).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["first_name"], "Alice");
    assert_eq!(body["age"], 30);
    assert!(body["phone_number"].is_null());
    assert!(body.get("password").is_none());
    assert!(body.get("hashed_password").is_none());
}

#[tokio::test]
async fn me_requires_a_bearer_token() {
    let app = spawn_app();

    let response = app.me(None).await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!("MISSING_TOKEN", error_code(response).await);
}

#[tokio::test]
async fn me_rejects_invalid_tokens() {
    let app = spawn_app();
    let tokens = app.signed_in("alice").await;

    let access = tokens["access_token"].as_str().unwrap();
    let at = access.rfind('.').unwrap() + 10;
    let replacement = if &access[at..at + 1] == "A" { "B" } else { "A" };
    let tampered = format!("{}{}{}", &access[..at], replacement, &access[at + 1..]);

    let cases = vec![
        ("garbage".to_string(), "garbage"),
        (tampered, "tampered signature"),
        (
            tokens["refresh_token"].as_str().unwrap().to_string(),
            "refresh token",
        ),
    ];

    for (token, description) in cases {
        let response = app.me(Some(&token)).await;
        assert_eq!(401, response.status().as_u16(), "{}", description);
        assert_eq!("INVALID_TOKEN", error_code(response).await, "{}", description);
    }
}
