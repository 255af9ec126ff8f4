/// Authentication Routes
///
/// Thin HTTP adapters over `AuthService`: decode the body, call the service,
/// encode the result. Every failure is an `AppError` rendered by its
/// `ResponseError` impl.

use actix_web::{web, Either, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::auth::{AccessClaims, AuthService, LoginAttempt, Registration};
use crate::error::AppError;
use crate::store::Profile;

/// User registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub phone_number: Option<String>,
    pub age: Option<i32>,
}

/// User login request, accepted as JSON or as an OAuth2 password form
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body of refresh and logout requests
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct LogoutAllResponse {
    pub message: &'static str,
    pub revoked: u64,
}

/// User information response
#[derive(Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub first_name: Option<String>,
    pub phone_number: Option<String>,
    pub age: Option<i32>,
    pub registered_at: String,
}

/// POST /auth/register
///
/// # Errors
/// - 400: Validation error or username already taken
pub async fn register(
    form: web::Json<RegisterRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    service
        .register(Registration {
            handle: form.username,
            password: form.password,
            profile: Profile {
                first_name: form.first_name,
                phone_number: form.phone_number,
                age: form.age,
            },
        })
        .await?;

    Ok(HttpResponse::Created().json(MessageResponse {
        message: "User successfully registered",
    }))
}

/// POST /auth/login
///
/// # Errors
/// - 401: Invalid credentials (same response for unknown user and wrong password)
/// - 429: Login budget exhausted, see `Retry-After`
pub async fn login(
    req: HttpRequest,
    form: Either<web::Json<LoginRequest>, web::Form<LoginRequest>>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let form = match form {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };

    let mut attempt = LoginAttempt::new(form.username, form.password);
    if let Some(peer) = req.peer_addr() {
        attempt = attempt.with_client_ip(peer.ip().to_string());
    }

    let tokens = service.login(attempt).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/refresh
///
/// # Errors
/// - 401: Unknown, revoked or expired refresh token
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let tokens = service.refresh(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(tokens))
}

/// POST /auth/logout
///
/// # Errors
/// - 401: Unknown or already revoked refresh token
pub async fn logout(
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    service.logout(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Logged out",
    }))
}

/// POST /auth/logout_all
///
/// Revokes every session of the user owning the presented refresh token.
pub async fn logout_all(
    form: web::Json<RefreshRequest>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let revoked = service.logout_all(&form.refresh_token).await?;
    Ok(HttpResponse::Ok().json(LogoutAllResponse {
        message: "Logged out from all sessions",
        revoked,
    }))
}

/// GET /auth/me
///
/// **Requires valid access token** in the Authorization header; claims are
/// injected by `JwtMiddleware`.
pub async fn get_current_user(
    claims: web::ReqData<AccessClaims>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user = service.current_user(&claims).await?;

    Ok(HttpResponse::Ok().json(UserResponse {
        id: user.id,
        username: user.handle,
        first_name: user.profile.first_name,
        phone_number: user.profile.phone_number,
        age: user.profile.age,
        registered_at: user.registered_at.to_rfc3339(),
    }))
}
