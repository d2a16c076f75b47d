//! Caller identity extraction.
//!
//! Token validation belongs to the account service in front of this one;
//! here the bearer token is taken as the user id.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Header naming the device that performs the request.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Authenticated caller extracted from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The bearer token, or "anonymous" when authentication is disabled
    pub user_id: String,
    /// Value of `X-Device-Id`, if sent
    pub device_id: Option<String>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let device_id = parts
            .headers
            .get(DEVICE_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").trim();
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                Ok(AuthContext {
                    user_id: token.to_string(),
                    device_id,
                })
            }
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            )),
            None if state.config.auth_secret.is_none() => Ok(AuthContext {
                user_id: "anonymous".to_string(),
                device_id,
            }),
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}
