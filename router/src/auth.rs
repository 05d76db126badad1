//! Bearer API key authentication with three ordered roles.
//!
//! Keys are configured as hex SHA-256 digests, so the config never holds a
//! usable token. With no keys configured every request is let through.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sha2::{Digest, Sha256};

use fleet_common::OperationResponse;

use crate::config::AuthConfig;
use crate::AppState;

/// Access level. Each role includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "operator" => Ok(Role::Operator),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::InvalidRole(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Unknown role '{0}'")]
    InvalidRole(String),
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid API key")]
    InvalidToken,
    #[error("Insufficient role")]
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::InvalidRole(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
        };
        (status, Json(OperationResponse::failed(self.to_string()))).into_response()
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub name: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone)]
struct KeyEntry {
    name: Option<String>,
    role: Role,
}

/// Configured API keys, indexed by digest.
#[derive(Debug, Default)]
pub struct ApiKeyAuth {
    keys: HashMap<String, KeyEntry>,
}

impl ApiKeyAuth {
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let mut keys = HashMap::new();
        for key in &config.api_keys {
            let role = key.role.parse()?;
            keys.insert(
                key.key_sha256.trim().to_ascii_lowercase(),
                KeyEntry {
                    name: key.name.clone(),
                    role,
                },
            );
        }
        Ok(Self { keys })
    }

    /// True when no keys are configured.
    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve the caller from the `Authorization` header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Caller, AuthError> {
        if self.is_open() {
            return Ok(Caller {
                name: None,
                role: Role::Admin,
            });
        }

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        self.keys
            .get(&hash_token(token))
            .map(|entry| Caller {
                name: entry.name.clone(),
                role: entry.role,
            })
            .ok_or(AuthError::InvalidToken)
    }

    pub fn authorize(&self, headers: &HeaderMap, required: Role) -> Result<Caller, AuthError> {
        let caller = self.authenticate(headers)?;
        if caller.role < required {
            tracing::debug!(caller = ?caller.name, role = ?caller.role, required = ?required, "Access denied");
            return Err(AuthError::Forbidden);
        }
        Ok(caller)
    }
}

/// Hex SHA-256 of a bearer token, as stored in the config.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

async fn require(state: &AppState, required: Role, request: Request, next: Next) -> Response {
    match state.auth.authorize(request.headers(), required) {
        Ok(_) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Middleware: any configured key.
pub async fn require_viewer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    require(&state, Role::Viewer, request, next).await
}

/// Middleware: operator or admin key.
pub async fn require_operator(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    require(&state, Role::Operator, request, next).await
}

/// Middleware: admin key.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    require(&state, Role::Admin, request, next).await
}
