//! Session token authentication.
//!
//! Sessions are carried in an HS256 JSON Web Token whose claims bind a user
//! id and a role:
//!
//! ```text
//! { "id": "user-42", "role": "premium", "iat": 1700000000, "exp": 1700003600 }
//! ```
//!
//! These are the tokens the login flow sets in the `token` cookie. The token
//! is read from an `Authorization: Bearer` header or that cookie.
//! Authentication is optional on every route: a missing or invalid token
//! makes the caller anonymous, it never rejects the request. Anonymous
//! callers are identified by their network address instead.
//!
//! # Security Properties
//!
//! - **Role binding**: the role is a signed claim, so a client cannot raise
//!   its own tier
//! - **Time-limited**: `exp` is required and checked with no leeway
//! - **Pinned algorithm**: only HS256 is accepted; `alg: none` and
//!   asymmetric algorithms are refused
//!
//! # Example
//!
//! ```rust
//! use iconforge::server::auth::SessionTokenAuth;
//! use std::time::Duration;
//!
//! let auth = SessionTokenAuth::new("my-secret-key");
//! let (token, _expiry) = auth.sign("user-42", "premium", Duration::from_secs(3600)).unwrap();
//!
//! let ctx = auth.verify(&token).unwrap();
//! assert_eq!(ctx.id, "user-42");
//! assert_eq!(ctx.role, "premium");
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::limiter::AuthContext;

// =============================================================================
// Types
// =============================================================================

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "token";

/// Address used when the caller's address cannot be determined.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Authentication error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token is not a decodable JWT with the expected claims
    MalformedToken(String),

    /// Token has expired
    Expired,

    /// Signature does not match
    InvalidSignature,

    /// Token was signed with an algorithm other than HS256
    InvalidAlgorithm,

    /// A claim cannot be encoded in a token
    InvalidClaim(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MalformedToken(reason) => write!(f, "Malformed session token: {}", reason),
            AuthError::Expired => write!(f, "Session token expired"),
            AuthError::InvalidSignature => write!(f, "Invalid signature"),
            AuthError::InvalidAlgorithm => write!(f, "Unsupported signing algorithm"),
            AuthError::InvalidClaim(reason) => write!(f, "Invalid claim: {}", reason),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::InvalidAlgorithm
            }
            _ => AuthError::MalformedToken(e.to_string()),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// User ids arrive as strings or as numbers, depending on the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum ClaimId {
    Text(String),
    Number(u64),
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimId::Text(id) => f.write_str(id),
            ClaimId::Number(id) => write!(f, "{}", id),
        }
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    id: ClaimId,
    role: String,
    exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<u64>,
}

// =============================================================================
// Session Token Authentication
// =============================================================================

/// Session token signer and verifier (HS256 JWT).
#[derive(Clone)]
pub struct SessionTokenAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionTokenAuth {
    /// Create a new authenticator with the given shared secret.
    ///
    /// The secret should be at least 32 bytes.
    pub fn new(secret_key: impl AsRef<[u8]>) -> Self {
        let secret = secret_key.as_ref();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Mint a token valid for `ttl`.
    ///
    /// Returns the token and its expiry timestamp (Unix epoch seconds).
    pub fn sign(&self, id: &str, role: &str, ttl: Duration) -> Result<(String, u64), AuthError> {
        let expiry = unix_now() + ttl.as_secs();
        let token = self.sign_with_expiry(id, role, expiry)?;
        Ok((token, expiry))
    }

    /// Mint a token with a specific expiry timestamp.
    pub fn sign_with_expiry(&self, id: &str, role: &str, expiry: u64) -> Result<String, AuthError> {
        if id.trim().is_empty() {
            return Err(AuthError::InvalidClaim("id must not be empty".to_string()));
        }
        if role.trim().is_empty() {
            return Err(AuthError::InvalidClaim("role must not be empty".to_string()));
        }

        let claims = SessionClaims {
            id: ClaimId::Text(id.to_string()),
            role: role.to_string(),
            exp: expiry,
            iat: Some(unix_now()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidClaim(e.to_string()))
    }

    /// Verify a token and return the caller it vouches for.
    pub fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = decode::<SessionClaims>(token.trim(), &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let id = claims.id.to_string();
        if id.trim().is_empty() || claims.role.trim().is_empty() {
            return Err(AuthError::InvalidClaim(
                "id and role must not be empty".to_string(),
            ));
        }
        Ok(AuthContext::new(id, claims.role))
    }
}

// =============================================================================
// Request Inspection
// =============================================================================

/// Session token from the `Authorization: Bearer` header, else the cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Best-known network address of the caller.
///
/// The first `X-Forwarded-For` entry is used only when the deployment sits
/// behind a proxy that sets it; otherwise clients could pick their own key.
pub fn source_address(parts: &Parts, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(address) = forwarded {
            return address.to_string();
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

// =============================================================================
// Axum Extractor
// =============================================================================

/// Resolves who is calling from request parts.
#[derive(Clone, Default)]
pub struct SessionResolver {
    /// Token verifier; `None` disables session auth entirely
    pub auth: Option<SessionTokenAuth>,

    /// Trust the `X-Forwarded-For` header for the source address
    pub trust_forwarded_for: bool,
}

impl SessionResolver {
    pub fn new(auth: Option<SessionTokenAuth>, trust_forwarded_for: bool) -> Self {
        Self {
            auth,
            trust_forwarded_for,
        }
    }

    pub fn resolve(&self, parts: &Parts) -> CallerContext {
        let source_address = source_address(parts, self.trust_forwarded_for);

        let auth = match (&self.auth, token_from_headers(&parts.headers)) {
            (Some(verifier), Some(token)) => match verifier.verify(&token) {
                Ok(ctx) => {
                    debug!(user = %ctx.id, role = %ctx.role, "Session token accepted");
                    Some(ctx)
                }
                Err(e @ AuthError::Expired) => {
                    debug!(error = %e, "Ignoring expired session token");
                    None
                }
                Err(e) => {
                    // Forged or corrupted tokens could indicate an attack.
                    warn!(source = %source_address, error = %e, "Ignoring invalid session token");
                    None
                }
            },
            _ => None,
        };

        CallerContext {
            auth,
            source_address,
        }
    }
}

/// Axum extractor for optional authentication.
///
/// Never rejects: requests without a valid session are anonymous.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Verified session, if any
    pub auth: Option<AuthContext>,

    /// Network address used to key anonymous callers
    pub source_address: String,
}

impl<S> FromRequestParts<S> for CallerContext
where
    SessionResolver: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionResolver::from_ref(state).resolve(parts))
    }
}

// =============================================================================
// Tests
// =============================================================================
