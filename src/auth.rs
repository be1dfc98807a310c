use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

/// Shorter secrets are treated as absent.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("JWT_SECRET is unset or shorter than {MIN_SECRET_LEN} bytes")] NotConfigured,
    #[error(transparent)] Jwt(#[from] jsonwebtoken::errors::Error),
}

fn secret() -> Result<String, AuthError> {
    env::var("JWT_SECRET")
        .ok()
        .filter(|s| s.len() >= MIN_SECRET_LEN)
        .ok_or(AuthError::NotConfigured)
}

/// True when bearer tokens can be issued and verified.
pub fn is_configured() -> bool {
    secret().is_ok()
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`. Handlers take `Option<Auth>` so
/// anonymous callers fall through to cookie ownership.
pub struct Auth(pub Claims);

impl Auth {
    pub fn is_privileged(&self) -> bool {
        self.0.roles.iter().any(|r| r.is_privileged())
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")));
        };
        match decode_jwt(bearer.token()) {
            Ok(claims) => ready(Ok(Auth(claims))),
            Err(e) => {
                tracing::debug!(error = %e, "rejected bearer token");
                ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT")))
            }
        }
    }
}

/// Create a 24h token for `subject`.
pub fn create_jwt(subject: &str, roles: Vec<Role>) -> Result<String, AuthError> {
    let secret = secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
    let claims = Claims { sub: subject.to_string(), exp: expiration, roles };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}
