use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ActorId;

/// Every user logs in with the same shared password; the user name carries
/// the identity.
#[derive(Debug)]
pub struct SpotbookAuthSource {
    password: String,
}

impl SpotbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SpotbookAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActorError {
    #[error("no user name in startup message")]
    Missing,
    #[error("user name must be a ULID, got {0:?}")]
    Invalid(String),
}

/// Resolve the session user name to an actor id.
pub fn session_actor(user: Option<&str>) -> Result<ActorId, ActorError> {
    let user = user.ok_or(ActorError::Missing)?;
    Ulid::from_string(user).map_err(|_| ActorError::Invalid(user.to_string()))
}
