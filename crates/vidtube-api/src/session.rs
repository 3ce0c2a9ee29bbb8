//! Access/refresh token issuance, verification, rotation and revocation.
//!
//! Access tokens are stateless and short-lived. The current refresh token is
//! stored on the user row; renewal requires an exact match, so rotating or
//! clearing it invalidates every earlier refresh token for that user.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_db::models::UserRow;
use vidtube_types::api::{AccessClaims, RefreshClaims};
use vidtube_types::models::User;

use crate::error::ApiError;

pub struct SessionConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized(msg) => ApiError::unauthorized(msg),
            SessionError::Internal(e) => ApiError::Database(e),
        }
    }
}

pub struct SessionManager {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn sign_pair(&self, user: &UserRow) -> anyhow::Result<TokenPair> {
        let access_claims = AccessClaims {
            sub: user.id,
            user_name: user.user_name.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            exp: expiry(self.access_ttl),
        };
        let refresh_claims = RefreshClaims {
            sub: user.id,
            jti: Uuid::new_v4(),
            exp: expiry(self.refresh_ttl),
        };

        Ok(TokenPair {
            access_token: encode(&Header::default(), &access_claims, &self.access_encoding)?,
            refresh_token: encode(&Header::default(), &refresh_claims, &self.refresh_encoding)?,
        })
    }

    /// Sign a new access/refresh pair for `user` and store the refresh token,
    /// overwriting whatever was stored before.
    pub fn issue_token_pair(&self, db: &Database, user: &UserRow) -> anyhow::Result<TokenPair> {
        let pair = self.sign_pair(user)?;
        db.set_refresh_token(user.id, Some(&pair.refresh_token))?;
        Ok(pair)
    }

    /// Validate an access token and resolve the user it names.
    pub fn verify_access(&self, db: &Database, token: Option<&str>) -> Result<User, SessionError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::Unauthorized("Unauthorized request"))?;

        let claims = decode::<AccessClaims>(token, &self.access_decoding, &validation())
            .map_err(|e| {
                debug!("Access token rejected: {}", e);
                SessionError::Unauthorized("Invalid access token")
            })?
            .claims;

        let user = db
            .get_user_by_id(claims.sub)?
            .ok_or(SessionError::Unauthorized("Invalid access token"))?;

        Ok(user.into_public())
    }

    /// Exchange a refresh token for a brand-new pair. The presented token must
    /// be validly signed, unexpired, and identical to the one on record.
    pub fn renew(&self, db: &Database, token: Option<&str>) -> Result<(UserRow, TokenPair), SessionError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::Unauthorized("Unauthorized request"))?;

        let claims = decode::<RefreshClaims>(token, &self.refresh_decoding, &validation())
            .map_err(|e| {
                debug!("Refresh token rejected: {}", e);
                SessionError::Unauthorized("Invalid refresh token")
            })?
            .claims;

        let user = db
            .get_user_by_id(claims.sub)?
            .ok_or(SessionError::Unauthorized("Invalid refresh token"))?;

        // The swap only succeeds while `token` is still the stored one, so
        // concurrent renewals with the same token cannot both win.
        let pair = self.sign_pair(&user)?;
        if !db.rotate_refresh_token(user.id, token, &pair.refresh_token)? {
            return Err(SessionError::Unauthorized("Refresh token is expired or used"));
        }
        Ok((user, pair))
    }

    /// Clear the stored refresh token. Any outstanding refresh token for the
    /// user stops working.
    pub fn revoke(&self, db: &Database, user_id: Uuid) -> anyhow::Result<()> {
        db.set_refresh_token(user_id, None)
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

fn expiry(ttl: Duration) -> usize {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
    (chrono::Utc::now() + ttl).timestamp() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidtube_db::models::NewUser;

    fn manager() -> SessionManager {
        SessionManager::new(&SessionConfig {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(86_400),
        })
    }

    fn setup() -> (Database, UserRow) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(
                &NewUser {
                    id: Uuid::new_v4(),
                    user_name: "alice",
                    email: "alice@example.com",
                    full_name: "Alice",
                    avatar: "https://media.test/alice.png",
                    cover_image: None,
                    password_hash: "hash",
                },
                &[],
            )
            .unwrap();
        (db, user)
    }

    #[test]
    fn issued_refresh_token_is_stored() {
        let (db, user) = setup();
        let pair = manager().issue_token_pair(&db, &user).unwrap();

        let stored = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some(pair.refresh_token.as_str()));
    }

    #[test]
    fn access_token_resolves_user() {
        let (db, user) = setup();
        let sessions = manager();
        let pair = sessions.issue_token_pair(&db, &user).unwrap();

        let resolved = sessions.verify_access(&db, Some(&pair.access_token)).unwrap();
        assert_eq!(resolved.id, user.id);
        assert_eq!(resolved.user_name, "alice");
    }

    #[test]
    fn secrets_are_not_interchangeable() {
        let (db, user) = setup();
        let sessions = manager();
        let pair = sessions.issue_token_pair(&db, &user).unwrap();

        assert!(sessions.verify_access(&db, Some(&pair.refresh_token)).is_err());
        assert!(sessions.renew(&db, Some(&pair.access_token)).is_err());
    }

    #[test]
    fn missing_or_garbage_access_token_is_unauthorized() {
        let (db, _) = setup();
        let sessions = manager();
        assert!(matches!(sessions.verify_access(&db, None), Err(SessionError::Unauthorized(_))));
        assert!(matches!(sessions.verify_access(&db, Some("")), Err(SessionError::Unauthorized(_))));
        assert!(matches!(
            sessions.verify_access(&db, Some("not.a.jwt")),
            Err(SessionError::Unauthorized(_))
        ));
    }

    #[test]
    fn expired_access_token_is_unauthorized() {
        let (db, user) = setup();
        let claims = AccessClaims {
            sub: user.id,
            user_name: user.user_name.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            exp: (chrono::Utc::now() - chrono::Duration::minutes(5)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        assert!(matches!(
            manager().verify_access(&db, Some(&token)),
            Err(SessionError::Unauthorized(_))
        ));
    }

    #[test]
    fn renewal_rotates_and_rejects_the_old_token() {
        let (db, user) = setup();
        let sessions = manager();
        let first = sessions.issue_token_pair(&db, &user).unwrap();

        let (_, second) = sessions.renew(&db, Some(&first.refresh_token)).unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        // The rotated-out token is still validly signed and unexpired.
        assert!(matches!(
            sessions.renew(&db, Some(&first.refresh_token)),
            Err(SessionError::Unauthorized(_))
        ));
        assert!(sessions.renew(&db, Some(&second.refresh_token)).is_ok());
    }

    #[test]
    fn concurrent_renewals_with_one_token_have_a_single_winner() {
        let (db, user) = setup();
        let db = std::sync::Arc::new(db);
        let sessions = std::sync::Arc::new(manager());

        for _ in 0..50 {
            let pair = sessions.issue_token_pair(&db, &user).unwrap();
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (db, sessions, barrier) = (db.clone(), sessions.clone(), barrier.clone());
                    let token = pair.refresh_token.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        sessions.renew(&db, Some(&token)).is_ok()
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
    }

    #[test]
    fn revoke_blocks_renewal() {
        let (db, user) = setup();
        let sessions = manager();
        let pair = sessions.issue_token_pair(&db, &user).unwrap();

        sessions.revoke(&db, user.id).unwrap();
        assert!(matches!(
            sessions.renew(&db, Some(&pair.refresh_token)),
            Err(SessionError::Unauthorized(_))
        ));
    }
}
