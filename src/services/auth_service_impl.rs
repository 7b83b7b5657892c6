//! `SeaORM` implementation of the [`AuthService`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::db::{NewUser, Store, User};
use crate::entities::users::{UserRole, UserStatus};
use crate::services::auth_service::{
    AuthError, AuthService, AuthTokens, AuthenticatedIdentity, SignUpData,
};
use crate::token::TokenCodec;

pub struct SeaOrmAuthService {
    store: Store,
    codec: Arc<TokenCodec>,
    security: SecurityConfig,
    revoke_tokens_on_password_change: bool,

    /// Per-user mutexes serializing the revoke-then-issue sequence, so
    /// concurrent sign-ins for one user cannot leave two tokens valid.
    user_locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        codec: Arc<TokenCodec>,
        security: SecurityConfig,
        revoke_tokens_on_password_change: bool,
    ) -> Self {
        Self {
            store,
            codec,
            security,
            revoke_tokens_on_password_change,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Issue a fresh token pair for `user`, superseding every token the
    /// user currently holds. The revoke and the insert of the new access
    /// token run in one transaction under the per-user lock; the refresh
    /// token is returned but never persisted.
    async fn issue_tokens(&self, user: &User) -> Result<AuthTokens, AuthError> {
        let access_token = self.codec.generate_access_token(&user.username)?;
        let refresh_token = self.codec.generate_refresh_token(&user.username)?;

        let lock = self.user_lock(user.id).await;
        let _guard = lock.lock().await;
        self.store.replace_user_tokens(user.id, &access_token).await?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
        })
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn sign_up(&self, data: SignUpData) -> Result<AuthTokens, AuthError> {
        if self.store.get_user_by_username(&data.username).await?.is_some() {
            return Err(AuthError::Conflict(
                "User with given username already exists".to_string(),
            ));
        }

        if self.store.get_user_by_email(&data.email).await?.is_some() {
            return Err(AuthError::Conflict(
                "User with given e-mail already exists".to_string(),
            ));
        }

        if data.password != data.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }

        let user = self
            .store
            .create_user(
                NewUser {
                    username: data.username,
                    name: data.name,
                    email: data.email,
                    password: data.password,
                    status: UserStatus::Active,
                    role: UserRole::Ordinary,
                },
                &self.security,
            )
            .await
            .map_err(|e| {
                // Concurrent sign-up can slip past the pre-checks and hit
                // the unique constraints instead.
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    AuthError::Conflict("User already exists".to_string())
                } else {
                    AuthError::Internal(msg)
                }
            })?;

        info!("User registered: {}", user.username);
        self.issue_tokens(&user).await
    }

    async fn sign_in(&self, username: &str, password: &str) -> Result<AuthTokens, AuthError> {
        let is_valid = self.store.verify_user_password(username, password).await?;

        if !is_valid {
            return Err(AuthError::InvalidCredentials);
        }

        let user = self
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        info!("User signed in: {}", user.username);
        self.issue_tokens(&user).await
    }

    async fn refresh_token(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<AuthTokens>, AuthError> {
        // Malformed requests are swallowed, not answered: absent header,
        // non-bearer scheme, and undecodable or expired tokens all fall
        // through to a silent no-op.
        let Some(header) = authorization else {
            return Ok(None);
        };
        let Some(refresh_token) = header.strip_prefix("Bearer ") else {
            return Ok(None);
        };

        let subject = match self.codec.extract_subject(refresh_token) {
            Ok(subject) => subject,
            Err(e) => {
                debug!("Ignoring refresh request with undecodable token: {e}");
                return Ok(None);
            }
        };

        let user = self
            .store
            .get_user_by_username(&subject)
            .await?
            .ok_or_else(|| AuthError::UserNotFound(subject.clone()))?;

        if !self.codec.is_valid(refresh_token, &user.username) {
            debug!("Ignoring refresh request with invalid token for {subject}");
            return Ok(None);
        }

        let access_token = self.codec.generate_access_token(&user.username)?;

        let lock = self.user_lock(user.id).await;
        let _guard = lock.lock().await;
        self.store.replace_user_tokens(user.id, &access_token).await?;

        info!("Access token refreshed for {}", user.username);
        Ok(Some(AuthTokens {
            access_token,
            // The refresh token is not rotated; the caller keeps using it
            // until its own expiry.
            refresh_token: refresh_token.to_string(),
        }))
    }

    async fn change_password(
        &self,
        identity: &AuthenticatedIdentity,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        let is_valid = self
            .store
            .verify_user_password(&identity.username, current_password)
            .await?;

        if !is_valid {
            return Err(AuthError::InvalidCredentials);
        }

        if new_password != confirm_password {
            return Err(AuthError::Validation("Passwords do not match".to_string()));
        }

        self.store
            .update_user_password(&identity.username, new_password, &self.security)
            .await?;

        if self.revoke_tokens_on_password_change {
            let lock = self.user_lock(identity.user_id).await;
            let _guard = lock.lock().await;
            let revoked = self.store.revoke_all_user_tokens(identity.user_id).await?;
            info!(
                "Password changed for {}; revoked {revoked} tokens",
                identity.username
            );
        } else {
            info!("Password changed for {}", identity.username);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "dW5pdC10ZXN0LXNpZ25pbmcta2V5LTAxMjM0NTY3ODlhYmNkZWY=";

    fn test_security() -> SecurityConfig {
        // Cheap Argon2 params so tests stay fast
        SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
        }
    }

    async fn service_with_ttls(
        access_ttl: i64,
        refresh_ttl: i64,
        revoke_on_password_change: bool,
    ) -> SeaOrmAuthService {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .expect("Failed to open in-memory store");
        let codec = Arc::new(TokenCodec::new(TEST_SECRET, access_ttl, refresh_ttl).unwrap());
        SeaOrmAuthService::new(store, codec, test_security(), revoke_on_password_change)
    }

    async fn service() -> SeaOrmAuthService {
        service_with_ttls(900, 604_800, false).await
    }

    fn ann() -> SignUpData {
        SignUpData {
            name: "Ann".to_string(),
            username: "ann".to_string(),
            email: "ann@x.com".to_string(),
            password: "Str0ng!pass".to_string(),
            confirm_password: "Str0ng!pass".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_up_issues_valid_token_pair() {
        let service = service().await;

        let tokens = service.sign_up(ann()).await.unwrap();

        assert!(!tokens.access_token.is_empty());
        assert!(!tokens.refresh_token.is_empty());
        assert_ne!(tokens.access_token, tokens.refresh_token);

        assert_eq!(
            service.codec.extract_subject(&tokens.access_token).unwrap(),
            "ann"
        );
        assert!(service.codec.is_valid(&tokens.access_token, "ann"));
        assert!(service.codec.is_valid(&tokens.refresh_token, "ann"));

        // Only the access token is tracked for revocation
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].token, tokens.access_token);
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_username_conflicts() {
        let service = service().await;
        service.sign_up(ann()).await.unwrap();

        let mut second = ann();
        second.email = "other@x.com".to_string();
        let err = service.sign_up(second).await.unwrap_err();

        assert!(matches!(err, AuthError::Conflict(_)));
        // No user row was written for the rejected sign-up
        assert!(service
            .store
            .get_user_by_email("other@x.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sign_up_duplicate_email_conflicts() {
        let service = service().await;
        service.sign_up(ann()).await.unwrap();

        let mut second = ann();
        second.username = "ann2".to_string();
        let err = service.sign_up(second).await.unwrap_err();

        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sign_up_password_mismatch() {
        let service = service().await;

        let mut data = ann();
        data.confirm_password = "Different!1".to_string();
        let err = service.sign_up(data).await.unwrap_err();

        assert!(matches!(err, AuthError::Validation(_)));
        assert!(service.store.get_user_by_username("ann").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_supersedes_previous_tokens() {
        let service = service().await;
        let first = service.sign_up(ann()).await.unwrap();

        let second = service.sign_in("ann", "Str0ng!pass").await.unwrap();

        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].token, second.access_token);

        let old = service
            .store
            .find_token_by_string(&first.access_token)
            .await
            .unwrap()
            .unwrap();
        assert!(old.expired);
        assert!(old.revoked);
    }

    #[tokio::test]
    async fn test_sign_in_rejects_bad_credentials() {
        let service = service().await;
        service.sign_up(ann()).await.unwrap();

        let err = service.sign_in("ann", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // Unknown usernames are indistinguishable from wrong passwords
        let err = service.sign_in("nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_concurrent_sign_ins_leave_one_valid_token() {
        let service = Arc::new(service().await);
        service.sign_up(ann()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.sign_in("ann", "Str0ng!pass").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // However the sign-ins interleave, exactly one token survives
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert_eq!(valid.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_ignores_malformed_headers() {
        let service = service().await;

        assert!(service.refresh_token(None).await.unwrap().is_none());
        assert!(service
            .refresh_token(Some("Basic dXNlcjpwYXNz"))
            .await
            .unwrap()
            .is_none());
        assert!(service
            .refresh_token(Some("Bearer not-a-token"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_refresh_issues_new_access_token() {
        let service = service().await;
        let initial = service.sign_up(ann()).await.unwrap();

        let header = format!("Bearer {}", initial.refresh_token);
        let refreshed = service
            .refresh_token(Some(&header))
            .await
            .unwrap()
            .expect("Valid refresh token should produce a response");

        // Same refresh token comes back; only the access token rotates
        assert_eq!(refreshed.refresh_token, initial.refresh_token);
        assert_ne!(refreshed.access_token, initial.access_token);

        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].token, refreshed.access_token);
    }

    #[tokio::test]
    async fn test_refresh_with_expired_token_is_silent() {
        let service = service_with_ttls(900, 0, false).await;
        let initial = service.sign_up(ann()).await.unwrap();

        let header = format!("Bearer {}", initial.refresh_token);
        let result = service.refresh_token(Some(&header)).await.unwrap();
        assert!(result.is_none());

        // Nothing was revoked or persisted by the rejected refresh
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].token, initial.access_token);
    }

    #[tokio::test]
    async fn test_refresh_for_vanished_user_is_not_found() {
        let service = service().await;
        let ghost_refresh = service.codec.generate_refresh_token("ghost").unwrap();

        let header = format!("Bearer {ghost_refresh}");
        let err = service.refresh_token(Some(&header)).await.unwrap_err();

        assert!(matches!(err, AuthError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_change_password_rejects_wrong_current() {
        let service = service().await;
        service.sign_up(ann()).await.unwrap();
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let identity = AuthenticatedIdentity {
            user_id: user.id,
            username: user.username,
        };

        let err = service
            .change_password(&identity, "wrong", "NewPass!1", "NewPass!1")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::InvalidCredentials));
        // Stored hash is untouched
        assert!(service
            .store
            .verify_user_password("ann", "Str0ng!pass")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_change_password_updates_hash() {
        let service = service().await;
        let tokens = service.sign_up(ann()).await.unwrap();
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let identity = AuthenticatedIdentity {
            user_id: user.id,
            username: user.username,
        };

        service
            .change_password(&identity, "Str0ng!pass", "NewPass!1", "NewPass!1")
            .await
            .unwrap();

        assert!(service.store.verify_user_password("ann", "NewPass!1").await.unwrap());
        assert!(!service
            .store
            .verify_user_password("ann", "Str0ng!pass")
            .await
            .unwrap());

        // With revocation off, the previously issued token survives
        let stored = service
            .store
            .find_token_by_string(&tokens.access_token)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.revoked);
    }

    #[tokio::test]
    async fn test_change_password_can_revoke_tokens() {
        let service = service_with_ttls(900, 604_800, true).await;
        service.sign_up(ann()).await.unwrap();
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let identity = AuthenticatedIdentity {
            user_id: user.id,
            username: user.username,
        };

        service
            .change_password(&identity, "Str0ng!pass", "NewPass!1", "NewPass!1")
            .await
            .unwrap();

        let valid = service.store.find_valid_tokens_for_user(user.id).await.unwrap();
        assert!(valid.is_empty());
    }

    #[tokio::test]
    async fn test_change_password_confirmation_mismatch() {
        let service = service().await;
        service.sign_up(ann()).await.unwrap();
        let user = service.store.get_user_by_username("ann").await.unwrap().unwrap();
        let identity = AuthenticatedIdentity {
            user_id: user.id,
            username: user.username,
        };

        let err = service
            .change_password(&identity, "Str0ng!pass", "NewPass!1", "Other!123")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Validation(_)));
        assert!(service
            .store
            .verify_user_password("ann", "Str0ng!pass")
            .await
            .unwrap());
    }
}
