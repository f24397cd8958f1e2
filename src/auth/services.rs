use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, PublicUser, RegisterRequest},
        jwt::JwtKeys,
        password,
        repo::UserStore,
        repo_types::{NewUser, Role},
    },
    error::AppError,
    state::AppState,
};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Compares SHA-256 digests so neither content nor length shows in timing.
fn secrets_match(a: &[u8], b: &[u8]) -> bool {
    let a = Sha256::digest(a);
    let b = Sha256::digest(b);
    a.as_slice().ct_eq(b.as_slice()).into()
}

/// Registration and login over an injected user store.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    keys: JwtKeys,
    admin_secret: Option<String>,
    dummy_hash: Arc<str>,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        AuthService::new(
            state.users.clone(),
            JwtKeys::from_ref(state),
            state.config.admin_secret.clone(),
            state.dummy_hash.clone(),
        )
    }
}

impl AuthService {
    /// `dummy_hash` is any valid PHC string; unknown emails are verified
    /// against it so both login failures cost one Argon2 run.
    pub fn new(
        users: Arc<dyn UserStore>,
        keys: JwtKeys,
        admin_secret: Option<String>,
        dummy_hash: Arc<str>,
    ) -> Self {
        Self {
            users,
            keys,
            admin_secret,
            dummy_hash,
        }
    }

    /// `Admin` only when a secret is configured and the code equals it.
    pub fn role_for(&self, special_code: Option<&str>) -> Role {
        match (self.admin_secret.as_deref(), special_code) {
            (Some(secret), Some(code)) if secrets_match(secret.as_bytes(), code.as_bytes()) => {
                Role::Admin
            }
            _ => Role::User,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<PublicUser, AppError> {
        let username = req.username.trim().to_string();
        let email = normalize_email(&req.email);

        if username.is_empty() {
            return Err(AppError::validation("username", "username is required"));
        }
        if email.is_empty() {
            return Err(AppError::validation("email", "email is required"));
        }
        if !is_valid_email(&email) {
            return Err(AppError::validation("email", "email is invalid"));
        }
        if req.password.is_empty() {
            return Err(AppError::validation("password", "password is required"));
        }

        let role = self.role_for(req.special_code.as_deref());
        let password_hash = password::hash(req.password).await?;

        let user = self
            .users
            .insert(NewUser {
                id: Uuid::new_v4(),
                username,
                email,
                password_hash,
                role,
            })
            .await?;

        info!(user_id = %user.id, email = %user.email, role = %user.role, "user registered");
        Ok(user.into())
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AppError> {
        let email = normalize_email(&req.email);
        if email.is_empty() {
            return Err(AppError::validation("email", "email is required"));
        }
        if req.password.is_empty() {
            return Err(AppError::validation("password", "password is required"));
        }

        let user = self.users.find_by_email(&email).await?;
        let stored_hash = match &user {
            Some(u) => u.password_hash.clone(),
            None => self.dummy_hash.to_string(),
        };
        let matched = password::verify(req.password, stored_hash).await;

        let user = match (user, matched) {
            (Some(u), Ok(true)) => u,
            (Some(u), Ok(false)) => {
                warn!(user_id = %u.id, "login invalid password");
                return Err(AppError::AuthenticationFailed);
            }
            (Some(_), Err(e)) => return Err(AppError::Internal(e)),
            (None, _) => {
                warn!(email = %email, "login unknown email");
                return Err(AppError::AuthenticationFailed);
            }
        };

        let token = self.keys.sign(user.id, user.role)?;
        info!(user_id = %user.id, role = %user.role, "user logged in");
        Ok(LoginResponse {
            token,
            user: user.into(),
        })
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<PublicUser, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or_else(|| AppError::Unauthorized("User not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::repo::MemoryUserStore, config::JwtConfig};

    fn service(admin_secret: Option<&str>) -> (AuthService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let keys = JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 5,
        });
        let dummy_hash = password::hash_password("dummy").unwrap();
        let svc = AuthService::new(
            store.clone(),
            keys,
            admin_secret.map(String::from),
            dummy_hash.into(),
        );
        (svc, store)
    }

    fn register_req(email: &str, special_code: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            username: "john".into(),
            email: email.into(),
            password: "pw123".into(),
            special_code: special_code.map(String::from),
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("john@example.com"));
        assert!(!is_valid_email("john@example"));
        assert!(!is_valid_email("john example.com"));
        assert_eq!(normalize_email("  John@Example.COM "), "john@example.com");
    }

    #[test]
    fn role_elevation_requires_exact_configured_secret() {
        let (svc, _) = service(Some("letmein"));
        assert_eq!(svc.role_for(Some("letmein")), Role::Admin);
        assert_eq!(svc.role_for(Some("letmei")), Role::User);
        assert_eq!(svc.role_for(Some("LETMEIN")), Role::User);
        assert_eq!(svc.role_for(None), Role::User);

        let (unset, _) = service(None);
        assert_eq!(unset.role_for(Some("letmein")), Role::User);
        assert_eq!(unset.role_for(Some("")), Role::User);
    }

    #[test]
    fn secrets_match_compares_whole_values() {
        assert!(secrets_match(b"letmein", b"letmein"));
        assert!(!secrets_match(b"letmein", b"letmein-and-more"));
        assert!(!secrets_match(b"", b"letmein"));
        assert!(secrets_match(b"", b""));
    }

    #[tokio::test]
    async fn register_scenario_then_login() {
        let (svc, store) = service(Some("letmein"));

        let user = svc
            .register(register_req("john@example.com", None))
            .await
            .unwrap();
        assert_eq!(user.username, "john");
        assert_eq!(user.role, Role::User);

        let stored = store.find_by_email("john@example.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "pw123");

        let resp = svc.login(login_req("john@example.com", "pw123")).await.unwrap();
        let claims = svc.keys.verify(&resp.token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::User);

        let err = svc
            .login(login_req("john@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn register_with_admin_code_yields_admin_token() {
        let (svc, _) = service(Some("letmein"));
        let user = svc
            .register(register_req("boss@example.com", Some("letmein")))
            .await
            .unwrap();
        assert_eq!(user.role, Role::Admin);

        let resp = svc.login(login_req("boss@example.com", "pw123")).await.unwrap();
        assert_eq!(svc.keys.verify(&resp.token).unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected_case_insensitively() {
        let (svc, _) = service(None);
        svc.register(register_req("john@example.com", None))
            .await
            .unwrap();
        let err = svc
            .register(register_req("JOHN@example.com", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_alike() {
        let (svc, _) = service(None);
        svc.register(register_req("john@example.com", None))
            .await
            .unwrap();

        let wrong = svc
            .login(login_req("john@example.com", "nope"))
            .await
            .unwrap_err();
        let unknown = svc
            .login(login_req("ghost@example.com", "pw123"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, AppError::AuthenticationFailed));
        assert!(matches!(unknown, AppError::AuthenticationFailed));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn password_matching_dummy_hash_is_still_rejected() {
        let (svc, _) = service(None);
        let err = svc
            .login(login_req("ghost@example.com", "dummy"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailed));
    }

    #[tokio::test]
    async fn missing_fields_are_validation_errors() {
        let (svc, _) = service(None);
        let mut req = register_req("john@example.com", None);
        req.username = "   ".into();
        match svc.register(req).await.unwrap_err() {
            AppError::Validation { field, .. } => assert_eq!(field, "username"),
            other => panic!("expected validation error, got {other:?}"),
        }

        let mut req = register_req("not-an-email", None);
        req.username = "john".into();
        match svc.register(req).await.unwrap_err() {
            AppError::Validation { field, .. } => assert_eq!(field, "email"),
            other => panic!("expected validation error, got {other:?}"),
        }

        match svc.login(login_req("john@example.com", "")).await.unwrap_err() {
            AppError::Validation { field, .. } => assert_eq!(field, "password"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn current_user_resolves_registered_id() {
        let (svc, _) = service(None);
        let user = svc
            .register(register_req("john@example.com", None))
            .await
            .unwrap();
        let me = svc.current_user(user.id).await.unwrap();
        assert_eq!(me.email, "john@example.com");
        assert!(matches!(
            svc.current_user(Uuid::new_v4()).await.unwrap_err(),
            AppError::Unauthorized(_)
        ));
    }
}
