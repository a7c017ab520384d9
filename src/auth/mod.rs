//! User registration, login, and JWT session tokens
//!
//! The protocol work is delegated to bcrypt and jsonwebtoken; this module
//! only wires them to the user store and keeps failure messages uniform so
//! login attempts cannot probe which emails exist.

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, User};
use crate::error::{Error, Result};

/// Session token lifetime.
const TOKEN_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 6;

/// JWT claims: subject is the user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// User data safe to return to clients (no password hash).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            created_at: user.created_at,
        }
    }
}

/// Result of a successful register or login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: UserProfile,
    pub token: String,
}

/// Register a new user and issue a session token.
pub fn register(conn: &Connection, input: &RegisterInput, jwt_secret: &str) -> Result<Session> {
    validate_registration(input)?;

    let password_hash = hash(&input.password, DEFAULT_COST)
        .map_err(|e| Error::Internal(format!("password hashing failed: {}", e)))?;

    let user = db::create_user(conn, input.email.trim(), input.username.trim(), &password_hash)?;
    info!("User registered: {}", user.id);

    let token = issue_token(&user, jwt_secret)?;
    Ok(Session {
        user: UserProfile::from(&user),
        token,
    })
}

/// Verify credentials and issue a session token.
///
/// Unknown email and wrong password produce the same error.
pub fn login(conn: &Connection, email: &str, password: &str, jwt_secret: &str) -> Result<Session> {
    let user = db::find_user_by_email(conn, email.trim())?
        .ok_or_else(|| Error::Unauthorized("invalid credentials".to_string()))?;

    let valid = verify(password, &user.password_hash)
        .map_err(|e| Error::Internal(format!("password verification failed: {}", e)))?;
    if !valid {
        return Err(Error::Unauthorized("invalid credentials".to_string()));
    }

    info!("User logged in: {}", user.id);
    let token = issue_token(&user, jwt_secret)?;
    Ok(Session {
        user: UserProfile::from(&user),
        token,
    })
}

/// Partial profile update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
}

/// Look up the authenticated user's profile.
pub fn profile(conn: &Connection, user_id: &str) -> Result<UserProfile> {
    let user = db::find_user_by_id(conn, user_id)?
        .ok_or_else(|| Error::not_found(format!("user {}", user_id)))?;
    Ok(UserProfile::from(&user))
}

/// Update email and/or username. A new email must not belong to another
/// account.
pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    patch: &ProfilePatch,
) -> Result<UserProfile> {
    if let Some(email) = &patch.email {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::validation("missing field: email"));
        }
    }
    if let Some(username) = &patch.username {
        if username.trim().is_empty() {
            return Err(Error::validation("missing field: username"));
        }
    }

    let user = db::update_user(
        conn,
        user_id,
        patch.email.as_deref().map(str::trim),
        patch.username.as_deref().map(str::trim),
    )?;
    info!("User profile updated: {}", user.id);
    Ok(UserProfile::from(&user))
}

/// Verify the current password and store a hash of the new one.
pub fn change_password(conn: &Connection, user_id: &str, change: &PasswordChange) -> Result<()> {
    if change.new_password.len() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let user = db::find_user_by_id(conn, user_id)?
        .ok_or_else(|| Error::not_found(format!("user {}", user_id)))?;

    let valid = verify(&change.current_password, &user.password_hash)
        .map_err(|e| Error::Internal(format!("password verification failed: {}", e)))?;
    if !valid {
        return Err(Error::Unauthorized(
            "current password is incorrect".to_string(),
        ));
    }

    let password_hash = hash(&change.new_password, DEFAULT_COST)
        .map_err(|e| Error::Internal(format!("password hashing failed: {}", e)))?;
    db::update_password_hash(conn, &user.id, &password_hash)?;
    info!("Password updated: {}", user.id);
    Ok(())
}

/// Issue an HS256 token for a user.
pub fn issue_token(user: &User, jwt_secret: &str) -> Result<String> {
    let claims = Claims {
        sub: user.id.clone(),
        email: user.email.clone(),
        exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("token encoding failed: {}", e)))
}

/// Verify a bearer token and return its claims.
pub fn verify_token(token: &str, jwt_secret: &str) -> Result<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            Error::Unauthorized("token expired, please login again".to_string())
        }
        _ => Error::Unauthorized("invalid token".to_string()),
    })
}

fn validate_registration(input: &RegisterInput) -> Result<()> {
    let email = input.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::validation("missing field: email"));
    }
    if input.username.trim().is_empty() {
        return Err(Error::validation("missing field: username"));
    }
    if input.password.len() < MIN_PASSWORD_LEN {
        return Err(Error::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("../db/schema.sql")).unwrap();
        conn
    }

    fn alice() -> RegisterInput {
        RegisterInput {
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password: "hunter22".to_string(),
        }
    }

    #[test]
    fn test_register_then_login() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();
        assert_eq!(session.user.email, "alice@example.com");
        assert!(!session.token.is_empty());

        let session = login(&conn, "alice@example.com", "hunter22", SECRET).unwrap();
        let claims = verify_token(&session.token, SECRET).unwrap();
        assert_eq!(claims.sub, session.user.id);
        assert_eq!(claims.email, "alice@example.com");
    }

    #[test]
    fn test_login_failures_are_uniform() {
        let conn = test_conn();
        register(&conn, &alice(), SECRET).unwrap();

        let unknown = login(&conn, "bob@example.com", "hunter22", SECRET).unwrap_err();
        let wrong = login(&conn, "alice@example.com", "wrong-pass", SECRET).unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, Error::Unauthorized(_)));
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let conn = test_conn();
        register(&conn, &alice(), SECRET).unwrap();

        let err = register(&conn, &alice(), SECRET).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_registration_validation() {
        let conn = test_conn();

        let mut input = alice();
        input.email = "not-an-email".to_string();
        assert!(matches!(
            register(&conn, &input, SECRET).unwrap_err(),
            Error::Validation(_)
        ));

        let mut input = alice();
        input.password = "short".to_string();
        assert!(matches!(
            register(&conn, &input, SECRET).unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[test]
    fn test_profile_update_changes_email_and_keeps_login_working() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();

        let updated = update_profile(
            &conn,
            &session.user.id,
            &ProfilePatch {
                email: Some("alice@new.example.com".to_string()),
                username: None,
            },
        )
        .unwrap();
        assert_eq!(updated.email, "alice@new.example.com");
        assert_eq!(updated.username, "alice");

        assert_eq!(
            profile(&conn, &session.user.id).unwrap().email,
            "alice@new.example.com"
        );
        login(&conn, "alice@new.example.com", "hunter22", SECRET).unwrap();
    }

    #[test]
    fn test_profile_update_rejects_taken_email() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();
        register(
            &conn,
            &RegisterInput {
                email: "bob@example.com".to_string(),
                username: "bob".to_string(),
                password: "hunter22".to_string(),
            },
            SECRET,
        )
        .unwrap();

        let err = update_profile(
            &conn,
            &session.user.id,
            &ProfilePatch {
                email: Some("bob@example.com".to_string()),
                username: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_change_password_requires_the_current_one() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();

        let err = change_password(
            &conn,
            &session.user.id,
            &PasswordChange {
                current_password: "wrong-pass".to_string(),
                new_password: "correct-horse".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));

        change_password(
            &conn,
            &session.user.id,
            &PasswordChange {
                current_password: "hunter22".to_string(),
                new_password: "correct-horse".to_string(),
            },
        )
        .unwrap();

        // Only the new password logs in afterwards
        let old = login(&conn, "alice@example.com", "hunter22", SECRET).unwrap_err();
        assert!(matches!(old, Error::Unauthorized(_)));
        login(&conn, "alice@example.com", "correct-horse", SECRET).unwrap();
    }

    #[test]
    fn test_change_password_enforces_minimum_length() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();

        let err = change_password(
            &conn,
            &session.user.id,
            &PasswordChange {
                current_password: "hunter22".to_string(),
                new_password: "short".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_token_with_wrong_secret_is_rejected() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();

        let err = verify_token(&session.token, "other-secret").unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_password_hash_never_leaves_the_store() {
        let conn = test_conn();
        let session = register(&conn, &alice(), SECRET).unwrap();

        let json = serde_json::to_string(&session).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("$2b$"));
    }
}
