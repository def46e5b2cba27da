use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::ErrorKind;
use crate::models::{NewUser, Role, User, validate_required};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Administrator access required")]
    NotAdmin,
    #[error("A user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("Passwords do not match")]
    PasswordMismatch,
}

impl AuthError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::Unauthorized,
            Self::NotAdmin => ErrorKind::Forbidden,
            Self::DuplicateEmail(_) => ErrorKind::Constraint,
            Self::PasswordMismatch => ErrorKind::Invalid,
        }
    }
}

/// Who is acting. Returned by login and passed explicitly to portal operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: i64,
    pub role: Role,
    pub name: String,
}

impl Session {
    #[must_use]
    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            role: user.role,
            name: user.name.clone(),
        }
    }

    /// Session of whoever holds the database file itself (the CLI).
    #[must_use]
    pub fn operator() -> Self {
        Self {
            user_id: 0,
            role: Role::Admin,
            name: "local operator".to_string(),
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::NotAdmin)
        }
    }
}

/// Hash a password with Argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// True only when `stored` is an Argon2 hash of `password`. Plaintext never matches.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    if !is_hashed(stored) {
        return false;
    }
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[must_use]
pub fn is_hashed(stored: &str) -> bool {
    stored.starts_with("$argon2")
}

// Hash formats written by other tools. They cannot be verified or rehashed
// without the password, so those accounts need `reset_password`.
const FOREIGN_HASH_PREFIXES: &[&str] = &["pbkdf2:", "scrypt:"];

#[must_use]
pub fn is_foreign_hash(stored: &str) -> bool {
    FOREIGN_HASH_PREFIXES.iter().any(|p| stored.starts_with(p))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RehashSummary {
    pub updated: usize,
    pub skipped: usize,
    /// Users whose stored hash is in a foreign format and who cannot log in
    /// until an administrator resets their password.
    pub needs_reset: Vec<i64>,
}

impl Database {
    pub fn login(&self, email: &str, password: &str) -> Result<Session> {
        let Some((user, stored)) = self.find_credentials(email)? else {
            return Err(AuthError::InvalidCredentials.into());
        };
        if !verify_password(password, &stored) {
            if is_foreign_hash(&stored) {
                warn!(user_id = user.id, "login refused: password hash format is unsupported, reset required");
            } else if !is_hashed(&stored) {
                warn!(user_id = user.id, "login refused: stored password is not hashed");
            }
            return Err(AuthError::InvalidCredentials.into());
        }
        info!(user_id = user.id, role = %user.role, "login");
        Ok(Session::for_user(&user))
    }

    /// Login that also requires the admin role.
    pub fn admin_login(&self, email: &str, password: &str) -> Result<Session> {
        let session = self.login(email, password)?;
        session.require_admin()?;
        Ok(session)
    }

    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        validate_required(&user.password, "Password")?;
        if self.email_exists(&user.email)? {
            return Err(AuthError::DuplicateEmail(user.email.trim().to_string()).into());
        }
        let hash = hash_password(&user.password)?;
        self.insert_user(&user.name, &user.email, &hash, user.role)
            .context("Failed to create user")
    }

    /// Self-service registration: always the `user` role.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<Session> {
        let user = self.create_user(&NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::User,
        })?;
        Ok(Session::for_user(&user))
    }

    /// Bootstrap an administrator; `confirm` must repeat the password.
    pub fn create_admin(&self, name: &str, email: &str, password: &str, confirm: &str) -> Result<User> {
        if password != confirm {
            return Err(AuthError::PasswordMismatch.into());
        }
        let user = self.create_user(&NewUser {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::Admin,
        })?;
        info!(user_id = user.id, "administrator created");
        Ok(user)
    }

    /// Replace every plaintext password with its Argon2 hash.
    pub fn rehash_plaintext_passwords(&self) -> Result<RehashSummary> {
        let mut summary = RehashSummary::default();
        for (user_id, stored) in self.stored_passwords()? {
            if is_hashed(&stored) {
                summary.skipped += 1;
                continue;
            }
            if is_foreign_hash(&stored) {
                warn!(user_id, "password hash format is unsupported, reset required");
                summary.skipped += 1;
                summary.needs_reset.push(user_id);
                continue;
            }
            warn!(user_id, "password stored in cleartext, hashing with Argon2");
            let hash = hash_password(&stored)?;
            self.set_password(user_id, &hash)?;
            summary.updated += 1;
        }
        Ok(summary)
    }

    /// Store a fresh Argon2 hash for `user_id`; returns the rows changed.
    pub fn reset_password(&self, user_id: i64, password: &str) -> Result<usize> {
        validate_required(password, "Password")?;
        let hash = hash_password(password)?;
        let rows = self.set_password(user_id, &hash)?;
        if rows > 0 {
            info!(user_id, "password reset");
        }
        Ok(rows)
    }
}
