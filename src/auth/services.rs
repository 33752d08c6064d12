use std::sync::Arc;

use time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::dto::{
    AdminUpdateRequest, LoginRequest, SignupRequest, UpdateMeRequest, UpdatePasswordRequest,
};
use super::jwt::{JwtKeys, TokenError};
use super::password::PasswordHasher;
use super::repo::UserStore;
use super::repo_types::{NewUser, PasswordChange, Role, User, UserChanges};
use super::reset::{hash_secret, ResetPolicy};
use super::validate::{normalize_email, FieldErrors};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::mail::{Email, Mailer};

const BAD_CREDENTIALS: &str = "Incorrect email or password";
const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";

/// A freshly minted bearer token and the user it was issued for.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Identity resolved from a verified, non-stale bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub issued_at: i64,
}

impl CurrentUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

/// Credential lifecycle: signup, login, password reset and change, and token
/// authentication. Every write path runs its steps explicitly and in order.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    keys: JwtKeys,
    hasher: PasswordHasher,
    reset: ResetPolicy,
    changed_skew: Duration,
    public_url: String,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            keys: JwtKeys::new(&config.jwt, clock.clone()),
            hasher: PasswordHasher::new(&config.password)?,
            reset: ResetPolicy::new(&config.reset),
            changed_skew: Duration::milliseconds(config.password.changed_skew_ms),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            users,
            mailer,
            clock,
        })
    }

    pub fn token_ttl(&self) -> Duration {
        self.keys.ttl()
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Hashes a new password and stamps it slightly in the past so a token minted
    /// right after the write is not considered stale.
    fn password_change(&self, plain: &str) -> Result<PasswordChange, AppError> {
        Ok(PasswordChange {
            hash: self.hasher.hash(plain)?,
            changed_at: self.clock.now() - self.changed_skew,
        })
    }

    fn session(&self, user: User) -> Result<Session, AppError> {
        let token = self.keys.issue(user.id)?;
        Ok(Session { token, user })
    }

    pub async fn signup(&self, req: SignupRequest) -> Result<Session, AppError> {
        let email = req.email.as_deref().map(normalize_email);
        let name = req.name.as_deref().map(|n| n.trim().to_string());

        let mut errs = FieldErrors::new();
        errs.name(name.as_deref());
        errs.email(email.as_deref());
        errs.new_password(req.password.as_deref(), req.password_confirm.as_deref());
        errs.finish()?;

        let (Some(email), Some(password)) = (email, req.password) else {
            return Err(AppError::validation("Please provide email and password"));
        };

        if self.users.find_user_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict(email));
        }

        let user = self
            .users
            .create_user(NewUser {
                name,
                email,
                photo: req.photo,
                role: Role::default(),
                password: self.password_change(&password)?,
                created_at: self.clock.now(),
            })
            .await?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.session(user)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Session, AppError> {
        let (Some(email), Some(password)) = (
            req.email.as_deref().map(normalize_email).filter(|e| !e.is_empty()),
            req.password.filter(|p| !p.is_empty()),
        ) else {
            return Err(AppError::validation("Please provide email and password"));
        };

        let Some(user) = self.users.find_user_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AppError::Authentication(BAD_CREDENTIALS));
        };

        if !self.hasher.verify(&password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AppError::Authentication(BAD_CREDENTIALS));
        }

        info!(user_id = %user.id, "user logged in");
        self.session(user)
    }

    /// Verifies a bearer token and resolves the user it belongs to, rejecting
    /// tokens minted before the last password change.
    pub async fn authenticate(&self, token: &str) -> Result<CurrentUser, AppError> {
        let claims = self.keys.verify(token).map_err(|e| match e {
            TokenError::Expired => {
                AppError::Unauthorized("Your token has expired! Please log in again.")
            }
            TokenError::Invalid => AppError::Unauthorized("Invalid token. Please log in again!"),
        })?;

        let user = self.users.find_user_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for missing or inactive user");
            AppError::Unauthorized("The user belonging to this token no longer exists.")
        })?;

        if user.changed_password_after(claims.iat) {
            warn!(user_id = %user.id, "token predates password change");
            return Err(AppError::Unauthorized(
                "User recently changed password! Please log in again.",
            ));
        }

        Ok(CurrentUser {
            user,
            issued_at: claims.iat,
        })
    }

    /// Issues a reset secret and mails it. A failed delivery clears the ticket
    /// before the error is returned.
    ///
    /// Unknown addresses are reported as `NotFound`, which lets callers check for
    /// accounts. Kept for compatibility with existing clients.
    pub async fn request_password_reset(&self, email: Option<&str>) -> Result<(), AppError> {
        let email = email.map(normalize_email).unwrap_or_default();
        if email.is_empty() {
            return Err(AppError::validation("Please provide an email"));
        }
        let Some(user) = self.users.find_user_by_email(&email).await? else {
            warn!(email = %email, "password reset for unknown email");
            return Err(AppError::NotFound("There is no user with that email address."));
        };

        let (secret, ticket) = self.reset.issue(self.clock.now());
        self.users
            .update_user(user.id, UserChanges::set_reset(ticket))
            .await?
            .ok_or(AppError::NotFound("There is no user with that email address."))?;

        let reset_url = format!("{}/api/v1/users/resetPassword/{}", self.public_url, secret);
        let email = Email {
            to: user.email.clone(),
            subject: format!(
                "Your password reset token (valid for {} min)",
                self.reset.ttl().whole_minutes()
            ),
            body: format!(
                "Forgot your password? Submit a PATCH request with your new password and \
                 passwordConfirm to: {reset_url}.\nIf you didn't forget your password, \
                 please ignore this email!"
            ),
        };

        if let Err(e) = self.mailer.send(email).await {
            warn!(user_id = %user.id, error = %e, "reset mail failed; clearing ticket");
            if let Err(rollback) = self
                .users
                .update_user(user.id, UserChanges::clear_reset())
                .await
            {
                error!(
                    user_id = %user.id,
                    error = %rollback,
                    "undelivered reset ticket left in place"
                );
            }
            return Err(AppError::EmailDelivery(e));
        }

        info!(user_id = %user.id, "password reset issued");
        Ok(())
    }

    pub async fn reset_password(
        &self,
        secret: &str,
        password: Option<&str>,
        password_confirm: Option<&str>,
    ) -> Result<Session, AppError> {
        let token_hash = hash_secret(secret);
        let now = self.clock.now();
        if self
            .users
            .find_user_by_reset_hash(&token_hash, now)
            .await?
            .is_none()
        {
            warn!("reset with unknown or expired secret");
            return Err(AppError::ResetTokenInvalid);
        }

        let mut errs = FieldErrors::new();
        errs.new_password(password, password_confirm);
        errs.finish()?;
        let change = self.password_change(password.unwrap_or_default())?;

        // a concurrent consumer may have won since the lookup
        let Some(user) = self.users.consume_reset(&token_hash, now, change).await? else {
            warn!("reset secret consumed concurrently");
            return Err(AppError::ResetTokenInvalid);
        };

        info!(user_id = %user.id, "password reset completed");
        self.session(user)
    }

    pub async fn update_password(
        &self,
        current: &CurrentUser,
        req: UpdatePasswordRequest,
    ) -> Result<Session, AppError> {
        let user = self
            .users
            .find_user_by_id(current.id())
            .await?
            .ok_or(AppError::Unauthorized(NOT_LOGGED_IN))?;

        let candidate = req.password_current.unwrap_or_default();
        if !self.hasher.verify(&candidate, &user.password_hash)? {
            warn!(user_id = %user.id, "wrong current password");
            return Err(AppError::Authentication("Your current password is wrong."));
        }

        let mut errs = FieldErrors::new();
        errs.new_password(req.password.as_deref(), req.password_confirm.as_deref());
        errs.finish()?;
        let change = self.password_change(req.password.as_deref().unwrap_or_default())?;

        let user = self
            .users
            .update_user(user.id, UserChanges::password(change))
            .await?
            .ok_or(AppError::Unauthorized(NOT_LOGGED_IN))?;

        info!(user_id = %user.id, "password updated");
        self.session(user)
    }

    pub async fn update_me(
        &self,
        current: &CurrentUser,
        req: UpdateMeRequest,
    ) -> Result<User, AppError> {
        if req.password.is_some() || req.password_confirm.is_some() {
            return Err(AppError::validation(
                "This route is not for password updates. Please use /updateMyPassword.",
            ));
        }
        let changes = self.profile_changes(req.name, req.email, req.photo, None)?;
        let user = self
            .users
            .update_user(current.id(), changes)
            .await?
            .ok_or(AppError::Unauthorized(NOT_LOGGED_IN))?;
        info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<(), AppError> {
        self.users
            .update_user(id, UserChanges::deactivate())
            .await?
            .ok_or(AppError::NotFound("No user found with that ID"))?;
        info!(user_id = %id, "user deactivated");
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.users.list_users().await?)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.users
            .find_user_by_id(id)
            .await?
            .ok_or(AppError::NotFound("No user found with that ID"))
    }

    pub async fn admin_update(&self, id: Uuid, req: AdminUpdateRequest) -> Result<User, AppError> {
        let role = match req.role.as_deref() {
            Some(r) => Some(r.parse::<Role>().map_err(|_| {
                AppError::validation("Role is either: user, guide, lead-guide, admin")
            })?),
            None => None,
        };
        let changes = self.profile_changes(req.name, req.email, req.photo, role)?;
        let user = self
            .users
            .update_user(id, changes)
            .await?
            .ok_or(AppError::NotFound("No user found with that ID"))?;
        info!(user_id = %user.id, role = %user.role, "user updated by admin");
        Ok(user)
    }

    fn profile_changes(
        &self,
        name: Option<String>,
        email: Option<String>,
        photo: Option<String>,
        role: Option<Role>,
    ) -> Result<UserChanges, AppError> {
        let name = name.map(|n| n.trim().to_string());
        let email = email.as_deref().map(normalize_email);
        let mut errs = FieldErrors::new();
        errs.name(name.as_deref());
        if email.is_some() {
            errs.email(email.as_deref());
        }
        errs.finish()?;
        Ok(UserChanges {
            name: name.map(Some),
            email,
            photo: photo.map(Some),
            role,
            ..UserChanges::default()
        })
    }
}
