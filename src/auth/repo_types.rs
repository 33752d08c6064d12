use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Closed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Guide, Role::LeadGuide, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Allow-set handed to the role gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(Vec<Role>);

impl RoleSet {
    pub fn of(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut set = Vec::new();
        for role in roles {
            if !set.contains(&role) {
                set.push(role);
            }
        }
        Self(set)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }
}

/// Outstanding password-reset secret, stored only as its sha256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTicket {
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

impl ResetTicket {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// A freshly hashed password together with the instant it counts as changed.
#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub hash: String,
    pub changed_at: OffsetDateTime,
}

/// User record in the credential store.
#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
    pub password_hash: String,
    pub password_changed_at: Option<OffsetDateTime>,
    pub reset: Option<ResetTicket>,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl User {
    /// True when the password changed after a token issued at `iat` (unix seconds).
    pub fn changed_password_after(&self, iat: i64) -> bool {
        match self.password_changed_at {
            Some(changed) => changed.unix_timestamp() > iat,
            None => false,
        }
    }
}

/// Everything needed to insert a user. Plaintext never reaches this type.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: String,
    pub photo: Option<String>,
    pub role: Role,
    pub password: PasswordChange,
    pub created_at: OffsetDateTime,
}

impl NewUser {
    pub fn into_user(self, id: Uuid) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            photo: self.photo,
            role: self.role,
            password_hash: self.password.hash,
            password_changed_at: Some(self.password.changed_at),
            reset: None,
            active: true,
            created_at: self.created_at,
        }
    }
}

/// Partial update. `None` leaves a field untouched; nested options set or clear nullable fields.
/// Writes through this type run no document validation.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<Option<String>>,
    pub email: Option<String>,
    pub photo: Option<Option<String>>,
    pub role: Option<Role>,
    pub password: Option<PasswordChange>,
    pub reset: Option<Option<ResetTicket>>,
    pub active: Option<bool>,
}

impl UserChanges {
    pub fn set_reset(ticket: ResetTicket) -> Self {
        Self {
            reset: Some(Some(ticket)),
            ..Self::default()
        }
    }

    pub fn clear_reset() -> Self {
        Self {
            reset: Some(None),
            ..Self::default()
        }
    }

    /// New password plus clearing of any outstanding reset ticket, as one write.
    pub fn password(change: PasswordChange) -> Self {
        Self {
            password: Some(change),
            reset: Some(None),
            ..Self::default()
        }
    }

    pub fn deactivate() -> Self {
        Self {
            active: Some(false),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.photo.is_none()
            && self.role.is_none()
            && self.password.is_none()
            && self.reset.is_none()
            && self.active.is_none()
    }

    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(photo) = self.photo {
            user.photo = photo;
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(password) = self.password {
            user.password_hash = password.hash;
            user.password_changed_at = Some(password.changed_at);
        }
        if let Some(reset) = self.reset {
            user.reset = reset;
        }
        if let Some(active) = self.active {
            user.active = active;
        }
    }
}
