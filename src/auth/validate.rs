use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::AppError;

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 30;
pub const PASSWORD_MIN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn present(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

/// Collects field-level messages so a request reports every problem at once.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: impl Into<String>) {
        self.0.push(msg.into());
    }

    /// Names are optional; a given one must fit the length bounds.
    pub fn name(&mut self, name: Option<&str>) {
        match name.map(str::trim) {
            None => {}
            Some(n) if n.chars().count() < NAME_MIN => {
                self.push(format!("A name must have at least {NAME_MIN} characters"))
            }
            Some(n) if n.chars().count() > NAME_MAX => {
                self.push(format!("A name must have at most {NAME_MAX} characters"))
            }
            Some(_) => {}
        }
    }

    /// Expects an already normalized address.
    pub fn email(&mut self, email: Option<&str>) {
        match present(email) {
            None => self.push("Please enter an email"),
            Some(e) if !is_valid_email(e) => self.push("Please provide a valid email"),
            Some(_) => {}
        }
    }

    pub fn new_password(&mut self, password: Option<&str>, confirm: Option<&str>) {
        match password.filter(|p| !p.is_empty()) {
            None => self.push("Please enter a password"),
            Some(p) if p.chars().count() < PASSWORD_MIN => self.push(format!(
                "Password must be at least {PASSWORD_MIN} characters"
            )),
            Some(_) => {}
        }
        match confirm.filter(|c| !c.is_empty()) {
            None => self.push("Please confirm your password"),
            Some(c) if password.is_some_and(|p| p != c) => self.push("Passwords do not match"),
            Some(_) => {}
        }
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.0))
        }
    }
}
