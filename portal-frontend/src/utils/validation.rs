//! Login form validation.
//!
//! The free functions are the source of truth; [`LoginForm`] derives
//! `validator::Validate` with custom rules that delegate to them, and
//! [`field_errors`] maps a `ValidationErrors` back onto [`FieldErrors`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

pub const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Email,
    Password,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Password => "password",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "email" => Some(Field::Email),
            "password" => Some(Field::Password),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Email => f.write_str("Email"),
            Field::Password => f.write_str("Password"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("{0} is required")]
    Required(Field),

    #[error("Please enter a valid email address")]
    InvalidFormat(Field),

    #[error("{0} must be at least {1} characters long")]
    TooShort(Field, usize),
}

impl FieldError {
    pub fn field(&self) -> Field {
        match self {
            FieldError::Required(field)
            | FieldError::InvalidFormat(field)
            | FieldError::TooShort(field, _) => *field,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FieldError::Required(_) => "required",
            FieldError::InvalidFormat(_) => "invalid_format",
            FieldError::TooShort(..) => "too_short",
        }
    }

    fn from_code(field: Field, code: &str) -> Option<Self> {
        match code {
            "required" => Some(FieldError::Required(field)),
            "invalid_format" => Some(FieldError::InvalidFormat(field)),
            "too_short" => Some(FieldError::TooShort(field, MIN_PASSWORD_LENGTH)),
            _ => None,
        }
    }

    fn into_validation_error(self) -> ValidationError {
        let mut error = ValidationError::new(self.code());
        error.message = Some(Cow::Owned(self.to_string()));
        error
    }
}

/// Errors keyed by field; an empty map means the form is valid.
pub type FieldErrors = BTreeMap<Field, FieldError>;

pub fn validate_email(value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        return Some(FieldError::Required(Field::Email));
    }

    if !EMAIL_REGEX.is_match(value) {
        return Some(FieldError::InvalidFormat(Field::Email));
    }

    None
}

pub fn validate_password(value: &str) -> Option<FieldError> {
    if value.is_empty() {
        return Some(FieldError::Required(Field::Password));
    }

    if value.chars().count() < MIN_PASSWORD_LENGTH {
        return Some(FieldError::TooShort(Field::Password, MIN_PASSWORD_LENGTH));
    }

    None
}

pub fn validate_login_form(email: &str, password: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if let Some(error) = validate_email(email) {
        errors.insert(Field::Email, error);
    }

    if let Some(error) = validate_password(password) {
        errors.insert(Field::Password, error);
    }

    errors
}

pub fn has_errors(errors: &FieldErrors) -> bool {
    !errors.is_empty()
}

pub fn first_error(errors: &FieldErrors) -> Option<&FieldError> {
    errors.values().next()
}

/// Map `validator` output produced by [`LoginForm`] back onto typed errors.
pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    let mut mapped = FieldErrors::new();

    for (name, field_errors) in errors.field_errors() {
        let Some(field) = Field::from_name(&name) else {
            continue;
        };

        if let Some(error) = field_errors
            .iter()
            .find_map(|error| FieldError::from_code(field, &error.code))
        {
            mapped.insert(field, error);
        }
    }

    mapped
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginForm {
    #[validate(custom(function = "email_rule"))]
    pub email: String,

    #[validate(custom(function = "password_rule"))]
    pub password: String,
}

impl LoginForm {
    pub fn errors(&self) -> FieldErrors {
        match self.validate() {
            Ok(()) => FieldErrors::new(),
            Err(errors) => field_errors(&errors),
        }
    }
}

fn email_rule(value: &str) -> Result<(), ValidationError> {
    match validate_email(value) {
        Some(error) => Err(error.into_validation_error()),
        None => Ok(()),
    }
}

fn password_rule(value: &str) -> Result<(), ValidationError> {
    match validate_password(value) {
        Some(error) => Err(error.into_validation_error()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_form_has_no_errors() {
        for (email, password) in [
            ("a@b.co", "secret"),
            ("jane.doe+ops@example.com", "correct horse battery"),
            ("user@mail.example.org", "123456"),
        ] {
            let errors = validate_login_form(email, password);
            assert!(!has_errors(&errors), "{email} / {password}: {errors:?}");
        }
    }

    #[test]
    fn test_empty_form_requires_both_fields() {
        let errors = validate_login_form("", "");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[&Field::Email], FieldError::Required(Field::Email));
        assert_eq!(errors[&Field::Password], FieldError::Required(Field::Password));
        assert_eq!(first_error(&errors).unwrap().to_string(), "Email is required");
    }

    #[test]
    fn test_email_rules() {
        assert_eq!(validate_email("   "), Some(FieldError::Required(Field::Email)));
        assert_eq!(
            validate_email("not-an-email"),
            Some(FieldError::InvalidFormat(Field::Email))
        );
        assert_eq!(
            validate_email("two words@example.com"),
            Some(FieldError::InvalidFormat(Field::Email))
        );
        assert_eq!(validate_email("a@b"), Some(FieldError::InvalidFormat(Field::Email)));
        assert_eq!(validate_email("a@b.co"), None);
    }

    #[test]
    fn test_password_rules() {
        assert_eq!(
            validate_password(""),
            Some(FieldError::Required(Field::Password))
        );
        assert_eq!(
            validate_password("12345").unwrap().to_string(),
            "Password must be at least 6 characters long"
        );
        assert_eq!(validate_password("123456"), None);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            FieldError::InvalidFormat(Field::Email).to_string(),
            "Please enter a valid email address"
        );
        assert_eq!(
            FieldError::Required(Field::Password).to_string(),
            "Password is required"
        );
    }

    #[test]
    fn test_login_form_validate_matches_free_functions() {
        let form = LoginForm {
            email: "not-an-email".to_string(),
            password: "123".to_string(),
        };

        assert!(form.validate().is_err());
        assert_eq!(form.errors(), validate_login_form(&form.email, &form.password));

        let valid = LoginForm {
            email: "ops@example.com".to_string(),
            password: "hunter22".to_string(),
        };
        assert!(valid.validate().is_ok());
        assert!(valid.errors().is_empty());
    }
}
