use crate::errors::{ValidationError, DomainResult, DomainError};
use regex::Regex;
use std::sync::OnceLock;

/// A trait that entities should implement for validation.
pub trait Validate {
    /// Validates the entity and returns an error if validation fails.
    fn validate(&self) -> DomainResult<()>;
}

/// Plain file names only: no separators, no NUL, not `.` or `..`.
fn file_name_regex() -> &'static Regex {
    static FILE_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    FILE_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[^/\\\x00]+$").expect("file name pattern compiles")
    })
}

/// Struct for configuring validations in a fluent style
#[derive(Default)]
pub struct ValidationBuilder<T> {
    field_name: String,
    value: Option<T>,
    errors: Vec<ValidationError>,
}

/// Generic validation implementations
impl<T> ValidationBuilder<T> {
    pub fn new(field_name: &str, value: Option<T>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value,
            errors: Vec::new(),
        }
    }

    pub fn validate_with<F>(mut self, validator: F) -> Self
    where F: FnOnce(&T) -> Result<(), ValidationError> {
        if let Some(value) = &self.value {
            if let Err(err) = validator(value) {
                self.errors.push(err);
            }
        }
        self
    }

    /// Complete validation and return result
    pub fn validate(self) -> DomainResult<()> {
        match self.errors.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(DomainError::Validation(first)),
        }
    }
}

/// String-specific validations
impl ValidationBuilder<String> {
    /// Blank strings count as missing.
    pub fn required(mut self) -> Self {
        let missing = self.value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true);
        if missing {
            self.errors.push(ValidationError::required(&self.field_name));
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let Some(value) = &self.value {
            if value.chars().count() > max {
                self.errors.push(ValidationError::max_length(&self.field_name, max));
            }
        }
        self
    }

    pub fn file_name(mut self) -> Self {
        if let Some(value) = &self.value {
            if value == "." || value == ".." || !file_name_regex().is_match(value) {
                self.errors.push(ValidationError::format(
                    &self.field_name,
                    "must be a plain file name without path separators",
                ));
            }
        }
        self
    }
}
