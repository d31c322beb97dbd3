// Student record value types, field validation, and caller-side age parsing.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub grade: String,
    pub email: String,
}

impl StudentRecord {
    pub fn fields(&self) -> StudentFields {
        StudentFields {
            name: self.name.clone(),
            age: self.age,
            grade: self.grade.clone(),
            email: self.email.clone(),
        }
    }

    /// Case-insensitive substring match against name, email, or the decimal id.
    pub(crate) fn matches(&self, needle_lower: &str) -> bool {
        self.name.to_lowercase().contains(needle_lower)
            || self.email.to_lowercase().contains(needle_lower)
            || self.id.to_string().contains(needle_lower)
    }
}

/// Caller-supplied values for create and update.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StudentFields {
    pub name: String,
    pub age: i64,
    pub grade: String,
    pub email: String,
}

impl StudentFields {
    pub fn new(
        name: impl Into<String>,
        age: i64,
        grade: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            age,
            grade: grade.into(),
            email: email.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        require_text("name", &self.name)?;
        require_text("grade", &self.grade)?;
        require_text("email", &self.email)?;
        Ok(())
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message(format!("{field} is required"))
            .with_field(field)
            .with_hint("All fields are required."));
    }
    Ok(())
}

/// Parse a free-text age the way every caller must before reaching the store.
pub fn parse_age(input: &str) -> Result<i64, Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("age is required")
            .with_field("age")
            .with_hint("All fields are required."));
    }
    trimmed.parse::<i64>().map_err(|err| {
        Error::new(ErrorKind::Validation)
            .with_message("age must be a whole number")
            .with_field("age")
            .with_hint("Enter the age as digits, for example 20.")
            .with_source(err)
    })
}
