// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const ID_MAX_LEN: usize = 64;
pub const EMAIL_MAX_LEN: usize = 254;

/// Identifier for a case. Path-safe by construction: ids are embedded in
/// instruction document paths and must never contain separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct CaseId(String);

impl CaseId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        validate_id("case id", input)?;
        Ok(Self(input.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for CaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct AssistantId(String);

impl AssistantId {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        validate_id("assistant id", input)?;
        Ok(Self(input.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for AssistantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_id(kind: &str, input: &str) -> Result<(), ValidationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ValidationError(format!("{kind} must not be empty")));
    }
    if s.len() != input.len() {
        return Err(ValidationError(format!(
            "{kind} must not carry surrounding whitespace"
        )));
    }
    if s.len() > ID_MAX_LEN {
        return Err(ValidationError(format!(
            "{kind} exceeds max length {ID_MAX_LEN}"
        )));
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ValidationError(format!(
            "{kind} must contain only [a-z0-9_-]"
        )));
    }
    Ok(())
}

/// Lowercased, trimmed email address. The single structural requirement is a
/// non-empty local part and domain around one '@'; roster rows failing this
/// are the rows the import report counts as failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
#[non_exhaustive]
pub struct Email(String);

impl Email {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError("email must not be empty".to_string()));
        }
        if s.len() > EMAIL_MAX_LEN {
            return Err(ValidationError(format!(
                "email exceeds max length {EMAIL_MAX_LEN}"
            )));
        }
        let Some((local, domain)) = s.split_once('@') else {
            return Err(ValidationError(format!("not an email address: {s}")));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(ValidationError(format!("not an email address: {s}")));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(ValidationError(format!("not an email address: {s}")));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
