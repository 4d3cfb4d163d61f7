//! The credential and job-search parameter set submitted to the backend.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four required submission fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Email,
    Password,
    What,
    Where,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Email, Field::Password, Field::What, Field::Where];

    /// Label shown when prompting for the field.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "Email",
            Self::Password => "Password",
            Self::What => "Job name",
            Self::Where => "Job location",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Email => "email",
            Self::Password => "password",
            Self::What => "job name",
            Self::Where => "job location",
        };
        f.write_str(name)
    }
}

/// Account credentials plus the job title and location queries.
///
/// Serializes to the exact object the backend expects:
/// `{"email", "password", "what", "where"}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub email: String,
    pub password: String,
    pub what: String,
    #[serde(rename = "where")]
    pub where_: String,
}

impl CredentialSet {
    /// Build a set, rejecting any blank field.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        what: impl Into<String>,
        where_: impl Into<String>,
    ) -> Result<Self> {
        let set = Self {
            email: email.into(),
            password: password.into(),
            what: what.into(),
            where_: where_.into(),
        };
        set.validate()?;
        Ok(set)
    }

    #[must_use]
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Email => &self.email,
            Field::Password => &self.password,
            Field::What => &self.what,
            Field::Where => &self.where_,
        }
    }

    /// First blank field, in form order.
    #[must_use]
    pub fn missing_field(&self) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|&field| self.get(field).trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        match self.missing_field() {
            Some(field) => Err(Error::InvalidInput(field)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("what", &self.what)
            .field("where", &self.where_)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CredentialSet {
        CredentialSet::new("a@b.com", "p", "engineer", "remote").unwrap()
    }

    #[test]
    fn test_valid_set() {
        let set = sample();
        assert!(set.validate().is_ok());
        assert_eq!(set.missing_field(), None);
    }

    #[test]
    fn test_each_field_required() {
        for field in Field::ALL {
            let mut set = sample();
            match field {
                Field::Email => set.email.clear(),
                Field::Password => set.password.clear(),
                Field::What => set.what.clear(),
                Field::Where => set.where_.clear(),
            }
            assert!(matches!(set.validate(), Err(Error::InvalidInput(f)) if f == field));
        }
    }

    #[test]
    fn test_whitespace_counts_as_blank() {
        let result = CredentialSet::new("a@b.com", "p", "   ", "remote");
        assert!(matches!(result, Err(Error::InvalidInput(Field::What))));
    }

    #[test]
    fn test_reports_first_missing_in_form_order() {
        let set = CredentialSet {
            email: String::new(),
            password: String::new(),
            what: "x".into(),
            where_: String::new(),
        };
        assert_eq!(set.missing_field(), Some(Field::Email));
    }

    #[test]
    fn test_serializes_where_key() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "email": "a@b.com",
                "password": "p",
                "what": "engineer",
                "where": "remote",
            })
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let set = CredentialSet::new("a@b.com", "hunter2", "engineer", "remote").unwrap();
        let debug = format!("{set:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
