//! Terminal form collecting the four required fields.

use crate::credentials::{CredentialSet, Field};
use crate::error::Result;
use crate::prompt::{self, LineInput};
use async_trait::async_trait;
use std::io;

/// Source of field values typed by the user.
#[async_trait]
pub trait FieldPrompter: Send + Sync {
    async fn prompt(&self, field: Field) -> io::Result<LineInput>;
}

/// Prompts on the terminal; the password is masked.
pub struct TerminalPrompter;

#[async_trait]
impl FieldPrompter for TerminalPrompter {
    async fn prompt(&self, field: Field) -> io::Result<LineInput> {
        prompt::read_line(field.label(), field == Field::Password).await
    }
}

/// Form state held by the caller until the backend accepts the run.
#[derive(Default)]
pub struct CredentialForm {
    values: [String; 4],
}

fn slot(field: Field) -> usize {
    match field {
        Field::Email => 0,
        Field::Password => 1,
        Field::What => 2,
        Field::Where => 3,
    }
}

impl CredentialForm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefill a field, ignoring `None`.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        if let Some(value) = value {
            self.store(field, value);
        }
    }

    /// Every field but the password is trimmed.
    fn store(&mut self, field: Field, value: String) {
        self.values[slot(field)] = if field == Field::Password {
            value
        } else {
            value.trim().to_string()
        };
    }

    #[must_use]
    pub fn value(&self, field: Field) -> &str {
        &self.values[slot(field)]
    }

    /// Blank fields, in form order.
    #[must_use]
    pub fn missing(&self) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|&field| self.value(field).trim().is_empty())
            .collect()
    }

    /// Prompt for every blank field until all are filled.
    ///
    /// A blank answer asks again. Returns `None` when the user cancels.
    pub async fn fill_missing<P: FieldPrompter + ?Sized>(
        &mut self,
        prompter: &P,
    ) -> io::Result<Option<CredentialSet>> {
        for field in self.missing() {
            loop {
                match prompter.prompt(field).await? {
                    LineInput::Cancelled => return Ok(None),
                    LineInput::Line(line) if line.trim().is_empty() => {
                        eprintln!("{} is required.", field.label());
                    }
                    LineInput::Line(line) => {
                        self.store(field, line);
                        break;
                    }
                }
            }
        }

        // Every field is filled at this point.
        self.credentials().map(Some).map_err(io::Error::other)
    }

    /// Validate and build the credential set.
    pub fn credentials(&self) -> Result<CredentialSet> {
        CredentialSet::new(
            self.value(Field::Email),
            self.value(Field::Password),
            self.value(Field::What),
            self.value(Field::Where),
        )
    }

    /// Clear everything after a successful submission.
    pub fn reset(&mut self) {
        for value in &mut self.values {
            value.clear();
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(String::is_empty)
    }
}
