use super::{CodeResponse, CodeSource};
use crate::prompt::{self, LineInput};
use async_trait::async_trait;

/// Asks the person at the terminal for each code.
///
/// An empty line, Esc, Ctrl-C or end of input all count as an abort.
pub struct TerminalOperator {
    prompt: String,
}

impl TerminalOperator {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    fn label(&self, attempt: usize) -> String {
        if attempt > 1 {
            format!("{} (attempt {attempt})", self.prompt)
        } else {
            self.prompt.clone()
        }
    }
}

#[async_trait]
impl CodeSource for TerminalOperator {
    async fn request_code(&self, attempt: usize) -> CodeResponse {
        match prompt::read_line(&self.label(attempt), false).await {
            Ok(LineInput::Line(line)) if !line.trim().is_empty() => {
                CodeResponse::Code(line.trim().to_string())
            }
            Ok(_) => CodeResponse::Aborted,
            Err(e) => {
                tracing::warn!("Code prompt failed: {}", e);
                CodeResponse::Aborted
            }
        }
    }
}
