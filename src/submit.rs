//! One submit capability over either protocol binding.

use crate::config::{AbortPolicy, Config, TransportKind};
use crate::credentials::CredentialSet;
use crate::error::{Error, Result};
use crate::operator::CodeSource;
use crate::rest::RunClient;
use crate::session::{ChallengeRelay, SessionEvent, SessionInitiator, SessionReport};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a finished submission produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum SubmitReport {
    Interactive(SessionReport),
    Rest { response: serde_json::Value },
}

/// Hands a credential set to the backend.
///
/// Implementations emit [`SessionEvent::Submitted`] once the backend has
/// accepted the run, which is the caller's cue to clear its input.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(
        &self,
        params: &CredentialSet,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SubmitReport>;
}

/// WebSocket binding with one-time code relay.
pub struct InteractiveSubmitter {
    initiator: SessionInitiator,
    operator: Arc<dyn CodeSource>,
    policy: AbortPolicy,
    code_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl InteractiveSubmitter {
    pub fn new(initiator: SessionInitiator, operator: Arc<dyn CodeSource>) -> Self {
        Self {
            initiator,
            operator,
            policy: AbortPolicy::default(),
            code_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AbortPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_code_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.code_timeout = timeout;
        self
    }

    /// Cancelling `token` closes any session this submitter has open.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[async_trait]
impl Submitter for InteractiveSubmitter {
    async fn submit(
        &self,
        params: &CredentialSet,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SubmitReport> {
        let mut session = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            session = self.initiator.start_session(params) => session?,
        };
        session.abort_token = self.cancel.child_token();

        let _ = events
            .send(SessionEvent::Connected {
                session_id: session.id.clone(),
            })
            .await;
        let _ = events.send(SessionEvent::Submitted).await;

        let mut relay = ChallengeRelay::new(Arc::clone(&self.operator))
            .with_policy(self.policy)
            .with_code_timeout(self.code_timeout)
            .with_events(events);
        let report = relay.run(&mut session).await?;

        Ok(SubmitReport::Interactive(report.into_result()?))
    }
}

/// Single POST binding.
pub struct RestSubmitter {
    client: RunClient,
    cancel: CancellationToken,
}

impl RestSubmitter {
    #[must_use]
    pub fn new(client: RunClient) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling `token` abandons the request in flight.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[async_trait]
impl Submitter for RestSubmitter {
    async fn submit(
        &self,
        params: &CredentialSet,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SubmitReport> {
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.run(params) => response?,
        };
        let _ = events.send(SessionEvent::Submitted).await;
        Ok(SubmitReport::Rest { response })
    }
}

/// Build the binding the configuration selects.
pub fn submitter_for(
    config: &Config,
    operator: Arc<dyn CodeSource>,
    cancel: CancellationToken,
) -> Result<Box<dyn Submitter>> {
    match config.transport {
        TransportKind::Interactive => {
            let submitter =
                InteractiveSubmitter::new(SessionInitiator::from_config(config)?, operator)
                    .with_policy(config.on_code_abort)
                    .with_code_timeout(config.code_timeout())
                    .with_cancel(cancel);
            Ok(Box::new(submitter))
        }
        TransportKind::Rest => Ok(Box::new(
            RestSubmitter::new(RunClient::from_config(config)?).with_cancel(cancel),
        )),
    }
}
