use super::{CloseReason, FrameStream, PROTOCOL_ERROR_CLOSE, Session, SessionEvent, SessionReport};
use crate::config::AbortPolicy;
use crate::error::{Error, Result};
use crate::operator::{CodeResponse, CodeSource};
use crate::protocol::{Command, Event, Outcome};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// No code request pending.
    Idle,
    /// The operator has been asked and the reply is not sent yet.
    AwaitingCode,
}

/// Most events held back while a prompt is open.
pub(super) const MAX_BACKLOG: usize = 64;

enum Answer {
    Sent,
    Aborted,
    SessionEnded,
    /// The backend reported its outcome before the operator answered.
    Finished(Outcome),
}

/// Answers the backend's one-time code requests for one session.
///
/// Every `code` event gets exactly one operator prompt and at most one
/// reply; nothing is sent before the backend asks. While a prompt is open
/// the relay keeps reading the connection: a close or a `result` ends the
/// prompt, further code requests are queued and handled after the reply,
/// anything else is skipped.
pub struct ChallengeRelay {
    operator: Arc<dyn CodeSource>,
    policy: AbortPolicy,
    code_timeout: Option<Duration>,
    events: Option<mpsc::Sender<SessionEvent>>,
    state: RelayState,
    requests: usize,
    codes_sent: usize,
    codes_aborted: usize,
    backlog: VecDeque<Event>,
}

impl ChallengeRelay {
    pub fn new(operator: Arc<dyn CodeSource>) -> Self {
        Self {
            operator,
            policy: AbortPolicy::default(),
            code_timeout: None,
            events: None,
            state: RelayState::Idle,
            requests: 0,
            codes_sent: 0,
            codes_aborted: 0,
            backlog: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: AbortPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limit how long the operator has per code. Expiry counts as an abort.
    #[must_use]
    pub fn with_code_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.code_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        self.state
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Serve the session until it closes.
    ///
    /// Returns the report when the session ends normally. Errors with
    /// `CodeEntryAborted` when the operator declines and the policy is
    /// [`AbortPolicy::Close`], with `Protocol` on a malformed frame or a
    /// protocol-error close from the backend, and with `Connection` when the
    /// link drops.
    pub async fn run<S: FrameStream>(&mut self, session: &mut Session<S>) -> Result<SessionReport> {
        self.state = RelayState::Idle;
        self.requests = 0;
        self.codes_sent = 0;
        self.codes_aborted = 0;
        self.backlog.clear();

        let token = session.abort_token.clone();
        let mut outcome: Option<Outcome> = None;

        let closed_by = loop {
            let event = match self.backlog.pop_front() {
                Some(event) => Some(event),
                None => tokio::select! {
                    biased;
                    () = token.cancelled() => break CloseReason::Client,
                    inbound = session.next_event() => match inbound {
                        Ok(event) => event,
                        Err(e) => {
                            session.close().await;
                            return Err(e);
                        }
                    },
                },
            };

            let Some(event) = event else {
                break session.backend_close();
            };

            match event {
                Event::CodeRequested => match self.answer(session, &token).await {
                    Ok(Answer::Sent) => {}
                    Ok(Answer::Aborted) if self.policy == AbortPolicy::Close => {
                        session.close().await;
                        self.emit(SessionEvent::Closed(CloseReason::Client)).await;
                        return Err(Error::CodeEntryAborted);
                    }
                    Ok(Answer::Aborted) => {
                        tracing::info!(session_id = %session.id, "Waiting for the backend to ask again");
                    }
                    Ok(Answer::SessionEnded) if token.is_cancelled() => break CloseReason::Client,
                    Ok(Answer::SessionEnded) => break session.backend_close(),
                    Ok(Answer::Finished(result)) => {
                        self.emit(SessionEvent::Finished(result.clone())).await;
                        outcome = Some(result);
                        break CloseReason::Completed;
                    }
                    Err(e) => {
                        session.close().await;
                        return Err(e);
                    }
                },
                Event::Result(result) => {
                    tracing::info!(session_id = %session.id, success = result.success, "Backend reported an outcome");
                    self.emit(SessionEvent::Finished(result.clone())).await;
                    outcome = Some(result);
                    break CloseReason::Completed;
                }
                Event::Unrecognized(tag) => {
                    tracing::warn!(session_id = %session.id, event = ?tag, "Ignoring unrecognized event");
                    self.emit(SessionEvent::Ignored { event: tag }).await;
                }
            }
        };

        session.close().await;
        self.emit(SessionEvent::Closed(closed_by.clone())).await;

        if let CloseReason::Backend {
            code: Some(PROTOCOL_ERROR_CLOSE),
            reason,
        } = &closed_by
        {
            return Err(Error::Protocol(format!(
                "backend rejected a frame and closed the session{}",
                reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
            )));
        }

        Ok(SessionReport {
            session_id: session.id.clone(),
            codes_sent: self.codes_sent,
            codes_aborted: self.codes_aborted,
            outcome,
            closed_by,
            started_at: session.started_at,
            finished_at: Utc::now(),
        })
    }

    /// Handle one code request: prompt once, reply once.
    async fn answer<S: FrameStream>(
        &mut self,
        session: &mut Session<S>,
        token: &CancellationToken,
    ) -> Result<Answer> {
        self.requests += 1;
        let attempt = self.requests;
        self.state = RelayState::AwaitingCode;
        tracing::info!(session_id = %session.id, attempt, "Backend requested a one-time code");
        self.emit(SessionEvent::CodeRequested { attempt }).await;

        let operator = Arc::clone(&self.operator);
        let code_timeout = self.code_timeout;
        let prompt = async move {
            let request = operator.request_code(attempt);
            match code_timeout {
                Some(limit) => tokio::time::timeout(limit, request).await.unwrap_or_else(|_| {
                    tracing::warn!(attempt, "No code entered within {:?}", limit);
                    CodeResponse::Aborted
                }),
                None => request.await,
            }
        };
        tokio::pin!(prompt);

        let response = loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break None,
                response = &mut prompt => break Some(response),
                inbound = session.next_event() => match inbound {
                    Ok(Some(Event::Result(result))) => {
                        self.state = RelayState::Idle;
                        tracing::info!(
                            session_id = %session.id,
                            attempt,
                            success = result.success,
                            "Backend reported an outcome while waiting for a code"
                        );
                        return Ok(Answer::Finished(result));
                    }
                    Ok(Some(Event::Unrecognized(tag))) => {
                        tracing::warn!(session_id = %session.id, event = ?tag, "Ignoring unrecognized event");
                        self.emit(SessionEvent::Ignored { event: tag }).await;
                    }
                    Ok(Some(event)) if self.backlog.len() < MAX_BACKLOG => {
                        self.backlog.push_back(event);
                    }
                    Ok(Some(_)) => {
                        self.state = RelayState::Idle;
                        return Err(Error::Protocol(format!(
                            "more than {MAX_BACKLOG} code requests queued behind an open prompt"
                        )));
                    }
                    Ok(None) => break None,
                    Err(e) => {
                        self.state = RelayState::Idle;
                        return Err(e);
                    }
                },
            }
        };

        let Some(response) = response else {
            self.state = RelayState::Idle;
            tracing::info!(session_id = %session.id, attempt, "Session ended while waiting for a code");
            return Ok(Answer::SessionEnded);
        };

        match response {
            CodeResponse::Code(code) => {
                let sent = session.send(&Command::CodeReply(code)).await;
                self.state = RelayState::Idle;
                sent?;
                self.codes_sent += 1;
                tracing::info!(session_id = %session.id, attempt, "Code sent");
                self.emit(SessionEvent::CodeSent { attempt }).await;
                Ok(Answer::Sent)
            }
            CodeResponse::Aborted => {
                self.state = RelayState::Idle;
                self.codes_aborted += 1;
                tracing::warn!(session_id = %session.id, attempt, "Operator aborted code entry");
                self.emit(SessionEvent::CodeEntryAborted { attempt }).await;
                Ok(Answer::Aborted)
            }
        }
    }
}
