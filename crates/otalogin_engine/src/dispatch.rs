//! Request/response exchange with the page-side executor.
//!
//! A listener is installed in the tab only when the page is on the origin of
//! the job's login URL. The orchestrator posts an `EXECUTE_LOGIN` message to
//! it and gets a single `LOGIN_RESULT` back.

use std::sync::Arc;
use std::time::Duration;

use agent_logging::{agent_debug, agent_warn};
use otalogin_core::{ConnectorRegistry, JobId, JobMsg, LoginRequest, PageMessage};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

use crate::filler::{execute_login, FillerTimeouts};
use crate::{BrowserError, PageSession};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("page is on {actual}, expected origin {expected}")]
    OriginMismatch { expected: String, actual: String },
    #[error("login url {0:?} is not a valid url")]
    InvalidLoginUrl(String),
    #[error("no page session for the tab")]
    NotAttached,
    #[error("page did not respond: {0}")]
    Page(#[from] BrowserError),
    #[error("no listener accepted the request")]
    NoListener,
}

struct Envelope {
    message: PageMessage,
    reply: oneshot::Sender<PageMessage>,
}

pub struct Dispatcher {
    registry: Arc<ConnectorRegistry>,
    timeouts: FillerTimeouts,
}

impl Dispatcher {
    pub fn new(registry: ConnectorRegistry, timeouts: FillerTimeouts) -> Self {
        Self {
            registry: Arc::new(registry),
            timeouts,
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Posts `EXECUTE_LOGIN` to the page. Fails fast when nothing in the page
    /// can receive it; the caller must not retry.
    pub async fn deliver(
        &self,
        page: Arc<dyn PageSession>,
        login_url: &str,
        request: LoginRequest,
    ) -> Result<PendingResult, DeliveryError> {
        let job_id = request.job_id.clone();
        let (inbox, listener) = self.install_listener(page, login_url).await?;

        let (reply, result) = oneshot::channel();
        inbox
            .send(Envelope {
                message: PageMessage::ExecuteLogin(request),
                reply,
            })
            .await
            .map_err(|_| DeliveryError::NoListener)?;
        agent_debug!("job {job_id}: EXECUTE_LOGIN delivered");

        Ok(PendingResult {
            job_id,
            result,
            listener,
        })
    }

    async fn install_listener(
        &self,
        page: Arc<dyn PageSession>,
        login_url: &str,
    ) -> Result<(mpsc::Sender<Envelope>, JoinHandle<()>), DeliveryError> {
        let expected = Url::parse(login_url)
            .map_err(|_| DeliveryError::InvalidLoginUrl(login_url.to_string()))?
            .origin();
        let current = page.current_url().await?;
        let on_site = Url::parse(&current)
            .map(|url| url.origin() == expected)
            .unwrap_or(false);
        if !on_site {
            return Err(DeliveryError::OriginMismatch {
                expected: expected.ascii_serialization(),
                actual: current,
            });
        }

        let (inbox, rx) = mpsc::channel(1);
        let listener = tokio::spawn(listen(
            page,
            Arc::clone(&self.registry),
            self.timeouts,
            rx,
        ));
        Ok((inbox, listener))
    }
}

async fn listen(
    page: Arc<dyn PageSession>,
    registry: Arc<ConnectorRegistry>,
    timeouts: FillerTimeouts,
    mut inbox: mpsc::Receiver<Envelope>,
) {
    while let Some(Envelope { message, reply }) = inbox.recv().await {
        match message {
            PageMessage::ExecuteLogin(request) => {
                let result = execute_login(page.as_ref(), &registry, &request, &timeouts).await;
                let _ = reply.send(PageMessage::LoginResult(result));
            }
            PageMessage::LoginResult(_) => agent_debug!("listener ignores LOGIN_RESULT"),
        }
    }
}

/// The page's answer to one delivered request.
pub struct PendingResult {
    job_id: JobId,
    result: oneshot::Receiver<PageMessage>,
    listener: JoinHandle<()>,
}

impl PendingResult {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Waits for `LOGIN_RESULT`. Without a limit this waits as long as the
    /// executor's own bounded waits take.
    pub async fn wait(self, limit: Option<Duration>) -> JobMsg {
        let PendingResult {
            job_id,
            result,
            listener,
        } = self;
        let received = match limit {
            Some(limit) => match tokio::time::timeout(limit, result).await {
                Ok(received) => received,
                Err(_) => {
                    listener.abort();
                    return JobMsg::ResultTimedOut;
                }
            },
            None => result.await,
        };

        match received {
            Ok(PageMessage::LoginResult(result)) => {
                if result.job_id != job_id {
                    agent_warn!("result for job {} arrived while waiting on {job_id}", result.job_id);
                }
                JobMsg::ResultReceived(result)
            }
            Ok(PageMessage::ExecuteLogin(_)) => JobMsg::Crashed {
                message: "page answered with an execute request".to_string(),
            },
            Err(_) => JobMsg::Crashed {
                message: "page listener ended without a result".to_string(),
            },
        }
    }
}
