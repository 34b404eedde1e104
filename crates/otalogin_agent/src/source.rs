//! Job source that follows the pairing recorded in the state file.
//!
//! The API base is resolved again on every call, so pairing with another
//! portal (or unpairing) while `run` is active takes effect on the next
//! cycle without a restart.

use std::sync::Arc;

use agent_logging::{agent_info, agent_warn};
use otalogin_core::{
    JobCredentials, JobReport, PairRequest, PairResponse, PairingToken, PendingJob, ReportAck,
};
use otalogin_engine::{ClientError, FailureKind, JobSource, ReqwestJobSource, StateStore};
use tokio::sync::Mutex;

use crate::config::{resolve_api_base, AgentConfig};

pub struct PairedJobSource {
    store: StateStore,
    config: AgentConfig,
    /// From `--api-base` or the config file; wins over the paired portal.
    explicit_base: Option<String>,
    current: Mutex<Option<(String, Arc<ReqwestJobSource>)>>,
}

impl PairedJobSource {
    pub fn new(store: StateStore, config: AgentConfig, explicit_base: Option<String>) -> Self {
        Self {
            store,
            config,
            explicit_base,
            current: Mutex::new(None),
        }
    }

    /// The client for the current API base, rebuilt only when the base moved.
    async fn client(&self) -> Result<Arc<ReqwestJobSource>, ClientError> {
        let mut current = self.current.lock().await;
        let base = match self.store.load() {
            Ok(state) => resolve_api_base(self.explicit_base.as_deref(), state.portal_url.as_deref()),
            Err(err) => match current.as_ref() {
                Some((base, client)) => {
                    agent_warn!("agent state unreadable, staying on {base}: {err}");
                    return Ok(Arc::clone(client));
                }
                None => {
                    return Err(ClientError::new(
                        FailureKind::Network,
                        format!("agent state unreadable: {err}"),
                    ))
                }
            },
        };
        if let Some((cached, client)) = current.as_ref() {
            if *cached == base {
                return Ok(Arc::clone(client));
            }
        }
        agent_info!("job source API base is now {base}");
        let client = Arc::new(ReqwestJobSource::new(
            self.config.client_settings(base.clone()),
        )?);
        *current = Some((base, Arc::clone(&client)));
        Ok(client)
    }
}

#[async_trait::async_trait]
impl JobSource for PairedJobSource {
    async fn list_pending(
        &self,
        token: &PairingToken,
        limit: usize,
    ) -> Result<Vec<PendingJob>, ClientError> {
        self.client().await?.list_pending(token, limit).await
    }

    async fn fetch_credentials(
        &self,
        token: &PairingToken,
        job_id: &str,
    ) -> Result<JobCredentials, ClientError> {
        self.client().await?.fetch_credentials(token, job_id).await
    }

    async fn report(
        &self,
        token: &PairingToken,
        report: &JobReport,
    ) -> Result<ReportAck, ClientError> {
        self.client().await?.report(token, report).await
    }

    async fn pair(&self, request: &PairRequest) -> Result<PairResponse, ClientError> {
        self.client().await?.pair(request).await
    }
}
