use std::time::Duration;

use agent_logging::{agent_debug, agent_warn};
use otalogin_core::{
    JobCredentials, JobListing, JobReport, PairRequest, PairResponse, PairingToken, PendingJob,
    ReportAck,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::{ClientError, FailureKind};

pub const DEFAULT_API_BASE: &str = "http://localhost:3000/api/extension";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base URL the endpoint paths are appended to, e.g.
    /// `https://portal.example/api/extension`.
    pub api_base: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Derives the API base from the portal URL entered at pairing time.
pub fn api_base_for_portal(portal_url: &str) -> String {
    format!("{}/api/extension", portal_url.trim_end_matches('/'))
}

/// The remote job source. All calls except `pair` need the pairing token.
#[async_trait::async_trait]
pub trait JobSource: Send + Sync {
    /// Pending jobs, at most `limit`, oldest first.
    async fn list_pending(
        &self,
        token: &PairingToken,
        limit: usize,
    ) -> Result<Vec<PendingJob>, ClientError>;

    /// Login material for one job. Moves the job to in_progress remotely.
    async fn fetch_credentials(
        &self,
        token: &PairingToken,
        job_id: &str,
    ) -> Result<JobCredentials, ClientError>;

    /// Terminal result for one job. Moves it to success or failed remotely.
    async fn report(
        &self,
        token: &PairingToken,
        report: &JobReport,
    ) -> Result<ReportAck, ClientError>;

    async fn pair(&self, request: &PairRequest) -> Result<PairResponse, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestJobSource {
    base: Url,
    client: reqwest::Client,
}

impl ReqwestJobSource {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let base = Url::parse(&settings.api_base)
            .map_err(|err| ClientError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::new(
                FailureKind::InvalidUrl,
                format!("{base} cannot be used as an API base"),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ClientError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::new(FailureKind::InvalidUrl, "base url has no path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl JobSource for ReqwestJobSource {
    async fn list_pending(
        &self,
        token: &PairingToken,
        limit: usize,
    ) -> Result<Vec<PendingJob>, ClientError> {
        let mut url = self.endpoint(&["jobs"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        agent_debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let listing: JobListing = read_json(check_status(response)?).await?;
        if listing.skipped > 0 {
            agent_warn!(
                "Skipped {} malformed job entries in the listing",
                listing.skipped
            );
        }
        Ok(listing.jobs)
    }

    async fn fetch_credentials(
        &self,
        token: &PairingToken,
        job_id: &str,
    ) -> Result<JobCredentials, ClientError> {
        let url = self.endpoint(&["job", job_id])?;
        agent_debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(check_status(response)?).await
    }

    async fn report(
        &self,
        token: &PairingToken,
        report: &JobReport,
    ) -> Result<ReportAck, ClientError> {
        let url = self.endpoint(&["report"])?;
        agent_debug!("POST {url} job={} status={:?}", report.job_id, report.status);

        let response = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .json(report)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        read_json(check_status(response)?).await
    }

    async fn pair(&self, request: &PairRequest) -> Result<PairResponse, ClientError> {
        let url = self.endpoint(&["pair"])?;
        agent_debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        // Rejections carry `{ success: false, error }` with a 4xx status.
        match serde_json::from_slice::<PairResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ClientError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            )),
            Err(err) => Err(ClientError::new(
                FailureKind::InvalidResponse,
                err.to_string(),
            )),
        }
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ClientError::new(
            FailureKind::NotPaired,
            format!("job source rejected the device token ({status})"),
        ));
    }
    if !status.is_success() {
        return Err(ClientError::new(
            FailureKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ));
    }
    Ok(response)
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let body = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&body)
        .map_err(|err| ClientError::new(FailureKind::InvalidResponse, err.to_string()))
}

fn map_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        return ClientError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_builder() {
        return ClientError::new(FailureKind::InvalidUrl, err.to_string());
    }
    ClientError::new(FailureKind::Network, err.to_string())
}
