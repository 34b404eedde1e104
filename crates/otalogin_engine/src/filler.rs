//! Fills and submits a channel's login form inside the target page.

use std::time::Duration;

use agent_logging::{agent_debug, agent_info, agent_warn};
use otalogin_core::{ConnectorRegistry, ErrorCode, LoginRequest, LoginResult};
use thiserror::Error;

use crate::wait::wait_until;
use crate::{BrowserError, PageSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillerTimeouts {
    /// Bound on each wait for a form element.
    pub element: Duration,
    /// Bound on the wait for the success indicator after submitting.
    pub success: Duration,
}

impl Default for FillerTimeouts {
    fn default() -> Self {
        Self {
            element: Duration::from_secs(10),
            success: Duration::from_secs(30),
        }
    }
}

/// Why an attempt failed. The display text is what gets reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FillFailure {
    #[error("Unknown channel")]
    UnknownChannel,
    #[error("Username input not found")]
    UsernameNotFound,
    #[error("Password input not found")]
    PasswordNotFound,
    #[error("Submit button not found")]
    SubmitNotFound,
    /// The success indicator never appeared, most likely rejected
    /// credentials.
    #[error("Login may have failed")]
    SuccessIndicatorMissing,
    #[error("{0}")]
    Browser(String),
}

impl FillFailure {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FillFailure::UsernameNotFound
            | FillFailure::PasswordNotFound
            | FillFailure::SubmitNotFound => ErrorCode::UiChanged,
            FillFailure::SuccessIndicatorMissing => ErrorCode::AuthFailed,
            FillFailure::UnknownChannel | FillFailure::Browser(_) => ErrorCode::Unknown,
        }
    }
}

impl From<BrowserError> for FillFailure {
    fn from(err: BrowserError) -> Self {
        FillFailure::Browser(err.to_string())
    }
}

/// Runs one login attempt and always returns exactly one terminal result.
pub async fn execute_login(
    page: &dyn PageSession,
    registry: &ConnectorRegistry,
    request: &LoginRequest,
    timeouts: &FillerTimeouts,
) -> LoginResult {
    match fill_and_submit(page, registry, request, timeouts).await {
        Ok(()) => {
            agent_info!("job {}: login succeeded on {}", request.job_id, request.channel_code);
            LoginResult::success(request.job_id.clone())
        }
        Err(failure) => {
            agent_warn!(
                "job {}: login on {} failed: {failure}",
                request.job_id,
                request.channel_code
            );
            LoginResult::failed(request.job_id.clone(), failure.error_code(), failure.to_string())
        }
    }
}

async fn fill_and_submit(
    page: &dyn PageSession,
    registry: &ConnectorRegistry,
    request: &LoginRequest,
    timeouts: &FillerTimeouts,
) -> Result<(), FillFailure> {
    let connector = registry
        .get(&request.channel_code)
        .ok_or(FillFailure::UnknownChannel)?;
    let selectors = &connector.selectors;

    if !fill_when_present(page, &selectors.username, &request.login_id, timeouts.element).await? {
        return Err(FillFailure::UsernameNotFound);
    }
    if !fill_when_present(page, &selectors.password, &request.password, timeouts.element).await? {
        return Err(FillFailure::PasswordNotFound);
    }

    for (field, value) in connector.extra_field_values(&request.extra_fields) {
        if !fill_when_present(page, &field.selector, value, timeouts.element).await? {
            agent_debug!("job {}: optional field {} not on page", request.job_id, field.key);
        }
    }

    if !appears(page, &selectors.submit, timeouts.element).await? || !page.click(&selectors.submit).await? {
        return Err(FillFailure::SubmitNotFound);
    }

    if !lands_on(page, &selectors.success_indicator, timeouts.success).await? {
        return Err(FillFailure::SuccessIndicatorMissing);
    }
    Ok(())
}

/// Waits for the post-submit indicator. Submitting usually navigates, so
/// transient script errors count as "not there yet" until the limit.
async fn lands_on(page: &dyn PageSession, selector: &str, limit: Duration) -> Result<bool, BrowserError> {
    let mut changes = page.changes();
    let found = wait_until(&mut changes, limit, move || async move {
        match page.has_element(selector).await {
            Ok(found) => Ok(found.then_some(())),
            Err(err) if err.is_transient() => {
                agent_debug!("page busy while waiting for {selector}: {err}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    })
    .await?;
    Ok(found.is_some())
}

async fn appears(page: &dyn PageSession, selector: &str, limit: Duration) -> Result<bool, BrowserError> {
    let mut changes = page.changes();
    let found = wait_until(&mut changes, limit, move || async move {
        page.has_element(selector).await.map(|found| found.then_some(()))
    })
    .await?;
    Ok(found.is_some())
}

async fn fill_when_present(
    page: &dyn PageSession,
    selector: &str,
    value: &str,
    limit: Duration,
) -> Result<bool, BrowserError> {
    if !appears(page, selector, limit).await? {
        return Ok(false);
    }
    page.fill(selector, value).await
}
