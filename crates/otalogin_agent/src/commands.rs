//! One function per CLI command.

use std::path::Path;
use std::sync::Arc;

use agent_logging::agent_info;
use anyhow::{bail, Context, Result};
use otalogin_core::PairRequest;
use otalogin_engine::{
    AgentHandle, AgentState, CdpBrowser, CycleOutcome, JobSource, PollScheduler, ReqwestJobSource,
    StateStore,
};

use crate::cli::PairArgs;
use crate::config::{resolve_api_base, AgentConfig};
use crate::source::PairedJobSource;

/// Everything a command needs, resolved from flags, environment and files.
pub struct AgentContext {
    pub store: StateStore,
    pub config: AgentConfig,
    pub api_base_override: Option<String>,
    pub devtools_endpoint: String,
}

impl AgentContext {
    fn explicit_api_base(&self) -> Option<String> {
        self.api_base_override
            .clone()
            .or_else(|| self.config.api_base.clone())
    }

    /// A client for pairing against `portal_url`.
    fn pairing_source(&self, portal_url: &str) -> Result<ReqwestJobSource> {
        let base = resolve_api_base(self.explicit_api_base().as_deref(), Some(portal_url));
        Ok(ReqwestJobSource::new(self.config.client_settings(base))?)
    }

    fn scheduler(&self) -> Result<PollScheduler> {
        let source = PairedJobSource::new(
            self.store.clone(),
            self.config.clone(),
            self.explicit_api_base(),
        );
        let browser = CdpBrowser::new(
            &self.devtools_endpoint,
            self.config.devtools_command_timeout(),
        )?;
        Ok(PollScheduler::new(
            Arc::new(source),
            Arc::new(browser),
            self.store.clone(),
            self.config.registry(),
            self.config.scheduler_settings(),
        ))
    }
}

pub async fn run(ctx: &AgentContext) -> Result<()> {
    let scheduler = Arc::new(ctx.scheduler()?);
    let agent = AgentHandle::spawn(scheduler, ctx.config.poll_interval());
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    agent_info!("interrupt received, shutting down");
    agent.shutdown().await;
    Ok(())
}

pub async fn poll(ctx: &AgentContext) -> Result<()> {
    let outcome = ctx.scheduler()?.run_cycle().await;
    println!("{outcome}");
    match outcome {
        CycleOutcome::Aborted { reason, .. } => bail!("poll cycle aborted: {reason}"),
        _ => Ok(()),
    }
}

pub async fn pair(ctx: &AgentContext, args: &PairArgs) -> Result<()> {
    let request = PairRequest::new(&args.code, &args.device_name)?;
    let portal_url = args.portal_url.trim_end_matches('/').to_string();
    let response = ctx.pairing_source(&portal_url)?.pair(&request).await?;

    let Some(token) = response.token() else {
        let reason = response
            .error
            .unwrap_or_else(|| "no device token issued".to_string());
        bail!("pairing rejected: {reason}");
    };
    ctx.store.update(|state| {
        state.device_token = Some(token);
        state.device_name = Some(request.device_name.clone());
        state.portal_url = Some(portal_url.clone());
        state.polling_enabled = true;
    })?;
    agent_info!("paired as {:?} with {portal_url}", request.device_name);
    println!("Paired as {} with {portal_url}", request.device_name);
    Ok(())
}

pub fn unpair(ctx: &AgentContext) -> Result<()> {
    ctx.store.update(AgentState::clear_pairing)?;
    println!("Unpaired");
    Ok(())
}

pub fn set_polling(ctx: &AgentContext, enabled: bool) -> Result<()> {
    let state = ctx.store.update(|state| state.polling_enabled = enabled)?;
    println!("Polling {}", on_off(state.polling_enabled));
    Ok(())
}

pub fn status(ctx: &AgentContext) -> Result<()> {
    let state = ctx.store.load()?;
    for line in status_lines(&state, &ctx.store.path()) {
        println!("{line}");
    }
    Ok(())
}

pub fn channels(ctx: &AgentContext) -> Result<()> {
    for connector in ctx.config.registry().iter() {
        println!("{:<10} {:<20} {}", connector.code, connector.name, connector.login_url);
    }
    Ok(())
}

fn status_lines(state: &AgentState, state_file: &Path) -> Vec<String> {
    let or_dash = |value: Option<&str>| value.unwrap_or("-").to_string();
    let window = state
        .monitor_window
        .as_ref()
        .map(|w| w.window_id.to_string());
    vec![
        format!("paired:         {}", if state.is_paired() { "yes" } else { "no" }),
        format!("device name:    {}", or_dash(state.device_name.as_deref())),
        format!("portal:         {}", or_dash(state.portal_url.as_deref())),
        format!("monitor window: {}", or_dash(window.as_deref())),
        format!("polling:        {}", on_off(state.polling_enabled)),
        format!("state file:     {}", state_file.display()),
    ]
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otalogin_core::PairingToken;
    use otalogin_engine::WindowHandle;
    use pretty_assertions::assert_eq;

    fn context(dir: &std::path::Path) -> AgentContext {
        AgentContext {
            store: StateStore::new(dir),
            config: AgentConfig::default(),
            api_base_override: None,
            devtools_endpoint: otalogin_engine::DEFAULT_DEVTOOLS_ENDPOINT.to_string(),
        }
    }

    #[test]
    fn status_of_a_fresh_agent() {
        let lines = status_lines(&AgentState::default(), Path::new("/s/agent_state.ron"));
        assert_eq!(lines[0], "paired:         no");
        assert_eq!(lines[3], "monitor window: -");
        assert_eq!(lines[4], "polling:        off");
    }

    #[test]
    fn status_of_a_paired_agent() {
        let state = AgentState {
            device_token: PairingToken::new("tok"),
            device_name: Some("Front desk".to_string()),
            portal_url: Some("https://portal.example".to_string()),
            monitor_window: Some(WindowHandle {
                window_id: 42,
                browser_context_id: "ctx".to_string(),
            }),
            polling_enabled: true,
        };
        let lines = status_lines(&state, Path::new("/s/agent_state.ron"));
        assert_eq!(lines[0], "paired:         yes");
        assert_eq!(lines[1], "device name:    Front desk");
        assert_eq!(lines[3], "monitor window: 42");
        assert!(lines.iter().all(|line| !line.contains("tok")));
    }

    #[test]
    fn unpair_keeps_window_and_polling_flag() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.store
            .update(|state| {
                state.device_token = PairingToken::new("tok");
                state.portal_url = Some("https://portal.example".to_string());
                state.polling_enabled = true;
                state.monitor_window = Some(WindowHandle {
                    window_id: 1,
                    browser_context_id: "ctx".to_string(),
                });
            })
            .unwrap();

        unpair(&ctx).unwrap();

        let state = ctx.store.load().unwrap();
        assert!(!state.is_paired());
        assert_eq!(state.portal_url, None);
        assert!(state.polling_enabled);
        assert!(state.monitor_window.is_some());
    }

    #[test]
    fn polling_toggle_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        set_polling(&ctx, true).unwrap();
        assert!(ctx.store.load().unwrap().polling_enabled);
        set_polling(&ctx, false).unwrap();
        assert!(!ctx.store.load().unwrap().polling_enabled);
    }

    #[tokio::test]
    async fn invalid_pairing_code_is_rejected_before_any_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.api_base_override = Some("http://127.0.0.1:9/api/extension".to_string());
        let args = PairArgs {
            code: "12".to_string(),
            device_name: "Front desk".to_string(),
            portal_url: "https://portal.example".to_string(),
        };

        let err = pair(&ctx, &args).await.unwrap_err();

        assert!(err.to_string().contains("pairing code"), "{err}");
        assert!(!ctx.store.load().unwrap().is_paired());
    }
}
