//! Agent lifecycle control.
//!
//! Registration is guarded by a script validation fetch: a misconfigured
//! deployment that serves an HTML error page where the agent script should
//! be must not be registered, and HTTP status alone does not catch that
//! (single-page-app fallbacks serve the error page with 200). The check is
//! on the response content type.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{header, Client};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::host::HostCapabilities;

use super::registration::{AgentCommand, AgentLink, AgentRegistration, Subscription};

/// True for the content types an agent script may legitimately carry.
pub fn is_agent_script_content_type(content_type: &str) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    matches!(
        ct.as_str(),
        "application/javascript"
            | "text/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript"
    )
}

/// Clone is cheap: the HTTP client and link both share their internals.
#[derive(Clone)]
pub struct AgentController {
    link: AgentLink,
    client: Client,
    script_url: String,
    has_agent: bool,
    has_network: bool,
}

impl AgentController {
    pub fn new(config: &ManagerConfig, caps: &HostCapabilities, link: AgentLink) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build agent controller client")?;

        Ok(Self {
            link,
            client,
            script_url: config.agent_script_url(),
            has_agent: caps.has_background_agent,
            has_network: caps.has_network,
        })
    }

    /// Fetch the agent script and verify it really is a script.
    pub async fn validate_agent_script(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.script_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch agent script {}", self.script_url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("agent script fetch returned {}", status);
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !is_agent_script_content_type(&content_type) {
            bail!(
                "agent script served as {:?}, refusing to register",
                content_type
            );
        }

        Ok(())
    }

    /// Validate the script, then command registration.
    ///
    /// Hosts without an agent degrade to `Ok(false)`; a failed validation
    /// is a real error the caller should log.
    pub async fn register(&self) -> Result<bool> {
        if !self.has_agent {
            debug!("no background agent capability, skipping registration");
            return Ok(false);
        }
        if self.has_network {
            self.validate_agent_script().await?;
        }
        self.link.send(AgentCommand::Register);
        info!(script = %self.script_url, "agent registration requested");
        Ok(true)
    }

    pub fn registration(&self) -> AgentRegistration {
        self.link.registration()
    }

    /// Waiting or installing slot occupied.
    pub fn has_update_pending(&self) -> bool {
        self.link.registration().has_update_pending()
    }

    /// Ask the agent to revalidate its script against the origin.
    /// Skipped while an install is already in flight or the host is
    /// offline.
    pub fn request_update_check(&self) -> bool {
        if !self.has_agent {
            return false;
        }
        let registration = self.link.registration();
        if registration.installing {
            debug!("skipping update check, install already in flight");
            return false;
        }
        if !self.has_network {
            debug!("skipping update check, no network");
            return false;
        }
        self.link.send(AgentCommand::CheckForUpdate)
    }

    /// Instruct the waiting version to activate. Sent only after a
    /// confirmed or countdown-expired refresh decision.
    pub fn skip_waiting(&self) {
        if !self.has_agent {
            return;
        }
        self.link.send(AgentCommand::SkipWaiting);
    }

    pub fn subscribe(&self) -> Subscription {
        self.link.subscribe()
    }

    /// Periodically request revalidation. The host's own update checks are
    /// tied to navigations, which a long-lived session may never perform.
    pub fn start_update_polling(&self, interval: Duration) -> AgentPollHandle {
        if !self.has_agent {
            return AgentPollHandle { task: None };
        }

        info!(interval_secs = interval.as_secs(), "starting agent update polling");
        let controller = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick; registration just happened.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !controller.request_update_check() {
                    debug!("agent update check skipped this cycle");
                }
            }
        });
        AgentPollHandle { task: Some(task) }
    }
}

/// Cancellation handle for the revalidation polling task.
pub struct AgentPollHandle {
    task: Option<JoinHandle<()>>,
}

impl AgentPollHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping agent update polling");
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for AgentPollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
