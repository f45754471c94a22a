//! Pushes watch lists to agents
//!
//! Agents keep no state of their own: the full list of watched process and
//! container names is sent after every change and once at startup.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::storage::schema::{Host, WatchKind};
use crate::util;

#[derive(Debug, Serialize)]
struct ProcessList<'a> {
    processes: &'a [String],
}

#[derive(Debug, Serialize)]
struct ContainerList<'a> {
    containers: &'a [String],
}

#[derive(Debug, Clone)]
pub struct AgentConfigPusher {
    client: reqwest::Client,
    secret: Option<String>,
}

impl AgentConfigPusher {
    pub fn new(timeout: Duration, secret: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, secret }
    }

    /// Replace the agent's list of watched names of one kind
    #[instrument(skip(self, host, names), fields(host = %host.hostname, count = names.len()))]
    pub async fn push(&self, host: &Host, kind: WatchKind, names: &[String]) -> Result<()> {
        let request = match kind {
            WatchKind::Process => self
                .client
                .post(host.agent_url("/config/processes"))
                .json(&ProcessList { processes: names }),
            WatchKind::Container => self
                .client
                .post(host.agent_url("/config/containers"))
                .json(&ContainerList { containers: names }),
        };

        let response = util::with_secret(request, self.secret.as_deref())
            .send()
            .await
            .with_context(|| format!("failed to push {kind} list to {}", host.hostname))?;

        let status = response.status();
        if !status.is_success() {
            bail!("agent {} rejected {kind} list with {status}", host.hostname);
        }

        debug!("pushed {kind} list");
        Ok(())
    }
}
