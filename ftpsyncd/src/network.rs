//! Optional Wi-Fi association before the first cycle, through NetworkManager's `nmcli`.

use std::fmt;

use anyhow::{Context, bail};
use tokio::process::Command;

pub const DEFAULT_DISCOVER_PREFIX: &str = "Vespera";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ssid: Option<String>,
    pub password: Option<String>,
    /// Look for a visible network whose name contains `discover_prefix` when no SSID is set.
    pub auto_discover: bool,
    pub discover_prefix: String,
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auto_discover", &self.auto_discover)
            .field("discover_prefix", &self.discover_prefix)
            .finish()
    }
}

impl NetworkConfig {
    pub fn is_enabled(&self) -> bool {
        self.ssid.is_some() || self.auto_discover
    }
}

/// Joins the configured network, discovering it first when asked to.
/// Returns the SSID that was joined, or `None` when association is not configured.
pub async fn prepare(config: &NetworkConfig) -> anyhow::Result<Option<String>> {
    let ssid = match (&config.ssid, config.auto_discover) {
        (Some(ssid), _) => ssid.clone(),
        (None, true) => discover(&config.discover_prefix).await?,
        (None, false) => return Ok(None),
    };
    connect(&ssid, config.password.as_deref()).await?;
    Ok(Some(ssid))
}

async fn discover(prefix: &str) -> anyhow::Result<String> {
    tracing::info!(prefix, "scanning for wireless networks");
    let listing = nmcli(&["-t", "-f", "SSID", "device", "wifi", "list"]).await?;
    pick_network(&listing, prefix)
        .with_context(|| format!("no visible wireless network matches {prefix:?}"))
}

async fn connect(ssid: &str, password: Option<&str>) -> anyhow::Result<()> {
    tracing::info!(ssid, "joining wireless network");
    let mut args = vec!["device", "wifi", "connect", ssid];
    if let Some(password) = password {
        args.extend(["password", password]);
    }
    nmcli(&args)
        .await
        .with_context(|| format!("failed to join wireless network {ssid:?}"))?;
    Ok(())
}

async fn nmcli(args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("nmcli")
        .args(args)
        .output()
        .await
        .context("failed to run nmcli")?;
    if !output.status.success() {
        bail!(
            "nmcli exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// First SSID in terse `nmcli` output containing `prefix`, ignoring ASCII case.
pub fn pick_network(listing: &str, prefix: &str) -> Option<String> {
    let needle = prefix.to_ascii_lowercase();
    listing
        .lines()
        .map(unescape_terse)
        .find(|ssid| !ssid.is_empty() && ssid.to_ascii_lowercase().contains(&needle))
}

// Terse mode escapes ':' and '\' with a backslash.
fn unescape_terse(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.trim_end_matches('\r').chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            other => out.push(other),
        }
    }
    out
}
