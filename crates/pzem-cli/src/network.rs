use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use pzem_core::{LinkError, TransportLink};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub interface: String,
    pub associate_timeout: Duration,
    pub poll_step: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            associate_timeout: Duration::from_secs(30),
            poll_step: Duration::from_millis(500),
        }
    }
}

/// Tracks a host network interface through sysfs; association itself is left
/// to the system's network manager.
pub struct InterfaceLink {
    config: LinkConfig,
    sys_net: PathBuf,
    proc_wireless: PathBuf,
}

impl InterfaceLink {
    pub fn new(config: LinkConfig) -> Self {
        Self::with_roots(config, "/sys/class/net", "/proc/net/wireless")
    }

    pub fn with_roots(
        config: LinkConfig,
        sys_net: impl Into<PathBuf>,
        proc_wireless: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            sys_net: sys_net.into(),
            proc_wireless: proc_wireless.into(),
        }
    }

    fn interface_dir(&self) -> PathBuf {
        self.sys_net.join(&self.config.interface)
    }

    /// `Ok(None)` while the interface does not exist.
    fn read_operstate(&self) -> Result<Option<String>, LinkError> {
        match fs::read_to_string(self.interface_dir().join("operstate")) {
            Ok(state) => Ok(Some(state.trim().to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LinkError::Io(format!(
                "failed to read operstate of {}: {err}",
                self.config.interface
            ))),
        }
    }
}

/// Signal level in dBm for `interface` from a `/proc/net/wireless` table.
pub fn parse_wireless_level(table: &str, interface: &str) -> Option<i32> {
    table.lines().skip(2).find_map(|line| {
        let (name, rest) = line.trim_start().split_once(':')?;
        if name != interface {
            return None;
        }
        let level = rest.split_whitespace().nth(2)?;
        let value: f64 = level.trim_end_matches('.').parse().ok()?;
        Some(value as i32)
    })
}

#[async_trait]
impl TransportLink for InterfaceLink {
    fn is_connected(&self) -> bool {
        matches!(self.read_operstate(), Ok(Some(state)) if state == "up")
    }

    async fn associate(&mut self) -> Result<(), LinkError> {
        info!(interface = %self.config.interface, "waiting for association");
        let deadline = Instant::now() + self.config.associate_timeout;
        loop {
            let state = self.read_operstate()?;
            if state.as_deref() == Some("up") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return match state {
                    None => Err(LinkError::NoInterface(self.config.interface.clone())),
                    Some(_) => Err(LinkError::Timeout),
                };
            }
            debug!(?state, "link not up yet");
            sleep(self.config.poll_step).await;
        }
    }

    fn signal_strength(&self) -> Option<i32> {
        let table = fs::read_to_string(&self.proc_wireless).ok()?;
        parse_wireless_level(&table, &self.config.interface)
    }
}

/// Used when the host's connectivity is not ours to watch.
pub struct StaticLink;

#[async_trait]
impl TransportLink for StaticLink {
    fn is_connected(&self) -> bool {
        true
    }

    async fn associate(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn signal_strength(&self) -> Option<i32> {
        None
    }
}

pub enum HostLink {
    Interface(InterfaceLink),
    Static(StaticLink),
}

#[async_trait]
impl TransportLink for HostLink {
    fn is_connected(&self) -> bool {
        match self {
            HostLink::Interface(link) => link.is_connected(),
            HostLink::Static(link) => link.is_connected(),
        }
    }

    async fn associate(&mut self) -> Result<(), LinkError> {
        match self {
            HostLink::Interface(link) => link.associate().await,
            HostLink::Static(link) => link.associate().await,
        }
    }

    fn signal_strength(&self) -> Option<i32> {
        match self {
            HostLink::Interface(link) => link.signal_strength(),
            HostLink::Static(link) => link.signal_strength(),
        }
    }
}
