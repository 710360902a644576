//! Network link collaborators.
//!
//! On a Linux host the OS owns association and addressing, so "connecting"
//! the link means checking that it can come up and then watching it.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::LinkError;

/// The physical/IP link underneath the broker session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Link: Send {
    /// Start bringing the link up; completion is observed via `is_up`
    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn is_up(&mut self) -> bool;
}

/// Watches a network interface's operational state in sysfs
#[derive(Debug)]
pub struct InterfaceLink {
    interface: String,
    sysfs_root: PathBuf,
}

impl InterfaceLink {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_root(interface, "/sys/class/net")
    }

    pub fn with_root(interface: impl Into<String>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            interface: interface.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    fn interface_dir(&self) -> PathBuf {
        self.sysfs_root.join(&self.interface)
    }
}

#[async_trait]
impl Link for InterfaceLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let dir = self.interface_dir();
        if !tokio::fs::try_exists(&dir).await? {
            return Err(LinkError::Unavailable(format!(
                "interface {} does not exist",
                self.interface
            )));
        }
        info!("Waiting for interface {} to come up", self.interface);
        Ok(())
    }

    async fn is_up(&mut self) -> bool {
        match tokio::fs::read_to_string(self.interface_dir().join("operstate")).await {
            Ok(state) => state.trim() == "up",
            Err(err) => {
                debug!("Cannot read operstate of {}: {}", self.interface, err);
                false
            }
        }
    }
}

/// Considers the host online while any non-loopback interface is up.
///
/// Used when no interface is configured; broker reachability is left to
/// the transport, so a broker outage never reads as a network outage.
#[derive(Debug)]
pub struct HostLink {
    sysfs_root: PathBuf,
}

impl Default for HostLink {
    fn default() -> Self {
        Self::with_root("/sys/class/net")
    }
}

impl HostLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    async fn up_interfaces(&self) -> Result<Vec<String>, LinkError> {
        let mut entries = tokio::fs::read_dir(&self.sysfs_root).await?;
        let mut up = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            if let Ok(state) = tokio::fs::read_to_string(entry.path().join("operstate")).await {
                if state.trim() == "up" {
                    up.push(name);
                }
            }
        }
        Ok(up)
    }
}

#[async_trait]
impl Link for HostLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        if !tokio::fs::try_exists(&self.sysfs_root).await? {
            return Err(LinkError::Unavailable(format!(
                "{:?} does not exist",
                self.sysfs_root
            )));
        }
        info!("Waiting for a network interface to come up");
        Ok(())
    }

    async fn is_up(&mut self) -> bool {
        match self.up_interfaces().await {
            Ok(up) => {
                debug!("Interfaces up: {:?}", up);
                !up.is_empty()
            }
            Err(err) => {
                debug!("Cannot list interfaces in {:?}: {}", self.sysfs_root, err);
                false
            }
        }
    }
}
