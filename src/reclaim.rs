//! Periodic resource reclamation and memory reporting.

use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Memory figures observed during a reclamation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// System-wide available memory, KiB
    pub available_kb: u64,
    /// Resident set of this process, KiB
    pub resident_kb: Option<u64>,
}

/// Hook invoked by the scheduler's reclamation timer
pub trait Reclaimer: Send {
    fn reclaim(&mut self) -> Option<MemoryStats>;
}

/// Reports memory from procfs and warns when it runs low
#[derive(Debug)]
pub struct ProcReclaimer {
    meminfo: PathBuf,
    status: PathBuf,
    low_memory_kb: u64,
}

impl ProcReclaimer {
    pub fn new(low_memory_kb: u64) -> Self {
        Self::with_paths("/proc/meminfo", "/proc/self/status", low_memory_kb)
    }

    pub fn with_paths(
        meminfo: impl Into<PathBuf>,
        status: impl Into<PathBuf>,
        low_memory_kb: u64,
    ) -> Self {
        Self {
            meminfo: meminfo.into(),
            status: status.into(),
            low_memory_kb,
        }
    }
}

impl Reclaimer for ProcReclaimer {
    fn reclaim(&mut self) -> Option<MemoryStats> {
        let meminfo = match std::fs::read_to_string(&self.meminfo) {
            Ok(content) => content,
            Err(err) => {
                debug!("Cannot read {:?}: {}", self.meminfo, err);
                return None;
            }
        };
        let available_kb = parse_mem_available(&meminfo)?;
        let resident_kb = std::fs::read_to_string(&self.status)
            .ok()
            .and_then(|status| parse_vm_rss(&status));

        let stats = MemoryStats {
            available_kb,
            resident_kb,
        };
        if available_kb < self.low_memory_kb {
            warn!("Low memory warning: {} KiB available", available_kb);
        } else {
            info!(
                "Memory: {} KiB available, {} KiB resident",
                available_kb,
                resident_kb.map_or_else(|| "?".to_string(), |kb| kb.to_string())
            );
        }
        Some(stats)
    }
}

/// Value of a `Key:   1234 kB` line, as found in /proc/meminfo and
/// /proc/<pid>/status
fn parse_kb_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

/// `MemAvailable` from /proc/meminfo, KiB
pub fn parse_mem_available(meminfo: &str) -> Option<u64> {
    parse_kb_field(meminfo, "MemAvailable")
}

/// `VmRSS` from /proc/self/status, KiB regardless of the kernel page size
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    parse_kb_field(status, "VmRSS")
}
