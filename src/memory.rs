//! Resident memory tracking for the running frame.
//!
//! A frame runs for weeks on small boards, so the slideshow samples its own
//! process after every photo change and at shutdown. Growth is measured
//! against the first sample.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info};

/// One memory sample, all values in KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub current_kb: u64,
    pub virtual_kb: u64,
    pub peak_kb: u64,
    /// Resident growth since the first sample; never negative.
    pub growth_kb: u64,
}

/// Initial and peak resident size, updated by each sample.
#[derive(Debug, Clone, Copy)]
pub struct MemoryBaseline {
    initial_kb: u64,
    peak_kb: u64,
}

impl MemoryBaseline {
    pub fn new(initial_kb: u64) -> Self {
        Self {
            initial_kb,
            peak_kb: initial_kb,
        }
    }

    pub fn record(&mut self, current_kb: u64, virtual_kb: u64) -> MemoryStats {
        self.peak_kb = self.peak_kb.max(current_kb);
        MemoryStats {
            current_kb,
            virtual_kb,
            peak_kb: self.peak_kb,
            growth_kb: current_kb.saturating_sub(self.initial_kb),
        }
    }
}

pub struct MemoryMonitor {
    system: System,
    pid: Pid,
    baseline: MemoryBaseline,
}

impl MemoryMonitor {
    /// Take the initial sample of this process.
    pub fn new() -> Self {
        let pid = Pid::from_u32(std::process::id());
        let mut system = System::new();
        let (initial_kb, _) = sample(&mut system, pid);
        info!(initial = %format_kb(initial_kb), "memory monitor started");
        Self {
            system,
            pid,
            baseline: MemoryBaseline::new(initial_kb),
        }
    }

    pub fn check(&mut self) -> MemoryStats {
        let (current_kb, virtual_kb) = sample(&mut self.system, self.pid);
        let stats = self.baseline.record(current_kb, virtual_kb);
        debug!(
            current = %format_kb(stats.current_kb),
            virtual_size = %format_kb(stats.virtual_kb),
            peak = %format_kb(stats.peak_kb),
            growth = %format_kb(stats.growth_kb),
            "memory sampled"
        );
        stats
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// (resident, virtual) in KiB; zeros when the process cannot be read
fn sample(system: &mut System, pid: Pid) -> (u64, u64) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
    system
        .process(pid)
        .map(|p| (p.memory() / 1024, p.virtual_memory() / 1024))
        .unwrap_or((0, 0))
}

/// `512 KB`, `1.5 MB`, `2.00 GB`.
pub fn format_kb(kb: u64) -> String {
    if kb >= 1024 * 1024 {
        format!("{:.2} GB", kb as f64 / (1024.0 * 1024.0))
    } else if kb >= 1024 {
        format!("{:.1} MB", kb as f64 / 1024.0)
    } else {
        format!("{kb} KB")
    }
}
