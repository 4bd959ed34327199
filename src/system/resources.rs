//! Live resource probing
//!
//! A [`ResourceProbe`] reads the memory and CPU counters the capacity
//! planner needs. Probes never fail: when the counters cannot be read they
//! return [`ResourceSnapshot::unavailable`], which the planner treats as
//! "no information" rather than "no resources".

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Memory and CPU counters captured at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Free memory in bytes
    pub free_memory: u64,
    /// Reclaimable buffer memory in bytes
    pub buffer_memory: u64,
    /// Reclaimable page cache in bytes
    pub cache_memory: u64,
    /// Logical processor count (0 when unknown)
    pub processor_count: usize,
}

impl ResourceSnapshot {
    /// Snapshot returned when the OS counters cannot be read
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Memory that can be handed to new jobs: free plus reclaimable
    pub fn available_memory(&self) -> u64 {
        self.free_memory
            .saturating_add(self.buffer_memory)
            .saturating_add(self.cache_memory)
    }

    /// True when the probe could not read anything
    pub fn is_unavailable(&self) -> bool {
        self.available_memory() == 0 && self.processor_count == 0
    }

    /// Print snapshot to console
    pub fn print_summary(&self) {
        println!("=== Resources ===");
        println!("  Free:       {}", humansize::format_size(self.free_memory, humansize::BINARY));
        println!("  Buffers:    {}", humansize::format_size(self.buffer_memory, humansize::BINARY));
        println!("  Cached:     {}", humansize::format_size(self.cache_memory, humansize::BINARY));
        println!("  Processors: {}", self.processor_count);
    }
}

/// Source of resource snapshots
pub trait ResourceProbe: Send + Sync {
    /// Read the counters now. Never cached between calls.
    fn snapshot(&self) -> ResourceSnapshot;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Reads `/proc/meminfo` and `/proc/cpuinfo`
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsProbe;

#[cfg(target_os = "linux")]
impl ResourceProbe for ProcfsProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        use procfs::{CpuInfo, Current, Meminfo};

        let (free_memory, buffer_memory, cache_memory) = match Meminfo::current() {
            Ok(meminfo) => (meminfo.mem_free, meminfo.buffers, meminfo.cached),
            Err(e) => {
                tracing::debug!("meminfo unreadable: {}", e);
                (0, 0, 0)
            }
        };

        let processor_count = match CpuInfo::current() {
            Ok(cpuinfo) => cpuinfo.num_cores(),
            Err(e) => {
                tracing::debug!("cpuinfo unreadable: {}", e);
                0
            }
        };

        ResourceSnapshot {
            free_memory,
            buffer_memory,
            cache_memory,
            processor_count,
        }
    }

    fn name(&self) -> &'static str {
        "procfs"
    }
}

/// Portable probe built on sysinfo.
///
/// sysinfo does not split buffers from page cache, so everything the OS
/// reports as available beyond free memory lands in `cache_memory`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoProbe;

impl ResourceProbe for SysinfoProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        let mut sys = System::new();
        sys.refresh_memory();

        let free_memory = sys.free_memory();
        let cache_memory = sys.available_memory().saturating_sub(free_memory);

        ResourceSnapshot {
            free_memory,
            buffer_memory: 0,
            cache_memory,
            processor_count: num_cpus::get(),
        }
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}

/// Probe that always reports the same snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub ResourceSnapshot);

impl ResourceProbe for FixedProbe {
    fn snapshot(&self) -> ResourceSnapshot {
        self.0
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Pick the best probe for this platform
pub fn default_probe() -> Box<dyn ResourceProbe> {
    #[cfg(target_os = "linux")]
    {
        if std::path::Path::new("/proc/meminfo").exists() {
            return Box::new(ProcfsProbe);
        }
    }
    Box::new(SysinfoProbe)
}
