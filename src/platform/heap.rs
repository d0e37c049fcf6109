use std::path::PathBuf;

/// Raw heap report in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapUsage {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

/// Optional heap-introspection capability. `None` means the host does not
/// expose one right now; that is an expected outcome, not an error.
pub trait HeapIntrospector: Send + Sync {
    fn heap_usage(&self) -> Option<HeapUsage>;
}

/// Host without heap introspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHeap;

impl HeapIntrospector for NoHeap {
    fn heap_usage(&self) -> Option<HeapUsage> {
        None
    }
}

/// Linux procfs reader: resident set size against total physical memory.
#[derive(Debug, Clone)]
pub struct ProcfsHeap {
    status_path: PathBuf,
    meminfo_path: PathBuf,
}

impl Default for ProcfsHeap {
    fn default() -> Self {
        Self::with_paths("/proc/self/status", "/proc/meminfo")
    }
}

impl ProcfsHeap {
    pub fn with_paths(status: impl Into<PathBuf>, meminfo: impl Into<PathBuf>) -> Self {
        Self {
            status_path: status.into(),
            meminfo_path: meminfo.into(),
        }
    }
}

impl HeapIntrospector for ProcfsHeap {
    fn heap_usage(&self) -> Option<HeapUsage> {
        let status = std::fs::read_to_string(&self.status_path).ok()?;
        let meminfo = std::fs::read_to_string(&self.meminfo_path).ok()?;

        let used_bytes = kib_field(&status, "VmRSS:")? * 1024;
        let total_bytes = kib_field(&meminfo, "MemTotal:")? * 1024;

        Some(HeapUsage {
            used_bytes,
            limit_bytes: total_bytes.max(used_bytes),
        })
    }
}

// Lines look like "VmRSS:\t   12345 kB".
fn kib_field(contents: &str, key: &str) -> Option<u64> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}
