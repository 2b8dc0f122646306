//! The metric catalog: which cgroup v2 values are exported and how.
//!
//! See <https://docs.kernel.org/admin-guide/cgroup-v2.html> for the meaning of
//! the individual files and fields.

use std::fmt;

/// Whether a value is a point-in-time reading or a cumulative total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Current state that can rise or fall, e.g. `memory.current`.
    Gauge,
    /// Total that the kernel accumulates since cgroup creation, e.g. `cpu.stat:usage_usec`.
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Gauge => f.write_str("gauge"),
            MetricKind::Counter => f.write_str("counter"),
        }
    }
}

/// Describes one exported metric and the cgroup file it is read from.
///
/// Without a `field`, the whole file is read as a single value. With a
/// `field`, the file is read as `key value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub file: &'static str,
    pub field: Option<&'static str>,
    pub kind: MetricKind,
}

impl MetricSpec {
    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        file: &'static str,
        field: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            help,
            file,
            field,
            kind: MetricKind::Gauge,
        }
    }

    pub const fn counter(
        name: &'static str,
        help: &'static str,
        file: &'static str,
        field: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            help,
            file,
            field,
            kind: MetricKind::Counter,
        }
    }
}

/// The metrics exported by default, labelled by container, namespace and pod.
pub static DEFAULT_CATALOG: &[MetricSpec] = &[
    // memory
    MetricSpec::gauge(
        "cgroup_memory_current_bytes",
        "Total memory currently used by the cgroup and its descendants, in bytes.",
        "memory.current",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_memory_peak_bytes",
        "Maximum memory usage recorded for the cgroup and its descendants since creation or last reset.",
        "memory.peak",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_memory_low_bytes",
        "Best-effort memory protection threshold below which memory is not reclaimed.",
        "memory.low",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_memory_high_bytes",
        "Memory usage throttle limit above which processes are throttled and put under reclaim pressure.",
        "memory.high",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_memory_max_bytes",
        "Hard memory usage limit for the cgroup; exceeding this may trigger OOM killer.",
        "memory.max",
        None,
    ),
    // memory.stat
    MetricSpec::gauge(
        "cgroup_memory_stat_anon_bytes",
        "Amount of memory used in anonymous mappings such as brk(), sbrk(), and mmap(MAP_ANONYMOUS).",
        "memory.stat",
        Some("anon"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_file_bytes",
        "Amount of memory used to cache filesystem data, including tmpfs and shared memory.",
        "memory.stat",
        Some("file"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_shmem_bytes",
        "Amount of cached filesystem data that is swap-backed, such as tmpfs, shm segments, and shared anonymous mmap()s.",
        "memory.stat",
        Some("shmem"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_kernel_bytes",
        "Total kernel memory usage, including kernel_stack, pagetables, percpu, vmalloc, and slab.",
        "memory.stat",
        Some("kernel"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_slab_bytes",
        "Amount of memory used for storing in-kernel data structures.",
        "memory.stat",
        Some("slab"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_slab_reclaimable_bytes",
        "Part of slab memory that might be reclaimed, such as dentries and inodes.",
        "memory.stat",
        Some("slab_reclaimable"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_slab_unreclaimable_bytes",
        "Part of slab memory that cannot be reclaimed on memory pressure.",
        "memory.stat",
        Some("slab_unreclaimable"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_pagetables_bytes",
        "Amount of memory allocated for page tables.",
        "memory.stat",
        Some("pagetables"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_kernel_stack_bytes",
        "Amount of memory allocated to kernel stacks.",
        "memory.stat",
        Some("kernel_stack"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_active_anon_bytes",
        "Amount of active anonymous memory on the internal memory management lists.",
        "memory.stat",
        Some("active_anon"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_inactive_anon_bytes",
        "Amount of inactive anonymous memory on the internal memory management lists.",
        "memory.stat",
        Some("inactive_anon"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_active_file_bytes",
        "Amount of active file-backed memory on the internal memory management lists.",
        "memory.stat",
        Some("active_file"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_inactive_file_bytes",
        "Amount of inactive file-backed memory on the internal memory management lists.",
        "memory.stat",
        Some("inactive_file"),
    ),
    MetricSpec::gauge(
        "cgroup_memory_stat_unevictable_bytes",
        "Amount of unevictable memory.",
        "memory.stat",
        Some("unevictable"),
    ),
    MetricSpec::counter(
        "cgroup_memory_stat_pgfault_total",
        "Total number of page faults incurred by the cgroup.",
        "memory.stat",
        Some("pgfault"),
    ),
    MetricSpec::counter(
        "cgroup_memory_stat_pgmajfault_total",
        "Number of major page faults incurred by the cgroup.",
        "memory.stat",
        Some("pgmajfault"),
    ),
    // cpu.stat
    MetricSpec::counter(
        "cgroup_cpu_usage_usec",
        "Total CPU time consumed by all processes in the cgroup, in microseconds.",
        "cpu.stat",
        Some("usage_usec"),
    ),
    MetricSpec::counter(
        "cgroup_cpu_user_usec",
        "Total user mode CPU time consumed by the cgroup, in microseconds.",
        "cpu.stat",
        Some("user_usec"),
    ),
    MetricSpec::counter(
        "cgroup_cpu_system_usec",
        "Total system (kernel) mode CPU time consumed by the cgroup, in microseconds.",
        "cpu.stat",
        Some("system_usec"),
    ),
    MetricSpec::counter(
        "cgroup_cpu_nr_periods_total",
        "Number of enforcement intervals (periods) for CPU bandwidth.",
        "cpu.stat",
        Some("nr_periods"),
    ),
    MetricSpec::counter(
        "cgroup_cpu_nr_throttled_total",
        "Number of periods in which the cgroup was throttled due to CPU quota.",
        "cpu.stat",
        Some("nr_throttled"),
    ),
    MetricSpec::counter(
        "cgroup_cpu_throttled_usec_total",
        "Total time duration in microseconds that the cgroup was throttled due to CPU quota.",
        "cpu.stat",
        Some("throttled_usec"),
    ),
    // pids
    MetricSpec::gauge(
        "cgroup_pids_current",
        "Number of processes currently in the cgroup and its descendants.",
        "pids.current",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_pids_max",
        "Hard limit on the number of processes allowed in the cgroup.",
        "pids.max",
        None,
    ),
    MetricSpec::gauge(
        "cgroup_pids_peak",
        "Maximum number of processes ever present in the cgroup and its descendants.",
        "pids.peak",
        None,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_catalog_names_are_unique() {
        let names: HashSet<_> = DEFAULT_CATALOG.iter().map(|spec| spec.name).collect();
        assert_eq!(names.len(), DEFAULT_CATALOG.len());
    }

    #[test]
    fn test_default_catalog_kinds() {
        let kind_of = |name: &str| {
            DEFAULT_CATALOG
                .iter()
                .find(|spec| spec.name == name)
                .map(|spec| spec.kind)
        };
        assert_eq!(kind_of("cgroup_memory_current_bytes"), Some(MetricKind::Gauge));
        assert_eq!(kind_of("cgroup_cpu_usage_usec"), Some(MetricKind::Counter));
        assert_eq!(kind_of("cgroup_memory_stat_pgfault_total"), Some(MetricKind::Counter));
        assert_eq!(kind_of("cgroup_pids_current"), Some(MetricKind::Gauge));
    }

    #[test]
    fn test_stat_files_always_name_a_field() {
        for spec in DEFAULT_CATALOG {
            if spec.file.ends_with(".stat") {
                assert!(spec.field.is_some(), "{} has no field", spec.name);
            } else {
                assert!(spec.field.is_none(), "{} has a field", spec.name);
            }
        }
    }
}
