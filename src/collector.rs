//! The periodic collection loop.
//!
//! Every cycle asks the discovery source for the current sandboxes, resolves
//! each of them to its cgroup directory, reads every catalog metric from there
//! and publishes the values into the sinks. Failures stay local: a failed
//! discovery skips the cycle, a failed resolution skips the sandbox and a
//! failed read skips the metric.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::catalog::MetricSpec;
use crate::cgroup::Resolver;
use crate::discovery::{Discovery, DiscoveryError};
use crate::sandbox::Sandbox;
use crate::sink::MetricSink;

/// Default bound on a single discovery call.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome counters of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct sandboxes processed.
    pub sandboxes: usize,
    pub resolved: usize,
    pub unresolved: usize,
    /// Values accepted by the sinks.
    pub published: usize,
    /// Values that could not be read or were rejected by the sinks.
    pub failed_metrics: usize,
    /// Set when shutdown interrupted the cycle between two sandboxes.
    pub stopped_early: bool,
    /// Label sets whose series were removed after going stale.
    pub forgotten: usize,
}

/// Drives collection cycles for one discovery source into one set of sinks.
///
/// Cloning is cheap, all state is shared.
pub struct Collector<D, S> {
    resolver: Resolver,
    catalog: Arc<[MetricSpec]>,
    discovery: Arc<D>,
    sinks: Arc<S>,
    discovery_timeout: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<D, S> Clone for Collector<D, S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            catalog: Arc::clone(&self.catalog),
            discovery: Arc::clone(&self.discovery),
            sinks: Arc::clone(&self.sinks),
            discovery_timeout: self.discovery_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<D, S> Collector<D, S>
where
    D: Discovery + 'static,
    S: MetricSink + 'static,
{
    pub fn new(
        resolver: Resolver,
        catalog: impl Into<Arc<[MetricSpec]>>,
        discovery: Arc<D>,
        sinks: Arc<S>,
    ) -> Self {
        Self {
            resolver,
            catalog: catalog.into(),
            discovery,
            sinks,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            shutdown: None,
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Makes [`Collector::collect`] stop between sandboxes once `shutdown` holds `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn sinks(&self) -> &Arc<S> {
        &self.sinks
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves, reads and publishes the metrics of every sandbox in `sandboxes`.
    ///
    /// Blocks on filesystem I/O. Sandboxes whose ID already appeared earlier in
    /// the list are skipped.
    pub fn collect(&self, sandboxes: &[Sandbox]) -> CycleReport {
        let mut report = CycleReport::default();
        let mut seen = HashSet::with_capacity(sandboxes.len());

        for sandbox in sandboxes {
            if self.shutdown_requested() {
                log::info!("Shutdown requested, stopping collection cycle early");
                report.stopped_early = true;
                break;
            }
            if !seen.insert(sandbox.id()) {
                log::warn!("Skipping duplicate sandbox {}", sandbox);
                continue;
            }
            report.sandboxes += 1;

            let handle = match self.resolver.resolve(sandbox.id()) {
                Ok(handle) => handle,
                Err(err) => {
                    log::warn!("Skipping sandbox {}: {}", sandbox, err);
                    report.unresolved += 1;
                    continue;
                }
            };
            report.resolved += 1;

            for spec in self.catalog.iter() {
                let value = match spec.field {
                    None => handle.read_scalar(spec.file),
                    Some(field) => handle.read_keyed_field(spec.file, field),
                };
                let value = match value {
                    Ok(value) => value,
                    Err(err) => {
                        log::warn!(
                            "Failed to read `{}` for sandbox {} (file={}, field={}): {}",
                            spec.name,
                            sandbox,
                            spec.file,
                            spec.field.unwrap_or("-"),
                            err
                        );
                        report.failed_metrics += 1;
                        continue;
                    }
                };

                match self.sinks.publish(spec, sandbox, value) {
                    Ok(()) => {
                        log::debug!("{}{{{}}} = {}", spec.name, sandbox, value);
                        report.published += 1;
                    }
                    Err(err) => {
                        log::warn!("Failed to publish value for sandbox {}: {}", sandbox, err);
                        report.failed_metrics += 1;
                    }
                }
            }
        }

        report
    }

    /// Runs one full cycle: discovery, then [`Collector::collect`] on the
    /// blocking thread pool. Once a cycle completes, series of label sets that
    /// discovery stopped reporting are aged out through
    /// [`MetricSink::forget_absent`].
    ///
    /// # Errors
    ///
    /// Returns the [`DiscoveryError`] that made the cycle skip publication,
    /// including [`DiscoveryError::Timeout`] if discovery took longer than the
    /// configured bound. Nothing has been published in that case.
    pub async fn run_cycle(&self) -> Result<CycleReport, DiscoveryError> {
        let sandboxes =
            match tokio::time::timeout(self.discovery_timeout, self.discovery.list_sandboxes())
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(DiscoveryError::Timeout(self.discovery_timeout)),
            };

        if sandboxes.is_empty() {
            log::warn!("Discovery reported no sandboxes");
            return Ok(CycleReport {
                forgotten: self.sinks.forget_absent(&sandboxes),
                ..Default::default()
            });
        }

        let collector = self.clone();
        let collected = tokio::task::spawn_blocking(move || {
            let report = collector.collect(&sandboxes);
            (report, sandboxes)
        })
        .await;
        let (mut report, sandboxes) = match collected {
            Ok(collected) => collected,
            Err(err) => {
                log::error!("Collection task failed: {}", err);
                return Ok(CycleReport::default());
            }
        };

        if !report.stopped_early {
            report.forgotten = self.sinks.forget_absent(&sandboxes);
        }
        Ok(report)
    }

    /// Starts a cycle every `interval` until `shutdown` turns `true`.
    ///
    /// A tick that fires while the previous cycle is still running is skipped
    /// and counted as a missed tick. On shutdown the in-flight cycle finishes
    /// its current sandbox before this returns.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        self.shutdown = Some(shutdown.clone());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }

            if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                self.sinks.record_missed_tick();
                log::warn!(
                    "Previous collection cycle still running after {:?}, skipping tick",
                    interval
                );
                continue;
            }

            let collector = self.clone();
            in_flight = Some(tokio::spawn(async move {
                let started = Instant::now();
                match collector.run_cycle().await {
                    Ok(report) => log::debug!(
                        "Collection cycle took {:?}: {:?}",
                        started.elapsed(),
                        report
                    ),
                    Err(err) => log::error!("Skipping collection cycle: {}", err),
                }
            }));
        }

        log::info!("Collection loop stopping");
        if let Some(handle) = in_flight {
            if let Err(err) = handle.await {
                log::error!("Collection cycle failed during shutdown: {}", err);
            }
        }
    }
}

/// Completes once `shutdown` holds `true`. Never completes if the sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::Resolver;
    use crate::sandbox::SandboxId;
    use crate::sink::MemorySinks;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MEMORY: MetricSpec = MetricSpec::gauge("mem", "", "memory.current", None);
    const CPU: MetricSpec = MetricSpec::counter("cpu", "", "cpu.stat", Some("usage_usec"));

    struct FixedDiscovery {
        sandboxes: Vec<Sandbox>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedDiscovery {
        fn new(sandboxes: Vec<Sandbox>) -> Self {
            Self {
                sandboxes,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(Vec::new())
            }
        }
    }

    impl Discovery for FixedDiscovery {
        async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.sandboxes.clone())
        }
    }

    struct FailingDiscovery;

    impl Discovery for FailingDiscovery {
        async fn list_sandboxes(&self) -> Result<Vec<Sandbox>, DiscoveryError> {
            Err(DiscoveryError::Connect {
                path: "/missing.sock".into(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }
    }

    fn sandbox(id: &str) -> Sandbox {
        Sandbox::new(SandboxId::new(id).unwrap(), id, "ns", "pod")
    }

    fn write_cgroup(host: &Path, dir: &str, memory: &str, cpu_stat: &str) {
        let path = host.join("sys/fs/cgroup").join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("memory.current"), memory).unwrap();
        std::fs::write(path.join("cpu.stat"), cpu_stat).unwrap();
    }

    fn collector<D: Discovery + 'static>(
        host: &Path,
        discovery: D,
    ) -> Collector<D, MemorySinks> {
        Collector::new(
            Resolver::new(host),
            vec![MEMORY, CPU],
            Arc::new(discovery),
            Arc::new(MemorySinks::new()),
        )
    }

    #[test]
    fn test_collect_reads_all_metrics() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(
            host.path(),
            "system.slice/docker-aaa.scope",
            "4096\n",
            "usage_usec 500\nuser_usec 300\n",
        );
        let c = collector(host.path(), FixedDiscovery::new(Vec::new()));

        let report = c.collect(&[sandbox("aaa")]);
        assert_eq!(
            report,
            CycleReport {
                sandboxes: 1,
                resolved: 1,
                published: 2,
                ..Default::default()
            }
        );
        assert_eq!(c.sinks().get("mem", &sandbox("aaa")), Some(4096));
        assert_eq!(c.sinks().get("cpu", &sandbox("aaa")), Some(500));
    }

    #[test]
    fn test_collect_isolates_failures() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "max\n", "usage_usec 500\n");
        write_cgroup(host.path(), "docker/bbb", "100\n", "user_usec 1\n");
        let c = collector(host.path(), FixedDiscovery::new(Vec::new()));

        let report = c.collect(&[sandbox("missing"), sandbox("aaa"), sandbox("bbb")]);
        assert_eq!(report.sandboxes, 3);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.published, 2);
        assert_eq!(report.failed_metrics, 2);

        assert_eq!(c.sinks().get("mem", &sandbox("aaa")), None);
        assert_eq!(c.sinks().get("cpu", &sandbox("aaa")), Some(500));
        assert_eq!(c.sinks().get("mem", &sandbox("bbb")), Some(100));
        assert_eq!(c.sinks().get("cpu", &sandbox("bbb")), None);
    }

    #[test]
    fn test_collect_skips_duplicate_ids() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "1\n", "usage_usec 2\n");
        let c = collector(host.path(), FixedDiscovery::new(Vec::new()));

        let report = c.collect(&[sandbox("aaa"), sandbox("aaa")]);
        assert_eq!(report.sandboxes, 1);
        assert_eq!(report.published, 2);
    }

    #[test]
    fn test_collect_stops_on_shutdown() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "1\n", "usage_usec 2\n");
        let (tx, rx) = watch::channel(true);
        let c = collector(host.path(), FixedDiscovery::new(Vec::new())).with_shutdown(rx);

        let report = c.collect(&[sandbox("aaa")]);
        assert!(report.stopped_early);
        assert_eq!(report.sandboxes, 0);
        assert!(c.sinks().is_empty());
        drop(tx);
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_discovered_sandboxes() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "7\n", "usage_usec 9\n");
        let c = collector(host.path(), FixedDiscovery::new(vec![sandbox("aaa")]));

        let report = c.run_cycle().await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(c.sinks().get("mem", &sandbox("aaa")), Some(7));
    }

    #[tokio::test]
    async fn test_run_cycle_discovery_failure_publishes_nothing() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "7\n", "usage_usec 9\n");
        let c = collector(host.path(), FailingDiscovery);

        let err = c.run_cycle().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Connect { .. }));
        assert!(c.sinks().is_empty());
    }

    #[tokio::test]
    async fn test_run_cycle_forgets_vanished_sandboxes() {
        let host = tempfile::tempdir().unwrap();
        write_cgroup(host.path(), "docker/aaa", "7\n", "usage_usec 9\n");
        let sinks = Arc::new(MemorySinks::new());
        sinks.publish(&MEMORY, &sandbox("gone"), 1).unwrap();
        let c = Collector::new(
            Resolver::new(host.path()),
            vec![MEMORY, CPU],
            Arc::new(FixedDiscovery::new(vec![sandbox("aaa")])),
            Arc::clone(&sinks),
        );

        for _ in 1..crate::sink::STALE_AFTER_CYCLES {
            assert_eq!(c.run_cycle().await.unwrap().forgotten, 0);
        }
        assert_eq!(sinks.get("mem", &sandbox("gone")), Some(1));

        assert_eq!(c.run_cycle().await.unwrap().forgotten, 1);
        assert_eq!(sinks.get("mem", &sandbox("gone")), None);
        assert_eq!(sinks.get("mem", &sandbox("aaa")), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cycle_discovery_timeout() {
        let host = tempfile::tempdir().unwrap();
        let c = collector(host.path(), FixedDiscovery::slow(Duration::from_secs(10)))
            .with_discovery_timeout(Duration::from_secs(1));

        let err = c.run_cycle().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_skips_ticks_while_cycle_is_running() {
        let host = tempfile::tempdir().unwrap();
        let discovery = Arc::new(FixedDiscovery::slow(Duration::from_millis(250)));
        let sinks = Arc::new(MemorySinks::new());
        let c = Collector::new(
            Resolver::new(host.path()),
            vec![MEMORY],
            Arc::clone(&discovery),
            Arc::clone(&sinks),
        );
        let (tx, rx) = watch::channel(false);

        let loop_handle = tokio::spawn(c.run(Duration::from_millis(100), rx));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tx.send(true).unwrap();
        loop_handle.await.unwrap();

        assert!(sinks.missed_ticks() >= 1);
        assert!(discovery.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_on_shutdown() {
        let host = tempfile::tempdir().unwrap();
        let c = collector(host.path(), FixedDiscovery::new(Vec::new()));
        let (tx, rx) = watch::channel(false);

        let loop_handle = tokio::spawn(c.run(Duration::from_secs(60), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), loop_handle)
            .await
            .unwrap()
            .unwrap();
    }
}
