//! In-sandbox artifact sync daemon.
//!
//! A background thread runs a [`SyncPlan`] pass every interval. Shutdown
//! stops the timer, waits for an in-flight pass, and always performs one
//! final synchronous pass, whether or not the timer ever fired. Every pass
//! holds `pass_lock`, so two passes never write a sink at the same time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::artifacts::{SyncPlan, SyncReport};

struct Shared {
    plan: SyncPlan,
    pass_lock: Mutex<()>,
    stopping: Mutex<bool>,
    wake: Condvar,
    passes: AtomicUsize,
    #[cfg(test)]
    in_flight: AtomicUsize,
    #[cfg(test)]
    peak_in_flight: AtomicUsize,
}

impl Shared {
    fn pass(&self) -> SyncReport {
        let _guard = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        #[cfg(test)]
        {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        }
        let report = self.plan.run_pass();
        #[cfg(test)]
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.passes.fetch_add(1, Ordering::SeqCst);
        report
    }

    fn request_stop(&self) {
        let mut stopping = self.stopping.lock().unwrap_or_else(PoisonError::into_inner);
        *stopping = true;
        self.wake.notify_all();
    }

    /// Sleep until the next tick; false once a stop was requested.
    fn wait_tick(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut stopping = self.stopping.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *stopping {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            stopping = self
                .wake
                .wait_timeout(stopping, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Running daemon. Dropping it performs the shutdown sequence.
pub struct SyncDaemon {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl SyncDaemon {
    pub fn start(plan: SyncPlan, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            plan,
            pass_lock: Mutex::new(()),
            stopping: Mutex::new(false),
            wake: Condvar::new(),
            passes: AtomicUsize::new(0),
            #[cfg(test)]
            in_flight: AtomicUsize::new(0),
            #[cfg(test)]
            peak_in_flight: AtomicUsize::new(0),
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("artifact-sync".into())
            .spawn(move || {
                while worker.wait_tick(interval) {
                    let report = worker.pass();
                    tracing::debug!(copied = report.copied(), "periodic artifact sync");
                }
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                // Still useful without a timer: the final pass runs on shutdown.
                tracing::warn!(error = %e, "could not start sync thread; only the final sync will run");
                None
            }
        };
        tracing::info!(interval_sec = interval.as_secs(), sinks = shared.plan.sinks().len(), "artifact sync daemon started");
        Self { shared, handle, finished: false }
    }

    /// Completed passes so far.
    pub fn passes(&self) -> usize {
        self.shared.passes.load(Ordering::SeqCst)
    }

    /// Stop the timer, wait for any in-flight pass, run the final pass.
    pub fn shutdown(mut self) -> SyncReport {
        self.finish()
    }

    fn finish(&mut self) -> SyncReport {
        self.finished = true;
        self.shared.request_stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("sync thread panicked");
        }
        let report = self.shared.pass();
        tracing::info!(copied = report.copied(), clean = report.is_clean(), "final artifact sync");
        report
    }
}

impl Drop for SyncDaemon {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn plan(root: &Path) -> SyncPlan {
        SyncPlan::new(&root.join("app"), vec![root.join("agent"), root.join("verifier")])
    }

    #[test]
    fn final_sync_runs_even_if_timer_never_fired() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        let daemon = SyncDaemon::start(plan(dir.path()), Duration::from_secs(3600));
        fs::write(dir.path().join("app/review.json"), "{}").unwrap();

        let report = daemon.shutdown();
        assert!(report.is_clean());
        assert!(dir.path().join("agent/review.json").is_file());
        assert!(dir.path().join("verifier/review.json").is_file());
    }

    #[test]
    fn timer_runs_periodic_passes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app/figures")).unwrap();
        fs::write(dir.path().join("app/figures/a.png"), b"x").unwrap();
        let daemon = SyncDaemon::start(plan(dir.path()), Duration::from_millis(20));

        let deadline = Instant::now() + Duration::from_secs(5);
        while daemon.passes() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(daemon.passes() >= 2);
        assert!(dir.path().join("agent/figures/a.png").is_file());
        let before = daemon.passes();
        let _ = daemon.shutdown();
        assert!(dir.path().join("verifier/figures/a.png").is_file());
        assert!(before >= 2);
    }

    #[test]
    fn drop_performs_final_sync() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        {
            let _daemon = SyncDaemon::start(plan(dir.path()), Duration::from_secs(3600));
            fs::write(dir.path().join("app/requirements.txt"), "torch\n").unwrap();
        }
        assert!(dir.path().join("agent/requirements.txt").is_file());
    }

    #[test]
    fn passes_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        crate::artifacts::testutil::write_workspace(&dir.path().join("app"));
        let daemon = SyncDaemon::start(plan(dir.path()), Duration::from_millis(1));
        let shared = Arc::clone(&daemon.shared);

        let deadline = Instant::now() + Duration::from_secs(5);
        while daemon.passes() < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        // Shutdown lands while the timer is likely mid-pass.
        let report = daemon.shutdown();
        assert!(report.is_clean());
        assert!(shared.passes.load(Ordering::SeqCst) >= 5);
        assert_eq!(shared.peak_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(shared.in_flight.load(Ordering::SeqCst), 0);
        let bundle = crate::artifacts::ArtifactBundle::inspect(
            &dir.path().join("agent"),
            crate::artifacts::Layout::Sink,
        );
        assert!(bundle.has(crate::artifacts::Category::Paper));
    }
}
