use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A named background thread running a closure on a fixed schedule:
/// an initial delay, then once per period until stopped.
///
/// `stop()` (or dropping the task) requests shutdown and joins the
/// thread; in-flight work finishes first.
pub struct PeriodicTask {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn_periodic<F>(
    name: &str,
    initial_delay: Duration,
    period: Duration,
    task: F,
) -> PeriodicTask
where
    F: Fn() + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let thread_name = name.to_owned();

    let handle = std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            if interruptible_sleep(initial_delay, &stop_flag) {
                return;
            }
            loop {
                task();
                if interruptible_sleep(period, &stop_flag) {
                    return;
                }
            }
        })
        .unwrap_or_else(|e| panic!("could not spawn {} thread: {}", thread_name, e));

    PeriodicTask {
        name: name.to_owned(),
        stop,
        handle: Some(handle),
    }
}

/// Sleeps for `duration`, waking early if the stop flag is raised.
/// Returns true when shutdown was requested.
fn interruptible_sleep(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

impl PeriodicTask {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            info!("stopping {} thread", self.name);
            if handle.join().is_err() {
                warn!("{} thread panicked before shutdown", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
