use crate::model::RefreshTask;
use crate::progress::SyncReporter;
use crate::server::MediaServer;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive idle observations needed before the queue counts as settled.
pub const REQUIRED_IDLE_POLLS: usize = 3;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Blocks until the server's scan/refresh tasks have been quiet for
/// `REQUIRED_IDLE_POLLS` polls in a row.
pub struct TaskCompletionPoller<'a> {
    server: &'a dyn MediaServer,
    sleeper: &'a dyn Sleeper,
    reporter: &'a dyn SyncReporter,
    task_pattern: Regex,
}

impl<'a> TaskCompletionPoller<'a> {
    pub fn new(
        server: &'a dyn MediaServer,
        sleeper: &'a dyn Sleeper,
        reporter: &'a dyn SyncReporter,
        task_pattern: Regex,
    ) -> Self {
        Self {
            server,
            sleeper,
            reporter,
            task_pattern,
        }
    }

    /// Number of monitored tasks currently running or cancelling.
    pub fn active_tasks(&self, tasks: &[RefreshTask]) -> usize {
        tasks
            .iter()
            .filter(|task| self.task_pattern.is_match(&task.name))
            .filter(|task| task.state.is_active())
            .count()
    }

    /// Returns `false` if `max_wait` passes first. Time is counted in poll
    /// intervals, so a slow server does not shorten the number of polls.
    pub fn wait(&self, label: &str, interval: Duration, max_wait: Duration, grace: Duration) -> bool {
        let started = Instant::now();
        let mut elapsed = Duration::ZERO;
        let mut idle_streak = 0usize;

        info!(
            "Waiting for {} to finish (up to {}s)...",
            label,
            max_wait.as_secs()
        );
        self.reporter.on_wait_start(label);

        while elapsed < max_wait {
            match self.server.list_tasks() {
                Ok(tasks) => {
                    let active = self.active_tasks(&tasks);
                    if active == 0 {
                        idle_streak += 1;
                        debug!(
                            "Task queue idle ({}/{})",
                            idle_streak, REQUIRED_IDLE_POLLS
                        );
                    } else {
                        idle_streak = 0;
                        debug!("{} refresh tasks still running", active);
                    }
                    self.reporter
                        .on_wait_progress(idle_streak, REQUIRED_IDLE_POLLS, active);
                }
                Err(err) => {
                    idle_streak = 0;
                    warn!("Could not read the task queue: {}", err);
                    self.reporter
                        .on_wait_progress(idle_streak, REQUIRED_IDLE_POLLS, 0);
                }
            }

            if idle_streak >= REQUIRED_IDLE_POLLS {
                info!(
                    "{} finished; waiting {}s more for files to settle",
                    label,
                    grace.as_secs()
                );
                self.sleeper.sleep(grace);
                self.reporter
                    .on_wait_complete(true, started.elapsed().as_secs_f64());
                return true;
            }

            self.sleeper.sleep(interval);
            elapsed += interval;
        }

        warn!(
            "Timed out after {}s waiting for {}; it may still be running",
            max_wait.as_secs(),
            label
        );
        self.reporter
            .on_wait_complete(false, started.elapsed().as_secs_f64());
        false
    }
}
