use std::{
    fmt::Write,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    gradings_started_total: AtomicU64,
    gradings_completed_total: AtomicU64,
    gradings_ungraded_total: AtomicU64,
    grading_failures: DashMap<&'static str, AtomicU64>,
    executions_submitted_total: AtomicU64,
    poll_iterations_total: AtomicU64,
    attempts_recorded_total: AtomicU64,
    attempts_rejected_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grading_started(&self) {
        self.gradings_started_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn grading_completed(&self, graded: bool) {
        self.gradings_completed_total.fetch_add(1, Ordering::Relaxed);
        if !graded {
            self.gradings_ungraded_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `reason` is the error code of the failure.
    pub fn grading_failed(&self, reason: &'static str) {
        self.grading_failures
            .entry(reason)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn execution_submitted(&self) {
        self.executions_submitted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn poll_iteration(&self) {
        self.poll_iterations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_recorded(&self) {
        self.attempts_recorded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempt_rejected(&self) {
        self.attempts_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_prometheus(&self) -> String {
        let mut out = format!(
            concat!(
                "# TYPE grading_started_total counter\n",
                "grading_started_total {}\n",
                "# TYPE grading_completed_total counter\n",
                "grading_completed_total {}\n",
                "# TYPE grading_ungraded_total counter\n",
                "grading_ungraded_total {}\n",
                "# TYPE execution_submitted_total counter\n",
                "execution_submitted_total {}\n",
                "# TYPE execution_poll_iterations_total counter\n",
                "execution_poll_iterations_total {}\n",
                "# TYPE attempts_recorded_total counter\n",
                "attempts_recorded_total {}\n",
                "# TYPE attempts_rejected_total counter\n",
                "attempts_rejected_total {}\n",
                "# TYPE grading_failed_total counter\n",
            ),
            self.gradings_started_total.load(Ordering::Relaxed),
            self.gradings_completed_total.load(Ordering::Relaxed),
            self.gradings_ungraded_total.load(Ordering::Relaxed),
            self.executions_submitted_total.load(Ordering::Relaxed),
            self.poll_iterations_total.load(Ordering::Relaxed),
            self.attempts_recorded_total.load(Ordering::Relaxed),
            self.attempts_rejected_total.load(Ordering::Relaxed),
        );

        let mut failures = self
            .grading_failures
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect::<Vec<_>>();
        failures.sort_unstable();
        for (reason, count) in failures {
            let _ = writeln!(out, "grading_failed_total{{reason=\"{reason}\"}} {count}");
        }
        out
    }
}
