//! Per-participant phase timings.
//!
//! A [`BenchmarkRecorder`] is shared by the phases of one participant; each
//! phase holds a [`StepTimer`] that records into it when stopped or dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A timer that tracks the duration of one step.
#[derive(Debug)]
pub struct StepTimer {
    name: String,
    start: Instant,
    recorder: Arc<Mutex<BenchmarkRecorder>>,
    stopped: bool,
}

impl StepTimer {
    pub fn new(name: impl Into<String>, recorder: Arc<Mutex<BenchmarkRecorder>>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            recorder,
            stopped: false,
        }
    }

    /// Stop the timer and record the duration.
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.record(elapsed);
        elapsed
    }

    fn record(&mut self, elapsed: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Ok(mut rec) = self.recorder.lock() {
            rec.record_step(&self.name, elapsed);
        }
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        // A step abandoned by an early return still shows up in the report.
        let elapsed = self.start.elapsed();
        self.record(elapsed);
    }
}

/// Records step timings for one participant's run.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRecorder {
    /// Suite being driven.
    pub protocol: String,
    pub participant: String,
    /// Run identifier shared by every participant.
    pub run_id: String,
    pub steps: HashMap<String, StepTiming>,
    pub total_duration: Option<Duration>,
    start_time: Option<Instant>,
}

/// Timing information for a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub name: String,
    pub duration_ms: f64,
    /// Order in which this step was recorded.
    pub order: usize,
}

impl BenchmarkRecorder {
    pub fn new(
        protocol: impl Into<String>,
        participant: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            participant: participant.into(),
            run_id: run_id.into(),
            steps: HashMap::new(),
            total_duration: None,
            start_time: Some(Instant::now()),
        }
    }

    /// Record a step timing. A repeated name keeps its original order.
    pub fn record_step(&mut self, name: &str, duration: Duration) {
        let order = self
            .steps
            .get(name)
            .map(|s| s.order)
            .unwrap_or(self.steps.len());
        self.steps.insert(
            name.to_string(),
            StepTiming {
                name: name.to_string(),
                duration_ms: duration.as_secs_f64() * 1000.0,
                order,
            },
        );
    }

    /// Mark the run as complete and record total duration.
    pub fn complete(&mut self) {
        if let Some(start) = self.start_time {
            self.total_duration = Some(start.elapsed());
        }
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.total_duration
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn report(&self) -> BenchmarkReport {
        let mut steps: Vec<StepTiming> = self.steps.values().cloned().collect();
        steps.sort_by_key(|s| s.order);

        BenchmarkReport {
            protocol: self.protocol.clone(),
            participant: self.participant.clone(),
            run_id: self.run_id.clone(),
            steps,
            total_duration_ms: self.total_duration_ms(),
        }
    }
}

/// Step timings of one participant, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub protocol: String,
    pub participant: String,
    pub run_id: String,
    pub steps: Vec<StepTiming>,
    pub total_duration_ms: f64,
}

impl BenchmarkReport {
    pub fn step(&self, name: &str) -> Option<&StepTiming> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Print the report to the log.
    pub fn log(&self) {
        tracing::info!("========================================");
        tracing::info!("  PHASE TIMINGS: {} ({})", self.participant, self.protocol);
        tracing::info!("========================================");
        for step in &self.steps {
            tracing::info!("  {:24} {:>10.2} ms", step.name, step.duration_ms);
        }
        tracing::info!("----------------------------------------");
        tracing::info!("  {:24} {:>10.2} ms", "TOTAL", self.total_duration_ms);
    }

    /// One line per step with its share of the total.
    pub fn to_compact_string(&self) -> String {
        let mut s = format!(
            "{} ({}) - Total: {:.2}ms\n",
            self.participant, self.protocol, self.total_duration_ms
        );

        for step in &self.steps {
            let pct = if self.total_duration_ms > 0.0 {
                (step.duration_ms / self.total_duration_ms) * 100.0
            } else {
                0.0
            };
            s.push_str(&format!(
                "  {:24} {:>8.2}ms ({:>5.1}%)\n",
                step.name, step.duration_ms, pct
            ));
        }

        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_recorder_orders_steps() {
        let mut recorder = BenchmarkRecorder::new("suite", "a1", "run-1");

        recorder.record_step("liveness", Duration::from_millis(10));
        recorder.record_step("keygen", Duration::from_millis(200));
        recorder.record_step("refresh", Duration::from_millis(50));
        recorder.complete();

        let report = recorder.report();
        let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["liveness", "keygen", "refresh"]);
        assert!(report.step("keygen").unwrap().duration_ms >= 200.0);
    }

    #[test]
    fn test_step_timer_records_once() {
        let recorder = Arc::new(Mutex::new(BenchmarkRecorder::new("suite", "a1", "run-1")));

        let timer = StepTimer::new("signing", Arc::clone(&recorder));
        timer.stop();
        {
            let _dropped = StepTimer::new("presign", Arc::clone(&recorder));
        }

        let report = recorder.lock().unwrap().report();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].name, "signing");
        assert_eq!(report.steps[1].name, "presign");
    }

    #[test]
    fn test_report_serializes() {
        let mut recorder = BenchmarkRecorder::new("suite", "a1", "run-1");
        recorder.record_step("keygen", Duration::from_millis(1));
        let json = serde_json::to_string(&recorder.report()).unwrap();
        assert!(json.contains("\"participant\":\"a1\""));
    }
}
