//! Rolling performance counters.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use serde::Serialize;

use crate::gpu::{Context, Recording, TimestampQueries};

/// Min, mean and max over one window, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stat {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub samples: usize,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}/{:.1}/{:.1}", self.min, self.mean, self.max)
    }
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            count: 0,
        }
    }
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn stat(&self) -> Stat {
        if self.count == 0 {
            return Stat::default();
        }
        Stat {
            min: self.min,
            mean: self.sum / self.count as f64,
            max: self.max,
            samples: self.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStat {
    pub name: &'static str,
    pub gpu_us: Stat,
}

/// Host time blocked on one of the strategy's fences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FenceWaitStat {
    pub name: &'static str,
    pub wait_us: Stat,
}

/// Counters for one window of calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfReport {
    pub strategy: &'static str,
    pub calls: u64,
    pub window: usize,
    pub stages: Vec<StageStat>,
    pub fence_waits: Vec<FenceWaitStat>,
    pub total_us: Stat,
}

impl fmt::Display for PerfReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} calls (min/mean/max us):", self.strategy, self.calls)?;
        for stage in &self.stages {
            write!(f, " {}={}", stage.name, stage.gpu_us)?;
        }
        for fence in &self.fence_waits {
            write!(f, " wait-{}={}", fence.name, fence.wait_us)?;
        }
        write!(f, " total={}", self.total_us)
    }
}

/// Accumulates per-call timings and produces a [`PerfReport`] every `window` calls.
#[derive(Debug)]
pub struct PerfCounters {
    strategy: &'static str,
    window: usize,
    calls: u64,
    in_window: usize,
    stage_names: Vec<&'static str>,
    stages: Vec<Accumulator>,
    fence_names: Vec<&'static str>,
    fence_waits: Vec<Accumulator>,
    total: Accumulator,
    last_report: Option<PerfReport>,
}

impl PerfCounters {
    pub fn new(
        strategy: &'static str,
        stage_names: &[&'static str],
        fence_names: &[&'static str],
        window: usize,
    ) -> Self {
        Self {
            strategy,
            window: window.max(1),
            calls: 0,
            in_window: 0,
            stage_names: stage_names.to_vec(),
            stages: vec![Accumulator::default(); stage_names.len()],
            fence_names: fence_names.to_vec(),
            fence_waits: vec![Accumulator::default(); fence_names.len()],
            total: Accumulator::default(),
            last_report: None,
        }
    }

    /// GPU time of each stage, in microseconds, in `stage_names` order.
    pub fn record_stages(&mut self, micros: &[f64]) {
        for (acc, &value) in self.stages.iter_mut().zip(micros) {
            acc.add(value);
        }
    }

    /// Host time blocked on fence `fence`, indexed like `fence_names`.
    pub fn record_fence_wait(&mut self, fence: usize, elapsed: Duration) {
        if let Some(acc) = self.fence_waits.get_mut(fence) {
            acc.add(elapsed.as_secs_f64() * 1e6);
        }
    }

    /// Close a call. Returns the new report when the window is complete.
    pub fn finish_call(&mut self, elapsed: Duration) -> Option<&PerfReport> {
        self.total.add(elapsed.as_secs_f64() * 1e6);
        self.calls += 1;
        self.in_window += 1;
        if self.in_window < self.window {
            return None;
        }

        let report = PerfReport {
            strategy: self.strategy,
            calls: self.calls,
            window: self.in_window,
            stages: self
                .stage_names
                .iter()
                .zip(&self.stages)
                .map(|(&name, acc)| StageStat {
                    name,
                    gpu_us: acc.stat(),
                })
                .collect(),
            fence_waits: self
                .fence_names
                .iter()
                .zip(&self.fence_waits)
                .map(|(&name, acc)| FenceWaitStat {
                    name,
                    wait_us: acc.stat(),
                })
                .collect(),
            total_us: self.total.stat(),
        };
        log::debug!("{report}");

        self.in_window = 0;
        self.stages.fill(Accumulator::default());
        self.fence_waits.fill(Accumulator::default());
        self.total = Accumulator::default();
        self.last_report = Some(report);
        self.last_report.as_ref()
    }

    pub fn last_report(&self) -> Option<&PerfReport> {
        self.last_report.as_ref()
    }
}

/// Start/end timestamps for every command-buffer stage of both slots.
pub(crate) struct StageTimer {
    queries: TimestampQueries,
    stages: u32,
}

impl StageTimer {
    /// Lease queries for two slots of `stages` stages. `None` without timestamp support.
    pub fn lease(context: &Arc<Context>, stages: u32) -> Option<Self> {
        let queries = context.lease_queries(2 * 2 * stages)?;
        Some(Self { queries, stages })
    }

    fn base(&self, slot: usize) -> u32 {
        slot as u32 * 2 * self.stages
    }

    /// Reset the slot's queries. Recorded at the start of its first command buffer.
    pub fn reset(&self, recording: &Recording<'_>, slot: usize) {
        self.queries.reset(recording, self.base(slot), 2 * self.stages);
    }

    pub fn begin(&self, recording: &Recording<'_>, slot: usize, stage: u32) {
        let offset = self.base(slot) + 2 * stage;
        self.queries
            .write(recording, offset, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    pub fn end(&self, recording: &Recording<'_>, slot: usize, stage: u32) {
        let offset = self.base(slot) + 2 * stage + 1;
        self.queries
            .write(recording, offset, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    /// Stage durations of a completed slot, in microseconds.
    pub fn read(&self, slot: usize) -> Option<Vec<f64>> {
        self.queries.read_intervals(self.base(slot), self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_every_window() {
        let mut counters = PerfCounters::new("test", &["a", "b"], &["first", "second"], 3);
        for i in 0..2 {
            counters.record_stages(&[10.0 + i as f64, 20.0]);
            counters.record_fence_wait(0, Duration::from_micros(5));
            counters.record_fence_wait(1, Duration::from_micros(40 + i));
            assert!(counters.finish_call(Duration::from_micros(100)).is_none());
        }
        counters.record_stages(&[12.0, 20.0]);
        let report = counters
            .finish_call(Duration::from_micros(130))
            .cloned()
            .unwrap();

        assert_eq!(report.calls, 3);
        assert_eq!(report.stages[0].gpu_us.min, 10.0);
        assert_eq!(report.stages[0].gpu_us.max, 12.0);
        assert!((report.stages[0].gpu_us.mean - 11.0).abs() < 1e-9);
        assert_eq!(report.fence_waits[0].name, "first");
        assert_eq!(report.fence_waits[0].wait_us.samples, 2);
        assert_eq!(report.fence_waits[0].wait_us.max, 5.0);
        assert_eq!(report.fence_waits[1].wait_us.min, 40.0);
        assert_eq!(report.fence_waits[1].wait_us.max, 41.0);
        assert!((report.total_us.max - 130.0).abs() < 1e-6);
        assert_eq!(counters.last_report(), Some(&report));

        // the next window starts empty
        assert!(counters.finish_call(Duration::from_micros(1)).is_none());
        assert_eq!(counters.last_report().unwrap().calls, 3);
    }

    #[test]
    fn test_empty_stat_is_zero() {
        let mut counters = PerfCounters::new("test", &["a"], &["output"], 1);
        let report = counters.finish_call(Duration::ZERO).unwrap();
        assert_eq!(report.stages[0].gpu_us, Stat::default());
        assert!(report.to_string().starts_with("test after 1 calls"));
    }

    #[test]
    fn test_report_serializes() {
        let mut counters = PerfCounters::new("single-queue", &["shift"], &["output"], 1);
        let report = counters.finish_call(Duration::from_micros(3)).unwrap();
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["strategy"], "single-queue");
        assert_eq!(json["stages"][0]["name"], "shift");
    }
}
