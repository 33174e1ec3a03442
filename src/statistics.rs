//! Ring-buffered counters/averages with 1/10/60-second windows (§5, §6.1).
//!
//! Grounded in the original's `RingBuffer`/`AveragingRingBuffer`/
//! `LevelingRingBuffer`/`CountingRingBuffer`/`StatisticsCollector`/
//! `StatisticsFactory`. The three ring-buffer subclasses become one struct
//! plus a strategy enum, the same sum-type treatment used for the matcher
//! hierarchy in `matching.rs`.

use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const BUCKETS: usize = 63;
const ONE: usize = 1;
const TEN: usize = 10;
const SIXTY: usize = 60;

#[derive(Clone, Copy, Debug)]
enum Strategy {
  /// Sums values added within a bucket, then divides by the count on retirement.
  Averaging { count: u64 },
  /// Tracks a running accumulator; each retiring bucket freezes its current level.
  Leveling { accum: f64 },
  /// Sums values added within a bucket; no normalization on retirement.
  Counting,
}

#[derive(Clone, Debug)]
struct RingBuffer {
  buffer: Vec<f64>,
  index: usize,
  current_second: u64,
  zero: f64,
  strategy: Strategy,
}

impl RingBuffer {
  fn new(zero: f64, strategy: Strategy) -> Self {
    RingBuffer { buffer: vec![zero; BUCKETS], index: 0, current_second: now_seconds(), zero, strategy }
  }

  fn averaging() -> Self {
    Self::new(0.0, Strategy::Averaging { count: 0 })
  }

  fn leveling() -> Self {
    Self::new(0.0, Strategy::Leveling { accum: 0.0 })
  }

  fn counting() -> Self {
    Self::new(0.0, Strategy::Counting)
  }

  fn retire_bucket(&mut self) {
    match &mut self.strategy {
      Strategy::Averaging { count } => {
        if *count > 0 {
          self.buffer[self.index] /= *count as f64;
        }
        *count = 0;
      }
      Strategy::Leveling { accum } => self.buffer[self.index] = *accum,
      Strategy::Counting => {}
    }
  }

  fn update_bucket(&mut self, value: f64) {
    match &mut self.strategy {
      Strategy::Averaging { count } => {
        self.buffer[self.index] += value;
        *count += 1;
      }
      Strategy::Leveling { accum } => *accum += value,
      Strategy::Counting => self.buffer[self.index] += value,
    }
  }

  fn retire_elapsed_buckets(&mut self, n: u64) {
    for _ in 0..n {
      self.retire_bucket();
      self.index = (self.index + 1) % self.buffer.len();
      self.buffer[self.index] = self.zero;
    }
  }

  fn make_seconds_current(&mut self) {
    let now = now_seconds();
    let elapsed = now.saturating_sub(self.current_second);
    if elapsed > 0 {
      self.retire_elapsed_buckets(elapsed);
    }
    self.current_second = now;
  }

  fn add(&mut self, value: f64) {
    self.make_seconds_current();
    self.update_bucket(value);
  }

  fn stats(&mut self) -> Window {
    self.make_seconds_current();
    let len = self.buffer.len();
    let mut j = if self.index == 0 { len - 1 } else { self.index - 1 };
    let mut v = self.buffer[j];
    let mut minimum = v;
    let mut maximum = v;
    let mut accum = v;
    let one = v;

    for _ in 0..(TEN - ONE) {
      j = if j == 0 { len - 1 } else { j - 1 };
      v = self.buffer[j];
      minimum = minimum.min(v);
      maximum = maximum.max(v);
      accum += v;
    }
    let ten = accum / TEN as f64;

    for _ in 0..(SIXTY - TEN) {
      j = if j == 0 { len - 1 } else { j - 1 };
      v = self.buffer[j];
      minimum = minimum.min(v);
      maximum = maximum.max(v);
      accum += v;
    }
    let sixty = accum / SIXTY as f64;

    Window { minimum, maximum, one, ten, sixty }
  }
}

fn now_seconds() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// A min/max/1s/10s/60s summary window for one ring buffer (§6.1).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct Window {
  pub minimum: f64,
  pub maximum: f64,
  pub one: f64,
  pub ten: f64,
  pub sixty: f64,
}

struct Inner {
  elapsed_time: RingBuffer,
  depth: RingBuffer,
  n_per_sec: RingBuffer,
}

/// Collects elapsed time, in-flight depth and per-second rate for one named
/// activity (§5's "Statistics" paragraph).
pub struct StatisticsCollector {
  pub name: String,
  inner: Mutex<Inner>,
}

impl StatisticsCollector {
  pub fn new(name: impl Into<String>) -> Self {
    StatisticsCollector {
      name: name.into(),
      inner: Mutex::new(Inner { elapsed_time: RingBuffer::averaging(), depth: RingBuffer::leveling(), n_per_sec: RingBuffer::counting() }),
    }
  }

  /// Starts timing one occurrence of the activity, bumping depth/rate.
  /// Accepts `self` wrapped in an `Arc` so the returned timer can outlive
  /// the borrow that produced it across thread boundaries.
  pub fn start_timer(self: &Arc<Self>) -> StatisticsTimer {
    let mut inner = self.inner.lock().unwrap();
    inner.depth.add(1.0);
    inner.n_per_sec.add(1.0);
    drop(inner);
    StatisticsTimer { collector: Arc::clone(self), start: Instant::now() }
  }

  fn stop_timer(&self, elapsed: f64) {
    let mut inner = self.inner.lock().unwrap();
    inner.elapsed_time.add(elapsed);
    inner.depth.add(-1.0);
  }

  pub fn stats(&self) -> CollectorStats {
    let mut inner = self.inner.lock().unwrap();
    CollectorStats {
      name: self.name.clone(),
      elapsed: inner.elapsed_time.stats(),
      depth: Some(inner.depth.stats()),
      n_per_sec: inner.n_per_sec.stats(),
    }
  }
}

/// Returned by `start_timer`; call `stop` when the measured activity ends.
pub struct StatisticsTimer {
  collector: Arc<StatisticsCollector>,
  start: Instant,
}

impl StatisticsTimer {
  pub fn stop(self) {
    self.collector.stop_timer(self.start.elapsed().as_secs_f64());
  }
}

/// One collector's snapshot, shaped for both the text `stats` and JSON
/// `jstats` table-server responses (§6.1).
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CollectorStats {
  pub name: String,
  pub elapsed: Window,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub depth: Option<Window>,
  pub n_per_sec: Window,
}

impl CollectorStats {
  /// Renders the `210 <name>: emin=… …` line format from §6.1 (without the
  /// leading status code, which the table/virtual server prepends).
  pub fn format_line(&self) -> String {
    let e = &self.elapsed;
    let mut out = format!(
      "{}: emin={} emax={} e1={} e10={} e60={}",
      self.name, e.minimum, e.maximum, e.one, e.ten, e.sixty
    );
    if let Some(d) = &self.depth {
      out.push_str(&format!(" dmin={} dmax={} d1={} d10={} d60={}", d.minimum, d.maximum, d.one, d.ten, d.sixty));
    }
    let n = &self.n_per_sec;
    out.push_str(&format!(" nmin={} nmax={} n1={} n10={} n60={}", n.minimum, n.maximum, n.one, n.ten, n.sixty));
    out
  }
}

/// Creates and owns every `StatisticsCollector` in a process so they can be
/// reported on together (§6.1's `stats`/`jstats`).
#[derive(Default)]
pub struct StatisticsFactory {
  collectors: Mutex<Vec<Arc<StatisticsCollector>>>,
}

impl StatisticsFactory {
  pub fn new() -> Self {
    StatisticsFactory::default()
  }

  pub fn collector(&self, name: impl Into<String>) -> Arc<StatisticsCollector> {
    let collector = Arc::new(StatisticsCollector::new(name));
    self.collectors.lock().unwrap().push(Arc::clone(&collector));
    collector
  }

  pub fn stats(&self) -> Vec<CollectorStats> {
    self.collectors.lock().unwrap().iter().map(|c| c.stats()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counting_ring_buffer_accumulates_within_a_second() {
    let mut rb = RingBuffer::counting();
    rb.current_second = now_seconds();
    rb.add(1.0);
    rb.add(1.0);
    rb.add(1.0);
    let w = rb.stats();
    assert_eq!(w.one, 3.0);
  }

  #[test]
  fn collector_reports_name_and_windows() {
    let collector = Arc::new(StatisticsCollector::new("resolve"));
    let timer = collector.start_timer();
    timer.stop();
    let stats = collector.stats();
    assert_eq!(stats.name, "resolve");
    assert!(stats.depth.is_some());
  }

  #[test]
  fn factory_aggregates_every_collector() {
    let factory = StatisticsFactory::new();
    factory.collector("a");
    factory.collector("b");
    let stats = factory.stats();
    assert_eq!(stats.len(), 2);
  }
}
