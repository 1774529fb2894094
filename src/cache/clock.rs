//! Time source for staleness decisions.

/// Supplies "now" as epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    chrono::Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
  now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
  pub fn at(millis: i64) -> Self {
    Self {
      now: std::sync::atomic::AtomicI64::new(millis),
    }
  }

  pub fn set(&self, millis: i64) {
    self.now.store(millis, std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(std::sync::atomic::Ordering::SeqCst)
  }
}
