use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Operator abort flag.  Tripped from the Ctrl-C listener thread, polled by the executor between
/// steps; blocking arm calls are never cut short.
#[derive(Clone, Default, Debug)]
pub struct StopSignal {
  triggered: Arc<AtomicBool>,
}

impl StopSignal {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn trigger(&self) {
    self.triggered.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.triggered.load(Ordering::SeqCst)
  }

  /// Sleeps for `period` unless the signal trips first.  Returns false if it did.
  pub fn sleep(&self, period: Duration) -> bool {
    let deadline = Instant::now() + period;
    loop {
      if self.is_triggered() {
        return false;
      }
      let now = Instant::now();
      if now >= deadline {
        return true;
      }
      thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
  }

  /// Spawns a listener thread that trips this signal on Ctrl-C.
  pub fn install_ctrl_c_handler(&self) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let signal = self.clone();
    thread::Builder::new()
        .name("ctrl-c".to_owned())
        .spawn(move || {
          runtime.block_on(async move {
            loop {
              if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Ctrl-C listener failed: {e}");
                return;
              }
              if signal.is_triggered() {
                warn!("Already stopping, waiting for the arm to finish its current move...");
              } else {
                warn!("Keyboard interrupt detected...");
                signal.trigger();
              }
            }
          })
        })?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clones_share_the_flag() {
    let signal = StopSignal::new();
    let other = signal.clone();
    assert!(!signal.is_triggered());
    other.trigger();
    assert!(signal.is_triggered());
  }

  #[test]
  fn sleep_returns_early_once_triggered() {
    let signal = StopSignal::new();
    let remote = signal.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(50));
      remote.trigger();
    });
    let start = Instant::now();
    assert!(!signal.sleep(Duration::from_secs(10)));
    assert!(start.elapsed() < Duration::from_secs(5));
    handle.join().unwrap();
  }

  #[test]
  fn zero_sleep_completes_immediately() {
    assert!(StopSignal::new().sleep(Duration::ZERO));
  }
}
