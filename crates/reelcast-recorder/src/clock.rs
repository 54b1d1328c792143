//! Display-refresh driven frame clock

use reelcast_core::{Error, Result};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Periodic trigger for frame captures.
///
/// Ticks run on the tokio runtime that called [`FrameClock::start`]. A tick
/// that comes due while the previous one is still late is skipped, so a slow
/// callback never causes a burst of catch-up captures.
#[derive(Default)]
pub struct FrameClock {
    task: Option<JoinHandle<()>>,
    rate: u32,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate the clock can actually deliver: the display never refreshes
    /// faster than `refresh_rate`.
    pub fn effective_rate(fps: u32, refresh_rate: u32) -> u32 {
        if refresh_rate == 0 {
            return fps;
        }
        fps.min(refresh_rate)
    }

    /// Start ticking at `rate` per second.
    ///
    /// The first tick fires immediately. Returning `ControlFlow::Break` from
    /// the callback ends the clock.
    pub fn start<F>(&mut self, rate: u32, mut on_tick: F) -> Result<()>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        if self.is_running() {
            return Err(Error::AlreadyRecording);
        }
        if rate == 0 {
            return Err(Error::InvalidFrameRate(rate));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let period = Duration::from_nanos((1_000_000_000 / rate as u64).max(1));
        self.rate = rate;
        self.task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if on_tick().is_break() {
                    debug!("Frame clock stopped by its callback");
                    break;
                }
            }
        }));

        debug!("Frame clock armed at {} Hz", rate);
        Ok(())
    }

    /// Stop ticking. Does nothing if the clock is not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Frame clock disarmed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Rate of the last start
    pub fn rate(&self) -> u32 {
        self.rate
    }
}

impl Drop for FrameClock {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Frame clock dropped while running");
        }
        self.stop();
    }
}
