use log::info;

use crate::types::SleepPlan;

/// Microseconds since an arbitrary fixed origin (boot on target).
pub trait MonotonicClock {
    fn now_us(&self) -> u64;
}

pub trait WakeTimer {
    fn arm(&mut self, duration_us: u64);

    /// Powers down. Execution continues only from a fresh boot.
    fn deep_sleep(&mut self) -> !;
}

/// Sleeps so that the period from this boot to the next one equals the
/// requested interval: elapsed run time and the fixed boot cost are taken
/// off the timer.
pub struct SleepScheduler<C, W> {
    clock: C,
    timer: W,
    boot_reference_us: u64,
    boot_overhead_us: u64,
}

impl<C: MonotonicClock, W: WakeTimer> SleepScheduler<C, W> {
    pub fn new(clock: C, timer: W, boot_overhead_us: u64) -> Self {
        let boot_reference_us = clock.now_us();
        Self {
            clock,
            timer,
            boot_reference_us,
            boot_overhead_us,
        }
    }

    pub fn timer(&self) -> &W {
        &self.timer
    }

    pub fn plan(&self, interval_min: u32) -> SleepPlan {
        let elapsed_us = self.clock.now_us().saturating_sub(self.boot_reference_us);
        SleepPlan::compute(interval_min, elapsed_us, self.boot_overhead_us)
    }

    pub fn sleep(&mut self, interval_min: u32) -> ! {
        let plan = self.plan(interval_min);
        info!(
            "deep sleep for {} us ({} min interval, {} us awake, {} us boot overhead)",
            plan.sleep_us, plan.interval_min, plan.elapsed_us, plan.boot_overhead_us
        );
        self.timer.arm(plan.sleep_us);
        self.timer.deep_sleep()
    }
}
