//! Absolute-deadline timers.
//!
//! Deadlines are wall-clock microseconds. A deadline that sits further in
//! the future than its own interval can only mean the clock was stepped
//! backwards, so it is treated as fired instead of stalling the router.

use crate::types::ProtocolVersion;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of "now" for the timer model.
pub trait Clock: Send + Sync {
    /// Current time in microseconds since an arbitrary epoch.
    fn now_usec(&self) -> u64;
}

/// Wall clock (`gettimeofday` semantics, may jump).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_usec(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Whether a timer armed for `deadline` has fired at `now`.
///
/// Fires when the deadline has passed, or when more than `upper_bound`
/// microseconds remain (clock stepped backwards).
pub fn timer_fired(deadline: u64, upper_bound: u64, now: u64) -> bool {
    let delta = deadline as i64 - now as i64;
    delta < 0 || delta > upper_bound as i64
}

/// `(256 - priority) * interval / 256`
pub fn skew_time(priority: u8, interval: u64) -> u64 {
    (256 - priority as u64) * interval / 256
}

/// `3 * interval + skew`
pub fn master_down_interval(priority: u8, interval: u64) -> u64 {
    3 * interval + skew_time(priority, interval)
}

/// Protocol timers of one virtual router.
///
/// At most one deadline is armed: the advertisement timer while MASTER,
/// the master-down timer while BACKUP, neither in INIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timers {
    priority: u8,
    advert_interval: u64,
    master_advert_interval: u64,
    skew_time: u64,
    master_down_interval: u64,
    advert_deadline: Option<u64>,
    master_down_deadline: Option<u64>,
}

impl Timers {
    /// Build timers for a router advertising every `advert_interval` microseconds.
    pub fn new(priority: u8, advert_interval: u64) -> Self {
        let mut timers = Self {
            priority,
            advert_interval,
            master_advert_interval: advert_interval,
            skew_time: 0,
            master_down_interval: 0,
            advert_deadline: None,
            master_down_deadline: None,
        };
        timers.recompute();
        timers
    }

    fn recompute(&mut self) {
        self.skew_time = skew_time(self.priority, self.master_advert_interval);
        self.master_down_interval = master_down_interval(self.priority, self.master_advert_interval);
    }

    /// Adopt the interval advertised by the current master.
    ///
    /// VRRPv2 routers never resynchronize; their intervals must match.
    pub fn resync(&mut self, version: ProtocolVersion, master_advert_interval: u64) {
        if !version.resyncs_interval() {
            return;
        }
        self.master_advert_interval = master_advert_interval;
        self.recompute();
    }

    pub fn advert_interval(&self) -> u64 {
        self.advert_interval
    }

    pub fn master_advert_interval(&self) -> u64 {
        self.master_advert_interval
    }

    pub fn skew_time(&self) -> u64 {
        self.skew_time
    }

    pub fn master_down_interval(&self) -> u64 {
        self.master_down_interval
    }

    pub fn advert_deadline(&self) -> Option<u64> {
        self.advert_deadline
    }

    pub fn master_down_deadline(&self) -> Option<u64> {
        self.master_down_deadline
    }

    /// Arm the advertisement timer and disarm master-down.
    pub fn arm_advert(&mut self, now: u64) {
        self.advert_deadline = Some(now + self.advert_interval);
        self.master_down_deadline = None;
    }

    /// Arm the master-down timer for a full master-down interval.
    pub fn arm_master_down(&mut self, now: u64) {
        self.advert_deadline = None;
        self.master_down_deadline = Some(now + self.master_down_interval);
    }

    /// Arm the master-down timer for just the skew time (master released).
    pub fn arm_master_down_skew(&mut self, now: u64) {
        self.advert_deadline = None;
        self.master_down_deadline = Some(now + self.skew_time);
    }

    pub fn disarm(&mut self) {
        self.advert_deadline = None;
        self.master_down_deadline = None;
    }

    pub fn advert_fired(&self, now: u64) -> bool {
        self.advert_deadline
            .is_some_and(|d| timer_fired(d, self.advert_interval, now))
    }

    pub fn master_down_fired(&self, now: u64) -> bool {
        self.master_down_deadline
            .is_some_and(|d| timer_fired(d, self.master_down_interval, now))
    }

    /// Time left until the armed deadline; zero if none is armed or it passed.
    pub fn remaining(&self, now: u64) -> Duration {
        let deadline = self.advert_deadline.or(self.master_down_deadline);
        Duration::from_micros(deadline.map_or(0, |d| d.saturating_sub(now)))
    }
}
