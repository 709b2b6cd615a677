//! Adaptive publish interval.
//!
//! The publisher runs in one of three states. A refresh request puts it in a
//! short burst of fast publishes; outside a burst, weekday rush windows get a
//! faster cadence than the rest of the day.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use std::time::Duration;
use tracing::info;

/// Inclusive wall-clock window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RushWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl RushWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSchedule {
    pub morning_rush: RushWindow,
    pub evening_rush: RushWindow,
    pub normal_interval: Duration,
    pub rush_interval: Duration,
    pub refresh_interval: Duration,
    pub refresh_window: chrono::Duration,
}

impl Default for PublishSchedule {
    fn default() -> Self {
        let hm = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN);
        Self {
            morning_rush: RushWindow::new(hm(6, 0), hm(9, 0)),
            evening_rush: RushWindow::new(hm(15, 0), hm(18, 0)),
            normal_interval: Duration::from_secs(60),
            rush_interval: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(5),
            refresh_window: chrono::Duration::minutes(10),
        }
    }
}

impl PublishSchedule {
    /// Monday to Friday, inside either rush window.
    pub fn is_rush_hour(&self, now: NaiveDateTime) -> bool {
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = now.time();
        self.morning_rush.contains(time) || self.evening_rush.contains(time)
    }

    pub fn interval(&self, state: PublishState) -> Duration {
        match state {
            PublishState::Normal => self.normal_interval,
            PublishState::RushHour => self.rush_interval,
            PublishState::RefreshBurst => self.refresh_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Normal,
    RushHour,
    RefreshBurst,
}

/// Tracks the refresh burst on top of a [`PublishSchedule`].
#[derive(Debug, Clone)]
pub struct PublishTimer {
    schedule: PublishSchedule,
    burst_until: Option<NaiveDateTime>,
}

impl PublishTimer {
    pub fn new(schedule: PublishSchedule) -> Self {
        Self {
            schedule,
            burst_until: None,
        }
    }

    /// Enters (or extends) the refresh burst, starting at `now`.
    pub fn start_burst(&mut self, now: NaiveDateTime) {
        let until = now + self.schedule.refresh_window;
        info!(%until, "Refresh burst started");
        self.burst_until = Some(until);
    }

    pub fn state(&mut self, now: NaiveDateTime) -> PublishState {
        if let Some(until) = self.burst_until {
            if now < until {
                return PublishState::RefreshBurst;
            }
            info!("Refresh period ended");
            self.burst_until = None;
        }

        if self.schedule.is_rush_hour(now) {
            PublishState::RushHour
        } else {
            PublishState::Normal
        }
    }

    /// How long to sleep after publishing at `now`.
    pub fn next_interval(&mut self, now: NaiveDateTime) -> Duration {
        let state = self.state(now);
        self.schedule.interval(state)
    }
}
