//! In-world time of day.
//!
//! Both roles advance the clock locally every tick; the server periodically
//! broadcasts its value so clients do not drift apart.

use std::time::Duration;

use crate::protocol::WorldClockUpdate;

pub const HOURS_PER_DAY: f32 = 24.0;

#[derive(Debug, Clone)]
pub struct WorldClock {
    /// Hour in `[0, 24)`.
    time_of_day: f32,
    /// Real seconds per in-world day.
    day_length_secs: f32,
}

impl WorldClock {
    pub fn new(day_length_secs: f32, start_hour: f32) -> Self {
        Self {
            time_of_day: start_hour.rem_euclid(HOURS_PER_DAY),
            day_length_secs: day_length_secs.max(f32::EPSILON),
        }
    }

    pub fn advance(&mut self, dt: Duration) {
        let hours = dt.as_secs_f32() / self.day_length_secs * HOURS_PER_DAY;
        self.time_of_day = (self.time_of_day + hours).rem_euclid(HOURS_PER_DAY);
    }

    pub fn set(&mut self, time_of_day: f32) {
        self.time_of_day = time_of_day.rem_euclid(HOURS_PER_DAY);
    }

    pub fn time_of_day(&self) -> f32 {
        self.time_of_day
    }

    pub fn to_update(&self) -> WorldClockUpdate {
        WorldClockUpdate {
            time_of_day: self.time_of_day,
        }
    }
}
