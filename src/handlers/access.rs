use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-user debounce so repeated taps on one prompt start one generation.
#[derive(Debug)]
pub struct Cooldowns {
    window: Duration,
    last_seen: Mutex<HashMap<i64, Instant>>,
}

impl Cooldowns {
    pub fn new(window: Duration) -> Self {
        Cooldowns {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true and starts a new window when the user is not cooling down.
    pub fn try_acquire(&self, user_id: i64) -> bool {
        self.try_acquire_at(user_id, Instant::now())
    }

    fn try_acquire_at(&self, user_id: i64, now: Instant) -> bool {
        let mut last_seen = self.last_seen.lock();
        if let Some(last) = last_seen.get(&user_id) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        last_seen.insert(user_id, now);
        last_seen.retain(|_, seen| now.duration_since(*seen) < self.window.max(Duration::from_secs(60)));
        true
    }

    pub fn release(&self, user_id: i64) {
        self.last_seen.lock().remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_tap_inside_the_window_is_rejected() {
        let cooldowns = Cooldowns::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(cooldowns.try_acquire_at(1, start));
        assert!(!cooldowns.try_acquire_at(1, start + Duration::from_secs(2)));
        assert!(cooldowns.try_acquire_at(2, start + Duration::from_secs(2)));
        assert!(cooldowns.try_acquire_at(1, start + Duration::from_secs(6)));
    }

    #[test]
    fn release_reopens_the_window() {
        let cooldowns = Cooldowns::new(Duration::from_secs(5));
        assert!(cooldowns.try_acquire(3));
        cooldowns.release(3);
        assert!(cooldowns.try_acquire(3));
    }

    #[test]
    fn zero_window_never_blocks() {
        let cooldowns = Cooldowns::new(Duration::ZERO);
        assert!(cooldowns.try_acquire(4));
        assert!(cooldowns.try_acquire(4));
    }
}
