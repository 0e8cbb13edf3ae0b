use serde::{Deserialize, Serialize};

use crate::config::LinkConfig;

/// Result of one `adjust` call that crossed a threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelChange {
    /// Enough consecutive successes: one level faster.
    Recovered { from: usize, to: usize },
    /// Enough consecutive failures: one level slower.
    Degraded { from: usize, to: usize },
}

/// Discrete link-quality tier plus the run counters that move it.
///
/// `level` stays within `0..=worst` and moves by at most one per call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStability {
    pub level: usize,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    worst: usize,
    promotion_threshold: u32,
    demotion_threshold: u32,
}

impl LinkStability {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            level: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            worst: config.worst_level(),
            promotion_threshold: config.promotion_threshold,
            demotion_threshold: config.demotion_threshold,
        }
    }

    pub fn worst(&self) -> usize {
        self.worst
    }

    pub fn is_worst(&self) -> bool {
        self.level == self.worst
    }

    pub fn adjust(&mut self, success: bool) -> Option<LevelChange> {
        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            if self.consecutive_successes >= self.promotion_threshold && self.level > 0 {
                let from = self.level;
                self.level -= 1;
                self.consecutive_successes = 0;
                return Some(LevelChange::Recovered { from, to: self.level });
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if self.consecutive_failures >= self.demotion_threshold && self.level < self.worst {
                let from = self.level;
                self.level += 1;
                self.consecutive_failures = 0;
                return Some(LevelChange::Degraded { from, to: self.level });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stability() -> LinkStability {
        LinkStability::new(&LinkConfig::default())
    }

    #[test]
    fn test_three_failures_degrade_once() {
        let mut s = stability();
        assert_eq!(s.adjust(false), None);
        assert_eq!(s.adjust(false), None);
        assert_eq!(s.adjust(false), Some(LevelChange::Degraded { from: 0, to: 1 }));
        assert_eq!(s.level, 1);
        assert_eq!(s.consecutive_failures, 0);
    }

    #[test]
    fn test_intervening_success_resets_failures() {
        let mut s = stability();
        s.adjust(false);
        s.adjust(false);
        s.adjust(true);
        assert_eq!(s.consecutive_failures, 0);
        s.adjust(false);
        s.adjust(false);
        assert_eq!(s.level, 0);
        s.adjust(false);
        assert_eq!(s.level, 1);
    }

    #[test]
    fn test_twenty_successes_recover_one_level() {
        let mut s = stability();
        for _ in 0..6 {
            s.adjust(false);
        }
        assert_eq!(s.level, 2);

        for _ in 0..19 {
            assert_eq!(s.adjust(true), None);
        }
        assert_eq!(s.adjust(true), Some(LevelChange::Recovered { from: 2, to: 1 }));
        assert_eq!(s.consecutive_successes, 0);
    }

    #[test]
    fn test_level_floor_at_zero() {
        let mut s = stability();
        for _ in 0..100 {
            assert_eq!(s.adjust(true), None);
        }
        assert_eq!(s.level, 0);
    }

    #[test]
    fn test_level_ceiling_at_worst() {
        let mut s = stability();
        for _ in 0..100 {
            s.adjust(false);
        }
        assert_eq!(s.level, s.worst());
        assert!(s.is_worst());
        assert!(s.level < LinkConfig::default().send_intervals_ms.len());
    }

    #[test]
    fn test_single_step_per_call() {
        let mut s = stability();
        let mut previous = s.level;
        for i in 0..40 {
            s.adjust(i % 7 != 0 && i > 20);
            assert!(s.level.abs_diff(previous) <= 1);
            previous = s.level;
        }
    }
}
