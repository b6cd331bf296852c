//! Battery budget enforcement
//!
//! One probe run is bounded by a single wall-clock budget. The enforcer only
//! tracks time; the runner decides what to do once it is spent and the
//! session turns the deadline into a bound on every wait.

use std::time::{Duration, Instant};

/// Budget check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// Time remains
    Ok,
    /// The budget is spent
    Exhausted,
}

impl BudgetStatus {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, BudgetStatus::Exhausted)
    }
}

/// Wall-clock budget for one probe run
#[derive(Debug, Clone, Copy)]
pub struct BudgetEnforcer {
    budget: Duration,
    start_time: Instant,
}

impl BudgetEnforcer {
    /// Start the clock now
    pub fn start(budget: Duration) -> Self {
        Self {
            budget,
            start_time: Instant::now(),
        }
    }

    /// Absolute instant at which the budget is spent
    pub fn deadline(&self) -> Instant {
        self.start_time + self.budget
    }

    pub fn check(&self) -> BudgetStatus {
        if self.elapsed() >= self.budget {
            BudgetStatus::Exhausted
        } else {
            BudgetStatus::Ok
        }
    }

    /// Get elapsed time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get remaining time before the budget is spent
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fresh_budget_is_ok() {
        let enforcer = BudgetEnforcer::start(Duration::from_secs(60));
        assert_eq!(enforcer.check(), BudgetStatus::Ok);
        assert!(enforcer.remaining() > Duration::from_secs(59));
        assert!(enforcer.deadline() > Instant::now());
    }

    #[test]
    fn test_budget_exhausts() {
        let enforcer = BudgetEnforcer::start(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(20));
        assert!(enforcer.check().is_exhausted());
        assert_eq!(enforcer.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_zero_budget_is_exhausted_immediately() {
        let enforcer = BudgetEnforcer::start(Duration::ZERO);
        assert!(enforcer.check().is_exhausted());
    }
}
