//! Rebalance scheduling.

use chrono::{Datelike, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebalancePolicy {
    /// Every simulated day.
    EveryStep,
    /// First trading day of each ISO week.
    Weekly,
    /// First trading day of each month.
    #[default]
    Monthly,
    /// First trading day of each quarter.
    Quarterly,
    /// First trading day of each year.
    Yearly,
    /// `n` trading steps after the last executed rebalance.
    EveryNDays(usize),
}

/// Calendar bucket a date falls in, for the period-based policies.
fn period_key(policy: RebalancePolicy, date: NaiveDate) -> Option<(i32, u32)> {
    match policy {
        RebalancePolicy::Weekly => {
            let week = date.iso_week();
            Some((week.year(), week.week()))
        }
        RebalancePolicy::Monthly => Some((date.year(), date.month())),
        RebalancePolicy::Quarterly => Some((date.year(), (date.month() - 1) / 3)),
        RebalancePolicy::Yearly => Some((date.year(), 0)),
        RebalancePolicy::EveryStep | RebalancePolicy::EveryNDays(_) => None,
    }
}

/// Decides whether step `index` of the timeline should rebalance.
///
/// Period policies fire on the first step of a new calendar bucket.
/// `EveryNDays` counts from the last rebalance that actually executed. A
/// rebalance that was deferred or skipped stays pending and is retried on
/// every following step until one executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceScheduler {
    policy: RebalancePolicy,
    last_executed: Option<usize>,
    pending: bool,
}

impl RebalanceScheduler {
    pub fn new(policy: RebalancePolicy) -> Self {
        RebalanceScheduler {
            policy,
            last_executed: None,
            pending: false,
        }
    }

    pub fn policy(&self) -> RebalancePolicy {
        self.policy
    }

    pub fn last_executed(&self) -> Option<usize> {
        self.last_executed
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_due(&self, index: usize, date: NaiveDate, prev_date: Option<NaiveDate>) -> bool {
        if self.pending {
            return true;
        }
        match self.policy {
            RebalancePolicy::EveryStep => true,
            RebalancePolicy::EveryNDays(n) => match self.last_executed {
                None => true,
                Some(last) => index.saturating_sub(last) >= n.max(1),
            },
            policy => match prev_date {
                None => true,
                Some(prev) => period_key(policy, prev) != period_key(policy, date),
            },
        }
    }

    pub fn mark_rebalanced(&mut self, index: usize) {
        self.last_executed = Some(index);
        self.pending = false;
    }

    /// Keeps a due rebalance that did not run due on the next step.
    pub fn defer(&mut self) {
        self.pending = true;
    }
}
