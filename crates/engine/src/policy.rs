//! Eligibility policies: which records of a category are due at a given instant.
//!
//! A policy pairs a reference field with a window:
//! - time-critical: `scheduled_time` within `[now - w, now + w]`
//! - freshness: `created_at >= now - w`, no upper bound
//!
//! Each policy produces a single-field range filter, so categories are always
//! queried one at a time.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use tidings_common::config::AppConfig;
use tidings_common::store::{DueFilter, ReferenceField};
use tidings_common::types::Category;

/// Default half-width of the time-critical window (5 minutes).
pub const DEFAULT_TIME_CRITICAL_WINDOW_SECS: i64 = 300;

/// Default freshness lookback (4 hours).
pub const DEFAULT_FRESHNESS_LOOKBACK_SECS: i64 = 4 * 60 * 60;

/// Shape of an eligibility window relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// `[now - width, now + width]`
    SymmetricAroundNow(Duration),
    /// `[now - width, +inf)`
    LookbackOnly(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    pub field: ReferenceField,
    pub window: Window,
}

impl EligibilityPolicy {
    pub fn time_critical(width: Duration) -> Self {
        Self {
            field: ReferenceField::ScheduledTime,
            window: Window::SymmetricAroundNow(width),
        }
    }

    pub fn freshness(lookback: Duration) -> Self {
        Self {
            field: ReferenceField::CreatedAt,
            window: Window::LookbackOnly(lookback),
        }
    }

    pub fn is_time_critical(&self) -> bool {
        matches!(self.window, Window::SymmetricAroundNow(_))
    }

    /// Inclusive bounds of the window at `now`. A bound that falls outside the
    /// representable time range is left open.
    pub fn bounds(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.window {
            Window::SymmetricAroundNow(width) => (
                now.checked_sub_signed(width),
                now.checked_add_signed(width),
            ),
            Window::LookbackOnly(width) => (now.checked_sub_signed(width), None),
        }
    }

    pub fn filter(&self, category: Category, now: DateTime<Utc>) -> DueFilter {
        let (not_before, not_after) = self.bounds(now);
        DueFilter {
            category,
            field: self.field,
            not_before,
            not_after,
        }
    }
}

/// Policies for every category the dispatcher scans.
#[derive(Debug, Clone)]
pub struct PolicySet {
    policies: HashMap<Category, EligibilityPolicy>,
}

impl PolicySet {
    pub fn new(time_critical_window: Duration, freshness_lookback: Duration) -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            Category::Vaccination,
            EligibilityPolicy::time_critical(time_critical_window),
        );
        policies.insert(
            Category::Weather,
            EligibilityPolicy::freshness(freshness_lookback),
        );
        Self { policies }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            window_from_secs(config.time_critical_window_secs),
            window_from_secs(config.freshness_lookback_secs),
        )
    }

    /// Replace (or add) the policy of a category.
    pub fn with_policy(mut self, category: Category, policy: EligibilityPolicy) -> Self {
        self.policies.insert(category, policy);
        self
    }

    pub fn get(&self, category: Category) -> Option<&EligibilityPolicy> {
        self.policies.get(&category)
    }

    /// Configured policies in a stable category order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &EligibilityPolicy)> {
        Category::ALL
            .into_iter()
            .filter_map(|category| self.policies.get(&category).map(|p| (category, p)))
    }
}

/// Negative widths collapse to zero; oversized ones saturate.
fn window_from_secs(secs: i64) -> Duration {
    Duration::try_seconds(secs.max(0)).unwrap_or(Duration::MAX)
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::new(
            Duration::seconds(DEFAULT_TIME_CRITICAL_WINDOW_SECS),
            Duration::seconds(DEFAULT_FRESHNESS_LOOKBACK_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let set = PolicySet::default();
        let vaccination = set.get(Category::Vaccination).unwrap();
        assert!(vaccination.is_time_critical());
        assert_eq!(vaccination.field, ReferenceField::ScheduledTime);

        let weather = set.get(Category::Weather).unwrap();
        assert!(!weather.is_time_critical());
        assert_eq!(weather.field, ReferenceField::CreatedAt);
    }

    #[test]
    fn test_symmetric_bounds() {
        let now = Utc::now();
        let policy = EligibilityPolicy::time_critical(Duration::minutes(5));
        assert_eq!(
            policy.bounds(now),
            (Some(now - Duration::minutes(5)), Some(now + Duration::minutes(5)))
        );
    }

    #[test]
    fn test_lookback_has_no_upper_bound() {
        let now = Utc::now();
        let filter = EligibilityPolicy::freshness(Duration::hours(4)).filter(Category::Weather, now);
        assert_eq!(filter.not_before, Some(now - Duration::hours(4)));
        assert_eq!(filter.not_after, None);
        assert_eq!(filter.field, ReferenceField::CreatedAt);
    }

    #[test]
    fn test_iteration_order_is_stable() {
        let categories: Vec<_> = PolicySet::default().iter().map(|(c, _)| c).collect();
        assert_eq!(categories, vec![Category::Vaccination, Category::Weather]);
    }

    #[test]
    fn test_oversized_lookback_leaves_bound_open() {
        let now = Utc::now();
        let policy = EligibilityPolicy::freshness(Duration::MAX);
        assert_eq!(policy.bounds(now), (None, None));

        let policy = EligibilityPolicy::time_critical(Duration::MAX);
        assert_eq!(policy.bounds(now), (None, None));
    }

    #[test]
    fn test_window_from_secs_never_panics() {
        assert_eq!(window_from_secs(300), Duration::minutes(5));
        assert_eq!(window_from_secs(-300), Duration::zero());
        assert_eq!(window_from_secs(i64::MAX), Duration::MAX);

        let huge = EligibilityPolicy::freshness(window_from_secs(9_000_000_000_000_000));
        assert_eq!(huge.bounds(Utc::now()), (None, None));
    }
}
