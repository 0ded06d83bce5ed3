use alloy_primitives::U256;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SelectedProject;

/// Lifecycle phases; the wire casing is part of the API contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "DISCOVER")]
    Discover,
    #[serde(rename = "WAIT_T0")]
    WaitT0,
    #[serde(rename = "LAUNCH_WINDOW")]
    LaunchWindow,
    #[serde(rename = "BUYBACK_PHASE")]
    BuybackPhase,
    #[serde(rename = "DONE")]
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "DISCOVER",
            Self::WaitT0 => "WAIT_T0",
            Self::LaunchWindow => "LAUNCH_WINDOW",
            Self::BuybackPhase => "BUYBACK_PHASE",
            Self::Done => "DONE",
        }
    }
}

/// Single-writer record owned by the state machine. Everything else sees it
/// through snapshots pushed into the API surface on each transition.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub phase: Phase,
    pub selected: Option<SelectedProject>,
    pub t0: Option<DateTime<Utc>>,
    pub t1: Option<DateTime<Utc>>,
    /// Net inflow snapshotted at `T1`; the buyback budget.
    pub tax_total: U256,
    pub start_balance: Option<U256>,
    pub last_tax_refresh: Option<DateTime<Utc>>,
    pub last_buyback_refresh: Option<DateTime<Utc>>,
}

impl LifecycleContext {
    pub fn new() -> Self {
        Self {
            phase: Phase::Discover,
            selected: None,
            t0: None,
            t1: None,
            tax_total: U256::ZERO,
            start_balance: None,
            last_tax_refresh: None,
            last_buyback_refresh: None,
        }
    }

    /// Clear everything but the phase; used on entry to `discover` and
    /// after `done`.
    pub fn reset(&mut self) {
        let phase = self.phase;
        *self = Self::new();
        self.phase = phase;
    }

    /// Bind a selected project: anchors `T0` and closes the window at
    /// `T1 = T0 + taxWindow`.
    pub fn set_project(&mut self, selected: SelectedProject, tax_window: std::time::Duration) {
        let t0 = selected.t0;
        let window =
            ChronoDuration::from_std(tax_window).unwrap_or_else(|_| ChronoDuration::minutes(100));
        self.t0 = Some(t0);
        self.t1 = Some(t0 + window);
        self.selected = Some(selected);
    }

    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.t0
            .map(|t0| ((now - t0).num_seconds().max(0)) / 60)
            .unwrap_or(0)
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.t1
            .map(|t1| ((t1 - now).num_seconds().max(0) + 59) / 60)
            .unwrap_or(0)
    }

    /// The inclusive fee-collection interval `[T0, T1]`.
    pub fn in_launch_window(&self, now: DateTime<Utc>) -> bool {
        match (self.t0, self.t1) {
            (Some(t0), Some(t1)) => now >= t0 && now <= t1,
            _ => false,
        }
    }
}

impl Default for LifecycleContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FactoryTag, PoolType, Project, ProjectStatus};
    use alloy_primitives::Address;
    use std::time::Duration;

    fn selected(t0: DateTime<Utc>) -> SelectedProject {
        SelectedProject {
            project: Project {
                id: 9,
                name: "Proj".into(),
                symbol: "PRJ".into(),
                factory: FactoryTag::BondingV2,
                status: ProjectStatus::Undergrad,
                pre_token_pair: Some(Address::repeat_byte(1)),
                lp_address: None,
                token_address: None,
                created_at: t0,
                launched_at: Some(t0),
                lp_created_at: None,
                mcap_in_virtual: None,
            },
            pool_address: Address::repeat_byte(1),
            pool_type: PoolType::Curve,
            t0,
        }
    }

    #[test]
    fn test_phase_wire_values() {
        for (phase, wire) in [
            (Phase::Discover, "\"DISCOVER\""),
            (Phase::WaitT0, "\"WAIT_T0\""),
            (Phase::LaunchWindow, "\"LAUNCH_WINDOW\""),
            (Phase::BuybackPhase, "\"BUYBACK_PHASE\""),
            (Phase::Done, "\"DONE\""),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), wire);
        }
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let mut ctx = LifecycleContext::new();
        ctx.set_project(selected(now), Duration::from_secs(100 * 60));

        assert!(ctx.in_launch_window(now));
        assert!(ctx.in_launch_window(now + ChronoDuration::minutes(100)));
        assert!(!ctx.in_launch_window(now + ChronoDuration::minutes(101)));
        assert_eq!(ctx.t1.unwrap() - ctx.t0.unwrap(), ChronoDuration::minutes(100));
    }

    #[test]
    fn test_elapsed_and_remaining() {
        let now = Utc::now();
        let mut ctx = LifecycleContext::new();
        ctx.set_project(selected(now - ChronoDuration::minutes(30)), Duration::from_secs(6000));

        assert_eq!(ctx.elapsed_minutes(now), 30);
        assert_eq!(ctx.remaining_minutes(now), 70);
        assert_eq!(ctx.remaining_minutes(now + ChronoDuration::minutes(200)), 0);
    }

    #[test]
    fn test_reset_keeps_phase() {
        let now = Utc::now();
        let mut ctx = LifecycleContext::new();
        ctx.phase = Phase::Done;
        ctx.set_project(selected(now), Duration::from_secs(6000));
        ctx.reset();

        assert_eq!(ctx.phase, Phase::Done);
        assert!(ctx.selected.is_none());
        assert!(ctx.t0.is_none());
        assert_eq!(ctx.tax_total, U256::ZERO);
    }
}
