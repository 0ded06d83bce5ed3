use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::types::{PoolType, Project, ProjectStatus, SelectedProject};

/// Inputs to the selection policy. `now` is passed in so the policy stays a
/// pure function of its arguments.
#[derive(Debug, Clone)]
pub struct SelectionParams {
    pub now: DateTime<Utc>,
    pub tax_window: std::time::Duration,
    pub preferred_symbol: Option<String>,
}

/// Pick the project to monitor from a merged candidate set.
///
/// 1. Keep `undergrad` candidates with a pre-launch pool and no AMM pool.
/// 2. Compute each candidate's anchor `T0`, dropping unusable timestamps.
/// 3. Prefer candidates whose tax window contains `now`, most recent `T0`
///    first; when none qualify the full set is ordered the same way.
/// 4. A preferred-ticker match wins inside the chosen set.
///
/// Deterministic: identical candidate sets always yield the same pick.
pub fn select_project(candidates: &[Project], params: &SelectionParams) -> Option<SelectedProject> {
    let window = ChronoDuration::from_std(params.tax_window).ok()?;

    let mut eligible: Vec<(&Project, DateTime<Utc>)> = candidates
        .iter()
        .filter(|p| {
            p.status == ProjectStatus::Undergrad
                && p.pre_token_pair.is_some()
                && p.lp_address.is_none()
        })
        .map(|p| (p, p.anchor_t0()))
        .filter(|(_, t0)| t0.timestamp() > 0)
        .collect();

    if eligible.is_empty() {
        return None;
    }

    eligible.sort_by(|a, b| b.1.cmp(&a.1));

    let in_window: Vec<&(&Project, DateTime<Utc>)> = eligible
        .iter()
        .filter(|(_, t0)| params.now >= *t0 && params.now <= *t0 + window)
        .collect();

    let chosen_set: Vec<&(&Project, DateTime<Utc>)> = if in_window.is_empty() {
        eligible.iter().collect()
    } else {
        in_window
    };

    let winner = params
        .preferred_symbol
        .as_deref()
        .and_then(|symbol| {
            chosen_set
                .iter()
                .find(|(p, _)| p.symbol.eq_ignore_ascii_case(symbol))
        })
        .or_else(|| chosen_set.first())?;

    let (project, t0) = (winner.0, winner.1);
    let pool_address = project.pre_token_pair?;

    Some(SelectedProject {
        project: project.clone(),
        pool_address,
        pool_type: PoolType::Curve,
        t0,
    })
}
