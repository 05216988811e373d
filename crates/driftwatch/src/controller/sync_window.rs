//! Time-window gating of plan and apply actions.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use glob::Pattern;

use crate::resource::{Action, SyncWindow, WindowKind};

/// Why an action is currently held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    InsideDenyWindow,
    OutsideAllowWindow,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::InsideDenyWindow => write!(f, "inside a deny window"),
            BlockReason::OutsideAllowWindow => write!(f, "outside every allow window"),
        }
    }
}

/// Decides whether `action` on `layer_name` is blocked at `now`.
///
/// A covering deny window always blocks. Otherwise, if any allow window
/// applies to this action and layer, one of them must cover `now`. No
/// applicable window means the action is unrestricted.
pub fn is_sync_blocked(
    windows: &[SyncWindow],
    action: Action,
    layer_name: &str,
    now: DateTime<Utc>,
) -> Option<BlockReason> {
    let mut has_allow = false;
    let mut inside_allow = false;

    for window in windows
        .iter()
        .filter(|w| applies_to(w, action, layer_name))
    {
        if let Err(reason) = validate_window(window) {
            log::warn!("Ignoring malformed {:?} sync window: {}", window.kind, reason);
            continue;
        }
        let covering = covers(window, now);
        match window.kind {
            WindowKind::Deny if covering => return Some(BlockReason::InsideDenyWindow),
            WindowKind::Deny => {}
            WindowKind::Allow => {
                has_allow = true;
                inside_allow |= covering;
            }
        }
    }

    if has_allow && !inside_allow {
        Some(BlockReason::OutsideAllowWindow)
    } else {
        None
    }
}

fn applies_to(window: &SyncWindow, action: Action, layer_name: &str) -> bool {
    let action_matches = window.actions.is_empty() || window.actions.contains(&action);
    let layer_matches = window.layers.is_empty()
        || window.layers.iter().any(|pattern| {
            Pattern::new(pattern)
                .map(|p| p.matches(layer_name))
                .unwrap_or(false)
        });
    action_matches && layer_matches
}

/// Returns true if the window is open at `now`. The end time is
/// exclusive; `start == end` keeps the window open for the full 24 hours
/// following `start`.
pub fn covers(window: &SyncWindow, now: DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (parse_time(&window.start), parse_time(&window.end)) else {
        return false;
    };
    let time = now.time();
    let today = now.weekday();

    if start < end {
        return on_day(window, today) && time >= start && time < end;
    }

    // Runs past midnight: the evening part belongs to today, the morning
    // part to the window opened yesterday
    let yesterday = (now - Duration::days(1)).weekday();
    (on_day(window, today) && time >= start) || (on_day(window, yesterday) && time < end)
}

fn on_day(window: &SyncWindow, day: Weekday) -> bool {
    window.days.is_empty() || window.days.contains(&day)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// Checks the times and layer patterns of a window.
pub fn validate_window(window: &SyncWindow) -> Result<(), String> {
    for (field, value) in [("start", &window.start), ("end", &window.end)] {
        if parse_time(value).is_none() {
            return Err(format!("{} '{}' is not a valid HH:MM time", field, value));
        }
    }
    for pattern in &window.layers {
        Pattern::new(pattern)
            .map_err(|e| format!("invalid layer pattern '{}': {}", pattern, e))?;
    }
    Ok(())
}
