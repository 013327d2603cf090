//! Per-UE handover history and ping-pong pattern queries.
//!
//! The tracker records every *applied* handover. Three query families feed
//! the engine's suppression layer: rate within a rolling window, time since
//! the last handover, and immediate-return detection (the UE heading back
//! to a cell it touched within the ping-pong window).

use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Events older than this are pruned from the per-UE log. Far beyond the
/// largest query window (60 s rate window, 10 s ping-pong window).
const LOG_HORIZON_S: f64 = 600.0;

fn default_min_interval() -> f64 {
    2.0
}
fn default_max_per_minute() -> u32 {
    3
}
fn default_window() -> f64 {
    10.0
}
fn default_confidence_boost() -> f64 {
    0.9
}
fn default_immediate_return_confidence() -> f64 {
    0.95
}
fn default_history_len() -> usize {
    8
}

/// Suppression-layer thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct PingPongConfig {
    /// Minimum seconds between consecutive handovers.
    #[serde(default = "default_min_interval")]
    pub min_handover_interval_s: f64,
    /// Maximum applied handovers inside the 60 s rate window.
    #[serde(default = "default_max_per_minute")]
    pub max_handovers_per_minute: u32,
    /// Window for immediate-return detection.
    #[serde(default = "default_window")]
    pub window_s: f64,
    /// Confidence at or above which rate/interval suppression is bypassed.
    #[serde(default = "default_confidence_boost")]
    pub confidence_boost: f64,
    /// Confidence at or above which an immediate return is allowed.
    #[serde(default = "default_immediate_return_confidence")]
    pub immediate_return_confidence: f64,
    /// Length of the recent-destination history. Raise for long ping-pong
    /// analyses.
    #[serde(default = "default_history_len")]
    pub history_len: usize,
}

impl Default for PingPongConfig {
    fn default() -> Self {
        Self {
            min_handover_interval_s: default_min_interval(),
            max_handovers_per_minute: default_max_per_minute(),
            window_s: default_window(),
            confidence_boost: default_confidence_boost(),
            immediate_return_confidence: default_immediate_return_confidence(),
            history_len: default_history_len(),
        }
    }
}

#[derive(Debug, Clone)]
struct AppliedHandover {
    t: f64,
    from: Option<String>,
    to: String,
}

#[derive(Debug, Default)]
struct UeHistory {
    events: VecDeque<AppliedHandover>,
    last_timestamp: Option<f64>,
    /// Most-recent-first distinct destinations.
    recent_cells: VecDeque<String>,
}

/// Tracks applied handovers per UE.
pub struct PingPongTracker {
    histories: Mutex<HashMap<String, UeHistory>>,
    history_len: usize,
}

impl PingPongTracker {
    pub fn new(history_len: usize) -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            history_len: history_len.max(1),
        }
    }

    /// Record an applied handover at simulation time `t`.
    pub fn record(&self, ue_id: &str, from: Option<&str>, to: &str, t: f64) {
        let mut histories = self.histories.lock().unwrap();
        let history = histories.entry(ue_id.to_string()).or_default();

        while let Some(front) = history.events.front() {
            if t - front.t > LOG_HORIZON_S {
                history.events.pop_front();
            } else {
                break;
            }
        }

        history.events.push_back(AppliedHandover {
            t,
            from: from.map(str::to_string),
            to: to.to_string(),
        });
        history.last_timestamp = Some(t);

        history.recent_cells.retain(|c| c != to);
        history.recent_cells.push_front(to.to_string());
        while history.recent_cells.len() > self.history_len {
            history.recent_cells.pop_back();
        }
    }

    /// Count of applied handovers with timestamp in `[now - window_s, now]`.
    pub fn handovers_in_window(&self, ue_id: &str, now: f64, window_s: f64) -> u32 {
        let histories = self.histories.lock().unwrap();
        match histories.get(ue_id) {
            Some(history) => history
                .events
                .iter()
                .filter(|e| e.t >= now - window_s && e.t <= now)
                .count() as u32,
            None => 0,
        }
    }

    /// Seconds since the last applied handover, or infinity if none.
    pub fn time_since_last(&self, ue_id: &str, now: f64) -> f64 {
        let histories = self.histories.lock().unwrap();
        histories
            .get(ue_id)
            .and_then(|h| h.last_timestamp)
            .map_or(f64::INFINITY, |t| now - t)
    }

    /// True when `candidate` was touched by an applied handover inside the
    /// window (as the cell left or the cell entered) and is not the
    /// most-recent destination; allowing it would return the UE to a cell
    /// it just moved away from.
    pub fn immediate_pingpong(&self, ue_id: &str, candidate: &str, now: f64, window_s: f64) -> bool {
        let histories = self.histories.lock().unwrap();
        let Some(history) = histories.get(ue_id) else {
            return false;
        };
        if history.recent_cells.front().map(String::as_str) == Some(candidate) {
            return false;
        }
        history.events.iter().any(|e| {
            e.t >= now - window_s
                && (e.to == candidate || e.from.as_deref() == Some(candidate))
        })
    }

    /// Up to `n` most recent distinct destinations, most-recent-first.
    pub fn recent_cells(&self, ue_id: &str, n: usize) -> Vec<String> {
        let histories = self.histories.lock().unwrap();
        histories
            .get(ue_id)
            .map(|h| h.recent_cells.iter().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all history for a UE (on removal).
    pub fn remove_ue(&self, ue_id: &str) {
        self.histories.lock().unwrap().remove(ue_id);
    }

    pub fn reset(&self) {
        self.histories.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_reports_infinity_and_zero() {
        let tracker = PingPongTracker::new(8);
        assert_eq!(tracker.time_since_last("ue001", 100.0), f64::INFINITY);
        assert_eq!(tracker.handovers_in_window("ue001", 100.0, 60.0), 0);
        assert!(!tracker.immediate_pingpong("ue001", "a1", 100.0, 10.0));
    }

    #[test]
    fn window_count_is_exact_and_inclusive() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 10.0);
        tracker.record("ue001", Some("a2"), "a3", 40.0);
        tracker.record("ue001", Some("a3"), "a1", 70.0);
        // At t=70, window [10, 70] includes all three (inclusive boundary).
        assert_eq!(tracker.handovers_in_window("ue001", 70.0, 60.0), 3);
        // At t=71, the t=10 event falls out.
        assert_eq!(tracker.handovers_in_window("ue001", 71.0, 60.0), 2);
    }

    #[test]
    fn detects_return_to_recently_left_cell() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 2.0);
        // Returning to a1 (left 2 s ago) is a ping-pong...
        assert!(tracker.immediate_pingpong("ue001", "a1", 4.0, 10.0));
        // ...but after the window expires it is not.
        assert!(!tracker.immediate_pingpong("ue001", "a1", 13.0, 10.0));
    }

    #[test]
    fn most_recent_destination_is_not_a_pingpong_target() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 2.0);
        assert!(!tracker.immediate_pingpong("ue001", "a2", 3.0, 10.0));
    }

    #[test]
    fn chain_return_to_intermediate_cell_is_detected() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 1.0);
        tracker.record("ue001", Some("a2"), "a3", 3.0);
        // a2 was both entered and left within the window.
        assert!(tracker.immediate_pingpong("ue001", "a2", 5.0, 10.0));
    }

    #[test]
    fn time_since_last_tracks_latest_event() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 5.0);
        tracker.record("ue001", Some("a2"), "a1", 9.0);
        assert_eq!(tracker.time_since_last("ue001", 12.0), 3.0);
    }

    #[test]
    fn recent_cells_are_distinct_most_recent_first_and_bounded() {
        let tracker = PingPongTracker::new(3);
        for (i, cell) in ["a1", "a2", "a3", "a1", "a4"].iter().enumerate() {
            tracker.record("ue001", None, cell, i as f64);
        }
        assert_eq!(tracker.recent_cells("ue001", 8), vec!["a4", "a1", "a3"]);
    }

    #[test]
    fn histories_are_per_ue() {
        let tracker = PingPongTracker::new(8);
        tracker.record("ue001", Some("a1"), "a2", 5.0);
        assert_eq!(tracker.handovers_in_window("ue002", 5.0, 60.0), 0);
        assert_eq!(tracker.time_since_last("ue002", 5.0), f64::INFINITY);
    }
}
