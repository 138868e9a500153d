//! Per-project focus tracking.
//!
//! Each project has an ordered set of focused session ids, oldest focus
//! first. The set is bounded: focusing a session not already in a full set
//! evicts the least-recently-focused entry. Re-focusing a member refreshes
//! its recency. The ordered set drives "which sessions should the UI
//! currently stream".

use std::collections::{HashMap, VecDeque};

/// Tracks the bounded, ordered focused set for every project.
#[derive(Debug)]
pub struct FocusCoordinator {
    max_focused: usize,
    by_project: HashMap<String, VecDeque<String>>,
}

impl FocusCoordinator {
    pub fn new(max_focused: usize) -> Self {
        Self {
            max_focused,
            by_project: HashMap::new(),
        }
    }

    /// Focus a session. Returns the id evicted to make room, if any.
    ///
    /// Eviction is silent policy, not an error: the least-recently-focused
    /// member is dropped when a new id would exceed the cap.
    pub fn focus(&mut self, project_id: &str, session_id: &str) -> Option<String> {
        let set = self.by_project.entry(project_id.to_string()).or_default();

        if let Some(pos) = set.iter().position(|id| id == session_id) {
            // Already focused — refresh recency.
            set.remove(pos);
            set.push_back(session_id.to_string());
            return None;
        }

        let evicted = if set.len() >= self.max_focused {
            set.pop_front()
        } else {
            None
        };
        set.push_back(session_id.to_string());
        evicted
    }

    /// Remove a session from its project's focused set. Returns whether it
    /// was a member.
    pub fn unfocus(&mut self, project_id: &str, session_id: &str) -> bool {
        let Some(set) = self.by_project.get_mut(project_id) else {
            return false;
        };
        let Some(pos) = set.iter().position(|id| id == session_id) else {
            return false;
        };
        set.remove(pos);
        if set.is_empty() {
            self.by_project.remove(project_id);
        }
        true
    }

    /// Ordered focused session ids for a project (oldest focus first).
    pub fn focused(&self, project_id: &str) -> Vec<String> {
        self.by_project
            .get(project_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all focus state for a project (project teardown).
    pub fn remove_project(&mut self, project_id: &str) {
        self.by_project.remove(project_id);
    }
}
