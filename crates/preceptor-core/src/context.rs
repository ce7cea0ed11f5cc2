//! Bounded conversation history for one session.

use std::collections::VecDeque;

use crate::types::{Role, Turn};

/// Ordered log of turns with FIFO eviction beyond a configured bound.
///
/// Append never fails: when the log is full the oldest turns are evicted
/// first, never the most recent. A bound of 0 means unbounded.
#[derive(Debug, Clone)]
pub struct ContextLog {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ContextLog {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns,
        }
    }

    /// Append one turn, evicting the oldest entries if the bound is exceeded.
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn::new(role, content));
        if self.max_turns > 0 {
            while self.turns.len() > self.max_turns {
                self.turns.pop_front();
            }
        }
    }

    /// All turns in creation order.
    pub fn render(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut log = ContextLog::new(10);
        log.append(Role::User, "first");
        log.append(Role::Assistant, "second");
        log.append(Role::User, "third");

        let turns = log.render();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "first");
        assert_eq!(turns[1].content, "second");
        assert_eq!(turns[2].content, "third");
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[test]
    fn test_eviction_drops_oldest_first() {
        let mut log = ContextLog::new(3);
        for i in 0..4 {
            log.append(Role::User, format!("turn-{i}"));
        }

        let turns = log.render();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "turn-1");
        assert_eq!(turns[2].content, "turn-3");
        assert_eq!(log.last().unwrap().content, "turn-3");
    }

    #[test]
    fn test_zero_bound_is_unbounded() {
        let mut log = ContextLog::new(0);
        for i in 0..200 {
            log.append(Role::User, format!("turn-{i}"));
        }
        assert_eq!(log.len(), 200);
        assert_eq!(log.render()[0].content, "turn-0");
    }
}
