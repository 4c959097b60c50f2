//! Rotation manager: turn order, one-shot override, and the turn-advance
//! rules. The turn only ever advances on an approval or on a pure miss at a
//! reset boundary — claims, disapprovals and resolver reads never move it.

use super::record::RotationState;

impl RotationState {
    /// Seeds a rotation from the definition's assignee order; the first
    /// assignee holds the opening turn.
    pub fn new(order: Vec<String>) -> Self {
        let turn = order.first().cloned();
        Self {
            order,
            turn,
            override_open: false,
        }
    }

    pub fn holder(&self) -> Option<&str> {
        self.turn.as_deref()
    }

    pub fn is_turn(&self, assignee: &str) -> bool {
        self.turn.as_deref() == Some(assignee)
    }

    /// Advances the turn after an approval.
    ///
    /// The turn moves to the assignee after `completer` in order — after a
    /// steal that is the stealer, not the original holder, so the skipped
    /// assignee is not rewarded with another immediate turn. Approval also
    /// closes any open override: the override is one-shot.
    pub fn advance_turn(&mut self, completer: &str) {
        self.override_open = false;
        self.turn = self.next_after(completer);
    }

    /// Advances the turn past the current holder after a pure miss at a
    /// reset boundary (nobody claimed, nobody completed).
    pub fn advance_after_miss(&mut self) {
        if let Some(holder) = self.turn.clone() {
            self.turn = self.next_after(&holder);
        }
    }

    /// Pins the turn to `assignee`. Returns `false` (and changes nothing)
    /// if the assignee is not part of the rotation.
    pub fn set_turn(&mut self, assignee: &str) -> bool {
        if self.order.iter().any(|a| a == assignee) {
            self.turn = Some(assignee.to_string());
            true
        } else {
            false
        }
    }

    /// Opens the one-shot override: everyone may act until the next
    /// approval closes it.
    pub fn open_override(&mut self) {
        self.override_open = true;
    }

    /// Re-seeds order and turn; clears any open override.
    pub fn reset(&mut self, order: Vec<String>) {
        *self = Self::new(order);
    }

    /// Drops an assignee from the rotation. If they held the turn, it is
    /// reassigned to the first remaining assignee.
    pub fn remove_assignee(&mut self, assignee: &str) {
        let Some(idx) = self.order.iter().position(|a| a == assignee) else {
            return;
        };
        let held_turn = self.is_turn(assignee);
        self.order.remove(idx);
        if held_turn {
            self.turn = self.order.first().cloned();
        }
    }

    /// The assignee after `completer` in order, wrapping. Falls back to the
    /// head of the order if the completer is no longer a member.
    fn next_after(&self, completer: &str) -> Option<String> {
        if self.order.is_empty() {
            return None;
        }
        match self.order.iter().position(|a| a == completer) {
            Some(idx) => Some(self.order[(idx + 1) % self.order.len()].clone()),
            None => self.order.first().cloned(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
