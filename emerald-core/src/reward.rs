//! Reward visibility feedback.
//!
//! Each dispatch is labelled `visible`, `ev` or `none` by the first
//! command it produced. Consecutive non-visible dispatches form a drought;
//! at [`DROUGHT_ESCALATION`] the next prompt carries a directive to give the
//! player something they can see.

use crate::response::{Action, GmCall};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Labels retained for the prompt's reward history.
pub const REWARD_HISTORY: usize = 10;

/// Drought length at which the prompt escalates.
pub const DROUGHT_ESCALATION: u32 = 3;

/// Functions whose effect the player cannot see.
const INVISIBLE_FUNCTIONS: &[&str] = &["addEVs", "setFriendship"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardClass {
    None,
    Ev,
    Visible,
}

impl fmt::Display for RewardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RewardClass::None => "none",
            RewardClass::Ev => "ev",
            RewardClass::Visible => "visible",
        })
    }
}

fn classify_text(text: &str) -> RewardClass {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("none") {
        RewardClass::None
    } else if INVISIBLE_FUNCTIONS.iter().any(|f| text.contains(f)) {
        RewardClass::Ev
    } else {
        RewardClass::Visible
    }
}

pub fn classify_call(call: &GmCall) -> RewardClass {
    if INVISIBLE_FUNCTIONS.contains(&call.function.as_str()) {
        RewardClass::Ev
    } else {
        RewardClass::Visible
    }
}

/// Label for a whole dispatch, taken from its first action.
pub fn classify_actions(actions: &[Action]) -> RewardClass {
    match actions.first() {
        Some(Action::Call(call)) => classify_call(call),
        Some(Action::Shell(command)) => classify_text(command),
        None => RewardClass::None,
    }
}

/// Rolling reward labels plus the drought counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewardTracker {
    history: VecDeque<RewardClass>,
    drought: u32,
    visible_total: u32,
}

impl RewardTracker {
    pub fn record(&mut self, class: RewardClass) {
        if self.history.len() == REWARD_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(class);
        if class == RewardClass::Visible {
            self.drought = 0;
            self.visible_total += 1;
        } else {
            self.drought += 1;
        }
    }

    pub fn drought(&self) -> u32 {
        self.drought
    }

    pub fn visible_total(&self) -> u32 {
        self.visible_total
    }

    pub fn recorded(&self) -> usize {
        self.history.len()
    }

    pub fn history(&self) -> impl Iterator<Item = RewardClass> + '_ {
        self.history.iter().copied()
    }

    pub fn needs_visible_reward(&self) -> bool {
        self.drought >= DROUGHT_ESCALATION
    }
}
