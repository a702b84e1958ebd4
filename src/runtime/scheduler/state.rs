//! Run-state and condition tables for stateful tasks.
//!
//! Every task layer owns a contiguous block of run states. The first state of a
//! layer equals the `STATE_END` of the layer it is built on, so derived task
//! types can keep adding states without ever colliding with their base:
//!
//! ```text
//!   Task            [0, TASK_STATE_END)                       (empty)
//!   CharacteristicRange      [TASK_STATE_END, RANGE_STATE_END)
//!   UserCharacteristic                [RANGE_STATE_END, ...)
//! ```
//!
//! A layer is a `#[repr(u32)]` enum plus a `(variant, name)` table. The table
//! gives lookups in both directions and is what tests check for contiguity.

use std::fmt;

/// The numeric run state of a task.
pub type StateType = u32;

/// A bitmask of conditions a task can wait on.
pub type Condition = u32;

/// The base task reserves no run states of its own.
pub const TASK_STATE_END: StateType = 0;

/// One layer of run states.
pub trait StateLayer: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Name of the task layer, used in log output.
    const LAYER: &'static str;

    /// First state of this layer; the `STATE_END` of the base layer.
    const BEGIN: StateType;

    /// All states of this layer in declaration order.
    const TABLE: &'static [(Self, &'static str)];

    /// One beyond the largest state of this layer.
    const END: StateType = Self::BEGIN + Self::TABLE.len() as StateType;

    /// The numeric value of this state.
    fn state(self) -> StateType;

    /// Map a numeric state back onto this layer, if it belongs here.
    fn from_state(state: StateType) -> Option<Self> {
        if !(Self::BEGIN..Self::END).contains(&state) {
            return None;
        }
        Some(Self::TABLE[(state - Self::BEGIN) as usize].0)
    }

    /// The human readable name of this state.
    fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(s, _)| *s == self)
            .map(|(_, n)| *n)
            .unwrap_or("<unlisted>")
    }

    /// Find a state of this layer by name.
    fn lookup(name: &str) -> Option<Self> {
        Self::TABLE.iter().find(|(_, n)| *n == name).map(|(s, _)| *s)
    }

    /// Name of a numeric state when it belongs to this layer.
    fn name_of(state: StateType) -> Option<&'static str> {
        Self::from_state(state).map(Self::name)
    }
}

/// Check that a layer is contiguous and starts at `base_end`.
///
/// Returns a description of the first violation.
pub fn check_layer<L: StateLayer>(base_end: StateType) -> Result<(), String> {
    if L::BEGIN != base_end {
        return Err(format!(
            "{}: first state is {} but the base layer ends at {}",
            L::LAYER,
            L::BEGIN,
            base_end
        ));
    }
    for (offset, (state, name)) in L::TABLE.iter().enumerate() {
        let expected = L::BEGIN + offset as StateType;
        if state.state() != expected {
            return Err(format!(
                "{}: state {} has value {} but should be {}",
                L::LAYER,
                name,
                state.state(),
                expected
            ));
        }
        if L::lookup(name) != Some(*state) {
            return Err(format!("{}: duplicate state name {}", L::LAYER, name));
        }
    }
    Ok(())
}

/// A table of condition bits and their names.
#[derive(Debug, Clone, Copy)]
pub struct ConditionTable {
    entries: &'static [(Condition, &'static str)],
}

impl ConditionTable {
    pub const fn new(entries: &'static [(Condition, &'static str)]) -> Self {
        Self { entries }
    }

    pub fn name(
        &self,
        condition: Condition,
    ) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == condition)
            .map(|(_, n)| *n)
    }

    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<Condition> {
        self.entries.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
    }

    pub fn entries(&self) -> &'static [(Condition, &'static str)] {
        self.entries
    }

    /// Render a mask as `a|b|0x40`.
    pub fn describe(
        &self,
        mask: Condition,
    ) -> String {
        if mask == 0 {
            return "0".to_string();
        }
        let mut parts = Vec::new();
        let mut rest = mask;
        for (bit, name) in self.entries {
            if rest & bit != 0 {
                parts.push((*name).to_string());
                rest &= !bit;
            }
        }
        if rest != 0 {
            parts.push(format!("{:#x}", rest));
        }
        parts.join("|")
    }
}
