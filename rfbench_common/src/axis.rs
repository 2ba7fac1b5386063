//! Fixed axis set and per-axis motion state.
//!
//! The bench carries five motion axes. Every axis always has exactly one
//! [`AxisState`]; [`AxisStates`] stores them in a fixed array indexed by
//! [`Axis::index`], so there is no way to lose or duplicate an entry.

use crate::consts::AXIS_COUNT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A motion axis of the bench positioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Axis {
    /// Linear X stage.
    X,
    /// Linear Y stage.
    Y,
    /// Vertical stage. Has no reach sensor; polled through the all-axes home query.
    Z,
    /// Rotation about the vertical axis.
    Theta,
    /// Tilt.
    Phi,
}

impl Axis {
    /// All axes in poll order.
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::X, Axis::Y, Axis::Z, Axis::Theta, Axis::Phi];

    /// Position of this axis in [`Axis::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::Theta => 3,
            Axis::Phi => 4,
        }
    }

    /// Wire mnemonic used in instrument commands.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::Theta => "THETA",
            Axis::Phi => "PHI",
        }
    }

    /// Whether the poller substitutes a sentinel instead of querying reach.
    #[inline]
    pub const fn skips_reach_query(self) -> bool {
        matches!(self, Axis::Z)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Error returned when parsing an unknown axis name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown axis: {0:?}")]
pub struct AxisParseError(pub String);

impl FromStr for Axis {
    type Err = AxisParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Axis::ALL
            .into_iter()
            .find(|axis| axis.mnemonic().eq_ignore_ascii_case(name))
            .ok_or_else(|| AxisParseError(name.to_string()))
    }
}

impl TryFrom<String> for Axis {
    type Error = AxisParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Motion progress of a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AxisState {
    /// Nothing confirmed since startup.
    #[default]
    Unknown,
    /// Feed command issued, waiting for confirmation.
    Reaching,
    /// Feed confirmed; the axis sits at its operating position.
    Reached,
    /// Home command issued, waiting for confirmation.
    Homing,
    /// Home confirmed.
    Homed,
}

impl AxisState {
    /// Whether a command was issued and is not yet confirmed.
    #[inline]
    pub const fn is_moving(self) -> bool {
        matches!(self, AxisState::Reaching | AxisState::Homing)
    }
}

/// One [`AxisState`] per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AxisStates([AxisState; AXIS_COUNT]);

impl AxisStates {
    /// All axes `Unknown`.
    pub const fn new() -> Self {
        Self([AxisState::Unknown; AXIS_COUNT])
    }

    #[inline]
    pub fn get(&self, axis: Axis) -> AxisState {
        self.0[axis.index()]
    }

    #[inline]
    pub fn set(&mut self, axis: Axis, state: AxisState) {
        self.0[axis.index()] = state;
    }

    /// Iterate `(axis, state)` pairs in poll order.
    pub fn iter(&self) -> impl Iterator<Item = (Axis, AxisState)> + '_ {
        Axis::ALL.into_iter().map(move |axis| (axis, self.get(axis)))
    }

    /// Axes currently `Reached`, other than `axis`, in poll order.
    pub fn reached_except(&self, axis: Axis) -> Vec<Axis> {
        self.iter()
            .filter(|&(other, state)| other != axis && state == AxisState::Reached)
            .map(|(other, _)| other)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, axis) in Axis::ALL.into_iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("x".parse::<Axis>(), Ok(Axis::X));
        assert_eq!(" Theta ".parse::<Axis>(), Ok(Axis::Theta));
        assert_eq!("PHI".parse::<Axis>(), Ok(Axis::Phi));
        assert!(matches!("W".parse::<Axis>(), Err(AxisParseError(_))));
    }

    #[test]
    fn only_z_skips_reach() {
        let skipping: Vec<_> = Axis::ALL.into_iter().filter(|a| a.skips_reach_query()).collect();
        assert_eq!(skipping, vec![Axis::Z]);
    }

    #[test]
    fn serde_uses_mnemonics() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            axes: Vec<Axis>,
        }
        let text = toml::to_string(&Wrapper { axes: vec![Axis::Theta, Axis::X] }).unwrap();
        assert!(text.contains("\"THETA\""));
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.axes, vec![Axis::Theta, Axis::X]);

        let lower: Wrapper = toml::from_str("axes = [\"phi\", \"z\"]").unwrap();
        assert_eq!(lower.axes, vec![Axis::Phi, Axis::Z]);
        assert!(toml::from_str::<Wrapper>("axes = [\"W\"]").is_err());
    }

    #[test]
    fn reached_except_skips_requested_axis() {
        let mut states = AxisStates::new();
        states.set(Axis::X, AxisState::Reached);
        states.set(Axis::Phi, AxisState::Reached);
        states.set(Axis::Y, AxisState::Homing);

        assert_eq!(states.reached_except(Axis::X), vec![Axis::Phi]);
        assert_eq!(states.reached_except(Axis::Y), vec![Axis::X, Axis::Phi]);
        assert!(states.get(Axis::Y).is_moving());
        assert_eq!(states.get(Axis::Z), AxisState::Unknown);
    }
}
