//! Typed status samples.
//!
//! The poller visits one axis per tick, so a [`StatusSample`] carries a
//! readout slot for every axis but fills only the one it polled. The source
//! parameters rotate the same way: one of frequency, power or RF output per
//! tick.

use crate::axis::Axis;
use crate::consts::{AXIS_COUNT, CONFIRMATION_TOKEN};
use serde::Serialize;

/// Motion field of an axis readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionField {
    /// Feed position reached.
    Reach,
    /// Home position reached.
    Home,
}

/// Raw motion fields reported for one axis.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AxisReadout {
    pub reach: Option<String>,
    pub home: Option<String>,
    pub speed: Option<String>,
}

impl AxisReadout {
    /// Raw text of a motion field, if it was read.
    pub fn field(&self, field: MotionField) -> Option<&str> {
        match field {
            MotionField::Reach => self.reach.as_deref(),
            MotionField::Home => self.home.as_deref(),
        }
    }

    /// Whether `field` carries the confirmation token.
    pub fn confirms(&self, field: MotionField) -> bool {
        self.field(field).is_some_and(contains_confirmation)
    }
}

/// Whether `text` contains the confirmation token as a whole word.
///
/// Matching is by token so replies such as `NOK` never confirm.
pub fn contains_confirmation(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(CONFIRMATION_TOKEN))
}

/// Signal source parameter polled in rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceParam {
    Frequency,
    Power,
    RfOutput,
}

impl SourceParam {
    /// Rotation order.
    pub const ROTATION: [SourceParam; 3] =
        [SourceParam::Frequency, SourceParam::Power, SourceParam::RfOutput];

    /// Parameter polled on tick `tick`.
    pub fn for_tick(tick: u64) -> Self {
        Self::ROTATION[(tick % Self::ROTATION.len() as u64) as usize]
    }
}

/// Raw signal source fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceReadout {
    pub frequency: Option<String>,
    pub power: Option<String>,
    pub rf_output: Option<String>,
}

impl SourceReadout {
    /// Readout with a single parameter filled in.
    pub fn single(param: SourceParam, value: Option<String>) -> Self {
        let mut readout = Self::default();
        match param {
            SourceParam::Frequency => readout.frequency = value,
            SourceParam::Power => readout.power = value,
            SourceParam::RfOutput => readout.rf_output = value,
        }
        readout
    }

    pub fn get(&self, param: SourceParam) -> Option<&str> {
        match param {
            SourceParam::Frequency => self.frequency.as_deref(),
            SourceParam::Power => self.power.as_deref(),
            SourceParam::RfOutput => self.rf_output.as_deref(),
        }
    }
}

/// One poll tick worth of instrument status. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSample {
    tick: u64,
    axis: Axis,
    axes: [Option<AxisReadout>; AXIS_COUNT],
    source: SourceReadout,
}

impl StatusSample {
    /// Sample for tick `tick` that polled `axis`.
    pub fn new(tick: u64, axis: Axis, readout: AxisReadout, source: SourceReadout) -> Self {
        let mut axes: [Option<AxisReadout>; AXIS_COUNT] = Default::default();
        axes[axis.index()] = Some(readout);
        Self { tick, axis, axes, source }
    }

    /// Poll tick index that produced this sample.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Axis visited on this tick.
    #[inline]
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Motion readout for `axis`, if this sample polled it.
    pub fn readout(&self, axis: Axis) -> Option<&AxisReadout> {
        self.axes[axis.index()].as_ref()
    }

    #[inline]
    pub fn source(&self) -> &SourceReadout {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readout(reach: &str, home: &str) -> AxisReadout {
        AxisReadout {
            reach: Some(reach.into()),
            home: Some(home.into()),
            speed: None,
        }
    }

    #[test]
    fn confirmation_is_token_based() {
        assert!(contains_confirmation("OK"));
        assert!(contains_confirmation(" ok\r"));
        assert!(contains_confirmation("X:OK"));
        assert!(!contains_confirmation("NOK"));
        assert!(!contains_confirmation("BROKEN"));
        assert!(!contains_confirmation(""));
    }

    #[test]
    fn readout_confirms_matching_field_only() {
        let r = readout("OK", "MOVING");
        assert!(r.confirms(MotionField::Reach));
        assert!(!r.confirms(MotionField::Home));
        assert!(!AxisReadout::default().confirms(MotionField::Reach));
    }

    #[test]
    fn source_rotation_follows_tick_modulo_three() {
        let params: Vec<_> = (0..6).map(SourceParam::for_tick).collect();
        assert_eq!(
            params,
            vec![
                SourceParam::Frequency,
                SourceParam::Power,
                SourceParam::RfOutput,
                SourceParam::Frequency,
                SourceParam::Power,
                SourceParam::RfOutput,
            ]
        );
    }

    #[test]
    fn sample_fills_only_polled_axis() {
        let sample = StatusSample::new(
            7,
            Axis::Theta,
            readout("OK", "NO"),
            SourceReadout::single(SourceParam::Power, Some("-10.0".into())),
        );
        assert_eq!(sample.tick(), 7);
        assert_eq!(sample.axis(), Axis::Theta);
        assert!(sample.readout(Axis::Theta).is_some());
        assert!(sample.readout(Axis::X).is_none());
        assert_eq!(sample.source().get(SourceParam::Power), Some("-10.0"));
        assert_eq!(sample.source().frequency, None);
    }
}
