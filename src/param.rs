//! Live Parameter Cells
//!
//! This module provides the storage and metadata types behind every
//! live-controllable quantity in the engine: a lock-free `f64` cell shared
//! between the node that reads it per sample and the registry that writes it
//! from the control context, a structural path naming it, and the hints a
//! control surface needs to render it.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Atomic Cell
// =============================================================================

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
/// A single-word store, so the audio context never observes a torn value.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Create a new atomic f64 with the given initial value
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Get the current value
    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set a new value
    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// Shared handle to a parameter value.
///
/// The node, filter or graph that exposes the quantity owns one clone and
/// reads it on the audio path; the registry holds another and writes it.
pub type ParamCell = Arc<AtomicF64>;

/// Allocate a new parameter cell.
pub fn cell(value: f64) -> ParamCell {
    Arc::new(AtomicF64::new(value))
}

// =============================================================================
// Parameter Path
// =============================================================================

/// Hierarchical parameter name, stored as ordered segments.
///
/// `["FM", "Carrier", "Sine", "Frequency"]` displays as
/// `"FM Carrier Sine Frequency"`. Consumers group by segment prefix instead of
/// matching substrings of the display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamPath(Vec<String>);

impl ParamPath {
    /// The empty path (top level of the registry)
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// A new path with one more segment appended
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Final segment (the parameter's own label)
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Path without its final segment
    pub fn parent(&self) -> ParamPath {
        let end = self.0.len().saturating_sub(1);
        Self(self.0[..end].to_vec())
    }

    /// Segment-wise prefix test. `["FM", "Carrier"]` is a prefix of
    /// `["FM", "Carrier", "Sine", "Frequency"]` but `["FM", "Car"]` is not.
    pub fn starts_with(&self, prefix: &ParamPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }

    /// Space-joined display name
    pub fn display_name(&self) -> String {
        self.0.join(" ")
    }
}

impl fmt::Display for ParamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl<S: Into<String>> FromIterator<S> for ParamPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_segments(iter)
    }
}

// =============================================================================
// Parameter Value Formatting
// =============================================================================

/// How to format parameter values for display
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ValueFormat {
    /// Decimal number with specified precision
    Decimal { places: u8 },
    /// Frequency in Hz/kHz
    Frequency,
    /// Time stored in milliseconds, shown as ms/s
    Milliseconds,
    /// Value already expressed in percent (0-100)
    Percent,
    /// Unit gain (0-1) shown as percent
    Gain,
}

impl Default for ValueFormat {
    fn default() -> Self {
        ValueFormat::Decimal { places: 2 }
    }
}

impl ValueFormat {
    /// Format a value according to this format specification
    pub fn format(&self, value: f64) -> String {
        match self {
            ValueFormat::Decimal { places } => {
                format!("{:.prec$}", value, prec = *places as usize)
            }
            ValueFormat::Frequency => {
                if value >= 1000.0 {
                    format!("{:.2} kHz", value / 1000.0)
                } else {
                    format!("{:.1} Hz", value)
                }
            }
            ValueFormat::Milliseconds => {
                if value >= 1000.0 {
                    format!("{:.2} s", value / 1000.0)
                } else {
                    format!("{:.0} ms", value)
                }
            }
            ValueFormat::Percent => format!("{:.0}%", value),
            ValueFormat::Gain => format!("{:.0}%", value * 100.0),
        }
    }
}

// =============================================================================
// Parameter Curve (Slider Scaling)
// =============================================================================

/// How a slider position (0-1) maps onto a parameter's [min, max]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ParamCurve {
    /// Linear interpolation between min and max
    #[default]
    Linear,
    /// Exponential scaling (good for frequency)
    Exponential,
}

impl ParamCurve {
    /// Apply the curve to a normalized (0-1) value, returning the actual value
    pub fn apply(&self, normalized: f64, min: f64, max: f64) -> f64 {
        let n = normalized.clamp(0.0, 1.0);
        match self {
            ParamCurve::Linear => min + n * (max - min),
            ParamCurve::Exponential => {
                if min <= 0.0 {
                    min + n * (max - min)
                } else {
                    min * libm::pow(max / min, n)
                }
            }
        }
    }

    /// Convert an actual value to normalized (0-1) based on this curve
    pub fn normalize(&self, value: f64, min: f64, max: f64) -> f64 {
        if (max - min).abs() < 1e-10 {
            return 0.0;
        }

        match self {
            ParamCurve::Exponential if min > 0.0 && value > 0.0 => {
                (libm::log(value / min) / libm::log(max / min)).clamp(0.0, 1.0)
            }
            _ => ((value - min) / (max - min)).clamp(0.0, 1.0),
        }
    }
}

// =============================================================================
// Parameter Spec
// =============================================================================

/// Description of a quantity a node exposes, before it is registered.
///
/// Built with the same chained style for every exposed knob:
///
/// ```
/// use lyre::param::{cell, ParamPath, ParamSpec};
///
/// let frequency = cell(440.0);
/// let spec = ParamSpec::frequency(ParamPath::from_segments(["Sine", "Frequency"]), frequency)
///     .with_range(1.0, 2000.0)
///     .with_step(20.0);
/// assert_eq!(spec.path.display_name(), "Sine Frequency");
/// ```
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub path: ParamPath,
    pub cell: ParamCell,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub curve: ParamCurve,
    pub format: ValueFormat,
    pub unit: Option<&'static str>,
}

impl ParamSpec {
    /// Create a new spec with a unit range and a 0.01 step
    pub fn new(path: ParamPath, cell: ParamCell) -> Self {
        Self {
            path,
            cell,
            min: 0.0,
            max: 1.0,
            step: 0.01,
            curve: ParamCurve::Linear,
            format: ValueFormat::default(),
            unit: None,
        }
    }

    /// Set the inclusive value range. Reversed bounds are swapped.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min.min(max);
        self.max = max.max(min);
        self
    }

    /// Set the increment/decrement step. Negative steps are made positive.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.abs();
        self
    }

    pub fn with_curve(mut self, curve: ParamCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Frequency parameter (Hz, exponential slider)
    pub fn frequency(path: ParamPath, cell: ParamCell) -> Self {
        Self::new(path, cell)
            .with_range(20.0, 20000.0)
            .with_step(10.0)
            .with_curve(ParamCurve::Exponential)
            .with_format(ValueFormat::Frequency)
            .with_unit("Hz")
    }

    /// Stage time in milliseconds
    pub fn milliseconds(path: ParamPath, cell: ParamCell) -> Self {
        Self::new(path, cell)
            .with_range(0.0, 2000.0)
            .with_step(10.0)
            .with_format(ValueFormat::Milliseconds)
            .with_unit("ms")
    }

    /// Level expressed in percent (0-100)
    pub fn percent(path: ParamPath, cell: ParamCell) -> Self {
        Self::new(path, cell)
            .with_range(0.0, 100.0)
            .with_step(5.0)
            .with_format(ValueFormat::Percent)
            .with_unit("%")
    }

    /// Unit gain (0-1)
    pub fn gain(path: ParamPath, cell: ParamCell) -> Self {
        Self::new(path, cell)
            .with_range(0.0, 1.0)
            .with_step(0.05)
            .with_format(ValueFormat::Gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f64_roundtrip() {
        let value = AtomicF64::new(440.0);
        assert_eq!(value.get(), 440.0);
        value.set(-0.25);
        assert_eq!(value.get(), -0.25);
        assert_eq!(value.clone().get(), -0.25);
    }

    #[test]
    fn test_shared_cell_is_aliased() {
        let owner = cell(1.0);
        let alias = Arc::clone(&owner);
        alias.set(2.5);
        assert_eq!(owner.get(), 2.5);
    }

    #[test]
    fn test_path_display_and_prefix() {
        let carrier = ParamPath::from_segments(["FM", "Carrier"]);
        let freq = carrier.child("Sine").child("Frequency");

        assert_eq!(freq.display_name(), "FM Carrier Sine Frequency");
        assert_eq!(freq.leaf(), Some("Frequency"));
        assert!(freq.starts_with(&carrier));
        assert!(!freq.starts_with(&ParamPath::from_segments(["FM", "Car"])));
        assert_eq!(freq.parent().display_name(), "FM Carrier Sine");
        assert!(ParamPath::root().parent().is_empty());
    }

    #[test]
    fn test_value_format() {
        assert_eq!(ValueFormat::Frequency.format(440.0), "440.0 Hz");
        assert_eq!(ValueFormat::Frequency.format(2500.0), "2.50 kHz");
        assert_eq!(ValueFormat::Milliseconds.format(250.0), "250 ms");
        assert_eq!(ValueFormat::Milliseconds.format(1500.0), "1.50 s");
        assert_eq!(ValueFormat::Percent.format(70.0), "70%");
        assert_eq!(ValueFormat::Gain.format(0.5), "50%");
        assert_eq!(ValueFormat::Decimal { places: 1 }.format(3.14159), "3.1");
    }

    #[test]
    fn test_param_curve_linear() {
        let curve = ParamCurve::Linear;
        assert!((curve.apply(0.5, 0.0, 100.0) - 50.0).abs() < 1e-9);
        assert!((curve.normalize(25.0, 0.0, 100.0) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_param_curve_exponential() {
        let curve = ParamCurve::Exponential;
        let mid = curve.apply(0.5, 20.0, 20000.0);
        let expected = (20.0_f64 * 20000.0).sqrt();
        assert!((mid - expected).abs() < 1e-6);
        assert!((curve.normalize(mid, 20.0, 20000.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_spec_builder_normalises_bounds() {
        let spec = ParamSpec::new(ParamPath::from_segments(["X"]), cell(0.0))
            .with_range(10.0, -10.0)
            .with_step(-2.0);
        assert_eq!(spec.min, -10.0);
        assert_eq!(spec.max, 10.0);
        assert_eq!(spec.step, 2.0);
    }
}
