//! Parameter Registry
//!
//! The registry is the live-binding catalogue a control surface talks to. It
//! never owns parameter storage: each entry holds a clone of the
//! [`ParamCell`] the exposing node reads, plus bounds, step and an optional
//! recomputation hook. Entries keep their registration order, which is the
//! stable index used by index-based access.
//!
//! Every committed write is clamped into `[min, max]` before the hook fires,
//! and the hook fires exactly once per write. Unknown indices, names and
//! stale ids are silent no-ops that return `None`.

use crate::param::{ParamCell, ParamCurve, ParamPath, ParamSpec, ValueFormat};
use slotmap::{new_key_type, SlotMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

new_key_type! {
    /// Generational handle to a registry entry. Invalidated by [`ParamRegistry::clear`].
    pub struct ParamId;
}

/// Callback invoked after a committed write, used to re-derive dependent state
pub type ParamHook = Arc<dyn Fn() + Send + Sync>;

/// A registered, live-controllable quantity
pub struct ParamEntry {
    path: ParamPath,
    name: String,
    cell: ParamCell,
    min: f64,
    max: f64,
    step: f64,
    curve: ParamCurve,
    format: ValueFormat,
    unit: Option<&'static str>,
    hook: Option<ParamHook>,
}

impl ParamEntry {
    fn from_spec(spec: ParamSpec, hook: Option<ParamHook>) -> Self {
        Self {
            name: spec.path.display_name(),
            path: spec.path,
            cell: spec.cell,
            min: spec.min,
            max: spec.max,
            step: spec.step,
            curve: spec.curve,
            format: spec.format,
            unit: spec.unit,
            hook,
        }
    }

    /// Structural path of the parameter
    pub fn path(&self) -> &ParamPath {
        &self.path
    }

    /// Display name, e.g. `"FM Carrier Sine Frequency"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value of the bound cell
    pub fn value(&self) -> f64 {
        self.cell.get()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn curve(&self) -> ParamCurve {
        self.curve
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.unit
    }

    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Current value rendered with the entry's display format
    pub fn display_value(&self) -> String {
        self.format.format(self.value())
    }

    /// Current value mapped onto a 0-1 slider position
    pub fn normalized(&self) -> f64 {
        self.curve.normalize(self.value(), self.min, self.max)
    }

    /// Clamp, store and notify. Returns the stored value, or `None` for NaN.
    fn commit(&self, value: f64) -> Option<f64> {
        if value.is_nan() {
            return None;
        }
        let clamped = value.clamp(self.min, self.max);
        self.cell.set(clamped);
        if let Some(hook) = &self.hook {
            hook();
        }
        debug!(param = %self.name, value = clamped, "parameter set");
        Some(clamped)
    }
}

impl fmt::Debug for ParamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamEntry")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("min", &self.min)
            .field("max", &self.max)
            .field("step", &self.step)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Ordered catalogue of live parameters
#[derive(Debug, Default)]
pub struct ParamRegistry {
    entries: SlotMap<ParamId, ParamEntry>,
    order: Vec<ParamId>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter without a recomputation hook
    pub fn register(&mut self, spec: ParamSpec) -> ParamId {
        self.insert(spec, None)
    }

    /// Register a parameter whose writes must re-derive dependent state
    pub fn register_with_hook(&mut self, spec: ParamSpec, hook: ParamHook) -> ParamId {
        self.insert(spec, Some(hook))
    }

    fn insert(&mut self, spec: ParamSpec, hook: Option<ParamHook>) -> ParamId {
        let id = self.entries.insert(ParamEntry::from_spec(spec, hook));
        self.order.push(id);
        id
    }

    /// Drop every entry. Previously issued ids become stale.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entry at a registration index
    pub fn get(&self, index: usize) -> Option<&ParamEntry> {
        self.order.get(index).and_then(|id| self.entries.get(*id))
    }

    /// Entry by handle
    pub fn entry(&self, id: ParamId) -> Option<&ParamEntry> {
        self.entries.get(id)
    }

    pub fn id_at(&self, index: usize) -> Option<ParamId> {
        self.order.get(index).copied()
    }

    /// Index of the first entry whose display name matches exactly
    pub fn find(&self, name: &str) -> Option<usize> {
        self.order
            .iter()
            .position(|id| self.entries.get(*id).is_some_and(|e| e.name == name))
    }

    /// Index of the entry with exactly this path
    pub fn find_path(&self, path: &ParamPath) -> Option<usize> {
        self.order
            .iter()
            .position(|id| self.entries.get(*id).is_some_and(|e| &e.path == path))
    }

    /// Current value by display name
    pub fn value(&self, name: &str) -> Option<f64> {
        self.find(name).and_then(|i| self.get(i)).map(ParamEntry::value)
    }

    /// All entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ParamEntry)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(*id))
            .enumerate()
    }

    /// Entries whose path begins with `prefix`, segment-wise
    pub fn group<'a>(
        &'a self,
        prefix: &'a ParamPath,
    ) -> impl Iterator<Item = (usize, &'a ParamEntry)> + 'a {
        self.iter().filter(move |(_, e)| e.path.starts_with(prefix))
    }

    /// Distinct top-level path segments, in first-seen order
    pub fn top_level_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for (_, entry) in self.iter() {
            if let Some(first) = entry.path.segments().first() {
                if !groups.contains(&first.as_str()) {
                    groups.push(first.as_str());
                }
            }
        }
        groups
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set by index. Returns the clamped value actually stored.
    pub fn set(&self, index: usize, value: f64) -> Option<f64> {
        self.get(index)?.commit(value)
    }

    pub fn set_by_id(&self, id: ParamId, value: f64) -> Option<f64> {
        self.entries.get(id)?.commit(value)
    }

    pub fn set_by_name(&self, name: &str, value: f64) -> Option<f64> {
        self.set(self.find(name)?, value)
    }

    /// Raise by one step, clamped at max
    pub fn increment(&self, index: usize) -> Option<f64> {
        let entry = self.get(index)?;
        entry.commit(entry.value() + entry.step)
    }

    /// Lower by one step, clamped at min
    pub fn decrement(&self, index: usize) -> Option<f64> {
        let entry = self.get(index)?;
        entry.commit(entry.value() - entry.step)
    }

    pub fn increment_by_name(&self, name: &str) -> Option<f64> {
        self.increment(self.find(name)?)
    }

    pub fn decrement_by_name(&self, name: &str) -> Option<f64> {
        self.decrement(self.find(name)?)
    }

    /// Slider position of the entry at `index`
    pub fn normalized(&self, index: usize) -> Option<f64> {
        self.get(index).map(ParamEntry::normalized)
    }

    /// Set from a 0-1 slider position, through the entry's curve
    pub fn set_normalized(&self, index: usize, normalized: f64) -> Option<f64> {
        let entry = self.get(index)?;
        entry.commit(entry.curve.apply(normalized, entry.min, entry.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec(name: &str, value: f64, min: f64, max: f64, step: f64) -> (ParamSpec, ParamCell) {
        let c = cell(value);
        let spec = ParamSpec::new(ParamPath::from_segments(name.split(' ')), c.clone())
            .with_range(min, max)
            .with_step(step);
        (spec, c)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ParamRegistry::new();
        let (a, _) = spec("Sine Frequency", 440.0, 1.0, 2000.0, 20.0);
        let (b, _) = spec("Master Volume", 0.7, 0.0, 1.0, 0.05);
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("Master Volume"), Some(1));
        assert_eq!(registry.get(0).map(|e| e.name()), Some("Sine Frequency"));
        assert_eq!(registry.value("Sine Frequency"), Some(440.0));
    }

    #[test]
    fn test_out_of_range_write_clamps_and_fires_hook_once() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Cutoff", 1000.0, 20.0, 8000.0, 100.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.register_with_hook(
            s,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(registry.set(0, 1e6), Some(8000.0));
        assert_eq!(c.get(), 8000.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert_eq!(registry.set(0, -5.0), Some(20.0));
        assert_eq!(c.get(), 20.0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_hook_observes_clamped_value() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Q", 1.0, 0.1, 10.0, 0.1);
        let seen = cell(0.0);
        let (observed, source) = (seen.clone(), c.clone());
        registry.register_with_hook(s, Arc::new(move || observed.set(source.get())));

        registry.set(0, 99.0);
        assert_eq!(seen.get(), 10.0);
    }

    #[test]
    fn test_increment_decrement_clamp() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Depth", 990.0, 0.0, 1000.0, 20.0);
        registry.register(s);

        assert_eq!(registry.increment(0), Some(1000.0));
        assert_eq!(registry.increment_by_name("Depth"), Some(1000.0));
        assert_eq!(registry.decrement(0), Some(980.0));
        c.set(10.0);
        assert_eq!(registry.decrement_by_name("Depth"), Some(0.0));
    }

    #[test]
    fn test_unknown_targets_are_noops() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Amplitude", 0.5, 0.0, 1.0, 0.05);
        registry.register(s);

        assert_eq!(registry.set(7, 1.0), None);
        assert_eq!(registry.set_by_name("Nope", 1.0), None);
        assert_eq!(registry.increment(3), None);
        assert_eq!(registry.set(0, f64::NAN), None);
        assert_eq!(c.get(), 0.5);
    }

    #[test]
    fn test_clear_invalidates_ids() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Amplitude", 0.5, 0.0, 1.0, 0.05);
        let id = registry.register(s);
        assert_eq!(registry.set_by_id(id, 0.25), Some(0.25));

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.set_by_id(id, 1.0), None);
        assert_eq!(c.get(), 0.25);
    }

    #[test]
    fn test_group_by_path_prefix() {
        let mut registry = ParamRegistry::new();
        for name in [
            "FM Modulation Depth",
            "FM Carrier Sine Frequency",
            "FM Modulator Sine Frequency",
            "Master Volume",
        ] {
            registry.register(spec(name, 0.0, 0.0, 1.0, 0.1).0);
        }

        let carrier = ParamPath::from_segments(["FM", "Carrier"]);
        let names: Vec<&str> = registry.group(&carrier).map(|(_, e)| e.name()).collect();
        assert_eq!(names, vec!["FM Carrier Sine Frequency"]);

        let fm = ParamPath::from_segments(["FM"]);
        assert_eq!(registry.group(&fm).count(), 3);
        assert_eq!(registry.top_level_groups(), vec!["FM", "Master"]);
    }

    #[test]
    fn test_normalized_access() {
        let mut registry = ParamRegistry::new();
        let (s, c) = spec("Mix", 0.0, 0.0, 10.0, 1.0);
        registry.register(s);

        assert_eq!(registry.set_normalized(0, 0.5), Some(5.0));
        assert_eq!(c.get(), 5.0);
        assert_eq!(registry.normalized(0), Some(0.5));
        assert_eq!(registry.set_normalized(0, 3.0), Some(10.0));
    }
}
