//! ADSR Envelope
//!
//! A linear attack/decay/sustain/release state machine producing one gain
//! multiplier per sample. Stage times are in milliseconds and sustain is a
//! percentage, all held in shared cells so they can be driven live.
//!
//! Timing, for a stage of `N = ms / 1000 · sample_rate` samples:
//!
//! - Attack call `k` (1-based) yields `k / N`, so call `N` yields exactly 1.0.
//! - Decay call `k` yields `1 + (s − 1)·k / N`.
//! - Release call `k` (0-based) yields `g·(1 − k / N)` where `g` is the gain
//!   when the note was released; call `N` yields exactly 0.0 and the
//!   envelope goes idle.
//!
//! A zero-length stage completes in a single call.

use crate::param::{cell, ParamCell, ParamPath, ParamSpec};
use crate::registry::ParamRegistry;

/// Lifecycle state of an [`Envelope`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR gain generator
#[derive(Debug, Clone)]
pub struct Envelope {
    sample_rate: f64,
    attack_ms: ParamCell,
    decay_ms: ParamCell,
    sustain_pct: ParamCell,
    release_ms: ParamCell,
    stage: EnvelopeStage,
    counter: usize,
    level: f64,
    release_start: f64,
}

impl Envelope {
    pub const DEFAULT_ATTACK_MS: f64 = 10.0;
    pub const DEFAULT_DECAY_MS: f64 = 100.0;
    pub const DEFAULT_SUSTAIN_PCT: f64 = 70.0;
    pub const DEFAULT_RELEASE_MS: f64 = 200.0;

    pub fn new(sample_rate: f64) -> Self {
        Self::with_times(
            sample_rate,
            Self::DEFAULT_ATTACK_MS,
            Self::DEFAULT_DECAY_MS,
            Self::DEFAULT_SUSTAIN_PCT,
            Self::DEFAULT_RELEASE_MS,
        )
    }

    pub fn with_times(
        sample_rate: f64,
        attack_ms: f64,
        decay_ms: f64,
        sustain_pct: f64,
        release_ms: f64,
    ) -> Self {
        Self {
            sample_rate,
            attack_ms: cell(attack_ms),
            decay_ms: cell(decay_ms),
            sustain_pct: cell(sustain_pct),
            release_ms: cell(release_ms),
            stage: EnvelopeStage::Idle,
            counter: 0,
            level: 0.0,
            release_start: 0.0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn set_attack_ms(&mut self, ms: f64) {
        self.attack_ms.set(ms);
    }

    pub fn set_decay_ms(&mut self, ms: f64) {
        self.decay_ms.set(ms);
    }

    /// Sustain level in percent (0-100)
    pub fn set_sustain_pct(&mut self, pct: f64) {
        self.sustain_pct.set(pct);
    }

    pub fn set_release_ms(&mut self, ms: f64) {
        self.release_ms.set(ms);
    }

    pub fn attack_ms(&self) -> f64 {
        self.attack_ms.get()
    }

    pub fn decay_ms(&self) -> f64 {
        self.decay_ms.get()
    }

    pub fn sustain_pct(&self) -> f64 {
        self.sustain_pct.get()
    }

    pub fn release_ms(&self) -> f64 {
        self.release_ms.get()
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    /// Gain produced by the most recent call
    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    /// Start (or restart) the attack stage
    pub fn note_on(&mut self) {
        self.stage = EnvelopeStage::Attack;
        self.counter = 0;
    }

    /// Release from the current gain. No effect while idle.
    pub fn note_off(&mut self) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        self.release_start = self.level;
        self.stage = EnvelopeStage::Release;
        self.counter = 0;
    }

    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.counter = 0;
        self.level = 0.0;
        self.release_start = 0.0;
    }

    /// Stage length in samples. Non-positive or NaN times give zero.
    fn samples(&self, ms: &ParamCell) -> usize {
        let ms = ms.get();
        if ms > 0.0 {
            (ms * self.sample_rate / 1000.0) as usize
        } else {
            0
        }
    }

    fn sustain_level(&self) -> f64 {
        let pct = self.sustain_pct.get();
        if pct.is_nan() {
            return 0.0;
        }
        (pct / 100.0).clamp(0.0, 1.0)
    }

    /// Advance one sample and return the gain
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            EnvelopeStage::Idle => {
                self.level = 0.0;
            }
            EnvelopeStage::Attack => {
                let n = self.samples(&self.attack_ms);
                self.counter += 1;
                if self.counter >= n {
                    self.level = 1.0;
                    self.enter(EnvelopeStage::Decay);
                } else {
                    self.level = self.counter as f64 / n as f64;
                }
            }
            EnvelopeStage::Decay => {
                let n = self.samples(&self.decay_ms);
                let sustain = self.sustain_level();
                self.counter += 1;
                if self.counter >= n {
                    self.level = sustain;
                    self.enter(EnvelopeStage::Sustain);
                } else {
                    self.level = 1.0 + (sustain - 1.0) * self.counter as f64 / n as f64;
                }
            }
            EnvelopeStage::Sustain => {
                self.level = self.sustain_level();
            }
            EnvelopeStage::Release => {
                let n = self.samples(&self.release_ms);
                if self.counter >= n {
                    self.level = 0.0;
                    self.enter(EnvelopeStage::Idle);
                } else {
                    self.level = self.release_start * (1.0 - self.counter as f64 / n as f64);
                    self.counter += 1;
                }
            }
        }
        self.level
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        self.stage = stage;
        self.counter = 0;
    }

    /// Register Attack/Decay/Sustain/Release under `path`
    pub fn register_at(&self, registry: &mut ParamRegistry, path: &ParamPath) {
        registry.register(ParamSpec::milliseconds(path.child("Attack"), self.attack_ms.clone()));
        registry.register(ParamSpec::milliseconds(path.child("Decay"), self.decay_ms.clone()));
        registry.register(ParamSpec::percent(path.child("Sustain"), self.sustain_pct.clone()));
        registry.register(ParamSpec::milliseconds(path.child("Release"), self.release_ms.clone()));
    }

    pub fn register_params(&self, registry: &mut ParamRegistry) {
        self.register_at(registry, &ParamPath::from_segments(["Envelope"]));
    }
}
