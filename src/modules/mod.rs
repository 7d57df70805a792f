//! Effect modules built on top of the engine's node arena.
//!
//! Each module owns the `NodeId`s of the nodes it allocated and exposes only
//! a logical input and output to the graph controller. Modules are created
//! lazily (the engine must be running), survive for the playback session,
//! and can be torn down unconditionally with `cleanup`.

/// Tempo-ish feedback delay with wet/dry mix.
pub mod delay;
/// Series filter + gain rhythmic enhancer.
pub mod enhancer;
/// 6-band parametric filter bank.
pub mod equalizer;
/// Master volume plus makeup-gain compensation.
pub mod gain;
/// Convolution reverb with a procedural impulse response.
pub mod reverb;

use tracing::debug;

use crate::engine::{AudioEngine, NodeId};

pub use delay::DelayModule;
pub use enhancer::EnhancementModule;
pub use equalizer::EqualizerModule;
pub use gain::GainStage;
pub use reverb::ReverbModule;

/// Closed set of effect stages, in fixed chain priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Equalizer,
    Delay,
    Reverb,
    Enhancement,
}

impl EffectKind {
    pub const CHAIN_ORDER: [EffectKind; 4] = [
        EffectKind::Equalizer,
        EffectKind::Delay,
        EffectKind::Reverb,
        EffectKind::Enhancement,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EffectKind::Equalizer => "equalizer",
            EffectKind::Delay => "delay",
            EffectKind::Reverb => "reverb",
            EffectKind::Enhancement => "enhancement",
        }
    }
}

/// Validate and clamp a 0..100 intensity. Non-numeric input is rejected
/// outright so it can never reach a node parameter.
pub(crate) fn clamp_intensity(raw: f32) -> Option<f32> {
    if !raw.is_finite() {
        debug!(raw, "rejected non-finite intensity");
        return None;
    }
    Some(raw.clamp(0.0, 100.0))
}

/// All four effect modules, owned together so the controller and the
/// automation mapper can address them by [`EffectKind`].
#[derive(Default)]
pub struct EffectRack {
    pub equalizer: EqualizerModule,
    pub delay: DelayModule,
    pub reverb: ReverbModule,
    pub enhancer: EnhancementModule,
}

impl EffectRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily create every module that is still missing. Returns how many
    /// became newly available.
    pub fn create_missing(&mut self, engine: &mut AudioEngine) -> usize {
        let mut created = 0;
        for kind in EffectKind::CHAIN_ORDER {
            let was_ready = self.is_ready(kind);
            let now_ready = match kind {
                EffectKind::Equalizer => self.equalizer.create(engine),
                EffectKind::Delay => self.delay.create(engine),
                EffectKind::Reverb => self.reverb.create(engine),
                EffectKind::Enhancement => self.enhancer.create(engine),
            };
            if now_ready && !was_ready {
                created += 1;
            }
        }
        created
    }

    pub fn is_ready(&self, kind: EffectKind) -> bool {
        self.endpoints(kind).is_some()
    }

    /// Logical (input, output) node pair for a fully initialized module.
    pub fn endpoints(&self, kind: EffectKind) -> Option<(NodeId, NodeId)> {
        match kind {
            EffectKind::Equalizer => self.equalizer.endpoints(),
            EffectKind::Delay => self.delay.endpoints(),
            EffectKind::Reverb => self.reverb.endpoints(),
            EffectKind::Enhancement => self.enhancer.endpoints(),
        }
    }

    /// Forward an intensity to one of the scalar effects. The equalizer has
    /// no single intensity and ignores this path.
    pub fn process_intensity(&mut self, kind: EffectKind, engine: &mut AudioEngine, raw: f32) {
        match kind {
            EffectKind::Equalizer => debug!("equalizer has no scalar intensity"),
            EffectKind::Delay => self.delay.process(engine, raw),
            EffectKind::Reverb => self.reverb.process(engine, raw),
            EffectKind::Enhancement => self.enhancer.process(engine, raw),
        }
    }

    pub fn reset_effect(&mut self, kind: EffectKind, engine: &mut AudioEngine) {
        match kind {
            EffectKind::Equalizer => self.equalizer.reset(engine),
            EffectKind::Delay => self.delay.reset(engine),
            EffectKind::Reverb => self.reverb.reset(engine),
            EffectKind::Enhancement => self.enhancer.reset(engine),
        }
    }

    pub fn reset_all(&mut self, engine: &mut AudioEngine) {
        for kind in EffectKind::CHAIN_ORDER {
            self.reset_effect(kind, engine);
        }
    }

    pub fn cleanup_all(&mut self, engine: &mut AudioEngine) {
        self.equalizer.cleanup(engine);
        self.delay.cleanup(engine);
        self.reverb.cleanup(engine);
        self.enhancer.cleanup(engine);
    }

    pub fn intensity(&self, kind: EffectKind) -> f32 {
        match kind {
            EffectKind::Equalizer => 0.0,
            EffectKind::Delay => self.delay.intensity(),
            EffectKind::Reverb => self.reverb.amount(),
            EffectKind::Enhancement => self.enhancer.intensity(),
        }
    }
}
