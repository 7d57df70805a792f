use tracing::debug;

use crate::engine::{AudioEngine, NodeId};

/// Hard ceiling on the applied master gain (145%).
pub const MAX_VOLUME: f32 = 1.45;
pub const MAKEUP_LIMIT_DB: f32 = 6.0;
const RAMP_SECS: f32 = 0.05;

/// Master volume node plus makeup-gain compensation.
///
/// User volume and the equalizer's reported makeup gain combine as
/// `volume * 10^(makeup/20)`, clamped to the ceiling and rounded to three
/// decimals so repeated re-derivations settle on identical values instead of
/// jittering around them.
#[derive(Default)]
pub struct GainStage {
    node: Option<NodeId>,
    volume: f32,
    makeup_db: f32,
}

impl GainStage {
    pub fn new(base_volume: f32) -> Self {
        Self {
            node: None,
            volume: base_volume.clamp(0.0, MAX_VOLUME),
            makeup_db: 0.0,
        }
    }

    pub fn create(&mut self, engine: &mut AudioEngine) -> bool {
        if self.node.is_some() {
            return true;
        }
        if !engine.is_running() {
            return false;
        }
        match engine.create_gain(self.total_gain()) {
            Ok(node) => {
                self.node = Some(node);
                true
            }
            Err(err) => {
                debug!(%err, "gain stage allocation failed");
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.node.is_some()
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Set the user/master volume (linear). Non-numeric input is rejected.
    pub fn set_volume(&mut self, engine: &mut AudioEngine, volume: f32) {
        if !volume.is_finite() {
            debug!(volume, "rejected non-finite volume");
            return;
        }
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.apply(engine);
    }

    /// Direct write used by the automation layer: same contract as
    /// [`GainStage::set_volume`], named separately because it deliberately
    /// bypasses any display-side recomputation.
    pub fn set_emotion_volume(&mut self, engine: &mut AudioEngine, volume: f32) {
        self.set_volume(engine, volume);
    }

    /// Take the equalizer's loudness compensation, bounded to +/-6 dB.
    pub fn apply_makeup_gain(&mut self, engine: &mut AudioEngine, db: f32) {
        if !db.is_finite() {
            debug!(db, "rejected non-finite makeup gain");
            return;
        }
        self.makeup_db = db.clamp(-MAKEUP_LIMIT_DB, MAKEUP_LIMIT_DB);
        self.apply(engine);
    }

    fn apply(&self, engine: &mut AudioEngine) {
        if let Some(node) = self.node {
            engine.set_gain(node, self.total_gain(), RAMP_SECS);
        }
    }

    /// Combined, clamped, 3-decimal-rounded gain actually applied.
    pub fn total_gain(&self) -> f32 {
        let total = self.volume * 10.0_f32.powf(self.makeup_db / 20.0);
        round3(total.clamp(0.0, MAX_VOLUME))
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn makeup_db(&self) -> f32 {
        self.makeup_db
    }

    /// Release the node. Safe to call repeatedly.
    pub fn cleanup(&mut self, engine: &mut AudioEngine) {
        if let Some(node) = self.node.take() {
            engine.remove_node(node);
        }
    }
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}
