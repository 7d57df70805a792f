//! Automation layer: maps an external emotion signal onto audio parameters.
//!
//! The mapper holds no state between recommendations; every `apply` is a
//! full re-derivation, so delivering the same recommendation twice lands on
//! exactly the same parameter set. It drives module parameters and the gain
//! stage only, never display state.

use tracing::debug;

use crate::engine::AudioEngine;
use crate::modules::equalizer::{EqualizerModule, BAND_COUNT};
use crate::modules::{EffectKind, EffectRack, GainStage};

/// Emotion-state identifiers starting with this marker describe a continuous
/// gesture whose amplitude scales the volume interpolation.
pub const GESTURE_STATE_PREFIX: &str = "nodding";

/// External automation signal, produced by the emotion-mapping collaborator
/// and consumed read-only.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct AutomationRecommendation {
    pub emotion_state: Option<String>,
    pub volume_multiplier: f32,
    pub nodding_amplitude: f32,
    pub eq_vector: Option<[f32; BAND_COUNT]>,
    pub eq_preset: String,
    pub rhythmic_enhancement: Option<f32>,
    pub reverb_amount: Option<f32>,
    pub delay_amount: Option<f32>,
}

impl Default for AutomationRecommendation {
    fn default() -> Self {
        Self {
            emotion_state: None,
            volume_multiplier: 1.0,
            nodding_amplitude: 0.0,
            eq_vector: None,
            eq_preset: "flat".to_string(),
            rhythmic_enhancement: None,
            reverb_amount: None,
            delay_amount: None,
        }
    }
}

pub struct AutomationMapper {
    nod_threshold: f32,
}

impl AutomationMapper {
    pub fn new(nod_threshold: f32) -> Self {
        Self {
            nod_threshold: if nod_threshold.is_finite() && nod_threshold > 0.0 {
                nod_threshold
            } else {
                10.0
            },
        }
    }

    /// Push one recommendation into the modules and the gain stage.
    ///
    /// An absent emotion state reverts everything to baseline.
    pub fn apply(
        &self,
        rec: &AutomationRecommendation,
        engine: &mut AudioEngine,
        rack: &mut EffectRack,
        gain: &mut GainStage,
        base_volume: f32,
    ) {
        let Some(state) = rec.emotion_state.as_deref() else {
            self.revert(engine, rack, gain, base_volume);
            return;
        };

        match (&rec.eq_vector, rec.eq_preset.as_str()) {
            (Some(vector), preset) if preset != "flat" => {
                rack.equalizer.apply_vector(engine, vector);
            }
            _ => {
                rack.equalizer.reset(engine);
            }
        }
        let makeup = EqualizerModule::compute_makeup_gain(&rack.equalizer.gains());
        gain.apply_makeup_gain(engine, makeup);

        let volume = self.emotion_volume(
            state,
            rec.nodding_amplitude,
            rec.volume_multiplier,
            base_volume,
        );
        gain.set_emotion_volume(engine, volume);

        Self::drive_effect(engine, rack, EffectKind::Delay, rec.delay_amount);
        Self::drive_effect(engine, rack, EffectKind::Reverb, rec.reverb_amount);
        Self::drive_effect(engine, rack, EffectKind::Enhancement, rec.rhythmic_enhancement);
    }

    /// Target volume for an emotion state before the gain stage's own
    /// clamping and rounding.
    ///
    /// Gesture states interpolate linearly between the baseline and the
    /// fully emotion-driven volume: amplitude 0 stays at baseline, amplitude
    /// at twice the threshold (or beyond) reaches `base * multiplier`.
    pub fn emotion_volume(
        &self,
        state: &str,
        amplitude: f32,
        multiplier: f32,
        base_volume: f32,
    ) -> f32 {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(0.0)
        } else {
            debug!(multiplier, "non-finite volume multiplier, treating as 1");
            1.0
        };
        let full = base_volume * multiplier;

        if state.starts_with(GESTURE_STATE_PREFIX) {
            let amplitude = if amplitude.is_finite() {
                amplitude.max(0.0)
            } else {
                0.0
            };
            let full_scale = 2.0 * self.nod_threshold;
            let scale = amplitude.min(full_scale) / full_scale;
            base_volume + (full - base_volume) * scale
        } else {
            full
        }
    }

    /// Baseline everything: effects to zero, EQ flat, volume back to base.
    pub fn revert(
        &self,
        engine: &mut AudioEngine,
        rack: &mut EffectRack,
        gain: &mut GainStage,
        base_volume: f32,
    ) {
        rack.reset_all(engine);
        gain.apply_makeup_gain(engine, 0.0);
        gain.set_volume(engine, base_volume);
    }

    fn drive_effect(
        engine: &mut AudioEngine,
        rack: &mut EffectRack,
        kind: EffectKind,
        value: Option<f32>,
    ) {
        match value {
            Some(amount) if amount > 0.0 => rack.process_intensity(kind, engine, amount),
            _ => rack.reset_effect(kind, engine),
        }
    }
}
