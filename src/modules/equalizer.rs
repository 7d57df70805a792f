use tracing::debug;

use crate::dsp::biquad::BiquadKind;
use crate::engine::{AudioEngine, NodeId};

pub const BAND_COUNT: usize = 6;
/// Fixed band centers. The outer bands are shelves, the rest peak at Q=1.
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [60.0, 170.0, 350.0, 1000.0, 3500.0, 10_000.0];
pub const GAIN_LIMIT_DB: f32 = 12.0;

/// Vector writes below this delta are graph churn, not audible change.
const APPLY_EPSILON_DB: f32 = 0.01;
const BAND_Q: f32 = 1.0;
const RAMP_SECS: f32 = 0.05;

/// 6-band parametric equalizer.
///
/// Bands are chained in series inside the module; the controller only ever
/// sees band 0 (input) and band 5 (output). Gains persist across
/// cleanup/create cycles so a rebuilt module sounds like the one it
/// replaces.
#[derive(Default)]
pub struct EqualizerModule {
    bands: Option<[NodeId; BAND_COUNT]>,
    gains: [f32; BAND_COUNT],
}

impl EqualizerModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and chain the six filter nodes. No-op when already created;
    /// returns readiness.
    pub fn create(&mut self, engine: &mut AudioEngine) -> bool {
        if self.bands.is_some() {
            return true;
        }
        if !engine.is_running() {
            return false;
        }

        let mut ids = Vec::with_capacity(BAND_COUNT);
        for band in 0..BAND_COUNT {
            let kind = match band {
                0 => BiquadKind::LowShelf,
                5 => BiquadKind::HighShelf,
                _ => BiquadKind::Peaking,
            };
            match engine.create_biquad(kind, BAND_FREQUENCIES[band], BAND_Q, self.gains[band]) {
                Ok(node) => ids.push(node),
                Err(err) => {
                    debug!(%err, band, "equalizer band allocation failed");
                    for &created in &ids {
                        engine.remove_node(created);
                    }
                    return false;
                }
            }
        }
        for pair in ids.windows(2) {
            if engine.connect(pair[0], pair[1]).is_err() {
                for &created in &ids {
                    engine.remove_node(created);
                }
                return false;
            }
        }

        let mut bands = [NodeId(0); BAND_COUNT];
        bands.copy_from_slice(&ids);
        self.bands = Some(bands);
        true
    }

    pub fn is_ready(&self) -> bool {
        self.bands.is_some()
    }

    pub fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        self.bands.map(|ids| (ids[0], ids[BAND_COUNT - 1]))
    }

    /// Set a single band gain in dB. Out-of-range values clamp, non-numeric
    /// values never reach the node.
    pub fn set_gain(&mut self, engine: &mut AudioEngine, band: usize, db: f32) {
        if band >= BAND_COUNT || !db.is_finite() {
            debug!(band, db, "rejected equalizer gain write");
            return;
        }
        let clamped = db.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
        self.gains[band] = clamped;
        if let Some(ids) = self.bands {
            engine.set_biquad_params(ids[band], None, Some(clamped), RAMP_SECS);
        }
    }

    /// Apply a whole gain vector. Returns false without touching any node
    /// when the vector is invalid or within epsilon of the current state.
    pub fn apply_vector(&mut self, engine: &mut AudioEngine, vector: &[f32; BAND_COUNT]) -> bool {
        if vector.iter().any(|v| !v.is_finite()) {
            debug!("rejected equalizer vector with non-finite entries");
            return false;
        }
        let unchanged = vector
            .iter()
            .zip(self.gains.iter())
            .all(|(v, g)| (v.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB) - g).abs() < APPLY_EPSILON_DB);
        if unchanged {
            return false;
        }
        for band in 0..BAND_COUNT {
            self.set_gain(engine, band, vector[band]);
        }
        true
    }

    /// Apply a named preset; unknown names are a no-op.
    pub fn apply_preset(&mut self, engine: &mut AudioEngine, name: &str) -> bool {
        match preset_vector(name) {
            Some(vector) => self.apply_vector(engine, &vector),
            None => {
                debug!(name, "unknown equalizer preset");
                false
            }
        }
    }

    /// Return every band to flat.
    pub fn reset(&mut self, engine: &mut AudioEngine) {
        self.apply_vector(engine, &[0.0; BAND_COUNT]);
    }

    pub fn gains(&self) -> [f32; BAND_COUNT] {
        self.gains
    }

    /// Loudness compensation for the current curve: RMS of the band gains,
    /// negated and scaled down, bounded to a safe window. The value is
    /// reported to the gain stage, never applied here.
    pub fn compute_makeup_gain(gains: &[f32; BAND_COUNT]) -> f32 {
        let mean_square = gains.iter().map(|g| g * g).sum::<f32>() / BAND_COUNT as f32;
        (-mean_square.sqrt() * 0.3).clamp(-6.0, 6.0)
    }

    /// Release all nodes. Safe to call repeatedly.
    pub fn cleanup(&mut self, engine: &mut AudioEngine) {
        if let Some(ids) = self.bands.take() {
            for id in ids {
                engine.remove_node(id);
            }
        }
    }
}

pub fn preset_vector(name: &str) -> Option<[f32; BAND_COUNT]> {
    match name {
        "flat" => Some([0.0; BAND_COUNT]),
        "bass-boost" => Some([6.0, 4.0, 2.0, 0.0, 0.0, 0.0]),
        "vocal" => Some([-2.0, 0.0, 2.0, 4.0, 3.0, 0.0]),
        "treble-boost" => Some([0.0, 0.0, 0.0, 2.0, 4.0, 6.0]),
        _ => None,
    }
}
