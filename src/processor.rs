//! Host-facing facade over the engine, the effect rack, the graph
//! controller and the automation mapper.
//!
//! The processor owns everything and is the only type a host needs to hold.
//! Display mirroring is strictly outbound: after each mutating call an
//! observer callback receives a value snapshot, and nothing ever reads that
//! mirror back into the processing path.

use std::time::Instant;

use tracing::{debug, info};

use crate::automation::{AutomationMapper, AutomationRecommendation};
use crate::controller::{AudioGraphController, GraphTopology};
use crate::engine::{AudioEngine, EngineConfig, EngineError, GraphError};
use crate::modules::equalizer::{EqualizerModule, BAND_COUNT};
use crate::modules::{EffectKind, EffectRack, GainStage};

/// Read-only mirror of the audible parameter state, pushed to the display
/// observer after every mutating call.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub eq_gains: [f32; BAND_COUNT],
    pub delay_intensity: f32,
    pub reverb_intensity: f32,
    pub enhancement_intensity: f32,
    pub volume: f32,
}

pub type DisplayObserver = Box<dyn FnMut(&DisplaySnapshot) + Send>;

pub struct AttuneProcessor {
    config: EngineConfig,
    engine: Option<AudioEngine>,
    rack: EffectRack,
    gain: GainStage,
    controller: AudioGraphController,
    mapper: AutomationMapper,
    /// User baseline volume the automation layer interpolates from.
    base_volume: f32,
    /// Multiplier of the most recent recommendation, reused by
    /// [`AttuneProcessor::apply_emotion_volume`] between recommendations.
    last_multiplier: f32,
    topology: Option<GraphTopology>,
    observer: Option<DisplayObserver>,
}

impl AttuneProcessor {
    pub fn new(config: EngineConfig) -> Self {
        let base_volume = config.base_volume.clamp(0.0, 1.0);
        Self {
            controller: AudioGraphController::new(config.throttle_window),
            mapper: AutomationMapper::new(config.nod_threshold),
            gain: GainStage::new(base_volume),
            base_volume,
            last_multiplier: 1.0,
            engine: None,
            rack: EffectRack::new(),
            topology: None,
            observer: None,
            config,
        }
    }

    /// Create and resume the engine, wire the initial (bypass) chain.
    ///
    /// Failure is retryable: call again on the next user gesture.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.engine.is_some() {
            return Ok(());
        }
        let mut engine = AudioEngine::new(&self.config)?;
        engine.resume()?;
        self.engine = Some(engine);

        if let Some(engine) = self.engine.as_mut() {
            self.gain.create(engine);
            self.gain.set_volume(engine, self.base_volume);
            match self
                .controller
                .request_reconnect(Instant::now(), engine, &self.rack, &self.gain)
            {
                Ok(Some(topology)) => self.topology = Some(topology),
                Ok(None) => {}
                Err(err) => debug!(%err, "initial wiring failed"),
            }
        }
        info!("processor initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Lazily create all missing effect modules, then schedule one
    /// reconnect to splice them in.
    pub fn force_effects_creation(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if !engine.is_running() {
            return;
        }
        let created = self.rack.create_missing(engine);
        if created > 0 {
            info!(created, "effect modules created");
            let _ = self.reconnect_at(Instant::now());
        }
    }

    /// Explicit reconnect request, subject to the throttle window.
    pub fn reconnect_graph(&mut self) -> Result<Option<GraphTopology>, GraphError> {
        self.reconnect_at(Instant::now())
    }

    fn reconnect_at(&mut self, now: Instant) -> Result<Option<GraphTopology>, GraphError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(None);
        };
        let result = self
            .controller
            .request_reconnect(now, engine, &self.rack, &self.gain);
        if let Ok(Some(topology)) = &result {
            self.topology = Some(topology.clone());
        }
        result
    }

    /// Service deferred reconnect re-attempts. Call periodically from the
    /// host event loop.
    pub fn tick(&mut self, now: Instant) {
        if self.controller.service_retry(now) {
            let _ = self.reconnect_at(now);
        }
    }

    pub fn current_topology(&self) -> Option<&GraphTopology> {
        self.topology.as_ref()
    }

    // ---- user-driven setters --------------------------------------------

    /// User volume in 0..1; also becomes the automation baseline.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            debug!(volume, "rejected non-finite volume");
            return;
        }
        self.base_volume = volume.clamp(0.0, 1.0);
        if let Some(engine) = self.engine.as_mut() {
            self.gain.set_volume(engine, self.base_volume);
        }
        self.notify();
    }

    pub fn set_band_gain(&mut self, band: usize, db: f32) {
        if let Some(engine) = self.engine.as_mut() {
            self.rack.equalizer.set_gain(engine, band, db);
            refresh_makeup(engine, &self.rack, &mut self.gain);
        }
        self.notify();
    }

    pub fn set_effect_intensity(&mut self, kind: EffectKind, intensity: f32) {
        if let Some(engine) = self.engine.as_mut() {
            self.rack.process_intensity(kind, engine, intensity);
        }
        self.notify();
    }

    // ---- automation surface ---------------------------------------------

    pub fn apply_external_eq(&mut self, vector: &[f32; BAND_COUNT]) {
        if let Some(engine) = self.engine.as_mut() {
            if self.rack.equalizer.apply_vector(engine, vector) {
                refresh_makeup(engine, &self.rack, &mut self.gain);
            }
        }
        self.notify();
    }

    pub fn reset_eq(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            self.rack.equalizer.reset(engine);
            refresh_makeup(engine, &self.rack, &mut self.gain);
        }
        self.notify();
    }

    /// Gesture-scaled volume push using the most recent recommendation's
    /// multiplier.
    pub fn apply_emotion_volume(&mut self, state: &str, amplitude: f32) {
        if let Some(engine) = self.engine.as_mut() {
            let volume =
                self.mapper
                    .emotion_volume(state, amplitude, self.last_multiplier, self.base_volume);
            self.gain.set_emotion_volume(engine, volume);
        }
        self.notify();
    }

    pub fn apply_recommendation(&mut self, rec: &AutomationRecommendation) {
        if rec.volume_multiplier.is_finite() {
            self.last_multiplier = rec.volume_multiplier.max(0.0);
        }
        if let Some(engine) = self.engine.as_mut() {
            self.mapper
                .apply(rec, engine, &mut self.rack, &mut self.gain, self.base_volume);
        }
        self.notify();
    }

    /// Revert every managed parameter to its baseline.
    pub fn reset_to_base_values(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            self.mapper
                .revert(engine, &mut self.rack, &mut self.gain, self.base_volume);
        }
        self.notify();
    }

    /// Tear down every effect module and fall back to the bypass chain.
    pub fn shutdown_effects(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            self.rack.cleanup_all(engine);
        }
        let _ = self.reconnect_at(Instant::now());
    }

    // ---- read-only mirrors ----------------------------------------------

    pub fn eq_gains(&self) -> [f32; BAND_COUNT] {
        self.rack.equalizer.gains()
    }

    pub fn effect_intensity(&self, kind: EffectKind) -> f32 {
        self.rack.intensity(kind)
    }

    /// The applied master gain (volume x makeup, clamped and rounded).
    pub fn current_volume(&self) -> f32 {
        self.gain.total_gain()
    }

    pub fn set_display_observer(
        &mut self,
        observer: impl FnMut(&DisplaySnapshot) + Send + 'static,
    ) {
        self.observer = Some(Box::new(observer));
    }

    fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            eq_gains: self.rack.equalizer.gains(),
            delay_intensity: self.rack.intensity(EffectKind::Delay),
            reverb_intensity: self.rack.intensity(EffectKind::Reverb),
            enhancement_intensity: self.rack.intensity(EffectKind::Enhancement),
            volume: self.gain.total_gain(),
        }
    }

    fn notify(&mut self) {
        let snapshot = self.snapshot();
        if let Some(observer) = self.observer.as_mut() {
            observer(&snapshot);
        }
    }

    // ---- audio I/O -------------------------------------------------------

    /// Queue playback frames for the source node.
    pub fn push_source_frames(&mut self, frames: &[[f32; 2]]) {
        if let Some(engine) = self.engine.as_mut() {
            engine.push_source_frames(frames);
        }
    }

    /// Lock-free writer for the playback thread.
    #[cfg(feature = "rtrb")]
    pub fn source_writer(&mut self) -> Option<rtrb::Producer<[f32; 2]>> {
        self.engine.as_mut().map(AudioEngine::source_writer)
    }

    /// Render the next block. An uninitialized processor renders silence.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        match self.engine.as_mut() {
            Some(engine) => engine.render_into(left, right),
            None => {
                left.fill(0.0);
                right.fill(0.0);
            }
        }
    }
}

fn refresh_makeup(engine: &mut AudioEngine, rack: &EffectRack, gain: &mut GainStage) {
    let makeup = EqualizerModule::compute_makeup_gain(&rack.equalizer.gains());
    gain.apply_makeup_gain(engine, makeup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn processor() -> AttuneProcessor {
        let mut processor = AttuneProcessor::new(EngineConfig::default());
        processor.initialize().unwrap();
        processor
    }

    #[test]
    fn initialize_is_idempotent_and_retryable() {
        let bad = EngineConfig {
            sample_rate: f32::NAN,
            ..EngineConfig::default()
        };
        let mut broken = AttuneProcessor::new(bad);
        assert_eq!(broken.initialize(), Err(EngineError::Unavailable));
        assert!(!broken.is_initialized());

        let mut processor = processor();
        assert!(processor.initialize().is_ok());
    }

    #[test]
    fn force_effects_creation_wires_full_chain_after_window() {
        let mut processor = processor();
        processor.force_effects_creation();

        // The reconnect scheduled by creation landed inside the throttle
        // window of the initial wiring; it collapses into a deferred retry
        let window = processor.config.throttle_window;
        processor.tick(Instant::now() + window);

        let topology = processor.current_topology().unwrap();
        assert_eq!(topology.stages, EffectKind::CHAIN_ORDER.to_vec());
    }

    #[test]
    fn uninitialized_processor_renders_silence() {
        let mut processor = AttuneProcessor::new(EngineConfig::default());
        let mut left = vec![1.0; 64];
        let mut right = vec![1.0; 64];
        processor.render(&mut left, &mut right);

        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn observer_sees_snapshots_but_cannot_feed_back() {
        let mut processor = processor();
        let seen: Arc<Mutex<Vec<DisplaySnapshot>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        processor.set_display_observer(move |snapshot| {
            sink.lock().unwrap().push(snapshot.clone());
        });

        processor.set_volume(0.5);
        processor.force_effects_creation();
        processor.set_effect_intensity(EffectKind::Delay, 30.0);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        let last = seen.last().unwrap();
        assert_eq!(last.delay_intensity, 30.0);
        assert_eq!(last.volume, 0.5);
    }

    #[test]
    fn emotion_volume_uses_last_recommendation_multiplier() {
        let mut processor = processor();
        processor.force_effects_creation();
        processor.set_volume(0.8);

        let rec = AutomationRecommendation {
            emotion_state: Some("energized".to_string()),
            volume_multiplier: 1.5,
            ..AutomationRecommendation::default()
        };
        processor.apply_recommendation(&rec);

        // Full-scale gesture reaches base * multiplier = 1.2
        processor.apply_emotion_volume("nodding_steady", 20.0);
        assert!((processor.current_volume() - 1.2).abs() < 1e-3);

        // Zero-amplitude gesture sits at baseline
        processor.apply_emotion_volume("nodding_steady", 0.0);
        assert!((processor.current_volume() - 0.8).abs() < 1e-3);
    }

    #[test]
    fn reset_then_reapply_restores_exactly() {
        let mut processor = processor();
        processor.force_effects_creation();

        let rec = AutomationRecommendation {
            emotion_state: Some("energized".to_string()),
            volume_multiplier: 1.2,
            eq_vector: Some([3.0, 1.0, 0.0, -1.0, 2.0, 4.0]),
            eq_preset: "bright".to_string(),
            delay_amount: Some(55.0),
            reverb_amount: Some(35.0),
            rhythmic_enhancement: Some(15.0),
            ..AutomationRecommendation::default()
        };

        processor.apply_recommendation(&rec);
        let volume = processor.current_volume();
        let gains = processor.eq_gains();

        processor.reset_to_base_values();
        assert_eq!(processor.eq_gains(), [0.0; 6]);
        assert_eq!(processor.effect_intensity(EffectKind::Delay), 0.0);

        processor.apply_recommendation(&rec);
        assert_eq!(processor.current_volume(), volume);
        assert_eq!(processor.eq_gains(), gains);
        assert_eq!(processor.effect_intensity(EffectKind::Delay), 55.0);
        assert_eq!(processor.effect_intensity(EffectKind::Reverb), 35.0);
    }

    #[test]
    fn shutdown_effects_falls_back_to_passthrough() {
        let mut processor = processor();
        processor.force_effects_creation();
        assert!(!processor.current_topology().unwrap().stages.is_empty());

        processor.shutdown_effects();

        // The reconnect right after shutdown lands inside the throttle
        // window and is dropped; the stale topology stays until the window
        // reopens, but no effect module is ready anymore.
        assert!(!processor.rack.delay.is_ready());
        assert!(!processor.rack.reverb.is_ready());
    }
}
