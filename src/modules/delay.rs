use tracing::debug;

use crate::dsp::biquad::BiquadKind;
use crate::engine::{AudioEngine, GraphError, NodeId};
use crate::modules::clamp_intensity;

/// Longest supported delay time; sets the line capacity at creation.
pub const MAX_DELAY_SECS: f32 = 2.0;
/// Delay time at zero intensity.
pub const BASE_DELAY_SECS: f32 = 0.125;
/// All parameter moves glide over this window to avoid clicks.
const RAMP_SECS: f32 = 0.1;
/// Feedback path high-pass keeps low end from piling up per repeat.
const FEEDBACK_FILTER_HZ: f32 = 80.0;
const FEEDBACK_FILTER_Q: f32 = 0.5;

struct DelayNodes {
    input: NodeId,
    output: NodeId,
    line: NodeId,
    feedback: NodeId,
    wet: NodeId,
    dry: NodeId,
    feedback_filter: NodeId,
}

/// Feedback delay with wet/dry mix.
///
/// Internal topology:
///
/// ```text
/// input ──┬──→ dry ─────────────────→ output
///         └──→ line ──┬──→ wet ─────→ output
///                     └──→ hpf → feedback ──→ line
/// ```
#[derive(Default)]
pub struct DelayModule {
    nodes: Option<DelayNodes>,
    intensity: f32,
}

impl DelayModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and wire the delay network. Returns readiness; a failed
    /// allocation releases every node created so far.
    pub fn create(&mut self, engine: &mut AudioEngine) -> bool {
        if self.nodes.is_some() {
            return true;
        }
        if !engine.is_running() {
            return false;
        }
        match Self::build(engine) {
            Ok(nodes) => {
                self.nodes = Some(nodes);
                true
            }
            Err(err) => {
                debug!(%err, "delay network allocation failed");
                false
            }
        }
    }

    fn build(engine: &mut AudioEngine) -> Result<DelayNodes, GraphError> {
        let input = engine.create_gain(1.0)?;
        let output = engine.create_gain(1.0)?;
        let line = engine.create_delay(MAX_DELAY_SECS, BASE_DELAY_SECS)?;
        let feedback = engine.create_gain(0.0)?;
        let wet = engine.create_gain(0.0)?;
        let dry = engine.create_gain(1.0)?;
        let feedback_filter = engine.create_biquad(
            BiquadKind::HighPass,
            FEEDBACK_FILTER_HZ,
            FEEDBACK_FILTER_Q,
            0.0,
        )?;

        let result = (|| {
            engine.connect(input, dry)?;
            engine.connect(dry, output)?;
            engine.connect(input, line)?;
            engine.connect(line, wet)?;
            engine.connect(wet, output)?;
            engine.connect(line, feedback_filter)?;
            engine.connect(feedback_filter, feedback)?;
            engine.connect(feedback, line)?;
            Ok(())
        })();

        if let Err(err) = result {
            for id in [input, output, line, feedback, wet, dry, feedback_filter] {
                engine.remove_node(id);
            }
            return Err(err);
        }

        Ok(DelayNodes {
            input,
            output,
            line,
            feedback,
            wet,
            dry,
            feedback_filter,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        self.nodes.as_ref().map(|n| (n.input, n.output))
    }

    /// Map a 0..100 intensity onto the wet/dry/feedback/time set and ramp
    /// everything there together.
    pub fn process(&mut self, engine: &mut AudioEngine, raw_intensity: f32) {
        let Some(intensity) = clamp_intensity(raw_intensity) else {
            return;
        };
        self.intensity = intensity;
        let Some(nodes) = &self.nodes else {
            return;
        };

        let norm = intensity / 100.0;
        let time = (BASE_DELAY_SECS + norm * 0.05).min(MAX_DELAY_SECS);
        engine.set_gain(nodes.wet, norm * 0.8, RAMP_SECS);
        engine.set_gain(nodes.dry, 1.0 - norm * 0.2, RAMP_SECS);
        engine.set_gain(nodes.feedback, norm * 0.6, RAMP_SECS);
        engine.set_delay_time(nodes.line, time, RAMP_SECS);
    }

    /// Ramp back to a transparent pass-through.
    pub fn reset(&mut self, engine: &mut AudioEngine) {
        if let Some(nodes) = &self.nodes {
            engine.set_gain(nodes.wet, 0.0, RAMP_SECS);
            engine.set_gain(nodes.dry, 1.0, RAMP_SECS);
            engine.set_gain(nodes.feedback, 0.0, RAMP_SECS);
            engine.set_delay_time(nodes.line, BASE_DELAY_SECS, RAMP_SECS);
        }
        self.intensity = 0.0;
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Release all nodes. Safe to call repeatedly.
    pub fn cleanup(&mut self, engine: &mut AudioEngine) {
        if let Some(nodes) = self.nodes.take() {
            for id in [
                nodes.input,
                nodes.output,
                nodes.line,
                nodes.feedback,
                nodes.wet,
                nodes.dry,
                nodes.feedback_filter,
            ] {
                engine.remove_node(id);
            }
        }
    }
}
