use tracing::debug;

use crate::dsp::biquad::BiquadKind;
use crate::engine::{AudioEngine, GraphError, NodeId};
use crate::modules::clamp_intensity;

const HIGHPASS_BASE_HZ: f32 = 100.0;
const HIGHPASS_SPAN_HZ: f32 = 200.0;
const LOWPASS_BASE_HZ: f32 = 8000.0;
const LOWPASS_SPAN_HZ: f32 = 4000.0;
const FILTER_Q: f32 = 0.5;
const GAIN_SPAN: f32 = 0.8;
const ANALYSER_WINDOW: usize = 256;
const ANALYSER_SMOOTHING: f32 = 0.3;
const RAMP_SECS: f32 = 0.1;

struct EnhancerNodes {
    highpass: NodeId,
    lowpass: NodeId,
    analyser: NodeId,
    output: NodeId,
}

/// Rhythmic enhancer: a band-carving filter pair into an output gain, with a
/// passthrough analyser tap for downstream metering.
#[derive(Default)]
pub struct EnhancementModule {
    nodes: Option<EnhancerNodes>,
    intensity: f32,
}

impl EnhancementModule {
    pub fn new() -> Self {
        Self::default()
    }

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
                debug!(%err, "enhancer allocation failed");
                false
            }
        }
    }

    fn build(engine: &mut AudioEngine) -> Result<EnhancerNodes, GraphError> {
        let highpass =
            engine.create_biquad(BiquadKind::HighPass, HIGHPASS_BASE_HZ, FILTER_Q, 0.0)?;
        let lowpass = engine.create_biquad(BiquadKind::LowPass, LOWPASS_BASE_HZ, FILTER_Q, 0.0)?;
        let analyser = engine.create_analyser(ANALYSER_WINDOW, ANALYSER_SMOOTHING)?;
        let output = engine.create_gain(1.0)?;

        let result = (|| {
            engine.connect(highpass, lowpass)?;
            engine.connect(lowpass, analyser)?;
            engine.connect(analyser, output)?;
            Ok(())
        })();

        if let Err(err) = result {
            for id in [highpass, lowpass, analyser, output] {
                engine.remove_node(id);
            }
            return Err(err);
        }

        Ok(EnhancerNodes {
            highpass,
            lowpass,
            analyser,
            output,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        self.nodes.as_ref().map(|n| (n.highpass, n.output))
    }

    /// Intensity widens the carved band upward and adds presence gain.
    pub fn process(&mut self, engine: &mut AudioEngine, raw_intensity: f32) {
        let Some(intensity) = clamp_intensity(raw_intensity) else {
            return;
        };
        self.intensity = intensity;
        let Some(nodes) = &self.nodes else {
            return;
        };

        let norm = intensity / 100.0;
        engine.set_biquad_params(
            nodes.highpass,
            Some(HIGHPASS_BASE_HZ + norm * HIGHPASS_SPAN_HZ),
            None,
            RAMP_SECS,
        );
        engine.set_biquad_params(
            nodes.lowpass,
            Some(LOWPASS_BASE_HZ + norm * LOWPASS_SPAN_HZ),
            None,
            RAMP_SECS,
        );
        engine.set_gain(nodes.output, 1.0 + norm * GAIN_SPAN, RAMP_SECS);
    }

    pub fn reset(&mut self, engine: &mut AudioEngine) {
        if let Some(nodes) = &self.nodes {
            engine.set_biquad_params(nodes.highpass, Some(HIGHPASS_BASE_HZ), None, RAMP_SECS);
            engine.set_biquad_params(nodes.lowpass, Some(LOWPASS_BASE_HZ), None, RAMP_SECS);
            engine.set_gain(nodes.output, 1.0, RAMP_SECS);
        }
        self.intensity = 0.0;
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// Smoothed spectrum of the most recent processed window.
    pub fn meter_magnitudes(&self, engine: &mut AudioEngine) -> Option<Vec<f32>> {
        self.nodes
            .as_ref()
            .and_then(|n| engine.analyser_magnitudes(n.analyser))
    }

    /// Release all nodes. Safe to call repeatedly.
    pub fn cleanup(&mut self, engine: &mut AudioEngine) {
        if let Some(nodes) = self.nodes.take() {
            for id in [nodes.highpass, nodes.lowpass, nodes.analyser, nodes.output] {
                engine.remove_node(id);
            }
        }
    }
}
