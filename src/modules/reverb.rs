use rand::thread_rng;
use tracing::debug;

use crate::dsp::impulse;
use crate::engine::{AudioEngine, GraphError, NodeId};
use crate::modules::clamp_intensity;

pub const DEFAULT_ROOM_SIZE: f32 = 50.0;
pub const DEFAULT_DAMPING: f32 = 30.0;
const RAMP_SECS: f32 = 0.1;
/// Floor under the energy norm; keeps the output trim from blowing up when
/// both mix gains sit near zero.
const ENERGY_FLOOR: f32 = 0.1;

struct ReverbNodes {
    input: NodeId,
    output: NodeId,
    convolver: NodeId,
    wet: NodeId,
    dry: NodeId,
}

/// Convolution reverb driven by a procedurally synthesized room response.
///
/// The dry path and the convolved wet path sum into a master trim whose gain
/// normalizes combined energy: `1 / max(sqrt(dry^2 + wet^2), floor)`. The
/// trim is deliberately left free to exceed the master volume ceiling at
/// extreme mixes.
pub struct ReverbModule {
    nodes: Option<ReverbNodes>,
    amount: f32,
    room_size: f32,
    damping: f32,
    /// Room/damping values baked into the current impulse response.
    ir_room_size: f32,
    ir_damping: f32,
}

impl Default for ReverbModule {
    fn default() -> Self {
        Self {
            nodes: None,
            amount: 0.0,
            room_size: DEFAULT_ROOM_SIZE,
            damping: DEFAULT_DAMPING,
            ir_room_size: DEFAULT_ROOM_SIZE,
            ir_damping: DEFAULT_DAMPING,
        }
    }
}

impl ReverbModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesize the impulse response and wire the wet/dry network.
    pub fn create(&mut self, engine: &mut AudioEngine) -> bool {
        if self.nodes.is_some() {
            return true;
        }
        if !engine.is_running() {
            return false;
        }
        match self.build(engine) {
            Ok(nodes) => {
                self.nodes = Some(nodes);
                self.ir_room_size = self.room_size;
                self.ir_damping = self.damping;
                true
            }
            Err(err) => {
                debug!(%err, "reverb network allocation failed");
                false
            }
        }
    }

    fn build(&self, engine: &mut AudioEngine) -> Result<ReverbNodes, GraphError> {
        let ir = impulse::synthesize(
            engine.sample_rate(),
            self.room_size,
            self.damping,
            &mut thread_rng(),
        );

        let input = engine.create_gain(1.0)?;
        let output = engine.create_gain(1.0)?;
        let convolver = engine.create_convolver(&ir)?;
        let wet = engine.create_gain(0.0)?;
        let dry = engine.create_gain(1.0)?;

        let result = (|| {
            engine.connect(input, dry)?;
            engine.connect(dry, output)?;
            engine.connect(input, convolver)?;
            engine.connect(convolver, wet)?;
            engine.connect(wet, output)?;
            Ok(())
        })();

        if let Err(err) = result {
            for id in [input, output, convolver, wet, dry] {
                engine.remove_node(id);
            }
            return Err(err);
        }

        Ok(ReverbNodes {
            input,
            output,
            convolver,
            wet,
            dry,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn endpoints(&self) -> Option<(NodeId, NodeId)> {
        self.nodes.as_ref().map(|n| (n.input, n.output))
    }

    /// Re-derive the wet/dry/master gains from an amount in 0..100 and
    /// rebuild the impulse response when the room changed under it.
    pub fn update_parameters(
        &mut self,
        engine: &mut AudioEngine,
        raw_amount: f32,
        room_size: f32,
        damping: f32,
    ) {
        let Some(amount) = clamp_intensity(raw_amount) else {
            return;
        };
        self.amount = amount;
        self.room_size = room_size.max(0.0);
        self.damping = damping.clamp(0.0, 100.0);

        let Some(nodes) = &self.nodes else {
            return;
        };

        if self.room_size != self.ir_room_size || self.damping != self.ir_damping {
            let ir = impulse::synthesize(
                engine.sample_rate(),
                self.room_size,
                self.damping,
                &mut thread_rng(),
            );
            engine.set_convolver_impulse(nodes.convolver, &ir);
            self.ir_room_size = self.room_size;
            self.ir_damping = self.damping;
        }

        let norm = amount / 100.0;
        let dry = 1.0 - norm;
        let wet = norm * 0.8;
        let master = 1.0 / (dry * dry + wet * wet).sqrt().max(ENERGY_FLOOR);

        engine.set_gain(nodes.dry, dry, RAMP_SECS);
        engine.set_gain(nodes.wet, wet, RAMP_SECS);
        engine.set_gain(nodes.output, master, RAMP_SECS);
    }

    pub fn process(&mut self, engine: &mut AudioEngine, raw_amount: f32) {
        let room_size = self.room_size;
        let damping = self.damping;
        self.update_parameters(engine, raw_amount, room_size, damping);
    }

    pub fn reset(&mut self, engine: &mut AudioEngine) {
        let room_size = self.room_size;
        let damping = self.damping;
        self.update_parameters(engine, 0.0, room_size, damping);
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn room_size(&self) -> f32 {
        self.room_size
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    /// Release all nodes. Safe to call repeatedly.
    pub fn cleanup(&mut self, engine: &mut AudioEngine) {
        if let Some(nodes) = self.nodes.take() {
            for id in [nodes.input, nodes.output, nodes.convolver, nodes.wet, nodes.dry] {
                engine.remove_node(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;

    fn engine() -> AudioEngine {
        let mut engine = AudioEngine::new(&EngineConfig::default()).unwrap();
        engine.resume().unwrap();
        engine
    }

    fn mix_targets(module: &ReverbModule, engine: &AudioEngine) -> (f32, f32, f32) {
        let nodes = module.nodes.as_ref().unwrap();
        (
            engine.gain_target(nodes.dry).unwrap(),
            engine.gain_target(nodes.wet).unwrap(),
            engine.gain_target(nodes.output).unwrap(),
        )
    }

    #[test]
    fn half_amount_energy_normalization() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        assert!(module.create(&mut engine));

        module.process(&mut engine, 50.0);
        let (dry, wet, master) = mix_targets(&module, &engine);

        assert!((dry - 0.5).abs() < 1e-6);
        assert!((wet - 0.4).abs() < 1e-6);
        // 1 / sqrt(0.25 + 0.16) = 1.5617
        assert!((master - 1.5617).abs() < 1e-3, "master = {}", master);
    }

    #[test]
    fn full_amount_parameter_set() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);

        module.process(&mut engine, 100.0);
        let (dry, wet, master) = mix_targets(&module, &engine);

        assert_eq!(dry, 0.0);
        assert!((wet - 0.8).abs() < 1e-6);
        assert!((master - 1.25).abs() < 1e-3);
    }

    #[test]
    fn master_trim_may_exceed_volume_ceiling() {
        // Near amount 61 the combined energy dips to its minimum and the
        // trim crosses 1.45; that headroom is deliberate
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);

        module.process(&mut engine, 61.0);
        let (_, _, master) = mix_targets(&module, &engine);

        assert!(master > 1.45, "trim should be free of the ceiling, got {}", master);
    }

    #[test]
    fn energy_floor_prevents_blow_up() {
        // dry=1, wet=0 at amount 0: norm term is 1, not the floor
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);

        module.reset(&mut engine);
        let (dry, wet, master) = mix_targets(&module, &engine);

        assert_eq!(dry, 1.0);
        assert_eq!(wet, 0.0);
        assert!((master - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_twice_equals_reset_once() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);
        module.process(&mut engine, 80.0);

        module.reset(&mut engine);
        let first = mix_targets(&module, &engine);
        module.reset(&mut engine);

        assert_eq!(mix_targets(&module, &engine), first);
        assert_eq!(module.amount(), 0.0);
    }

    #[test]
    fn amount_clamps_into_range() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);

        module.process(&mut engine, 180.0);
        assert_eq!(module.amount(), 100.0);

        module.process(&mut engine, -20.0);
        assert_eq!(module.amount(), 0.0);
    }

    #[test]
    fn wired_module_produces_tail() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);
        module.process(&mut engine, 100.0);
        let (input, output) = module.endpoints().unwrap();
        engine.connect(engine.source(), input).unwrap();
        engine.connect(output, engine.destination()).unwrap();

        // One loud block, then silence; the tail must keep ringing
        engine.push_source_frames(&vec![[0.8, 0.8]; 128]);
        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        engine.render_into(&mut left, &mut right);

        let tail = &left[1024..];
        assert!(tail.iter().any(|&s| s.abs() > 1e-4), "expected a reverb tail");
        assert!(left.iter().all(|&s| s.is_finite()));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut engine = engine();
        let mut module = ReverbModule::new();
        module.create(&mut engine);
        let (input, _) = module.endpoints().unwrap();

        module.cleanup(&mut engine);
        module.cleanup(&mut engine);

        assert!(!module.is_ready());
        assert!(!engine.node_exists(input));
    }
}
