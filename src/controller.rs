//! Graph controller: owns inter-module wiring and nothing else.
//!
//! The chain order is fixed (equalizer, delay, reverb, enhancement); which
//! stages actually appear in it is decided per reconnect from which modules
//! report themselves fully initialized. Reconnects are throttled to one per
//! window; calls landing inside the window are dropped, never queued.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::engine::{AudioEngine, GraphError};
use crate::modules::{EffectKind, EffectRack, GainStage};

/// Deferred re-attempt distance when a module was not ready yet.
pub const RETRY_DELAY: Duration = Duration::from_millis(250);
/// Dropped-call logging is decimated to one line per this many drops.
const DROP_LOG_EVERY: u32 = 8;

/// Ordered list of stages wired on the last reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTopology {
    pub stages: Vec<EffectKind>,
    pub bypass: bool,
}

pub struct AudioGraphController {
    throttle_window: Duration,
    last_reconnect: Option<Instant>,
    dropped_in_window: u32,
    retry_at: Option<Instant>,
}

impl AudioGraphController {
    pub fn new(throttle_window: Duration) -> Self {
        Self {
            throttle_window,
            last_reconnect: None,
            dropped_in_window: 0,
            retry_at: None,
        }
    }

    pub fn throttle_window(&self) -> Duration {
        self.throttle_window
    }

    fn window_open(&self, now: Instant) -> bool {
        self.last_reconnect
            .map_or(true, |last| now.duration_since(last) >= self.throttle_window)
    }

    /// Rebuild the chain from the currently available modules.
    ///
    /// Returns `Ok(None)` when the call was dropped (engine suspended or
    /// throttle window still closed). A hard error is only possible when
    /// even the bypass chain cannot be wired.
    pub fn request_reconnect(
        &mut self,
        now: Instant,
        engine: &mut AudioEngine,
        rack: &EffectRack,
        gain: &GainStage,
    ) -> Result<Option<GraphTopology>, GraphError> {
        if !engine.is_running() {
            return Ok(None);
        }
        if !self.window_open(now) {
            self.dropped_in_window += 1;
            // Overlapping requests collapse into a single deferred reconnect
            // at the end of the window; the calls themselves are never queued
            if self.retry_at.is_none() {
                if let Some(last) = self.last_reconnect {
                    self.retry_at = Some(last + self.throttle_window);
                }
            }
            if self.dropped_in_window % DROP_LOG_EVERY == 1 {
                debug!(
                    dropped = self.dropped_in_window,
                    "reconnect dropped inside throttle window"
                );
            }
            return Ok(None);
        }

        self.last_reconnect = Some(now);
        self.dropped_in_window = 0;
        self.retry_at = None;
        self.rewire(now, engine, rack, gain).map(Some)
    }

    fn rewire(
        &mut self,
        now: Instant,
        engine: &mut AudioEngine,
        rack: &EffectRack,
        gain: &GainStage,
    ) -> Result<GraphTopology, GraphError> {
        let Some(gain_node) = gain.node() else {
            error!("gain stage missing; not even a bypass chain is possible");
            return Err(GraphError::BypassFailed);
        };
        let source = engine.source();
        let destination = engine.destination();

        // Tear down all previous inter-module links
        engine.disconnect_outputs(source);
        for kind in EffectKind::CHAIN_ORDER {
            if let Some((_, output)) = rack.endpoints(kind) {
                engine.disconnect_outputs(output);
            }
        }
        engine.disconnect_outputs(gain_node);

        let mut prev = source;
        let mut stages = Vec::new();
        let mut missing = false;
        for kind in EffectKind::CHAIN_ORDER {
            match rack.endpoints(kind) {
                Some((input, output)) => match engine.connect(prev, input) {
                    Ok(()) => {
                        prev = output;
                        stages.push(kind);
                    }
                    Err(err) => {
                        warn!(stage = kind.label(), %err, "stage skipped this reconnect");
                    }
                },
                None => missing = true,
            }
        }

        let tail = engine
            .connect(prev, gain_node)
            .and_then(|_| engine.connect(gain_node, destination));
        if let Err(err) = tail {
            warn!(%err, "chain tail failed; falling back to bypass");
            return self.wire_bypass(engine, gain_node);
        }

        if missing {
            self.retry_at = Some(now + RETRY_DELAY);
        }
        info!(
            stages = ?stages.iter().map(|k| k.label()).collect::<Vec<_>>(),
            "graph wired"
        );
        Ok(GraphTopology {
            stages,
            bypass: false,
        })
    }

    /// Minimal source -> gain -> destination chain. Must succeed whenever
    /// the engine itself is alive.
    fn wire_bypass(
        &mut self,
        engine: &mut AudioEngine,
        gain_node: crate::engine::NodeId,
    ) -> Result<GraphTopology, GraphError> {
        engine.disconnect_outputs(engine.source());
        engine.disconnect_outputs(gain_node);

        let wired = engine
            .connect(engine.source(), gain_node)
            .and_then(|_| engine.connect(gain_node, engine.destination()));
        if let Err(err) = wired {
            error!(%err, "bypass wiring failed");
            return Err(GraphError::BypassFailed);
        }

        warn!("running on bypass chain");
        Ok(GraphTopology {
            stages: Vec::new(),
            bypass: true,
        })
    }

    /// True once a deferred re-attempt is due *and* the throttle window has
    /// reopened. Clears the timer; the caller performs the reconnect.
    pub fn service_retry(&mut self, now: Instant) -> bool {
        match self.retry_at {
            Some(at) if now >= at && self.window_open(now) => {
                self.retry_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;

    const WINDOW: Duration = Duration::from_millis(1000);

    struct Fixture {
        engine: AudioEngine,
        rack: EffectRack,
        gain: GainStage,
        controller: AudioGraphController,
    }

    impl Fixture {
        fn new() -> Self {
            let mut engine = AudioEngine::new(&EngineConfig::default()).unwrap();
            engine.resume().unwrap();
            let mut gain = GainStage::new(1.0);
            gain.create(&mut engine);
            Self {
                engine,
                rack: EffectRack::new(),
                gain,
                controller: AudioGraphController::new(WINDOW),
            }
        }

        fn reconnect_at(&mut self, now: Instant) -> Result<Option<GraphTopology>, GraphError> {
            self.controller
                .request_reconnect(now, &mut self.engine, &self.rack, &self.gain)
        }
    }

    #[test]
    fn wires_full_chain_when_all_modules_ready() {
        let mut fx = Fixture::new();
        fx.rack.create_missing(&mut fx.engine);

        let topology = fx.reconnect_at(Instant::now()).unwrap().unwrap();
        assert_eq!(topology.stages, EffectKind::CHAIN_ORDER.to_vec());
        assert!(!topology.bypass);
    }

    #[test]
    fn skips_unavailable_modules_and_arms_retry() {
        let mut fx = Fixture::new();
        fx.rack.delay.create(&mut fx.engine);

        let topology = fx.reconnect_at(Instant::now()).unwrap().unwrap();
        assert_eq!(topology.stages, vec![EffectKind::Delay]);
        assert!(fx.controller.retry_pending());
    }

    #[test]
    fn second_call_inside_window_is_dropped() {
        let mut fx = Fixture::new();
        fx.rack.create_missing(&mut fx.engine);

        let t0 = Instant::now();
        assert!(fx.reconnect_at(t0).unwrap().is_some());
        let generation = fx.engine.generation();

        assert!(fx.reconnect_at(t0 + Duration::from_millis(300)).unwrap().is_none());
        assert_eq!(
            fx.engine.generation(),
            generation,
            "throttled call must not touch the wiring"
        );
    }

    #[test]
    fn call_after_window_reconnects_again() {
        let mut fx = Fixture::new();
        fx.rack.create_missing(&mut fx.engine);

        let t0 = Instant::now();
        let first = fx.reconnect_at(t0).unwrap().unwrap();
        let second = fx.reconnect_at(t0 + WINDOW).unwrap().unwrap();

        assert_eq!(first, second, "unchanged state must rewire identically");
    }

    #[test]
    fn suspended_engine_is_a_silent_no_op() {
        let mut fx = Fixture::new();
        fx.engine.suspend();

        assert_eq!(fx.reconnect_at(Instant::now()), Ok(None));
    }

    #[test]
    fn cleaned_up_module_drops_out_of_next_reconnect() {
        let mut fx = Fixture::new();
        fx.rack.create_missing(&mut fx.engine);

        let t0 = Instant::now();
        fx.reconnect_at(t0).unwrap();

        fx.rack.reverb.cleanup(&mut fx.engine);
        let topology = fx.reconnect_at(t0 + WINDOW).unwrap().unwrap();

        assert_eq!(
            topology.stages,
            vec![EffectKind::Equalizer, EffectKind::Delay, EffectKind::Enhancement]
        );
    }

    #[test]
    fn broken_chain_falls_back_to_bypass() {
        let mut fx = Fixture::new();
        fx.rack.create_missing(&mut fx.engine);

        // Sever the enhancer's output node behind the module's back so the
        // tail connect fails mid-chain
        let (_, output) = fx.rack.enhancer.endpoints().unwrap();
        fx.engine.remove_node(output);

        let topology = fx.reconnect_at(Instant::now()).unwrap().unwrap();
        assert!(topology.bypass);
        assert!(topology.stages.is_empty());
    }

    #[test]
    fn missing_gain_stage_is_a_hard_failure() {
        let mut fx = Fixture::new();
        fx.gain.cleanup(&mut fx.engine);

        assert_eq!(
            fx.reconnect_at(Instant::now()),
            Err(GraphError::BypassFailed)
        );
    }

    #[test]
    fn retry_waits_for_throttle_window() {
        let mut fx = Fixture::new();
        fx.rack.delay.create(&mut fx.engine);

        let t0 = Instant::now();
        fx.reconnect_at(t0).unwrap();
        assert!(fx.controller.retry_pending());

        // Due by time, but window still closed
        assert!(!fx.controller.service_retry(t0 + RETRY_DELAY));
        // Window reopened
        assert!(fx.controller.service_retry(t0 + WINDOW));
        assert!(!fx.controller.retry_pending());
    }

    #[test]
    fn bypass_chain_still_carries_audio() {
        let mut fx = Fixture::new();
        fx.reconnect_at(Instant::now()).unwrap();

        fx.engine.push_source_frames(&vec![[0.5, 0.5]; 128]);
        let mut left = vec![0.0; 128];
        let mut right = vec![0.0; 128];
        fx.engine.render_into(&mut left, &mut right);

        assert!(left.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
