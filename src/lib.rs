pub mod automation; // Emotion-signal parameter mapping
pub mod controller; // Throttled chain (re)wiring
pub mod dsp;
pub mod engine;
pub mod modules; // Effect modules built on engine nodes
pub mod processor;

pub use automation::AutomationRecommendation;
pub use engine::EngineConfig;
pub use processor::AttuneProcessor;

/// Frames processed per internal scheduling step.
pub const RENDER_QUANTUM: usize = 128;
