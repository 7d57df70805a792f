//! Audio engine: a node arena, an edge list, and a quantum-based scheduler.
//!
//! The engine is the single owner of all processing nodes. Everything above
//! it (effect modules, the graph controller) holds plain [`NodeId`] handles
//! and talks to nodes through typed setters, so parameter writes stay
//! fire-and-forget and no reference to internal DSP state ever escapes.
//!
//! Rendering walks the live nodes in topological order once per 128-frame
//! quantum. Edges that point *into* a delay node are left out of the
//! ordering: the delay emits its line contents first and absorbs the
//! quantum's input afterwards, which is what lets the feedback wiring of the
//! delay effect exist without an unresolvable cycle.

pub mod node;

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dsp::biquad::{Biquad, BiquadKind};
use crate::dsp::convolver::Convolver;
use crate::dsp::delay::DelayLine;
use crate::dsp::impulse::StereoImpulse;
use crate::dsp::ramp::LinearRamp;
use crate::RENDER_QUANTUM;

pub use node::{NodeId, StereoBuffer};
use node::{AnalyserState, Node, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Suspended,
    Running,
}

/// The engine itself could not be created or resumed. Retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    Unavailable,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unavailable => write!(f, "audio engine unavailable"),
        }
    }
}

impl Error for EngineError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    /// Node allocation attempted while the engine is suspended.
    EngineDown,
    /// Wiring referenced a node that does not exist (or was released).
    NodeMissing,
    /// Even the minimal source -> gain -> destination chain failed.
    BypassFailed,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::EngineDown => write!(f, "engine is not running"),
            GraphError::NodeMissing => write!(f, "node missing from graph"),
            GraphError::BypassFailed => write!(f, "bypass chain could not be wired"),
        }
    }
}

impl Error for GraphError {}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: f32,
    /// Minimum interval between graph reconnects.
    pub throttle_window: Duration,
    /// User baseline volume the automation layer interpolates from.
    pub base_volume: f32,
    /// Gesture amplitude at which emotion volume reaches half scale.
    pub nod_threshold: f32,
    /// Source ring capacity in frames.
    pub source_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            throttle_window: Duration::from_millis(1000),
            base_volume: 1.0,
            nod_threshold: 10.0,
            source_capacity: 8192,
        }
    }
}

enum SourceFeed {
    Queue(VecDeque<[f32; 2]>),
    #[cfg(feature = "rtrb")]
    Ring(rtrb::Consumer<[f32; 2]>),
}

pub struct AudioEngine {
    sample_rate: f32,
    state: EngineState,
    nodes: Vec<Option<Node>>,
    edges: Vec<(NodeId, NodeId)>,
    order: Vec<NodeId>,
    order_dirty: bool,
    /// Bumped on every effective wiring change.
    generation: u64,
    source: NodeId,
    destination: NodeId,
    feed: SourceFeed,
    feed_capacity: usize,
    feed_scratch: StereoBuffer,
    push_scratch: StereoBuffer,
    stash: StereoBuffer,
    stash_remaining: usize,
}

impl AudioEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        if !config.sample_rate.is_finite() || config.sample_rate <= 0.0 {
            return Err(EngineError::Unavailable);
        }

        let nodes = vec![
            Some(Node::new(NodeKind::Source)),
            Some(Node::new(NodeKind::Destination)),
        ];

        Ok(Self {
            sample_rate: config.sample_rate,
            state: EngineState::Suspended,
            nodes,
            edges: Vec::new(),
            order: Vec::new(),
            order_dirty: true,
            generation: 0,
            source: NodeId(0),
            destination: NodeId(1),
            feed: SourceFeed::Queue(VecDeque::new()),
            feed_capacity: config.source_capacity.max(RENDER_QUANTUM),
            feed_scratch: StereoBuffer::new(RENDER_QUANTUM),
            push_scratch: StereoBuffer::new(RENDER_QUANTUM),
            stash: StereoBuffer::new(RENDER_QUANTUM),
            stash_remaining: 0,
        })
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Running {
            self.state = EngineState::Running;
            info!(sample_rate = self.sample_rate, "engine running");
        }
        Ok(())
    }

    pub fn suspend(&mut self) {
        self.state = EngineState::Suspended;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // ---- node lifecycle -------------------------------------------------

    fn ensure_running(&self) -> Result<(), GraphError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(GraphError::EngineDown)
        }
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        for (i, slot) in self.nodes.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Node::new(kind));
                self.order_dirty = true;
                return NodeId(i as u32);
            }
        }
        self.nodes.push(Some(Node::new(kind)));
        self.order_dirty = true;
        NodeId((self.nodes.len() - 1) as u32)
    }

    pub fn create_gain(&mut self, level: f32) -> Result<NodeId, GraphError> {
        self.ensure_running()?;
        Ok(self.alloc(NodeKind::Gain {
            level: LinearRamp::new(level),
        }))
    }

    pub fn create_biquad(
        &mut self,
        kind: BiquadKind,
        freq_hz: f32,
        q: f32,
        gain_db: f32,
    ) -> Result<NodeId, GraphError> {
        self.ensure_running()?;
        let filter = Biquad::new(kind, freq_hz, q, gain_db, self.sample_rate);
        Ok(self.alloc(NodeKind::Biquad {
            filter,
            freq: LinearRamp::new(freq_hz),
            gain_db: LinearRamp::new(gain_db),
        }))
    }

    pub fn create_delay(&mut self, max_secs: f32, initial_secs: f32) -> Result<NodeId, GraphError> {
        self.ensure_running()?;
        let capacity = (max_secs.max(0.0) * self.sample_rate) as usize + RENDER_QUANTUM;
        Ok(self.alloc(NodeKind::Delay {
            lines: [DelayLine::new(capacity), DelayLine::new(capacity)],
            time: LinearRamp::new(initial_secs.max(0.0)),
        }))
    }

    pub fn create_convolver(&mut self, impulse: &StereoImpulse) -> Result<NodeId, GraphError> {
        self.ensure_running()?;
        Ok(self.alloc(NodeKind::Convolver {
            left: Convolver::new(&impulse.left, RENDER_QUANTUM),
            right: Convolver::new(&impulse.right, RENDER_QUANTUM),
        }))
    }

    pub fn create_analyser(&mut self, window: usize, smoothing: f32) -> Result<NodeId, GraphError> {
        self.ensure_running()?;
        Ok(self.alloc(NodeKind::Analyser(AnalyserState::new(window, smoothing))))
    }

    pub fn node_exists(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).map_or(false, Option::is_some)
    }

    /// Release a node and every edge touching it. Endpoint nodes are
    /// engine-owned and refuse removal.
    pub fn remove_node(&mut self, id: NodeId) {
        if id == self.source || id == self.destination {
            warn!("refusing to remove engine endpoint node");
            return;
        }
        let Some(slot) = self.nodes.get_mut(id.index()) else {
            return;
        };
        if slot.take().is_some() {
            let before = self.edges.len();
            self.edges.retain(|&(from, to)| from != id && to != id);
            if self.edges.len() != before {
                self.generation += 1;
            }
            self.order_dirty = true;
        }
    }

    // ---- wiring ---------------------------------------------------------

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if !self.node_exists(from) || !self.node_exists(to) || from == to {
            return Err(GraphError::NodeMissing);
        }
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
            self.generation += 1;
            self.order_dirty = true;
        }
        Ok(())
    }

    /// Drop every edge leaving `from`.
    pub fn disconnect_outputs(&mut self, from: NodeId) {
        let before = self.edges.len();
        self.edges.retain(|&(f, _)| f != from);
        if self.edges.len() != before {
            self.generation += 1;
            self.order_dirty = true;
        }
    }

    // ---- parameter writes (fire-and-forget) -----------------------------

    pub fn set_gain(&mut self, id: NodeId, value: f32, ramp_secs: f32) {
        if !value.is_finite() {
            debug!(?id, value, "rejected non-finite gain");
            return;
        }
        let sample_rate = self.sample_rate;
        if let Some(Node {
            kind: NodeKind::Gain { level },
            ..
        }) = self.nodes.get_mut(id.index()).and_then(Option::as_mut)
        {
            level.set_target(value, ramp_secs, sample_rate);
        }
    }

    pub fn set_biquad_params(
        &mut self,
        id: NodeId,
        freq_hz: Option<f32>,
        gain_db: Option<f32>,
        ramp_secs: f32,
    ) {
        if freq_hz.map_or(false, |f| !f.is_finite())
            || gain_db.map_or(false, |g| !g.is_finite())
        {
            debug!(?id, "rejected non-finite biquad parameters");
            return;
        }
        let sample_rate = self.sample_rate;
        if let Some(Node {
            kind:
                NodeKind::Biquad {
                    filter,
                    freq,
                    gain_db: gain,
                },
            ..
        }) = self.nodes.get_mut(id.index()).and_then(Option::as_mut)
        {
            if let Some(f) = freq_hz {
                freq.set_target(f, ramp_secs, sample_rate);
            }
            if let Some(g) = gain_db {
                gain.set_target(g, ramp_secs, sample_rate);
            }
            if ramp_secs <= 0.0 {
                filter.set_params(freq_hz, gain_db);
            }
        }
    }

    pub fn set_delay_time(&mut self, id: NodeId, secs: f32, ramp_secs: f32) {
        if !secs.is_finite() || secs < 0.0 {
            debug!(?id, secs, "rejected invalid delay time");
            return;
        }
        let sample_rate = self.sample_rate;
        if let Some(Node {
            kind: NodeKind::Delay { time, .. },
            ..
        }) = self.nodes.get_mut(id.index()).and_then(Option::as_mut)
        {
            time.set_target(secs, ramp_secs, sample_rate);
        }
    }

    /// Swap the impulse response of a convolver node in place.
    pub fn set_convolver_impulse(&mut self, id: NodeId, impulse: &StereoImpulse) {
        if let Some(Node {
            kind: NodeKind::Convolver { left, right },
            ..
        }) = self.nodes.get_mut(id.index()).and_then(Option::as_mut)
        {
            *left = Convolver::new(&impulse.left, RENDER_QUANTUM);
            *right = Convolver::new(&impulse.right, RENDER_QUANTUM);
        }
    }

    // ---- parameter reads (display mirroring, tests) ---------------------

    pub fn gain_target(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            Some(Node {
                kind: NodeKind::Gain { level },
                ..
            }) => Some(level.target()),
            _ => None,
        }
    }

    pub fn delay_time_target(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            Some(Node {
                kind: NodeKind::Delay { time, .. },
                ..
            }) => Some(time.target()),
            _ => None,
        }
    }

    pub fn biquad_freq_target(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            Some(Node {
                kind: NodeKind::Biquad { freq, .. },
                ..
            }) => Some(freq.target()),
            _ => None,
        }
    }

    pub fn biquad_gain_target(&self, id: NodeId) -> Option<f32> {
        match self.nodes.get(id.index()).and_then(Option::as_ref) {
            Some(Node {
                kind: NodeKind::Biquad { gain_db, .. },
                ..
            }) => Some(gain_db.target()),
            _ => None,
        }
    }

    pub fn analyser_magnitudes(&mut self, id: NodeId) -> Option<Vec<f32>> {
        match self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
            Some(Node {
                kind: NodeKind::Analyser(state),
                ..
            }) => Some(state.magnitudes().to_vec()),
            _ => None,
        }
    }

    // ---- source feed ----------------------------------------------------

    /// Queue playback frames for the source node (direct-push mode).
    pub fn push_source_frames(&mut self, frames: &[[f32; 2]]) {
        match &mut self.feed {
            SourceFeed::Queue(queue) => {
                let room = self.feed_capacity.saturating_sub(queue.len());
                if frames.len() > room {
                    debug!(dropped = frames.len() - room, "source queue full");
                }
                queue.extend(frames.iter().take(room).copied());
            }
            #[cfg(feature = "rtrb")]
            SourceFeed::Ring(_) => {
                debug!("push ignored: ring writer is installed");
            }
        }
    }

    /// Install a lock-free ring feed and hand the producer to the playback
    /// thread. Replaces any previously queued frames.
    #[cfg(feature = "rtrb")]
    pub fn source_writer(&mut self) -> rtrb::Producer<[f32; 2]> {
        let (producer, consumer) = rtrb::RingBuffer::new(self.feed_capacity);
        self.feed = SourceFeed::Ring(consumer);
        producer
    }

    fn fill_source_scratch(&mut self) {
        let frames = self.feed_scratch.frames();
        for i in 0..frames {
            let frame = match &mut self.feed {
                SourceFeed::Queue(queue) => queue.pop_front().unwrap_or([0.0; 2]),
                #[cfg(feature = "rtrb")]
                SourceFeed::Ring(consumer) => consumer.pop().unwrap_or([0.0; 2]),
            };
            self.feed_scratch.left[i] = frame[0];
            self.feed_scratch.right[i] = frame[1];
        }
    }

    // ---- rendering ------------------------------------------------------

    /// Render into caller buffers of any (equal) length.
    ///
    /// Suspended engines render silence. Internally the graph always steps
    /// in whole quanta; a partial quantum is stashed for the next call.
    pub fn render_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        if self.state != EngineState::Running {
            left[..frames].fill(0.0);
            right[..frames].fill(0.0);
            return;
        }

        let mut written = 0;
        while written < frames {
            if self.stash_remaining == 0 {
                self.process_quantum();
                self.stash_remaining = RENDER_QUANTUM;
            }
            let start = RENDER_QUANTUM - self.stash_remaining;
            let n = (frames - written).min(self.stash_remaining);
            left[written..written + n].copy_from_slice(&self.stash.left[start..start + n]);
            right[written..written + n].copy_from_slice(&self.stash.right[start..start + n]);
            written += n;
            self.stash_remaining -= n;
        }
    }

    fn process_quantum(&mut self) {
        if self.order_dirty {
            self.rebuild_order();
        }
        self.fill_source_scratch();

        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                node.input.clear();
            }
        }

        let sample_rate = self.sample_rate;
        for idx in 0..self.order.len() {
            let id = self.order[idx];
            if let Some(node) = self.nodes[id.index()].as_mut() {
                node.process(sample_rate, &self.feed_scratch);
                self.push_scratch.copy_from(&node.output);
            } else {
                continue;
            }
            for k in 0..self.edges.len() {
                let (from, to) = self.edges[k];
                if from == id {
                    if let Some(successor) = self.nodes[to.index()].as_mut() {
                        successor.input.add_from(&self.push_scratch);
                    }
                }
            }
        }

        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                node.commit_delay();
            }
        }

        if let Some(dest) = self.nodes[self.destination.index()].as_ref() {
            self.stash.copy_from(&dest.output);
        }
    }

    /// Topological order over live nodes, ignoring edges into delay nodes
    /// (those resolve one quantum late by design).
    fn rebuild_order(&mut self) {
        let n = self.nodes.len();
        let is_delay: Vec<bool> = self
            .nodes
            .iter()
            .map(|slot| slot.as_ref().map_or(false, Node::is_delay))
            .collect();
        let alive: Vec<bool> = self.nodes.iter().map(Option::is_some).collect();

        let mut indegree = vec![0usize; n];
        for &(from, to) in &self.edges {
            if alive[from.index()] && alive[to.index()] && !is_delay[to.index()] {
                indegree[to.index()] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n)
            .filter(|&i| alive[i] && indegree[i] == 0)
            .collect();
        self.order.clear();
        while let Some(i) = queue.pop_front() {
            self.order.push(NodeId(i as u32));
            for &(from, to) in &self.edges {
                let t = to.index();
                if from.index() == i && alive[t] && !is_delay[t] {
                    indegree[t] -= 1;
                    if indegree[t] == 0 {
                        queue.push_back(t);
                    }
                }
            }
        }

        let live_count = alive.iter().filter(|&&a| a).count();
        if self.order.len() < live_count {
            warn!(
                scheduled = self.order.len(),
                live = live_count,
                "cycle outside a delay node; unreachable nodes skipped"
            );
        }
        self.order_dirty = false;
    }
}
