use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::dsp::{biquad::Biquad, convolver::Convolver, delay::DelayLine, ramp::LinearRamp};
use crate::RENDER_QUANTUM;

/// Handle to a node in the engine's arena.
///
/// Plain index, never reused while the node is alive; modules hold these
/// instead of references so the arena stays the single owner of all DSP
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Planar stereo audio block.
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoBuffer {
    pub fn new(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    pub fn copy_from(&mut self, other: &StereoBuffer) {
        self.left.copy_from_slice(&other.left);
        self.right.copy_from_slice(&other.right);
    }

    /// Summing-junction accumulate (fan-in adds).
    pub fn add_from(&mut self, other: &StereoBuffer) {
        for (dst, src) in self.left.iter_mut().zip(other.left.iter()) {
            *dst += src;
        }
        for (dst, src) in self.right.iter_mut().zip(other.right.iter()) {
            *dst += src;
        }
    }
}

/// Rolling magnitude metering over the most recent input window.
pub(crate) struct AnalyserState {
    window: Vec<f32>,
    pos: usize,
    smoothing: f32,
    magnitudes: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl AnalyserState {
    pub(crate) fn new(window_size: usize, smoothing: f32) -> Self {
        let window_size = window_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(window_size);
        let scratch_len = fft.get_inplace_scratch_len();
        Self {
            window: vec![0.0; window_size],
            pos: 0,
            smoothing: smoothing.clamp(0.0, 1.0),
            magnitudes: vec![0.0; window_size / 2],
            fft,
            spectrum: vec![Complex::default(); window_size],
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    #[inline]
    fn push(&mut self, sample: f32) {
        self.window[self.pos] = sample;
        self.pos = (self.pos + 1) % self.window.len();
    }

    /// Recompute and smooth bin magnitudes over the captured window.
    pub(crate) fn magnitudes(&mut self) -> &[f32] {
        let len = self.window.len();
        for (i, slot) in self.spectrum.iter_mut().enumerate() {
            *slot = Complex::new(self.window[(self.pos + i) % len], 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let norm = 1.0 / len as f32;
        let tau = self.smoothing;
        for (bin, slot) in self.spectrum[..len / 2]
            .iter()
            .zip(self.magnitudes.iter_mut())
        {
            let mag = bin.norm() * norm;
            *slot = tau * *slot + (1.0 - tau) * mag;
        }
        &self.magnitudes
    }
}

pub(crate) enum NodeKind {
    /// External playback feed, filled by the engine each quantum.
    Source,
    /// Terminal sink; its output is the engine's rendered block.
    Destination,
    Gain {
        level: LinearRamp,
    },
    Biquad {
        filter: Biquad,
        freq: LinearRamp,
        gain_db: LinearRamp,
    },
    Delay {
        lines: [DelayLine; 2],
        time: LinearRamp,
    },
    Convolver {
        left: Convolver,
        right: Convolver,
    },
    Analyser(AnalyserState),
}

pub(crate) struct Node {
    pub kind: NodeKind,
    pub input: StereoBuffer,
    pub output: StereoBuffer,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            input: StereoBuffer::new(RENDER_QUANTUM),
            output: StereoBuffer::new(RENDER_QUANTUM),
        }
    }

    /// Render one quantum from `input` into `output`.
    ///
    /// Delay nodes only emit here; their input is committed afterwards by
    /// [`Node::commit_delay`] so feedback loops resolve with one quantum of
    /// latency.
    pub(crate) fn process(&mut self, sample_rate: f32, source_frames: &StereoBuffer) {
        let frames = self.input.frames();
        match &mut self.kind {
            NodeKind::Source => {
                self.output.copy_from(source_frames);
            }
            NodeKind::Destination => {
                self.output.copy_from(&self.input);
            }
            NodeKind::Gain { level } => {
                for i in 0..frames {
                    let g = level.next();
                    self.output.left[i] = self.input.left[i] * g;
                    self.output.right[i] = self.input.right[i] * g;
                }
            }
            NodeKind::Biquad {
                filter,
                freq,
                gain_db,
            } => {
                let ramping = freq.is_ramping() || gain_db.is_ramping();
                let f = freq.advance(frames);
                let g = gain_db.advance(frames);
                if ramping {
                    filter.set_params(Some(f), Some(g));
                }
                self.output.copy_from(&self.input);
                filter.process_channel(0, &mut self.output.left);
                filter.process_channel(1, &mut self.output.right);
            }
            NodeKind::Delay { lines, time } => {
                let cap = lines[0].capacity();
                for i in 0..frames {
                    let t = time.next();
                    let d = ((t * sample_rate).round() as usize).clamp(frames, cap - 1);
                    self.output.left[i] = lines[0].read_at(i, d);
                    self.output.right[i] = lines[1].read_at(i, d);
                }
            }
            NodeKind::Convolver { left, right } => {
                left.process(&self.input.left, &mut self.output.left);
                right.process(&self.input.right, &mut self.output.right);
            }
            NodeKind::Analyser(state) => {
                self.output.copy_from(&self.input);
                for i in 0..frames {
                    state.push((self.input.left[i] + self.input.right[i]) * 0.5);
                }
            }
        }
    }

    /// Write this quantum's accumulated input into the delay lines.
    pub(crate) fn commit_delay(&mut self) {
        if let NodeKind::Delay { lines, .. } = &mut self.kind {
            lines[0].write_block(&self.input.left);
            lines[1].write_block(&self.input.right);
        }
    }

    pub(crate) fn is_delay(&self) -> bool {
        matches!(self.kind, NodeKind::Delay { .. })
    }
}
