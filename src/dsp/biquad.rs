use std::f32::consts::TAU;

/*
| response   | built from            | passes          | use here                 |
| ---------- | --------------------- | --------------- | ------------------------ |
| low-shelf  | boost/cut below f0    | everything      | EQ band 0 (60 Hz)        |
| peaking    | boost/cut around f0   | everything      | EQ bands 1-4             |
| high-shelf | boost/cut above f0    | everything      | EQ band 5 (10 kHz)       |
| low-pass   | rolloff above f0      | below cutoff    | enhancer ceiling         |
| high-pass  | rolloff below f0      | above cutoff    | enhancer floor, feedback |

Coefficients follow the RBJ Audio EQ Cookbook. Shelving and peaking filters
take a gain in dB; the pass responses ignore it.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
    Peaking,
    LowShelf,
    HighShelf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    pub fn compute(kind: BiquadKind, freq_hz: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        let freq = freq_hz.clamp(10.0, sample_rate * 0.45);
        let q = q.max(0.01);
        let w0 = TAU * freq / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let (b0, b1, b2, a0, a1, a2) = match kind {
            BiquadKind::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            BiquadKind::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            BiquadKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            BiquadKind::LowShelf => (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
            BiquadKind::HighShelf => (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Direct form I state for one channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2
            - c.a1 * self.y1
            - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Stereo biquad with cached coefficients.
pub struct Biquad {
    kind: BiquadKind,
    freq_hz: f32,
    q: f32,
    gain_db: f32,
    sample_rate: f32,
    coeffs: BiquadCoeffs,
    state: [BiquadState; 2],
}

impl Biquad {
    pub fn new(kind: BiquadKind, freq_hz: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        Self {
            kind,
            freq_hz,
            q,
            gain_db,
            sample_rate,
            coeffs: BiquadCoeffs::compute(kind, freq_hz, q, gain_db, sample_rate),
            state: [BiquadState::default(); 2],
        }
    }

    /// Update frequency and/or gain, recomputing coefficients once.
    pub fn set_params(&mut self, freq_hz: Option<f32>, gain_db: Option<f32>) {
        if let Some(f) = freq_hz {
            self.freq_hz = f;
        }
        if let Some(g) = gain_db {
            self.gain_db = g;
        }
        self.coeffs =
            BiquadCoeffs::compute(self.kind, self.freq_hz, self.q, self.gain_db, self.sample_rate);
    }

    pub fn freq_hz(&self) -> f32 {
        self.freq_hz
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    pub fn process_channel(&mut self, channel: usize, buffer: &mut [f32]) {
        let state = &mut self.state[channel & 1];
        for sample in buffer.iter_mut() {
            *sample = state.process(*sample, &self.coeffs);
        }
    }

    pub fn reset(&mut self) {
        for state in &mut self.state {
            state.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn sine(freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (TAU * freq * i as f32 / SR).sin())
            .collect()
    }

    fn peak_after_transient(buffer: &[f32]) -> f32 {
        let skip = buffer.len().min(256);
        buffer
            .get(skip..)
            .unwrap_or(buffer)
            .iter()
            .fold(0.0f32, |acc, &x| acc.max(x.abs()))
    }

    #[test]
    fn highpass_rejects_low_frequencies() {
        let mut filter = Biquad::new(BiquadKind::HighPass, 1_000.0, 0.5, 0.0, SR);
        let mut buffer = sine(50.0, 2048);
        filter.process_channel(0, &mut buffer);

        assert!(
            peak_after_transient(&buffer) < 0.1,
            "50 Hz should be well below a 1 kHz high-pass"
        );
    }

    #[test]
    fn lowpass_rejects_high_frequencies() {
        let mut filter = Biquad::new(BiquadKind::LowPass, 1_000.0, 0.5, 0.0, SR);
        let mut buffer = sine(12_000.0, 2048);
        filter.process_channel(0, &mut buffer);

        assert!(
            peak_after_transient(&buffer) < 0.1,
            "12 kHz should be well below a 1 kHz low-pass"
        );
    }

    #[test]
    fn peaking_boost_raises_level_at_center() {
        let mut boosted = Biquad::new(BiquadKind::Peaking, 1_000.0, 1.0, 12.0, SR);
        let mut flat = Biquad::new(BiquadKind::Peaking, 1_000.0, 1.0, 0.0, SR);

        let mut a = sine(1_000.0, 4096);
        let mut b = sine(1_000.0, 4096);
        boosted.process_channel(0, &mut a);
        flat.process_channel(0, &mut b);

        let boosted_peak = peak_after_transient(&a);
        let flat_peak = peak_after_transient(&b);
        assert!(
            boosted_peak > flat_peak * 2.0,
            "expected ~12 dB boost at center, got {} vs {}",
            boosted_peak,
            flat_peak
        );
    }

    #[test]
    fn peaking_zero_gain_is_transparent() {
        let mut filter = Biquad::new(BiquadKind::Peaking, 1_000.0, 1.0, 0.0, SR);
        let input = sine(440.0, 1024);
        let mut output = input.clone();
        filter.process_channel(0, &mut output);

        for (x, y) in input.iter().zip(output.iter()).skip(256) {
            assert!((x - y).abs() < 1e-3, "flat peaking filter altered signal");
        }
    }

    #[test]
    fn shelf_cut_lowers_level_below_corner() {
        let mut filter = Biquad::new(BiquadKind::LowShelf, 200.0, 1.0, -12.0, SR);
        let mut buffer = sine(60.0, 4096);
        filter.process_channel(0, &mut buffer);

        let peak = peak_after_transient(&buffer);
        assert!(
            peak < 0.4,
            "-12 dB low shelf should attenuate 60 Hz, peak = {}",
            peak
        );
    }

    #[test]
    fn channels_keep_independent_state() {
        let mut filter = Biquad::new(BiquadKind::LowPass, 500.0, 0.5, 0.0, SR);
        let mut left = sine(100.0, 512);
        let mut right = vec![0.0; 512];

        filter.process_channel(0, &mut left);
        filter.process_channel(1, &mut right);

        assert!(right.iter().all(|&s| s == 0.0), "silent channel stayed silent");
        assert!(left.iter().any(|&s| s.abs() > 0.1));
    }
}
