use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/*
Uniform partitioned convolution (frequency-domain delay line)
=============================================================

Direct convolution with a reverb-length impulse response (tens of thousands
of taps) is far too expensive per sample. Instead the impulse response is cut
into equal partitions of one block each; every partition is transformed once
at construction. At runtime each input block is transformed once, pushed into
a ring of past input spectra, and the output spectrum is the sum of
`history[j] * partition[j]` over all partitions - overlap-save with an FFT
size of twice the block length. Cost per block is one forward FFT, one
inverse FFT and a complex multiply-accumulate per partition, independent of
the impulse length in time terms.

Partition 0 covers the current block, so the convolver adds no latency: an
identity impulse (single unit spike) reproduces its input exactly.
*/

pub struct Convolver {
    part_len: usize,
    fft_len: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Spectra of the impulse-response partitions.
    partitions: Vec<Vec<Complex<f32>>>,
    /// Ring of past input-block spectra, newest at `history_pos`.
    history: Vec<Vec<Complex<f32>>>,
    history_pos: usize,
    prev_input: Vec<f32>,
    time_buf: Vec<Complex<f32>>,
    acc_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    pub fn new(impulse: &[f32], part_len: usize) -> Self {
        let part_len = part_len.max(1);
        let fft_len = part_len * 2;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let n_parts = if impulse.is_empty() {
            1
        } else {
            (impulse.len() + part_len - 1) / part_len
        };

        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let mut partitions = Vec::with_capacity(n_parts);
        for part in 0..n_parts {
            let mut buf = vec![Complex::default(); fft_len];
            let start = part * part_len;
            let end = (start + part_len).min(impulse.len());
            if start < impulse.len() {
                for (slot, &tap) in buf.iter_mut().zip(impulse[start..end].iter()) {
                    slot.re = tap;
                }
            }
            fft.process_with_scratch(&mut buf, &mut scratch);
            partitions.push(buf);
        }

        Self {
            part_len,
            fft_len,
            fft,
            ifft,
            history: vec![vec![Complex::default(); fft_len]; n_parts],
            history_pos: 0,
            prev_input: vec![0.0; part_len],
            time_buf: vec![Complex::default(); fft_len],
            acc_buf: vec![Complex::default(); fft_len],
            scratch,
            partitions,
        }
    }

    pub fn partition_len(&self) -> usize {
        self.part_len
    }

    /// Convolve one block. `input` and `output` must both be one partition
    /// long; blocks must arrive back to back.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), self.part_len);
        debug_assert_eq!(output.len(), self.part_len);

        // Overlap-save frame: [previous block | current block]
        for i in 0..self.part_len {
            self.time_buf[i] = Complex::new(self.prev_input[i], 0.0);
            self.time_buf[self.part_len + i] = Complex::new(input[i], 0.0);
        }
        self.prev_input.copy_from_slice(input);
        self.fft
            .process_with_scratch(&mut self.time_buf, &mut self.scratch);

        let n = self.history.len();
        self.history_pos = (self.history_pos + 1) % n;
        self.history[self.history_pos].copy_from_slice(&self.time_buf);

        self.acc_buf.fill(Complex::default());
        for (j, part) in self.partitions.iter().enumerate() {
            let spectrum = &self.history[(self.history_pos + n - j) % n];
            for ((acc, &h), &p) in self
                .acc_buf
                .iter_mut()
                .zip(spectrum.iter())
                .zip(part.iter())
            {
                *acc += h * p;
            }
        }

        self.ifft
            .process_with_scratch(&mut self.acc_buf, &mut self.scratch);

        // Second half is the valid overlap-save region
        let norm = 1.0 / self.fft_len as f32;
        for (out, acc) in output.iter_mut().zip(self.acc_buf[self.part_len..].iter()) {
            *out = acc.re * norm;
        }
    }

    /// Forget all streamed input; the impulse response is kept.
    pub fn reset(&mut self) {
        for spectrum in &mut self.history {
            spectrum.fill(Complex::default());
        }
        self.prev_input.fill(0.0);
        self.history_pos = 0;
    }
}
