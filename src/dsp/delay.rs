/// Circular delay line with separate read and commit phases.
///
/// The read phase (`read_at`) only inspects previously committed samples and
/// the commit phase (`write_block`) appends a whole block at once. Splitting
/// the two lets the engine place a delay inside a feedback loop: the delayed
/// signal for the current block is emitted before the block's input exists,
/// giving the loop a one-block latency instead of an unresolvable cycle.
/// Callers must keep the delay distance at or above the block length so reads
/// never land inside the region about to be committed.
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Sample delayed by `delay_samples`, as seen `offset` frames into the
    /// current (not yet committed) block.
    #[inline]
    pub fn read_at(&self, offset: usize, delay_samples: usize) -> f32 {
        let cap = self.buffer.len();
        let delay = delay_samples.min(cap - 1);
        let idx = (self.write_pos + offset + cap - delay) % cap;
        self.buffer[idx]
    }

    /// Commit a finished block into the line.
    pub fn write_block(&mut self, input: &[f32]) {
        let cap = self.buffer.len();
        for (i, &sample) in input.iter().enumerate() {
            self.buffer[(self.write_pos + i) % cap] = sample;
        }
        self.write_pos = (self.write_pos + input.len()) % cap;
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_after_delay_distance() {
        let mut line = DelayLine::new(64);

        let mut block = vec![0.0; 16];
        block[0] = 1.0;
        line.write_block(&block);

        // 16 samples later the impulse sits 16 samples back
        assert!((line.read_at(0, 16) - 1.0).abs() < 1e-6);
        assert_eq!(line.read_at(1, 16), 0.0);
    }

    #[test]
    fn reads_see_only_committed_samples() {
        let mut line = DelayLine::new(64);
        line.write_block(&[0.25; 16]);

        // Offsets walk forward through the committed block
        for offset in 0..16 {
            assert!((line.read_at(offset, 16) - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn wraps_around_capacity() {
        let mut line = DelayLine::new(32);
        for _ in 0..10 {
            line.write_block(&[1.0; 8]);
        }
        assert!((line.read_at(0, 8) - 1.0).abs() < 1e-6);
        assert!((line.read_at(0, 31) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_silences_the_line() {
        let mut line = DelayLine::new(32);
        line.write_block(&[1.0; 8]);
        line.reset();

        assert_eq!(line.read_at(0, 8), 0.0);
    }

    #[test]
    fn delay_clamps_to_capacity() {
        let mut line = DelayLine::new(16);
        line.write_block(&[0.5; 8]);

        // Requesting more delay than the line holds reads the oldest sample
        let _ = line.read_at(0, 1000);
    }
}
