use rand::Rng;

/// Procedurally synthesized stereo impulse response.
///
/// Left and right channels share the same decaying noise shape; the right
/// channel is a slightly quieter copy so the tail stays decorrelated from
/// the direct path without collapsing to mono.
pub struct StereoImpulse {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl StereoImpulse {
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Synthesize a room response from size and damping controls.
///
/// Duration is `room_size * 0.015` seconds with a 0.3 s floor. Sample 0 is a
/// direct-path spike (1.0 left, 0.8 right). Every later sample is uniform
/// noise shaped by two multiplicative terms: a damping-controlled power decay
/// and an `e^(-3t)` envelope.
pub fn synthesize(
    sample_rate: f32,
    room_size: f32,
    damping: f32,
    rng: &mut impl Rng,
) -> StereoImpulse {
    let seconds = (room_size.max(0.0) * 0.015).max(0.3);
    let len = ((sample_rate * seconds) as usize).max(1);

    let mut left = vec![0.0; len];
    let mut right = vec![0.0; len];
    left[0] = 1.0;
    right[0] = 0.8;

    let damp_base = (1.0 - damping * 0.01).clamp(0.0, 1.0);
    for i in 1..len {
        let t = i as f32 / sample_rate;
        let decay = damp_base.powf(2.0 * t);
        let noise = rng.gen_range(-1.0f32..1.0) * 0.3 * decay;
        let envelope = (-3.0 * t).exp() * decay;
        left[i] = noise * envelope;
        right[i] = left[i] * 0.85;
    }

    StereoImpulse { left, right }
}
