use std::time::{Duration, Instant};

use attune_dsp::modules::EffectKind;
use attune_dsp::{AttuneProcessor, AutomationRecommendation, EngineConfig};

fn sine_frames(freq: f32, amplitude: f32, count: usize) -> Vec<[f32; 2]> {
    (0..count)
        .map(|i| {
            let s = (std::f32::consts::TAU * freq * i as f32 / 48_000.0).sin() * amplitude;
            [s, s]
        })
        .collect()
}

fn after_window() -> Instant {
    Instant::now() + Duration::from_millis(1100)
}

#[test]
fn initialized_processor_passes_audio_through() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();

    processor.push_source_frames(&vec![[0.5, 0.5]; 512]);
    let mut left = vec![0.0; 512];
    let mut right = vec![0.0; 512];
    processor.render(&mut left, &mut right);

    for &s in left.iter().chain(right.iter()) {
        assert!((s - 0.5).abs() < 1e-6, "bypass chain should be transparent");
    }
}

#[test]
fn effects_splice_in_after_the_throttle_window() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();
    processor.force_effects_creation();

    // The creation-time reconnect collapsed into a deferred retry; service it
    processor.tick(after_window());

    let topology = processor.current_topology().expect("topology after reconnect");
    assert_eq!(topology.stages, EffectKind::CHAIN_ORDER.to_vec());
    assert!(!topology.bypass);

    processor.push_source_frames(&sine_frames(440.0, 0.25, 4096));
    let mut left = vec![0.0; 4096];
    let mut right = vec![0.0; 4096];
    processor.render(&mut left, &mut right);

    assert!(left.iter().any(|&s| s.abs() > 0.05), "chain should carry audio");
    assert!(left.iter().chain(right.iter()).all(|&s| s.is_finite()));
}

#[test]
fn reconnects_inside_the_window_are_dropped() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();
    processor.force_effects_creation();
    processor.tick(after_window());

    let before = processor.current_topology().cloned();
    // Both calls land inside the freshly consumed window
    assert!(processor.reconnect_graph().unwrap().is_none());
    assert!(processor.reconnect_graph().unwrap().is_none());

    assert_eq!(processor.current_topology().cloned(), before);
}

#[test]
fn recommendation_roundtrip_is_exact() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();
    processor.force_effects_creation();

    let rec = AutomationRecommendation {
        emotion_state: Some("energized".to_string()),
        volume_multiplier: 1.25,
        eq_vector: Some([5.0, 3.0, 1.0, 0.0, 2.0, 4.0]),
        eq_preset: "bright".to_string(),
        delay_amount: Some(45.0),
        reverb_amount: Some(30.0),
        rhythmic_enhancement: Some(20.0),
        ..AutomationRecommendation::default()
    };

    processor.apply_recommendation(&rec);
    let volume = processor.current_volume();
    let gains = processor.eq_gains();
    let delay = processor.effect_intensity(EffectKind::Delay);

    processor.reset_to_base_values();
    assert_eq!(processor.eq_gains(), [0.0; 6]);
    assert_eq!(processor.effect_intensity(EffectKind::Reverb), 0.0);

    processor.apply_recommendation(&rec);
    assert_eq!(processor.current_volume(), volume);
    assert_eq!(processor.eq_gains(), gains);
    assert_eq!(processor.effect_intensity(EffectKind::Delay), delay);
}

#[test]
fn heavy_settings_render_without_blowing_up() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();
    processor.force_effects_creation();
    processor.tick(after_window());

    processor.apply_external_eq(&[12.0, 12.0, 12.0, 12.0, 12.0, 12.0]);
    processor.set_effect_intensity(EffectKind::Delay, 100.0);
    processor.set_effect_intensity(EffectKind::Reverb, 100.0);
    processor.set_effect_intensity(EffectKind::Enhancement, 100.0);

    // A second of loud input through every effect at maximum
    processor.push_source_frames(&sine_frames(220.0, 0.8, 48_000));
    let mut left = vec![0.0; 48_000];
    let mut right = vec![0.0; 48_000];
    processor.render(&mut left, &mut right);

    for &s in left.iter().chain(right.iter()) {
        assert!(s.is_finite(), "render produced non-finite samples");
        assert!(s.abs() < 64.0, "feedback network unstable: {}", s);
    }
}

#[test]
fn display_mirror_tracks_user_changes() {
    let mut processor = AttuneProcessor::new(EngineConfig::default());
    processor.initialize().unwrap();
    processor.force_effects_creation();

    processor.set_volume(0.6);
    processor.set_band_gain(0, 8.0);

    assert_eq!(processor.eq_gains()[0], 8.0);
    // 8 dB on one band: makeup = -sqrt(64/6)*0.3 = -0.9798 dB
    let expected = 0.6 * 10.0_f32.powf(-0.9798 / 20.0);
    assert!((processor.current_volume() - expected).abs() < 2e-3);
}
