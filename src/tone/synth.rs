use super::CustomTone;
use crate::PcmBuf;
use std::f32::consts::PI;
use std::time::Duration;

// DTMF frequencies according to ITU-T Q.23
const DTMF_FREQUENCIES: [(f32, f32); 16] = [
    (697.0, 1209.0), // 1
    (697.0, 1336.0), // 2
    (697.0, 1477.0), // 3
    (770.0, 1209.0), // 4
    (770.0, 1336.0), // 5
    (770.0, 1477.0), // 6
    (852.0, 1209.0), // 7
    (852.0, 1336.0), // 8
    (852.0, 1477.0), // 9
    (941.0, 1336.0), // 0
    (941.0, 1209.0), // *
    (941.0, 1477.0), // #
    (697.0, 1633.0), // A
    (770.0, 1633.0), // B
    (852.0, 1633.0), // C
    (941.0, 1633.0), // D
];

// samples of linear fade at both ends of a beep
const RAMP_SAMPLES: usize = 100;

fn dtmf_index(digit: char) -> Option<usize> {
    let index = match digit.to_ascii_uppercase() {
        '1' => 0,
        '2' => 1,
        '3' => 2,
        '4' => 3,
        '5' => 4,
        '6' => 5,
        '7' => 6,
        '8' => 7,
        '9' => 8,
        '0' => 9,
        '*' => 10,
        '#' => 11,
        'A' => 12,
        'B' => 13,
        'C' => 14,
        'D' => 15,
        _ => return None,
    };
    Some(index)
}

pub fn is_dtmf_digit(digit: char) -> bool {
    dtmf_index(digit).is_some()
}

fn samples_for(sample_rate: u32, duration_ms: u32) -> usize {
    (sample_rate as u64 * duration_ms as u64 / 1000) as usize
}

fn push_beep(output: &mut PcmBuf, frequencies: &[f32], gain: f32, sample_rate: u32, count: usize) {
    for i in 0..count {
        let t = i as f32 / sample_rate as f32;
        let sample: f32 = frequencies
            .iter()
            .map(|freq| (2.0 * PI * freq * t).sin())
            .sum::<f32>()
            * gain;

        // avoid clicks at both ends
        let envelope = if i < RAMP_SAMPLES {
            i as f32 / RAMP_SAMPLES as f32
        } else if i + RAMP_SAMPLES > count {
            (count - i) as f32 / RAMP_SAMPLES as f32
        } else {
            1.0
        };
        output.push((sample * envelope * 32767.0) as i16);
    }
}

/// Renders one DTMF digit; unknown digits render nothing.
pub fn render_dtmf(digit: char, sample_rate: u32, duration_ms: u32) -> PcmBuf {
    let Some(index) = dtmf_index(digit) else {
        return Vec::new();
    };
    let (low, high) = DTMF_FREQUENCIES[index];
    let count = samples_for(sample_rate, duration_ms);
    let mut output = Vec::with_capacity(count);
    // 3dB attenuation per component to avoid clipping
    push_beep(&mut output, &[low, high], 0.35, sample_rate, count);
    output
}

/// Renders a custom tone: `repeat_count` beeps (at least one), each followed
/// by `interval_ms` of silence.
pub fn render_custom_tone(tone: &CustomTone, sample_rate: u32) -> PcmBuf {
    if tone.duration_ms == 0 || tone.frequencies.is_empty() {
        return Vec::new();
    }
    let frequencies: Vec<f32> = tone.frequencies.iter().map(|f| *f as f32).collect();
    let gain = tone.amplitude.clamp(0.0, 1.0) * 0.7 / frequencies.len() as f32;
    let beep = samples_for(sample_rate, tone.duration_ms);
    let gap = samples_for(sample_rate, tone.interval_ms);
    let beeps = tone.repeat_count.max(1) as usize;

    let mut output = Vec::with_capacity(beeps * (beep + gap));
    for _ in 0..beeps {
        push_beep(&mut output, &frequencies, gain, sample_rate, beep);
        output.resize(output.len() + gap, 0);
    }
    output
}

/// Playback time of [`render_custom_tone`] output.
pub fn custom_tone_duration(tone: &CustomTone) -> Duration {
    if tone.duration_ms == 0 || tone.frequencies.is_empty() {
        return Duration::ZERO;
    }
    let beeps = tone.repeat_count.max(1) as u64;
    Duration::from_millis(beeps * (tone.duration_ms as u64 + tone.interval_ms as u64))
}
