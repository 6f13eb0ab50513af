//! A compact time-domain descriptor for decoded audio.
//!
//! Frame energy and zero-crossing statistics plus a coarse tempo estimate
//! from the autocorrelation of the energy onset envelope.

/// Length of every descriptor vector.
pub const DESCRIPTOR_DIM: usize = 20;

pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 200.0;

/// Reported when the signal has no usable onset structure.
pub const FALLBACK_BPM: f32 = 120.0;

const FRAME: usize = 1024;
const HOP: usize = 512;
const SEGMENTS: usize = 6;

/// Descriptor vector and tempo for one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub vector: Vec<f32>,
    pub bpm: f32,
}

/// Describe mono `samples` at `sample_rate`. Returns `None` for an empty
/// signal.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn describe(samples: &[f32], sample_rate: u32) -> Option<Descriptor> {
    if samples.is_empty() || sample_rate == 0 {
        return None;
    }

    let (rms, zcr) = frame_stats(samples);
    let onsets: Vec<f32> = rms.windows(2).map(|w| (w[1] - w[0]).max(0.0)).collect();
    let flux = if rms.len() > 1 {
        rms.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f32>() / (rms.len() - 1) as f32
    } else {
        0.0
    };

    let frame_rate = sample_rate as f32 / HOP as f32;
    let bpm = estimate_tempo(&onsets, frame_rate).unwrap_or(FALLBACK_BPM);

    let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    let overall_rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
    let crest = if overall_rms > 0.0 { peak / overall_rms } else { 0.0 };
    let rms_max = rms.iter().copied().fold(0.0_f32, f32::max);
    let quiet = if rms_max > 0.0 {
        rms.iter().filter(|&&r| r < 0.1 * rms_max).count() as f32 / rms.len() as f32
    } else {
        1.0
    };

    let mut vector = Vec::with_capacity(DESCRIPTOR_DIM);
    vector.extend(summary(&rms));
    vector.extend(summary(&zcr));
    vector.push(flux);
    vector.push(quiet);
    vector.push(peak);
    vector.push(crest);
    vector.extend(segment_means(&rms, SEGMENTS));
    vector.push(bpm / MAX_BPM);
    vector.push(mean(&onsets));

    Some(Descriptor { vector, bpm })
}

/// Per-frame RMS energy and zero-crossing rate. Signals shorter than one
/// frame are treated as a single frame.
#[allow(clippy::cast_precision_loss)]
fn frame_stats(samples: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mut rms = Vec::new();
    let mut zcr = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + FRAME).min(samples.len());
        let frame = &samples[start..end];
        let energy = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        rms.push(energy.sqrt());
        let crossings = frame
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        zcr.push(crossings as f32 / frame.len() as f32);

        if end == samples.len() {
            break;
        }
        start += HOP;
        if start + FRAME > samples.len() {
            break;
        }
    }
    (rms, zcr)
}

/// Autocorrelation tempo estimate over lags spanning `MIN_BPM..=MAX_BPM`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn estimate_tempo(onsets: &[f32], frame_rate: f32) -> Option<f32> {
    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if onsets.len() <= max_lag {
        return None;
    }

    let smoothed = smooth(onsets);
    let centre = mean(&smoothed);
    let centred: Vec<f32> = smoothed.iter().map(|v| v - centre).collect();

    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let raw: f32 = centred
            .iter()
            .zip(&centred[lag..])
            .map(|(a, b)| a * b)
            .sum();
        let score = raw * tempo_prior(60.0 * frame_rate / lag as f32);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    let (lag, score) = best?;
    if score <= 0.0 {
        return None;
    }
    Some((60.0 * frame_rate / lag as f32).clamp(MIN_BPM, MAX_BPM))
}

/// Log-normal weighting centred on 120 BPM with a one-octave spread, so
/// the estimate prefers the beat over its half- or double-time multiples.
fn tempo_prior(bpm: f32) -> f32 {
    let octaves = (bpm / 120.0).log2();
    (-0.5 * octaves * octaves).exp()
}

/// Three-tap smoothing; keeps onsets that straddle a frame boundary
/// correlated at neighbouring lags.
fn smooth(values: &[f32]) -> Vec<f32> {
    (0..values.len())
        .map(|i| {
            let prev = if i > 0 { values[i - 1] } else { 0.0 };
            let next = values.get(i + 1).copied().unwrap_or(0.0);
            0.25 * prev + 0.5 * values[i] + 0.25 * next
        })
        .collect()
}

/// Mean, standard deviation, minimum and maximum.
#[allow(clippy::cast_precision_loss)]
fn summary(values: &[f32]) -> [f32; 4] {
    if values.is_empty() {
        return [0.0; 4];
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    [m, var.sqrt(), min, max]
}

/// Mean of each of `n` equal time segments; short inputs repeat frames.
fn segment_means(values: &[f32], n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let start = i * values.len() / n;
            let end = ((i + 1) * values.len() / n).max(start + 1).min(values.len());
            values.get(start..end).map_or(0.0, mean)
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Short noise bursts every `60 / bpm` seconds.
    pub(crate) fn click_track(bpm: f32, secs: f32, sample_rate: u32) -> Vec<f32> {
        let len = (secs * sample_rate as f32) as usize;
        let period = (60.0 / bpm * sample_rate as f32) as usize;
        let mut samples = vec![0.0_f32; len];
        for start in (0..len).step_by(period) {
            for (i, s) in samples.iter_mut().skip(start).take(400).enumerate() {
                *s = if i % 2 == 0 { 0.8 } else { -0.8 };
            }
        }
        samples
    }

    #[test]
    fn test_empty_signal() {
        assert!(describe(&[], 22050).is_none());
    }

    #[test]
    fn test_dimension_is_fixed() {
        let long = describe(&click_track(100.0, 10.0, 22050), 22050).unwrap();
        let short = describe(&[0.1, -0.1, 0.2], 22050).unwrap();
        assert_eq!(long.vector.len(), DESCRIPTOR_DIM);
        assert_eq!(short.vector.len(), DESCRIPTOR_DIM);
        assert!(long.vector.iter().chain(&short.vector).all(|v| v.is_finite()));
    }

    #[test]
    fn test_silence_uses_fallback_tempo() {
        let d = describe(&vec![0.0; 22050 * 5], 22050).unwrap();
        assert_eq!(d.bpm, FALLBACK_BPM);
    }

    #[test]
    fn test_tempo_of_click_track() {
        let d = describe(&click_track(120.0, 20.0, 22050), 22050).unwrap();
        assert!((110.0..=130.0).contains(&d.bpm), "estimated {}", d.bpm);
    }

    #[test]
    fn test_tempo_is_clamped() {
        for bpm in [40.0, 300.0] {
            let d = describe(&click_track(bpm, 20.0, 22050), 22050).unwrap();
            assert!((MIN_BPM..=MAX_BPM).contains(&d.bpm));
        }
    }

    #[test]
    fn test_segment_means_short_input() {
        assert_eq!(segment_means(&[2.0], 3), vec![2.0, 2.0, 2.0]);
    }
}
