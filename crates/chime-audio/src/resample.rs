//! Converting decoded buffers to the output format using rubato.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use chime_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

use crate::decode::DecodedSound;

const CHUNK_SIZE: usize = 1024;

/// Bring a decoded sound to the given sample rate and channel count.
pub fn conform(sound: &DecodedSound, sample_rate: u32, channels: u16) -> Result<DecodedSound> {
    let remixed = remix(sound, channels);
    if remixed.sample_rate == sample_rate {
        return Ok(remixed);
    }
    resample(&remixed, sample_rate)
}

/// Map channels by duplicating or averaging.
fn remix(sound: &DecodedSound, channels: u16) -> DecodedSound {
    if sound.channels == channels || sound.channels == 0 || channels == 0 {
        return sound.clone();
    }

    let src = usize::from(sound.channels);
    let dst = usize::from(channels);
    let frames = sound.frames();
    let mut out = Vec::with_capacity(frames * dst);

    for frame in sound.samples.chunks_exact(src) {
        if dst == 1 {
            out.push(frame.iter().sum::<f32>() / src as f32);
        } else {
            for ch in 0..dst {
                out.push(frame[ch % src]);
            }
        }
    }

    DecodedSound {
        samples: out.into(),
        sample_rate: sound.sample_rate,
        channels,
    }
}

/// Resample a whole buffer, padding the tail chunk.
fn resample(sound: &DecodedSound, output_rate: u32) -> Result<DecodedSound> {
    let channels = usize::from(sound.channels);
    let mut resampler = FftFixedIn::<f32>::new(
        sound.sample_rate as usize,
        output_rate as usize,
        CHUNK_SIZE,
        2,
        channels,
    )
    .map_err(|e| Error::AudioDecode(format!("Failed to create resampler: {e}")))?;

    let planes = deinterleave(&sound.samples, channels);
    let input_frames = sound.frames();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];

    let mut offset = 0;
    while offset < input_frames {
        let end = (offset + CHUNK_SIZE).min(input_frames);
        let chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| {
                let mut data = plane[offset..end].to_vec();
                data.resize(CHUNK_SIZE, 0.0);
                data
            })
            .collect();

        let resampled = resampler
            .process(&chunk, None)
            .map_err(|e| Error::AudioDecode(format!("Resample failed: {e}")))?;

        for (out, plane) in output.iter_mut().zip(resampled) {
            out.extend(plane);
        }
        offset = end;
    }

    // Drop the padding and the resampler's output delay.
    let delay = resampler.output_delay();
    let expected =
        (input_frames as f64 * f64::from(output_rate) / f64::from(sound.sample_rate)) as usize;
    let samples = interleave(&output, delay, expected);

    debug!(
        "Resampled {} frames {} Hz -> {} Hz",
        input_frames, sound.sample_rate, output_rate
    );

    Ok(DecodedSound {
        samples: samples.into(),
        sample_rate: output_rate,
        channels: sound.channels,
    })
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let mut planes = vec![Vec::with_capacity(samples.len() / channels.max(1)); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, sample) in planes.iter_mut().zip(frame) {
            plane.push(*sample);
        }
    }
    planes
}

fn interleave(planes: &[Vec<f32>], skip: usize, frames: usize) -> Vec<f32> {
    let available = planes.first().map_or(0, Vec::len).saturating_sub(skip);
    let frames = frames.min(available);
    let mut out = Vec::with_capacity(frames * planes.len());
    for frame in skip..skip + frames {
        for plane in planes {
            out.push(plane[frame]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, channels: u16, frames: usize) -> DecodedSound {
        let samples: Vec<f32> = (0..frames * usize::from(channels))
            .map(|i| ((i / usize::from(channels)) as f32 * 0.05).sin() * 0.5)
            .collect();
        DecodedSound {
            samples: samples.into(),
            sample_rate: rate,
            channels,
        }
    }

    #[test]
    fn test_same_format_is_untouched() {
        let sound = tone(48000, 2, 500);
        let out = conform(&sound, 48000, 2).unwrap();
        assert_eq!(out.samples.len(), sound.samples.len());
    }

    #[test]
    fn test_mono_to_stereo() {
        let sound = tone(48000, 1, 100);
        let out = conform(&sound, 48000, 2).unwrap();
        assert_eq!(out.channels, 2);
        assert_eq!(out.frames(), 100);
        assert!((out.samples[6] - out.samples[7]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_resample_length() {
        let sound = tone(44100, 2, 4410);
        let out = conform(&sound, 48000, 2).unwrap();
        assert_eq!(out.sample_rate, 48000);
        let frames = out.frames() as i64;
        assert!((frames - 4800).abs() <= 2, "got {frames} frames");
    }
}
