//! Software mixer for overlapping one-shot voices.
//!
//! Every `play` creates a fresh single-use voice that reads from a shared
//! decoded buffer, so the same sound can overlap with itself any number of
//! times. Fades are gain ramps scheduled on the mixer's frame clock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::time::Duration;

use chime_core::SoundKey;
use parking_lot::Mutex;

use crate::decode::DecodedSound;

/// Hard ceiling on simultaneous voices.
pub const MAX_VOICES: usize = 64;

/// Linear gain change between two points on the frame clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    pub start_frame: u64,
    pub end_frame: u64,
    pub from: f32,
    pub to: f32,
}

impl GainRamp {
    fn value_at(&self, frame: u64) -> f32 {
        if frame <= self.start_frame {
            return self.from;
        }
        if frame >= self.end_frame || self.end_frame == self.start_frame {
            return self.to;
        }
        let t = (frame - self.start_frame) as f32 / (self.end_frame - self.start_frame) as f32;
        (self.to - self.from).mul_add(t, self.from)
    }
}

/// Per-voice gain automation. Later ramps override earlier ones once started.
#[derive(Debug, Clone, Default)]
struct Automation {
    ramps: Vec<GainRamp>,
}

impl Automation {
    fn gain_at(&self, frame: u64) -> f32 {
        self.ramps
            .iter()
            .rev()
            .find(|r| frame >= r.start_frame)
            .or_else(|| self.ramps.first())
            .map_or(1.0, |r| r.value_at(frame))
    }

    fn schedule(&mut self, ramp: GainRamp) {
        self.ramps.retain(|r| r.start_frame < ramp.start_frame);
        self.ramps.push(ramp);
    }
}

struct Voice {
    id: u64,
    key: SoundKey,
    sound: Arc<DecodedSound>,
    /// Fractional read position in frames.
    position: f64,
    rate: f64,
    volume: f32,
    looped: bool,
    automation: Automation,
    /// Frame at which the voice is removed.
    stop_at: Option<u64>,
}

/// Parameters of a new voice.
#[derive(Debug, Clone, Copy)]
pub struct VoiceParams {
    pub volume: f32,
    pub looped: bool,
    pub rate: f32,
    pub fade_in: Option<Duration>,
    pub fade_out: Option<Duration>,
}

struct MixerState {
    voices: Vec<Voice>,
    clock: u64,
    sample_rate: u32,
    channels: u16,
    master_volume: f32,
    muted: bool,
    suspended: bool,
}

/// Thread-safe mixer shared between a strategy and its output callback.
pub struct Mixer {
    state: Mutex<MixerState>,
}

/// Shared handle to a mixer.
pub type SharedMixer = Arc<Mixer>;

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            state: Mutex::new(MixerState {
                voices: Vec::new(),
                clock: 0,
                sample_rate,
                channels,
                master_volume: 1.0,
                muted: false,
                suspended: false,
            }),
        }
    }

    pub fn shared(sample_rate: u32, channels: u16) -> SharedMixer {
        Arc::new(Self::new(sample_rate, channels))
    }

    /// Change the output format. Drops live voices.
    pub fn configure(&self, sample_rate: u32, channels: u16) {
        let mut state = self.state.lock();
        state.sample_rate = sample_rate;
        state.channels = channels;
        state.voices.clear();
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.state.lock().channels
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.state.lock().master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn master_volume(&self) -> f32 {
        self.state.lock().master_volume
    }

    pub fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    /// A suspended mixer outputs silence and does not advance its clock.
    pub fn set_suspended(&self, suspended: bool) {
        self.state.lock().suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Current frame clock.
    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    /// Start a voice. Returns false if the voice limit is reached.
    pub fn start_voice(
        &self,
        id: u64,
        key: SoundKey,
        sound: Arc<DecodedSound>,
        params: VoiceParams,
    ) -> bool {
        let mut state = self.state.lock();
        if state.voices.len() >= MAX_VOICES {
            return false;
        }

        let now = state.clock;
        let sample_rate = f64::from(state.sample_rate);
        let rate = f64::from(params.rate.max(0.01));
        let to_frames = |d: Duration| (d.as_secs_f64() * sample_rate) as u64;

        let mut automation = Automation::default();
        match params.fade_in {
            Some(fade) if !fade.is_zero() => automation.schedule(GainRamp {
                start_frame: now,
                end_frame: now + to_frames(fade),
                from: 0.0,
                to: 1.0,
            }),
            _ => automation.schedule(GainRamp {
                start_frame: now,
                end_frame: now,
                from: 1.0,
                to: 1.0,
            }),
        }

        let mut stop_at = None;
        if let (Some(fade), false) = (params.fade_out, params.looped) {
            let length = (sound.frames() as f64 / rate) as u64;
            let fade_frames = to_frames(fade).min(length);
            let end = now + length;
            automation.schedule(GainRamp {
                start_frame: end - fade_frames,
                end_frame: end,
                from: 1.0,
                to: 0.0,
            });
            stop_at = Some(end);
        }

        state.voices.push(Voice {
            id,
            key,
            sound,
            position: 0.0,
            rate,
            volume: params.volume.clamp(0.0, 1.0),
            looped: params.looped,
            automation,
            stop_at,
        });
        true
    }

    /// Stop every voice of a key immediately.
    pub fn stop_key(&self, key: SoundKey) -> usize {
        let mut state = self.state.lock();
        let before = state.voices.len();
        state.voices.retain(|v| v.key != key);
        before - state.voices.len()
    }

    /// Fade every voice of a key out, then remove it.
    pub fn fade_out_key(&self, key: SoundKey, fade: Duration) {
        let mut state = self.state.lock();
        let now = state.clock;
        let end = now + (fade.as_secs_f64() * f64::from(state.sample_rate)) as u64;
        for voice in state.voices.iter_mut().filter(|v| v.key == key) {
            let current = voice.automation.gain_at(now);
            voice.automation.schedule(GainRamp {
                start_frame: now,
                end_frame: end,
                from: current,
                to: 0.0,
            });
            voice.stop_at = Some(voice.stop_at.map_or(end, |s| s.min(end)));
        }
    }

    pub fn stop_voice(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.voices.len();
        state.voices.retain(|v| v.id != id);
        before != state.voices.len()
    }

    pub fn stop_all(&self) {
        self.state.lock().voices.clear();
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    pub fn active_keys(&self) -> Vec<SoundKey> {
        self.state.lock().voices.iter().map(|v| v.key).collect()
    }

    /// Mix the next `output.len() / channels` frames into `output`.
    pub fn render(&self, output: &mut [f32]) {
        output.fill(0.0);

        let mut state = self.state.lock();
        if state.suspended {
            return;
        }

        let channels = usize::from(state.channels.max(1));
        let frames = output.len() / channels;
        let start_clock = state.clock;
        let master = if state.muted { 0.0 } else { state.master_volume };

        state.voices.retain_mut(|voice| {
            let voice_channels = usize::from(voice.sound.channels.max(1));
            let total = voice.sound.frames();
            if total == 0 {
                return false;
            }

            for frame in 0..frames {
                let clock = start_clock + frame as u64;
                if voice.stop_at.is_some_and(|s| clock >= s) {
                    return false;
                }

                let mut index = voice.position as usize;
                if index >= total {
                    if !voice.looped {
                        return false;
                    }
                    voice.position %= total as f64;
                    index = voice.position as usize;
                }

                let frac = (voice.position - index as f64) as f32;
                let next = if index + 1 < total {
                    index + 1
                } else if voice.looped {
                    0
                } else {
                    index
                };

                let gain = voice.volume * voice.automation.gain_at(clock) * master;
                for ch in 0..channels {
                    let src_ch = ch % voice_channels;
                    let a = voice.sound.samples[index * voice_channels + src_ch];
                    let b = voice.sound.samples[next * voice_channels + src_ch];
                    output[frame * channels + ch] += (b - a).mul_add(frac, a) * gain;
                }

                voice.position += voice.rate;
            }
            true
        });

        for sample in output.iter_mut() {
            // Soft clipping to keep overlapping voices from distorting
            if sample.abs() > 0.9 {
                *sample = sample.tanh();
            }
        }

        state.clock = start_clock + frames as u64;
    }
}
