//! Audio decoding using symphonia.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use chime_core::{Error, Result};
use symphonia::core::{
    audio::{AudioBufferRef, Signal},
    codecs::{
        CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3,
        CODEC_TYPE_NULL, CODEC_TYPE_OPUS, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_VORBIS,
    },
    formats::{FormatOptions, FormatReader},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, trace, warn};

/// Codec names probed by the capability detector.
pub const CANDIDATE_CODECS: [&str; 6] = ["wav", "mp3", "ogg", "flac", "aac", "opus"];

/// A fully decoded sound held in memory as interleaved f32 samples.
#[derive(Debug, Clone)]
pub struct DecodedSound {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedSound {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / usize::from(self.channels)
        }
    }

    /// Approximate memory footprint in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.samples.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / f64::from(self.sample_rate)
        }
    }
}

/// Map a codec name from the manifest or probe list to a symphonia codec type.
fn codec_type(name: &str) -> Option<CodecType> {
    match name.to_ascii_lowercase().as_str() {
        "wav" | "pcm" => Some(CODEC_TYPE_PCM_S16LE),
        "mp3" | "mpeg" => Some(CODEC_TYPE_MP3),
        "ogg" | "vorbis" => Some(CODEC_TYPE_VORBIS),
        "flac" => Some(CODEC_TYPE_FLAC),
        "aac" | "m4a" => Some(CODEC_TYPE_AAC),
        "opus" => Some(CODEC_TYPE_OPUS),
        _ => None,
    }
}

/// True if the linked symphonia build can decode the named codec.
pub fn codec_supported(name: &str) -> bool {
    codec_type(name).is_some_and(|ty| symphonia::default::get_codecs().get_codec(ty).is_some())
}

/// Audio decoder wrapping symphonia.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
}

impl AudioDecoder {
    /// Create a new decoder from a byte buffer.
    pub fn from_bytes(data: &Bytes, extension_hint: Option<&str>) -> Result<Self> {
        let cursor = Cursor::new(data.clone());
        let mss = MediaSourceStream::new(Box::new(cursor), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension_hint {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::AudioDecode(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        // Find the first audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(48000);
        let channels = track.codec_params.channels.map_or(2, |c| c.count() as u16);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Unsupported(format!("No decoder for track: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet and return interleaved f32 samples.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(audio_buffer_to_f32(&decoded))),
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    warn!("Decode error (skipping): {e}");
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }

    /// Decode every remaining packet into one buffer.
    pub fn decode_all(mut self) -> Result<DecodedSound> {
        let mut samples = Vec::new();
        while let Some(chunk) = self.decode_next()? {
            trace!("Decoded {} samples", chunk.len());
            samples.extend_from_slice(&chunk);
        }

        if samples.is_empty() {
            return Err(Error::AudioDecode("Asset decoded to zero samples".to_string()));
        }

        Ok(DecodedSound {
            samples: samples.into(),
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

/// Decode a whole asset in one go.
pub fn decode_bytes(data: &Bytes, extension_hint: Option<&str>) -> Result<DecodedSound> {
    let decoded = AudioDecoder::from_bytes(data, extension_hint)?.decode_all()?;
    debug!(
        "Decoded {} frames at {} Hz, {} channels",
        decoded.frames(),
        decoded.sample_rate,
        decoded.channels
    );
    Ok(decoded)
}

/// Build a 16-bit PCM WAV file of silence. Used by self-tests.
pub fn silent_wav(sample_rate: u32, channels: u16, frames: u32) -> Bytes {
    let data_len = frames * u32::from(channels) * 2;
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);

    Bytes::from(out)
}

/// Convert an `AudioBuffer` to interleaved f32 samples.
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => interleave(buf.planes().planes(), |s| s),
        AudioBufferRef::F64(buf) => interleave(buf.planes().planes(), |s| s as f32),
        AudioBufferRef::S32(buf) => interleave(buf.planes().planes(), |s| s as f32 / i32::MAX as f32),
        AudioBufferRef::S16(buf) => {
            interleave(buf.planes().planes(), |s| f32::from(s) / f32::from(i16::MAX))
        }
        AudioBufferRef::U8(buf) => interleave(buf.planes().planes(), |s| (f32::from(s) - 128.0) / 128.0),
        _ => Vec::new(),
    }
}

fn interleave<T: Copy>(planes: &[&[T]], convert: impl Fn(T) -> f32) -> Vec<f32> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let frames = first.len();
    let mut output = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            output.push(convert(plane[frame]));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_silent_wav() {
        let wav = silent_wav(22050, 1, 441);
        let decoded = decode_bytes(&wav, Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), 441);
        assert!(decoded.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let junk = Bytes::from_static(b"definitely not audio");
        let err = decode_bytes(&junk, None).unwrap_err();
        assert!(err.is_retryable() || matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_wav_codec_supported() {
        assert!(codec_supported("wav"));
        assert!(!codec_supported("midi"));
    }
}
