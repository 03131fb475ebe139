//! Whole-file decoding with Symphonia and sample-rate conversion with Rubato

use crate::error::{EngineError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Extensions the native engine can open
pub const SUPPORTED_FORMATS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Decoded PCM, interleaved f32 in `[-1, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Interleaved sample index of `position`, clamped to the buffer
    pub fn sample_index(&self, position: Duration) -> usize {
        let frame = (position.as_secs_f64() * f64::from(self.sample_rate)) as usize;
        (frame * usize::from(self.channels)).min(self.samples.len())
    }
}

/// Decode the default track of a local file
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let display_path = path.display().to_string();
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::decode(&display_path, e))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| EngineError::decode(&display_path, "no audio tracks found"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let mut channels = track
        .codec_params
        .channels
        .map_or(2, |c| c.count() as u16);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::decode(&display_path, e))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(EngineError::decode(&display_path, e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frames are skipped, the rest of the stream is still playable
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %display_path, error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(EngineError::decode(&display_path, e)),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        if buf.capacity() < decoded.capacity() * spec.channels.count() {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buf.samples());
    }

    tracing::debug!(
        path = %display_path,
        sample_rate,
        channels,
        frames = samples.len() / usize::from(channels.max(1)),
        "Decoded file"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Map to `target` channels: mono is duplicated, extra channels are folded into the first two
pub fn remix(audio: DecodedAudio, target: u16) -> DecodedAudio {
    if audio.channels == target || audio.channels == 0 || target == 0 {
        return audio;
    }

    let source = usize::from(audio.channels);
    let target_usize = usize::from(target);
    let mut samples = Vec::with_capacity(audio.frames() * target_usize);

    for frame in audio.samples.chunks_exact(source) {
        if source == 1 {
            samples.resize(samples.len() + target_usize, frame[0]);
            continue;
        }

        let (left, right) = fold_to_stereo(frame);
        if target == 1 {
            samples.push((left + right) * 0.5);
        } else {
            samples.push(left);
            samples.push(right);
            samples.resize(samples.len() + target_usize - 2, 0.0);
        }
    }

    DecodedAudio {
        samples,
        sample_rate: audio.sample_rate,
        channels: target,
    }
}

fn fold_to_stereo(frame: &[f32]) -> (f32, f32) {
    if frame.len() == 2 {
        return (frame[0], frame[1]);
    }
    let extra = &frame[2..];
    let extra_mix = if extra.is_empty() {
        0.0
    } else {
        extra.iter().sum::<f32>() / extra.len() as f32
    };
    (
        (frame[0] + extra_mix * 0.5).clamp(-1.0, 1.0),
        (frame[1] + extra_mix * 0.5).clamp(-1.0, 1.0),
    )
}

/// Convert to `target_rate` with a windowed-sinc resampler
pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(audio);
    }
    if audio.channels == 0 {
        return Err(EngineError::Resample("audio has no channels".to_string()));
    }

    let channels = usize::from(audio.channels);
    let frames = audio.frames();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        f64::from(target_rate) / f64::from(audio.sample_rate),
        2.0,
        params,
        frames,
        channels,
    )
    .map_err(|e| EngineError::Resample(e.to_string()))?;

    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in audio.samples.chunks_exact(channels) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    let resampled = resampler
        .process(&planar, None)
        .map_err(|e| EngineError::Resample(e.to_string()))?;

    let output_frames = resampled.first().map_or(0, Vec::len);
    let mut samples = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for channel in &resampled {
            samples.push(channel[frame_idx]);
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: target_rate,
        channels: audio.channels,
    })
}
