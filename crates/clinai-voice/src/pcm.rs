//! PCM helpers for the capture path: downmix/resample, 16-bit packing, WAV container.

use crate::error::VoiceResult;
use std::io::Cursor;

pub const WAV_MIME_TYPE: &str = "audio/wav";

/// Convert interleaved multi-channel samples at `from_rate` to mono at `to_rate`
/// (nearest-sample decimation).
pub fn to_mono(samples: &[f32], channels: usize, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if channels == 0 || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    let mono: Vec<f32> = if channels == 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    if from_rate == to_rate {
        return mono;
    }
    let out_len = (mono.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = (i as f64 * from_rate as f64 / to_rate as f64) as usize;
        if src_idx >= mono.len() {
            break;
        }
        out.push(mono[src_idx]);
    }
    out
}

/// Pack f32 samples as little-endian signed 16-bit PCM.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&i.to_le_bytes());
    }
    out
}

/// Wrap little-endian 16-bit mono PCM in a WAV container. A trailing odd byte is dropped.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
