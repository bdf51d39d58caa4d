//! Audio Handler (§4.3): codec, sample-rate, and framing work.
//!
//! The µ-law/PCM16 table codec and WAV helpers are kept close to the
//! teacher's `pipeline::audio` module; resampling and chunking are new,
//! since the teacher only ever runs a single fixed pipeline rate and this
//! spec needs arbitrary platform/upstream rate pairs.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;

use base64::Engine;

use crate::error::AudioError;

const MULAW_BIAS: i16 = 0x84;
const MULAW_CLIP: i16 = 32635;

/// µ-law silence byte used for padding (Open Question 2, SPEC_FULL.md §D.2).
/// `0xFF` decodes to PCM16 `0` under the table below and is used
/// consistently everywhere a silence byte is needed.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Exact outbound Twilio frame size: 20ms at 8kHz 8-bit mono (§3, §4.3).
pub const TWILIO_FRAME_BYTES: usize = 160;

/// Minimum duration, in milliseconds, every emitted upstream chunk must
/// cover (§3, §8 invariant 1).
pub const CHUNK_FLOOR_MS: u32 = 100;

/// Decode a single mu-law byte to 16-bit PCM sample (ITU-T G.711).
pub fn mulaw_to_pcm(mulaw: u8) -> i16 {
    let mulaw = !mulaw;

    let sign = (mulaw & 0x80) as i16;
    let exponent = ((mulaw >> 4) & 0x07) as i16;
    let mantissa = (mulaw & 0x0F) as i16;

    let mut sample = ((mantissa << 3) + MULAW_BIAS) << exponent;
    sample -= MULAW_BIAS;

    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Encode a 16-bit PCM sample to a mu-law byte.
pub fn pcm_to_mulaw(sample: i16) -> u8 {
    let sign: u8;
    let mut sample = sample;

    if sample < 0 {
        sign = 0x80;
        sample = -sample;
    } else {
        sign = 0;
    }

    if sample > MULAW_CLIP {
        sample = MULAW_CLIP;
    }
    sample += MULAW_BIAS;

    let exponent = compress_table((sample >> 7) as u8);
    let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;

    !(sign | (exponent << 4) | mantissa)
}

fn compress_table(val: u8) -> u8 {
    match val {
        0..=1 => 0,
        2..=3 => 1,
        4..=7 => 2,
        8..=15 => 3,
        16..=31 => 4,
        32..=63 => 5,
        64..=127 => 6,
        _ => 7,
    }
}

/// Decode a buffer of mu-law bytes to 16-bit PCM samples.
pub fn decode_mulaw(mulaw_data: &[u8]) -> Vec<i16> {
    mulaw_data.iter().map(|&b| mulaw_to_pcm(b)).collect()
}

/// Encode 16-bit PCM samples to mu-law bytes.
pub fn encode_mulaw(pcm_data: &[i16]) -> Vec<u8> {
    pcm_data.iter().map(|&s| pcm_to_mulaw(s)).collect()
}

/// Calculate RMS energy of PCM samples (consumed by a VAD capability
/// `process(pcm_frame) -> (is_speech, confidence)` that lives outside this
/// crate per §1; kept here because it's pure audio math, same as the
/// teacher's `pipeline::audio::rms_energy`).
pub fn rms_energy(pcm_data: &[i16]) -> f64 {
    if pcm_data.is_empty() {
        return 0.0;
    }
    let sum: f64 = pcm_data.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / pcm_data.len() as f64).sqrt()
}

/// Linear resampler between arbitrary PCM16 sample rates (§4.3's
/// "polyphase or sinc-table" allowance — linear interpolation is the
/// simplest algorithm whose error is acceptable at the ratios this bridge
/// sees, 8kHz/16kHz/24kHz). Zero-length input yields zero-length output,
/// not an error (§4.3).
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = src_pos - idx as f64;
        let s0 = samples[idx.min(samples.len() - 1)] as f64;
        let s1 = samples[(idx + 1).min(samples.len() - 1)] as f64;
        out.push((s0 + (s1 - s0) * frac).round() as i16);
    }
    out
}

/// Split PCM16 bytes (little-endian) into chunks of at most `chunk_size`
/// bytes, padding the final chunk with silence so every chunk meets the
/// 100ms floor (§3, §4.3, §8 invariant 1). `sample_rate`/`sample_width`
/// describe the chunked audio.
pub fn chunk_with_floor(
    pcm_bytes: &[u8],
    chunk_size: usize,
    sample_rate: u32,
    sample_width: usize,
) -> Vec<Vec<u8>> {
    if pcm_bytes.is_empty() {
        return Vec::new();
    }
    let floor_bytes = floor_bytes(sample_rate, sample_width);
    let mut chunks: Vec<Vec<u8>> = pcm_bytes
        .chunks(chunk_size.max(1))
        .map(|c| c.to_vec())
        .collect();
    if let Some(last) = chunks.last_mut() {
        if last.len() < floor_bytes {
            last.resize(floor_bytes, 0); // PCM16 silence is the zero byte
        }
    }
    chunks
}

/// Bytes needed to cover `CHUNK_FLOOR_MS` at the given rate/width.
pub fn floor_bytes(sample_rate: u32, sample_width: usize) -> usize {
    (sample_rate as usize) * sample_width * (CHUNK_FLOOR_MS as usize) / 1000
}

/// Base64-encode a batch of chunks (used for both AudioCodes `audioChunk`
/// and conversation-item audio content).
pub fn base64_encode_chunks(chunks: &[Vec<u8>]) -> Vec<String> {
    chunks
        .iter()
        .map(|c| base64::engine::general_purpose::STANDARD.encode(c))
        .collect()
}

/// Slice µ-law audio into exact 160-byte (20ms) outbound Twilio frames,
/// right-padding a short trailing frame with `MULAW_SILENCE` (§4.3).
pub fn frame_for_twilio(mulaw_bytes: &[u8]) -> Vec<[u8; TWILIO_FRAME_BYTES]> {
    mulaw_bytes
        .chunks(TWILIO_FRAME_BYTES)
        .map(|chunk| {
            let mut frame = [MULAW_SILENCE; TWILIO_FRAME_BYTES];
            frame[..chunk.len()].copy_from_slice(chunk);
            frame
        })
        .collect()
}

/// Encode PCM samples as an in-memory WAV file.
pub fn pcm_to_wav(pcm_data: &[i16], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let mut buffer = Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::new(&mut buffer, spec).map_err(|e| AudioError::Load(e.to_string()))?;
    for &sample in pcm_data {
        writer
            .write_sample(sample)
            .map_err(|e| AudioError::Load(e.to_string()))?;
    }
    writer.finalize().map_err(|e| AudioError::Load(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// Load a WAV file from disk, decode to PCM16 mono, and return it alongside
/// its native sample rate. Unreadable container -> `AudioError::Load`;
/// unsupported bit depth/channel count -> `AudioError::Format` (§4.3).
pub fn load_wav(path: &Path) -> Result<(Vec<i16>, u32), AudioError> {
    let reader =
        hound::WavReader::open(path).map_err(|e| AudioError::Load(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(AudioError::Format(format!(
            "expected 16-bit PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;
    let mut reader = reader;
    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| AudioError::Load(e.to_string()))?;

    let mono = if channels == 1 {
        samples
    } else if channels == 2 {
        samples
            .chunks(2)
            .map(|pair| {
                let l = pair[0] as i32;
                let r = pair.get(1).copied().unwrap_or(0) as i32;
                ((l + r) / 2) as i16
            })
            .collect()
    } else {
        return Err(AudioError::Format(format!(
            "unsupported channel count: {channels}"
        )));
    };

    Ok((mono, sample_rate))
}

/// Prepare a test/fixture audio file for upstream playback: load, resample
/// to `target_rate`, chunk to `chunk_size` bytes with the 100ms floor,
/// base64-encode. This is the "load-file path" of §4.3, used by the mock
/// telephony clients and by tests.
pub fn prepare_file_for_upload(
    path: &Path,
    target_rate: u32,
    chunk_size: usize,
) -> Result<Vec<String>, AudioError> {
    let (samples, native_rate) = load_wav(path)?;
    let resampled = resample(&samples, native_rate, target_rate);
    let bytes: Vec<u8> = resampled.iter().flat_map(|s| s.to_le_bytes()).collect();
    let chunks = chunk_with_floor(&bytes, chunk_size, target_rate, 2);
    Ok(base64_encode_chunks(&chunks))
}

/// Default chunk size: ~1s at 16kHz/16-bit (§4.3).
pub const DEFAULT_CHUNK_SIZE: usize = 32_000;

/// Per-process cache keyed by `(path, target_rate, chunk_size)`, avoiding
/// rework when the same fixture is replayed by repeated test runs (§4.3).
/// Eviction is manual; there is no automatic pressure policy.
#[derive(Default)]
pub struct AudioCache {
    entries: Mutex<HashMap<(String, u32, usize), Vec<String>>>,
}

impl AudioCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &self,
        path: &Path,
        target_rate: u32,
        chunk_size: usize,
    ) -> Result<Vec<String>, AudioError> {
        let key = (path.to_string_lossy().to_string(), target_rate, chunk_size);
        {
            let cache = self.entries.lock().expect("audio cache mutex poisoned");
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }
        let chunks = prepare_file_for_upload(path, target_rate, chunk_size)?;
        self.entries
            .lock()
            .expect("audio cache mutex poisoned")
            .insert(key, chunks.clone());
        Ok(chunks)
    }

    pub fn clear_cache(&self) {
        self.entries.lock().expect("audio cache mutex poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audio cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_roundtrip() {
        for original in [-32000i16, -1000, 0, 1000, 32000] {
            let encoded = pcm_to_mulaw(original);
            let decoded = mulaw_to_pcm(encoded);
            let diff = (original as f64 - decoded as f64).abs();
            assert!(
                diff < (original.unsigned_abs() as f64 * 0.05 + 100.0),
                "original={original}, decoded={decoded}, diff={diff}"
            );
        }
    }

    #[test]
    fn mulaw_silence_byte_decodes_near_zero() {
        let decoded = mulaw_to_pcm(MULAW_SILENCE);
        assert_eq!(decoded, 0);
    }

    #[test]
    fn wav_roundtrip() {
        let samples: Vec<i16> = (0..100).map(|i| (i * 100) as i16).collect();
        let wav = pcm_to_wav(&samples, 8000).unwrap();
        let tmp = std::env::temp_dir().join(format!("voicebridge-test-{}.wav", std::process::id()));
        std::fs::write(&tmp, &wav).unwrap();
        let (decoded, rate) = load_wav(&tmp).unwrap();
        std::fs::remove_file(&tmp).ok();
        assert_eq!(samples, decoded);
        assert_eq!(rate, 8000);
    }

    #[test]
    fn rms_energy_silence() {
        let silence = vec![0i16; 100];
        assert_eq!(rms_energy(&silence), 0.0);
    }

    #[test]
    fn resample_upsamples_doubles_length() {
        let samples: Vec<i16> = vec![0, 1000, 2000, 3000];
        let up = resample(&samples, 8000, 16000);
        assert_eq!(up.len(), 8);
    }

    #[test]
    fn resample_empty_input_is_not_error() {
        let out = resample(&[], 8000, 16000);
        assert!(out.is_empty());
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples: Vec<i16> = vec![1, 2, 3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn chunk_floor_pads_final_chunk() {
        // 8kHz, 16-bit: 100ms floor = 1600 bytes.
        let bytes = vec![0xAAu8; 500];
        let chunks = chunk_with_floor(&bytes, 32_000, 8000, 2);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].len() >= floor_bytes(8000, 2));
    }

    #[test]
    fn chunk_with_floor_on_empty_input_yields_no_chunks() {
        assert!(chunk_with_floor(&[], 1000, 8000, 2).is_empty());
    }

    #[test]
    fn twilio_framing_is_exactly_160_bytes_and_pads_with_silence() {
        let mulaw = vec![0x00u8; 250]; // one full frame + a short tail
        let frames = frame_for_twilio(&mulaw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), TWILIO_FRAME_BYTES);
        assert_eq!(frames[1].len(), TWILIO_FRAME_BYTES);
        // Tail frame: 90 bytes of real audio then silence padding.
        assert_eq!(frames[1][89], 0x00);
        assert_eq!(frames[1][90], MULAW_SILENCE);
    }

    #[test]
    fn cache_avoids_reprocessing() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 500) as i16).collect();
        let wav = pcm_to_wav(&samples, 16000).unwrap();
        let tmp = std::env::temp_dir().join(format!("voicebridge-cache-{}.wav", std::process::id()));
        std::fs::write(&tmp, &wav).unwrap();

        let cache = AudioCache::new();
        assert!(cache.is_empty());
        let first = cache.get_or_load(&tmp, 24000, 3200).unwrap();
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_load(&tmp, 24000, 3200).unwrap();
        assert_eq!(first, second);
        cache.clear_cache();
        assert!(cache.is_empty());

        std::fs::remove_file(&tmp).ok();
    }
}
