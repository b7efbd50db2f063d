//! PCM audio helpers
//!
//! The engine carries exactly one audio format per direction: signed 16-bit
//! little-endian mono. Ingress is 16 kHz; egress is 24 kHz for web sessions
//! and 16 kHz when the carrier bridge requires it. No transcoding happens
//! here beyond wrapping PCM in a WAV container for vendors that only accept
//! file uploads.

use std::io::Cursor;

/// Sample rate of client → engine audio
pub const INGRESS_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of engine → web client audio
pub const EGRESS_SAMPLE_RATE_WEB: u32 = 24_000;

/// Sample rate of engine → carrier-bridge audio
pub const EGRESS_SAMPLE_RATE_CARRIER: u32 = 16_000;

/// Bytes per sample (s16le mono)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode little-endian 16-bit PCM bytes into samples. A trailing odd byte
/// is dropped.
pub fn bytes_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Mean absolute sample amplitude of a PCM byte frame
pub fn mean_abs_amplitude(pcm: &[u8]) -> f32 {
    let samples = bytes_to_samples(pcm);
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).abs()).sum();
    (sum / samples.len() as f64) as f32
}

/// Playback duration of a PCM byte buffer at the given sample rate
pub fn playback_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    let bytes_per_second = sample_rate as u64 * BYTES_PER_SAMPLE as u64;
    if bytes_per_second == 0 {
        return 0;
    }
    (byte_len as u64 * 1000) / bytes_per_second
}

/// Wrap raw PCM in a WAV container for vendors that require file uploads
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        // Writing to an in-memory cursor cannot fail
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .expect("WAV header write to memory");
        for sample in bytes_to_samples(pcm) {
            writer.write_sample(sample).expect("WAV sample write to memory");
        }
        writer.finalize().expect("WAV finalize to memory");
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_samples_little_endian() {
        let samples = bytes_to_samples(&[0x01, 0x00, 0xff, 0xff, 0xaa]);
        assert_eq!(samples, vec![1, -1]);
    }

    #[test]
    fn test_mean_abs_amplitude() {
        assert_eq!(mean_abs_amplitude(&[]), 0.0);
        // Two samples: 1000 and -1000
        let pcm: Vec<u8> = [1000i16, -1000i16]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        assert_eq!(mean_abs_amplitude(&pcm), 1000.0);
    }

    #[test]
    fn test_playback_duration() {
        // 1 second of 16 kHz s16le mono = 32000 bytes
        assert_eq!(playback_duration_ms(32_000, INGRESS_SAMPLE_RATE), 1000);
        // 1 second at 24 kHz = 48000 bytes
        assert_eq!(playback_duration_ms(48_000, EGRESS_SAMPLE_RATE_WEB), 1000);
        assert_eq!(playback_duration_ms(0, INGRESS_SAMPLE_RATE), 0);
    }

    #[test]
    fn test_pcm_to_wav_header() {
        let pcm: Vec<u8> = [0i16; 160].iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav = pcm_to_wav(&pcm, INGRESS_SAMPLE_RATE);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header + payload
        assert_eq!(wav.len(), 44 + pcm.len());
    }
}
