use std::path::Path;

use hound::{SampleFormat, WavReader};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),
}

/// A decoded recording, mixed down to mono.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoAudio {
    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load a WAV file as mono samples in [-1, 1]. Multi-channel audio is averaged.
pub fn load_audio(path: &Path) -> Result<MonoAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if ext != "wav" {
        return Err(DecodeError::UnsupportedFormat(path.display().to_string()));
    }
    if !path.is_file() {
        return Err(DecodeError::NotFound(path.display().to_string()));
    }

    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    log::debug!(
        "Decoded {}: {} samples at {} Hz ({} channel(s))",
        path.display(),
        samples.len(),
        spec.sample_rate,
        spec.channels
    );

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
