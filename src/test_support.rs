//! Fixture writers shared by the unit tests.

use std::fs::File;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use ndarray::{Array1, Array2, arr1};
use ndarray_npy::NpzWriter;

use crate::indices::spectrogram::Spectrogram;

/// Mono 16-bit WAV of a slowly modulated tone.
pub fn write_wav(path: &Path, sample_rate: u32, duration_sec: f64) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let n = (sample_rate as f64 * duration_sec).round() as usize;
    for i in 0..n {
        let t = i as f64 / sample_rate as f64;
        let envelope = 0.3 + 0.2 * (t * 0.7).sin();
        let s = envelope * (t * 440.0 * std::f64::consts::TAU).sin();
        writer.write_sample((s * i16::MAX as f64) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// In-memory spectrogram at 1 kHz sample rate with 500 Hz row spacing.
pub fn spectrogram_fixture(n_freq: usize, n_time: usize, hop_length: u32) -> Spectrogram {
    let spec = Array2::from_shape_fn((n_freq, n_time), |(f, t)| {
        -60.0 + ((f * 13 + t * 7) % 17) as f32
    });
    let sample_rate = 1000;
    Spectrogram {
        spec,
        frequencies: (0..n_freq).map(|i| i as f32 * 500.0).collect(),
        time_bins: (0..n_time)
            .map(|i| i as f64 * hop_length as f64 / sample_rate as f64)
            .collect(),
        sample_rate,
        n_fft: 512,
        hop_length,
        n_mels: n_freq,
        power: 2.0,
        db_scale: true,
        normalization: false,
    }
}

/// Write `data` in the container layout the spectrogram pipeline produces.
pub fn write_npz(path: &Path, data: &Spectrogram) {
    let mut npz = NpzWriter::new(File::create(path).unwrap());
    npz.add_array("spec.npy", &data.spec).unwrap();
    npz.add_array("fn.npy", &Array1::from(data.frequencies.clone()))
        .unwrap();
    npz.add_array("time_bins.npy", &Array1::from(data.time_bins.clone()))
        .unwrap();
    npz.add_array("sample_rate.npy", &arr1(&[data.sample_rate as i32]))
        .unwrap();
    npz.add_array("n_fft.npy", &arr1(&[data.n_fft as i32])).unwrap();
    npz.add_array("hop_length.npy", &arr1(&[data.hop_length as i32]))
        .unwrap();
    npz.add_array("n_mels.npy", &arr1(&[data.n_mels as i32]))
        .unwrap();
    npz.add_array("power.npy", &arr1(&[data.power])).unwrap();
    npz.add_array("db_scale.npy", &arr1(&[data.db_scale])).unwrap();
    npz.add_array("normalization.npy", &arr1(&[data.normalization]))
        .unwrap();
    npz.finish().unwrap();
}
