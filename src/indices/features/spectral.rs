//! Spectrogram-domain routines. A chunk is a `(frequency rows, time columns)` view in dB.

use ndarray::{Array2, ArrayView2, Axis};

use super::{
    FeatureError, FeatureOutput, SpectralContext, db_to_power, gini, mean, median,
    normalized_entropy,
};
use crate::indices::registry::FrequencyBand;

// ── Thresholds ───────────────────────────────────────────────────────

/// Width of the bands used by ADI/AEI.
const DIVERSITY_BAND_HZ: f64 = 1000.0;
const DIVERSITY_MAX_HZ: f64 = 20_000.0;
/// Cells louder than `max + threshold` count as occupied for ADI/AEI.
const DIVERSITY_THRESHOLD_DB: f64 = -50.0;

/// Cells more than this far above their row's median are active.
const ACTIVITY_THRESHOLD_DB: f64 = 6.0;
const COVER_THRESHOLD_DB: f64 = 3.0;

const COVER_BANDS: [(f64, f64); 3] = [(0.0, 1000.0), (1000.0, 10_000.0), (10_000.0, 20_000.0)];

const PEAK_SLOPE_DB: f64 = 1.0;
const PEAK_MIN_SEPARATION_HZ: f64 = 200.0;

const POWER_FLOOR: f64 = 1e-20;

// ── Helpers ──────────────────────────────────────────────────────────

fn power_to_db(p: f64) -> f64 {
    10.0 * p.max(POWER_FLOOR).log10()
}

fn to_power(chunk: ArrayView2<'_, f32>) -> Array2<f64> {
    chunk.mapv(db_to_power)
}

/// Time-averaged power of every frequency row.
fn mean_spectrum(power: &Array2<f64>) -> Vec<f64> {
    power
        .rows()
        .into_iter()
        .map(|row| row.mean().unwrap_or(0.0))
        .collect()
}

fn frequency_of(ctx: &SpectralContext<'_>, row: usize) -> Option<f64> {
    ctx.frequencies.get(row).map(|&f| f as f64)
}

/// Rows whose centre frequency satisfies `pred`.
fn rows_where(ctx: &SpectralContext<'_>, n_rows: usize, pred: impl Fn(f64) -> bool) -> Vec<usize> {
    (0..n_rows)
        .filter(|&r| frequency_of(ctx, r).is_some_and(|f| pred(f)))
        .collect()
}

fn bin_width(ctx: &SpectralContext<'_>) -> f64 {
    match ctx.frequencies {
        [a, b, ..] => (*b as f64 - *a as f64).abs(),
        _ => 1.0,
    }
}

/// Level of every cell above its row's median (the per-bin background).
fn excess_over_background(chunk: ArrayView2<'_, f32>) -> Array2<f64> {
    let mut excess = Array2::<f64>::zeros(chunk.raw_dim());
    for (r, row) in chunk.rows().into_iter().enumerate() {
        let values: Vec<f64> = row.iter().map(|&v| v as f64).collect();
        let background = median(&values).unwrap_or(0.0);
        for (c, v) in values.iter().enumerate() {
            excess[[r, c]] = v - background;
        }
    }
    excess
}

/// Fraction of cells in `rows` whose value passes `pred`.
fn occupied_fraction(
    values: &Array2<f64>,
    rows: &[usize],
    pred: impl Fn(f64) -> bool,
) -> Option<f64> {
    let mut cells = 0usize;
    let mut hits = 0usize;
    for &r in rows {
        for &v in values.row(r) {
            cells += 1;
            if pred(v) {
                hits += 1;
            }
        }
    }
    (cells > 0).then(|| hits as f64 / cells as f64)
}

// ── Complexity and diversity ─────────────────────────────────────────

/// ACI per frequency bin: summed absolute power change between frames over total power.
/// Components: `[mean_per_bin, sum]`.
pub fn acoustic_complexity(chunk: ArrayView2<'_, f32>) -> Result<FeatureOutput, FeatureError> {
    if chunk.ncols() < 2 {
        return Err(FeatureError::EmptyChunk);
    }
    let power = to_power(chunk);
    let per_bin: Vec<f64> = power
        .rows()
        .into_iter()
        .map(|row| {
            let total: f64 = row.sum();
            if total <= 0.0 {
                return 0.0;
            }
            let variation: f64 = row
                .iter()
                .zip(row.iter().skip(1))
                .map(|(a, b)| (b - a).abs())
                .sum();
            variation / total
        })
        .collect();
    let sum: f64 = per_bin.iter().sum();
    let avg = mean(&per_bin).ok_or(FeatureError::EmptyChunk)?;
    Ok(FeatureOutput::Components(vec![avg, sum]))
}

/// Occupancy of each 1 kHz band up to 20 kHz, relative to the loudest cell.
fn diversity_scores(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<Vec<f64>, FeatureError> {
    let max_db = chunk.iter().fold(f64::NEG_INFINITY, |acc, &v| acc.max(v as f64));
    if !max_db.is_finite() {
        return Err(FeatureError::Silent);
    }
    let relative = chunk.mapv(|v| v as f64 - max_db);

    let n_bands = (DIVERSITY_MAX_HZ / DIVERSITY_BAND_HZ) as usize;
    let scores: Vec<f64> = (0..n_bands)
        .filter_map(|b| {
            let lo = b as f64 * DIVERSITY_BAND_HZ;
            let hi = lo + DIVERSITY_BAND_HZ;
            let rows = rows_where(ctx, chunk.nrows(), |f| f >= lo && f < hi);
            occupied_fraction(&relative, &rows, |v| v > DIVERSITY_THRESHOLD_DB)
        })
        .collect();

    if scores.is_empty() {
        return Err(FeatureError::EmptyBand(format!("0-{}", DIVERSITY_MAX_HZ as i64)));
    }
    Ok(scores)
}

/// ADI: Shannon entropy (nats) of the band occupancy scores.
pub fn acoustic_diversity(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    let scores = diversity_scores(chunk, ctx)?;
    let total: f64 = scores.iter().sum();
    if total <= 0.0 {
        return Err(FeatureError::Silent);
    }
    let h: f64 = scores
        .iter()
        .filter(|&&s| s > 0.0)
        .map(|&s| {
            let p = s / total;
            -p * p.ln()
        })
        .sum();
    Ok(FeatureOutput::Scalar(h))
}

/// AEI: Gini coefficient of the band occupancy scores.
pub fn acoustic_evenness(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    let scores = diversity_scores(chunk, ctx)?;
    gini(&scores)
        .map(FeatureOutput::Scalar)
        .ok_or(FeatureError::Silent)
}

/// BI: area of the mean spectrum (dB relative to its maximum) above the band's minimum,
/// in dB·Hz.
pub fn bioacoustics(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
    band: FrequencyBand,
) -> Result<FeatureOutput, FeatureError> {
    let spectrum: Vec<f64> = mean_spectrum(&to_power(chunk))
        .into_iter()
        .map(power_to_db)
        .collect();
    let rows = rows_where(ctx, spectrum.len(), |f| band.contains(f));
    if rows.is_empty() {
        return Err(FeatureError::EmptyBand(band.label()));
    }

    let peak = spectrum.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let in_band: Vec<f64> = rows.iter().map(|&r| spectrum[r] - peak).collect();
    let floor = in_band.iter().copied().fold(f64::INFINITY, f64::min);
    let area: f64 = in_band.iter().map(|v| v - floor).sum::<f64>() * bin_width(ctx);
    Ok(FeatureOutput::Scalar(area))
}

// ── Entropy ──────────────────────────────────────────────────────────

/// Components: `[entropy_of_mean_spectrum, mean_frame_entropy]`, both normalised.
pub fn frequency_entropy(chunk: ArrayView2<'_, f32>) -> Result<FeatureOutput, FeatureError> {
    let power = to_power(chunk);
    let spectral = normalized_entropy(mean_spectrum(&power)).ok_or(FeatureError::Silent)?;
    let frames: Vec<f64> = power
        .columns()
        .into_iter()
        .filter_map(|col| normalized_entropy(col.iter().copied()))
        .collect();
    let per_frame = mean(&frames).ok_or(FeatureError::Silent)?;
    Ok(FeatureOutput::Components(vec![spectral, per_frame]))
}

/// Spectral entropy family, each `1 - normalised entropy` of a per-bin statistic.
///
/// Components: `[EAS, ECU, ECV, EPS]` over the mean, variance, coefficient of variation
/// and maximum of each bin. A statistic with no mass (e.g. zero variance) yields NaN.
pub fn spectral_entropy(chunk: ArrayView2<'_, f32>) -> Result<FeatureOutput, FeatureError> {
    let power = to_power(chunk);
    let means = mean_spectrum(&power);
    let n_frames = power.ncols() as f64;

    let variances: Vec<f64> = power
        .rows()
        .into_iter()
        .zip(&means)
        .map(|(row, &m)| row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n_frames)
        .collect();
    let cvs: Vec<f64> = variances
        .iter()
        .zip(&means)
        .map(|(&var, &m)| if m > 0.0 { var.sqrt() / m } else { 0.0 })
        .collect();
    let peaks: Vec<f64> = power
        .rows()
        .into_iter()
        .map(|row| row.iter().copied().fold(0.0, f64::max))
        .collect();

    let complement =
        |v: &[f64]| normalized_entropy(v.iter().copied()).map_or(f64::NAN, |h| 1.0 - h);

    let eas = 1.0 - normalized_entropy(means.iter().copied()).ok_or(FeatureError::Silent)?;
    Ok(FeatureOutput::Components(vec![
        eas,
        complement(&variances),
        complement(&cvs),
        complement(&peaks),
    ]))
}

// ── Peaks ────────────────────────────────────────────────────────────

/// Number of local maxima of the mean spectrum (dB) with both slopes ≥ 1 dB, keeping the
/// loudest of any peaks closer than 200 Hz.
pub fn number_of_peaks(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    let spectrum: Vec<f64> = mean_spectrum(&to_power(chunk))
        .into_iter()
        .map(power_to_db)
        .collect();
    if spectrum.len() < 3 {
        return Ok(FeatureOutput::Scalar(0.0));
    }

    let mut candidates: Vec<(usize, f64)> = (1..spectrum.len() - 1)
        .filter(|&i| {
            spectrum[i] - spectrum[i - 1] >= PEAK_SLOPE_DB
                && spectrum[i] - spectrum[i + 1] >= PEAK_SLOPE_DB
        })
        .map(|i| (i, spectrum[i]))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let width = bin_width(ctx);
    let mut kept: Vec<f64> = Vec::new();
    for (row, _) in candidates {
        let freq = frequency_of(ctx, row).unwrap_or(row as f64 * width);
        if kept
            .iter()
            .all(|&k| (k - freq).abs() >= PEAK_MIN_SEPARATION_HZ)
        {
            kept.push(freq);
        }
    }
    Ok(FeatureOutput::Scalar(kept.len() as f64))
}

// ── Activity ─────────────────────────────────────────────────────────

/// Components: `[fraction_active, active_cells, mean_excess_db]`.
pub fn spectral_activity(chunk: ArrayView2<'_, f32>) -> Result<FeatureOutput, FeatureError> {
    let excess = excess_over_background(chunk);
    let active: Vec<f64> = excess
        .iter()
        .copied()
        .filter(|&d| d > ACTIVITY_THRESHOLD_DB)
        .collect();
    let count = active.len() as f64;
    Ok(FeatureOutput::Components(vec![
        count / excess.len() as f64,
        count,
        mean(&active).unwrap_or(0.0),
    ]))
}

/// Events are runs of consecutive active frames within one bin.
/// Components: `[event_count, mean_duration_sec]`.
pub fn spectral_events(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    let excess = excess_over_background(chunk);
    let mut durations: Vec<usize> = Vec::new();
    for row in excess.rows() {
        let mut run = 0usize;
        for &d in row {
            if d > ACTIVITY_THRESHOLD_DB {
                run += 1;
            } else if run > 0 {
                durations.push(run);
                run = 0;
            }
        }
        if run > 0 {
            durations.push(run);
        }
    }

    let count = durations.len() as f64;
    let mean_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<usize>() as f64 / count * ctx.time_step
    };
    Ok(FeatureOutput::Components(vec![count, mean_duration]))
}

/// Fraction of active cells in the low (0-1 kHz), mid (1-10 kHz) and high (10-20 kHz)
/// bands. Components: `[LFC, MFC, HFC]`; a band with no bins is NaN.
pub fn spectral_cover(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    let excess = excess_over_background(chunk);
    let cover = COVER_BANDS
        .iter()
        .map(|&(lo, hi)| {
            let rows = rows_where(ctx, excess.nrows(), |f| f >= lo && f < hi);
            occupied_fraction(&excess, &rows, |d| d > COVER_THRESHOLD_DB).unwrap_or(f64::NAN)
        })
        .collect();
    Ok(FeatureOutput::Components(cover))
}

/// Spectral activity restricted to the bins inside `band`.
pub fn band_activity(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
    band: FrequencyBand,
) -> Result<FeatureOutput, FeatureError> {
    let rows = rows_where(ctx, chunk.nrows(), |f| band.contains(f));
    if rows.is_empty() {
        return Err(FeatureError::EmptyBand(band.label()));
    }
    let sub = chunk.select(Axis(0), &rows);
    spectral_activity(sub.view())
}

// ── Soundscape and level ─────────────────────────────────────────────

/// NDSI between the biophony and anthropophony bands.
/// Components: `[ndsi, bio_over_anthro, anthro_energy, bio_energy]`.
pub fn soundscape(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
    bio: FrequencyBand,
    anthro: FrequencyBand,
) -> Result<FeatureOutput, FeatureError> {
    let spectrum = mean_spectrum(&to_power(chunk));
    let energy = |band: FrequencyBand| -> Result<f64, FeatureError> {
        let rows = rows_where(ctx, spectrum.len(), |f| band.contains(f));
        if rows.is_empty() {
            return Err(FeatureError::EmptyBand(band.label()));
        }
        Ok(rows.iter().map(|&r| spectrum[r]).sum())
    };

    let bio_energy = energy(bio)?;
    let anthro_energy = energy(anthro)?;
    let total = bio_energy + anthro_energy;
    if total <= 0.0 {
        return Err(FeatureError::Silent);
    }
    let ratio = if anthro_energy > 0.0 {
        bio_energy / anthro_energy
    } else {
        f64::NAN
    };
    Ok(FeatureOutput::Components(vec![
        (bio_energy - anthro_energy) / total,
        ratio,
        anthro_energy,
        bio_energy,
    ]))
}

/// AGI: mean absolute level change per second in each bin.
/// Components: `[mean_over_bins, sum_over_bins]`.
pub fn acoustic_gradient(
    chunk: ArrayView2<'_, f32>,
    ctx: &SpectralContext<'_>,
) -> Result<FeatureOutput, FeatureError> {
    if chunk.ncols() < 2 {
        return Err(FeatureError::EmptyChunk);
    }
    let steps = (chunk.ncols() - 1) as f64;
    let per_bin: Vec<f64> = chunk
        .rows()
        .into_iter()
        .map(|row| {
            let change: f64 = row
                .iter()
                .zip(row.iter().skip(1))
                .map(|(a, b)| (*b as f64 - *a as f64).abs())
                .sum();
            change / (steps * ctx.time_step)
        })
        .collect();
    let sum: f64 = per_bin.iter().sum();
    let avg = mean(&per_bin).ok_or(FeatureError::EmptyChunk)?;
    Ok(FeatureOutput::Components(vec![avg, sum]))
}

/// Equivalent continuous level of the chunk, dB.
pub fn spectral_leq(chunk: ArrayView2<'_, f32>) -> Result<FeatureOutput, FeatureError> {
    let power = to_power(chunk)
        .mean()
        .ok_or(FeatureError::EmptyChunk)?;
    Ok(FeatureOutput::Scalar(power_to_db(power)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP_HZ: f32 = 500.0;

    fn freqs(n: usize, step: f32) -> Vec<f32> {
        (0..n).map(|i| i as f32 * step).collect()
    }

    fn ctx(frequencies: &[f32]) -> SpectralContext<'_> {
        SpectralContext {
            frequencies,
            time_step: 0.1,
        }
    }

    fn flat(rows: usize, cols: usize, db: f32) -> Array2<f32> {
        Array2::from_elem((rows, cols), db)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_aci_of_steady_spectrum_is_zero() {
        let out = acoustic_complexity(flat(4, 10, -40.0).view()).unwrap();
        assert_eq!(out, FeatureOutput::Components(vec![0.0, 0.0]));
    }

    #[test]
    fn test_aci_grows_with_fluctuation() {
        let mut chunk = flat(4, 10, -40.0);
        for c in (0..10).step_by(2) {
            chunk[[1, c]] = -20.0;
        }
        let out = acoustic_complexity(chunk.view()).unwrap();
        assert!(out.select(1).unwrap() > 0.5);
    }

    #[test]
    fn test_aci_needs_two_frames() {
        assert_eq!(
            acoustic_complexity(flat(4, 1, -40.0).view()),
            Err(FeatureError::EmptyChunk)
        );
    }

    #[test]
    fn test_diversity_of_uniform_spectrum() {
        let f = freqs(40, STEP_HZ);
        let chunk = flat(40, 8, -30.0);
        let adi = acoustic_diversity(chunk.view(), &ctx(&f)).unwrap();
        assert!(close(adi.select(0).unwrap(), (20f64).ln()));
        let aei = acoustic_evenness(chunk.view(), &ctx(&f)).unwrap();
        assert!(close(aei.select(0).unwrap(), 0.0));
    }

    #[test]
    fn test_evenness_rises_when_one_band_dominates() {
        let f = freqs(40, STEP_HZ);
        let mut chunk = flat(40, 8, -120.0);
        for c in 0..8 {
            chunk[[10, c]] = -10.0;
        }
        let aei = acoustic_evenness(chunk.view(), &ctx(&f)).unwrap();
        assert!(aei.select(0).unwrap() > 0.9);
    }

    #[test]
    fn test_bioacoustics_band() {
        let f = freqs(40, STEP_HZ);
        let flat_chunk = flat(40, 6, -50.0);
        let out = bioacoustics(flat_chunk.view(), &ctx(&f), FrequencyBand::new(2000.0, 8000.0))
            .unwrap();
        assert!(close(out.select(0).unwrap(), 0.0));

        let mut chunk = flat_chunk.clone();
        for c in 0..6 {
            chunk[[8, c]] = -10.0;
        }
        let out =
            bioacoustics(chunk.view(), &ctx(&f), FrequencyBand::new(2000.0, 8000.0)).unwrap();
        assert!(out.select(0).unwrap() > 0.0);

        let err = bioacoustics(chunk.view(), &ctx(&f), FrequencyBand::new(30000.0, 40000.0))
            .unwrap_err();
        assert_eq!(err, FeatureError::EmptyBand("30000-40000".into()));
    }

    #[test]
    fn test_flat_spectrum_entropies() {
        let out = frequency_entropy(flat(16, 5, -30.0).view()).unwrap();
        assert!(close(out.select(0).unwrap(), 1.0));
        assert!(close(out.select(1).unwrap(), 1.0));

        let out = spectral_entropy(flat(16, 5, -30.0).view()).unwrap();
        assert!(close(out.select(0).unwrap(), 0.0));
        // Zero variance leaves ECU undefined; rounding may leave a uniform residue
        let ecu = out.select(1).unwrap();
        assert!(ecu.is_nan() || close(ecu, 0.0));
    }

    #[test]
    fn test_number_of_peaks_merges_close_peaks() {
        let f = freqs(40, 50.0);
        let mut chunk = flat(40, 4, -60.0);
        for c in 0..4 {
            chunk[[10, c]] = -20.0;
            chunk[[12, c]] = -25.0;
            chunk[[30, c]] = -30.0;
        }
        let out = number_of_peaks(chunk.view(), &ctx(&f)).unwrap();
        assert_eq!(out, FeatureOutput::Scalar(2.0));
    }

    #[test]
    fn test_activity_and_events() {
        let f = freqs(2, STEP_HZ);
        let mut chunk = flat(2, 20, -60.0);
        for c in 5..8 {
            chunk[[0, c]] = -40.0;
        }

        let act = spectral_activity(chunk.view()).unwrap();
        assert_eq!(act.select(1), Some(3.0));
        assert!(close(act.select(0).unwrap(), 3.0 / 40.0));
        assert!(close(act.select(2).unwrap(), 20.0));

        let events = spectral_events(chunk.view(), &ctx(&f)).unwrap();
        assert_eq!(events.select(0), Some(1.0));
        assert!(close(events.select(1).unwrap(), 0.3));
    }

    #[test]
    fn test_band_activity_ignores_bins_outside_band() {
        let f = freqs(40, STEP_HZ);
        let mut chunk = flat(40, 20, -60.0);
        for c in 5..8 {
            chunk[[0, c]] = -40.0;
        }
        let out =
            band_activity(chunk.view(), &ctx(&f), FrequencyBand::new(2000.0, 8000.0)).unwrap();
        assert_eq!(out.select(1), Some(0.0));

        let out = band_activity(chunk.view(), &ctx(&f), FrequencyBand::new(0.0, 1000.0)).unwrap();
        assert_eq!(out.select(1), Some(3.0));
    }

    #[test]
    fn test_spectral_cover_bands() {
        let f = freqs(40, STEP_HZ);
        let mut chunk = flat(40, 20, -60.0);
        for c in 0..10 {
            chunk[[0, c]] = -50.0;
        }
        let out = spectral_cover(chunk.view(), &ctx(&f)).unwrap();
        assert!(close(out.select(0).unwrap(), 0.25));
        assert_eq!(out.select(1), Some(0.0));
        assert_eq!(out.select(2), Some(0.0));
    }

    #[test]
    fn test_ndsi_biophony_only() {
        let f = freqs(40, STEP_HZ);
        let mut chunk = flat(40, 4, -100.0);
        for r in 5..=16 {
            for c in 0..4 {
                chunk[[r, c]] = -20.0;
            }
        }
        let bio = FrequencyBand::new(2000.0, 8000.0);
        let anthro = FrequencyBand::new(0.0, 2000.0);
        let out = soundscape(chunk.view(), &ctx(&f), bio, anthro).unwrap();
        assert!(out.select(0).unwrap() > 0.99);
        assert!(out.select(3).unwrap() > out.select(2).unwrap());
    }

    #[test]
    fn test_gradient_and_leq() {
        let out = acoustic_gradient(flat(3, 5, -30.0).view(), &ctx(&freqs(3, STEP_HZ))).unwrap();
        assert_eq!(out, FeatureOutput::Components(vec![0.0, 0.0]));

        let out = spectral_leq(flat(3, 5, -30.0).view()).unwrap();
        assert!(close(out.select(0).unwrap(), -30.0));
    }
}
