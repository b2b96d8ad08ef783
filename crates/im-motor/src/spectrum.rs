//! FFT spectrum analysis
//!
//! Hanning-windowed DFT with zero-padding to a power of two. Magnitudes are
//! normalized by the window sum so a full-scale sine reads its true
//! amplitude; target-frequency lookups tolerate +/-2 bins of leakage.

use im_common::motor::BearingGeometry;
use im_common::stats::EPSILON;
use num_complex::Complex;
use rustfft::FftPlanner;

/// Bins searched on either side of a target frequency
const LEAKAGE_BINS: usize = 2;

/// Characteristic bearing fault frequencies for a given shaft speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BearingFrequencies {
    pub bpfo: f64,
    pub bpfi: f64,
    pub bsf: f64,
    pub ftf: f64,
}

/// Classic rolling-element geometry formulas
pub fn bearing_frequencies(geometry: &BearingGeometry, shaft_hz: f64) -> BearingFrequencies {
    let n = f64::from(geometry.rolling_element_count);
    let ratio = geometry.ball_diameter_mm / geometry.pitch_diameter_mm;
    let cos_theta = geometry.contact_angle_deg.to_radians().cos();
    let bd_pd_cos = ratio * cos_theta;

    BearingFrequencies {
        bpfo: (n / 2.0) * shaft_hz * (1.0 - bd_pd_cos),
        bpfi: (n / 2.0) * shaft_hz * (1.0 + bd_pd_cos),
        bsf: (1.0 / (2.0 * ratio)) * shaft_hz * (1.0 - bd_pd_cos * bd_pd_cos),
        ftf: (shaft_hz / 2.0) * (1.0 - bd_pd_cos),
    }
}

/// One-sided amplitude spectrum
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub magnitudes: Vec<f64>,
    pub resolution_hz: f64,
    pub sample_rate_hz: f64,
}

impl Spectrum {
    /// Compute the spectrum of `samples` at `sample_rate_hz`. Empty input
    /// yields an empty spectrum.
    pub fn compute(samples: &[f64], sample_rate_hz: f64) -> Spectrum {
        let n = samples.len();
        if n == 0 || sample_rate_hz <= 0.0 {
            return Spectrum { magnitudes: Vec::new(), resolution_hz: 0.0, sample_rate_hz };
        }

        // Hanning window over the original range only
        let mut window_sum = 0.0;
        let mut buffer: Vec<Complex<f64>> = Vec::with_capacity(n.next_power_of_two());
        for (i, &sample) in samples.iter().enumerate() {
            let w = if n == 1 {
                1.0
            } else {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
            };
            window_sum += w;
            buffer.push(Complex::new(sample * w, 0.0));
        }
        let padded = n.next_power_of_two();
        buffer.resize(padded, Complex::new(0.0, 0.0));

        FftPlanner::new().plan_fft_forward(padded).process(&mut buffer);

        let scale = if window_sum < EPSILON { 0.0 } else { 2.0 / window_sum };
        let magnitudes: Vec<f64> =
            buffer[..padded / 2].iter().map(|c| c.norm() * scale).collect();

        Spectrum {
            magnitudes,
            resolution_hz: sample_rate_hz / padded as f64,
            sample_rate_hz,
        }
    }

    /// Amplitude at a target frequency: the maximum across +/-2 bins
    pub fn amplitude_at(&self, target_hz: f64) -> f64 {
        if self.magnitudes.is_empty() || self.resolution_hz < EPSILON || target_hz < 0.0 {
            return 0.0;
        }
        let center = (target_hz / self.resolution_hz).round() as usize;
        let lo = center.saturating_sub(LEAKAGE_BINS);
        let hi = (center + LEAKAGE_BINS).min(self.magnitudes.len().saturating_sub(1));
        if lo > hi {
            return 0.0;
        }
        self.magnitudes[lo..=hi].iter().cloned().fold(0.0, f64::max)
    }

    /// Sum of squared magnitudes over `[lo_hz, hi_hz)`
    pub fn band_energy(&self, lo_hz: f64, hi_hz: f64) -> f64 {
        if self.resolution_hz < EPSILON {
            return 0.0;
        }
        let lo = (lo_hz / self.resolution_hz).ceil().max(0.0) as usize;
        let hi = ((hi_hz / self.resolution_hz).ceil() as usize).min(self.magnitudes.len());
        if lo >= hi {
            return 0.0;
        }
        self.magnitudes[lo..hi].iter().map(|m| m * m).sum()
    }

    /// Median magnitude, used as the leakage-tolerant noise floor
    pub fn noise_floor(&self) -> f64 {
        if self.magnitudes.len() < 2 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.magnitudes[1..].to_vec(); // skip DC
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted[sorted.len() / 2]
    }
}

/// Derived spectral features of one current waveform
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFeatures {
    pub fundamental_hz: f64,
    pub fundamental_amplitude: f64,
    pub harmonic2_amplitude: f64,
    pub harmonic3_amplitude: f64,
    pub thd_percent: f64,
    pub low_band_energy: f64,
    pub mid_band_energy: f64,
    pub high_band_energy: f64,
    pub bearing: Option<BearingAmplitudes>,
    pub noise_floor: f64,
}

/// Amplitudes observed at the bearing fault frequencies
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BearingAmplitudes {
    pub frequencies: BearingFrequencies,
    pub bpfo: f64,
    pub bpfi: f64,
    pub bsf: f64,
    pub ftf: f64,
}

impl SpectrumFeatures {
    /// Extract features around a known supply frequency. `None` for an
    /// empty spectrum.
    pub fn extract(
        spectrum: &Spectrum,
        fundamental_hz: f64,
        bearing: Option<BearingFrequencies>,
    ) -> Option<SpectrumFeatures> {
        if spectrum.magnitudes.is_empty() {
            return None;
        }
        let fundamental = spectrum.amplitude_at(fundamental_hz);
        let h2 = spectrum.amplitude_at(2.0 * fundamental_hz);
        let h3 = spectrum.amplitude_at(3.0 * fundamental_hz);
        let thd = if fundamental < EPSILON {
            0.0
        } else {
            (h2 * h2 + h3 * h3).sqrt() / fundamental * 100.0
        };

        let nyquist = spectrum.sample_rate_hz / 2.0;
        Some(SpectrumFeatures {
            fundamental_hz,
            fundamental_amplitude: fundamental,
            harmonic2_amplitude: h2,
            harmonic3_amplitude: h3,
            thd_percent: thd,
            low_band_energy: spectrum.band_energy(0.0, 100.0),
            mid_band_energy: spectrum.band_energy(100.0, 1000.0),
            high_band_energy: spectrum.band_energy(1000.0, nyquist),
            bearing: bearing.map(|f| BearingAmplitudes {
                frequencies: f,
                bpfo: spectrum.amplitude_at(f.bpfo),
                bpfi: spectrum.amplitude_at(f.bpfi),
                bsf: spectrum.amplitude_at(f.bsf),
                ftf: spectrum.amplitude_at(f.ftf),
            }),
            noise_floor: spectrum.noise_floor(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn sine_mix(n: usize, fs: f64, components: &[(f64, f64)]) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                components.iter().map(|(freq, amp)| amp * (2.0 * PI * freq * t).sin()).sum()
            })
            .collect()
    }

    #[test]
    fn empty_input_yields_empty_spectrum() {
        let spectrum = Spectrum::compute(&[], 1000.0);
        assert!(spectrum.magnitudes.is_empty());
        assert_eq!(spectrum.amplitude_at(50.0), 0.0);
    }

    #[test]
    fn full_scale_sine_reads_unit_amplitude() {
        // fs 1024 puts 50 Hz exactly on a bin of the 8192-point transform
        let samples = sine_mix(8192, 1024.0, &[(50.0, 1.0)]);
        let spectrum = Spectrum::compute(&samples, 1024.0);
        assert_relative_eq!(spectrum.amplitude_at(50.0), 1.0, epsilon = 0.02);
        // Away from the tone the spectrum is near zero
        assert!(spectrum.amplitude_at(400.0) < 0.01);
    }

    #[test]
    fn non_power_of_two_input_is_zero_padded() {
        let samples = sine_mix(6000, 1024.0, &[(50.0, 2.0)]);
        let spectrum = Spectrum::compute(&samples, 1024.0);
        assert_eq!(spectrum.magnitudes.len(), 8192 / 2);
        assert_relative_eq!(spectrum.amplitude_at(50.0), 2.0, epsilon = 0.1);
    }

    #[test]
    fn bearing_formulas_match_the_geometry() {
        // 9 balls, bd/pd = 0.25, contact angle 0
        let geometry = BearingGeometry {
            rolling_element_count: 9,
            ball_diameter_mm: 10.0,
            pitch_diameter_mm: 40.0,
            contact_angle_deg: 0.0,
        };
        let f = bearing_frequencies(&geometry, 10.0);
        assert_relative_eq!(f.bpfo, 4.5 * 10.0 * 0.75, epsilon = 1e-9);
        assert_relative_eq!(f.bpfi, 4.5 * 10.0 * 1.25, epsilon = 1e-9);
        assert_relative_eq!(f.bsf, 2.0 * 10.0 * (1.0 - 0.0625), epsilon = 1e-9);
        assert_relative_eq!(f.ftf, 5.0 * 0.75, epsilon = 1e-9);
    }

    #[test]
    fn bearing_tone_is_visible_above_the_noise_floor() {
        // 50 Hz fundamental plus a 0.1-amplitude tone at the 97 Hz BPFO
        let samples = sine_mix(8192, 1024.0, &[(50.0, 1.0), (97.0, 0.1)]);
        let spectrum = Spectrum::compute(&samples, 1024.0);

        let frequencies = BearingFrequencies { bpfo: 97.0, bpfi: 150.0, bsf: 61.0, ftf: 4.0 };
        let features = SpectrumFeatures::extract(&spectrum, 50.0, Some(frequencies)).unwrap();

        assert_relative_eq!(features.fundamental_amplitude, 1.0, epsilon = 0.05);
        let bearing = features.bearing.unwrap();
        assert!(bearing.bpfo > 0.05, "bpfo amplitude {}", bearing.bpfo);
        assert!(bearing.bpfo < 0.15);
        // 0.01 noise floor with gain 5: the tone clears the gate
        assert!(bearing.bpfo > features.noise_floor * 5.0);
    }

    #[test]
    fn harmonics_raise_thd() {
        let clean = sine_mix(4096, 1024.0, &[(50.0, 1.0)]);
        let distorted = sine_mix(4096, 1024.0, &[(50.0, 1.0), (100.0, 0.2), (150.0, 0.1)]);
        let clean_features =
            SpectrumFeatures::extract(&Spectrum::compute(&clean, 1024.0), 50.0, None).unwrap();
        let distorted_features =
            SpectrumFeatures::extract(&Spectrum::compute(&distorted, 1024.0), 50.0, None).unwrap();

        assert!(clean_features.thd_percent < 2.0);
        assert_relative_eq!(distorted_features.thd_percent, 22.4, epsilon = 2.0);
    }

    #[test]
    fn band_energies_split_at_the_boundaries() {
        let samples = sine_mix(8192, 4000.0, &[(50.0, 1.0), (500.0, 1.0), (1500.0, 1.0)]);
        let spectrum = Spectrum::compute(&samples, 4000.0);
        let features = SpectrumFeatures::extract(&spectrum, 50.0, None).unwrap();
        assert!(features.low_band_energy > 0.0);
        assert!(features.mid_band_energy > 0.0);
        assert!(features.high_band_energy > 0.0);
        // Each band is dominated by its own tone
        assert!(features.low_band_energy > features.mid_band_energy * 0.1);
    }
}
