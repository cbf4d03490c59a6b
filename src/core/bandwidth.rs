use crate::error::{Result, UnmixError};

/// Number of STFT bins whose center frequency does not exceed `bandwidth`.
///
/// Bin `k` sits at `k * rate / n_fft` Hz, so the count is
/// `floor(bandwidth * n_fft / rate) + 1`, clamped to `[1, n_fft/2 + 1]`.
/// A bandwidth at or above Nyquist keeps every bin.
pub fn bandwidth_to_max_bin(rate: f64, n_fft: usize, bandwidth: f64) -> Result<usize> {
    if n_fft == 0 {
        return Err(UnmixError::InvalidConfig("n_fft must be positive".into()));
    }
    if !(rate.is_finite() && rate > 0.0) {
        return Err(UnmixError::InvalidConfig(format!(
            "sample rate must be positive, got {rate}"
        )));
    }
    if !(bandwidth.is_finite() && bandwidth > 0.0) {
        return Err(UnmixError::InvalidConfig(format!(
            "bandwidth must be positive, got {bandwidth}"
        )));
    }

    let nb_bins = n_fft / 2 + 1;
    if bandwidth >= rate / 2.0 {
        return Ok(nb_bins);
    }

    let below = (bandwidth * n_fft as f64 / rate).floor() as usize;
    Ok((below + 1).clamp(1, nb_bins))
}

#[cfg(test)]
mod tests {
    use super::bandwidth_to_max_bin;

    #[test]
    fn tiny_bandwidth_keeps_dc() {
        assert_eq!(bandwidth_to_max_bin(44100.0, 4096, 1.0).unwrap(), 1);
    }

    #[test]
    fn exact_bin_boundary_is_inclusive() {
        // 8000 Hz at 16k/1024 is exactly bin 512 (the Nyquist bin).
        assert_eq!(bandwidth_to_max_bin(16000.0, 1024, 7999.0).unwrap(), 512);
        // 31.25 Hz spacing: 62.5 Hz lands on bin 2.
        assert_eq!(bandwidth_to_max_bin(16000.0, 512, 62.5).unwrap(), 3);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        assert!(bandwidth_to_max_bin(44100.0, 0, 16000.0).is_err());
        assert!(bandwidth_to_max_bin(0.0, 4096, 16000.0).is_err());
        assert!(bandwidth_to_max_bin(-1.0, 4096, 16000.0).is_err());
        assert!(bandwidth_to_max_bin(44100.0, 4096, 0.0).is_err());
        assert!(bandwidth_to_max_bin(44100.0, 4096, f64::NAN).is_err());
    }
}
