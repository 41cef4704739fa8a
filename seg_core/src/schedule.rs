//! Scalar schedules driving the mean-teacher training loop.

/// Default exponent of the polynomial learning-rate decay.
pub const DEFAULT_LR_POWER: f64 = 0.9;

/// Default upper bound of the teacher EMA ratio.
pub const DEFAULT_EMA_CEILING: f64 = 0.996;

/// Polynomial decay: `base * (1 - iters / total)^power`.
///
/// Returns 0 once `iters >= total`, and `base` when `total == 0`.
pub fn poly_lr(base_lr: f64, iters: usize, total_iters: usize, power: f64) -> f64 {
    if total_iters == 0 {
        return base_lr;
    }
    if iters >= total_iters {
        return 0.0;
    }
    let progress = iters as f64 / total_iters as f64;
    base_lr * (1.0 - progress).powf(power)
}

/// Teacher blend ratio: `min(1 - 1 / (iters + 1), ceiling)`.
///
/// Starts at 0 so the teacher tracks the student closely, then saturates.
pub fn ema_ratio(iters: usize, ceiling: f64) -> f64 {
    (1.0 - 1.0 / (iters as f64 + 1.0)).min(ceiling)
}

/// `teacher * ratio + student * (1 - ratio)`.
#[inline]
pub fn ema_blend(teacher: f32, student: f32, ratio: f32) -> f32 {
    teacher * ratio + student * (1.0 - ratio)
}

/// Exponential ramp-up `exp(-5 (1 - t/T)^2)`, clipped to `[0, T]`.
pub fn sigmoid_rampup(current: f64, rampup_length: f64) -> f64 {
    if rampup_length == 0.0 {
        return 1.0;
    }
    let current = current.clamp(0.0, rampup_length);
    let phase = 1.0 - current / rampup_length;
    (-5.0 * phase * phase).exp()
}

/// Consistency weight after ramp-up.
pub fn consistency_weight(max_weight: f64, current: f64, rampup_length: f64) -> f64 {
    max_weight * sigmoid_rampup(current, rampup_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_lr_endpoints() {
        assert_eq!(poly_lr(0.01, 0, 1000, DEFAULT_LR_POWER), 0.01);
        assert_eq!(poly_lr(0.01, 1000, 1000, DEFAULT_LR_POWER), 0.0);
        assert_eq!(poly_lr(0.01, 2000, 1000, DEFAULT_LR_POWER), 0.0);
    }

    #[test]
    fn test_poly_lr_midpoint() {
        let lr = poly_lr(1.0, 500, 1000, DEFAULT_LR_POWER);
        assert!((lr - 0.5f64.powf(0.9)).abs() < 1e-12);
    }

    #[test]
    fn test_ema_ratio_schedule() {
        assert_eq!(ema_ratio(0, DEFAULT_EMA_CEILING), 0.0);
        assert!((ema_ratio(1, DEFAULT_EMA_CEILING) - 0.5).abs() < 1e-12);
        assert_eq!(ema_ratio(10_000, DEFAULT_EMA_CEILING), DEFAULT_EMA_CEILING);
    }

    #[test]
    fn test_ema_blend() {
        assert_eq!(ema_blend(0.0, 2.0, 0.5), 1.0);
        assert!((ema_blend(3.0, 3.0, 0.996) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_rampup() {
        assert_eq!(sigmoid_rampup(5.0, 0.0), 1.0);
        assert!((sigmoid_rampup(0.0, 200.0) - (-5.0f64).exp()).abs() < 1e-12);
        assert_eq!(sigmoid_rampup(200.0, 200.0), 1.0);
        assert_eq!(sigmoid_rampup(500.0, 200.0), 1.0);
        assert!((consistency_weight(0.1, 200.0, 200.0) - 0.1).abs() < 1e-12);
    }
}
