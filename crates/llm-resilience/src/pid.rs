//! PID controller driving the adaptive-concurrency governor's capacity adjustments.
//!
//! This has no direct analogue in the teacher crate; it is built from the control-loop formula
//! named by the specification (proportional, integral, and derivative terms over a normalized
//! error signal), shaped after the ring-buffer-fed adjustment loop `ggen-mcp`'s
//! `AdaptiveConcurrencyLimiter` demonstrates for a similar feedback-controlled resize.

/// Tunable gains and clamps for a [`PidController`].
#[derive(Debug, Clone, Copy)]
pub struct PidConfig {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
    /// Anti-windup clamp applied to the accumulated integral term.
    pub integral_min: f64,
    /// Anti-windup clamp applied to the accumulated integral term.
    pub integral_max: f64,
    /// Clamp applied to the controller's output.
    pub output_min: f64,
    /// Clamp applied to the controller's output.
    pub output_max: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
            integral_min: -10.0,
            integral_max: 10.0,
            output_min: -1.0,
            output_max: 1.0,
        }
    }
}

/// A PID controller tracking accumulated error and last-seen error across calls to [`Self::update`].
///
/// The controller computes a normalized error `e = (measurement - setpoint) / setpoint` so gains
/// are comparable across providers whose absolute latency or error-rate scales differ widely.
/// The first call after construction or [`Self::reset`] has no prior error to derive from, so it
/// returns `0.0` and only captures state for the next call.
#[derive(Debug)]
pub struct PidController {
    config: PidConfig,
    integral_error: f64,
    last_error: f64,
    initialized: bool,
}

impl PidController {
    /// Build a controller with the given gains and clamps.
    #[must_use]
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            integral_error: 0.0,
            last_error: 0.0,
            initialized: false,
        }
    }

    /// Compute the next control output from `setpoint` (target) and `measurement` (observed
    /// value), given the elapsed time `dt` since the previous update.
    ///
    /// Returns `0.0` on the first call after construction or [`Self::reset`].
    pub fn update(&mut self, setpoint: f64, measurement: f64, dt: std::time::Duration) -> f64 {
        if setpoint == 0.0 {
            return 0.0;
        }
        let error = (measurement - setpoint) / setpoint;

        if !self.initialized {
            self.last_error = error;
            self.initialized = true;
            return 0.0;
        }

        let dt_secs = dt.as_secs_f64().max(f64::EPSILON);

        self.integral_error = (self.integral_error + error * dt_secs)
            .clamp(self.config.integral_min, self.config.integral_max);
        let derivative = (error - self.last_error) / dt_secs;

        let output = self.config.kp * error
            + self.config.ki * self.integral_error
            + self.config.kd * derivative;

        self.last_error = error;
        output.clamp(self.config.output_min, self.config.output_max)
    }

    /// Clear accumulated state. The next call to [`Self::update`] behaves as if freshly
    /// constructed.
    pub fn reset(&mut self) {
        self.integral_error = 0.0;
        self.last_error = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_call_returns_zero_and_captures_state() {
        let mut pid = PidController::new(PidConfig::default());
        let out = pid.update(100.0, 150.0, Duration::from_secs(1));
        assert_eq!(out, 0.0);
    }

    #[test]
    fn positive_error_yields_positive_output_when_measurement_above_setpoint() {
        let mut pid = PidController::new(PidConfig::default());
        pid.update(100.0, 150.0, Duration::from_secs(1));
        let out = pid.update(100.0, 150.0, Duration::from_secs(1));
        assert!(out > 0.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut pid = PidController::new(PidConfig {
            kp: 100.0,
            ..PidConfig::default()
        });
        pid.update(1.0, 1000.0, Duration::from_secs(1));
        let out = pid.update(1.0, 1000.0, Duration::from_secs(1));
        assert!(out <= pid.config.output_max);
        assert!(out >= pid.config.output_min);
    }

    #[test]
    fn reset_clears_state_so_next_call_returns_zero() {
        let mut pid = PidController::new(PidConfig::default());
        pid.update(100.0, 150.0, Duration::from_secs(1));
        pid.update(100.0, 150.0, Duration::from_secs(1));
        pid.reset();
        let out = pid.update(100.0, 150.0, Duration::from_secs(1));
        assert_eq!(out, 0.0);
    }

    #[test]
    fn zero_setpoint_does_not_divide_by_zero() {
        let mut pid = PidController::new(PidConfig::default());
        let out = pid.update(0.0, 50.0, Duration::from_secs(1));
        assert_eq!(out, 0.0);
    }
}
