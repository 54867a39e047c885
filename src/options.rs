//! Device option block controlling the numerical Jacobian test.

use std::collections::HashMap;

use crate::error::{DaeError, Result};

/// Default relative tolerance of the Jacobian test.
pub const DEFAULT_REL_TOL: f64 = 0.01;
/// Default absolute tolerance of the Jacobian test.
pub const DEFAULT_ABS_TOL: f64 = 1e-8;
/// Default square root of the machine precision used for perturbations.
pub const DEFAULT_SQRT_ETA: f64 = 1e-8;

/// Configuration of the numerical Jacobian test.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// Run the test after every matrix load
    pub test_jacobian: bool,
    /// First time step (inclusive) that is tested
    pub start_step: usize,
    /// Last time step (inclusive) that is tested
    pub stop_step: usize,
    /// Report failures as warnings instead of aborting
    pub warn_on_failure: bool,
    /// Restrict the test to one instance (case-insensitive)
    pub device_name: Option<String>,
    /// Relative tolerance
    pub rel_tol: f64,
    /// Absolute tolerance
    pub abs_tol: f64,
    /// Perturbation scale, `dx = sqrt_eta * (1 + |x|)`
    pub sqrt_eta: f64,
    /// Compare the analytic rows and columns of merged variables
    pub merge_check: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            test_jacobian: false,
            start_step: 0,
            stop_step: usize::MAX,
            warn_on_failure: false,
            device_name: None,
            rel_tol: DEFAULT_REL_TOL,
            abs_tol: DEFAULT_ABS_TOL,
            sqrt_eta: DEFAULT_SQRT_ETA,
            merge_check: false,
        }
    }
}

impl DeviceOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the Jacobian test.
    pub fn with_test_jacobian(mut self, enabled: bool) -> Self {
        self.test_jacobian = enabled;
        self
    }

    /// Restrict the test to time steps `start..=stop`.
    pub fn with_step_range(mut self, start: usize, stop: usize) -> Self {
        self.start_step = start;
        self.stop_step = stop;
        self
    }

    /// Demote failures to warnings.
    pub fn with_warn_on_failure(mut self, warn: bool) -> Self {
        self.warn_on_failure = warn;
        self
    }

    /// Test only the named instance.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Set the comparison tolerances.
    ///
    /// An element passes when `|analytic - numeric| <= rel_tol * |numeric| + abs_tol`.
    pub fn with_tolerances(mut self, rel_tol: f64, abs_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self.abs_tol = abs_tol;
        self
    }

    /// Set the perturbation scale.
    pub fn with_sqrt_eta(mut self, sqrt_eta: f64) -> Self {
        self.sqrt_eta = sqrt_eta;
        self
    }

    /// Enable the merged-variable consistency check.
    pub fn with_merge_check(mut self, enabled: bool) -> Self {
        self.merge_check = enabled;
        self
    }

    /// Build options from an option block of `KEY = value` pairs.
    ///
    /// Keys are matched case-insensitively. Flags are true when nonzero.
    pub fn from_params(params: &HashMap<String, f64>, device_name: Option<&str>) -> Result<Self> {
        let mut opts = Self::default();
        for (key, &value) in params {
            match key.to_ascii_uppercase().as_str() {
                "TESTJAC" => opts.test_jacobian = value != 0.0,
                "TESTJACSTARTSTEP" => opts.start_step = step_value(key, value)?,
                "TESTJACSTOPSTEP" => opts.stop_step = step_value(key, value)?,
                "TESTJACWARN" => opts.warn_on_failure = value != 0.0,
                "TJRELTOL" => opts.rel_tol = value,
                "TJABSTOL" => opts.abs_tol = value,
                "TJSQRTETA" => opts.sqrt_eta = value,
                "TESTJACMERGE" => opts.merge_check = value != 0.0,
                _ => return Err(DaeError::invalid_option(key, "unknown device option")),
            }
        }
        opts.device_name = device_name.map(str::to_string);
        opts.validate()?;
        Ok(opts)
    }

    /// Check tolerances and the step window.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("TJRELTOL", self.rel_tol),
            ("TJSQRTETA", self.sqrt_eta),
        ];
        for (key, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DaeError::invalid_option(key, format!("must be positive, got {value}")));
            }
        }
        if !(self.abs_tol.is_finite() && self.abs_tol >= 0.0) {
            return Err(DaeError::invalid_option(
                "TJABSTOL",
                format!("must be non-negative, got {}", self.abs_tol),
            ));
        }
        if self.start_step > self.stop_step {
            return Err(DaeError::invalid_option(
                "TESTJACSTARTSTEP",
                format!("start step {} after stop step {}", self.start_step, self.stop_step),
            ));
        }
        Ok(())
    }

    /// Whether `step_number` lies in the tested window.
    pub fn in_step_window(&self, step_number: usize) -> bool {
        (self.start_step..=self.stop_step).contains(&step_number)
    }

    /// Whether the instance called `name` is selected for testing.
    pub fn selects(&self, name: &str) -> bool {
        self.device_name
            .as_deref()
            .map_or(true, |wanted| wanted.eq_ignore_ascii_case(name))
    }
}

fn step_value(key: &str, value: f64) -> Result<usize> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(DaeError::invalid_option(
            key,
            format!("expected a non-negative step number, got {value}"),
        ))
    }
}
