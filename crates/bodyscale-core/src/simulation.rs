//! Synthetic readings for hosts without a reachable scale.
//!
//! The simulator builds a wire-accurate frame, decodes it with the same
//! parser a live session uses and runs it through the same calculator, so
//! simulated output obeys every range a device reading does. Every result is
//! labelled [`MeasurementSource::Simulated`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::calculator::{BioimpedanceCalculator, BiometricProfile};
use crate::error::Result;
use crate::frame::{self, MIN_FRAME_LEN};
use crate::types::{DecodedReading, MeasurementSource, ScaleMeasurement};

/// Centre of the simulated weight distribution.
pub const NOMINAL_WEIGHT_KG: f64 = 70.5;

/// Half-width of the simulated weight distribution.
pub const WEIGHT_SPREAD_KG: f64 = 1.0;

/// Centre of the simulated impedance distribution.
pub const NOMINAL_IMPEDANCE_OHMS: f64 = 500.0;

/// Half-width of the simulated impedance distribution.
pub const IMPEDANCE_SPREAD_OHMS: f64 = 50.0;

/// Generates plausible measurements for one profile.
#[derive(Debug, Clone)]
pub struct MeasurementSimulator<R = StdRng> {
    calculator: BioimpedanceCalculator,
    rng: R,
}

impl MeasurementSimulator<StdRng> {
    /// Simulator seeded from OS entropy.
    #[must_use]
    pub fn new(profile: BiometricProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    /// Simulator with a fixed seed, for reproducible runs.
    #[must_use]
    pub fn seeded(profile: BiometricProfile, seed: u64) -> Self {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> MeasurementSimulator<R> {
    /// Simulator drawing from `rng`.
    pub const fn with_rng(profile: BiometricProfile, rng: R) -> Self {
        Self {
            calculator: BioimpedanceCalculator::new(profile),
            rng,
        }
    }

    /// Draw one reading: weight in `70.5 ± 1.0` kg, impedance in `500 ± 50` Ω,
    /// with the stabilised and impedance flags set.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn simulate_reading(&mut self) -> DecodedReading {
        let weight_kg = NOMINAL_WEIGHT_KG
            + self.rng.gen_range(-WEIGHT_SPREAD_KG..=WEIGHT_SPREAD_KG);
        let impedance_ohms = NOMINAL_IMPEDANCE_OHMS
            + self.rng.gen_range(-IMPEDANCE_SPREAD_OHMS..=IMPEDANCE_SPREAD_OHMS);

        DecodedReading {
            control_byte: DecodedReading::FLAG_STABILIZED | DecodedReading::FLAG_IMPEDANCE,
            weight_raw: (weight_kg * 10.0).round() as u16,
            impedance_raw: impedance_ohms.round() as u16,
        }
    }

    /// Draw one reading and encode it as a notification payload.
    pub fn simulate_frame(&mut self) -> [u8; MIN_FRAME_LEN] {
        frame::encode(&self.simulate_reading())
    }

    /// Produce one labelled measurement.
    ///
    /// # Errors
    ///
    /// Propagates frame or calculator errors; with the built-in ranges
    /// neither occurs.
    pub fn simulate_measurement(&mut self) -> Result<ScaleMeasurement> {
        let payload = self.simulate_frame();
        let reading = frame::parse(&payload)?;
        let composition = self
            .calculator
            .compute(reading.weight_kg(), reading.impedance_ohms())?;
        debug!(
            weight_raw = reading.weight_raw,
            impedance_raw = reading.impedance_raw,
            "simulated reading"
        );
        Ok(ScaleMeasurement::new(
            &reading,
            &composition,
            MeasurementSource::Simulated,
        ))
    }
}
