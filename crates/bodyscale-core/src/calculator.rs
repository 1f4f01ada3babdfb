//! Bioimpedance body-composition model.
//!
//! Converts weight and impedance into derived metrics using a sex-branching
//! regression. The calculator holds nothing but the caller's
//! [`BiometricProfile`]; every method is a pure function of its arguments.
//!
//! Clamping happens only on the values returned to callers. Intermediate
//! terms (lean mass in particular) use the unclamped regression output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Biological sex, selecting the regression coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    /// Male coefficients.
    Male,
    /// Female coefficients.
    Female,
}

/// Inputs the model needs besides weight and impedance.
///
/// Supplied once per session and never mutated afterwards. Deserialising
/// applies the same checks as [`BiometricProfile::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileFields")]
pub struct BiometricProfile {
    sex: Sex,
    age_years: u32,
    height_cm: f64,
}

#[derive(Deserialize)]
struct ProfileFields {
    sex: Sex,
    age_years: u32,
    height_cm: f64,
}

impl TryFrom<ProfileFields> for BiometricProfile {
    type Error = CalculatorError;

    fn try_from(fields: ProfileFields) -> CalculatorResult<Self> {
        Self::new(fields.sex, fields.age_years, fields.height_cm)
    }
}

impl BiometricProfile {
    /// Create a profile.
    ///
    /// # Errors
    ///
    /// Returns [`CalculatorError::InvalidInput`] when the age is zero or the
    /// height is not a positive finite number.
    pub fn new(sex: Sex, age_years: u32, height_cm: f64) -> CalculatorResult<Self> {
        if age_years == 0 {
            return Err(CalculatorError::InvalidInput(
                "age must be greater than zero".into(),
            ));
        }
        if !height_cm.is_finite() || height_cm <= 0.0 {
            return Err(CalculatorError::InvalidInput(format!(
                "height must be a positive number of centimetres (got {height_cm})"
            )));
        }
        Ok(Self {
            sex,
            age_years,
            height_cm,
        })
    }

    /// Biological sex.
    #[must_use]
    pub const fn sex(&self) -> Sex {
        self.sex
    }

    /// Age in whole years.
    #[must_use]
    pub const fn age_years(&self) -> u32 {
        self.age_years
    }

    /// Height in centimetres.
    #[must_use]
    pub const fn height_cm(&self) -> f64 {
        self.height_cm
    }
}

/// Failures of the body-composition model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculatorError {
    /// A computation was attempted before a profile was supplied.
    #[error("calculator used before a biometric profile was supplied")]
    Uninitialized,

    /// Weight, impedance or profile values outside the model's domain.
    #[error("invalid calculator input: {0}")]
    InvalidInput(String),
}

/// Result type for calculator operations.
pub type CalculatorResult<T> = std::result::Result<T, CalculatorError>;

/// Every metric derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyComposition {
    /// Body fat percent, clamped to `[0, 100]`.
    pub body_fat_percent: f64,
    /// Body water percent, clamped to `[0, 100]`.
    pub body_water_percent: f64,
    /// Muscle mass in kilograms.
    pub muscle_mass_kg: f64,
    /// Bone mass in kilograms.
    pub bone_mass_kg: f64,
    /// Basal metabolism in kcal/day, rounded.
    pub basal_metabolism_kcal: i32,
    /// Visceral fat index, clamped to `[0, 30]`.
    pub visceral_fat_index: f64,
    /// Metabolic age in years.
    pub metabolic_age_years: u32,
}

/// Body-composition calculator bound to one profile.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BioimpedanceCalculator {
    profile: Option<BiometricProfile>,
}

impl BioimpedanceCalculator {
    /// Create a calculator for `profile`.
    #[must_use]
    pub const fn new(profile: BiometricProfile) -> Self {
        Self {
            profile: Some(profile),
        }
    }

    /// Create a calculator with no profile. Every computation fails with
    /// [`CalculatorError::Uninitialized`] until one is supplied.
    #[must_use]
    pub const fn uninitialized() -> Self {
        Self { profile: None }
    }

    /// The profile in use, if any.
    #[must_use]
    pub const fn profile(&self) -> Option<&BiometricProfile> {
        self.profile.as_ref()
    }

    /// `height² / impedance`.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with a non-positive impedance.
    pub fn impedance_index(&self, impedance_ohms: f64) -> CalculatorResult<f64> {
        let profile = self.require_profile()?;
        check_positive("impedance", impedance_ohms)?;
        Ok(profile.height_cm * profile.height_cm / impedance_ohms)
    }

    /// Body fat percent, clamped to `[0, 100]`.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with a non-positive impedance.
    pub fn body_fat_percent(&self, impedance_ohms: f64) -> CalculatorResult<f64> {
        Ok(self.raw_body_fat(impedance_ohms)?.clamp(0.0, 100.0))
    }

    /// Fat-free mass in kilograms, from the unclamped fat regression.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with non-positive inputs.
    pub fn lean_mass_kg(&self, weight_kg: f64, impedance_ohms: f64) -> CalculatorResult<f64> {
        check_positive("weight", weight_kg)?;
        let fat = self.raw_body_fat(impedance_ohms)?;
        Ok(weight_kg * (1.0 - fat / 100.0))
    }

    /// Body water percent, clamped to `[0, 100]`.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with non-positive inputs.
    pub fn body_water_percent(&self, weight_kg: f64, impedance_ohms: f64) -> CalculatorResult<f64> {
        let lean = self.lean_mass_kg(weight_kg, impedance_ohms)?;
        let water = (lean * 0.732 + 8.987) / weight_kg * 100.0;
        Ok(water.clamp(0.0, 100.0))
    }

    /// Muscle mass in kilograms.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with non-positive inputs.
    pub fn muscle_mass_kg(&self, weight_kg: f64, impedance_ohms: f64) -> CalculatorResult<f64> {
        Ok(self.lean_mass_kg(weight_kg, impedance_ohms)? * 0.5)
    }

    /// Bone mass in kilograms.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with non-positive inputs.
    pub fn bone_mass_kg(&self, weight_kg: f64, impedance_ohms: f64) -> CalculatorResult<f64> {
        Ok(self.lean_mass_kg(weight_kg, impedance_ohms)? * 0.14)
    }

    /// Basal metabolic rate in kcal/day (Harris-Benedict, revised).
    ///
    /// # Errors
    ///
    /// Fails without a profile or with a non-positive weight.
    pub fn basal_metabolism_kcal(&self, weight_kg: f64) -> CalculatorResult<f64> {
        let profile = self.require_profile()?;
        check_positive("weight", weight_kg)?;
        let age = f64::from(profile.age_years);
        let bmr = match profile.sex {
            Sex::Male => 88.362 + 13.397 * weight_kg + 4.799 * profile.height_cm - 5.677 * age,
            Sex::Female => 447.593 + 9.247 * weight_kg + 3.098 * profile.height_cm - 4.330 * age,
        };
        Ok(bmr)
    }

    /// Visceral fat index, clamped to `[0, 30]`.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with a non-positive impedance.
    pub fn visceral_fat_index(&self, impedance_ohms: f64) -> CalculatorResult<f64> {
        let profile = self.require_profile()?;
        let fat = self.raw_body_fat(impedance_ohms)?;
        let age = f64::from(profile.age_years);
        let index = match profile.sex {
            Sex::Male => fat * 0.15 + age * 0.1,
            Sex::Female => fat * 0.12 + age * 0.08,
        };
        Ok(index.clamp(0.0, 30.0))
    }

    /// Metabolic age in years, bracketed on basal metabolism.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with a non-positive weight.
    pub fn metabolic_age_years(&self, weight_kg: f64) -> CalculatorResult<u32> {
        let profile = self.require_profile()?;
        let bmr = self.basal_metabolism_kcal(weight_kg)?;
        let (high, mid) = match profile.sex {
            Sex::Male => (1800.0, 1600.0),
            Sex::Female => (1500.0, 1300.0),
        };
        let age = profile.age_years;
        Ok(if bmr > high {
            age.saturating_sub(5)
        } else if bmr > mid {
            age
        } else {
            age.saturating_add(5)
        })
    }

    /// Compute every metric for one reading.
    ///
    /// # Errors
    ///
    /// Fails without a profile or with non-positive inputs.
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute(&self, weight_kg: f64, impedance_ohms: f64) -> CalculatorResult<BodyComposition> {
        Ok(BodyComposition {
            body_fat_percent: self.body_fat_percent(impedance_ohms)?,
            body_water_percent: self.body_water_percent(weight_kg, impedance_ohms)?,
            muscle_mass_kg: self.muscle_mass_kg(weight_kg, impedance_ohms)?,
            bone_mass_kg: self.bone_mass_kg(weight_kg, impedance_ohms)?,
            basal_metabolism_kcal: self.basal_metabolism_kcal(weight_kg)?.round() as i32,
            visceral_fat_index: self.visceral_fat_index(impedance_ohms)?,
            metabolic_age_years: self.metabolic_age_years(weight_kg)?,
        })
    }

    fn raw_body_fat(&self, impedance_ohms: f64) -> CalculatorResult<f64> {
        let profile = self.require_profile()?;
        let index = self.impedance_index(impedance_ohms)?;
        let age = f64::from(profile.age_years);
        let fat = match profile.sex {
            Sex::Male => 0.29288 * index + 0.0005 * index * index + 0.15845 * age - 5.76377,
            Sex::Female => 0.41563 * index + 0.0005 * index * index + 0.26765 * age - 9.52838,
        };
        Ok(fat)
    }

    fn require_profile(&self) -> CalculatorResult<&BiometricProfile> {
        self.profile.as_ref().ok_or(CalculatorError::Uninitialized)
    }
}

fn check_positive(name: &str, value: f64) -> CalculatorResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CalculatorError::InvalidInput(format!(
            "{name} must be a positive finite number (got {value})"
        )))
    }
}
