//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use bodyscale_core::{BiometricProfile, ScaleConfig, Sex};
use clap::Parser;

/// Stream body-composition measurements from a BLE scale as JSON lines.
#[derive(Debug, Clone, Parser)]
#[command(name = "bodyscale-monitor", version, about)]
pub struct Cli {
    /// Configuration file. Created with defaults when missing.
    #[arg(long, short, env = "BODYSCALE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit synthetic measurements instead of connecting to a scale.
    #[arg(long, env = "BODYSCALE_SIMULATE")]
    pub simulate: bool,

    /// Number of simulated measurements.
    #[arg(long, default_value_t = 1, requires = "simulate")]
    pub count: u32,

    /// Pause between simulated measurements, in milliseconds.
    #[arg(long, default_value_t = 1000, requires = "simulate")]
    pub interval_ms: u64,

    /// Seed for reproducible simulated output.
    #[arg(long, requires = "simulate")]
    pub seed: Option<u64>,

    /// Biological sex (`male` or `female`), overriding the config profile.
    #[arg(long, value_parser = parse_sex)]
    pub sex: Option<Sex>,

    /// Age in years, overriding the config profile.
    #[arg(long)]
    pub age: Option<u32>,

    /// Height in centimetres, overriding the config profile.
    #[arg(long)]
    pub height: Option<f64>,
}

impl Cli {
    /// Pause between simulated measurements.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Merge command-line overrides over the `[profile]` section.
    ///
    /// # Errors
    ///
    /// Fails when a field is given nowhere or the result is out of range.
    pub fn profile(&self, config: &ScaleConfig) -> anyhow::Result<BiometricProfile> {
        let base = config.profile;
        let sex = self.sex.or(base.map(|p| p.sex));
        let age = self.age.or(base.map(|p| p.age_years));
        let height = self.height.or(base.map(|p| p.height_cm));

        let (Some(sex), Some(age), Some(height)) = (sex, age, height) else {
            anyhow::bail!(
                "no biometric profile: add a [profile] section to the config file \
                 or pass --sex, --age and --height"
            );
        };
        Ok(BiometricProfile::new(sex, age, height)?)
    }
}

fn parse_sex(value: &str) -> Result<Sex, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "male" | "m" => Ok(Sex::Male),
        "female" | "f" => Ok(Sex::Female),
        other => Err(format!("expected 'male' or 'female', got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use bodyscale_core::ProfileConfig;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bodyscale-monitor").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_simulation_flags() {
        let cli = parse(&["--simulate", "--count", "3", "--interval-ms", "0", "--seed", "9"]);
        assert!(cli.simulate);
        assert_eq!(cli.count, 3);
        assert_eq!(cli.interval(), Duration::ZERO);
        assert_eq!(cli.seed, Some(9));
    }

    #[test]
    fn test_count_requires_simulate() {
        let result = Cli::try_parse_from(["bodyscale-monitor", "--count", "3"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_profile_from_flags() {
        let cli = parse(&["--sex", "F", "--age", "41", "--height", "162.5"]);
        let profile = cli.profile(&ScaleConfig::default()).unwrap();
        assert_eq!(profile.sex(), Sex::Female);
        assert_eq!(profile.age_years(), 41);
    }

    #[test]
    fn test_flags_override_config_profile() {
        let config = ScaleConfig {
            profile: Some(ProfileConfig {
                sex: Sex::Male,
                age_years: 30,
                height_cm: 175.0,
            }),
            ..ScaleConfig::default()
        };
        let cli = parse(&["--age", "50"]);
        let profile = cli.profile(&config).unwrap();
        assert_eq!(profile.sex(), Sex::Male);
        assert_eq!(profile.age_years(), 50);
    }

    #[test]
    fn test_missing_profile_is_an_error() {
        let cli = parse(&["--sex", "male"]);
        let err = cli.profile(&ScaleConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no biometric profile"));
    }

    #[test]
    fn test_bad_sex_is_rejected() {
        assert!(Cli::try_parse_from(["bodyscale-monitor", "--sex", "x"]).is_err());
    }
}
