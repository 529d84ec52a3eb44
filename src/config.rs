use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    clock::DEFAULT_GROMCLK_DIVIDER, datamux::DEFAULT_WAIT_STATES, error::ConfigError,
    peribox::PeriboxVariant,
};

/// TI-99/4A console configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// 16-bit 32 KiB expansion inside the console
    pub use32k: bool,
    /// Wait states of a narrow datamux cycle
    pub wait_states: u8,
    /// CPU cycles per GROMCLK period
    pub gromclk_divider: u32,
    /// Expansion box on the I/O port; `None` for a bare console
    pub peribox: Option<PeriboxVariant>,
    pub genmod: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            use32k: false,
            wait_states: DEFAULT_WAIT_STATES,
            gromclk_divider: DEFAULT_GROMCLK_DIVIDER,
            peribox: Some(PeriboxVariant::Standard),
            genmod: false,
        }
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid machine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_states == 0 {
            return Err(ConfigError::InvalidWaitStates);
        }
        if self.gromclk_divider < 2 {
            return Err(ConfigError::InvalidClockDivider);
        }
        Ok(())
    }
}

/// TI-99/8 mainboard configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mainboard8Config {
    /// Installed DRAM in bytes
    pub dram_size: usize,
    /// Start in the TI-99/4A compatible memory map
    pub crus: bool,
    /// Enable GROM libraries 1 to 3
    pub crugl: bool,
    /// Expansion box on the I/O port
    pub peribox: bool,
}

impl Default for Mainboard8Config {
    fn default() -> Self {
        Self {
            dram_size: 0x10000,
            crus: true,
            crugl: true,
            peribox: true,
        }
    }
}

impl Mainboard8Config {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("Invalid TI-99/8 configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dram_size.is_power_of_two() || !(0x10000..=0x100_0000).contains(&self.dram_size) {
            return Err(ConfigError::InvalidRamSize(self.dram_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MachineConfig::from_json(r#"{ "use32k": true }"#).expect("valid json");
        assert!(config.use32k);
        assert_eq!(config.wait_states, DEFAULT_WAIT_STATES);
        assert_eq!(config.peribox, Some(PeriboxVariant::Standard));

        let config = MachineConfig::from_json(r#"{ "peribox": null }"#).expect("valid json");
        assert_eq!(config.peribox, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(MachineConfig::from_json(r#"{ "wait_states": 0 }"#).is_err());
        assert!(MachineConfig::from_json("not json").is_err());
        assert!(Mainboard8Config::from_json(r#"{ "dram_size": 1000 }"#).is_err());
        assert_eq!(
            Mainboard8Config::from_json(r#"{ "crus": false }"#)
                .expect("valid json")
                .dram_size,
            0x10000
        );
    }
}
