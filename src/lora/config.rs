//! Gateway configuration.
//!
//! This module provides the region selection and the tunable constants of
//! the radio core. Every timing constant defaults to the value the gateway
//! has been field-tuned with; they are exposed as plain fields so a
//! deployment can trade missed-packet probability against hop throughput
//! without touching the state machine.

use super::plan::SpreadingFactor;

/// Frequency band region.
///
/// Selects the channel plan the gateway scans and hops over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// EU 863-870 MHz band (9 channels, SF7-SF12)
    Eu868,
    /// EU 433 MHz band (9 channels, SF7-SF12)
    Eu433,
    /// US 902-928 MHz band (9 channels, SF7-SF10 up, BW500 down)
    Us915,
    /// Australia 915-928 MHz band (9 channels)
    Au915,
    /// China 470-510 MHz band (8 channels, SF7-SF12)
    Cn470,
}

impl Default for Region {
    fn default() -> Self {
        #[cfg(feature = "region-eu433")]
        return Self::Eu433;
        #[cfg(feature = "region-us915")]
        return Self::Us915;
        #[cfg(feature = "region-au915")]
        return Self::Au915;
        #[cfg(feature = "region-cn470")]
        return Self::Cn470;
        #[cfg(not(any(
            feature = "region-eu433",
            feature = "region-us915",
            feature = "region-au915",
            feature = "region-cn470"
        )))]
        Self::Eu868
    }
}

/// Configuration for the radio core.
///
/// `Default` matches the single-channel gateway's stock build: CAD on,
/// hopping off, channel 0, SF7, 14 dBm.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Frequency band region (selects the channel plan).
    pub region: Region,

    /// Use channel activity detection instead of a continuous receiver.
    /// Allows catching traffic at any SF on the current channel.
    pub cad: bool,

    /// Cycle through the channel plan on scan timeouts. Requires `cad`
    /// and a plan of at least 3 channels.
    pub hop: bool,

    /// Index into the channel plan to start on. Stays fixed unless
    /// hopping is enabled.
    pub initial_channel: usize,

    /// Spreading factor the scanner starts at.
    pub initial_sf: SpreadingFactor,

    /// Transmit power in dBm. Clamped to the chip's 2..=15 range when
    /// programmed.
    pub tx_power: u8,

    /// Discard received packets whose payload CRC failed.
    pub crc_check: bool,

    /// Raw RSSI register value a CAD-done must exceed for the scanner to
    /// promote to SF confirmation.
    pub cad_rssi_threshold: u8,

    /// Subtracted from `cad_rssi_threshold` while hopping, compensating
    /// for the shorter per-channel dwell time.
    pub hop_rssi_penalty: u8,

    /// Microseconds to let the RSSI register settle after switching the
    /// modem into receive mode.
    pub rssi_settle_us: u32,

    /// "No interrupt seen" timeout that drives soft hops, bounding the
    /// dwell time per channel while scanning.
    pub event_wait_us: u32,

    /// Base for the "no CAD-done seen" timeout. Scaled by a per-SF
    /// factor (doubling with each SF step, like the symbol time).
    pub done_wait_us: u32,

    /// Fixed compensation added to every downlink timestamp, covering
    /// network-server transmission delay.
    pub tx_delay_us: u32,

    /// Extra timestamp compensation applied to SF7 downlinks only.
    pub sf7_tx_adjust_us: u32,

    /// How long TX_DONE waits for the transmit-done interrupt before
    /// declaring the chip stuck and restarting the receiver.
    pub tx_done_timeout_us: u32,

    /// Re-arm the scanner after this many seconds without a received
    /// message (once per quiet period).
    pub quiet_restart_secs: u64,

    /// TCP port for the statistics server.
    pub stats_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            cad: true,
            hop: false,
            initial_channel: 0,
            initial_sf: SpreadingFactor::Sf7,
            tx_power: 14,
            crc_check: true,
            cad_rssi_threshold: 35,
            hop_rssi_penalty: 7,
            rssi_settle_us: 6,
            event_wait_us: 15_000,
            done_wait_us: 1_950,
            tx_delay_us: 0,
            sf7_tx_adjust_us: 60_000,
            tx_done_timeout_us: 7_000_000,
            quiet_restart_secs: 15,
            stats_port: crate::network::DEFAULT_STATS_PORT,
        }
    }
}

impl GatewayConfig {
    /// Validate the configuration against the selected channel plan.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let plan = self.region.channel_plan();
        if self.hop && plan.len() < 3 {
            return Err(ConfigError::InvalidConfig(
                "hopping requires a plan of at least 3 channels",
            ));
        }
        if self.initial_channel >= plan.len() {
            return Err(ConfigError::InvalidConfig(
                "initial_channel is outside the channel plan",
            ));
        }
        let channel = &plan[self.initial_channel];
        if self.initial_sf < channel.uplink_min_sf || self.initial_sf > channel.uplink_max_sf {
            return Err(ConfigError::InvalidConfig(
                "initial_sf is outside the channel's SF range",
            ));
        }
        if self.event_wait_us == 0 {
            return Err(ConfigError::InvalidConfig("event_wait_us must be > 0"));
        }
        if self.done_wait_us == 0 {
            return Err(ConfigError::InvalidConfig("done_wait_us must be > 0"));
        }
        Ok(())
    }

    /// Effective CAD promotion threshold, with the hop penalty applied.
    pub fn effective_rssi_threshold(&self) -> u8 {
        if self.hop {
            self.cad_rssi_threshold
                .saturating_sub(self.hop_rssi_penalty)
        } else {
            self.cad_rssi_threshold
        }
    }
}

/// Error type for configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration parameter.
    InvalidConfig(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region() {
        assert_eq!(Region::default(), Region::Eu868);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.cad);
        assert!(!config.hop);
        assert_eq!(config.initial_channel, 0);
        assert_eq!(config.initial_sf, SpreadingFactor::Sf7);
    }

    #[test]
    fn test_hop_config_is_valid() {
        let config = GatewayConfig {
            hop: true,
            ..Default::default()
        };
        // Every shipped plan has at least 3 channels.
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_channel_outside_plan() {
        let config = GatewayConfig {
            initial_channel: 99,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_sf_outside_channel_range() {
        // US915 uplinks stop at SF10.
        let config = GatewayConfig {
            region: Region::Us915,
            initial_sf: SpreadingFactor::Sf12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_threshold_hop_penalty() {
        let fixed = GatewayConfig::default();
        assert_eq!(fixed.effective_rssi_threshold(), 35);

        let hopping = GatewayConfig {
            hop: true,
            ..Default::default()
        };
        assert_eq!(hopping.effective_rssi_threshold(), 28);
    }
}
