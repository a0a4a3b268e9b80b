//! Region channel plans and the round-robin hop cursor.
//!
//! Each region is a fixed table of channel definitions: uplink frequency,
//! bandwidth and SF range, plus the matching downlink parameters where the
//! plan defines them. The tables are pure data; the only arithmetic here
//! is the cursor that advances the current index modulo the plan size.

use super::config::Region;

/// LoRa spreading factor.
///
/// SF6 exists in the silicon but is reserved; the gateway only operates
/// SF7 through SF12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SpreadingFactor {
    Sf7 = 7,
    Sf8 = 8,
    Sf9 = 9,
    Sf10 = 10,
    Sf11 = 11,
    Sf12 = 12,
}

impl SpreadingFactor {
    /// Parse a raw SF value, e.g. from the modem-config register.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            7 => Some(Self::Sf7),
            8 => Some(Self::Sf8),
            9 => Some(Self::Sf9),
            10 => Some(Self::Sf10),
            11 => Some(Self::Sf11),
            12 => Some(Self::Sf12),
            _ => None,
        }
    }

    /// The raw SF value as written into register bit fields.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The next-slower spreading factor, saturating at SF12.
    pub fn next(self) -> Self {
        match self {
            Self::Sf7 => Self::Sf8,
            Self::Sf8 => Self::Sf9,
            Self::Sf9 => Self::Sf10,
            Self::Sf10 => Self::Sf11,
            Self::Sf11 => Self::Sf12,
            Self::Sf12 => Self::Sf12,
        }
    }

    /// Scale factor for the CAD-done timeout. Symbol duration doubles
    /// with every SF step, so the dwell timeout does too.
    pub fn done_wait_factor(self) -> u32 {
        match self {
            Self::Sf7 => 1,
            Self::Sf8 => 2,
            Self::Sf9 => 4,
            Self::Sf10 => 8,
            Self::Sf11 => 16,
            Self::Sf12 => 32,
        }
    }
}

impl std::fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SF{}", self.as_u8())
    }
}

/// Downlink leg of a channel plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downlink {
    pub freq_hz: u32,
    pub bandwidth_khz: u16,
    pub min_sf: SpreadingFactor,
    pub max_sf: SpreadingFactor,
}

/// One channel plan entry.
///
/// Uplink-only channels (US915/AU915 channel 8) carry no downlink leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub uplink_freq_hz: u32,
    pub uplink_bandwidth_khz: u16,
    pub uplink_min_sf: SpreadingFactor,
    pub uplink_max_sf: SpreadingFactor,
    pub downlink: Option<Downlink>,
}

impl Channel {
    /// Channel whose downlink mirrors its uplink (EU/CN style plans).
    const fn symmetric(
        freq_hz: u32,
        bandwidth_khz: u16,
        min_sf: SpreadingFactor,
        max_sf: SpreadingFactor,
    ) -> Self {
        Self {
            uplink_freq_hz: freq_hz,
            uplink_bandwidth_khz: bandwidth_khz,
            uplink_min_sf: min_sf,
            uplink_max_sf: max_sf,
            downlink: Some(Downlink {
                freq_hz,
                bandwidth_khz,
                min_sf,
                max_sf,
            }),
        }
    }

    /// Channel with a separate downlink definition (US915 style).
    #[allow(clippy::too_many_arguments)]
    const fn split(
        up_freq_hz: u32,
        up_bandwidth_khz: u16,
        up_min_sf: SpreadingFactor,
        up_max_sf: SpreadingFactor,
        dwn_freq_hz: u32,
        dwn_bandwidth_khz: u16,
        dwn_min_sf: SpreadingFactor,
        dwn_max_sf: SpreadingFactor,
    ) -> Self {
        Self {
            uplink_freq_hz: up_freq_hz,
            uplink_bandwidth_khz: up_bandwidth_khz,
            uplink_min_sf: up_min_sf,
            uplink_max_sf: up_max_sf,
            downlink: Some(Downlink {
                freq_hz: dwn_freq_hz,
                bandwidth_khz: dwn_bandwidth_khz,
                min_sf: dwn_min_sf,
                max_sf: dwn_max_sf,
            }),
        }
    }

    /// Channel with no downlink leg.
    const fn uplink_only(
        freq_hz: u32,
        bandwidth_khz: u16,
        min_sf: SpreadingFactor,
        max_sf: SpreadingFactor,
    ) -> Self {
        Self {
            uplink_freq_hz: freq_hz,
            uplink_bandwidth_khz: bandwidth_khz,
            uplink_min_sf: min_sf,
            uplink_max_sf: max_sf,
            downlink: None,
        }
    }
}

use SpreadingFactor::{Sf10, Sf12, Sf7, Sf8};

// ==================== Region Tables ====================

/// EU 863-870 MHz. Channels 0-2 are the mandatory join channels every
/// real gateway must cover.
const EU868: [Channel; 9] = [
    Channel::symmetric(868_100_000, 125, Sf7, Sf12),
    Channel::symmetric(868_300_000, 125, Sf7, Sf12),
    Channel::symmetric(868_500_000, 125, Sf7, Sf12),
    Channel::symmetric(867_100_000, 125, Sf7, Sf12),
    Channel::symmetric(867_300_000, 125, Sf7, Sf12),
    Channel::symmetric(867_500_000, 125, Sf7, Sf12),
    Channel::symmetric(867_700_000, 125, Sf7, Sf12),
    Channel::symmetric(867_900_000, 125, Sf7, Sf12),
    Channel::symmetric(868_800_000, 125, Sf7, Sf12),
];

/// EU 433 MHz.
const EU433: [Channel; 9] = [
    Channel::symmetric(433_175_000, 125, Sf7, Sf12),
    Channel::symmetric(433_375_000, 125, Sf7, Sf12),
    Channel::symmetric(433_575_000, 125, Sf7, Sf12),
    Channel::symmetric(433_775_000, 125, Sf7, Sf12),
    Channel::symmetric(433_975_000, 125, Sf7, Sf12),
    Channel::symmetric(434_175_000, 125, Sf7, Sf12),
    Channel::symmetric(434_375_000, 125, Sf7, Sf12),
    Channel::symmetric(434_575_000, 125, Sf7, Sf12),
    Channel::symmetric(434_775_000, 125, Sf7, Sf12),
];

/// US 902-928 MHz. Uplinks run SF7-SF10 at BW125; downlinks use the
/// separate BW500 sub-band. Channel 8 is the SF8/BW500 uplink with no
/// downlink counterpart.
const US915: [Channel; 9] = [
    Channel::symmetric(902_300_000, 125, Sf7, Sf10),
    Channel::split(902_500_000, 125, Sf7, Sf10, 923_900_000, 500, Sf7, Sf12),
    Channel::split(902_700_000, 125, Sf7, Sf10, 924_500_000, 500, Sf7, Sf12),
    Channel::split(902_900_000, 125, Sf7, Sf10, 925_100_000, 500, Sf7, Sf12),
    Channel::split(903_100_000, 125, Sf7, Sf10, 925_700_000, 500, Sf7, Sf12),
    Channel::split(903_300_000, 125, Sf7, Sf10, 926_300_000, 500, Sf7, Sf12),
    Channel::split(903_500_000, 125, Sf7, Sf10, 926_900_000, 500, Sf7, Sf12),
    Channel::split(903_700_000, 125, Sf7, Sf10, 927_500_000, 500, Sf7, Sf12),
    Channel::uplink_only(903_900_000, 500, Sf8, Sf8),
];

/// Australia 915-928 MHz.
const AU915: [Channel; 9] = [
    Channel::split(916_800_000, 125, Sf7, Sf10, 916_800_000, 125, Sf7, Sf12),
    Channel::split(917_000_000, 125, Sf7, Sf10, 917_000_000, 125, Sf7, Sf12),
    Channel::split(917_200_000, 125, Sf7, Sf10, 917_200_000, 125, Sf7, Sf12),
    Channel::split(917_400_000, 125, Sf7, Sf10, 917_400_000, 125, Sf7, Sf12),
    Channel::split(917_600_000, 125, Sf7, Sf10, 917_600_000, 125, Sf7, Sf12),
    Channel::split(917_800_000, 125, Sf7, Sf10, 917_800_000, 125, Sf7, Sf12),
    Channel::split(918_000_000, 125, Sf7, Sf10, 918_000_000, 125, Sf7, Sf12),
    Channel::split(918_200_000, 125, Sf7, Sf10, 918_200_000, 125, Sf7, Sf12),
    Channel::uplink_only(917_500_000, 500, Sf8, Sf8),
];

/// China 470-510 MHz.
const CN470: [Channel; 8] = [
    Channel::symmetric(486_300_000, 125, Sf7, Sf12),
    Channel::symmetric(486_500_000, 125, Sf7, Sf12),
    Channel::symmetric(486_700_000, 125, Sf7, Sf12),
    Channel::symmetric(486_900_000, 125, Sf7, Sf12),
    Channel::symmetric(487_100_000, 125, Sf7, Sf12),
    Channel::symmetric(487_300_000, 125, Sf7, Sf12),
    Channel::symmetric(487_500_000, 125, Sf7, Sf12),
    Channel::symmetric(487_700_000, 125, Sf7, Sf12),
];

impl Region {
    /// The channel plan for this region.
    pub fn channel_plan(self) -> &'static [Channel] {
        match self {
            Self::Eu868 => &EU868,
            Self::Eu433 => &EU433,
            Self::Us915 => &US915,
            Self::Au915 => &AU915,
            Self::Cn470 => &CN470,
        }
    }
}

// ==================== Hop Cursor ====================

/// Round-robin cursor over a channel plan.
///
/// Exactly one cursor exists per radio; all channel-index mutation goes
/// through [`ChannelCursor::advance`].
#[derive(Debug, Clone)]
pub struct ChannelCursor {
    plan: &'static [Channel],
    index: usize,
}

impl ChannelCursor {
    /// Create a cursor positioned at `index`.
    pub fn new(plan: &'static [Channel], index: usize) -> Self {
        Self { plan, index }
    }

    /// The current channel index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The current channel entry.
    pub fn current(&self) -> &'static Channel {
        &self.plan[self.index]
    }

    /// Number of channels in the plan.
    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }

    /// Advance to the next channel, wrapping at the end of the plan.
    ///
    /// Returns the new channel's minimum uplink SF, which the caller must
    /// adopt: a hop always restarts the SF sweep from the bottom.
    pub fn advance(&mut self) -> SpreadingFactor {
        self.index = (self.index + 1) % self.plan.len();
        self.plan[self.index].uplink_min_sf
    }
}
