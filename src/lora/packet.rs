//! Packet buffers and link-quality conversion.
//!
//! `InboundPacket` is the hand-off unit from the radio core to the packet
//! forwarder; `OutboundRequest` travels the other way. Both are plain
//! data. The helpers here decode the chip's packet-quality registers into
//! dB/dBm values.

use super::plan::SpreadingFactor;

/// Maximum payload staged in either direction. Matches the max-payload
/// length programmed into the chip; anything longer is truncated (RX)
/// or rejected (TX).
pub const MAX_PAYLOAD_BYTES: usize = 128;

/// A received uplink, complete with link quality.
///
/// Single-slot: the radio context holds at most one of these, and the
/// next reception overwrites it if the collaborator has not taken it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    /// Payload bytes drained from the chip FIFO.
    pub payload: Vec<u8>,
    /// Packet RSSI in dBm, already chip-corrected.
    pub rssi_dbm: i16,
    /// Packet SNR in dB.
    pub snr_db: i8,
    /// Spreading factor the packet was demodulated at.
    pub sf: SpreadingFactor,
    /// Channel plan index the packet arrived on.
    pub channel: usize,
    /// Microsecond timestamp of the receive-done event.
    pub received_us: u32,
}

/// A downlink waiting for its transmit window.
///
/// Consumed exactly once: the state machine takes it when entering TX
/// and it is gone whether or not the transmission succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Payload bytes to load into the chip FIFO.
    pub payload: Vec<u8>,
    /// Microsecond timestamp the first symbol must leave the antenna at.
    pub target_us: u32,
    /// Spreading factor to transmit with.
    pub sf: SpreadingFactor,
    /// Transmit power in dBm (clamped to chip range when programmed).
    pub power_dbm: u8,
    /// Absolute downlink frequency in Hz.
    pub freq_hz: u32,
    /// Append a payload CRC.
    pub crc: bool,
    /// Invert I/Q polarity (normal for network-to-node downlinks).
    pub invert_iq: bool,
}

/// Decode the packet-SNR register into whole dB.
///
/// The register holds a two's-complement value in quarter-dB steps. The
/// sign bit selects negate-then-shift so the integer division always
/// rounds toward zero, matching the chip errata note.
pub fn snr_from_register(value: u8) -> i8 {
    if value & 0x80 != 0 {
        -((value.wrapping_neg() >> 2) as i8)
    } else {
        (value >> 2) as i8
    }
}

/// Packet RSSI in dBm from the raw register value and the chip-family
/// correction offset.
pub fn corrected_rssi(raw: u8, correction: i16) -> i16 {
    raw as i16 - correction
}
