//! SX127x register map and bit definitions.
//!
//! Covers the registers this gateway touches on the SX1272 and SX1276
//! chip families. Both families share addresses for everything used here
//! except the PA DAC register, which moved between revisions.

// ==================== Register addresses ====================

/// FIFO read/write port. Reads auto-advance the internal pointer.
pub const REG_FIFO: u8 = 0x00;
/// Operating mode (LoRa flag in bit 7, mode in bits 0-2).
pub const REG_OPMODE: u8 = 0x01;
/// Carrier frequency, most significant byte.
pub const REG_FRF_MSB: u8 = 0x06;
/// Carrier frequency, middle byte.
pub const REG_FRF_MID: u8 = 0x07;
/// Carrier frequency, least significant byte.
pub const REG_FRF_LSB: u8 = 0x08;
/// PA configuration (output pin select + power nibble).
pub const REG_PA_CONFIG: u8 = 0x09;
/// PA ramp-up time (low nibble).
pub const REG_PA_RAMP: u8 = 0x0A;
/// LNA gain and boost.
pub const REG_LNA: u8 = 0x0C;
/// SPI-visible FIFO address pointer.
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
/// Base address of the transmit region of the FIFO.
pub const REG_FIFO_TX_BASE_AD: u8 = 0x0E;
/// Base address of the receive region of the FIFO.
pub const REG_FIFO_RX_BASE_AD: u8 = 0x0F;
/// Start address of the most recently received packet.
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
/// Interrupt mask; a set bit suppresses the matching interrupt.
pub const REG_IRQ_FLAGS_MASK: u8 = 0x11;
/// Interrupt flags; write 1 to clear.
pub const REG_IRQ_FLAGS: u8 = 0x12;
/// Number of payload bytes of the last packet received.
pub const REG_RX_NB_BYTES: u8 = 0x13;
/// SNR of the last packet (signed, two's complement, in 0.25 dB).
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
/// RSSI of the last packet (needs chip-family correction offset).
pub const REG_PKT_RSSI: u8 = 0x1A;
/// Instantaneous RSSI.
pub const REG_RSSI: u8 = 0x1B;
/// Hop channel status; bit 6 reports CRC-on-payload.
pub const REG_HOP_CHANNEL: u8 = 0x1C;
/// Modem config 1 (bandwidth, coding rate, header mode).
pub const REG_MODEM_CONFIG1: u8 = 0x1D;
/// Modem config 2 (SF nibble, CRC enable, symbol timeout MSB).
pub const REG_MODEM_CONFIG2: u8 = 0x1E;
/// Symbol timeout, low byte.
pub const REG_SYMB_TIMEOUT_LSB: u8 = 0x1F;
/// Payload length for transmit / implicit-header receive.
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
/// Receive payload cap; larger packets flag a CRC error.
pub const REG_MAX_PAYLOAD_LENGTH: u8 = 0x23;
/// Symbol periods between hops; 0 disables hardware hopping.
pub const REG_HOP_PERIOD: u8 = 0x24;
/// Modem config 3 (AGC auto, low data rate optimize). SX1276 only.
pub const REG_MODEM_CONFIG3: u8 = 0x26;
/// IQ polarity (0x27 normal, 0x40 inverted for downlink).
pub const REG_INVERTIQ: u8 = 0x33;
/// Sync word (0x34 for public LoRaWAN).
pub const REG_SYNC_WORD: u8 = 0x39;
/// DIO0-DIO3 pin function mapping, two bits each.
pub const REG_DIO_MAPPING_1: u8 = 0x40;
/// Silicon version; identifies the chip family.
pub const REG_VERSION: u8 = 0x42;
/// PA DAC (high-power control) on the SX1276.
pub const REG_PA_DAC_SX1276: u8 = 0x4D;
/// PA DAC (high-power control) on the SX1272.
pub const REG_PA_DAC_SX1272: u8 = 0x5A;

// ==================== Operating modes ====================

/// LoRa mode select, bit 7 of REG_OPMODE. Only writable from sleep.
pub const OPMODE_LORA: u8 = 0x80;
/// Mask over the mode bits of REG_OPMODE.
pub const OPMODE_MASK: u8 = 0x07;
pub const OPMODE_SLEEP: u8 = 0x00;
pub const OPMODE_STANDBY: u8 = 0x01;
pub const OPMODE_FSTX: u8 = 0x02;
pub const OPMODE_TX: u8 = 0x03;
pub const OPMODE_FSRX: u8 = 0x04;
pub const OPMODE_RX: u8 = 0x05;
pub const OPMODE_RX_SINGLE: u8 = 0x06;
pub const OPMODE_CAD: u8 = 0x07;

// ==================== IRQ flag bits ====================

/// Receive window timed out.
pub const IRQ_LORA_RXTOUT_MASK: u8 = 0x80;
/// Packet reception complete.
pub const IRQ_LORA_RXDONE_MASK: u8 = 0x40;
/// Payload CRC mismatch.
pub const IRQ_LORA_CRCERR_MASK: u8 = 0x20;
/// Valid header received.
pub const IRQ_LORA_HEADER_MASK: u8 = 0x10;
/// Transmission complete.
pub const IRQ_LORA_TXDONE_MASK: u8 = 0x08;
/// Channel activity detection finished.
pub const IRQ_LORA_CDDONE_MASK: u8 = 0x04;
/// Frequency hop channel change.
pub const IRQ_LORA_FHSSCH_MASK: u8 = 0x02;
/// Channel activity (preamble) detected.
pub const IRQ_LORA_CDDETD_MASK: u8 = 0x01;

// ==================== DIO pin mappings ====================
// Two bits per pin in REG_DIO_MAPPING_1, DIO0 in the top bits.

pub const MAP_DIO0_LORA_RXDONE: u8 = 0x00;
pub const MAP_DIO0_LORA_TXDONE: u8 = 0x40;
pub const MAP_DIO0_LORA_CADDONE: u8 = 0x80;
pub const MAP_DIO0_LORA_NOP: u8 = 0xC0;

pub const MAP_DIO1_LORA_RXTOUT: u8 = 0x00;
pub const MAP_DIO1_LORA_FCC: u8 = 0x10;
pub const MAP_DIO1_LORA_CADDETECT: u8 = 0x20;
pub const MAP_DIO1_LORA_NOP: u8 = 0x30;

pub const MAP_DIO2_LORA_NOP: u8 = 0x0C;

pub const MAP_DIO3_LORA_CADDONE: u8 = 0x00;
pub const MAP_DIO3_LORA_HEADER: u8 = 0x01;
pub const MAP_DIO3_LORA_CRC: u8 = 0x02;
pub const MAP_DIO3_LORA_NOP: u8 = 0x03;

// ==================== Fixed configuration values ====================

/// LNA at maximum gain, boost on.
pub const LNA_MAX_GAIN: u8 = 0x23;
/// Sync word for the public LoRaWAN network.
pub const SYNC_WORD_LORAWAN: u8 = 0x34;
/// IQ polarity for uplink reception (also resets after transmit).
pub const INVERTIQ_RX: u8 = 0x27;
/// IQ polarity for inverted (downlink) transmission.
pub const INVERTIQ_TX_INVERTED: u8 = 0x40;
/// MC2 CRC-on-payload bit.
pub const MC2_RX_PAYLOAD_CRCON: u8 = 0x04;
/// Default transmit payload length register value.
pub const PAYLOAD_LENGTH: u8 = 0x40;
/// Receive cap: TX starts at FIFO 0x80 and RX at 0x00, so a received
/// packet can occupy at most 128 bytes.
pub const MAX_PAYLOAD_LENGTH: u8 = 0x80;
/// Version register value reported by the SX1272.
pub const CHIP_VERSION_SX1272: u8 = 0x22;
/// Version register value reported by the SX1276.
pub const CHIP_VERSION_SX1276: u8 = 0x12;
/// SPI clock for the radio, Hz.
pub const SPI_SPEED_HZ: u32 = 8_000_000;
