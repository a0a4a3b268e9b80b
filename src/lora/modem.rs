//! SX127x modem control.
//!
//! Register sequences for the SX1272 and SX1276 transceiver families:
//! bring-up, receiver and CAD-scanner arming, channel hopping, and the
//! two-phase transmit path. The state machine calls these operations;
//! nothing here touches the bus outside a single evaluation pass.
//!
//! The two families share the register map used here but differ in
//! modem-config bit layout, packet-RSSI offset, and the PA DAC register
//! address. `ChipVariant` carries those differences; everything else is
//! common code over a [`RegisterBus`].

use log::{debug, info, warn};
use std::fmt;

use super::bus::{RadioError, RegisterBus};
use super::packet::{corrected_rssi, snr_from_register, OutboundRequest, MAX_PAYLOAD_BYTES};
use super::plan::SpreadingFactor;
use super::registers::*;

// ==================== Interrupt Masks & DIO Maps ====================

/// IRQ mask admitting the receive interrupt set.
pub const RX_IRQ_MASK: u8 =
    !(IRQ_LORA_RXDONE_MASK | IRQ_LORA_RXTOUT_MASK | IRQ_LORA_HEADER_MASK | IRQ_LORA_CRCERR_MASK);

/// IRQ mask admitting the CAD interrupt set.
pub const CAD_IRQ_MASK: u8 =
    !(IRQ_LORA_CDDONE_MASK | IRQ_LORA_CDDETD_MASK | IRQ_LORA_CRCERR_MASK | IRQ_LORA_HEADER_MASK);

/// IRQ mask admitting only transmit-done.
pub const TX_IRQ_MASK: u8 = !IRQ_LORA_TXDONE_MASK;

/// DIO0=RxDone, DIO1=RxTimeout, DIO2=NOP, DIO3=CRC.
pub const DIO_MAP_RX: u8 =
    MAP_DIO0_LORA_RXDONE | MAP_DIO1_LORA_RXTOUT | MAP_DIO2_LORA_NOP | MAP_DIO3_LORA_CRC;

/// DIO0=CadDone, DIO1=CadDetect, DIO2=NOP, DIO3=CRC.
pub const DIO_MAP_CAD: u8 =
    MAP_DIO0_LORA_CADDONE | MAP_DIO1_LORA_CADDETECT | MAP_DIO2_LORA_NOP | MAP_DIO3_LORA_CRC;

/// DIO0=TxDone, DIO1=NOP, DIO2=NOP, DIO3=CRC.
pub const DIO_MAP_TX: u8 =
    MAP_DIO0_LORA_TXDONE | MAP_DIO1_LORA_NOP | MAP_DIO2_LORA_NOP | MAP_DIO3_LORA_CRC;

// ==================== Chip Variant ====================

/// Transceiver family, identified from the version register at probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVariant {
    /// SX1272/RFM92, version register 0x22.
    Sx1272,
    /// SX1276/RFM95, version register 0x12.
    Sx1276,
}

impl ChipVariant {
    /// Identify the family from the version register value.
    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            CHIP_VERSION_SX1272 => Some(Self::Sx1272),
            CHIP_VERSION_SX1276 => Some(Self::Sx1276),
            _ => None,
        }
    }

    /// Offset subtracted from the raw packet-RSSI register to get dBm.
    pub fn rssi_correction(&self) -> i16 {
        match self {
            Self::Sx1272 => 139,
            Self::Sx1276 => 157,
        }
    }

    /// PA DAC register address. The two families put it in different
    /// places; writing the wrong one is silently ignored by the chip.
    pub fn pa_dac_register(&self) -> u8 {
        match self {
            Self::Sx1272 => REG_PA_DAC_SX1272,
            Self::Sx1276 => REG_PA_DAC_SX1276,
        }
    }

    /// Modem config register triple (MC1, MC2, MC3) for a spreading
    /// factor at 125 kHz / CR 4:5 (4:8 for SF8 on the SX1276).
    pub fn modem_config(&self, sf: SpreadingFactor, crc_on: bool) -> (u8, u8, u8) {
        let crc = if crc_on { MC2_RX_PAYLOAD_CRCON } else { 0x00 };
        let mc2 = (sf.as_u8() << 4) | crc;
        match self {
            Self::Sx1272 => {
                // BW and CR live in MC1 alongside the low-data-rate bit.
                let mc1 = match sf {
                    SpreadingFactor::Sf11 | SpreadingFactor::Sf12 => 0x0B,
                    _ => 0x0A,
                };
                (mc1, mc2, 0x00)
            }
            Self::Sx1276 => {
                let mc1 = match sf {
                    SpreadingFactor::Sf8 => 0x78,
                    _ => 0x72,
                };
                // MC3: AGC auto, plus low-data-rate optimize for the
                // long spreading factors.
                let mut mc3 = 0x04;
                if matches!(sf, SpreadingFactor::Sf11 | SpreadingFactor::Sf12) {
                    mc3 |= 0x08;
                }
                (mc1, mc2, mc3)
            }
        }
    }
}

impl fmt::Display for ChipVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sx1272 => write!(f, "SX1272"),
            Self::Sx1276 => write!(f, "SX1276"),
        }
    }
}

// ==================== FIFO Drain Outcome ====================

/// Outcome of draining the receive FIFO after a receive-done interrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FifoRead {
    /// Payload bytes drained from the FIFO.
    Payload(Vec<u8>),
    /// The payload failed its CRC check; nothing was read.
    CrcError,
    /// Receive-done fired without a valid header; flags were cleared.
    NoHeader,
}

// ==================== Modem ====================

/// Register-level driver for one SX127x transceiver.
///
/// Owns the bus. Constructed via [`Modem::probe`], which identifies the
/// chip family before any other register traffic, so every later
/// operation can assume a known variant.
pub struct Modem<B: RegisterBus> {
    bus: B,
    variant: ChipVariant,
}

impl<B: RegisterBus> Modem<B> {
    /// Read the version register and bind the driver to the detected
    /// chip family. Fails with [`RadioError::UnknownChip`] when neither
    /// family answers, which usually means wrong wiring or a dead chip.
    pub fn probe(mut bus: B) -> Result<Self, RadioError> {
        let version = bus.read_register(REG_VERSION)?;
        let variant =
            ChipVariant::from_version(version).ok_or(RadioError::UnknownChip { version })?;
        info!("{} detected (version register 0x{:02X})", variant, version);
        Ok(Self { bus, variant })
    }

    /// Detected chip family.
    pub fn variant(&self) -> ChipVariant {
        self.variant
    }

    /// Direct access to the underlying bus, for event injection on the
    /// simulated bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    // ==================== Primitives ====================

    /// Current interrupt flags.
    pub fn read_irq_flags(&mut self) -> Result<u8, RadioError> {
        self.bus.read_register(REG_IRQ_FLAGS)
    }

    /// Current interrupt mask (set bits are masked off).
    pub fn read_irq_mask(&mut self) -> Result<u8, RadioError> {
        self.bus.read_register(REG_IRQ_FLAGS_MASK)
    }

    /// Program the interrupt mask.
    pub fn write_irq_mask(&mut self, mask: u8) -> Result<(), RadioError> {
        self.bus.write_register(REG_IRQ_FLAGS_MASK, mask)
    }

    /// Clear the given interrupt flags (write-1-to-clear).
    pub fn clear_irq_flags(&mut self, flags: u8) -> Result<(), RadioError> {
        self.bus.write_register(REG_IRQ_FLAGS, flags)
    }

    /// Program the DIO pin mapping.
    pub fn write_dio_mapping(&mut self, mapping: u8) -> Result<(), RadioError> {
        self.bus.write_register(REG_DIO_MAPPING_1, mapping)
    }

    /// Instantaneous RSSI register, raw chip units.
    pub fn read_current_rssi(&mut self) -> Result<u8, RadioError> {
        self.bus.read_register(REG_RSSI)
    }

    /// Spreading-factor nibble the modem is currently configured for.
    pub fn read_configured_sf(&mut self) -> Result<u8, RadioError> {
        Ok(self.bus.read_register(REG_MODEM_CONFIG2)? >> 4)
    }

    /// Switch operating mode. The LoRa-mode byte is written directly
    /// (only legal from sleep); any other mode is a read-modify-write of
    /// the low three bits so the LoRa flag survives.
    pub fn set_opmode(&mut self, mode: u8) -> Result<(), RadioError> {
        if mode == OPMODE_LORA {
            self.bus.write_register(REG_OPMODE, mode)
        } else {
            let current = self.bus.read_register(REG_OPMODE)?;
            self.bus
                .write_register(REG_OPMODE, (current & !OPMODE_MASK) | mode)
        }
    }

    /// Program the carrier frequency in Hz.
    pub fn set_frequency(&mut self, freq_hz: u32) -> Result<(), RadioError> {
        // frf counts in units of F(XOSC) / 2^19 = 32 MHz / 524288.
        let frf = ((freq_hz as u64) << 19) / 32_000_000;
        self.bus.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.bus.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.bus.write_register(REG_FRF_LSB, frf as u8)
    }

    /// Program the modem config registers for a spreading factor.
    pub fn set_rate(&mut self, sf: SpreadingFactor, crc_on: bool) -> Result<(), RadioError> {
        let (mc1, mc2, mc3) = self.variant.modem_config(sf, crc_on);
        self.bus.write_register(REG_MODEM_CONFIG1, mc1)?;
        self.bus.write_register(REG_MODEM_CONFIG2, mc2)?;
        self.bus.write_register(REG_MODEM_CONFIG3, mc3)?;
        // Symbol timeout, shorter count for the long spreading factors.
        let timeout = if sf >= SpreadingFactor::Sf10 { 0x05 } else { 0x08 };
        self.bus.write_register(REG_SYMB_TIMEOUT_LSB, timeout)
    }

    /// Program transmit power in dBm, clamped to the PA's [2, 15] range.
    pub fn set_power(&mut self, dbm: u8) -> Result<(), RadioError> {
        let p = dbm.clamp(2, 15);
        self.bus.write_register(REG_PA_CONFIG, 0x80 | (p & 0xF))
    }

    // ==================== Operation Sequences ====================

    /// Full modem bring-up: sleep, LoRa mode, frequency and rate, LNA,
    /// sync word, I/Q polarity, FIFO layout, PA ramp and DAC. Leaves all
    /// interrupts unmasked and flags cleared. The caller arms the
    /// scanner or receiver afterwards.
    pub fn init(
        &mut self,
        freq_hz: u32,
        sf: SpreadingFactor,
        crc_on: bool,
    ) -> Result<(), RadioError> {
        info!("Initializing {} modem: {} Hz, {}", self.variant, freq_hz, sf);
        self.set_opmode(OPMODE_SLEEP)?;
        self.set_opmode(OPMODE_LORA)?;
        self.set_frequency(freq_hz)?;
        self.set_rate(sf, crc_on)?;
        self.bus.write_register(REG_LNA, LNA_MAX_GAIN)?;
        self.bus.write_register(REG_SYNC_WORD, SYNC_WORD_LORAWAN)?;
        // Non-inverted I/Q on the uplink, so node-to-node traffic is
        // not picked up.
        self.bus.write_register(REG_INVERTIQ, INVERTIQ_RX)?;
        self.bus
            .write_register(REG_MAX_PAYLOAD_LENGTH, MAX_PAYLOAD_LENGTH)?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, PAYLOAD_LENGTH)?;
        let rx_base = self.bus.read_register(REG_FIFO_RX_BASE_AD)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, rx_base)?;
        self.bus.write_register(REG_HOP_PERIOD, 0x00)?;
        // PA ramp-up 50 us, keeping the shaping bits.
        let ramp = self.bus.read_register(REG_PA_RAMP)?;
        self.bus.write_register(REG_PA_RAMP, (ramp & 0xF0) | 0x08)?;
        self.bus.write_register(self.variant.pa_dac_register(), 0x84)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, 0x00)?;
        self.bus.write_register(REG_IRQ_FLAGS, 0xFF)
    }

    /// Arm the receiver on a channel: single-shot (CAD operation, one
    /// message then standby) or continuous (fixed-channel operation).
    pub fn arm_receiver(
        &mut self,
        freq_hz: u32,
        sf: SpreadingFactor,
        crc_on: bool,
        single: bool,
        hop: bool,
    ) -> Result<(), RadioError> {
        self.set_opmode(OPMODE_STANDBY)?;
        self.set_frequency(freq_hz)?;
        self.set_rate(sf, crc_on)?;
        self.bus.write_register(REG_INVERTIQ, INVERTIQ_RX)?;
        let rx_base = self.bus.read_register(REG_FIFO_RX_BASE_AD)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, rx_base)?;
        self.bus.write_register(REG_LNA, LNA_MAX_GAIN)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, RX_IRQ_MASK)?;
        self.bus.write_register(REG_HOP_PERIOD, 0x00)?;
        self.bus.write_register(REG_DIO_MAPPING_1, DIO_MAP_RX)?;
        if single {
            self.set_opmode(OPMODE_RX_SINGLE)?;
        } else {
            if hop {
                warn!("Continuous receive armed with channel hopping enabled");
            }
            self.set_opmode(OPMODE_RX)?;
        }
        self.bus.write_register(REG_IRQ_FLAGS, 0xFF)?;
        debug!(
            "Receiver armed: {} Hz, {}, {}",
            freq_hz,
            sf,
            if single { "single" } else { "continuous" }
        );
        Ok(())
    }

    /// Arm the CAD scanner on a channel. Flags are not cleared here: a
    /// detect raised between arming and the mode switch must survive
    /// into the next evaluation pass.
    pub fn arm_cad_scanner(
        &mut self,
        freq_hz: u32,
        sf: SpreadingFactor,
        crc_on: bool,
    ) -> Result<(), RadioError> {
        self.set_opmode(OPMODE_STANDBY)?;
        self.set_frequency(freq_hz)?;
        self.set_rate(sf, crc_on)?;
        self.bus.write_register(REG_SYNC_WORD, SYNC_WORD_LORAWAN)?;
        self.bus.write_register(REG_DIO_MAPPING_1, DIO_MAP_CAD)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, CAD_IRQ_MASK)?;
        self.set_opmode(OPMODE_CAD)?;
        debug!("CAD scanner armed: {} Hz, {}", freq_hz, sf);
        Ok(())
    }

    /// Register side of a channel hop: retune to the new channel at its
    /// starting spreading factor and restore the receive configuration.
    pub fn apply_hop(
        &mut self,
        freq_hz: u32,
        sf: SpreadingFactor,
        crc_on: bool,
    ) -> Result<(), RadioError> {
        self.set_opmode(OPMODE_STANDBY)?;
        self.set_frequency(freq_hz)?;
        self.set_rate(sf, crc_on)?;
        self.bus.write_register(REG_LNA, LNA_MAX_GAIN)?;
        self.bus.write_register(REG_SYNC_WORD, SYNC_WORD_LORAWAN)?;
        self.bus.write_register(REG_INVERTIQ, INVERTIQ_RX)?;
        self.bus
            .write_register(REG_MAX_PAYLOAD_LENGTH, MAX_PAYLOAD_LENGTH)?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, PAYLOAD_LENGTH)?;
        let rx_base = self.bus.read_register(REG_FIFO_RX_BASE_AD)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, rx_base)?;
        self.bus.write_register(REG_HOP_PERIOD, 0x00)?;
        let ramp = self.bus.read_register(REG_PA_RAMP)?;
        self.bus.write_register(REG_PA_RAMP, (ramp & 0xF0) | 0x08)?;
        self.bus.write_register(self.variant.pa_dac_register(), 0x84)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, 0x00)?;
        self.bus.write_register(REG_IRQ_FLAGS, 0xFF)
    }

    /// First transmit phase: configure the modem for the downlink and
    /// stage the payload in the FIFO, ending in frequency-synthesis
    /// mode. The scheduler then waits out the window before
    /// [`Modem::key_transmit`] keys the PA.
    pub fn prepare_transmit(&mut self, request: &OutboundRequest) -> Result<(), RadioError> {
        debug!(
            "Transmit: {} bytes, {} Hz, {}, {} dBm",
            request.payload.len(),
            request.freq_hz,
            request.sf,
            request.power_dbm
        );
        let opmode = self.bus.read_register(REG_OPMODE)?;
        if opmode & OPMODE_LORA == 0 {
            warn!("Transmit requested outside LoRa mode (opmode 0x{:02X})", opmode);
        }
        self.set_opmode(OPMODE_STANDBY)?;
        self.set_rate(request.sf, request.crc)?;
        self.set_frequency(request.freq_hz)?;
        self.set_power(request.power_dbm)?;
        let iq = if request.invert_iq {
            INVERTIQ_TX_INVERTED
        } else {
            INVERTIQ_RX
        };
        self.bus.write_register(REG_INVERTIQ, iq)?;
        self.bus.write_register(REG_DIO_MAPPING_1, DIO_MAP_TX)?;
        self.bus.write_register(REG_IRQ_FLAGS, 0xFF)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, TX_IRQ_MASK)?;
        self.set_opmode(OPMODE_FSTX)?;
        self.load_fifo(&request.payload)
    }

    /// Second transmit phase, run at the scheduled window: re-point the
    /// FIFO at the staged payload and switch to transmit. The PA keys
    /// immediately; TXDONE follows after the airtime.
    pub fn key_transmit(&mut self, payload_len: u8) -> Result<(), RadioError> {
        let tx_base = self.bus.read_register(REG_FIFO_TX_BASE_AD)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, tx_base)?;
        self.bus.write_register(REG_PAYLOAD_LENGTH, payload_len)?;
        self.bus
            .write_register(REG_MAX_PAYLOAD_LENGTH, MAX_PAYLOAD_LENGTH)?;
        self.bus.write_register(REG_IRQ_FLAGS_MASK, 0x00)?;
        self.bus
            .write_register(REG_IRQ_FLAGS, IRQ_LORA_TXDONE_MASK)?;
        self.set_opmode(OPMODE_TX)
    }

    fn load_fifo(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(RadioError::PacketTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let tx_base = self.bus.read_register(REG_FIFO_TX_BASE_AD)?;
        self.bus.write_register(REG_FIFO_ADDR_PTR, tx_base)?;
        self.bus
            .write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        self.bus.write_buffer(REG_FIFO, payload)
    }

    /// Drain a received payload out of the FIFO, checking the CRC and
    /// header flags first. The claimed byte count is capped at
    /// [`MAX_PAYLOAD_BYTES`], the size of the receive FIFO region.
    pub fn read_fifo(&mut self) -> Result<FifoRead, RadioError> {
        let flags = self.bus.read_register(REG_IRQ_FLAGS)?;

        let hop_channel = self.bus.read_register(REG_HOP_CHANNEL)?;
        if hop_channel & 0x40 != 0 {
            debug!("Payload carries a CRC");
        }

        if flags & IRQ_LORA_CRCERR_MASK != 0 {
            debug!("Receive failed CRC check");
            return Ok(FifoRead::CrcError);
        }
        if flags & IRQ_LORA_HEADER_MASK == 0 {
            debug!("Receive-done without a valid header");
            self.bus.write_register(
                REG_IRQ_FLAGS,
                IRQ_LORA_HEADER_MASK | IRQ_LORA_RXDONE_MASK,
            )?;
            return Ok(FifoRead::NoHeader);
        }

        let rx_base = self.bus.read_register(REG_FIFO_RX_BASE_AD)?;
        let current = self.bus.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        if current != rx_base {
            debug!(
                "FIFO current address 0x{:02X} differs from RX base 0x{:02X}",
                current, rx_base
            );
        }

        // Drain from the RX base, not the current address.
        self.bus.write_register(REG_FIFO_ADDR_PTR, rx_base)?;
        let mut count = self.bus.read_register(REG_RX_NB_BYTES)? as usize;
        if count > MAX_PAYLOAD_BYTES {
            warn!(
                "Claimed receive length {} exceeds the {} byte FIFO region, truncating",
                count, MAX_PAYLOAD_BYTES
            );
            count = MAX_PAYLOAD_BYTES;
        }
        let mut payload = Vec::with_capacity(count);
        for _ in 0..count {
            payload.push(self.bus.read_register(REG_FIFO)?);
        }
        self.bus.write_register(REG_IRQ_FLAGS, 0xFF)?;
        Ok(FifoRead::Payload(payload))
    }

    /// Packet SNR in dB and chip-corrected packet RSSI in dBm.
    pub fn read_packet_quality(&mut self) -> Result<(i8, i16), RadioError> {
        let snr = snr_from_register(self.bus.read_register(REG_PKT_SNR_VALUE)?);
        let raw = self.bus.read_register(REG_PKT_RSSI)?;
        Ok((snr, corrected_rssi(raw, self.variant.rssi_correction())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::sim::SimBus;

    fn sx1276_modem() -> Modem<SimBus> {
        Modem::probe(SimBus::sx1276()).unwrap()
    }

    fn sx1272_modem() -> Modem<SimBus> {
        Modem::probe(SimBus::sx1272()).unwrap()
    }

    #[test]
    fn test_probe_identifies_variants() {
        assert_eq!(sx1276_modem().variant(), ChipVariant::Sx1276);
        assert_eq!(sx1272_modem().variant(), ChipVariant::Sx1272);
    }

    #[test]
    fn test_probe_rejects_unknown_version() {
        let err = Modem::probe(SimBus::with_version(0x33)).err().unwrap();
        match err {
            RadioError::UnknownChip { version } => assert_eq!(version, 0x33),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_modem_config_sx1276() {
        let v = ChipVariant::Sx1276;
        assert_eq!(v.modem_config(SpreadingFactor::Sf7, true), (0x72, 0x74, 0x04));
        assert_eq!(v.modem_config(SpreadingFactor::Sf8, true), (0x78, 0x84, 0x04));
        assert_eq!(v.modem_config(SpreadingFactor::Sf9, true), (0x72, 0x94, 0x04));
        assert_eq!(v.modem_config(SpreadingFactor::Sf10, true), (0x72, 0xA4, 0x04));
        assert_eq!(v.modem_config(SpreadingFactor::Sf11, true), (0x72, 0xB4, 0x0C));
        assert_eq!(v.modem_config(SpreadingFactor::Sf12, true), (0x72, 0xC4, 0x0C));
    }

    #[test]
    fn test_modem_config_sx1272() {
        let v = ChipVariant::Sx1272;
        assert_eq!(v.modem_config(SpreadingFactor::Sf7, true), (0x0A, 0x74, 0x00));
        assert_eq!(v.modem_config(SpreadingFactor::Sf10, true), (0x0A, 0xA4, 0x00));
        assert_eq!(v.modem_config(SpreadingFactor::Sf11, true), (0x0B, 0xB4, 0x00));
        assert_eq!(v.modem_config(SpreadingFactor::Sf12, true), (0x0B, 0xC4, 0x00));
    }

    #[test]
    fn test_modem_config_crc_off() {
        let v = ChipVariant::Sx1276;
        assert_eq!(v.modem_config(SpreadingFactor::Sf9, false), (0x72, 0x90, 0x04));
    }

    #[test]
    fn test_set_rate_symbol_timeout() {
        let mut modem = sx1276_modem();
        modem.set_rate(SpreadingFactor::Sf9, true).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_SYMB_TIMEOUT_LSB), Some(0x08));
        modem.set_rate(SpreadingFactor::Sf10, true).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_SYMB_TIMEOUT_LSB), Some(0x05));
        modem.set_rate(SpreadingFactor::Sf12, true).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_SYMB_TIMEOUT_LSB), Some(0x05));
    }

    #[test]
    fn test_set_power_clamps() {
        let mut modem = sx1276_modem();
        modem.set_power(20).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_PA_CONFIG), Some(0x8F));
        modem.set_power(0).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_PA_CONFIG), Some(0x82));
        modem.set_power(14).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_PA_CONFIG), Some(0x8E));
        // Clamping is idempotent: programming the clamped value again
        // yields the same register byte.
        modem.set_power(15).unwrap();
        let first = modem.bus_mut().last_write(REG_PA_CONFIG);
        modem.set_power(16).unwrap();
        assert_eq!(modem.bus_mut().last_write(REG_PA_CONFIG), first);
    }

    #[test]
    fn test_set_frequency_round_trip() {
        for freq in [868_100_000u32, 902_300_000, 433_175_000, 486_300_000] {
            let mut modem = sx1276_modem();
            modem.set_frequency(freq).unwrap();
            let msb = modem.bus_mut().last_write(REG_FRF_MSB).unwrap() as u64;
            let mid = modem.bus_mut().last_write(REG_FRF_MID).unwrap() as u64;
            let lsb = modem.bus_mut().last_write(REG_FRF_LSB).unwrap() as u64;
            let frf = (msb << 16) | (mid << 8) | lsb;
            let back = (frf * 32_000_000) >> 19;
            // One frf step is 32 MHz / 2^19, about 61 Hz.
            assert!(
                (back as i64 - freq as i64).abs() <= 61,
                "{} Hz programmed as {} Hz",
                freq,
                back
            );
        }
    }

    #[test]
    fn test_set_opmode_preserves_high_bits() {
        let mut modem = sx1276_modem();
        modem.set_opmode(OPMODE_LORA).unwrap();
        assert_eq!(modem.bus_mut().register(REG_OPMODE), 0x80);
        modem.bus_mut().set_register(REG_OPMODE, 0x8D);
        modem.set_opmode(OPMODE_STANDBY).unwrap();
        assert_eq!(modem.bus_mut().register(REG_OPMODE), 0x89);
    }

    #[test]
    fn test_init_programs_modem() {
        let mut modem = sx1276_modem();
        modem.init(868_100_000, SpreadingFactor::Sf7, true).unwrap();
        let bus = modem.bus_mut();
        assert_eq!(bus.last_write(REG_SYNC_WORD), Some(SYNC_WORD_LORAWAN));
        assert_eq!(bus.last_write(REG_INVERTIQ), Some(INVERTIQ_RX));
        assert_eq!(bus.last_write(REG_MAX_PAYLOAD_LENGTH), Some(MAX_PAYLOAD_LENGTH));
        assert_eq!(bus.last_write(REG_PAYLOAD_LENGTH), Some(PAYLOAD_LENGTH));
        assert_eq!(bus.last_write(REG_HOP_PERIOD), Some(0x00));
        assert_eq!(bus.last_write(REG_PA_RAMP), Some(0x08));
        assert_eq!(bus.last_write(REG_PA_DAC_SX1276), Some(0x84));
        assert!(bus.writes_to(REG_PA_DAC_SX1272).is_empty());
        assert_eq!(bus.last_write(REG_IRQ_FLAGS_MASK), Some(0x00));
        assert_eq!(bus.last_write(REG_IRQ_FLAGS), Some(0xFF));
        // Sleep then LoRa mode, in that order, before anything else.
        assert_eq!(bus.writes_to(REG_OPMODE), vec![0x00, 0x80]);
    }

    #[test]
    fn test_init_uses_variant_pa_dac() {
        let mut modem = sx1272_modem();
        modem.init(868_100_000, SpreadingFactor::Sf7, true).unwrap();
        let bus = modem.bus_mut();
        assert_eq!(bus.last_write(REG_PA_DAC_SX1272), Some(0x84));
        assert!(bus.writes_to(REG_PA_DAC_SX1276).is_empty());
    }

    #[test]
    fn test_arm_cad_scanner_preserves_flags() {
        let mut modem = sx1276_modem();
        modem.init(868_100_000, SpreadingFactor::Sf7, true).unwrap();
        modem.bus_mut().clear_write_log();
        modem.bus_mut().raise_irq(IRQ_LORA_CDDETD_MASK);
        modem
            .arm_cad_scanner(868_100_000, SpreadingFactor::Sf7, true)
            .unwrap();
        let bus = modem.bus_mut();
        assert!(bus.writes_to(REG_IRQ_FLAGS).is_empty());
        assert_ne!(bus.register(REG_IRQ_FLAGS) & IRQ_LORA_CDDETD_MASK, 0);
        assert_eq!(bus.last_write(REG_IRQ_FLAGS_MASK), Some(CAD_IRQ_MASK));
        assert_eq!(bus.last_write(REG_DIO_MAPPING_1), Some(DIO_MAP_CAD));
        assert_eq!(bus.register(REG_OPMODE) & OPMODE_MASK, OPMODE_CAD);
    }

    #[test]
    fn test_arm_receiver_modes() {
        let mut modem = sx1276_modem();
        modem.init(868_100_000, SpreadingFactor::Sf7, true).unwrap();
        modem
            .arm_receiver(868_100_000, SpreadingFactor::Sf7, true, true, false)
            .unwrap();
        assert_eq!(
            modem.bus_mut().register(REG_OPMODE) & OPMODE_MASK,
            OPMODE_RX_SINGLE
        );
        assert_eq!(modem.bus_mut().last_write(REG_IRQ_FLAGS_MASK), Some(RX_IRQ_MASK));
        assert_eq!(modem.bus_mut().last_write(REG_DIO_MAPPING_1), Some(DIO_MAP_RX));

        modem
            .arm_receiver(868_100_000, SpreadingFactor::Sf7, true, false, false)
            .unwrap();
        assert_eq!(modem.bus_mut().register(REG_OPMODE) & OPMODE_MASK, OPMODE_RX);
    }

    #[test]
    fn test_transmit_sequence() {
        let mut modem = sx1276_modem();
        modem.init(869_525_000, SpreadingFactor::Sf9, true).unwrap();
        let request = OutboundRequest {
            payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
            target_us: 0,
            sf: SpreadingFactor::Sf9,
            power_dbm: 14,
            freq_hz: 869_525_000,
            crc: false,
            invert_iq: true,
        };
        modem.prepare_transmit(&request).unwrap();
        {
            let bus = modem.bus_mut();
            assert_eq!(bus.register(REG_OPMODE) & OPMODE_MASK, OPMODE_FSTX);
            assert_eq!(bus.last_write(REG_INVERTIQ), Some(INVERTIQ_TX_INVERTED));
            assert_eq!(bus.last_write(REG_DIO_MAPPING_1), Some(DIO_MAP_TX));
            assert_eq!(bus.last_write(REG_IRQ_FLAGS_MASK), Some(TX_IRQ_MASK));
            assert_eq!(bus.fifo_payload(), &[0xDE, 0xAD, 0xBE, 0xEF]);
            // CRC off in the request: MC2 carries no CRC bit.
            assert_eq!(bus.last_write(REG_MODEM_CONFIG2), Some(0x90));
        }

        modem.key_transmit(4).unwrap();
        let bus = modem.bus_mut();
        assert_eq!(bus.register(REG_OPMODE) & OPMODE_MASK, OPMODE_TX);
        assert_eq!(bus.last_write(REG_PAYLOAD_LENGTH), Some(4));
        assert_eq!(bus.last_write(REG_MAX_PAYLOAD_LENGTH), Some(MAX_PAYLOAD_LENGTH));
        // The simulated chip raises TXDONE as soon as TX is keyed.
        assert_ne!(bus.register(REG_IRQ_FLAGS) & IRQ_LORA_TXDONE_MASK, 0);
    }

    #[test]
    fn test_load_fifo_rejects_oversize() {
        let mut modem = sx1276_modem();
        let request = OutboundRequest {
            payload: vec![0u8; MAX_PAYLOAD_BYTES + 1],
            target_us: 0,
            sf: SpreadingFactor::Sf7,
            power_dbm: 14,
            freq_hz: 868_100_000,
            crc: true,
            invert_iq: false,
        };
        match modem.prepare_transmit(&request) {
            Err(RadioError::PacketTooLarge { size, max }) => {
                assert_eq!(size, MAX_PAYLOAD_BYTES + 1);
                assert_eq!(max, MAX_PAYLOAD_BYTES);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_read_fifo_payload() {
        let mut modem = sx1276_modem();
        modem.bus_mut().inject_rx_done(&[1, 2, 3, 4, 5], 40, 50);
        match modem.read_fifo().unwrap() {
            FifoRead::Payload(bytes) => assert_eq!(bytes, vec![1, 2, 3, 4, 5]),
            other => panic!("unexpected drain outcome: {other:?}"),
        }
        // All flags cleared after a successful drain.
        assert_eq!(modem.bus_mut().register(REG_IRQ_FLAGS), 0x00);
    }

    #[test]
    fn test_read_fifo_crc_error_keeps_flags() {
        let mut modem = sx1276_modem();
        modem.bus_mut().inject_rx_crc_error();
        assert_eq!(modem.read_fifo().unwrap(), FifoRead::CrcError);
        // The caller decides when to clear; the drain leaves them set.
        assert_ne!(
            modem.bus_mut().register(REG_IRQ_FLAGS) & IRQ_LORA_CRCERR_MASK,
            0
        );
    }

    #[test]
    fn test_read_fifo_no_header() {
        let mut modem = sx1276_modem();
        modem.bus_mut().raise_irq(IRQ_LORA_RXDONE_MASK);
        assert_eq!(modem.read_fifo().unwrap(), FifoRead::NoHeader);
        assert_eq!(
            modem.bus_mut().register(REG_IRQ_FLAGS)
                & (IRQ_LORA_HEADER_MASK | IRQ_LORA_RXDONE_MASK),
            0
        );
    }

    #[test]
    fn test_read_fifo_truncates_oversized_count() {
        let mut modem = sx1276_modem();
        modem.bus_mut().inject_rx_done(&[7u8; 20], 40, 50);
        modem.bus_mut().set_rx_byte_count(200);
        match modem.read_fifo().unwrap() {
            FifoRead::Payload(bytes) => assert_eq!(bytes.len(), MAX_PAYLOAD_BYTES),
            other => panic!("unexpected drain outcome: {other:?}"),
        }
    }

    #[test]
    fn test_read_packet_quality_applies_correction() {
        let mut modem = sx1276_modem();
        modem.bus_mut().set_register(REG_PKT_SNR_VALUE, 40);
        modem.bus_mut().set_register(REG_PKT_RSSI, 50);
        assert_eq!(modem.read_packet_quality().unwrap(), (10, -107));

        let mut modem = sx1272_modem();
        modem.bus_mut().set_register(REG_PKT_SNR_VALUE, 40);
        modem.bus_mut().set_register(REG_PKT_RSSI, 50);
        assert_eq!(modem.read_packet_quality().unwrap(), (10, -89));
    }
}
