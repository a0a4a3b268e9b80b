//! The radio state machine.
//!
//! One [`Gateway`] owns the modem, the clock, and all mutable radio
//! state, and advances through INIT, SCAN, CAD, RX, TX and TXDONE on
//! each evaluation pass. A pass is triggered by the event flag (posted
//! from interrupt context or by a queued downlink) or runs periodically
//! so that elapsed-time transitions fire even when no interrupt ever
//! arrives. In hopping mode that is the common case: dwell time per
//! channel is far shorter than most transmissions, so the machine
//! synthesizes "nothing heard, next channel" hops from the event and
//! CAD-done timers.
//!
//! All register access happens inside the evaluation pass. Interrupt
//! handlers only post the flag.

use log::{debug, info, warn};
use std::sync::Arc;

use super::bus::{RadioError, RegisterBus};
use super::clock::MonotonicClock;
use super::config::GatewayConfig;
use super::context::{EventFlag, RadioContext, RadioState};
use super::modem::{FifoRead, Modem, DIO_MAP_RX, RX_IRQ_MASK};
use super::packet::{InboundPacket, OutboundRequest};
use super::plan::SpreadingFactor;
use super::registers::*;
use super::scheduler;
use crate::network::{GatewayStats, PacketRecord};

// ==================== Gateway ====================

/// Single-channel LoRa gateway radio core.
///
/// Generic over the register bus (SPI on hardware, [`crate::lora::sim::SimBus`]
/// in tests) and the clock, so the full receive/transmit cycle runs
/// deterministically off-target.
pub struct Gateway<B: RegisterBus, C: MonotonicClock> {
    modem: Modem<B>,
    config: GatewayConfig,
    clock: C,
    context: RadioContext,
    /// Seconds timestamp of the last quiet-period re-arm.
    last_restart_secs: u64,
}

impl<B: RegisterBus, C: MonotonicClock> Gateway<B, C> {
    pub fn new(modem: Modem<B>, config: GatewayConfig, clock: C, stats: Arc<GatewayStats>) -> Self {
        let context = RadioContext::new(&config, stats);
        Self {
            modem,
            config,
            clock,
            context,
            last_restart_secs: 0,
        }
    }

    // -------------------- inspection & hand-off --------------------

    pub fn state(&self) -> RadioState {
        self.context.state
    }

    pub fn spreading_factor(&self) -> SpreadingFactor {
        self.context.sf
    }

    pub fn channel(&self) -> usize {
        self.context.channel()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.context.stats)
    }

    /// Flag handle for DIO interrupt handlers and wakeups.
    pub fn event_flag(&self) -> EventFlag {
        self.context.flag.clone()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Direct bus access, for bring-up diagnostics and simulation.
    pub fn bus_mut(&mut self) -> &mut B {
        self.modem.bus_mut()
    }

    /// Queue a downlink. The next evaluation pass switches to TX.
    pub fn queue_downlink(&mut self, request: OutboundRequest) -> Result<(), RadioError> {
        self.context.queue_outbound(request)
    }

    /// Collect the most recent completed reception, if any.
    pub fn take_inbound(&mut self) -> Option<InboundPacket> {
        self.context.take_inbound()
    }

    // -------------------- bring-up --------------------

    /// Full modem bring-up: initialize, then arm the CAD scanner or the
    /// continuous receiver depending on the configured mode. Also the
    /// recovery path when TXDONE never confirms.
    pub fn start_receiver(&mut self) -> Result<(), RadioError> {
        self.modem
            .init(self.context.frequency_hz(), self.context.sf, true)?;
        if self.config.cad {
            self.context.state = RadioState::Scan;
            self.context.sf = self.context.cursor.current().uplink_min_sf;
            self.rearm_scanner()?;
        } else {
            self.context.state = RadioState::Rx;
            self.rearm_receiver()?;
        }
        self.modem.write_irq_mask(0x00)?;
        self.modem.clear_irq_flags(0xFF)?;
        info!(
            "Receiver started: channel {} at {} Hz, {}, {}",
            self.context.channel(),
            self.context.frequency_hz(),
            self.context.sf,
            if self.config.cad { "CAD" } else { "continuous RX" }
        );
        Ok(())
    }

    // -------------------- evaluation --------------------

    /// One state machine pass.
    ///
    /// Reads the interrupt flags through the mask, consumes the event
    /// flag, and dispatches on the current state. Runs to completion;
    /// at most one state transition's register work per pass.
    pub fn evaluate(&mut self) -> Result<(), RadioError> {
        let flags = self.modem.read_irq_flags()?;
        let mask = self.modem.read_irq_mask()?;
        let intr = flags & !mask;
        self.context.flag.take();

        // A queued downlink preempts scanning and receiving; an
        // in-flight transmission finishes first.
        if self.context.has_outbound()
            && !matches!(self.context.state, RadioState::Tx | RadioState::TxDone)
        {
            debug!("Downlink pending, leaving {} for TX", self.context.state);
            self.context.state = RadioState::Tx;
        }

        if self.config.hop && intr == 0x00 && self.soft_hop()? {
            return Ok(());
        }

        match self.context.state {
            RadioState::Init => self.on_init(),
            RadioState::Scan => self.on_scan(intr),
            RadioState::Cad => self.on_cad(intr),
            RadioState::Rx => self.on_rx(intr),
            RadioState::Tx => self.on_tx(),
            RadioState::TxDone => self.on_tx_done(intr),
        }
    }

    /// Hop-mode timeout check, run when a pass finds no interrupt.
    ///
    /// Only SCAN and CAD hop on timeout; in RX and the TX states an
    /// interrupt is still expected and the dwell must not be cut short.
    /// Returns `true` when a hop consumed the pass.
    fn soft_hop(&mut self) -> Result<bool, RadioError> {
        if !matches!(self.context.state, RadioState::Scan | RadioState::Cad) {
            return Ok(false);
        }

        let event_wait = self.config.event_wait_us;
        let done_wait = self.config.done_wait_us * self.context.sf.done_wait_factor();

        let now = self.clock.now_us();
        // Re-baseline after a counter wrap instead of comparing across
        // the lap.
        if self.context.event_time > now {
            self.context.event_time = now;
        }
        if self.context.done_time > now {
            self.context.done_time = now;
        }

        if now - self.context.done_time > done_wait {
            debug!(
                "No CAD-done within {} us on channel {}, hopping",
                done_wait,
                self.context.channel()
            );
            self.hop_and_rescan()?;
            return Ok(true);
        }
        if now - self.context.event_time > event_wait {
            debug!(
                "No event within {} us on channel {}, hopping",
                event_wait,
                self.context.channel()
            );
            self.hop_and_rescan()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Advance the channel plan cursor, retune, and restart the scan at
    /// the new channel's minimum SF.
    fn hop_and_rescan(&mut self) -> Result<(), RadioError> {
        self.context.state = RadioState::Scan;
        self.context.sf = self.context.cursor.advance();
        self.modem
            .apply_hop(self.context.frequency_hz(), self.context.sf, true)?;
        self.rearm_scanner()?;
        let now = self.clock.now_us();
        self.context.event_time = now;
        self.context.done_time = now;
        Ok(())
    }

    // -------------------- state handlers --------------------

    fn on_init(&mut self) -> Result<(), RadioError> {
        debug!("State INIT: clearing interrupts");
        self.modem.clear_irq_flags(0xFF)?;
        self.modem.write_irq_mask(0x00)?;
        self.context.state = RadioState::Scan;
        Ok(())
    }

    fn on_scan(&mut self, intr: u8) -> Result<(), RadioError> {
        if intr & IRQ_LORA_CDDETD_MASK != 0 {
            // Preamble found while scanning. Arm the receiver before
            // anything else; the packet is already in the air.
            self.context.state = RadioState::Rx;
            self.modem.write_dio_mapping(DIO_MAP_RX)?;
            self.modem.write_irq_mask(RX_IRQ_MASK)?;
            let rssi = self.modem.read_current_rssi()?;
            self.context.detect_time = self.clock.now_us();
            debug!(
                "Preamble detected: channel {}, {}, rssi {}",
                self.context.channel(),
                self.context.sf,
                rssi
            );
            self.modem.clear_irq_flags(0xFF)?;
            self.modem.set_opmode(OPMODE_RX_SINGLE)?;
        } else if intr & IRQ_LORA_CDDONE_MASK != 0 {
            self.modem.set_opmode(OPMODE_CAD)?;
            let rssi = self.modem.read_current_rssi()?;
            if rssi > self.config.effective_rssi_threshold() {
                debug!(
                    "Activity on channel {} at rssi {}, confirming SF",
                    self.context.channel(),
                    rssi
                );
                self.context.state = RadioState::Cad;
            } else {
                self.context.state = RadioState::Scan;
            }
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
            self.context.done_time = self.clock.now_us();
        } else if intr == 0x00 {
            // Soft wakeup with nothing to do.
        } else {
            warn!("Unexpected interrupt 0x{:02X} in SCAN", intr);
            self.context.state = RadioState::Scan;
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
        }
        Ok(())
    }

    fn on_cad(&mut self, intr: u8) -> Result<(), RadioError> {
        if intr & IRQ_LORA_CDDETD_MASK != 0 {
            // SF confirmed. Same receiver arm as in SCAN, with a settle
            // pause so the RSSI read after the mode switch means
            // something.
            self.modem.write_dio_mapping(DIO_MAP_RX)?;
            self.modem.write_irq_mask(RX_IRQ_MASK)?;
            self.modem.clear_irq_flags(0xFF)?;
            self.modem.set_opmode(OPMODE_RX_SINGLE)?;
            self.clock.delay_us(self.config.rssi_settle_us);
            let rssi = self.modem.read_current_rssi()?;
            self.context.detect_time = self.clock.now_us();
            debug!(
                "{} confirmed on channel {}, rssi {}",
                self.context.sf,
                self.context.channel(),
                rssi
            );
            self.context.state = RadioState::Rx;
        } else if intr & IRQ_LORA_CDDONE_MASK != 0 {
            if self.context.sf < self.context.cursor.current().uplink_max_sf {
                // Activity but no lock at this SF, try the next one up.
                self.context.sf = self.context.sf.next();
                self.modem.set_rate(self.context.sf, true)?;
                self.modem.write_irq_mask(0x00)?;
                self.modem.clear_irq_flags(0xFF)?;
                self.modem.set_opmode(OPMODE_CAD)?;
                self.clock.delay_us(self.config.rssi_settle_us);
                let rssi = self.modem.read_current_rssi()?;
                debug!(
                    "CAD at {} on channel {}, rssi {}",
                    self.context.sf,
                    self.context.channel(),
                    rssi
                );
            } else {
                // Sweep exhausted without a detect, back to scanning.
                self.context.flag.post();
                self.modem.write_irq_mask(0x00)?;
                self.modem.clear_irq_flags(0xFF)?;
                self.context.state = RadioState::Scan;
                self.context.sf = self.context.cursor.current().uplink_min_sf;
                self.rearm_scanner()?;
            }
            self.context.done_time = self.clock.now_us();
        } else if intr == 0x00 {
            // Stay in CAD until the detect or done interrupt lands.
            self.context.flag.post();
        } else {
            warn!("Unexpected interrupt 0x{:02X} in CAD, rescanning", intr);
            self.context.state = RadioState::Scan;
            self.context.sf = self.context.cursor.current().uplink_min_sf;
            self.rearm_scanner()?;
            self.context.flag.post();
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
        }
        Ok(())
    }

    fn on_rx(&mut self, intr: u8) -> Result<(), RadioError> {
        if intr & IRQ_LORA_RXDONE_MASK != 0 {
            // The CRC error flag is only valid after receive-done.
            if self.config.crc_check && intr & IRQ_LORA_CRCERR_MASK != 0 {
                debug!("Receive-done with CRC error, discarding");
                if self.config.cad {
                    self.context.sf = self.context.cursor.current().uplink_min_sf;
                    self.context.state = RadioState::Scan;
                    self.rearm_scanner()?;
                } else {
                    self.context.state = RadioState::Rx;
                    self.rearm_receiver()?;
                }
                self.modem.write_irq_mask(0x00)?;
                self.modem.clear_irq_flags(
                    IRQ_LORA_RXDONE_MASK
                        | IRQ_LORA_RXTOUT_MASK
                        | IRQ_LORA_HEADER_MASK
                        | IRQ_LORA_CRCERR_MASK,
                )?;
                return Ok(());
            }

            self.context.stats.record_seen();
            match self.modem.read_fifo()? {
                FifoRead::Payload(payload) => self.complete_reception(payload)?,
                FifoRead::CrcError | FifoRead::NoHeader => {
                    self.context.flag.post();
                    self.modem.write_irq_mask(0x00)?;
                    self.modem.clear_irq_flags(0xFF)?;
                    self.context.state = RadioState::Scan;
                }
            }
        } else if intr & IRQ_LORA_RXTOUT_MASK != 0 {
            // The dominant outcome in hopping mode: receive started too
            // late into the message.
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
            if self.config.cad || self.config.hop {
                self.context.sf = self.context.cursor.current().uplink_min_sf;
                self.rearm_scanner()?;
                self.context.state = RadioState::Scan;
            } else {
                self.context.state = RadioState::Rx;
                self.rearm_receiver()?;
            }
            let now = self.clock.now_us();
            self.context.event_time = now;
            self.context.done_time = now;
        } else if intr & IRQ_LORA_HEADER_MASK != 0 {
            // Header alone normally precedes receive-done. Nothing to
            // do yet.
            debug!("Header received, awaiting receive-done");
        } else if intr != 0x00 {
            debug!("Unexpected interrupt 0x{:02X} in RX, waiting it out", intr);
        }
        Ok(())
    }

    /// Drain succeeded: read the quality registers, hand the packet
    /// off, and get back to listening before returning.
    fn complete_reception(&mut self, payload: Vec<u8>) -> Result<(), RadioError> {
        let (snr, rssi) = self.modem.read_packet_quality()?;
        let sf = SpreadingFactor::from_u8(self.modem.read_configured_sf()?)
            .unwrap_or(self.context.sf);
        let channel = self.context.channel();
        let now = self.clock.now_us();
        info!(
            "Received {} bytes: channel {}, {}, rssi {} dBm, snr {} dB, dT {} us",
            payload.len(),
            channel,
            sf,
            rssi,
            snr,
            now.wrapping_sub(self.context.detect_time)
        );
        self.context.stats.record_received(PacketRecord {
            secs: self.clock.now_secs(),
            channel,
            sf,
            rssi_dbm: rssi,
            snr_db: snr,
            len: payload.len(),
        });
        self.context.set_inbound(InboundPacket {
            payload,
            rssi_dbm: rssi,
            snr_db: snr,
            sf,
            channel,
            received_us: now,
        });

        if self.config.cad || self.config.hop {
            self.context.state = RadioState::Scan;
            self.context.sf = self.context.cursor.current().uplink_min_sf;
            self.rearm_scanner()?;
        } else {
            self.context.state = RadioState::Rx;
            self.rearm_receiver()?;
        }
        self.modem.write_irq_mask(0x00)?;
        self.modem.clear_irq_flags(0xFF)?;
        self.context.event_time = self.clock.now_us();
        Ok(())
    }

    fn on_tx(&mut self) -> Result<(), RadioError> {
        self.modem.write_irq_mask(0x00)?;
        self.modem.clear_irq_flags(0xFF)?;
        if let Some(request) = self.context.take_outbound() {
            self.transmit(&request)?;
        } else {
            warn!("TX state without a queued downlink");
        }
        self.context.state = RadioState::TxDone;
        self.context.flag.post();
        Ok(())
    }

    /// Stage, schedule and key one downlink.
    fn transmit(&mut self, request: &OutboundRequest) -> Result<(), RadioError> {
        self.modem.prepare_transmit(request)?;
        match scheduler::wait_until(
            &self.clock,
            request.target_us,
            request.sf,
            self.config.tx_delay_us,
            self.config.sf7_tx_adjust_us,
        ) {
            Ok(()) => {}
            Err(RadioError::MissedWindow { target, now }) => {
                warn!(
                    "Downlink window missed by {} us, transmitting late",
                    now.wrapping_sub(target)
                );
            }
            Err(other) => return Err(other),
        }
        self.modem.key_transmit(request.payload.len() as u8)?;
        self.context.send_time = self.clock.now_us();
        Ok(())
    }

    fn on_tx_done(&mut self, intr: u8) -> Result<(), RadioError> {
        if intr & IRQ_LORA_TXDONE_MASK != 0 {
            let now = self.clock.now_us();
            info!(
                "Transmit done after {} us",
                now.wrapping_sub(self.context.send_time)
            );
            self.context.stats.record_transmitted(self.context.channel());
            if self.config.cad || self.config.hop {
                self.context.state = RadioState::Scan;
                self.context.sf = self.context.cursor.current().uplink_min_sf;
                self.rearm_scanner()?;
            } else {
                self.context.state = RadioState::Rx;
                self.rearm_receiver()?;
            }
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
        } else if intr != 0x00 {
            warn!(
                "Unexpected interrupt 0x{:02X} while awaiting transmit-done",
                intr
            );
            self.modem.write_irq_mask(0x00)?;
            self.modem.clear_irq_flags(0xFF)?;
            self.context.state = RadioState::Scan;
        } else {
            // The chip raises transmit-done within its rated time on
            // air; its absence means the chip is stuck.
            let now = self.clock.now_us();
            if self.context.send_time > now {
                self.context.send_time = 0;
            }
            if now - self.context.send_time > self.config.tx_done_timeout_us {
                warn!(
                    "No transmit-done within {} us, restarting the receiver",
                    self.config.tx_done_timeout_us
                );
                self.start_receiver()?;
            }
        }
        Ok(())
    }

    // -------------------- watchdog --------------------

    /// Re-arm the radio after a quiet period, once per quiet period.
    ///
    /// A receiver that has heard nothing for a long stretch may have
    /// silently deafened; re-arming is cheap compared to a missed
    /// message. Returns whether a re-arm happened.
    pub fn check_quiet_watchdog(&mut self) -> Result<bool, RadioError> {
        let now_secs = self.clock.now_secs();
        let last_message = self.context.stats.last_message_secs();
        if now_secs.saturating_sub(last_message) <= self.config.quiet_restart_secs
            || self.last_restart_secs > last_message
        {
            return Ok(false);
        }

        info!(
            "No traffic for {} s, re-arming the radio",
            now_secs.saturating_sub(last_message)
        );
        if self.config.cad || self.config.hop {
            self.context.state = RadioState::Scan;
            self.context.sf = self.context.cursor.current().uplink_min_sf;
            self.rearm_scanner()?;
        } else {
            self.context.state = RadioState::Rx;
            self.rearm_receiver()?;
        }
        self.modem.write_irq_mask(0x00)?;
        self.modem.clear_irq_flags(0xFF)?;
        self.last_restart_secs = now_secs;
        Ok(true)
    }

    // -------------------- arming helpers --------------------

    fn rearm_scanner(&mut self) -> Result<(), RadioError> {
        self.modem
            .arm_cad_scanner(self.context.frequency_hz(), self.context.sf, true)
    }

    fn rearm_receiver(&mut self) -> Result<(), RadioError> {
        self.modem.arm_receiver(
            self.context.frequency_hz(),
            self.context.sf,
            true,
            self.config.cad,
            self.config.hop,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::clock::TestClock;
    use crate::lora::sim::SimBus;
    use std::sync::atomic::Ordering;

    const START_US: u32 = 1_000_000;

    fn gateway(config: GatewayConfig) -> Gateway<SimBus, TestClock> {
        let stats = Arc::new(GatewayStats::new(config.region.channel_plan().len()));
        let modem = Modem::probe(SimBus::sx1276()).unwrap();
        Gateway::new(modem, config, TestClock::starting_at(START_US), stats)
    }

    fn cad_gateway() -> Gateway<SimBus, TestClock> {
        let mut gw = gateway(GatewayConfig::default());
        gw.start_receiver().unwrap();
        gw
    }

    fn hop_gateway() -> Gateway<SimBus, TestClock> {
        let mut gw = gateway(GatewayConfig {
            hop: true,
            ..GatewayConfig::default()
        });
        gw.start_receiver().unwrap();
        // The boot pass hops once because the timers start at zero.
        gw.context.event_time = START_US;
        gw.context.done_time = START_US;
        gw
    }

    fn fixed_gateway() -> Gateway<SimBus, TestClock> {
        let mut gw = gateway(GatewayConfig {
            cad: false,
            ..GatewayConfig::default()
        });
        gw.start_receiver().unwrap();
        gw
    }

    fn downlink(target_us: u32) -> OutboundRequest {
        OutboundRequest {
            payload: vec![0xA5, 0x5A, 0x3C],
            target_us,
            sf: SpreadingFactor::Sf9,
            power_dbm: 14,
            freq_hz: 869_525_000,
            crc: true,
            invert_iq: true,
        }
    }

    fn enter_rx(gw: &mut Gateway<SimBus, TestClock>) {
        gw.bus_mut().inject_preamble_detect(60);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Rx);
    }

    #[test]
    fn test_start_receiver_arms_scanner() {
        let mut gw = cad_gateway();
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf7);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS_MASK), 0x00);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS), 0x00);
    }

    #[test]
    fn test_start_receiver_fixed_mode_arms_continuous_rx() {
        let mut gw = fixed_gateway();
        assert_eq!(gw.state(), RadioState::Rx);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x85));
    }

    #[test]
    fn test_init_state_clears_and_moves_to_scan() {
        let mut gw = gateway(GatewayConfig::default());
        gw.bus_mut().raise_irq(0xFF);
        assert_eq!(gw.state(), RadioState::Init);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS), 0x00);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS_MASK), 0x00);
    }

    #[test]
    fn test_cad_done_below_threshold_stays_scanning() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(20);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        // The scanner was put back into CAD mode.
        assert!(gw.bus_mut().writes_to(REG_OPMODE).contains(&0x87));
    }

    #[test]
    fn test_cad_done_above_threshold_promotes_to_cad() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Cad);
        assert_eq!(gw.context.done_time, START_US);
    }

    #[test]
    fn test_hop_penalty_lowers_cad_threshold() {
        // Raw RSSI 30 is below the fixed threshold of 35 but above the
        // hop-adjusted 35 - 7.
        let mut fixed = cad_gateway();
        fixed.bus_mut().inject_cad_done(30);
        fixed.evaluate().unwrap();
        assert_eq!(fixed.state(), RadioState::Scan);

        let mut hopping = hop_gateway();
        hopping.bus_mut().inject_cad_done(30);
        hopping.evaluate().unwrap();
        assert_eq!(hopping.state(), RadioState::Cad);
    }

    #[test]
    fn test_preamble_detect_in_scan_enters_rx() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_preamble_detect(60);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Rx);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x86));
        assert_eq!(gw.bus_mut().last_write(REG_DIO_MAPPING_1), Some(DIO_MAP_RX));
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS_MASK), RX_IRQ_MASK);
        assert_eq!(gw.context.detect_time, START_US);
    }

    #[test]
    fn test_cad_done_in_cad_increments_sf() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Cad);

        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Cad);
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf8);
        // SF8 with CRC on.
        assert_eq!(gw.bus_mut().last_write(REG_MODEM_CONFIG2), Some(0x84));
    }

    #[test]
    fn test_cad_sweep_exhausted_resets_to_scan() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        // SF7 through SF12.
        for _ in 0..5 {
            gw.bus_mut().inject_cad_done(50);
            gw.evaluate().unwrap();
        }
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf12);
        assert_eq!(gw.state(), RadioState::Cad);

        // One more CAD-done at the channel maximum ends the sweep.
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf7);
        assert!(gw.event_flag().is_set());
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
    }

    #[test]
    fn test_preamble_detect_in_cad_waits_for_rssi_settle() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();

        gw.bus_mut().inject_preamble_detect(70);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Rx);
        // The settle pause ran before the RSSI read.
        assert_eq!(gw.clock().now_us(), START_US + 6);
        assert_eq!(gw.context.detect_time, START_US + 6);
    }

    #[test]
    fn test_rx_done_delivers_packet_and_rearms() {
        let mut gw = cad_gateway();
        enter_rx(&mut gw);

        let payload: Vec<u8> = (0..20).collect();
        // SNR register 40 -> 10 dB, packet RSSI 50 - 157 -> -107 dBm.
        gw.bus_mut().inject_rx_done(&payload, 40, 50);
        gw.evaluate().unwrap();

        let packet = gw.take_inbound().expect("packet");
        assert_eq!(packet.payload.len(), 20);
        assert_eq!(packet.payload, payload);
        assert_eq!(packet.snr_db, 10);
        assert_eq!(packet.rssi_dbm, -107);
        assert_eq!(packet.sf, SpreadingFactor::Sf7);
        assert_eq!(packet.channel, 0);

        let stats = gw.stats();
        assert_eq!(stats.messages_seen.load(Ordering::Relaxed), 1);
        assert_eq!(stats.messages_ok.load(Ordering::Relaxed), 1);
        assert_eq!(stats.per_sf[0].load(Ordering::Relaxed), 1);

        // Back to scanning.
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
    }

    #[test]
    fn test_rx_done_with_crc_error_discards() {
        let mut gw = cad_gateway();
        enter_rx(&mut gw);

        gw.bus_mut().inject_rx_crc_error();
        gw.evaluate().unwrap();

        assert!(gw.take_inbound().is_none());
        assert_eq!(gw.state(), RadioState::Scan);
        // The early CRC branch runs before the drain is attempted.
        assert_eq!(gw.stats().messages_seen.load(Ordering::Relaxed), 0);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS), 0x00);
    }

    #[test]
    fn test_rx_done_crc_error_fixed_mode_rearms_receiver() {
        let mut gw = fixed_gateway();
        gw.bus_mut().inject_rx_crc_error();
        gw.evaluate().unwrap();
        assert!(gw.take_inbound().is_none());
        assert_eq!(gw.state(), RadioState::Rx);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x85));
    }

    #[test]
    fn test_rx_done_crc_error_without_check_still_drops() {
        let mut gw = gateway(GatewayConfig {
            crc_check: false,
            ..GatewayConfig::default()
        });
        gw.start_receiver().unwrap();
        enter_rx(&mut gw);

        gw.bus_mut().inject_rx_crc_error();
        gw.evaluate().unwrap();

        // The drain itself refuses the payload; the attempt is counted.
        assert!(gw.take_inbound().is_none());
        assert_eq!(gw.stats().messages_seen.load(Ordering::Relaxed), 1);
        assert_eq!(gw.state(), RadioState::Scan);
        assert!(gw.event_flag().is_set());
    }

    #[test]
    fn test_rx_timeout_rearms_scanner() {
        let mut gw = cad_gateway();
        enter_rx(&mut gw);

        gw.clock().advance_us(500);
        gw.bus_mut().inject_rx_timeout();
        gw.evaluate().unwrap();

        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf7);
        assert_eq!(gw.context.event_time, START_US + 500);
        assert_eq!(gw.context.done_time, START_US + 500);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
    }

    #[test]
    fn test_rx_timeout_fixed_mode_rearms_receiver() {
        let mut gw = fixed_gateway();
        gw.bus_mut().inject_rx_timeout();
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Rx);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x85));
    }

    #[test]
    fn test_queued_downlink_transmits_at_target() {
        let mut gw = cad_gateway();
        gw.queue_downlink(downlink(START_US + 5_000)).unwrap();
        assert!(gw.event_flag().is_set());

        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::TxDone);
        // The scheduler waited out the window before keying.
        assert_eq!(gw.clock().now_us(), START_US + 5_000);
        assert_eq!(gw.bus_mut().fifo_payload(), vec![0xA5, 0x5A, 0x3C]);
        assert_eq!(gw.context.send_time, START_US + 5_000);
        assert!(gw.event_flag().is_set());

        // The simulated chip raises TXDONE as soon as TX is keyed.
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        let stats = gw.stats();
        assert_eq!(stats.messages_down.load(Ordering::Relaxed), 1);
        assert_eq!(
            stats.per_channel[0].transmitted.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_missed_window_transmits_immediately() {
        let mut gw = cad_gateway();
        gw.queue_downlink(downlink(START_US - 400_000)).unwrap();
        gw.evaluate().unwrap();

        assert_eq!(gw.state(), RadioState::TxDone);
        // No waiting happened.
        assert_eq!(gw.clock().now_us(), START_US);
        assert_eq!(gw.context.send_time, START_US);
    }

    #[test]
    fn test_downlink_preempts_cad_confirmation() {
        let mut gw = cad_gateway();
        gw.bus_mut().inject_cad_done(50);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Cad);

        gw.queue_downlink(downlink(START_US + 1_000)).unwrap();
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::TxDone);
    }

    #[test]
    fn test_stuck_txdone_restarts_receiver() {
        let mut gw = cad_gateway();
        gw.queue_downlink(downlink(START_US + 1_000)).unwrap();
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::TxDone);

        // Suppress the simulated TXDONE and let the timeout expire.
        gw.bus_mut().set_register(REG_IRQ_FLAGS, 0x00);
        gw.bus_mut().clear_write_log();
        gw.clock().advance_us(7_000_001);
        gw.evaluate().unwrap();

        assert_eq!(gw.state(), RadioState::Scan);
        // Full bring-up ran again: sleep, then LoRa mode.
        assert!(gw.bus_mut().writes_to(REG_OPMODE).contains(&0x80));
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
    }

    #[test]
    fn test_txdone_within_timeout_keeps_waiting() {
        let mut gw = cad_gateway();
        gw.queue_downlink(downlink(START_US + 1_000)).unwrap();
        gw.evaluate().unwrap();

        gw.bus_mut().set_register(REG_IRQ_FLAGS, 0x00);
        gw.clock().advance_us(1_000_000);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::TxDone);
    }

    #[test]
    fn test_unexpected_interrupt_in_txdone_forces_scan() {
        let mut gw = cad_gateway();
        gw.queue_downlink(downlink(START_US + 1_000)).unwrap();
        gw.evaluate().unwrap();

        gw.bus_mut().set_register(REG_IRQ_FLAGS, 0x00);
        gw.bus_mut().raise_irq(IRQ_LORA_CDDONE_MASK);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS), 0x00);
    }

    #[test]
    fn test_unexpected_interrupt_in_scan_clears_flags() {
        let mut gw = cad_gateway();
        gw.bus_mut().raise_irq(IRQ_LORA_FHSSCH_MASK);
        gw.evaluate().unwrap();
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.bus_mut().register(REG_IRQ_FLAGS), 0x00);
    }

    #[test]
    fn test_soft_hop_advances_channel() {
        let mut gw = hop_gateway();
        assert_eq!(gw.channel(), 0);

        // Quiet for longer than the SF7 done-wait.
        gw.clock().advance_us(2_000);
        gw.evaluate().unwrap();
        assert_eq!(gw.channel(), 1);
        assert_eq!(gw.state(), RadioState::Scan);
        assert_eq!(gw.spreading_factor(), SpreadingFactor::Sf7);
        // Timers were rebased at the hop.
        assert_eq!(gw.context.done_time, START_US + 2_000);
        assert_eq!(gw.bus_mut().last_write(REG_OPMODE), Some(0x87));
    }

    #[test]
    fn test_soft_hop_honors_sf_scaled_done_wait() {
        let mut gw = hop_gateway();
        gw.context.sf = SpreadingFactor::Sf12;

        // Under both the SF12 done-wait (1950 * 32) and the event wait.
        gw.clock().advance_us(10_000);
        gw.evaluate().unwrap();
        assert_eq!(gw.channel(), 0);

        // Still under the done-wait but past the 15 ms event wait.
        gw.clock().advance_us(6_000);
        gw.evaluate().unwrap();
        assert_eq!(gw.channel(), 1);
    }

    #[test]
    fn test_soft_hop_skips_rx_state() {
        let mut gw = hop_gateway();
        enter_rx(&mut gw);
        gw.bus_mut().set_register(REG_IRQ_FLAGS, 0x00);

        gw.clock().advance_us(60_000);
        gw.evaluate().unwrap();
        // RX dwell is never cut short by the hop timers.
        assert_eq!(gw.channel(), 0);
        assert_eq!(gw.state(), RadioState::Rx);
    }

    #[test]
    fn test_soft_hop_wraps_around_plan() {
        let mut gw = hop_gateway();
        let plan_len = gw.context.cursor.plan_len();
        for _ in 0..plan_len {
            gw.clock().advance_us(2_000);
            gw.evaluate().unwrap();
        }
        assert_eq!(gw.channel(), 0);
    }

    #[test]
    fn test_quiet_watchdog_rearms_once_per_quiet_period() {
        let mut gw = cad_gateway();
        gw.clock().set_us(20_000_000);

        assert!(gw.check_quiet_watchdog().unwrap());
        assert_eq!(gw.state(), RadioState::Scan);

        // Second check in the same quiet period does nothing.
        gw.clock().set_us(40_000_000);
        assert!(!gw.check_quiet_watchdog().unwrap());
    }

    #[test]
    fn test_quiet_watchdog_waits_for_interval() {
        let mut gw = cad_gateway();
        gw.clock().set_us(10_000_000);
        assert!(!gw.check_quiet_watchdog().unwrap());
    }
}
