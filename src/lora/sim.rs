//! In-memory register file for host-side runs and tests.
//!
//! `SimBus` implements [`RegisterBus`] over a plain byte array with just
//! enough chip behavior to drive the state machine: interrupt flags are
//! write-1-to-clear, FIFO reads pop a scripted payload, and keying the
//! transmitter raises the transmit-done flag. Events are injected by
//! poking flags and quality registers the way the silicon would.

use std::collections::VecDeque;

use super::bus::{RadioError, RegisterBus};
use super::registers::*;

/// Scripted register file implementing [`RegisterBus`].
pub struct SimBus {
    registers: [u8; 0x80],
    fifo_out: VecDeque<u8>,
    fifo_in: Vec<u8>,
    writes: Vec<(u8, u8)>,
}

impl SimBus {
    /// A bus whose version register already identifies an SX1276.
    pub fn sx1276() -> Self {
        Self::with_version(CHIP_VERSION_SX1276)
    }

    /// A bus whose version register already identifies an SX1272.
    pub fn sx1272() -> Self {
        Self::with_version(CHIP_VERSION_SX1272)
    }

    /// A bus reporting an arbitrary chip version.
    pub fn with_version(version: u8) -> Self {
        let mut registers = [0u8; 0x80];
        registers[REG_VERSION as usize] = version;
        Self {
            registers,
            fifo_out: VecDeque::new(),
            fifo_in: Vec::new(),
            writes: Vec::new(),
        }
    }

    // ==================== Scripting ====================

    /// Set a register to a raw value, bypassing write semantics.
    pub fn set_register(&mut self, addr: u8, value: u8) {
        self.registers[addr as usize] = value;
    }

    /// Raw register value.
    pub fn register(&self, addr: u8) -> u8 {
        self.registers[addr as usize]
    }

    /// Raise interrupt flag bits (OR into the flags register).
    pub fn raise_irq(&mut self, flags: u8) {
        self.registers[REG_IRQ_FLAGS as usize] |= flags;
    }

    /// Script a CAD-done event with the given instantaneous RSSI.
    pub fn inject_cad_done(&mut self, rssi: u8) {
        self.registers[REG_RSSI as usize] = rssi;
        self.raise_irq(IRQ_LORA_CDDONE_MASK);
    }

    /// Script a preamble-detect event with the given instantaneous RSSI.
    pub fn inject_preamble_detect(&mut self, rssi: u8) {
        self.registers[REG_RSSI as usize] = rssi;
        self.raise_irq(IRQ_LORA_CDDETD_MASK);
    }

    /// Script a completed reception: payload staged in the FIFO, byte
    /// count and quality registers set, RXDONE and HEADER raised.
    pub fn inject_rx_done(&mut self, payload: &[u8], snr_reg: u8, pkt_rssi_reg: u8) {
        self.fifo_out.clear();
        self.fifo_out.extend(payload.iter().copied());
        self.registers[REG_RX_NB_BYTES as usize] = payload.len() as u8;
        self.registers[REG_PKT_SNR_VALUE as usize] = snr_reg;
        self.registers[REG_PKT_RSSI as usize] = pkt_rssi_reg;
        self.raise_irq(IRQ_LORA_RXDONE_MASK | IRQ_LORA_HEADER_MASK);
    }

    /// Script a reception that failed its payload CRC.
    pub fn inject_rx_crc_error(&mut self) {
        self.raise_irq(IRQ_LORA_RXDONE_MASK | IRQ_LORA_HEADER_MASK | IRQ_LORA_CRCERR_MASK);
    }

    /// Script a receive timeout.
    pub fn inject_rx_timeout(&mut self) {
        self.raise_irq(IRQ_LORA_RXTOUT_MASK);
    }

    /// Override the reported FIFO byte count, for truncation scripting.
    pub fn set_rx_byte_count(&mut self, count: u8) {
        self.registers[REG_RX_NB_BYTES as usize] = count;
    }

    // ==================== Inspection ====================

    /// All single-register writes in order, oldest first.
    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, addr: u8) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }

    /// The last value written to a register, if any.
    pub fn last_write(&self, addr: u8) -> Option<u8> {
        self.writes_to(addr).last().copied()
    }

    /// Bytes loaded into the FIFO by burst writes.
    pub fn fifo_payload(&self) -> &[u8] {
        &self.fifo_in
    }

    /// Forget recorded writes, keeping register state.
    pub fn clear_write_log(&mut self) {
        self.writes.clear();
    }
}

impl RegisterBus for SimBus {
    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError> {
        if addr == REG_FIFO {
            return Ok(self.fifo_out.pop_front().unwrap_or(0));
        }
        Ok(self.registers[addr as usize])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        self.writes.push((addr, value));
        match addr {
            // Interrupt flags are write-1-to-clear.
            REG_IRQ_FLAGS => self.registers[addr as usize] &= !value,
            REG_FIFO => self.fifo_in.push(value),
            REG_OPMODE => {
                self.registers[addr as usize] = value;
                // Keying the transmitter completes instantly.
                if value & OPMODE_MASK == OPMODE_TX {
                    self.registers[REG_IRQ_FLAGS as usize] |= IRQ_LORA_TXDONE_MASK;
                }
            }
            _ => self.registers[addr as usize] = value,
        }
        Ok(())
    }

    fn write_buffer(&mut self, addr: u8, data: &[u8]) -> Result<(), RadioError> {
        if addr == REG_FIFO {
            self.fifo_in.extend_from_slice(data);
        }
        Ok(())
    }
}
