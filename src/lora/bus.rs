//! Register transport contract for the SX127x.
//!
//! The chip is driven through single-byte register reads/writes and burst
//! writes over SPI. Each operation is one bus transaction: chip select
//! asserted, address byte with the read/write bit, data, chip select
//! released. Callers must not interleave transactions from concurrent
//! contexts; all register access happens from the single state machine
//! evaluation pass.
//!
//! The trait keeps the modem layer and state machine host-testable: the
//! ESP32 build provides an SPI-backed implementation, tests and the host
//! demo use an in-memory simulated bus.

use std::fmt;

/// Bit 7 of the address byte selects write (set) or read (clear).
pub const SPI_WRITE_BIT: u8 = 0x80;

/// Register-level access to the radio.
pub trait RegisterBus {
    /// Read one register.
    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError>;

    /// Write one register.
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError>;

    /// Burst-write consecutive bytes starting at `addr` (FIFO loading).
    fn write_buffer(&mut self, addr: u8, data: &[u8]) -> Result<(), RadioError>;
}

/// Errors from the radio driver stack.
#[derive(Debug)]
pub enum RadioError {
    /// SPI communication error.
    #[cfg(feature = "esp32")]
    Spi(esp_idf_sys::EspError),
    /// GPIO error.
    #[cfg(feature = "esp32")]
    Gpio(esp_idf_sys::EspError),
    /// Version register did not identify a supported chip family.
    UnknownChip { version: u8 },
    /// Outbound payload exceeds the FIFO transmit region.
    PacketTooLarge { size: usize, max: usize },
    /// Transmit target timestamp already passed when scheduling began.
    MissedWindow { target: u32, now: u32 },
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "esp32")]
            Self::Spi(e) => write!(f, "SPI error: {:?}", e),
            #[cfg(feature = "esp32")]
            Self::Gpio(e) => write!(f, "GPIO error: {:?}", e),
            Self::UnknownChip { version } => {
                write!(f, "unknown transceiver, version register 0x{:02X}", version)
            }
            Self::PacketTooLarge { size, max } => {
                write!(f, "packet too large: {} bytes (max {})", size, max)
            }
            Self::MissedWindow { target, now } => {
                write!(f, "transmit window missed: target {} us, now {} us", target, now)
            }
        }
    }
}

impl std::error::Error for RadioError {}
