//! SPI transport and control pins for the SX127x on ESP32.
//!
//! Targets the TTGO LoRa32 board wiring, the common carrier for
//! single-channel gateway builds.
//!
//! # Pin Configuration (TTGO LoRa32)
//!
//! | Signal | GPIO | Notes |
//! |--------|------|-------|
//! | SPI SCK | 5 | SPI Clock |
//! | SPI MISO | 19 | Master In Slave Out |
//! | SPI MOSI | 27 | Master Out Slave In |
//! | NSS (CS) | 18 | Chip Select |
//! | RESET | 14 | Radio Reset |
//! | DIO0 | 26 | RxDone / TxDone / CadDone |
//! | DIO1 | 33 | RxTimeout / CadDetected |
//!
//! The state machine reads the IRQ flag registers on every evaluation
//! pass, so the DIO lines are a wake hint rather than the event source:
//! a missed edge costs one poll interval, nothing more.

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{Gpio14, Gpio26, Gpio33, Input, InterruptType, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::spi::config::Config as SpiConfig;
use esp_idf_hal::spi::config::DriverConfig;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SPI2};
use esp_idf_hal::units::FromValueType;
use log::debug;

use super::bus::{RadioError, RegisterBus, SPI_WRITE_BIT};
use super::context::EventFlag;
use super::registers::SPI_SPEED_HZ;

/// Register access over the ESP32 SPI peripheral.
///
/// One transaction per register operation: address byte with the
/// read/write bit, then data, with the driver toggling chip select.
pub struct SpiBus<'d> {
    device: SpiDeviceDriver<'d, SpiDriver<'d>>,
}

impl<'d> SpiBus<'d> {
    /// Set up the SPI bus for the radio.
    pub fn new(
        spi: impl Peripheral<P = SPI2> + 'd,
        sclk: impl Peripheral<P = esp_idf_hal::gpio::Gpio5> + 'd,
        mosi: impl Peripheral<P = esp_idf_hal::gpio::Gpio27> + 'd,
        miso: impl Peripheral<P = esp_idf_hal::gpio::Gpio19> + 'd,
        cs: impl Peripheral<P = esp_idf_hal::gpio::Gpio18> + 'd,
    ) -> Result<Self, RadioError> {
        let spi_config = SpiConfig::new().baudrate(SPI_SPEED_HZ.Hz().into());
        let driver_config = DriverConfig::new();

        let spi_driver =
            SpiDriver::new(spi, sclk, mosi, Some(miso), &driver_config).map_err(RadioError::Spi)?;

        let device =
            SpiDeviceDriver::new(spi_driver, Some(cs), &spi_config).map_err(RadioError::Spi)?;

        Ok(Self { device })
    }
}

impl<'d> RegisterBus for SpiBus<'d> {
    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError> {
        let tx = [addr & !SPI_WRITE_BIT, 0x00];
        let mut rx = [0u8; 2];
        self.device.transfer(&mut rx, &tx).map_err(RadioError::Spi)?;
        Ok(rx[1])
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        self.device
            .write(&[addr | SPI_WRITE_BIT, value])
            .map_err(RadioError::Spi)
    }

    fn write_buffer(&mut self, addr: u8, data: &[u8]) -> Result<(), RadioError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(addr | SPI_WRITE_BIT);
        frame.extend_from_slice(data);
        self.device.write(&frame).map_err(RadioError::Spi)
    }
}

/// Reset line and DIO interrupt pins.
///
/// Kept separate from [`SpiBus`] so the main task can re-arm the wake
/// hint while the gateway owns the bus.
pub struct RadioPins<'d> {
    reset: PinDriver<'d, Gpio14, Output>,
    dio0: PinDriver<'d, Gpio26, Input>,
    dio1: PinDriver<'d, Gpio33, Input>,
}

impl<'d> RadioPins<'d> {
    /// Claim the control pins.
    pub fn new(
        reset: impl Peripheral<P = Gpio14> + 'd,
        dio0: impl Peripheral<P = Gpio26> + 'd,
        dio1: impl Peripheral<P = Gpio33> + 'd,
    ) -> Result<Self, RadioError> {
        Ok(Self {
            reset: PinDriver::output(reset).map_err(RadioError::Gpio)?,
            dio0: PinDriver::input(dio0).map_err(RadioError::Gpio)?,
            dio1: PinDriver::input(dio1).map_err(RadioError::Gpio)?,
        })
    }

    /// Pulse the reset line and give the chip time to boot.
    pub fn reset_radio(&mut self) -> Result<(), RadioError> {
        debug!("Resetting radio");
        self.reset.set_low().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);
        self.reset.set_high().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);
        Ok(())
    }

    /// Post `flag` on a rising edge of either DIO line.
    ///
    /// The ESP-IDF GPIO interrupt disarms after it fires; call
    /// [`RadioPins::rearm_wake_hint`] from task context to take the
    /// next edge. The evaluation loop does not depend on the hint.
    pub fn attach_wake_hint(&mut self, flag: EventFlag) -> Result<(), RadioError> {
        let dio0_flag = flag.clone();
        self.dio0
            .set_interrupt_type(InterruptType::PosEdge)
            .map_err(RadioError::Gpio)?;
        unsafe {
            self.dio0
                .subscribe(move || dio0_flag.post())
                .map_err(RadioError::Gpio)?;
        }

        let dio1_flag = flag;
        self.dio1
            .set_interrupt_type(InterruptType::PosEdge)
            .map_err(RadioError::Gpio)?;
        unsafe {
            self.dio1
                .subscribe(move || dio1_flag.post())
                .map_err(RadioError::Gpio)?;
        }

        self.rearm_wake_hint()
    }

    /// Re-enable the DIO edge interrupts.
    pub fn rearm_wake_hint(&mut self) -> Result<(), RadioError> {
        self.dio0.enable_interrupt().map_err(RadioError::Gpio)?;
        self.dio1.enable_interrupt().map_err(RadioError::Gpio)?;
        Ok(())
    }
}
