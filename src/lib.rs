//! Single-channel LoRa gateway firmware library.
//!
//! This library contains platform-independent components that can be tested
//! on the host machine without ESP32 hardware: the SX1272/SX1276 register
//! core, the scan/CAD state machine, transmit scheduling, and the
//! statistics endpoint. The ESP32 SPI and GPIO glue sits behind the
//! `esp32` feature.

pub mod lora;
pub mod network;

// Re-export commonly used items
pub use lora::{
    Gateway, GatewayConfig, GatewayService, InboundPacket, Modem, OutboundRequest, Region,
    SpreadingFactor,
};
pub use network::{GatewayStats, StatsServer};
