//! Single-channel LoRa gateway radio core.
//!
//! This module contains:
//! - [`config`]: Region selection and gateway tuning knobs
//! - [`plan`]: Channel plans, spreading factors, hop cursor
//! - [`bus`]: Register transport contract and error type
//! - [`clock`]: Microsecond clock abstraction
//! - [`modem`]: SX1272/SX1276 register programming
//! - [`machine`]: The scan/CAD/receive/transmit state machine
//! - [`scheduler`]: Microsecond-precision transmit timing
//! - [`service`]: Async adapter around the blocking core
//! - [`sim`]: In-memory register bus for tests and the host demo
//! - [`radio`]: ESP32 SPI transport and control pins (ESP32 only)

mod bus;
mod clock;
mod config;
mod context;
mod machine;
mod modem;
mod packet;
mod plan;
mod registers;
mod scheduler;
mod service;
mod sim;

#[cfg(feature = "esp32")]
mod radio;

pub use bus::{RadioError, RegisterBus};
pub use clock::{HostClock, MonotonicClock};
pub use config::{ConfigError, GatewayConfig, Region};
pub use context::{EventFlag, RadioState};
pub use machine::Gateway;
pub use modem::{ChipVariant, Modem};
pub use packet::{InboundPacket, OutboundRequest, MAX_PAYLOAD_BYTES};
pub use plan::{Channel, ChannelCursor, Downlink, SpreadingFactor};
pub use service::GatewayService;
pub use sim::SimBus;

#[cfg(feature = "esp32")]
pub use clock::EspClock;
#[cfg(feature = "esp32")]
pub use radio::{RadioPins, SpiBus};
