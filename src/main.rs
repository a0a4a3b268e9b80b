//! Single-channel LoRa gateway firmware binary.
//!
//! Brings up the SX1272/SX1276 over SPI, runs the scan/CAD state machine
//! and serves gateway statistics over HTTP.
//!
//! For development without hardware use the `host-gateway` binary, which
//! drives the same core against a simulated register bus.

#[cfg(feature = "esp32")]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    use esp_idf_hal::peripherals::Peripherals;
    use log::{debug, info, warn};
    use lora_gateway_rs_esp32::lora::{
        EspClock, Gateway, GatewayConfig, GatewayService, Modem, RadioPins, SpiBus,
    };
    use lora_gateway_rs_esp32::network::{GatewayStats, StatsServer};
    use std::sync::Arc;
    use std::time::Duration;

    info!("=== LoRa gateway starting ===");

    let peripherals = Peripherals::take().expect("peripherals already taken");
    let pins = peripherals.pins;

    let bus = SpiBus::new(
        peripherals.spi2,
        pins.gpio5,
        pins.gpio27,
        pins.gpio19,
        pins.gpio18,
    )
    .expect("SPI bring-up failed");
    let mut radio_pins =
        RadioPins::new(pins.gpio14, pins.gpio26, pins.gpio33).expect("GPIO bring-up failed");
    radio_pins.reset_radio().expect("radio reset failed");

    let modem = Modem::probe(bus).expect("no supported radio on the SPI bus");

    let config = GatewayConfig::default();
    config.validate().expect("invalid gateway configuration");

    let stats = Arc::new(GatewayStats::new(config.region.channel_plan().len()));

    // Keep server alive - variable intentionally unused except for Drop
    let _stats_server = match StatsServer::start(None, config.stats_port, stats.clone()) {
        Ok(server) => {
            info!("Stats server at http://<device-ip>:{}/stats", config.stats_port);
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            None
        }
    };

    let mut gateway = Gateway::new(modem, config, EspClock, stats);
    if let Err(e) = radio_pins.attach_wake_hint(gateway.event_flag()) {
        warn!("DIO wake hint unavailable, polling only: {}", e);
    }
    gateway.start_receiver().expect("receiver bring-up failed");

    let mut service = GatewayService::start(gateway);
    info!("Gateway running");

    loop {
        tokio::select! {
            packet = service.recv_packet() => {
                match packet {
                    // The packet forwarder uplink hooks in here.
                    Some(packet) => debug!(
                        "Uplink ready for forwarding: {} bytes ({}, {} dBm)",
                        packet.payload.len(),
                        packet.sf,
                        packet.rssi_dbm
                    ),
                    None => break,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if let Err(e) = radio_pins.rearm_wake_hint() {
                    warn!("Failed to re-arm DIO interrupts: {}", e);
                }
            }
        }
    }

    warn!("Gateway worker ended, shutting down");
    service.shutdown().await;
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-gateway' for the simulated gateway.");
}
