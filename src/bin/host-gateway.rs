//! Host-based gateway for development and testing.
//!
//! Runs the full radio core against a simulated SX1276 register bus:
//! a scripted node uplinks every few seconds, every third uplink gets a
//! downlink echo queued one second out, and the statistics endpoint
//! serves at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-gateway
//! ```

#[cfg(not(feature = "esp32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    use log::{info, warn};
    use lora_gateway_rs_esp32::lora::{
        Gateway, GatewayConfig, GatewayService, HostClock, Modem, MonotonicClock, OutboundRequest,
        SimBus,
    };
    use lora_gateway_rs_esp32::network::{GatewayStats, StatsServer};
    use std::sync::Arc;
    use std::time::Duration;

    /// Seconds between scripted uplinks.
    const UPLINK_INTERVAL_SECS: u64 = 10;

    /// How long after the preamble detect the scripted frame completes
    /// (ms). Long enough for at least one poll window to take the detect.
    const FRAME_COMPLETION_MS: u64 = 120;

    /// How far ahead of now downlink echoes are scheduled (us).
    const ECHO_LEAD_US: u32 = 1_000_000;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== LoRa gateway (host simulation) starting ===");

    let config = GatewayConfig::default();
    let plan = config.region.channel_plan();
    let stats = Arc::new(GatewayStats::new(plan.len()));

    // Keep server alive - variable intentionally unused except for Drop
    let _stats_server = match StatsServer::start(None, config.stats_port, stats.clone()) {
        Ok(server) => {
            info!(
                "Stats server running at http://localhost:{}/stats",
                config.stats_port
            );
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            warn!("Continuing without stats server");
            None
        }
    };

    let modem = Modem::probe(SimBus::sx1276()).expect("simulated radio");
    let mut gateway = Gateway::new(modem, config, HostClock::new(), stats);
    gateway.start_receiver().expect("receiver bring-up failed");

    let mut service = GatewayService::start(gateway);
    let downlinks = service.downlink_sender();

    info!("Entering main loop (Ctrl+C to exit)...");

    let mut uplink_timer = tokio::time::interval(Duration::from_secs(UPLINK_INTERVAL_SECS));
    let mut drain_timer = tokio::time::interval(Duration::from_millis(200));
    let mut uplink_counter = 0u32;
    let mut received_counter = 0u32;

    loop {
        tokio::select! {
            _ = uplink_timer.tick() => {
                uplink_counter += 1;
                let payload = format!("sim uplink {}", uplink_counter).into_bytes();
                // Stage the preamble detect, give the machine a poll
                // window to enter RX, then complete the frame.
                service.with_gateway(|gw| gw.bus_mut().inject_preamble_detect(60));
                tokio::time::sleep(Duration::from_millis(FRAME_COMPLETION_MS)).await;
                service.with_gateway(|gw| gw.bus_mut().inject_rx_done(&payload, 40, 60));
            }
            _ = drain_timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }

        while let Some(packet) = service.try_recv_packet() {
            received_counter += 1;
            info!(
                "Forwarder would uplink {} bytes ({}, {} dBm, SNR {} dB)",
                packet.payload.len(),
                packet.sf,
                packet.rssi_dbm,
                packet.snr_db
            );

            // RX1-style echo: same spreading factor, the channel's
            // downlink frequency.
            if received_counter % 3 == 0 {
                if let Some(downlink) = plan[packet.channel].downlink {
                    let target_us = service
                        .with_gateway(|gw| gw.clock().now_us())
                        .wrapping_add(ECHO_LEAD_US);
                    let request = OutboundRequest {
                        payload: packet.payload.clone(),
                        target_us,
                        sf: packet.sf,
                        power_dbm: 14,
                        freq_hz: downlink.freq_hz,
                        crc: true,
                        invert_iq: true,
                    };
                    if downlinks.send(request).await.is_err() {
                        warn!("Downlink channel closed");
                    } else {
                        info!("Echo downlink queued {} us out", ECHO_LEAD_US);
                    }
                }
            }
        }
    }

    service.shutdown().await;
    info!("Gateway stopped");
}

#[cfg(feature = "esp32")]
fn main() {
    println!("host-gateway is a host-only binary.");
    println!("Flash the main gateway binary for on-device operation.");
}
