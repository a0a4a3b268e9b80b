//! Async gateway service.
//!
//! Bridges the blocking radio core into the async world. The state
//! machine and the SPI bus are strictly single-context, so every radio
//! touch happens inside `tokio::task::spawn_blocking` while holding the
//! gateway mutex: the worker runs evaluation passes in short poll
//! windows, forwards completed packets out through an mpsc channel, and
//! drains queued downlinks in.
//!
//! Downlinks get priority over polling: we control when to transmit but
//! cannot control when packets arrive.

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::bus::{RadioError, RegisterBus};
use super::clock::MonotonicClock;
use super::machine::Gateway;
use super::packet::{InboundPacket, OutboundRequest};
use crate::network::GatewayStats;

/// Length of one blocking poll window (ms).
///
/// The gateway mutex is held for the whole window, so collaborators
/// block for at most this long.
const POLL_WINDOW_MS: u64 = 50;

/// Pause between evaluation passes inside a window (ms). Sets the soft
/// interrupt cadence for hop timeouts.
const EVALUATE_PAUSE_MS: u64 = 1;

/// Delay after a radio error before retrying (ms).
const ERROR_BACKOFF_MS: u64 = 100;

/// Capacity of the inbound and outbound packet channels.
const CHANNEL_CAPACITY: usize = 16;

/// Lock the shared gateway, recovering from a poisoned mutex.
fn lock_gateway<B: RegisterBus, C: MonotonicClock>(
    shared: &Arc<Mutex<Gateway<B, C>>>,
) -> MutexGuard<'_, Gateway<B, C>> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Gateway mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// One blocking batch of evaluation passes.
///
/// Runs the machine once per pause tick until the window closes,
/// collecting completed receptions and feeding the quiet watchdog.
fn poll_window<B: RegisterBus, C: MonotonicClock>(
    gateway: &mut Gateway<B, C>,
) -> (Vec<InboundPacket>, Result<(), RadioError>) {
    let mut packets = Vec::new();
    let started = Instant::now();
    loop {
        if let Err(e) = gateway.evaluate() {
            return (packets, Err(e));
        }
        if let Some(packet) = gateway.take_inbound() {
            packets.push(packet);
        }
        if let Err(e) = gateway.check_quiet_watchdog() {
            return (packets, Err(e));
        }
        if started.elapsed() >= Duration::from_millis(POLL_WINDOW_MS) {
            return (packets, Ok(()));
        }
        std::thread::sleep(Duration::from_millis(EVALUATE_PAUSE_MS));
    }
}

/// Async adapter around a running [`Gateway`].
///
/// Owns the worker task; dropping the service cancels it. The gateway
/// must already have its receiver started when handed over.
pub struct GatewayService<B, C>
where
    B: RegisterBus + Send + 'static,
    C: MonotonicClock + Send + 'static,
{
    gateway: Arc<Mutex<Gateway<B, C>>>,
    stats: Arc<GatewayStats>,
    inbound_rx: mpsc::Receiver<InboundPacket>,
    outbound_tx: mpsc::Sender<OutboundRequest>,
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl<B, C> GatewayService<B, C>
where
    B: RegisterBus + Send + 'static,
    C: MonotonicClock + Send + 'static,
{
    /// Wrap the gateway and spawn the worker task.
    pub fn start(gateway: Gateway<B, C>) -> Self {
        let stats = gateway.stats();
        let gateway = Arc::new(Mutex::new(gateway));
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::run(
            Arc::clone(&gateway),
            inbound_tx,
            outbound_rx,
            cancel.clone(),
        ));
        Self {
            gateway,
            stats,
            inbound_rx,
            outbound_tx,
            cancel,
            task: Some(task),
        }
    }

    /// Wait for the next completed reception.
    ///
    /// Returns `None` once the worker has shut down.
    pub async fn recv_packet(&mut self) -> Option<InboundPacket> {
        self.inbound_rx.recv().await
    }

    /// Non-blocking variant of [`GatewayService::recv_packet`].
    pub fn try_recv_packet(&mut self) -> Option<InboundPacket> {
        self.inbound_rx.try_recv().ok()
    }

    /// Sender handle for queueing downlinks on the radio.
    pub fn downlink_sender(&self) -> mpsc::Sender<OutboundRequest> {
        self.outbound_tx.clone()
    }

    /// Shared statistics counters.
    pub fn stats(&self) -> Arc<GatewayStats> {
        Arc::clone(&self.stats)
    }

    /// Run a closure against the locked gateway.
    ///
    /// Blocks until the current poll window releases the mutex; meant
    /// for bring-up diagnostics and host simulation scripting, not for
    /// the packet path.
    pub fn with_gateway<R>(&self, f: impl FnOnce(&mut Gateway<B, C>) -> R) -> R {
        let mut gateway = lock_gateway(&self.gateway);
        f(&mut gateway)
    }

    /// Stop the worker and wait for it to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Gateway worker ended abnormally: {}", e);
            }
        }
    }

    async fn run(
        gateway: Arc<Mutex<Gateway<B, C>>>,
        inbound_tx: mpsc::Sender<InboundPacket>,
        mut outbound_rx: mpsc::Receiver<OutboundRequest>,
        cancel: CancellationToken,
    ) {
        info!("Gateway service started");

        loop {
            if cancel.is_cancelled() {
                info!("Gateway service shutting down");
                break;
            }

            // Priority 1: queue pending downlinks.
            if let Ok(request) = outbound_rx.try_recv() {
                let shared = Arc::clone(&gateway);
                let queued =
                    tokio::task::spawn_blocking(move || {
                        lock_gateway(&shared).queue_downlink(request)
                    })
                    .await;
                match queued {
                    Ok(Ok(())) => debug!("Downlink queued"),
                    Ok(Err(e)) => warn!("Downlink rejected: {}", e),
                    Err(e) => error!("Downlink task panicked: {}", e),
                }
                tokio::task::yield_now().await;
                continue;
            }

            // Priority 2: run the radio for one poll window.
            let shared = Arc::clone(&gateway);
            let result =
                tokio::task::spawn_blocking(move || poll_window(&mut lock_gateway(&shared))).await;

            match result {
                Ok((packets, outcome)) => {
                    for packet in packets {
                        if inbound_tx.send(packet).await.is_err() {
                            warn!("Inbound channel closed, dropping packet");
                        }
                    }
                    if let Err(e) = outcome {
                        warn!("Radio error in evaluation loop: {}", e);
                        tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                    }
                }
                Err(e) => {
                    error!("Evaluation task panicked: {}", e);
                    tokio::time::sleep(Duration::from_millis(ERROR_BACKOFF_MS)).await;
                }
            }
        }

        info!("Gateway service stopped");
    }
}

impl<B, C> Drop for GatewayService<B, C>
where
    B: RegisterBus + Send + 'static,
    C: MonotonicClock + Send + 'static,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::clock::HostClock;
    use crate::lora::config::GatewayConfig;
    use crate::lora::modem::Modem;
    use crate::lora::plan::SpreadingFactor;
    use crate::lora::sim::SimBus;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime")
    }

    fn started_gateway() -> Gateway<SimBus, HostClock> {
        let config = GatewayConfig::default();
        let stats = Arc::new(GatewayStats::new(config.region.channel_plan().len()));
        let modem = Modem::probe(SimBus::sx1276()).unwrap();
        let mut gateway = Gateway::new(modem, config, HostClock::new(), stats);
        gateway.start_receiver().unwrap();
        gateway
    }

    #[test]
    fn test_service_forwards_received_packets() {
        let rt = runtime();
        rt.block_on(async {
            let mut gateway = started_gateway();
            // Stage a preamble detect; the reception completes after
            // the service has taken over.
            gateway.bus_mut().inject_preamble_detect(60);

            let mut service = GatewayService::start(gateway);
            tokio::time::sleep(Duration::from_millis(80)).await;

            service.with_gateway(|gw| {
                gw.bus_mut().inject_rx_done(&[0x11, 0x22, 0x33], 40, 50);
            });

            let packet = tokio::time::timeout(Duration::from_secs(2), service.recv_packet())
                .await
                .expect("timed out waiting for packet")
                .expect("worker gone");
            assert_eq!(packet.payload, vec![0x11, 0x22, 0x33]);
            assert_eq!(packet.snr_db, 10);
            assert_eq!(packet.rssi_dbm, -107);

            service.shutdown().await;
        });
    }

    #[test]
    fn test_service_transmits_queued_downlink() {
        let rt = runtime();
        rt.block_on(async {
            let gateway = started_gateway();
            let target = gateway.clock().now_us();
            let mut service = GatewayService::start(gateway);

            let request = OutboundRequest {
                payload: vec![0xDE, 0xAD],
                target_us: target,
                sf: SpreadingFactor::Sf9,
                power_dbm: 14,
                freq_hz: 869_525_000,
                crc: true,
                invert_iq: true,
            };
            service.downlink_sender().send(request).await.unwrap();

            let stats = service.stats();
            let mut sent = false;
            for _ in 0..100 {
                if stats
                    .messages_down
                    .load(std::sync::atomic::Ordering::Relaxed)
                    == 1
                {
                    sent = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(sent, "downlink never confirmed");
            assert_eq!(
                service.with_gateway(|gw| gw.bus_mut().fifo_payload().to_vec()),
                vec![0xDE, 0xAD]
            );

            service.shutdown().await;
        });
    }

    #[test]
    fn test_service_shutdown_is_idempotent() {
        let rt = runtime();
        rt.block_on(async {
            let mut service = GatewayService::start(started_gateway());
            service.shutdown().await;
            service.shutdown().await;
            assert!(service.try_recv_packet().is_none());
        });
    }
}
