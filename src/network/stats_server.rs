//! HTTP stats server for gateway monitoring.
//!
//! Provides a simple `/stats` endpoint that returns gateway statistics as
//! JSON. Uses `tiny_http` which works on both host and ESP32 (via
//! std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "messages_seen": 240,
//!   "messages_ok": 231,
//!   "messages_down": 4,
//!   "per_sf": { "sf7": 180, "sf8": 30, "sf9": 12, "sf10": 9, "sf11": 0, "sf12": 0 },
//!   "per_channel": [ { "received": 80, "transmitted": 2 }, ... ],
//!   "recent": [ { "secs": 3590, "channel": 0, "sf": "SF7", "rssi_dbm": -107, "snr_db": 9, "len": 24 }, ... ]
//! }
//! ```

use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Method, Response, Server};

use crate::lora::SpreadingFactor;

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// How many received packets the history ring keeps.
pub const RECENT_PACKETS: usize = 10;

/// Counters for one channel plan slot.
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Packets received intact on this channel.
    pub received: AtomicUsize,
    /// Downlinks transmitted on this channel.
    pub transmitted: AtomicUsize,
}

impl ChannelStats {
    /// Serialize to JSON.
    fn to_json(&self) -> String {
        format!(
            r#"{{"received":{},"transmitted":{}}}"#,
            self.received.load(Ordering::Relaxed),
            self.transmitted.load(Ordering::Relaxed)
        )
    }
}

/// Record of one received uplink, kept in the history ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Seconds since gateway start at reception.
    pub secs: u64,
    /// Channel plan index the packet arrived on.
    pub channel: usize,
    /// Spreading factor the packet was demodulated at.
    pub sf: SpreadingFactor,
    /// Corrected packet RSSI in dBm.
    pub rssi_dbm: i16,
    /// Packet SNR in dB.
    pub snr_db: i8,
    /// Payload length in bytes.
    pub len: usize,
}

impl PacketRecord {
    /// Serialize to JSON.
    fn to_json(&self) -> String {
        format!(
            r#"{{"secs":{},"channel":{},"sf":"{}","rssi_dbm":{},"snr_db":{},"len":{}}}"#,
            self.secs, self.channel, self.sf, self.rssi_dbm, self.snr_db, self.len
        )
    }
}

/// Gateway statistics container.
///
/// Shared between the radio state machine, the gateway service, and the
/// HTTP server. Counters are atomics for lock-free updates from the
/// evaluation loop; only the packet history sits behind a mutex.
#[derive(Debug)]
pub struct GatewayStats {
    /// When the gateway started.
    start_time: Instant,
    /// Receive-done events seen, including CRC and header failures.
    pub messages_seen: AtomicUsize,
    /// Packets received intact.
    pub messages_ok: AtomicUsize,
    /// Downlinks transmitted.
    pub messages_down: AtomicUsize,
    /// Intact receptions per spreading factor, SF7 first.
    pub per_sf: [AtomicUsize; 6],
    /// Counters per channel plan slot.
    pub per_channel: Vec<ChannelStats>,
    /// Seconds-since-start of the most recent intact reception.
    last_message_secs: AtomicU64,
    /// Most recent receptions, newest first.
    recent: Mutex<Vec<PacketRecord>>,
}

impl GatewayStats {
    /// Create statistics for a plan with `channel_count` slots.
    pub fn new(channel_count: usize) -> Self {
        Self {
            start_time: Instant::now(),
            messages_seen: AtomicUsize::new(0),
            messages_ok: AtomicUsize::new(0),
            messages_down: AtomicUsize::new(0),
            per_sf: Default::default(),
            per_channel: (0..channel_count).map(|_| ChannelStats::default()).collect(),
            last_message_secs: AtomicU64::new(0),
            recent: Mutex::new(Vec::new()),
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Record a receive attempt (before CRC/header checks).
    pub fn record_seen(&self) {
        self.messages_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an intact reception.
    pub fn record_received(&self, record: PacketRecord) {
        self.messages_ok.fetch_add(1, Ordering::Relaxed);
        let sf_index = (record.sf.as_u8() - 7) as usize;
        self.per_sf[sf_index].fetch_add(1, Ordering::Relaxed);
        if let Some(channel) = self.per_channel.get(record.channel) {
            channel.received.fetch_add(1, Ordering::Relaxed);
        }
        self.last_message_secs.store(record.secs, Ordering::Relaxed);

        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Stats history mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        recent.insert(0, record);
        recent.truncate(RECENT_PACKETS);
    }

    /// Record a transmitted downlink.
    pub fn record_transmitted(&self, channel: usize) {
        self.messages_down.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = self.per_channel.get(channel) {
            slot.transmitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Seconds-since-start of the last intact reception, 0 if none yet.
    pub fn last_message_secs(&self) -> u64 {
        self.last_message_secs.load(Ordering::Relaxed)
    }

    /// Snapshot of the packet history, newest first.
    pub fn recent(&self) -> Vec<PacketRecord> {
        match self.recent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn!("Stats history mutex was poisoned, recovering");
                poisoned.into_inner().clone()
            }
        }
    }

    /// Serialize all statistics to JSON.
    pub fn to_json(&self) -> String {
        let per_sf = format!(
            r#"{{"sf7":{},"sf8":{},"sf9":{},"sf10":{},"sf11":{},"sf12":{}}}"#,
            self.per_sf[0].load(Ordering::Relaxed),
            self.per_sf[1].load(Ordering::Relaxed),
            self.per_sf[2].load(Ordering::Relaxed),
            self.per_sf[3].load(Ordering::Relaxed),
            self.per_sf[4].load(Ordering::Relaxed),
            self.per_sf[5].load(Ordering::Relaxed),
        );
        let per_channel = self
            .per_channel
            .iter()
            .map(|c| c.to_json())
            .collect::<Vec<_>>()
            .join(",");
        let recent = self
            .recent()
            .iter()
            .map(|r| r.to_json())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            r#"{{"uptime_secs":{},"messages_seen":{},"messages_ok":{},"messages_down":{},"per_sf":{},"per_channel":[{}],"recent":[{}]}}"#,
            self.uptime_secs(),
            self.messages_seen.load(Ordering::Relaxed),
            self.messages_ok.load(Ordering::Relaxed),
            self.messages_down.load(Ordering::Relaxed),
            per_sf,
            per_channel,
            recent
        )
    }
}

/// How often the serving thread checks the shutdown flag while idle.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// HTTP server publishing [`GatewayStats`] as JSON.
///
/// Serves from a background thread; dropping the handle stops it.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Bind and start serving. `None` binds all interfaces.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<GatewayStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || Self::serve(server, stats, flag));

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn serve(server: Server, stats: Arc<GatewayStats>, shutdown: Arc<AtomicBool>) {
        // Headers are built once; every response clones from these.
        let content_type =
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("static header");
        let location =
            tiny_http::Header::from_bytes(&b"Location"[..], &b"/stats"[..]).expect("static header");
        let allow_get =
            tiny_http::Header::from_bytes(&b"Allow"[..], &b"GET"[..]).expect("static header");

        // Accept with a timeout so the shutdown flag gets checked even
        // when no client ever connects.
        while !shutdown.load(Ordering::Acquire) {
            let request = match server.recv_timeout(ACCEPT_POLL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Stats server failed: {}", e);
                    break;
                }
            };

            if request.method() != &Method::Get {
                let response = Response::from_string("Method Not Allowed")
                    .with_status_code(405)
                    .with_header(allow_get.clone());
                let _ = request.respond(response);
                continue;
            }

            let path = request.url();
            let sent = if path == "/stats" || path == "/stats/" {
                request.respond(
                    Response::from_string(stats.to_json())
                        .with_status_code(200)
                        .with_header(content_type.clone()),
                )
            } else if path == "/" {
                request.respond(
                    Response::from_string("Gateway statistics live at /stats")
                        .with_status_code(302)
                        .with_header(location.clone()),
                )
            } else {
                request.respond(Response::from_string("Not Found").with_status_code(404))
            };
            if let Err(e) = sent {
                warn!("Failed to answer stats request: {}", e);
            }
        }

        info!("Stats server stopped");
    }

    /// Stop serving. Returns after the thread exits, which takes at
    /// most about one accept-poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
