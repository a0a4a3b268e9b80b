//! Shared mutable radio state.
//!
//! Everything the state machine mutates lives in one [`RadioContext`] owned
//! by the evaluation loop. Interrupt handlers never touch it: they post an
//! [`EventFlag`] and return, and the next evaluation pass picks the event
//! up. That keeps all register traffic on a single logical thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;

use crate::lora::bus::RadioError;
use crate::lora::config::GatewayConfig;
use crate::lora::packet::{InboundPacket, OutboundRequest, MAX_PAYLOAD_BYTES};
use crate::lora::plan::{ChannelCursor, SpreadingFactor};
use crate::network::GatewayStats;

// ==================== Radio State ====================

/// Where the receive/transmit cycle currently stands.
///
/// Exactly one value exists per radio and only the state machine writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Fresh after reset, nothing armed yet.
    Init,
    /// CAD scanner armed, waiting for channel activity.
    Scan,
    /// Activity suspected, confirming the spreading factor.
    Cad,
    /// Preamble found, receiver armed for the full packet.
    Rx,
    /// Outbound request accepted, transmitter being keyed.
    Tx,
    /// Transmission keyed, waiting for the transmit-done interrupt.
    TxDone,
}

impl std::fmt::Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RadioState::Init => "INIT",
            RadioState::Scan => "SCAN",
            RadioState::Cad => "CAD",
            RadioState::Rx => "RX",
            RadioState::Tx => "TX",
            RadioState::TxDone => "TXDONE",
        };
        write!(f, "{}", name)
    }
}

// ==================== Event Flag ====================

/// One-shot "something happened" signal from interrupt context to the
/// evaluation loop.
///
/// DIO interrupt handlers only ever call [`EventFlag::post`]; no register
/// access happens in interrupt context. The evaluation loop consumes the
/// flag with [`EventFlag::take`] once per pass. Collaborators post it too,
/// after queueing a downlink, to wake the loop early.
#[derive(Clone)]
pub struct EventFlag(Arc<AtomicBool>);

impl EventFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Record that an event occurred. Safe from interrupt context.
    pub fn post(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for EventFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Radio Context ====================

/// The single owner of all mutable radio state.
///
/// Passed by `&mut` into every state machine evaluation; nothing else
/// mutates it. Timestamp fields hold wrapping microsecond readings from
/// the monotonic clock.
pub struct RadioContext {
    /// Current state machine position.
    pub state: RadioState,
    /// Spreading factor the scanner/receiver is tuned to right now.
    pub sf: SpreadingFactor,
    /// Position in the channel plan.
    pub cursor: ChannelCursor,
    /// When the last interrupt was handled. Drives the soft-hop timeout.
    pub event_time: u32,
    /// When the last CAD cycle completed. Drives the soft-hop timeout.
    pub done_time: u32,
    /// When the last transmission was keyed. Drives the stuck-TXDONE check.
    pub send_time: u32,
    /// When the preamble behind the current RX cycle was detected.
    pub detect_time: u32,
    inbound: Option<InboundPacket>,
    outbound: Option<OutboundRequest>,
    /// Cumulative counters shared with the statistics server.
    pub stats: Arc<GatewayStats>,
    /// Posted by interrupt handlers and collaborators, consumed once per
    /// evaluation pass.
    pub flag: EventFlag,
}

impl RadioContext {
    /// Build the context from a validated configuration.
    pub fn new(config: &GatewayConfig, stats: Arc<GatewayStats>) -> Self {
        Self {
            state: RadioState::Init,
            sf: config.initial_sf,
            cursor: ChannelCursor::new(config.region.channel_plan(), config.initial_channel),
            event_time: 0,
            done_time: 0,
            send_time: 0,
            detect_time: 0,
            inbound: None,
            outbound: None,
            stats,
            flag: EventFlag::new(),
        }
    }

    /// Index of the channel the radio is currently tuned to.
    pub fn channel(&self) -> usize {
        self.cursor.index()
    }

    /// Uplink frequency of the channel the radio is currently tuned to.
    pub fn frequency_hz(&self) -> u32 {
        self.cursor.current().uplink_freq_hz
    }

    // -------------------- packet hand-off --------------------

    /// Queue a downlink for the state machine to transmit.
    ///
    /// Single-slot: a request queued before the previous one was picked up
    /// replaces it. Posts the event flag so the next evaluation pass runs
    /// the TX sequence.
    pub fn queue_outbound(&mut self, request: OutboundRequest) -> Result<(), RadioError> {
        if request.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(RadioError::PacketTooLarge {
                size: request.payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        if self.outbound.is_some() {
            warn!("Downlink queued before the previous one was sent, replacing it");
        }
        self.outbound = Some(request);
        self.flag.post();
        Ok(())
    }

    /// Whether a downlink is waiting for the state machine.
    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    pub(crate) fn take_outbound(&mut self) -> Option<OutboundRequest> {
        self.outbound.take()
    }

    /// Store a completed reception for the packet forwarder to collect.
    ///
    /// Single-slot: an uncollected packet is overwritten by the next one.
    pub(crate) fn set_inbound(&mut self, packet: InboundPacket) {
        if self.inbound.is_some() {
            warn!("Received packet overwritten before it was collected");
        }
        self.inbound = Some(packet);
    }

    /// Collect the most recent completed reception, if any.
    pub fn take_inbound(&mut self) -> Option<InboundPacket> {
        self.inbound.take()
    }
}
