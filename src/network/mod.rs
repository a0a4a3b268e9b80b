//! Network-facing surface of the gateway.
//!
//! The radio core itself has no network dependencies; this module hosts
//! the monitoring endpoint that exposes its statistics. The packet
//! forwarder proper (the Semtech UDP uplink) is a separate collaborator
//! and not part of this crate.

mod stats_server;

pub use stats_server::{
    ChannelStats, GatewayStats, PacketRecord, StatsServer, DEFAULT_STATS_PORT, RECENT_PACKETS,
};
