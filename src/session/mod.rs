//! Session gateway: connection bookkeeping and event routing

pub mod gateway;

pub use gateway::{
    GatewayClosed, GatewayEvent, GatewayHandle, GatewayStats, Outbox, SessionGateway,
    DEFAULT_RECONNECT_GRACE, OUTBOX_CAPACITY,
};
