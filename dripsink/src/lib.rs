//! dripsink — sensor-to-MQTT publishing daemon.
//!
//! Polls heterogeneous environmental sensors at per-source intervals and
//! republishes every reading as an individual MQTT message, with a liveness
//! heartbeat and automatic reconnection. One failing sensor never takes the
//! others down: fetch failures are contained at the source boundary, and the
//! daemon only gives up when the broker refuses the session for good.
//!
//! # Topics
//!
//! ```text
//! <sink>/heartbeat
//! <sink>/<kind>/<source>/<metric>
//! ```
//!
//! For example `dripsink/aranet/kitchen/temperature` or
//! `dripsink/system/host/load`.

pub mod args;
pub mod bus;
pub mod config;
pub mod sink;
pub mod source;
pub mod sources;
