//! Subsystem façades (spec §4.H): adapters that turn protocol-specific
//! events into driver-hook-shaped calls into the rest of the core. Only one
//! concrete façade ships with the core — [`zigbee`] — as a worked example;
//! real radio/IP-camera/etc. facades are out of the core's scope (spec §1).

pub mod zigbee;
