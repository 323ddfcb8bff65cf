//! Domain layer: strategy policy and the client message protocol.

pub mod messages;
pub mod strategy;
