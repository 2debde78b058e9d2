//! Application layer: the realtime protocol and the surfaces that feed it.

pub mod gateway;
pub mod protocol;
pub mod rooms;
pub mod sync;
