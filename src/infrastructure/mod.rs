//! Infrastructure: clients for the external Messenger Platform APIs.

pub mod messenger;
