//! Consumption and fan-out pipeline: a [consumer::Consumer] reads messages from a
//! [source::Source], hands them to a [consumer::ConsumerCallback] and acknowledges what
//! was handled. Results are written through a [producer::Producer] into one or more
//! [sink::Sink]s.

mod ack;
mod error;

pub use crate::error::{Error, Errors, Result, panic_message};

pub mod backoff;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod encoding;
pub mod forwarder;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod sink;
pub mod source;
