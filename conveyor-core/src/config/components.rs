pub mod consumer;
pub mod producer;
pub mod sink;
pub mod source;
