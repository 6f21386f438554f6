//! Adapters Layer
//!
//! Implementations of the domain ports: sources, bookmark backends, sinks.

pub mod outbound;
