//! Protocol adapters for wire protocols beyond HTTP/HTTPS.
//!
//! Each adapter owns a `TcpListener` for its imposter and shapes whatever
//! arrives on the wire into the same protocol-neutral request fields the
//! HTTP adapter builds, then calls into the shared matching/behavior
//! pipeline on `Imposter`. None of them hold the imposter's internal locks
//! across I/O, scripting, or waits.

pub mod grpc;
pub mod smtp;
pub mod tcp;
