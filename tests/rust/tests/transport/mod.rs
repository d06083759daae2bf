//! Transport Integration Tests
//!
//! Runs the pool over real rmcp transports:
//! - Streamable HTTP (and SSE registrations) against an in-process server
//! - STDIO child process spawning and handshake failures
