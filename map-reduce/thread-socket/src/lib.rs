// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Worker provider whose units report over a loopback TCP connection.
//!
//! Every message is one frame: a big-endian `u32` length followed by the
//! JSON encoding of a `WorkerMessage`.

pub mod socket_provider;
pub mod socket_sink;
pub mod socket_unit;

pub use socket_provider::SocketWorkerProvider;
pub use socket_sink::SocketSink;
pub use socket_unit::{SocketUnit, MAX_FRAME_LENGTH};
