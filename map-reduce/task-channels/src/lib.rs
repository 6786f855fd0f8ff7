// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Worker provider running each execution unit on a dedicated blocking
//! thread that reports back over a tokio channel.

pub mod channel_sink;
pub mod thread_provider;
pub mod thread_unit;

pub use channel_sink::ChannelSink;
pub use thread_provider::ThreadWorkerProvider;
pub use thread_unit::ThreadUnit;
