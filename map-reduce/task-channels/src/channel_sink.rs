// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use mapreduce_pool_core::{MessageSink, SinkError, WorkerMessage};
use tokio::sync::mpsc;

/// Worker end of a unit's message channel
pub struct ChannelSink<P> {
    tx: mpsc::UnboundedSender<WorkerMessage<P>>,
}

impl<P> ChannelSink<P> {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage<P>>) -> Self {
        Self { tx }
    }
}

impl<P> MessageSink<P> for ChannelSink<P> {
    fn send(&mut self, message: WorkerMessage<P>) -> Result<(), SinkError> {
        self.tx.send(message).map_err(|_| SinkError::Closed)
    }
}
