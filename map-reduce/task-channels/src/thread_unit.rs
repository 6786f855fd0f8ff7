// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::channel_sink::ChannelSink;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use mapreduce_pool_core::{exit_status, ExecutionUnit, SinkError, UnitEvent};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Execution unit backed by one blocking thread.
///
/// Yields every message the thread sends, then the thread's exit status once
/// the channel closes.
pub struct ThreadUnit<P> {
    events: BoxStream<'static, UnitEvent<P>>,
    shutdown: CancellationToken,
}

impl<P: Send + 'static> ThreadUnit<P> {
    /// Runs `work` on the runtime's blocking pool
    pub fn spawn<F>(runtime: &Handle, work: F) -> Self
    where
        F: FnOnce(ChannelSink<P>, CancellationToken) -> Result<(), SinkError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = runtime.spawn_blocking(move || work(ChannelSink::new(tx), token));

        let messages = UnboundedReceiverStream::new(rx).map(UnitEvent::Message);
        let exit = stream::once(async move { exit_status(handle.await) }).map(UnitEvent::Exit);
        Self {
            events: messages.chain(exit).boxed(),
            shutdown,
        }
    }
}

impl<P> Stream for ThreadUnit<P> {
    type Item = UnitEvent<P>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl<P: Send + 'static> ExecutionUnit<P> for ThreadUnit<P> {
    fn terminate(&mut self) {
        self.shutdown.cancel();
    }
}
