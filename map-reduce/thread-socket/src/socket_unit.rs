// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use futures::stream::{self, BoxStream, Stream, StreamExt};
use mapreduce_pool_core::{
    exit_status, ExecutionUnit, ExitStatus, SinkError, SpawnError, UnitEvent, WorkerMessage,
};
use serde::de::DeserializeOwned;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Largest frame a worker may send
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// How long an exited worker's connection may take to show up on the listener
const LATE_CONNECT_GRACE: Duration = Duration::from_millis(100);

enum Worker {
    Running(JoinHandle<Result<(), SinkError>>),
    Exited(ExitStatus),
}

impl Worker {
    async fn exit_status(self) -> ExitStatus {
        match self {
            Worker::Running(handle) => exit_status(handle.await),
            Worker::Exited(status) => status,
        }
    }
}

enum Connection {
    Accepting {
        listener: TcpListener,
        handle: JoinHandle<Result<(), SinkError>>,
    },
    Reading {
        frames: Framed<TcpStream, LengthDelimitedCodec>,
        worker: Worker,
    },
    Exiting {
        worker: Worker,
    },
    Closed,
}

/// Execution unit whose worker thread connects back over loopback TCP.
///
/// A frame that does not decode as a protocol message ends the unit with a
/// failed exit.
pub struct SocketUnit<P> {
    events: BoxStream<'static, UnitEvent<P>>,
    shutdown: CancellationToken,
}

fn spawn_error(error: std::io::Error) -> SpawnError {
    SpawnError::new(format!("cannot open worker listener: {error}"))
}

impl<P: DeserializeOwned + Send + 'static> SocketUnit<P> {
    /// Binds a listener on an ephemeral loopback port and runs `work` on the
    /// blocking pool with that port's address
    pub fn spawn<F>(runtime: &Handle, work: F) -> Result<Self, SpawnError>
    where
        F: FnOnce(SocketAddr, CancellationToken) -> Result<(), SinkError> + Send + 'static,
    {
        let listener =
            std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(spawn_error)?;
        listener.set_nonblocking(true).map_err(spawn_error)?;
        let addr = listener.local_addr().map_err(spawn_error)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).map_err(spawn_error)?
        };

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = runtime.spawn_blocking(move || work(addr, token));
        trace!(%addr, "worker listener bound");

        let events = stream::unfold(Connection::Accepting { listener, handle }, next_event::<P>);
        Ok(Self {
            events: events.boxed(),
            shutdown,
        })
    }
}

fn failed<P>(reason: String) -> Option<(UnitEvent<P>, Connection)> {
    warn!(%reason, "worker connection failed");
    Some((
        UnitEvent::Exit(ExitStatus::Failure { reason }),
        Connection::Closed,
    ))
}

async fn next_event<P: DeserializeOwned>(
    mut connection: Connection,
) -> Option<(UnitEvent<P>, Connection)> {
    loop {
        connection = match connection {
            Connection::Accepting {
                listener,
                mut handle,
            } => {
                let (accepted, worker) = tokio::select! {
                    biased;
                    accepted = listener.accept() => (accepted, Worker::Running(handle)),
                    joined = &mut handle => {
                        // The worker may have connected and exited before the
                        // listener was reported readable.
                        let status = exit_status(joined);
                        match time::timeout(LATE_CONNECT_GRACE, listener.accept()).await {
                            Ok(accepted) => (accepted, Worker::Exited(status)),
                            Err(_) => {
                                return Some((UnitEvent::Exit(status), Connection::Closed));
                            }
                        }
                    }
                };
                match accepted {
                    Ok((stream, peer)) => {
                        trace!(%peer, "worker connected");
                        let codec = LengthDelimitedCodec::builder()
                            .max_frame_length(MAX_FRAME_LENGTH)
                            .new_codec();
                        Connection::Reading {
                            frames: Framed::new(stream, codec),
                            worker,
                        }
                    }
                    Err(error) => return failed(format!("accept failed: {error}")),
                }
            }
            Connection::Reading { mut frames, worker } => match frames.next().await {
                Some(Ok(frame)) => match serde_json::from_slice::<WorkerMessage<P>>(&frame) {
                    Ok(message) => {
                        return Some((
                            UnitEvent::Message(message),
                            Connection::Reading { frames, worker },
                        ))
                    }
                    Err(error) => return failed(format!("malformed frame: {error}")),
                },
                Some(Err(error)) => return failed(format!("connection error: {error}")),
                None => Connection::Exiting { worker },
            },
            Connection::Exiting { worker } => {
                return Some((
                    UnitEvent::Exit(worker.exit_status().await),
                    Connection::Closed,
                ));
            }
            Connection::Closed => return None,
        }
    }
}

impl<P> Stream for SocketUnit<P> {
    type Item = UnitEvent<P>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl<P: Send + 'static> ExecutionUnit<P> for SocketUnit<P> {
    fn terminate(&mut self) {
        self.shutdown.cancel();
    }
}
