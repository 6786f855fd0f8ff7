// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use mapreduce_pool_core::{MessageSink, SinkError, WorkerMessage};
use serde::Serialize;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream};

/// Blocking worker end of a unit's connection
pub struct SocketSink<P> {
    stream: TcpStream,
    _payload: PhantomData<fn(P)>,
}

impl<P> SocketSink<P> {
    pub fn connect(addr: SocketAddr) -> Result<Self, SinkError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            _payload: PhantomData,
        })
    }
}

/// Writes one length-prefixed frame
pub fn write_frame(stream: &mut impl Write, body: &[u8]) -> io::Result<()> {
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds u32 length"))?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

impl<P: Serialize> MessageSink<P> for SocketSink<P> {
    fn send(&mut self, message: WorkerMessage<P>) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&message)?;
        write_frame(&mut self.stream, &body)?;
        Ok(())
    }
}
