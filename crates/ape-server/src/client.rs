//! Peer side of the protocol, as spoken by the in-process tracer.

use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::descriptor::TargetMethodDescriptor;
use crate::wire::{self, Event, ProtocolError, TargetEventKind, HANDSHAKE};

pub struct TraceClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    methods: Vec<TargetMethodDescriptor>,
    thread: i32,
}

impl TraceClient {
    /// Connect and complete the handshake, announcing `thread` as the main
    /// thread and `directory` as the trace output directory.
    pub fn connect(
        socket: impl AsRef<Path>,
        thread: i32,
        directory: &str,
    ) -> Result<Self, ProtocolError> {
        let stream = UnixStream::connect(socket)?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);

        wire::write_i32(&mut writer, HANDSHAKE)?;
        writer.flush()?;
        let magic = wire::read_i32(&mut reader)?;
        if magic != HANDSHAKE {
            return Err(ProtocolError::BadHandshake(magic));
        }
        wire::write_i32(&mut writer, thread)?;
        wire::write_string(&mut writer, directory)?;
        writer.flush()?;
        let methods = wire::read_table(&mut reader)?;

        Ok(Self {
            reader,
            writer,
            methods,
            thread,
        })
    }

    pub fn methods(&self) -> &[TargetMethodDescriptor] {
        &self.methods
    }

    pub fn send(&mut self, event: &Event) -> Result<(), ProtocolError> {
        wire::write_event(&mut self.writer, event)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn entered(&mut self, method: i32, timestamp: i64) -> Result<(), ProtocolError> {
        self.send(&Event::Target {
            kind: TargetEventKind::Entered,
            thread: self.thread,
            method,
            timestamp,
        })
    }

    pub fn idle(&mut self, timestamp: i64) -> Result<(), ProtocolError> {
        self.send(&Event::Idle { timestamp })
    }

    /// Send raw bytes, for exercising the server's error paths.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Block until the server closes the connection.
    pub fn wait_closed(mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(std::io::Read::read(&mut self.reader, &mut buf), Ok(0) | Err(_))
    }
}
