//! Little-endian wire codec shared by the server and the trace client.
//!
//! Integers are two's-complement little-endian; strings are an `i32` byte
//! count followed by UTF-8 bytes.

use std::io::{self, Read, Write};

use crate::descriptor::{DescriptorError, TargetMethodDescriptor};

pub const HANDSHAKE: i32 = 0x0abe_abe0;
pub const TARGET_ENTERED: i32 = 0xabea_be01_u32 as i32;
pub const TARGET_EXITED: i32 = 0xabea_be02_u32 as i32;
pub const TARGET_UNWIND: i32 = 0xabea_be03_u32 as i32;
pub const IDLE: i32 = 0xabe0_de04_u32 as i32;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad handshake value {0:#x}")]
    BadHandshake(i32),

    #[error("unknown event id {0:#x}")]
    UnknownEvent(i32),

    #[error("method id {method} outside table of {table}")]
    MethodOutOfRange { method: i32, table: usize },

    #[error("negative string length {0}")]
    NegativeLength(i32),

    #[error("string field declared {declared} bytes, peer sent {received}")]
    Truncated { declared: usize, received: usize },

    #[error("invalid UTF-8 in string field: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("transport: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Peer went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            ProtocolError::Truncated { .. } => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEventKind {
    Entered,
    Exited,
    Unwind,
}

impl TargetEventKind {
    pub fn id(self) -> i32 {
        match self {
            TargetEventKind::Entered => TARGET_ENTERED,
            TargetEventKind::Exited => TARGET_EXITED,
            TargetEventKind::Unwind => TARGET_UNWIND,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Target {
        kind: TargetEventKind,
        thread: i32,
        method: i32,
        timestamp: i64,
    },
    Idle {
        timestamp: i64,
    },
}

pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_i32<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn write_i64<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn read_string<R: Read>(r: &mut R) -> Result<String, ProtocolError> {
    let len = read_i32(r)?;
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }
    let declared = len as usize;
    let mut bytes = Vec::new();
    r.by_ref().take(declared as u64).read_to_end(&mut bytes)?;
    if bytes.len() != declared {
        return Err(ProtocolError::Truncated {
            declared,
            received: bytes.len(),
        });
    }
    Ok(String::from_utf8(bytes)?)
}

pub fn write_string<W: Write>(w: &mut W, value: &str) -> io::Result<()> {
    write_i32(w, value.len() as i32)?;
    w.write_all(value.as_bytes())
}

pub fn write_descriptor<W: Write>(w: &mut W, descriptor: &TargetMethodDescriptor) -> io::Result<()> {
    write_string(w, descriptor.class())?;
    write_string(w, descriptor.method())?;
    write_string(w, descriptor.signature())?;
    write_i32(w, descriptor.flags())
}

pub fn read_descriptor<R: Read>(r: &mut R) -> Result<TargetMethodDescriptor, ProtocolError> {
    let class = read_string(r)?;
    let method = read_string(r)?;
    let signature = read_string(r)?;
    let flags = read_i32(r)?;
    Ok(TargetMethodDescriptor::new(class, method, signature, flags)?)
}

/// Table size followed by every descriptor in id order.
pub fn encode_table(methods: &[TargetMethodDescriptor]) -> Vec<u8> {
    let mut out = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = write_i32(&mut out, methods.len() as i32);
    for descriptor in methods {
        let _ = write_descriptor(&mut out, descriptor);
    }
    out
}

pub fn read_table<R: Read>(r: &mut R) -> Result<Vec<TargetMethodDescriptor>, ProtocolError> {
    let len = read_i32(r)?;
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }
    (0..len).map(|_| read_descriptor(r)).collect()
}

/// Read one event. Target events must name a method inside a table of
/// `table_len` entries.
pub fn read_event<R: Read>(r: &mut R, table_len: usize) -> Result<Event, ProtocolError> {
    let id = read_i32(r)?;
    let kind = match id {
        TARGET_ENTERED => TargetEventKind::Entered,
        TARGET_EXITED => TargetEventKind::Exited,
        TARGET_UNWIND => TargetEventKind::Unwind,
        IDLE => {
            return Ok(Event::Idle {
                timestamp: read_i64(r)?,
            })
        }
        other => return Err(ProtocolError::UnknownEvent(other)),
    };
    let thread = read_i32(r)?;
    let method = read_i32(r)?;
    if method < 0 || method as usize >= table_len {
        return Err(ProtocolError::MethodOutOfRange {
            method,
            table: table_len,
        });
    }
    let timestamp = read_i64(r)?;
    Ok(Event::Target {
        kind,
        thread,
        method,
        timestamp,
    })
}

pub fn write_event<W: Write>(w: &mut W, event: &Event) -> io::Result<()> {
    match *event {
        Event::Target {
            kind,
            thread,
            method,
            timestamp,
        } => {
            write_i32(w, kind.id())?;
            write_i32(w, thread)?;
            write_i32(w, method)?;
            write_i64(w, timestamp)
        }
        Event::Idle { timestamp } => {
            write_i32(w, IDLE)?;
            write_i64(w, timestamp)
        }
    }
}
