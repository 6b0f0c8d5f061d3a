//! Signature-driven encoding and decoding of message bodies

use super::argument::{Argument, Message, MessageHeader, UntypedNewId};
use super::fixed::Fixed;
use super::{WireError, HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::protocol::{pad, padded_len, ArgSpec, ArgumentType, ObjectId};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::collections::VecDeque;
use std::os::fd::OwnedFd;

/// Append the frame for `msg` to `out` and its descriptors to `fds`.
///
/// Nothing is written unless the whole message encodes.
pub fn encode_message(
    msg: Message,
    signature: &[ArgSpec],
    out: &mut Vec<u8>,
    fds: &mut VecDeque<OwnedFd>,
) -> Result<(), WireError> {
    if msg.args.len() != signature.len() {
        return Err(WireError::ArgumentCount {
            expected: signature.len(),
            actual: msg.args.len(),
        });
    }

    let mut body: Vec<u8> = Vec::with_capacity(32);
    let mut new_fds = Vec::new();
    for (index, (arg, spec)) in msg.args.into_iter().zip(signature).enumerate() {
        let mismatch = WireError::SignatureMismatch {
            index,
            expected: spec.kind.as_str(),
        };
        match (arg, spec.kind) {
            (Argument::Int(v), ArgumentType::Int) => write_i32(&mut body, v),
            (Argument::Uint(v), ArgumentType::Uint) => write_u32(&mut body, v),
            (Argument::Fixed(v), ArgumentType::Fixed) => write_i32(&mut body, v.raw()),
            (Argument::Str(s), ArgumentType::Str) => match s {
                Some(s) => write_string(&mut body, &s)?,
                None if spec.nullable => write_u32(&mut body, 0),
                None => return Err(WireError::NullNotAllowed(spec.name)),
            },
            (Argument::Object(id), ArgumentType::Object) => {
                if id.is_null() && !spec.nullable {
                    return Err(WireError::NullNotAllowed(spec.name));
                }
                write_u32(&mut body, id.0);
            }
            (Argument::NewId(id), ArgumentType::NewId) if spec.interface.is_some() => {
                if id.is_null() {
                    return Err(WireError::NullNotAllowed(spec.name));
                }
                write_u32(&mut body, id.0);
            }
            (Argument::UntypedNewId(new_id), ArgumentType::NewId) if spec.interface.is_none() => {
                if new_id.id.is_null() {
                    return Err(WireError::NullNotAllowed(spec.name));
                }
                write_string(&mut body, &new_id.interface)?;
                write_u32(&mut body, new_id.version);
                write_u32(&mut body, new_id.id.0);
            }
            (Argument::Array(bytes), ArgumentType::Array) => write_array(&mut body, &bytes),
            (Argument::Fd(fd), ArgumentType::Fd) => new_fds.push(fd),
            _ => return Err(mismatch),
        }
    }

    let size = HEADER_SIZE + body.len();
    if size > MAX_MESSAGE_SIZE {
        return Err(WireError::MessageTooLarge(size));
    }
    let mut header = [0u8; HEADER_SIZE];
    MessageHeader {
        object: msg.object,
        opcode: msg.opcode,
        size: size as u16,
    }
    .encode(&mut header);

    out.extend_from_slice(&header);
    out.extend_from_slice(&body);
    fds.extend(new_fds);
    Ok(())
}

/// Decode the body of a frame whose header has already been read.
///
/// `body` is the frame without its header. Descriptors are taken from the
/// front of `fds` only once the message is known to be complete; on error
/// the queue is left untouched.
pub fn decode_message(
    header: MessageHeader,
    body: &[u8],
    signature: &[ArgSpec],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Message, WireError> {
    let wanted = signature
        .iter()
        .filter(|spec| spec.kind == ArgumentType::Fd)
        .count();
    if fds.len() < wanted {
        return Err(WireError::MissingFds {
            expected: wanted,
            available: fds.len(),
        });
    }

    let mut reader = BodyReader { buf: body, pos: 0 };
    let mut decoded: Vec<Option<Argument>> = Vec::with_capacity(signature.len());
    for spec in signature {
        let arg = match spec.kind {
            ArgumentType::Int => Some(Argument::Int(reader.read_u32()? as i32)),
            ArgumentType::Uint => Some(Argument::Uint(reader.read_u32()?)),
            ArgumentType::Fixed => Some(Argument::Fixed(Fixed(reader.read_u32()? as i32))),
            ArgumentType::Str => {
                let s = reader.read_string()?;
                if s.is_none() && !spec.nullable {
                    return Err(WireError::NullNotAllowed(spec.name));
                }
                Some(Argument::Str(s))
            }
            ArgumentType::Object => {
                let id = ObjectId(reader.read_u32()?);
                if id.is_null() && !spec.nullable {
                    return Err(WireError::NullNotAllowed(spec.name));
                }
                Some(Argument::Object(id))
            }
            ArgumentType::NewId => {
                if spec.interface.is_some() {
                    let id = ObjectId(reader.read_u32()?);
                    if id.is_null() {
                        return Err(WireError::NullNotAllowed(spec.name));
                    }
                    Some(Argument::NewId(id))
                } else {
                    let interface = reader
                        .read_string()?
                        .ok_or(WireError::NullNotAllowed(spec.name))?;
                    let version = reader.read_u32()?;
                    let id = ObjectId(reader.read_u32()?);
                    if id.is_null() {
                        return Err(WireError::NullNotAllowed(spec.name));
                    }
                    Some(Argument::UntypedNewId(UntypedNewId {
                        interface,
                        version,
                        id,
                    }))
                }
            }
            ArgumentType::Array => Some(Argument::Array(reader.read_array()?.to_vec())),
            // placeholder until the body is known to be well formed
            ArgumentType::Fd => None,
        };
        decoded.push(arg);
    }
    let remaining = body.len() - reader.pos;
    if remaining != 0 {
        return Err(WireError::TrailingBytes(remaining));
    }

    let mut args = Vec::with_capacity(decoded.len());
    for arg in decoded {
        match arg {
            Some(arg) => args.push(arg),
            None => match fds.pop_front() {
                Some(fd) => args.push(Argument::Fd(fd)),
                None => {
                    return Err(WireError::MissingFds {
                        expected: wanted,
                        available: 0,
                    })
                }
            },
        }
    }

    Ok(Message {
        object: header.object,
        opcode: header.opcode,
        args,
    })
}

/// Split one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete.
pub fn split_frame(buf: &[u8]) -> Result<Option<(MessageHeader, &[u8])>, WireError> {
    let header = match MessageHeader::parse(buf) {
        Some(header) => header,
        None => return Ok(None),
    };
    let size = header.check_size()?;
    if buf.len() < size {
        return Ok(None);
    }
    Ok(Some((header, &buf[HEADER_SIZE..size])))
}

struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < len {
            return Err(WireError::Truncated {
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Length-prefixed padded payload
    fn read_padded(&mut self) -> Result<&'a [u8], WireError> {
        let declared = self.read_u32()? as usize;
        let padded = padded_len(declared);
        if padded > self.remaining() {
            return Err(WireError::LengthOverrun {
                declared,
                remaining: self.remaining(),
            });
        }
        let bytes = self.take(padded)?;
        Ok(&bytes[..declared])
    }

    fn read_string(&mut self) -> Result<Option<String>, WireError> {
        let bytes = self.read_padded()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let (last, text) = match bytes.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };
        if *last != 0 {
            return Err(WireError::StringNotTerminated);
        }
        if text.contains(&0) {
            return Err(WireError::InteriorNul);
        }
        String::from_utf8(text.to_vec())
            .map(Some)
            .map_err(|_| WireError::InvalidUtf8)
    }

    fn read_array(&mut self) -> Result<&'a [u8], WireError> {
        self.read_padded()
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    // writes into a Vec cannot fail
    let _ = out.write_u32::<LittleEndian>(value);
}

fn write_i32(out: &mut Vec<u8>, value: i32) {
    let _ = out.write_i32::<LittleEndian>(value);
}

fn write_padding(out: &mut Vec<u8>, len: usize) {
    out.extend(std::iter::repeat(0u8).take(pad(len)));
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), WireError> {
    if s.as_bytes().contains(&0) {
        return Err(WireError::InteriorNul);
    }
    let len = s.len() + 1;
    write_u32(out, len as u32);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    write_padding(out, len);
    Ok(())
}

fn write_array(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
    write_padding(out, bytes.len());
}
