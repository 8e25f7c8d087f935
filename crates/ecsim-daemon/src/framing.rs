//! Length-prefixed frame transport.
//!
//! Every frame travels as a 2-byte big-endian length followed by the raw
//! frame bytes, in both directions. Reads and writes tolerate socket
//! timeouts so a caller holding a stop flag can give up between polls.

use ecsim_common::error::{SimError, SimResult};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Result of waiting for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete frame.
    Frame(Vec<u8>),
    /// The peer closed the stream between frames.
    Closed,
    /// The stop flag was raised while waiting.
    Stopped,
}

enum Fill {
    Done,
    Eof,
    Stopped,
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Decide what a socket timeout means: keep waiting, stop, or fail.
fn on_timeout(stop: Option<&AtomicBool>) -> SimResult<bool> {
    match stop {
        Some(flag) => Ok(flag.load(Ordering::Relaxed)),
        None => Err(SimError::Transport("timed out".into())),
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], stop: Option<&AtomicBool>) -> SimResult<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Fill::Eof),
            Ok(0) => return Err(SimError::Transport("connection closed mid-frame".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => {
                if on_timeout(stop)? {
                    return Ok(Fill::Stopped);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Fill::Done)
}

/// Read one frame of 1..=`max_frame_size` bytes.
///
/// With a stop flag, socket timeouts are polls: the read resumes unless the
/// flag is set. Without one, a timeout is an error.
///
/// # Errors
///
/// Returns [`SimError::FrameLength`] for a zero or oversized length prefix and
/// [`SimError::Transport`] if the stream ends inside a frame.
pub fn read_frame<R: Read>(
    reader: &mut R,
    max_frame_size: usize,
    stop: Option<&AtomicBool>,
) -> SimResult<Received> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match read_full(reader, &mut prefix, stop)? {
        Fill::Done => {}
        Fill::Eof => return Ok(Received::Closed),
        Fill::Stopped => return Ok(Received::Stopped),
    }

    let len = usize::from(u16::from_be_bytes(prefix));
    if len == 0 || len > max_frame_size {
        return Err(SimError::FrameLength {
            len,
            max: max_frame_size,
        });
    }

    let mut frame = vec![0u8; len];
    match read_full(reader, &mut frame, stop)? {
        Fill::Done => Ok(Received::Frame(frame)),
        Fill::Eof => Err(SimError::Transport("connection closed mid-frame".into())),
        Fill::Stopped => Ok(Received::Stopped),
    }
}

/// Write one frame with its length prefix.
///
/// # Errors
///
/// Returns [`SimError::FrameLength`] for frames that do not fit the prefix,
/// and [`SimError::Transport`] if the stop flag is raised mid-write or the
/// peer stops reading.
pub fn write_frame<W: Write>(writer: &mut W, frame: &[u8], stop: Option<&AtomicBool>) -> SimResult<()> {
    let len = u16::try_from(frame.len())
        .ok()
        .filter(|len| *len != 0)
        .ok_or(SimError::FrameLength {
            len: frame.len(),
            max: usize::from(u16::MAX),
        })?;

    let mut message = Vec::with_capacity(LENGTH_PREFIX_SIZE + frame.len());
    message.extend_from_slice(&len.to_be_bytes());
    message.extend_from_slice(frame);

    let mut written = 0;
    while written < message.len() {
        match writer.write(&message[written..]) {
            Ok(0) => return Err(SimError::Transport("peer stopped reading".into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => {
                if on_timeout(stop)? {
                    return Err(SimError::Transport("stopped while writing".into()));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that times out forever.
    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    #[test]
    fn test_write_then_read() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[1, 2, 3], None).unwrap();
        assert_eq!(wire, vec![0, 3, 1, 2, 3]);

        let mut reader = Cursor::new(wire);
        assert_eq!(
            read_frame(&mut reader, 1500, None).unwrap(),
            Received::Frame(vec![1, 2, 3])
        );
        assert_eq!(read_frame(&mut reader, 1500, None).unwrap(), Received::Closed);
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let mut zero = Cursor::new(vec![0, 0]);
        assert_eq!(
            read_frame(&mut zero, 1500, None),
            Err(SimError::FrameLength { len: 0, max: 1500 })
        );

        let mut big = Cursor::new(vec![0x05, 0xDD]);
        assert_eq!(
            read_frame(&mut big, 1500, None),
            Err(SimError::FrameLength { len: 1501, max: 1500 })
        );

        let mut sink = Vec::new();
        assert!(write_frame(&mut sink, &[], None).is_err());
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let mut reader = Cursor::new(vec![0, 4, 1, 2]);
        assert!(matches!(
            read_frame(&mut reader, 1500, None),
            Err(SimError::Transport(_))
        ));
    }

    #[test]
    fn test_timeout_honors_stop_flag() {
        let stop = AtomicBool::new(true);
        assert_eq!(
            read_frame(&mut Idle, 1500, Some(&stop)).unwrap(),
            Received::Stopped
        );
        assert!(matches!(
            read_frame(&mut Idle, 1500, None),
            Err(SimError::Transport(_))
        ));
    }
}
