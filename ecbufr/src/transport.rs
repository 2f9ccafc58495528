//! Byte transport underneath message framing.
//!
//! Framing talks to two small traits, [`ByteReader`] and [`ByteWriter`].
//! A short count from either of them is reported as an error by the
//! framing layer; retrying interrupted or non-blocking I/O is the adapter's
//! job, which [`StreamReader`] and [`StreamWriter`] do for `std::io` types.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::config::CodecConfig;
use crate::errors::{Error, Result};
use crate::structs::versions::{BUFRMessage, is_supported_edition};

const START_MARKER: &[u8; 4] = b"BUFR";

/// Octets dropped from the header string kept in front of a message.
const HEADER_SKIPPED: u8 = 0x04;

pub trait ByteReader {
    /// Fills as much of `buf` as the source can, returning the count. Zero
    /// means end of data.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

pub trait ByteWriter {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: ByteReader + ?Sized> ByteReader for &mut T {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_bytes(buf)
    }
}

impl<T: ByteWriter + ?Sized> ByteWriter for &mut T {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write_bytes(buf)
    }
}

/// Adapts a closure as a reader.
pub struct FnReader<F>(pub F);

impl<F> ByteReader for FnReader<F>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (self.0)(buf)
    }
}

/// Adapts a closure as a writer.
pub struct FnWriter<F>(pub F);

impl<F> ByteWriter for FnWriter<F>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.0)(buf)
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Reader over any `std::io::Read`, such as a file or a socket.
///
/// `WouldBlock` is retried in place, so the handle is expected to be in
/// blocking mode. A non-blocking socket that never becomes ready keeps this
/// adapter spinning.
pub struct StreamReader<R> {
    inner: R,
}

impl<R: Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        StreamReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteReader for StreamReader<R> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.inner.read(&mut buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if is_retryable(&e) => std::thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
        Ok(done)
    }
}

/// Writer over any `std::io::Write`. Like [`StreamReader`] it expects a
/// blocking handle.
pub struct StreamWriter<W> {
    inner: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        StreamWriter { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ByteWriter for StreamWriter<W> {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            match self.inner.write(&buf[done..]) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if is_retryable(&e) => std::thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
        loop {
            match self.inner.flush() {
                Err(e) if is_retryable(&e) => std::thread::yield_now(),
                other => return other.map(|_| done),
            }
        }
    }
}

/// Reader over an in-memory buffer, limited to its first `limit` bytes.
pub struct MemoryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MemoryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MemoryReader { data, pos: 0 }
    }

    pub fn with_limit(data: &'a [u8], limit: usize) -> Self {
        Self::new(&data[..limit.min(data.len())])
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl ByteReader for MemoryReader<'_> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writer into a caller-owned buffer. The buffer length is the cap; bytes
/// beyond it are refused, which surfaces as a short write.
pub struct MemoryWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> MemoryWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        MemoryWriter { buf, pos: 0 }
    }

    pub fn written(&self) -> usize {
        self.pos
    }
}

impl ByteWriter for MemoryWriter<'_> {
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(n)
    }
}

fn read_exact<R: ByteReader + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let actual = reader.read_bytes(buf)?;
    if actual != buf.len() {
        return Err(Error::ShortRead {
            expected: buf.len(),
            actual,
        });
    }
    Ok(())
}

fn write_all<W: ByteWriter + ?Sized>(writer: &mut W, buf: &[u8]) -> Result<()> {
    let actual = writer.write_bytes(buf)?;
    if actual != buf.len() {
        return Err(Error::ShortWrite {
            expected: buf.len(),
            actual,
        });
    }
    Ok(())
}

/// Consumes bytes up to and including the next start marker. Returns the
/// header bytes seen before it, or `None` when the data ends first.
fn seek_start<R: ByteReader + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut window = [0u8; 4];
    let mut seen = 0usize;
    let mut header = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        if reader.read_bytes(&mut byte)? == 0 {
            if seen > 0 {
                tracing::debug!("{} trailing bytes without a message", seen);
            }
            return Ok(None);
        }
        seen += 1;
        window.rotate_left(1);
        window[3] = byte[0];
        if seen >= 4 && &window == START_MARKER {
            // the first three marker octets were pushed as header
            header.truncate(header.len().saturating_sub(3));
            if !header.is_empty() {
                tracing::debug!("{} header bytes before message", header.len());
            }
            return Ok(Some(header));
        }
        if byte[0] != HEADER_SKIPPED {
            header.push(byte[0]);
        }
    }
}

/// Reads the next message from `reader`.
///
/// Returns `Ok(None)` at a clean end of data, that is when no start marker
/// shows up before the source is exhausted.
pub fn read_message<R: ByteReader + ?Sized>(
    reader: &mut R,
    config: &CodecConfig,
) -> Result<Option<BUFRMessage>> {
    let Some(header) = seek_start(reader)? else {
        return Ok(None);
    };

    let mut section0 = [0u8; 8];
    section0[..4].copy_from_slice(START_MARKER);
    read_exact(reader, &mut section0[4..])?;
    let total = u32::from_be_bytes([0, section0[4], section0[5], section0[6]]) as usize;
    let edition = section0[7];
    tracing::debug!("message edition {}, {} bytes", edition, total);

    if !is_supported_edition(edition) {
        return Err(Error::UnsupportedVersion(edition));
    }
    if total < section0.len() {
        return Err(Error::LengthMismatch {
            declared: total,
            actual: section0.len(),
        });
    }

    let mut bytes = vec![0u8; total];
    bytes[..8].copy_from_slice(&section0);
    read_exact(reader, &mut bytes[8..])?;

    let mut msg = BUFRMessage::parse(&bytes)?;
    msg.header = header;
    if config.verbose {
        tracing::info!(
            "BUFR edition {}, {} bytes, {} subsets, {} descriptors",
            edition,
            total,
            msg.subsets_count(),
            msg.descriptors().len()
        );
    }
    Ok(Some(msg))
}

/// Writes the header string and the encoded message. Returns the number of
/// bytes written.
pub fn write_message<W: ByteWriter + ?Sized>(writer: &mut W, msg: &BUFRMessage) -> Result<usize> {
    let bytes = msg.to_bytes()?;
    if !msg.header.is_empty() {
        write_all(writer, &msg.header)?;
    }
    write_all(writer, &bytes)?;
    Ok(msg.header.len() + bytes.len())
}

/// Reads one message from a file or socket.
pub fn read_message_from<R: Read>(source: R, config: &CodecConfig) -> Result<Option<BUFRMessage>> {
    read_message(&mut StreamReader::new(source), config)
}

pub fn write_message_to<W: Write>(sink: W, msg: &BUFRMessage) -> Result<usize> {
    write_message(&mut StreamWriter::new(sink), msg)
}

/// Reads one message from at most the first `limit` bytes of `data`.
/// Also returns the number of bytes consumed.
pub fn memread_message(
    data: &[u8],
    limit: usize,
    config: &CodecConfig,
) -> Result<(Option<BUFRMessage>, usize)> {
    let mut reader = MemoryReader::with_limit(data, limit);
    let msg = read_message(&mut reader, config)?;
    Ok((msg, reader.position()))
}

/// Encodes into `buf`, failing with a short write when it is too small.
pub fn memwrite_message(buf: &mut [u8], msg: &BUFRMessage) -> Result<usize> {
    write_message(&mut MemoryWriter::new(buf), msg)
}

/// Iterates the messages of a byte source.
///
/// A message that fails to decode is yielded as an error; iteration then
/// continues by scanning for the next start marker. Transport errors end
/// the iteration after being reported.
pub struct MessageStream<R> {
    reader: R,
    config: CodecConfig,
    done: bool,
}

impl<R: ByteReader> MessageStream<R> {
    pub fn new(reader: R, config: CodecConfig) -> Self {
        MessageStream {
            reader,
            config,
            done: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl MessageStream<StreamReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, config: CodecConfig) -> Result<Self> {
        Ok(Self::new(StreamReader::new(File::open(path)?), config))
    }
}

impl<R: ByteReader> Iterator for MessageStream<R> {
    type Item = Result<BUFRMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_message(&mut self.reader, &self.config) {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                if e.is_framing() {
                    tracing::warn!("Skipping corrupt message: {}", e);
                } else {
                    self.done = true;
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> BUFRMessage {
        let mut msg = BUFRMessage::new(4).unwrap();
        msg.section3.number_of_subsets = 1;
        msg.set_descriptors(vec![crate::core::FXY::new(0, 1, 1)]);
        msg.payload_mut().put_bits(42, 7).unwrap();
        msg.end_message().unwrap();
        msg
    }

    #[test]
    fn test_memory_round_trip() {
        let mut msg = message();
        msg.header = b"ISMN01 CWAO".to_vec();
        let mut buf = vec![0u8; 256];
        let written = memwrite_message(&mut buf, &msg).unwrap();
        assert_eq!(written, msg.header.len() + msg.total_length());

        let cfg = CodecConfig::default();
        let (read, consumed) = memread_message(&buf, written, &cfg).unwrap();
        let read = read.unwrap();
        assert_eq!(consumed, written);
        assert_eq!(read.header, b"ISMN01 CWAO");
        assert_eq!(read.to_bytes().unwrap(), msg.to_bytes().unwrap());
    }

    #[test]
    fn test_header_drops_control_octets() {
        let msg = message();
        let mut data = vec![0x01, 0x04, b'A', 0x04, b'B'];
        data.extend(msg.to_bytes().unwrap());
        let (read, _) = memread_message(&data, data.len(), &CodecConfig::default()).unwrap();
        assert_eq!(read.unwrap().header, vec![0x01, b'A', b'B']);
    }

    #[test]
    fn test_clean_end_and_short_read() {
        let cfg = CodecConfig::default();
        assert!(memread_message(b"", 0, &cfg).unwrap().0.is_none());
        assert!(memread_message(b"garbage", 7, &cfg).unwrap().0.is_none());

        let bytes = message().to_bytes().unwrap();
        let cut = memread_message(&bytes, bytes.len() - 1, &cfg);
        assert!(matches!(cut, Err(Error::ShortRead { .. })));
        assert!(cut.unwrap_err().is_transport());
    }

    #[test]
    fn test_short_write() {
        let msg = message();
        let mut small = vec![0u8; 10];
        assert!(matches!(
            memwrite_message(&mut small, &msg),
            Err(Error::ShortWrite { expected, actual: 10 }) if expected == msg.total_length()
        ));
    }

    #[test]
    fn test_fn_adapters() {
        let bytes = message().to_bytes().unwrap();
        let mut out = Vec::new();
        let n = write_message(
            &mut FnWriter(|b: &[u8]| -> io::Result<usize> {
                out.extend_from_slice(b);
                Ok(b.len())
            }),
            &message(),
        )
        .unwrap();
        assert_eq!(out, bytes);
        assert_eq!(n, bytes.len());

        // a source that hands out one byte per call
        let mut pos = 0;
        let mut reader = FnReader(|buf: &mut [u8]| -> io::Result<usize> {
            if pos == bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = bytes[pos];
            pos += 1;
            Ok(1)
        });
        let mut stream = StreamReader::new(std::io::Cursor::new(bytes.clone()));
        assert!(read_message(&mut stream, &CodecConfig::default()).unwrap().is_some());
        assert!(matches!(
            read_message(&mut reader, &CodecConfig::default()),
            Err(Error::ShortRead { expected: 4, actual: 1 })
        ));
    }

    struct Flaky {
        data: Vec<u8>,
        pos: usize,
        calls: usize,
        error: io::ErrorKind,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(io::Error::from(self.error));
            }
            if self.pos == self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(3).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_stream_reader_retries() {
        let bytes = message().to_bytes().unwrap();
        for error in [io::ErrorKind::Interrupted, io::ErrorKind::WouldBlock] {
            let flaky = Flaky {
                data: bytes.clone(),
                pos: 0,
                calls: 0,
                error,
            };
            let msg = read_message_from(flaky, &CodecConfig::default())
                .unwrap()
                .unwrap();
            assert_eq!(msg.to_bytes().unwrap(), bytes);
        }

        let broken = Flaky {
            data: bytes,
            pos: 0,
            calls: 1,
            error: io::ErrorKind::ConnectionReset,
        };
        assert!(matches!(
            read_message_from(broken, &CodecConfig::default()),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset
        ));
    }

    #[test]
    fn test_stream_resyncs_after_corruption() {
        let good = message().to_bytes().unwrap();
        let mut bad = good.clone();
        let n = bad.len();
        bad[n - 1] = b'X';

        let mut data = good.clone();
        data.extend(&bad);
        data.extend(b"noise");
        data.extend(&good);

        let results: Vec<_> =
            MessageStream::new(MemoryReader::new(&data), CodecConfig::default()).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::BadTerminator(_))));
        assert!(results[2].is_ok());
    }
}
