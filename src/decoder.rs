//! Streaming line decoder over a possibly-compressed byte source.
//!
//! The source is sniffed by its leading magic bytes (zstd or gzip, otherwise plain),
//! then read in fixed-size chunks. Complete lines are split off on `\n`; the trailing
//! partial line is carried over to the next chunk. Each line is decoded with
//! replacement of invalid UTF-8 and paired with its 1-based position in the full
//! (decompressed) stream. Nothing beyond one chunk plus one line is held in memory.

use crate::error::ItemError;
use flate2::read::MultiGzDecoder;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use zstd::stream::read::Decoder as ZstdDecoder;

pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Gzip,
    Plain,
}

impl Compression {
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else if head.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else {
            Compression::Plain
        }
    }
}

/// What the leading signature must look like before streaming starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MagicPolicy {
    /// Raw dumps: anything that isn't a zstd frame is rejected as corrupt.
    RequireZstd,
    /// Accept zstd, gzip, or plain text.
    Detect,
}

pub fn hex_bytes(b: &[u8]) -> String {
    b.iter().map(|x| format!("{x:02x}")).collect::<Vec<_>>().join(" ")
}

fn read_head(reader: &mut dyn Read, n: usize) -> io::Result<Vec<u8>> {
    let mut head = vec![0u8; n];
    let mut got = 0;
    while got < n {
        match reader.read(&mut head[got..]) {
            Ok(0) => break,
            Ok(k) => got += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    head.truncate(got);
    Ok(head)
}

/// Validate the signature and wrap `reader` in the matching decompressor.
/// `key` only labels the error.
pub fn open_decompressed(
    key: &str,
    mut reader: Box<dyn Read + Send>,
    policy: MagicPolicy,
) -> Result<(Compression, Box<dyn Read + Send>), ItemError> {
    let head = read_head(&mut reader, ZSTD_MAGIC.len())?;
    let kind = Compression::detect(&head);
    if policy == MagicPolicy::RequireZstd && kind != Compression::Zstd {
        return Err(ItemError::CorruptInput { key: key.to_string(), magic: hex_bytes(&head) });
    }
    let rejoined = Cursor::new(head).chain(reader);
    let stream: Box<dyn Read + Send> = match kind {
        Compression::Zstd => {
            let mut dec = ZstdDecoder::new(rejoined)?;
            // large dump frames need a 2 GiB window
            dec.window_log_max(31)?;
            Box::new(dec)
        }
        Compression::Gzip => Box::new(MultiGzDecoder::new(rejoined)),
        Compression::Plain => Box::new(rejoined),
    };
    Ok((kind, stream))
}

/// Lazy `(position, line)` sequence; see the module docs.
pub struct LineDecoder {
    inner: Box<dyn Read + Send>,
    chunk: Vec<u8>,
    carry: Vec<u8>,
    ready: VecDeque<String>,
    position: u64,
    eof: bool,
}

impl LineDecoder {
    pub fn new(inner: Box<dyn Read + Send>, chunk_bytes: usize) -> Self {
        Self {
            inner,
            chunk: vec![0u8; chunk_bytes.max(1)],
            carry: Vec::new(),
            ready: VecDeque::new(),
            position: 0,
            eof: false,
        }
    }

    /// Sniff + decompress + line-split in one call.
    pub fn open(
        key: &str,
        reader: Box<dyn Read + Send>,
        policy: MagicPolicy,
        chunk_bytes: usize,
    ) -> Result<Self, ItemError> {
        let (_, stream) = open_decompressed(key, reader, policy)?;
        Ok(Self::new(stream, chunk_bytes))
    }

    /// Position of the last line handed out (0 before the first).
    pub fn position(&self) -> u64 {
        self.position
    }

    fn push_line(&mut self, mut bytes: &[u8]) {
        if bytes.last() == Some(&b'\r') {
            bytes = &bytes[..bytes.len() - 1];
        }
        self.ready.push_back(String::from_utf8_lossy(bytes).into_owned());
    }

    fn fill(&mut self) -> io::Result<()> {
        while self.ready.is_empty() && !self.eof {
            let n = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.eof = true;
                if !self.carry.is_empty() {
                    let last = std::mem::take(&mut self.carry);
                    self.push_line(&last);
                }
                break;
            }
            let chunk = std::mem::take(&mut self.chunk);
            let mut start = 0;
            for (i, b) in chunk[..n].iter().enumerate() {
                if *b == b'\n' {
                    if self.carry.is_empty() {
                        self.push_line(&chunk[start..i]);
                    } else {
                        self.carry.extend_from_slice(&chunk[start..i]);
                        let line = std::mem::take(&mut self.carry);
                        self.push_line(&line);
                    }
                    start = i + 1;
                }
            }
            self.carry.extend_from_slice(&chunk[start..n]);
            self.chunk = chunk;
        }
        Ok(())
    }
}

impl Iterator for LineDecoder {
    type Item = io::Result<(u64, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.fill() {
            self.eof = true;
            self.ready.clear();
            return Some(Err(e));
        }
        let line = self.ready.pop_front()?;
        self.position += 1;
        Some(Ok((self.position, line)))
    }
}

// ----------------------------- integrity probes ----------------------------------

/// Decode up to `max_decompressed_bytes` and stop.
pub fn quick_validate(key: &str, reader: Box<dyn Read + Send>, policy: MagicPolicy, max_decompressed_bytes: u64) -> Result<(), ItemError> {
    let (_, stream) = open_decompressed(key, reader, policy)?;
    io::copy(&mut stream.take(max_decompressed_bytes), &mut io::sink())?;
    Ok(())
}

/// Decode the entire stream to EOF (validates zstd/gzip checksums).
pub fn validate_full(key: &str, reader: Box<dyn Read + Send>, policy: MagicPolicy) -> Result<(), ItemError> {
    let (_, mut stream) = open_decompressed(key, reader, policy)?;
    io::copy(&mut stream, &mut io::sink())?;
    Ok(())
}
