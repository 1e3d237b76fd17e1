// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers.

Provides the digest-verifying reader used for all fetched content and
transparent decompression driven by magic bytes. Compression is never
inferred from file extensions: `.deb` members name their compression in
the ar entry, but the inner tar may still be uncompressed.
*/

use {
    crate::error::{Error, Result},
    sha2::{Digest, Sha256},
    std::io::{Chain, Cursor, Read},
};

/// An adapter for [Read] streams that accumulates a SHA-256 digest of all
/// data read through it.
///
/// Verification compares against the running digest, so the stream should
/// be fully consumed (see [drain]) before calling [HashReader::verify].
pub struct HashReader<R> {
    source: R,
    hasher: Sha256,
}

impl<R: Read> HashReader<R> {
    /// Create a new instance bound to a source reader.
    pub fn new(source: R) -> Self {
        Self {
            source,
            hasher: Sha256::new(),
        }
    }

    /// The hex-encoded digest of the data read so far.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Check the running digest against an expected hex-encoded SHA-256.
    ///
    /// Fails with [Error::HashMismatch] unless `expected` decodes to exactly
    /// 32 bytes equal to the digest. The comparison is constant time.
    pub fn verify(&self, expected: &str) -> Result<()> {
        let expected = hex::decode(expected).map_err(|_| Error::HashMismatch)?;

        let digest = self.hasher.clone().finalize();

        if !constant_time_eq(&expected, digest.as_slice()) {
            return Err(Error::HashMismatch);
        }

        Ok(())
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let size = self.source.read(buf)?;
        self.hasher.update(&buf[0..size]);

        Ok(size)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}

/// Consume a reader to EOF, discarding the data.
pub fn drain<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    std::io::copy(reader, &mut std::io::sink())
}

/// Compression format of a byte stream.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Compression {
    Gzip,
    Xz,
    Zstd,
    Bzip2,
    Lz4,
}

impl Compression {
    /// Identify a compression format from the leading bytes of a stream.
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::Gzip)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::Xz)
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::Zstd)
        } else if header.starts_with(b"BZh") {
            Some(Self::Bzip2)
        } else if header.starts_with(&[0x04, 0x22, 0x4d, 0x18]) {
            Some(Self::Lz4)
        } else {
            None
        }
    }
}

/// Whether the leading bytes look like a ustar/pax tar header.
pub fn is_tar_header(header: &[u8]) -> bool {
    header.len() >= 262 && &header[257..262] == b"ustar"
}

/// A reader with some already-consumed leading bytes put back in front.
pub type PeekedReader<R> = Chain<Cursor<Vec<u8>>, R>;

/// Read up to `len` bytes from a reader, returning the bytes and a reader
/// that replays them before the remainder of the stream.
pub fn peek<R: Read>(mut source: R, len: usize) -> std::io::Result<(Vec<u8>, PeekedReader<R>)> {
    let mut header = vec![0u8; len];
    let mut filled = 0;

    while filled < len {
        let size = source.read(&mut header[filled..])?;
        if size == 0 {
            break;
        }
        filled += size;
    }

    header.truncate(filled);

    Ok((header.clone(), Cursor::new(header).chain(source)))
}

/// Wrap a reader with a decoder for the given compression format.
pub fn decompressor<'a, R: Read + 'a>(
    compression: Compression,
    source: R,
) -> Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::Gzip => Box::new(flate2::read::GzDecoder::new(source)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(source)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(source)?),
        Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(source)),
        Compression::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(source)),
    })
}

/// Wrap a reader with transparent decompression.
///
/// If the stream's magic bytes match a known compression format, a decoder
/// is applied; otherwise the stream passes through unchanged.
pub fn decompress<'a, R: Read + 'a>(source: R) -> Result<Box<dyn Read + 'a>> {
    let (header, replay) = peek(source, 6)?;

    match Compression::detect(&header) {
        Some(compression) => decompressor(compression, replay),
        None => Ok(Box::new(replay)),
    }
}
