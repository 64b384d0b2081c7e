//! Compression filter sitting between the output file and the tar encoder.

use super::Compression;
use flate2::write::GzEncoder;
use std::io::{self, Write};

/// zstd level used for `compression = "zstd"`.
pub const ZSTD_BEST_LEVEL: i32 = 19;

/// A byte sink that optionally compresses everything written to it.
///
/// `finish` must be called to flush the compressor's trailer; dropping the
/// writer without it leaves a truncated stream.
pub enum CompressedWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    pub fn new(inner: W, compression: Compression, level: u32) -> io::Result<Self> {
        let writer = match compression {
            Compression::Gzip => Self::Gzip(GzEncoder::new(inner, flate2::Compression::new(level))),
            Compression::Zstd => Self::Zstd(zstd::Encoder::new(inner, ZSTD_BEST_LEVEL)?),
            // Deflate is a per-entry zip method, never a stream filter.
            Compression::None | Compression::Deflate => Self::Plain(inner),
        };
        Ok(writer)
    }

    /// Write the compressor trailer and return the underlying writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(inner) => Ok(inner),
            Self::Gzip(encoder) => encoder.finish(),
            Self::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(inner) => inner.write(buf),
            Self::Gzip(encoder) => encoder.write(buf),
            Self::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(inner) => inner.flush(),
            Self::Gzip(encoder) => encoder.flush(),
            Self::Zstd(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn compress(compression: Compression, data: &[u8]) -> Vec<u8> {
        let mut writer = CompressedWriter::new(Vec::new(), compression, 6).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(compress(Compression::None, b"hello"), b"hello");
    }

    #[test]
    fn test_gzip_stream() {
        let data = b"hello hello hello hello".repeat(100);
        let compressed = compress(Compression::Gzip, &data);
        assert!(compressed.len() < data.len());

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_stream() {
        let data = b"zstd zstd zstd zstd".repeat(100);
        let compressed = compress(Compression::Zstd, &data);
        assert!(compressed.len() < data.len());
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), data);
    }
}
