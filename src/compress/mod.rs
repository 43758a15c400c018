//! Stream codecs wrapping artifact files on disk.
//!
//! Backup writes through an encoder picked at dispatch time; restore reads
//! through the matching decoder. The uncompressed case stays plain buffered
//! I/O. Rewinding a compressed source is done by reopening it, which every
//! codec supports.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::str::FromStr;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::{Error, Result};

pub const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Bzip2,
    Lzma,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub codec: Codec,
    pub level: u32,
}

impl Compression {
    pub const NONE: Compression = Compression {
        codec: Codec::None,
        level: DEFAULT_LEVEL,
    };

    /// Wrap an artifact file for writing. The result must be closed with
    /// [`ArtifactWriter::finish`] or trailing encoder state is lost.
    pub fn writer(&self, file: File) -> ArtifactWriter {
        let buf = BufWriter::new(file);
        match self.codec {
            Codec::None => ArtifactWriter::Plain(buf),
            Codec::Gzip => {
                ArtifactWriter::Gzip(GzEncoder::new(buf, flate2::Compression::new(self.level)))
            }
            Codec::Bzip2 => {
                ArtifactWriter::Bzip2(BzEncoder::new(buf, bzip2::Compression::new(self.level)))
            }
            Codec::Lzma => ArtifactWriter::Lzma(XzEncoder::new(buf, self.level)),
        }
    }

    /// Wrap an artifact file for reading.
    pub fn reader(&self, file: File) -> Box<dyn Read> {
        let buf = BufReader::new(file);
        match self.codec {
            Codec::None => Box::new(buf),
            Codec::Gzip => Box::new(BufReader::new(GzDecoder::new(buf))),
            Codec::Bzip2 => Box::new(BufReader::new(BzDecoder::new(buf))),
            Codec::Lzma => Box::new(BufReader::new(XzDecoder::new(buf))),
        }
    }
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    /// Accepts `name` or `name-level`, e.g. `gzip` or `bzip2-9`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, level) = match s.rsplit_once('-') {
            Some((name, level)) => {
                let level: u32 = level
                    .parse()
                    .map_err(|_| Error::UnsupportedCompression(s.to_string()))?;
                (name, level)
            }
            None => (s, DEFAULT_LEVEL),
        };
        if level > 9 {
            return Err(Error::UnsupportedCompression(s.to_string()).into());
        }
        let codec = match name {
            "none" => Codec::None,
            "gzip" => Codec::Gzip,
            "bzip2" => Codec::Bzip2,
            "lzma" => Codec::Lzma,
            _ => return Err(Error::UnsupportedCompression(s.to_string()).into()),
        };
        Ok(Compression { codec, level })
    }
}

/// Write half of a codec. Encoders buffer internally, so the artifact is not
/// complete on disk until `finish` runs.
pub enum ArtifactWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Bzip2(BzEncoder<BufWriter<File>>),
    Lzma(XzEncoder<BufWriter<File>>),
}

impl ArtifactWriter {
    /// Flush encoder state and hand back the underlying file for fsync.
    pub fn finish(self) -> io::Result<File> {
        let buf = match self {
            ArtifactWriter::Plain(w) => w,
            ArtifactWriter::Gzip(e) => e.finish()?,
            ArtifactWriter::Bzip2(e) => e.finish()?,
            ArtifactWriter::Lzma(e) => e.finish()?,
        };
        buf.into_inner().map_err(|e| e.into_error())
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            ArtifactWriter::Plain(w) => w.write(data),
            ArtifactWriter::Gzip(w) => w.write(data),
            ArtifactWriter::Bzip2(w) => w.write(data),
            ArtifactWriter::Lzma(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ArtifactWriter::Plain(w) => w.flush(),
            ArtifactWriter::Gzip(w) => w.flush(),
            ArtifactWriter::Bzip2(w) => w.flush(),
            ArtifactWriter::Lzma(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn parses_compression_specs() {
        let c: Compression = "none".parse().unwrap();
        assert_eq!(c, Compression::NONE);
        let c: Compression = "gzip".parse().unwrap();
        assert_eq!(c.codec, Codec::Gzip);
        assert_eq!(c.level, DEFAULT_LEVEL);
        let c: Compression = "bzip2-9".parse().unwrap();
        assert_eq!(c.codec, Codec::Bzip2);
        assert_eq!(c.level, 9);
        let c: Compression = "lzma-1".parse().unwrap();
        assert_eq!(c.codec, Codec::Lzma);
        assert!("snappy".parse::<Compression>().is_err());
        assert!("gzip-99".parse::<Compression>().is_err());
    }

    #[test]
    fn codecs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
        for spec in ["none", "gzip", "bzip2-1", "lzma-1"] {
            let compression: Compression = spec.parse().unwrap();
            let path = dir.path().join(spec);

            let mut writer = compression.writer(File::create(&path).unwrap());
            writer.write_all(&payload).unwrap();
            writer.finish().unwrap();

            let mut reader = compression.reader(File::open(&path).unwrap());
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, payload, "codec {spec}");
        }
    }
}
