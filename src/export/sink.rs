// ABOUTME: Output sinks for dumps: in-memory buffer, gzip helper and streaming file writer
// ABOUTME: Streaming files are closed on every exit path when the sink is dropped

use crate::error::{Result, TransferError};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination that dump writers push text into.
pub trait DumpOutput {
    fn put(&mut self, chunk: &str) -> Result<()>;
}

impl DumpOutput for String {
    fn put(&mut self, chunk: &str) -> Result<()> {
        self.push_str(chunk);
        Ok(())
    }
}

/// Append `.gz` when compressing, unless the path already ends with it.
///
/// # Examples
///
/// ```
/// # use dbtransfer::export::sink::output_path;
/// # use std::path::{Path, PathBuf};
/// assert_eq!(output_path(Path::new("d.sql"), true), PathBuf::from("d.sql.gz"));
/// assert_eq!(output_path(Path::new("d.sql.gz"), true), PathBuf::from("d.sql.gz"));
/// assert_eq!(output_path(Path::new("d.sql"), false), PathBuf::from("d.sql"));
/// ```
pub fn output_path(path: &Path, compress: bool) -> PathBuf {
    let has_gz = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if compress && !has_gz {
        let mut name = path.as_os_str().to_os_string();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    }
}

/// Gzip a buffer. Failure is an error, never empty output.
pub fn gzip(data: &[u8], path: &Path) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| TransferError::io(path, e))?;
    let compressed = encoder.finish().map_err(|e| TransferError::io(path, e))?;
    if compressed.is_empty() {
        return Err(TransferError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, "compression produced no output"),
        ));
    }
    Ok(compressed)
}

enum Writer {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

/// Streaming file writer, optionally gzip-encoded.
///
/// Tracks a SHA-256 over the uncompressed text.
pub struct StreamSink {
    path: PathBuf,
    writer: Option<Writer>,
    hasher: Sha256,
}

impl StreamSink {
    pub fn create(path: &Path, compress: bool) -> Result<Self> {
        let file = File::create(path).map_err(|e| TransferError::io(path, e))?;
        let buffered = BufWriter::new(file);
        let writer = if compress {
            Writer::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            Writer::Plain(buffered)
        };
        tracing::debug!("Streaming output to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            hasher: Sha256::new(),
        })
    }

    /// Flush everything, write the gzip trailer and return the hex checksum.
    pub fn finish(mut self) -> Result<String> {
        let path = self.path.clone();
        match self.writer.take() {
            Some(Writer::Plain(mut w)) => w.flush().map_err(|e| TransferError::io(&path, e))?,
            Some(Writer::Gzip(encoder)) => {
                let mut inner = encoder.finish().map_err(|e| TransferError::io(&path, e))?;
                inner.flush().map_err(|e| TransferError::io(&path, e))?;
            }
            None => {}
        }
        let digest = std::mem::take(&mut self.hasher).finalize();
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }
}

impl DumpOutput for StreamSink {
    fn put(&mut self, chunk: &str) -> Result<()> {
        self.hasher.update(chunk.as_bytes());
        let result = match self.writer.as_mut() {
            Some(Writer::Plain(w)) => w.write_all(chunk.as_bytes()),
            Some(Writer::Gzip(w)) => w.write_all(chunk.as_bytes()),
            None => Ok(()),
        };
        result.map_err(|e| TransferError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_produces_decodable_output() {
        let data = b"INSERT INTO t VALUES (1);\n";
        let compressed = gzip(data, Path::new("t.sql.gz")).unwrap();
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out.as_bytes(), data);
    }

    #[test]
    fn test_stream_sink_gzip_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv.gz");
        let mut sink = StreamSink::create(&path, true).unwrap();
        sink.put("id\n").unwrap();
        sink.put("1\n").unwrap();
        let checksum = sink.finish().unwrap();
        assert_eq!(checksum, crate::utils::sha256_hex(b"id\n1\n"));

        let bytes = std::fs::read(&path).unwrap();
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        assert_eq!(out, "id\n1\n");
    }

    #[test]
    fn test_stream_sink_create_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.sql");
        let err = StreamSink::create(&path, false).err().unwrap();
        assert!(err.to_string().contains("out.sql"));
    }
}
