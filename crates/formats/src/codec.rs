//! Pluggable payload decompression.
//!
//! The container decoders never look up a compression library at call
//! time; they receive a [`CodecBackend`] at construction. A build without
//! the `zstd` feature injects [`MissingCodec`], which turns every call into
//! a loud [`FormatError::Unsupported`] instead of a silent degradation.

use std::io::Read;

use crate::error::{FormatError, Result};

/// Capability interface for a single compression algorithm.
pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decompress `data` into a buffer of exactly `expected_size` bytes...
    /// or fewer, when the producer trimmed trailing zeroes. More than
    /// `expected_size` bytes is a structural error.
    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>>;
}

/// Zstandard backend (enabled by the default `zstd` cargo feature).
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdCodec;

#[cfg(feature = "zstd")]
impl CodecBackend for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn decompress(&self, data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(expected_size);
        let mut decoder = zstd::Decoder::new(data)
            .map_err(|e| FormatError::invalid("zstd stream", e.to_string()))?;
        decoder
            .read_to_end(&mut out)
            .map_err(|e| FormatError::invalid("zstd stream", e.to_string()))?;
        if out.len() > expected_size {
            return Err(FormatError::invalid(
                "zstd stream",
                format!("produced {} bytes, expected at most {expected_size}", out.len()),
            ));
        }
        Ok(out)
    }
}

/// Stub injected when a compression backend is compiled out.
#[derive(Debug, Clone, Copy)]
pub struct MissingCodec(pub &'static str);

impl CodecBackend for MissingCodec {
    fn name(&self) -> &'static str {
        self.0
    }

    fn decompress(&self, _data: &[u8], _expected_size: usize) -> Result<Vec<u8>> {
        Err(FormatError::Unsupported(format!(
            "{} support is not compiled into this build",
            self.0
        )))
    }
}

/// The zstd backend this build carries: real when the feature is on, a
/// loud stub otherwise.
pub fn zstd_backend() -> Box<dyn CodecBackend> {
    #[cfg(feature = "zstd")]
    {
        Box::new(ZstdCodec)
    }
    #[cfg(not(feature = "zstd"))]
    {
        Box::new(MissingCodec("zstd"))
    }
}

/// Inflate a raw deflate stream into exactly `out.len()` bytes.
///
/// A stream that ends before filling `out` is a hard failure, never a
/// short read; trailing compressed garbage past the needed output is
/// ignored, matching how block-oriented containers pad their streams.
pub fn inflate_exact(data: &[u8], out: &mut [u8]) -> Result<()> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    decoder.read_exact(out).map_err(|e| {
        FormatError::invalid(
            "deflate block",
            format!("stream ended early ({} bytes expected): {e}", out.len()),
        )
    })?;
    Ok(())
}
