use std::io::{Read, Write};
use std::time::SystemTime;

use crate::error::{FluxError, Result};

/// Content-type hint passed to [`Bucket::put`].
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_type: Option<String>,
    pub length: u64,
}

/// Storage SPI consumed by multi-file readers (spec §6 "Storage SPI").
/// Remote object stores (S3, cloud blob storage, BigQuery staging areas)
/// are external collaborators that implement this; the core never talks to
/// a specific backend directly.
///
/// `M` is the backend's metadata/handle type for one object (e.g. an S3
/// `ObjectSummary`-alike) — left generic since the core treats it opaquely.
pub trait Bucket<M> {
    /// Lists objects under `path`, optionally recursing into nested
    /// prefixes.
    fn list_files(&self, path: &str, recursive: bool) -> Result<Box<dyn Iterator<Item = M> + '_>>;

    fn get(&self, meta: &M, out: &mut dyn Write) -> Result<u64>;

    fn get_as_stream(&self, meta: &M) -> Result<Box<dyn Read + Send>>;

    fn path(&self, meta: &M) -> String;

    fn length(&self, meta: &M) -> u64;

    fn last_updated(&self, meta: &M) -> SystemTime;

    /// Maps "not found" to [`crate::error::FluxErrorKind::Validation`] and
    /// all other transport errors to [`crate::error::FluxErrorKind::Io`],
    /// per spec §6.
    fn object_metadata(&self, key: &str) -> Result<ObjectMetadata>;

    fn delete(&self, meta: &M) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    fn put(
        &self,
        key: &str,
        input: &mut dyn Read,
        length: u64,
        content_type: &str,
        is_public: bool,
        allow_override: bool,
    ) -> Result<()>;

    /// Optional: generates a pre-signed, time-limited URL for `key`.
    /// Backends that do not support this return `Unsupported`.
    fn generate_signed_url(&self, _key: &str, _valid_for_secs: u64) -> Result<String> {
        Err(FluxError::unsupported("generate_signed_url is not supported by this Bucket"))
    }

    /// Optional: server-side composition of multiple objects into one.
    fn compose(&self, _sources: &[String], _destination: &str) -> Result<()> {
        Err(FluxError::unsupported("compose is not supported by this Bucket"))
    }

    /// Optional: a writable stream for `key`, for backends that support
    /// streaming uploads without a known length up front.
    fn output_stream(&self, _key: &str) -> Result<Box<dyn Write + Send>> {
        Err(FluxError::unsupported("output_stream is not supported by this Bucket"))
    }

    /// Optional: lists all regular files under `path`, honoring
    /// cooperative interruption for very large listings.
    fn all_regular_files_by_meta_interruptibly(
        &self,
        _path: &str,
        _is_cancelled: &dyn Fn() -> bool,
    ) -> Result<Vec<M>> {
        Err(FluxError::unsupported(
            "all_regular_files_by_meta_interruptibly is not supported by this Bucket",
        ))
    }
}
