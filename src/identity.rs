//! Benchmark identities.
//!
//! Every record is keyed by a stable identity string computed from the
//! benchmark file. The algorithm is pluggable through [`IdentityProvider`];
//! [`Sha256Identity`] hashes the raw file content.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{Attribute, Job, ResultRecord};
use crate::runner::{ExtractError, Extractor, Limits};

/// Computes the identity of a benchmark file.
pub trait IdentityProvider: Send + Sync {
    /// Identity string of the file at `path`.
    fn identify(&self, path: &Path) -> io::Result<String>;
}

impl<F> IdentityProvider for F
where
    F: Fn(&Path) -> io::Result<String> + Send + Sync,
{
    fn identify(&self, path: &Path) -> io::Result<String> {
        self(path)
    }
}

/// Hex-encoded SHA-256 of the file content.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Identity;

impl IdentityProvider for Sha256Identity {
    fn identify(&self, path: &Path) -> io::Result<String> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Extractor computing a file's identity and recording its path.
///
/// Produces `INSERT <feature> <path>` keyed by the computed identity, where
/// `feature` is the context's local path feature.
pub struct IdentityExtractor<P> {
    provider: P,
    feature: String,
}

impl<P: IdentityProvider> IdentityExtractor<P> {
    /// Record paths under `feature` using `provider`.
    pub fn new(provider: P, feature: impl Into<String>) -> Self {
        Self { provider, feature: feature.into() }
    }
}

impl<P: IdentityProvider> Extractor for IdentityExtractor<P> {
    fn name(&self) -> &str {
        "identity"
    }

    fn extract(&self, job: &Job, _limits: &Limits) -> Result<ResultRecord, ExtractError> {
        debug!(path = %job.path.display(), "hashing");
        let hash = self
            .provider
            .identify(&job.path)
            .map_err(|e| ExtractError::Failed(format!("{}: {e}", job.path.display())))?;
        Ok(ResultRecord {
            hash,
            attributes: vec![Attribute::insert(&self.feature, job.path.display().to_string())],
        })
    }
}
