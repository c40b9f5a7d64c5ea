//! Model artifact acquisition
//!
//! **Algorithm:**
//! 1. Read the local artifact file; hash it with SHA-256
//! 2. If present and the hash matches the configured pin (or no pin is set),
//!    use it
//! 3. Otherwise, if a remote URL is configured, fetch it once with a bounded
//!    timeout and verify the pin
//! 4. Decode the JSON envelope in memory; on failure retry once in
//!    compatibility mode (streamed, tolerating a UTF-8 BOM)
//! 5. Check the envelope against the schema; only then is a fetched copy
//!    persisted over the local path
//!
//! There is at most one remote fetch and one compatibility retry per
//! acquisition. Failures are returned, never retried here.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hxp_common::config::ModelSourceConfig;
use hxp_common::FeatureSchema;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ArtifactEnvelope, ArtifactSource, ModelArtifact};

const USER_AGENT: &str = concat!("hxp-predict/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Artifact acquisition errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("artifact not found at {0} and no remote source configured")]
    NotFound(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {origin}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        origin: String,
        expected: String,
        actual: String,
    },

    #[error("remote fetch from {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("artifact decode failed: {first}; compatibility retry failed: {second}")]
    Decode { first: String, second: String },

    #[error("artifact rejected: {0}")]
    Incompatible(String),

    #[error("a model load is already in progress")]
    InProgress,
}

/// Raw artifact bytes plus provenance
#[derive(Debug, Clone)]
pub struct AcquiredBytes {
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub source: ArtifactSource,
}

/// Fetches and decodes the model artifact described by a [`ModelSourceConfig`]
#[derive(Debug, Clone)]
pub struct ArtifactAcquirer {
    config: ModelSourceConfig,
    http_client: Option<reqwest::Client>,
}

impl ArtifactAcquirer {
    pub fn new(config: ModelSourceConfig) -> Result<Self, LoadError> {
        let http_client = match &config.remote_url {
            Some(url) => Some(
                reqwest::Client::builder()
                    .user_agent(USER_AGENT)
                    .timeout(config.fetch_timeout)
                    .connect_timeout(CONNECT_TIMEOUT.min(config.fetch_timeout))
                    .build()
                    .map_err(|e| LoadError::Fetch {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Acquire, decode and validate the artifact against `schema`
    pub async fn load(&self, schema: &FeatureSchema) -> Result<ModelArtifact, LoadError> {
        let started = Instant::now();
        let acquired = self.acquire().await?;

        let envelope = match serde_json::from_slice::<ArtifactEnvelope>(&acquired.bytes) {
            Ok(envelope) => envelope,
            Err(first) => {
                warn!(
                    error = %first,
                    "Artifact decode failed, retrying in compatibility mode"
                );
                decode_compat(acquired.bytes.clone())
                    .await
                    .map_err(|second| LoadError::Decode {
                        first: first.to_string(),
                        second,
                    })?
            }
        };

        let name = envelope.name.clone();
        let classifier = envelope
            .into_classifier(schema)
            .map_err(LoadError::Incompatible)?;

        if acquired.source == ArtifactSource::Remote {
            let path = &self.config.path;
            if let Err(e) = persist_atomically(path, &acquired.bytes).await {
                // The fetched copy is still usable for this process
                warn!(path = %path.display(), error = %e, "Could not persist fetched artifact");
            }
        }

        let artifact = ModelArtifact::new(classifier, schema, acquired.source)
            .with_name(name)
            .with_sha256(acquired.sha256);

        info!(
            kind = artifact.kind(),
            source = ?artifact.source,
            sha256 = artifact.sha256.as_deref().unwrap_or_default(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model artifact ready"
        );

        Ok(artifact)
    }

    /// Obtain verified artifact bytes, falling back to the remote mirror
    ///
    /// Nothing is written to disk here; a fetched copy is persisted by
    /// [`load`](Self::load) once it has decoded and matched the schema.
    pub async fn acquire(&self) -> Result<AcquiredBytes, LoadError> {
        let path = &self.config.path;

        let local_failure = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let sha256 = sha256_hex(&bytes);
                info!(
                    path = %path.display(),
                    size_bytes = bytes.len(),
                    sha256 = %sha256,
                    "Found local model artifact"
                );
                match self.verify(&sha256, &path.display().to_string()) {
                    Ok(()) => {
                        return Ok(AcquiredBytes {
                            bytes,
                            sha256,
                            source: ArtifactSource::Local,
                        })
                    }
                    Err(err) => {
                        warn!(error = %err, "Local model artifact failed integrity check");
                        err
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Local model artifact not found");
                LoadError::NotFound(path.clone())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Local model artifact unreadable");
                LoadError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        };

        let (Some(url), Some(client)) = (&self.config.remote_url, &self.http_client) else {
            return Err(local_failure);
        };

        let bytes = fetch_remote(client, url).await?;
        let sha256 = sha256_hex(&bytes);
        self.verify(&sha256, url)?;

        info!(
            url = %url,
            size_bytes = bytes.len(),
            sha256 = %sha256,
            "Fetched model artifact from remote source"
        );

        Ok(AcquiredBytes {
            bytes,
            sha256,
            source: ArtifactSource::Remote,
        })
    }

    fn verify(&self, actual: &str, origin: &str) -> Result<(), LoadError> {
        match &self.config.sha256 {
            Some(expected) if expected != actual => Err(LoadError::ChecksumMismatch {
                origin: origin.to_string(),
                expected: expected.clone(),
                actual: actual.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Compatibility decode: stream the verified bytes, skipping a leading UTF-8 BOM
async fn decode_compat(bytes: Vec<u8>) -> Result<ArtifactEnvelope, String> {
    let reader = BufReader::new(std::io::Cursor::new(bytes));
    tokio::task::spawn_blocking(move || decode_streamed(reader))
        .await
        .map_err(|e| format!("decode task failed: {}", e))?
}

fn decode_streamed<R: BufRead>(mut reader: R) -> Result<ArtifactEnvelope, String> {
    let head = reader.fill_buf().map_err(|e| e.to_string())?;
    if head.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    serde_json::from_reader(reader).map_err(|e| e.to_string())
}

async fn fetch_remote(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, LoadError> {
    let fetch_error = |reason: String| LoadError::Fetch {
        url: url.to_string(),
        reason,
    };

    debug!(url = %url, "Fetching model artifact");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(format!("HTTP {}", status.as_u16())));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    Ok(body.to_vec())
}

/// Write to a sibling temp file, then rename over the target
async fn persist_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".download");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
