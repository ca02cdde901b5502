//! Model provisioning.
//!
//! Ensures a usable weight file exists before inference starts:
//!
//! - A present, non-empty local file is used as-is, with no network access.
//! - Otherwise the file is fetched from the configured URL into `<file>.part`,
//!   checked (non-empty, optional SHA-256) and renamed into place. The partial
//!   file is removed on every failure path.
//! - If that fails the default policy aborts with a diagnostic. A fallback
//!   model is used only when the operator opted in, and the substitution is
//!   reported in [`ModelOrigin`].
//!
//! Loading is a single fallible step after the file is committed, so a caller
//! never receives a partially-initialised model handle.

mod fetch;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

pub use fetch::{ModelFetcher, OfflineFetcher};
#[cfg(feature = "download")]
pub use fetch::HttpFetcher;

/// What to do when the model is missing and cannot be downloaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// Load `ModelSpec::fallback_path` instead, with a warning.
    Fallback,
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "fallback" => Ok(Self::Fallback),
            other => Err(anyhow!(
                "unknown download failure policy '{}'; expected abort or fallback",
                other
            )),
        }
    }
}

/// Where the model should come from.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub path: PathBuf,
    pub url: Option<String>,
    /// Expected SHA-256 of the downloaded file, hex encoded.
    pub sha256: Option<String>,
    pub on_failure: FailurePolicy,
    pub fallback_path: Option<PathBuf>,
}

impl ModelSpec {
    pub fn local<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            url: None,
            sha256: None,
            on_failure: FailurePolicy::Abort,
            fallback_path: None,
        }
    }
}

/// How the model file was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelOrigin {
    Local,
    Downloaded { bytes: u64 },
    Fallback { reason: String },
}

/// A committed model file, ready to load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelFile {
    pub path: PathBuf,
    pub origin: ModelOrigin,
}

pub struct Provisioner<F> {
    fetcher: F,
}

impl<F: ModelFetcher> Provisioner<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Ensure the model file exists, downloading it if needed.
    pub fn ensure(&self, spec: &ModelSpec) -> Result<ModelFile> {
        if is_usable_file(&spec.path) {
            log::info!("using local model {}", spec.path.display());
            return Ok(ModelFile {
                path: spec.path.clone(),
                origin: ModelOrigin::Local,
            });
        }

        log::info!(
            "model {} not found locally, attempting download",
            spec.path.display()
        );
        match self.download(spec) {
            Ok(bytes) => {
                log::info!("downloaded {} ({} bytes)", spec.path.display(), bytes);
                Ok(ModelFile {
                    path: spec.path.clone(),
                    origin: ModelOrigin::Downloaded { bytes },
                })
            }
            Err(err) => self.on_download_failure(spec, err),
        }
    }

    /// Ensure the model file exists and load it with `load`.
    ///
    /// The loader sees the committed file and its origin, so a fallback model
    /// can be loaded with its own settings.
    pub fn provision<H, L>(&self, spec: &ModelSpec, load: L) -> Result<(H, ModelFile)>
    where
        L: FnOnce(&ModelFile) -> Result<H>,
    {
        let file = self.ensure(spec)?;
        let handle = load(&file)
            .with_context(|| format!("failed to load model {}", file.path.display()))?;
        Ok((handle, file))
    }

    fn download(&self, spec: &ModelSpec) -> Result<u64> {
        let url = spec.url.as_deref().ok_or_else(|| {
            anyhow!(
                "model file {} is missing and no download url is configured",
                spec.path.display()
            )
        })?;

        if let Some(parent) = spec.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create model directory {}", parent.display()))?;
        }

        let partial = PartialFile::create(&spec.path)?;
        let mut hasher = Sha256::new();
        let bytes = {
            let mut sink = HashingWriter {
                inner: BufWriter::new(partial.file()?),
                hasher: &mut hasher,
            };
            let bytes = self
                .fetcher
                .fetch(url, &mut sink)
                .with_context(|| format!("download of {} failed", url))?;
            sink.flush().context("flush partial model file")?;
            bytes
        };

        let on_disk = fs::metadata(partial.path())
            .context("stat partial model file")?
            .len();
        if bytes == 0 || on_disk == 0 {
            return Err(anyhow!("download of {} produced an empty file", url));
        }
        if on_disk != bytes {
            return Err(anyhow!(
                "download of {} wrote {} bytes but fetcher reported {}",
                url,
                on_disk,
                bytes
            ));
        }
        if let Some(expected) = spec.sha256.as_deref() {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(anyhow!(
                    "checksum mismatch for {}: expected {}, got {}",
                    url,
                    expected.trim(),
                    actual
                ));
            }
        }

        partial.commit(&spec.path)?;
        Ok(bytes)
    }

    fn on_download_failure(&self, spec: &ModelSpec, err: anyhow::Error) -> Result<ModelFile> {
        match (spec.on_failure, spec.fallback_path.as_ref()) {
            (FailurePolicy::Fallback, Some(fallback)) => {
                if !is_usable_file(fallback) {
                    return Err(err.context(format!(
                        "fallback model {} is not available either",
                        fallback.display()
                    )));
                }
                let reason = format!("{:#}", err);
                log::warn!(
                    "could not provision {} ({}); using fallback model {}",
                    spec.path.display(),
                    reason,
                    fallback.display()
                );
                Ok(ModelFile {
                    path: fallback.clone(),
                    origin: ModelOrigin::Fallback { reason },
                })
            }
            (FailurePolicy::Fallback, None) => Err(err.context(
                "download failure policy is 'fallback' but no fallback model is configured",
            )),
            (FailurePolicy::Abort, _) => Err(err.context(format!(
                "could not provision model {}",
                spec.path.display()
            ))),
        }
    }
}

fn is_usable_file(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => true,
        Ok(meta) if meta.is_file() => {
            log::warn!("ignoring empty model file {}", path.display());
            false
        }
        _ => false,
    }
}

/// `<target>.part`, removed on drop unless committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn create(target: &Path) -> Result<Self> {
        let mut name = target
            .file_name()
            .ok_or_else(|| anyhow!("model path {} has no file name", target.display()))?
            .to_os_string();
        name.push(".part");
        let path = target.with_file_name(name);
        File::create(&path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> Result<File> {
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))
    }

    fn commit(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target).with_context(|| {
            format!(
                "move {} into place at {}",
                self.path.display(),
                target.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove partial download {}: {}",
                    self.path.display(),
                    err
                );
            }
        }
    }
}

struct HashingWriter<'a, W: Write> {
    inner: W,
    hasher: &'a mut Sha256,
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_case_insensitively() {
        assert_eq!(" Abort ".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(
            "FALLBACK".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Fallback
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn partial_file_is_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("model.onnx");

        let partial = PartialFile::create(&target).unwrap();
        let part_path = partial.path().to_path_buf();
        assert_eq!(part_path, dir.path().join("model.onnx.part"));
        assert!(part_path.exists());
        drop(partial);
        assert!(!part_path.exists());

        let partial = PartialFile::create(&target).unwrap();
        fs::write(partial.path(), b"weights").unwrap();
        partial.commit(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"weights");
        assert!(!part_path.exists());
    }
}
