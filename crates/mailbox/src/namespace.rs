use std::env;
use std::path::{Path, PathBuf};

/// Default directory backing the shared channel namespace.
pub const DEFAULT_DIR: &str = "/dev/shm";

/// Filename prefix separating mailbox files from anything else in the
/// namespace directory.
pub const DEFAULT_PREFIX: &str = "visiond_";

/// The shared namespace all processes on one host agree on: a directory plus
/// a filename prefix. One channel name maps to exactly one backing file.
#[derive(Debug, Clone)]
pub struct Namespace {
    dir: PathBuf,
    prefix: String,
}

impl Namespace {
    /// The host-wide default namespace.
    pub fn shared() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Namespace from `CHANNEL_NAMESPACE_DIR` / `CHANNEL_NAMESPACE_PREFIX`,
    /// falling back to the shared defaults.
    pub fn from_env() -> Self {
        let dir = env::var("CHANNEL_NAMESPACE_DIR").unwrap_or_else(|_| DEFAULT_DIR.to_string());
        let prefix =
            env::var("CHANNEL_NAMESPACE_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string());
        Self {
            dir: PathBuf::from(dir),
            prefix,
        }
    }

    /// Namespace rooted at an arbitrary directory, for tests.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, channel: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, channel))
    }

    /// The namespace-wide lock file guarding mailbox creation, attachment,
    /// and teardown. The leading dot keeps it out of the channel listing.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!(".{}lock", self.prefix))
    }

    /// Inverse of [`Namespace::path_for`] for files enumerated out of the
    /// namespace directory. Returns `None` for files that are not mailboxes.
    pub fn channel_from_file_name(&self, file_name: &str) -> Option<String> {
        file_name.strip_prefix(&self.prefix).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_roundtrip() {
        let ns = Namespace::at("/tmp/busns");
        let path = ns.path_for("forward");
        assert_eq!(path, PathBuf::from("/tmp/busns/visiond_forward"));

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(
            ns.channel_from_file_name(file_name).as_deref(),
            Some("forward")
        );
    }

    #[test]
    fn foreign_files_are_ignored() {
        let ns = Namespace::at("/tmp/busns");
        assert_eq!(ns.channel_from_file_name("unrelated.lock"), None);
    }
}
