use crate::names;
use crate::namespace::Namespace;
use std::io;

/// Capability for enumerating the live channels of the shared namespace.
///
/// Discovery goes through this trait so the mailbox protocol itself never
/// scans a filesystem, and so hosts can substitute a fixed listing in tests
/// or a remote registry later.
pub trait ChannelDirectory {
    /// All channel names currently present, sorted.
    fn channels(&self) -> io::Result<Vec<String>>;

    /// Modules with at least one post or tune channel present.
    fn active_modules(&self) -> io::Result<Vec<String>> {
        let channels = self.channels()?;
        Ok(names::active_modules(channels.iter().map(String::as_str)))
    }
}

/// The default directory: enumerates the namespace's backing files.
pub struct ShmDirectory {
    ns: Namespace,
}

impl ShmDirectory {
    pub fn new(ns: Namespace) -> Self {
        Self { ns }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }
}

impl ChannelDirectory for ShmDirectory {
    fn channels(&self) -> io::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.ns.dir())? {
            let entry = entry?;
            if let Some(channel) = entry
                .file_name()
                .to_str()
                .and_then(|f| self.ns.channel_from_file_name(f))
            {
                out.push(channel);
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Mailbox;
    use tempfile::tempdir;

    #[test]
    fn enumerates_only_mailbox_files() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let _a = Mailbox::create(&ns, "forward", 16).unwrap();
        let _b = Mailbox::create(&ns, "module_gate_post%0%edges", 16).unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();

        let directory = ShmDirectory::new(ns);
        assert_eq!(
            directory.channels().unwrap(),
            vec!["forward", "module_gate_post%0%edges"]
        );
        assert_eq!(directory.active_modules().unwrap(), vec!["gate"]);
    }

    #[test]
    fn deleted_channels_disappear_from_the_listing() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mailbox = Mailbox::create(&ns, "forward", 16).unwrap();
        let directory = ShmDirectory::new(ns);
        assert_eq!(directory.channels().unwrap(), vec!["forward"]);

        mailbox.delete();
        assert!(directory.channels().unwrap().is_empty());
    }
}
