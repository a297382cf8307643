//! The channel naming convention.
//!
//! Raw capture channels use a bare name. A module's channels are derived from
//! its name: output frames are `module_<m>_post%<idx>%<name>` and control
//! values are `module_<m>_tune%<idx>%<label>`, where `<label>` is the control
//! codec's channel label (type tag + `_` + control name) and `<idx>` encodes
//! declaration order so external listeners present them deterministically.
//!
//! Everything here is pure string manipulation; enumeration of live channels
//! lives behind [`crate::directory::ChannelDirectory`].

use crate::errors::MailboxError;

pub const MODULE_PREFIX: &str = "module_";
const POST_MARKER: &str = "_post%";
const TUNE_MARKER: &str = "_tune%";

/// Channel names become path components, and `%` is the module-channel
/// delimiter, so both are rejected at the protocol boundary.
pub fn validate_channel_name(name: &str) -> Result<(), MailboxError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.contains('/') {
        Some("must not contain '/'")
    } else if name.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(MailboxError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Module names additionally reject `%`, which would corrupt the derived
/// post/tune channel names.
pub fn validate_module_name(name: &str) -> Result<(), MailboxError> {
    validate_channel_name(name)?;
    if name.contains('%') {
        return Err(MailboxError::InvalidName {
            name: name.to_string(),
            reason: "module names must not contain '%'",
        });
    }
    Ok(())
}

pub fn post_channel(module: &str, index: usize, name: &str) -> String {
    format!("{MODULE_PREFIX}{module}{POST_MARKER}{index}%{name}")
}

pub fn tune_channel(module: &str, index: usize, label: &str) -> String {
    format!("{MODULE_PREFIX}{module}{TUNE_MARKER}{index}%{label}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChannel {
    pub index: usize,
    /// Post name, or control-value label (`<tag>_<name>`).
    pub name: String,
}

fn parse_module_channel(module: &str, channel: &str, marker: &str) -> Option<ParsedChannel> {
    let prefix = format!("{MODULE_PREFIX}{module}{marker}");
    let rest = channel.strip_prefix(&prefix)?;
    let (index, name) = rest.split_once('%')?;
    Some(ParsedChannel {
        index: index.parse().ok()?,
        name: name.to_string(),
    })
}

pub fn parse_post_channel(module: &str, channel: &str) -> Option<ParsedChannel> {
    parse_module_channel(module, channel, POST_MARKER)
}

pub fn parse_tune_channel(module: &str, channel: &str) -> Option<ParsedChannel> {
    parse_module_channel(module, channel, TUNE_MARKER)
}

/// Module name owning `channel`, if it is a module post/tune channel.
pub fn module_of(channel: &str) -> Option<&str> {
    let rest = channel.strip_prefix(MODULE_PREFIX)?;
    let cut = rest.find(POST_MARKER).or_else(|| rest.find(TUNE_MARKER))?;
    Some(&rest[..cut])
}

/// Unique module names present in a channel listing, sorted for stable
/// presentation.
pub fn active_modules<'a>(channels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut modules: Vec<String> = channels
        .into_iter()
        .filter_map(module_of)
        .map(str::to_string)
        .collect();
    modules.sort();
    modules.dedup();
    modules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_validation() {
        assert!(validate_channel_name("forward").is_ok());
        assert!(validate_channel_name("module_gate_post%0%edges").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("a/b").is_err());
        assert!(validate_channel_name("a\0b").is_err());
    }

    #[test]
    fn module_name_rejects_delimiter() {
        assert!(validate_module_name("gate-on-forward").is_ok());
        assert!(validate_module_name("gate%0").is_err());
    }

    #[test]
    fn post_channel_roundtrip() {
        let channel = post_channel("gate-on-forward", 2, "edges");
        assert_eq!(channel, "module_gate-on-forward_post%2%edges");

        let parsed = parse_post_channel("gate-on-forward", &channel).unwrap();
        assert_eq!(parsed.index, 2);
        assert_eq!(parsed.name, "edges");

        assert!(parse_tune_channel("gate-on-forward", &channel).is_none());
        assert!(parse_post_channel("other", &channel).is_none());
    }

    #[test]
    fn tune_channel_roundtrip() {
        let channel = tune_channel("gate-on-forward", 0, "int_gain");
        assert_eq!(channel, "module_gate-on-forward_tune%0%int_gain");

        let parsed = parse_tune_channel("gate-on-forward", &channel).unwrap();
        assert_eq!(parsed.index, 0);
        assert_eq!(parsed.name, "int_gain");
    }

    #[test]
    fn active_module_extraction() {
        let channels = [
            "forward",
            "module_gate_post%0%edges",
            "module_gate_tune%0%int_gain",
            "module_poster_post%0%raw",
        ];
        assert_eq!(active_modules(channels), vec!["gate", "poster"]);
    }

    #[test]
    fn module_names_may_contain_underscores() {
        let channel = post_channel("zed_auto", 0, "raw");
        assert_eq!(module_of(&channel), Some("zed_auto"));
    }
}
