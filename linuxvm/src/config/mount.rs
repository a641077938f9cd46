//! Host-to-guest directory share parsing.

use crate::error::{LinuxvmError, LinuxvmResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A host directory shared into the guest over virtio-fs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// virtio-fs tag, assigned positionally (`mount0`, `mount1`, ...).
    pub tag: String,
    /// Host directory.
    pub source: PathBuf,
    /// Absolute mount point inside the guest.
    pub target: String,
    pub read_only: bool,
}

impl MountSpec {
    /// Parse every `--mount` value, keeping caller order.
    ///
    /// Tags are derived from the position in `specs`, so the n-th share is
    /// always exported as `mount{n}`.
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> LinuxvmResult<Vec<MountSpec>> {
        specs
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let mut spec: MountSpec = raw.as_ref().parse()?;
                spec.tag = format!("mount{}", i);
                Ok(spec)
            })
            .collect()
    }
}

impl FromStr for MountSpec {
    type Err = LinuxvmError;

    /// Accepts `HOST:GUEST` or `HOST:GUEST:ro`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, read_only) = match s.strip_suffix(":ro") {
            Some(rest) => (rest, true),
            None => (s.strip_suffix(":rw").unwrap_or(s), false),
        };

        let (host, guest) = rest.split_once(':').ok_or_else(|| {
            LinuxvmError::Validation(format!(
                "mount '{}' must have the form HOST:GUEST[:ro]",
                s
            ))
        })?;

        if host.is_empty() || guest.is_empty() {
            return Err(LinuxvmError::Validation(format!(
                "mount '{}' has an empty host or guest path",
                s
            )));
        }

        if !Path::new(guest).is_absolute() {
            return Err(LinuxvmError::Validation(format!(
                "mount '{}': guest path must be absolute",
                s
            )));
        }

        Ok(MountSpec {
            tag: String::new(),
            source: PathBuf::from(host),
            target: guest.to_string(),
            read_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_guest() {
        let spec: MountSpec = "/Users/me/src:/mnt/src".parse().unwrap();
        assert_eq!(spec.source, PathBuf::from("/Users/me/src"));
        assert_eq!(spec.target, "/mnt/src");
        assert!(!spec.read_only);
    }

    #[test]
    fn test_parse_read_only_suffix() {
        let spec: MountSpec = "/data:/data:ro".parse().unwrap();
        assert_eq!(spec.target, "/data");
        assert!(spec.read_only);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "/only-host".parse::<MountSpec>(),
            Err(LinuxvmError::Validation(_))
        ));
        assert!(":/guest".parse::<MountSpec>().is_err());
        assert!("/host:relative/guest".parse::<MountSpec>().is_err());
    }

    #[test]
    fn test_parse_all_assigns_positional_tags() {
        let mounts = MountSpec::parse_all(&["/a:/a", "/b:/b:ro", "/c:/c"]).unwrap();
        let tags: Vec<_> = mounts.iter().map(|m| m.tag.as_str()).collect();
        assert_eq!(tags, ["mount0", "mount1", "mount2"]);
        assert_eq!(mounts[1].source, PathBuf::from("/b"));
    }
}
