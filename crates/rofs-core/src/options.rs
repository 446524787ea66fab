//! Mount options.

use rofs_error::{Result, RofsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Read-ahead policy handed to the decompression front-end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    Disabled,
    ReadAhead,
    #[default]
    ReadAround,
}

impl CacheStrategy {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ReadAhead => "readahead",
            Self::ReadAround => "readaround",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheStrategy {
    type Err = RofsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disabled" => Ok(Self::Disabled),
            "readahead" => Ok(Self::ReadAhead),
            "readaround" => Ok(Self::ReadAround),
            other => Err(RofsError::InvalidOption(format!(
                "unrecognized cache_strategy {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    pub cache_strategy: CacheStrategy,
    /// Extra device paths; the first is device id 1.
    pub devices: Vec<PathBuf>,
    pub user_xattr: bool,
    pub acl: bool,
    /// Resolve device id 0 through the mapped windows of extra devices and
    /// let out-of-window addresses fall back to the primary device.
    pub flat_device_addressing: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_strategy: CacheStrategy::default(),
            devices: Vec::new(),
            user_xattr: true,
            acl: true,
            flat_device_addressing: false,
        }
    }
}

impl MountOptions {
    /// Parse a comma-separated option string such as
    /// `"noacl,cache_strategy=readahead,device=/dev/vdb"`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut opts = Self::default();
        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };
            match (key, value) {
                ("user_xattr", None) => opts.user_xattr = true,
                ("nouser_xattr", None) => opts.user_xattr = false,
                ("acl", None) => opts.acl = true,
                ("noacl", None) => opts.acl = false,
                ("flat_device_addressing", None) => opts.flat_device_addressing = true,
                ("cache_strategy", Some(name)) => opts.cache_strategy = name.parse()?,
                ("device", Some(path)) if !path.is_empty() => opts.devices.push(PathBuf::from(path)),
                _ => {
                    return Err(RofsError::InvalidOption(format!(
                        "unrecognized mount option {token:?}"
                    )));
                }
            }
        }
        Ok(opts)
    }
}

impl FromStr for MountOptions {
    type Err = RofsError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Canonical option string, the form shown for a mounted image.
impl fmt::Display for MountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.user_xattr { "user_xattr" } else { "nouser_xattr" })?;
        f.write_str(if self.acl { ",acl" } else { ",noacl" })?;
        write!(f, ",cache_strategy={}", self.cache_strategy)?;
        for dev in &self.devices {
            write!(f, ",device={}", dev.display())?;
        }
        if self.flat_device_addressing {
            f.write_str(",flat_device_addressing")?;
        }
        Ok(())
    }
}
