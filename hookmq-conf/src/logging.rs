//! The `[log]` section.
//!
//! ```toml
//! [log]
//! to = "both"      # off | file | console | both
//! level = "debug"  # trace | debug | info | warn | error | critical
//! dir = "/var/log/hookmq"
//! file = "hookmq.log"
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Unexpected};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub to: To,
    pub level: Level,
    pub dir: String,
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { to: To::Console, level: Level::default(), dir: "/var/log/hookmq".into(), file: "hookmq.log".into() }
    }
}

impl Log {
    /// `dir` joined with `file`, empty when no file is configured.
    pub fn filename(&self) -> String {
        match (self.dir.trim_end_matches(['/', '\\']), self.file.as_str()) {
            (_, "") => String::new(),
            ("", file) => file.to_owned(),
            (dir, file) => format!("{dir}/{file}"),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    const NAMES: &'static [&'static str] = &["off", "file", "console", "both"];

    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }

    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }

    #[inline]
    pub fn off(&self) -> bool {
        *self == To::Off
    }
}

impl FromStr for To {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(To::Off),
            "file" => Ok(To::File),
            "console" => Ok(To::Console),
            "both" => Ok(To::Both),
            _ => Err(s.to_owned()),
        }
    }
}

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            To::Off => "off",
            To::File => "file",
            To::Console => "console",
            To::Both => "both",
        };
        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for To {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        To::from_str(&s).map_err(|s| de::Error::unknown_variant(&s, To::NAMES))
    }
}

/// Minimum severity that is written, an slog level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    inner: slog::Level,
}

impl Default for Level {
    fn default() -> Self {
        Self { inner: slog::Level::Info }
    }
}

impl Level {
    #[inline]
    pub fn new(inner: slog::Level) -> Self {
        Self { inner }
    }

    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.inner
    }

    /// The matching `log` facade filter, used when bridging `log` records into slog.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self.inner {
            slog::Level::Trace => log::LevelFilter::Trace,
            slog::Level::Debug => log::LevelFilter::Debug,
            slog::Level::Info => log::LevelFilter::Info,
            slog::Level::Warning => log::LevelFilter::Warn,
            slog::Level::Error | slog::Level::Critical => log::LevelFilter::Error,
        }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        slog::Level::from_str(&s)
            .map(Level::new)
            .map_err(|_| de::Error::invalid_value(Unexpected::Str(&s), &"trace, debug, info, warn, error or critical"))
    }
}
