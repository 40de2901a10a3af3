// src/logger.rs
use std::fmt;
use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt as fmt_layer, reload, Registry};

use crate::error::{Result, SoneiumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    None,
}

impl LogLevel {
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = SoneiumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "none" | "off" => Ok(LogLevel::None),
            other => Err(SoneiumError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

/// Handle to the installed subscriber's level filter.
#[derive(Clone)]
pub struct LogHandle {
    inner: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: LogLevel) -> Result<()> {
        self.inner
            .modify(|filter| *filter = level.as_filter())
            .map_err(|e| SoneiumError::Config(format!("failed to change log level: {e}")))
    }

    pub fn level(&self) -> Option<LevelFilter> {
        self.inner.clone_current()
    }
}

/// Installs a global fmt subscriber whose level can be changed afterwards.
pub fn init(level: LogLevel) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(level.as_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer::layer().with_target(false))
        .try_init()
        .map_err(|e| SoneiumError::Config(format!("failed to install logger: {e}")))?;
    Ok(LogHandle { inner: handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::None);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_none_silences_everything() {
        assert_eq!(LogLevel::None.as_filter(), LevelFilter::OFF);
        assert!(LogLevel::Debug < LogLevel::Error);
    }

    #[test]
    fn test_reload_handle_changes_level() {
        let handle = init(LogLevel::Info).unwrap();
        assert_eq!(handle.level(), Some(LevelFilter::INFO));
        handle.set_level(LogLevel::Debug).unwrap();
        assert_eq!(handle.level(), Some(LevelFilter::DEBUG));
    }
}
