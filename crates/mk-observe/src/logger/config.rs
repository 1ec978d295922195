use std::io::IsTerminal;

use mk_model::CHILD_PROCESS_ENV;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `mk_core=debug,warn`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

impl Default for LoggerConfig {
    /// Color only on an interactive stderr of a top-level process.
    fn default() -> Self {
        let child = std::env::var_os(CHILD_PROCESS_ENV).is_some();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: !child && std::io::stderr().is_terminal(),
        }
    }
}
