//! JIT configuration.
//!
//! Values come from a TOML document (the embedder's config file) or from the
//! environment; unspecified keys keep their defaults.

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub fn as_flag(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }

    fn parse(text: &str) -> Option<OptLevel> {
        match text.trim() {
            "none" | "0" => Some(OptLevel::None),
            "speed" | "1" => Some(OptLevel::Speed),
            "speed_and_size" | "2" => Some(OptLevel::SpeedAndSize),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    pub opt_level: OptLevel,
    /// Upper bound on one function's stack frame (value slots plus argument arrays).
    pub max_frame_bytes: u32,
    /// Run Cranelift's IR verifier on every function.
    pub verify: bool,
    /// Share one argument pointer array between call sites that fit in it.
    pub reuse_argument_arrays: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::Speed,
            max_frame_bytes: 64 * 1024,
            verify: true,
            reuse_argument_arrays: true,
        }
    }
}

pub const ENV_OPT_LEVEL: &str = "KILN_JIT_OPT_LEVEL";
pub const ENV_MAX_FRAME_BYTES: &str = "KILN_JIT_MAX_FRAME_BYTES";
pub const ENV_VERIFY: &str = "KILN_JIT_VERIFY";

impl JitConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, CompileError> {
        toml::from_str(text).map_err(|err| CompileError::Config(err.to_string()))
    }

    /// Defaults overridden by `KILN_JIT_*` environment variables.
    pub fn from_env() -> Result<Self, CompileError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, CompileError> {
        if let Some(raw) = lookup(ENV_OPT_LEVEL) {
            self.opt_level = OptLevel::parse(&raw)
                .ok_or_else(|| CompileError::Config(format!("{ENV_OPT_LEVEL}={raw}")))?;
        }
        if let Some(raw) = lookup(ENV_MAX_FRAME_BYTES) {
            self.max_frame_bytes = raw
                .trim()
                .parse()
                .map_err(|err| CompileError::Config(format!("{ENV_MAX_FRAME_BYTES}={raw}: {err}")))?;
        }
        if let Some(raw) = lookup(ENV_VERIFY) {
            self.verify = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_given_keys() {
        let config = JitConfig::from_toml_str("opt_level = \"none\"\nmax_frame_bytes = 256\n").unwrap();
        assert_eq!(config.opt_level, OptLevel::None);
        assert_eq!(config.max_frame_bytes, 256);
        assert!(config.verify);
        assert!(config.reuse_argument_arrays);
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let err = JitConfig::from_toml_str("inline = true").unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }

    #[test]
    fn environment_overrides() {
        let env = |key: &str| match key {
            ENV_OPT_LEVEL => Some("speed_and_size".to_string()),
            ENV_MAX_FRAME_BYTES => Some(" 512 ".to_string()),
            ENV_VERIFY => Some("0".to_string()),
            _ => None,
        };
        let config = JitConfig::default().with_overrides(env).unwrap();
        assert_eq!(config.opt_level, OptLevel::SpeedAndSize);
        assert_eq!(config.max_frame_bytes, 512);
        assert!(!config.verify);
    }

    #[test]
    fn bad_environment_value_is_a_config_error() {
        let env = |key: &str| (key == ENV_MAX_FRAME_BYTES).then(|| "lots".to_string());
        assert!(JitConfig::default().with_overrides(env).is_err());
    }
}
