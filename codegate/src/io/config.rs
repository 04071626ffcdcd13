//! Agent configuration stored in `codegate.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Profile;
use crate::io::prompt::DEFAULT_CONTEXT_BUDGET_BYTES;

pub const DEFAULT_CONFIG_FILE: &str = "codegate.toml";

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub profile: Profile,
    pub tests: TestsConfig,
    pub suggester: SuggesterConfig,
    pub timeouts: TimeoutConfig,

    /// Bytes kept from each file an inspect reads.
    pub inspect_limit_bytes: usize,

    /// Truncate captured subprocess stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Upper bound on the rendered context handed to the suggester.
    pub context_budget_bytes: usize,

    /// Wall-clock budget for one task episode, in seconds.
    pub wall_clock_secs: u64,

    /// Sampling temperature passed to the suggester.
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Test command argv (e.g. `["pytest", "-x"]`).
    pub command: Vec<String>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SuggesterConfig {
    /// Suggestion command argv. Empty runs on heuristics alone.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_secs: u64,
    pub tests_secs: u64,
    pub suggest_secs: u64,
    pub git_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_secs: 30,
            tests_secs: 300,
            suggest_secs: 120,
            git_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn tests(&self) -> Duration {
        Duration::from_secs(self.tests_secs)
    }

    pub fn suggest(&self) -> Duration {
        Duration::from_secs(self.suggest_secs)
    }

    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git_secs)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            tests: TestsConfig::default(),
            suggester: SuggesterConfig::default(),
            timeouts: TimeoutConfig::default(),
            inspect_limit_bytes: 8000,
            output_limit_bytes: 1_000_000,
            context_budget_bytes: DEFAULT_CONTEXT_BUDGET_BYTES,
            wall_clock_secs: 30 * 60,
            temperature: 0.0,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.profile.max_rounds == 0 {
            return Err(anyhow!("profile.max_rounds must be > 0"));
        }
        if self.tests.command.is_empty() || self.tests.command[0].trim().is_empty() {
            return Err(anyhow!("tests.command must be a non-empty array"));
        }
        if self
            .suggester
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("suggester.command must start with a program"));
        }
        let timeouts = &self.timeouts;
        for (name, secs) in [
            ("timeouts.search_secs", timeouts.search_secs),
            ("timeouts.tests_secs", timeouts.tests_secs),
            ("timeouts.suggest_secs", timeouts.suggest_secs),
            ("timeouts.git_secs", timeouts.git_secs),
            ("wall_clock_secs", self.wall_clock_secs),
        ] {
            if secs == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.inspect_limit_bytes == 0 {
            return Err(anyhow!("inspect_limit_bytes must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }

    pub fn wall_clock(&self) -> Duration {
        Duration::from_secs(self.wall_clock_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path has no file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".codegate.tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.inspect_limit_bytes, 8000);
        assert_eq!(cfg.timeouts.tests(), Duration::from_secs(300));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codegate.toml");
        let mut cfg = AgentConfig::default();
        cfg.suggester.command = vec!["./suggest.sh".to_string()];
        cfg.profile.max_patch_attempts = 3;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!temp.path().join("codegate.toml.codegate.tmp").exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codegate.toml");
        fs::write(&path, "[profile]\nmax_rounds = 7\n\n[tests]\ncommand = [\"make\", \"test\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.profile.max_rounds, 7);
        assert_eq!(cfg.profile.max_diff_lines, 200);
        assert_eq!(cfg.tests.command, vec!["make", "test"]);
    }

    #[test]
    fn rejects_invalid_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("codegate.toml");
        fs::write(&path, "[tests]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("tests.command"));

        let cfg = AgentConfig {
            temperature: 5.0,
            ..AgentConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
