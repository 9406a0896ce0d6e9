//! Configuration system for the `galaxy` core.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Terminal bridge settings.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell program to spawn. Defaults to `cmd.exe` on Windows and `bash`
    /// elsewhere when unset.
    pub shell: Option<String>,
}

impl TerminalConfig {
    /// The shell program this platform should run.
    pub fn shell_program(&self) -> String {
        self.shell.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                "cmd.exe".to_string()
            } else {
                "bash".to_string()
            }
        })
    }
}

/// Environment probe settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    /// Whether the toolchain probe runs on spawn.
    pub enabled: bool,
    /// Root directory holding versioned toolchain installs. Defaults to the
    /// platform convention (`C:\Program Files\Java`, `/usr/lib/jvm`).
    pub root: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
        }
    }
}

/// Local model server settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of the Ollama-compatible server.
    pub base_url: String,
    /// Model id override. When unset, the best installed model is picked
    /// from a priority list.
    pub model: Option<String>,
    /// Request timeout for chat completions, in seconds.
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: None,
            timeout_secs: 120,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub terminal: TerminalConfig,
    pub probe: ProbeConfig,
    pub ai: AiConfig,
}

impl Config {
    /// Load config from file, returning default config if file doesn't exist
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load config from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| toml::from_str(&contents).ok())
            .unwrap_or_default()
    }

    /// Get the config file path (~/.config/galaxy/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("galaxy").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(shell) = env::var("GALAXY_SHELL") {
            if !shell.is_empty() {
                self.terminal.shell = Some(shell);
            }
        }

        // GALAXY_PROBE_DISABLE=1 skips the toolchain probe on spawn
        if env::var("GALAXY_PROBE_DISABLE")
            .map(|v| v == "1")
            .unwrap_or(false)
        {
            self.probe.enabled = false;
        }

        if let Ok(root) = env::var("GALAXY_TOOLCHAIN_ROOT") {
            if !root.is_empty() {
                self.probe.root = Some(PathBuf::from(root));
            }
        }

        if let Ok(url) = env::var("GALAXY_OLLAMA_URL") {
            if !url.is_empty() {
                self.ai.base_url = url;
            }
        }
    }
}

/// Generate default config as TOML string
pub fn generate_default_config() -> String {
    r#"# Galaxy AI core configuration
# Place this file at ~/.config/galaxy/config.toml

[terminal]
# Shell program for the embedded terminal.
# Defaults to cmd.exe on Windows and bash elsewhere.
# shell = "bash"

[probe]
# Look for an installed JDK on spawn and prepend it to the session PATH.
enabled = true

# Root directory holding versioned JDK installs.
# Defaults to "C:\Program Files\Java" on Windows and "/usr/lib/jvm" elsewhere.
# root = "/usr/lib/jvm"

[ai]
# Base URL of the local Ollama-compatible model server.
base_url = "http://127.0.0.1:11434"

# Model id override. When unset, the best installed model is auto-selected.
# model = "deepseek-coder:6.7b"

# Request timeout for chat completions, in seconds.
timeout_secs = 120

# Environment variable overrides:
# GALAXY_SHELL           - shell program for the terminal bridge
# GALAXY_PROBE_DISABLE=1 - skip the toolchain probe
# GALAXY_TOOLCHAIN_ROOT  - probe root override
# GALAXY_OLLAMA_URL      - model server base URL
"#
    .to_string()
}

/// Print the default config to stdout
pub fn print_default_config() {
    print!("{}", generate_default_config());
}
