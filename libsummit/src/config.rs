// Copyright 2026 Summit contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, env, fs, path::PathBuf};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    if let Some(explicit) = config_file {
        info!("parsing explicitly passed in config ({})", explicit);
        let config_str = fs::read_to_string(explicit).context("reading config toml")?;
        return toml::from_str(&config_str).context("parsing config file");
    }

    let Some(path) = default_config_path() else {
        return Ok(Config::default());
    };
    if !path.exists() {
        return Ok(Config::default());
    }

    info!("parsing config ({})", path.display());
    let config_str = fs::read_to_string(&path).context("reading config toml")?;
    toml::from_str(&config_str).context("parsing config file")
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let mut p = PathBuf::from(xdg);
        p.push("summit");
        p.push("config.toml");
        return Some(p);
    }
    let home = env::var("HOME").ok()?;
    let mut p = PathBuf::from(home);
    p.push(".config");
    p.push("summit");
    p.push("config.toml");
    Some(p)
}

/// summit's configuration file, normally `~/.config/summit/config.toml`.
/// Every field is a default that CLI flags and environment variables
/// (§6) take precedence over.
#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Default for `SUMMIT_SOCKET`.
    pub socket: Option<String>,

    /// Default for `SUMMIT_COMMAND`, the program a fresh top-level
    /// session runs when no argv is given on the command line.
    pub command: Option<String>,

    /// Default for `SUMMIT_CLIENT`: path to the `summit-client` binary
    /// the server spawns to open a new window.
    pub client_path: Option<String>,

    /// Default for `SUMMIT_MUX`: path to the `summit-mux` binary the
    /// server launches as its long-running child.
    pub mux_path: Option<String>,

    /// Default for `SUMMIT_TERMINAL`: the terminal-emulator binary the
    /// server spawns to host a new client/window pair.
    pub terminal_path: Option<String>,

    /// Extra environment variables merged into every spawned session,
    /// on top of whatever the `run` command's own `env` list supplies.
    pub env: Option<HashMap<String, String>>,
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn parse() -> anyhow::Result<()> {
        let cases = vec![
            r#"
            socket = "/tmp/summit.socket"
            command = "/bin/zsh"
            "#,
            r#"
            [env]
            SUMMIT_NESTED = "1"
            "#,
            "",
        ];

        for case in cases.into_iter() {
            let _: Config = toml::from_str(case)?;
        }

        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn explicit_missing_file_errors() {
        let res = read_config(&Some("/does/not/exist/config.toml".to_string()));
        assert!(res.is_err());
    }

    #[test]
    #[timeout(30000)]
    fn no_config_file_yields_default() -> anyhow::Result<()> {
        // With no explicit path and an unwritable env, read_config should
        // fall back to defaults rather than erroring.
        std::env::remove_var("XDG_CONFIG_HOME");
        std::env::set_var("HOME", "/nonexistent-summit-test-home");
        let cfg = read_config(&None)?;
        assert!(cfg.socket.is_none());
        Ok(())
    }
}
