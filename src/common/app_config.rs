// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaRocksConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static NovaRocksConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaRocksConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static NovaRocksConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVAROCKS_CONFIG")
        && !p.trim().is_empty()
    {
        return Ok(PathBuf::from(p));
    }

    let candidates = [PathBuf::from("novarocks.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVAROCKS_CONFIG or create ./novarocks.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct NovaRocksConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_exchange=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub exchange: ExchangeConfig,

    #[serde(default)]
    pub profile: ProfileConfig,
}

impl NovaRocksConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaRocksConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(&self.log_level)
    }
}

impl Default for NovaRocksConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            exchange: ExchangeConfig::default(),
            profile: ProfileConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExchangeConfig {
    /// Unicast queue capacity is `factor * registered destinations`.
    #[serde(default = "default_queue_capacity_factor")]
    pub queue_capacity_factor: usize,
    #[serde(default = "default_broadcast_buffer_size_limit_bytes")]
    pub broadcast_buffer_size_limit_bytes: i64,
    #[serde(default = "default_broadcast_buffer_blocks_limit")]
    pub broadcast_buffer_blocks_limit: i64,
    #[serde(default = "default_transfer_large_data_by_brpc")]
    pub transfer_large_data_by_brpc: bool,
    #[serde(default = "default_min_http_brpc_size_bytes")]
    pub min_http_brpc_size_bytes: usize,
    #[serde(default = "default_ignore_eovercrowded")]
    pub ignore_eovercrowded: bool,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,
}

fn default_queue_capacity_factor() -> usize {
    64
}

fn default_broadcast_buffer_size_limit_bytes() -> i64 {
    20 * 1024 * 1024
}

fn default_broadcast_buffer_blocks_limit() -> i64 {
    32
}

fn default_transfer_large_data_by_brpc() -> bool {
    true
}

fn default_min_http_brpc_size_bytes() -> usize {
    1usize << 31 // brpc attachments above 2GB must go through http
}

fn default_ignore_eovercrowded() -> bool {
    true
}

fn default_rpc_timeout_ms() -> u64 {
    60_000
}

fn default_io_threads() -> usize {
    4
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            queue_capacity_factor: default_queue_capacity_factor(),
            broadcast_buffer_size_limit_bytes: default_broadcast_buffer_size_limit_bytes(),
            broadcast_buffer_blocks_limit: default_broadcast_buffer_blocks_limit(),
            transfer_large_data_by_brpc: default_transfer_large_data_by_brpc(),
            min_http_brpc_size_bytes: default_min_http_brpc_size_bytes(),
            ignore_eovercrowded: default_ignore_eovercrowded(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            io_threads: default_io_threads(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_profile_level")]
    pub level: i32,
    /// Only consulted when `level > 3`.
    #[serde(default = "default_rpc_verbose_profile_max_instance_count")]
    pub rpc_verbose_profile_max_instance_count: usize,
}

fn default_profile_level() -> i32 {
    1
}

fn default_rpc_verbose_profile_max_instance_count() -> usize {
    5
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            level: default_profile_level(),
            rpc_verbose_profile_max_instance_count: default_rpc_verbose_profile_max_instance_count(
            ),
        }
    }
}
