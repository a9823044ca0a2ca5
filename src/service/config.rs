// Copyright 2025 jonefeewang@gmail.com
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


use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineConfig;
#[cfg(test)]
use crate::pipeline::FailurePolicy;

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub server_addr: String,
    pub connect_timeout_ms: u64,
    /// upper bound of a single frame, length prefix included
    pub max_frame_size: usize,
    pub read_buffer_size: usize,
    pub dispatch_queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            server_addr: "127.0.0.1:8080".to_string(),
            connect_timeout_ms: 10_000,
            max_frame_size: 8 * 1024 * 1024,
            read_buffer_size: 4 * 1024,
            dispatch_queue_capacity: 256,
            event_channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestConfig {
    pub default_timeout_ms: u64,
    pub default_retries: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            default_timeout_ms: 5_000,
            default_retries: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// 0 disables the heartbeat task
    pub period_ms: u64,
    pub timeout_ms: u64,
    pub retries: u32,
    pub command: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            period_ms: 60_000,
            timeout_ms: 5_000,
            retries: 2,
            command: "Heartbeat.Alive".to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub request: RequestConfig,
    pub heartbeat: HeartbeatConfig,
    pub pipeline: PipelineConfig,
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl RequestConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Option<Duration> {
        (self.period_ms > 0).then(|| Duration::from_millis(self.period_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ClientConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ClientConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("IMWIRE").separator("__"))
            .build()?;

        let client_config: ClientConfig = config.try_deserialize()?;
        client_config.validate()?;

        Ok(client_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.network.connect_timeout_ms == 0 {
            return Err(AppError::InvalidValue(
                "network.connect_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.network.max_frame_size <= 4 {
            return Err(AppError::InvalidValue(format!(
                "network.max_frame_size {} cannot hold a frame header",
                self.network.max_frame_size
            )));
        }
        if self.network.dispatch_queue_capacity == 0 || self.network.event_channel_capacity == 0 {
            return Err(AppError::InvalidValue(
                "network queue capacities must be greater than 0".into(),
            ));
        }
        if self.request.default_timeout_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(AppError::InvalidValue(
                "request and heartbeat timeouts must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
