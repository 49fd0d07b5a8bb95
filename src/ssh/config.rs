// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::SshError;

/// 默认连接超时（秒）
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;

/// SSH 连接配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 私钥文件路径
    pub private_key_path: PathBuf,
    /// 私钥密码（如果有）
    pub passphrase: Option<String>,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            private_key_path: PathBuf::new(),
            passphrase: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// 心跳配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

impl SshConfig {
    /// 使用私钥认证创建配置
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            private_key_path: private_key_path.into(),
            ..Default::default()
        }
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// 目标地址 (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 校验必填字段
    pub fn validate(&self) -> Result<(), SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::Config("host is required".to_string()));
        }
        if self.port == 0 {
            return Err(SshError::Config("port must be non-zero".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::Config("username is required".to_string()));
        }
        if self.private_key_path.as_os_str().is_empty() {
            return Err(SshError::Config("private_key_path is required".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(SshError::Config(
                "connect_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // 心跳开启时由心跳负责探测断线，不设置不活动超时（exec 之间可能长时间空闲）
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        } else {
            config.inactivity_timeout = None;
        }
        config
    }
}
