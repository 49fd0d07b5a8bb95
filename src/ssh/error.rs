// SSH 错误类型定义

use std::fmt;

use thiserror::Error;

/// 握手失败所处的层级
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeLevel {
    /// TCP 连接 / 地址解析
    Socket,
    /// SSH 协议（密钥交换等）
    Protocol,
    /// 身份认证
    Authentication,
}

impl fmt::Display for HandshakeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Socket => "client-socket",
            Self::Protocol => "client-protocol",
            Self::Authentication => "client-authentication",
        };
        f.write_str(tag)
    }
}

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 私钥无法读取或解析
    #[error("Credential error: {0}")]
    Credential(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    ConnectTimeout(u64),

    /// 握手失败（携带失败层级）
    #[error("SSH handshake failed [{level}]: {message}")]
    Handshake {
        level: HandshakeLevel,
        message: String,
    },

    /// 当前未连接
    #[error("SSH not connected")]
    NotConnected,

    /// 远程命令以非零退出码结束且有 stderr 输出
    #[error("Command failed with exit code {}: {stderr}", display_code(.code))]
    Command { code: Option<u32>, stderr: String },

    /// 通道 / 传输层错误
    #[error("Transport error: {0}")]
    Transport(String),

    /// 连接已取消（被 disconnect 或新的 connect 取代）
    #[error("Connection cancelled")]
    Cancelled,
}

fn display_code(code: &Option<u32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

impl SshError {
    pub(crate) fn handshake(level: HandshakeLevel, message: impl Into<String>) -> Self {
        SshError::Handshake {
            level,
            message: message.into(),
        }
    }

    /// 是否为连接阶段的错误（而非命令执行错误）
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            SshError::Config(_)
                | SshError::Credential(_)
                | SshError::ConnectTimeout(_)
                | SshError::Handshake { .. }
                | SshError::Cancelled
        )
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Credential(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_message() {
        let err = SshError::Command {
            code: Some(2),
            stderr: "no such file".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command failed with exit code 2: no such file"
        );

        let err = SshError::Command {
            code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "Command failed with exit code unknown: killed");
    }

    #[test]
    fn test_handshake_level_tag() {
        let err = SshError::handshake(HandshakeLevel::Authentication, "denied");
        assert_eq!(
            err.to_string(),
            "SSH handshake failed [client-authentication]: denied"
        );
        assert!(err.is_connect_error());
        assert!(!SshError::NotConnected.is_connect_error());
    }
}
