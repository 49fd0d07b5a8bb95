// SSH 客户端核心实现
// 基于 russh 的 Connector：TCP 连接 -> SSH 握手 -> 公钥认证

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{AuthResult, Handle};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::config::SshConfig;
use super::error::{HandshakeLevel, SshError};
use super::handler::SshClientHandler;
use super::session::RusshTransport;
use super::transport::{Connector, KeyMaterial, TransportLink};

/// 基于 russh 的连接器
#[derive(Clone, Copy, Debug, Default)]
pub struct RusshConnector;

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        config: &SshConfig,
        key: &KeyMaterial,
    ) -> Result<TransportLink, SshError> {
        SshClient::new(config.clone()).connect(key).await
    }
}

/// SSH 客户端
/// 负责建立单次 SSH 连接
pub struct SshClient {
    /// 连接配置
    config: SshConfig,
}

impl SshClient {
    /// 创建新的 SSH 客户端
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// 执行连接（超时由调用方控制）
    pub async fn connect(&self, key: &KeyMaterial) -> Result<TransportLink, SshError> {
        let target = format!(
            "{}@{}:{}",
            self.config.username, self.config.host, self.config.port
        );
        info!("[SSH] Connecting to {}...", target);

        // 先解析私钥，避免无效密钥浪费一次握手
        let private_key = self.decode_private_key(key)?;

        // 解析地址
        let socket_addr = tokio::net::lookup_host(self.config.address())
            .await
            .map_err(|e| {
                SshError::handshake(
                    HandshakeLevel::Socket,
                    format!("Failed to resolve address: {}", e),
                )
            })?
            .next()
            .ok_or_else(|| SshError::handshake(HandshakeLevel::Socket, "No valid address found"))?;

        // TCP 连接
        let tcp_stream = TcpStream::connect(socket_addr).await.map_err(|e| {
            SshError::handshake(HandshakeLevel::Socket, format!("TCP connect failed: {}", e))
        })?;
        debug!("[SSH] TCP connection established to {}", socket_addr);

        // SSH 握手
        let russh_config = Arc::new(self.config.to_russh_config());
        let (closed_tx, closed_rx) = oneshot::channel();
        let handler = SshClientHandler::new(self.config.host.clone(), closed_tx);

        let mut handle = russh::client::connect_stream(russh_config, tcp_stream, handler)
            .await
            .map_err(|e| SshError::handshake(HandshakeLevel::Protocol, e.to_string()))?;
        debug!("[SSH] SSH handshake completed");

        // 认证
        self.authenticate(&mut handle, private_key).await?;
        info!("[SSH] Connected to {}", target);

        let transport = RusshTransport::new(Arc::new(handle), self.config.host.clone());
        Ok(TransportLink {
            transport: Arc::new(transport),
            closed: closed_rx,
        })
    }

    /// 公钥认证
    async fn authenticate(
        &self,
        handle: &mut Handle<SshClientHandler>,
        key: russh::keys::PrivateKey,
    ) -> Result<(), SshError> {
        debug!(
            "[SSH] Authenticating as '{}' with {:?}",
            self.config.username, self.config.private_key_path
        );

        let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = handle
            .authenticate_publickey(&self.config.username, key_with_alg)
            .await
            .map_err(|e| SshError::handshake(HandshakeLevel::Authentication, e.to_string()))?;

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::handshake(
                        HandshakeLevel::Authentication,
                        "Partial authentication - additional auth required",
                    ));
                }
                Err(SshError::handshake(
                    HandshakeLevel::Authentication,
                    format!(
                        "Public key authentication failed. Server suggests: {:?}",
                        remaining_methods
                    ),
                ))
            }
        }
    }

    /// 解析私钥内容
    fn decode_private_key(&self, key: &KeyMaterial) -> Result<russh::keys::PrivateKey, SshError> {
        let text = String::from_utf8_lossy(&key.data);
        russh::keys::decode_secret_key(&text, self.config.passphrase.as_deref()).map_err(|e| {
            SshError::Credential(format!("Failed to decode key {:?}: {}", key.path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_invalid_key_is_credential_error() {
        let client = SshClient::new(SshConfig::new("127.0.0.1", 22, "deploy", "/keys/bad"));
        let key = KeyMaterial {
            path: PathBuf::from("/keys/bad"),
            data: b"not a private key".to_vec(),
        };

        let err = match client.connect(&key).await {
            Err(e) => e,
            Ok(_) => panic!("garbage key should not connect"),
        };
        assert!(matches!(err, SshError::Credential(_)), "got {err:?}");
    }
}
