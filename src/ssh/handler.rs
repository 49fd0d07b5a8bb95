// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// SSH 客户端 Handler
///
/// russh 的会话任务持有 Handler，会话结束（断线、对端关闭、心跳超时）时
/// Handler 被丢弃，此时通过 `closed_tx` 通知管理器。
pub struct SshClientHandler {
    /// 服务器地址（用于日志）
    host: String,
    /// 连接关闭通知
    closed_tx: Option<oneshot::Sender<String>>,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(host: String, closed_tx: oneshot::Sender<String>) -> Self {
        Self {
            host,
            closed_tx: Some(closed_tx),
        }
    }
}

impl Drop for SshClientHandler {
    fn drop(&mut self) {
        if let Some(tx) = self.closed_tx.take() {
            debug!("[SSH] [{}] Session task finished", self.host);
            let _ = tx.send(format!("connection to {} closed", self.host));
        }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 部署目标由平台统一管理，这里记录指纹后接受
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        info!(
            "[SSH] [{}] Server key fingerprint: {}",
            self.host, fingerprint
        );
        debug!(
            "[SSH] [{}] Server key type: {}",
            self.host,
            server_public_key.algorithm()
        );

        async { Ok(true) }
    }
}
