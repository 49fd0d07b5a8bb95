// SSH 会话
// 连接成功后的传输对象，每条命令打开一个独立的执行通道

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::ChannelMsg;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::SshError;
use super::handler::SshClientHandler;
use super::transport::{ChannelEvent, ChannelHandle, Transport};

// 使用 russh::client::Msg 作为消息类型
type RusshChannel = russh::Channel<Msg>;

/// stderr 的扩展数据类型码
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// 基于 russh Handle 的传输连接
/// 内部持有共享 Handle，支持并发打开多个通道
pub struct RusshTransport {
    handle: Arc<Handle<SshClientHandler>>,
    host: String,
}

impl RusshTransport {
    pub fn new(handle: Arc<Handle<SshClientHandler>>, host: String) -> Self {
        Self { handle, host }
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_exec(&self, command: &str) -> Result<ChannelHandle, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Transport(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Transport(format!("Failed to exec: {}", e)))?;

        let (handle, events, close_signal) = ChannelHandle::new();
        tokio::spawn(pump_channel(channel, events, close_signal));
        Ok(handle)
    }

    async fn close(&self) {
        debug!("[SSH] [{}] Disconnecting", self.host);
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("[SSH] [{}] Disconnect failed: {}", self.host, e);
        }
    }
}

/// 后台读取任务：把通道消息转换为 ChannelEvent
///
/// 会话在通道关闭前消失时发送 Error；句柄被丢弃时主动关闭远程通道。
async fn pump_channel(
    mut channel: RusshChannel,
    events: mpsc::UnboundedSender<ChannelEvent>,
    close_signal: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = close_signal.cancelled() => {
                debug!("[SSH] Channel {:?} abandoned by consumer, closing", channel.id());
                if let Err(e) = channel.close().await {
                    debug!("[SSH] Channel {:?} close failed: {}", channel.id(), e);
                }
                return;
            }
            msg = channel.wait() => {
                let event = match msg {
                    Some(ChannelMsg::Data { data }) => ChannelEvent::Stdout(data.to_vec()),
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if ext != SSH_EXTENDED_DATA_STDERR {
                            continue;
                        }
                        ChannelEvent::Stderr(data.to_vec())
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        ChannelEvent::ExitStatus(exit_status)
                    }
                    Some(ChannelMsg::Close) => {
                        let _ = events.send(ChannelEvent::Closed);
                        return;
                    }
                    // Eof 之后仍可能收到 ExitStatus，等待 Close
                    Some(_) => continue,
                    None => {
                        let _ = events.send(ChannelEvent::Error(
                            "SSH connection lost before channel closed".to_string(),
                        ));
                        return;
                    }
                };
                let _ = events.send(event);
            }
        }
    }
}
