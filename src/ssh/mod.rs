// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, KeepaliveConfig)
// - error: 错误类型 (SshError, HandshakeLevel)
// - event: 连接状态与状态监听 (ConnectionState, StatusListeners, Subscription)
// - transport: 传输层抽象 (Connector, Transport, ChannelHandle, ChannelEvent)
// - handler: russh Handler 实现
// - client: 基于 russh 的连接器
// - session: 基于 russh 的传输连接与执行通道
// - reconnect: 重连退避策略
// - output: 缓冲模式输出
// - stream: 流式行输出
// - manager: 连接管理器

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod manager;
pub mod output;
pub mod reconnect;
pub mod session;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// 公开导出
pub use client::{RusshConnector, SshClient};
pub use config::{KeepaliveConfig, SshConfig};
pub use error::{HandshakeLevel, SshError};
pub use event::{ConnectionState, StatusListeners, Subscription};
pub use manager::SshManager;
pub use output::CommandOutput;
pub use reconnect::{ReconnectPolicy, BACKOFF_TABLE_MS};
pub use stream::{LineBuffer, LineStream};
pub use transport::{ChannelEvent, ChannelHandle, Connector, KeyMaterial, Transport, TransportLink};
