// remote-exec - SSH 远程命令执行连接管理器
//
// 为部署平台维护到目标主机的单条持久 SSH 连接：
// 断线自动重连（指数退避）、缓冲 / 流式执行命令、连接状态通知。

pub mod exec;
pub mod services;
pub mod ssh;

pub use exec::{exec, exec_stream};
pub use ssh::{
    CommandOutput, ConnectionState, LineStream, SshConfig, SshError, SshManager, Subscription,
};
