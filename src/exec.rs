// 命令执行入口
// 基于进程级共享的 SshManager

use crate::ssh::{LineStream, SshError, SshManager};

/// 在共享连接上执行命令，返回 stdout
pub async fn exec(command: &str) -> Result<String, SshError> {
    SshManager::global().exec(command).await
}

/// 在共享连接上执行命令，按行返回 stdout
pub async fn exec_stream(command: &str) -> Result<LineStream, SshError> {
    SshManager::global().exec_stream(command).await
}
