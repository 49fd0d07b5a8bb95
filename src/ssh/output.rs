// 缓冲模式命令输出

use super::error::SshError;
use super::transport::{ChannelEvent, ChannelHandle};

/// 命令输出
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出码（远程未上报时为 None）
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 检查命令是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 转换为 exec 的结果
    ///
    /// 只有退出码非零且 stderr 非空时才视为失败（错误中携带去掉首尾空白的 stderr）；
    /// 非零退出但 stderr 为空时仍返回 stdout。
    pub fn into_stdout(self) -> Result<String, SshError> {
        if self.exit_code != Some(0) && !self.stderr.is_empty() {
            return Err(SshError::Command {
                code: self.exit_code,
                stderr: self.stderr_string().trim().to_string(),
            });
        }
        Ok(self.stdout_string())
    }
}

/// 读取通道直到关闭，累积 stdout / stderr
pub(crate) async fn collect_output(channel: &mut ChannelHandle) -> Result<CommandOutput, SshError> {
    let mut output = CommandOutput::default();

    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Stdout(data)) => output.stdout.extend_from_slice(&data),
            Some(ChannelEvent::Stderr(data)) => output.stderr.extend_from_slice(&data),
            Some(ChannelEvent::ExitStatus(code)) => output.exit_code = Some(code),
            Some(ChannelEvent::Closed) => return Ok(output),
            Some(ChannelEvent::Error(message)) => return Err(SshError::Transport(message)),
            None => {
                return Err(SshError::Transport(
                    "channel reader stopped unexpectedly".to_string(),
                ))
            }
        }
    }
}
