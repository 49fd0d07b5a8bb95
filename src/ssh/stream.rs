// 流式命令输出
//
// LineBuffer 把任意切分的字节块重组为行，LineStream 把通道事件转换为行流。

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream};
use tracing::trace;

use super::error::SshError;
use super::transport::{ChannelEvent, ChannelHandle};

/// 行重组缓冲区
///
/// 按字节切分 `\n`，多字节 UTF-8 字符跨块到达时不会被截断。
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块数据，返回其中所有完整的行（不含换行符）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// 通道关闭时取出剩余的半行
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// 远程命令 stdout 的行流
///
/// 单消费者、只能向前、不可重放；结束后一直返回 `None`。
/// stderr 在此模式下被丢弃。提前丢弃流会关闭远程通道。
pub struct LineStream {
    channel: Option<ChannelHandle>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
}

impl LineStream {
    pub(crate) fn new(channel: ChannelHandle) -> Self {
        Self {
            channel: Some(channel),
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
        }
    }

    /// 收集剩余所有行
    pub async fn collect_lines(mut self) -> Result<Vec<String>, SshError> {
        use futures::StreamExt;

        let mut lines = Vec::new();
        while let Some(line) = self.next().await {
            lines.push(line?);
        }
        Ok(lines)
    }
}

impl Stream for LineStream {
    type Item = Result<String, SshError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(line) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }

            let Some(channel) = this.channel.as_mut() else {
                return Poll::Ready(None);
            };

            match channel.poll_event(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(ChannelEvent::Stdout(data))) => {
                    this.ready.extend(this.buffer.push(&data));
                }
                Poll::Ready(Some(ChannelEvent::Stderr(data))) => {
                    trace!("[SSH] Discarding {} bytes of stderr in stream mode", data.len());
                }
                Poll::Ready(Some(ChannelEvent::ExitStatus(code))) => {
                    trace!("[SSH] Streamed command exited with {}", code);
                }
                Poll::Ready(Some(ChannelEvent::Closed)) => {
                    this.channel = None;
                    this.ready.extend(this.buffer.finish());
                }
                Poll::Ready(Some(ChannelEvent::Error(message))) => {
                    this.channel = None;
                    this.ready.clear();
                    return Poll::Ready(Some(Err(SshError::Transport(message))));
                }
                Poll::Ready(None) => {
                    this.channel = None;
                    this.ready.clear();
                    return Poll::Ready(Some(Err(SshError::Transport(
                        "channel reader stopped unexpectedly".to_string(),
                    ))));
                }
            }
        }
    }
}

impl FusedStream for LineStream {
    fn is_terminated(&self) -> bool {
        self.channel.is_none() && self.ready.is_empty()
    }
}
