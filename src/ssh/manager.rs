// SSH 连接管理器
//
// 持有唯一的当前连接，负责连接生命周期、状态机、自动重连与状态通知。
// 所有可变状态由一把同步锁保护，锁从不跨越 await。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use once_cell::sync::Lazy;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::RusshConnector;
use super::config::SshConfig;
use super::error::SshError;
use super::event::{ConnectionState, StatusListeners, Subscription};
use super::output::{collect_output, CommandOutput};
use super::reconnect::ReconnectPolicy;
use super::stream::LineStream;
use super::transport::{ChannelHandle, Connector, KeyMaterial, Transport, TransportLink};

/// 重连所需的连接目标（配置 + 已读取的私钥）
#[derive(Clone)]
struct Target {
    config: SshConfig,
    key: KeyMaterial,
}

/// 当前连接
struct ActiveConnection {
    generation: u64,
    transport: Arc<dyn Transport>,
}

/// 安装新连接的凭据：显式 connect 按代数校验，重连按取消令牌校验
enum Ticket {
    Connect(u64),
    Reconnect(CancellationToken),
}

struct ManagerState {
    phase: ConnectionState,
    /// 每次连接替换 / 断开时递增，用于识别过期的关闭事件和连接结果
    generation: u64,
    current: Option<ActiveConnection>,
    target: Option<Target>,
    policy: ReconnectPolicy,
    destroyed: bool,
    /// 正在进行的重连周期
    reconnect: Option<CancellationToken>,
    /// 监听器最后收到的状态
    reported_connected: bool,
    /// 已按状态变化顺序入队、尚未送达的通知
    pending: VecDeque<bool>,
    /// 是否已有调用方在派发通知
    dispatching: bool,
}

impl ManagerState {
    fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: ConnectionState::Idle,
            generation: 0,
            current: None,
            target: None,
            policy,
            destroyed: false,
            reconnect: None,
            reported_connected: false,
            pending: VecDeque::new(),
            dispatching: false,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.phase == next {
            return;
        }
        if !self.phase.can_transition_to(next) {
            warn!(
                "[SSH Manager] Unexpected transition {} -> {}",
                self.phase, next
            );
        }
        debug!("[SSH Manager] State {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect.take() {
            debug!("[Reconnect] Cancelling pending reconnect");
            token.cancel();
        }
    }

    /// 标记为已断开，若监听器此前认为已连接则返回需要发送的通知
    fn report_disconnected(&mut self) -> Option<bool> {
        if self.reported_connected {
            self.reported_connected = false;
            Some(false)
        } else {
            None
        }
    }

    fn ticket_valid(&self, ticket: &Ticket) -> bool {
        if self.destroyed {
            return false;
        }
        match ticket {
            Ticket::Connect(generation) => self.generation == *generation,
            // 令牌只会在持锁时被 connect / disconnect 取消
            Ticket::Reconnect(token) => !token.is_cancelled(),
        }
    }
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    state: Mutex<ManagerState>,
    listeners: StatusListeners,
}

impl ManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 释放状态锁并发送通知
    ///
    /// 通知在状态锁内入队，因此顺序与状态变化一致。同一时刻只有一个调用方负责派发，
    /// 其余调用方入队后直接返回；监听器执行时不持有任何锁，可以回调管理器
    /// （包括在回调里 disconnect）。
    fn dispatch<'a>(&'a self, mut state: MutexGuard<'a, ManagerState>, notify: Option<bool>) {
        if let Some(connected) = notify {
            state.pending.push_back(connected);
        }
        if state.dispatching {
            return;
        }
        state.dispatching = true;
        loop {
            let Some(connected) = state.pending.pop_front() else {
                break;
            };
            drop(state);
            self.listeners.notify(connected);
            state = self.lock_state();
        }
        state.dispatching = false;
    }

    /// 建立一次连接，受连接超时约束
    async fn establish(&self, target: &Target) -> Result<TransportLink, SshError> {
        let config = &target.config;
        tokio::time::timeout(
            config.connect_timeout(),
            self.connector.connect(config, &target.key),
        )
        .await
        .map_err(|_| SshError::ConnectTimeout(config.connect_timeout_secs))?
    }

    /// 安装新建立的连接；凭据失效（被 disconnect / 新 connect 取代）时关闭它
    async fn install(
        self: &Arc<Self>,
        ticket: Ticket,
        target: Target,
        link: TransportLink,
    ) -> Result<(), SshError> {
        let TransportLink { transport, closed } = link;
        let host = target.config.host.clone();

        let rejected = {
            let mut state = self.lock_state();
            if state.ticket_valid(&ticket) {
                state.generation += 1;
                let generation = state.generation;
                state.current = Some(ActiveConnection {
                    generation,
                    transport,
                });
                state.target = Some(target);
                state.policy.reset();
                if matches!(ticket, Ticket::Reconnect(_)) {
                    state.reconnect = None;
                }
                state.reported_connected = true;
                state.transition(ConnectionState::Connected);

                tokio::spawn(watch_transport(Arc::downgrade(self), generation, closed));
                info!("[SSH Manager] [{}] Connected (#{})", host, generation);
                self.dispatch(state, Some(true));
                None
            } else {
                Some(transport)
            }
        };

        match rejected {
            None => Ok(()),
            Some(transport) => {
                debug!("[SSH Manager] [{}] Connection superseded, closing it", host);
                transport.close().await;
                Err(SshError::Cancelled)
            }
        }
    }

    /// 传输层关闭
    fn handle_transport_closed(self: &Arc<Self>, generation: u64, reason: String) {
        let mut state = self.lock_state();
        let is_current = state
            .current
            .as_ref()
            .map_or(false, |current| current.generation == generation);
        if !is_current {
            debug!(
                "[SSH Manager] Ignoring close of stale connection #{}: {}",
                generation, reason
            );
            return;
        }

        warn!("[SSH Manager] Connection lost: {}", reason);
        state.current = None;
        state.transition(ConnectionState::Closed);
        let notify = state.report_disconnected();
        self.schedule_reconnect(&mut state);
        self.dispatch(state, notify);
    }

    /// 安排重连（已销毁或已有重连周期时忽略）
    fn schedule_reconnect(self: &Arc<Self>, state: &mut ManagerState) {
        if state.destroyed {
            debug!("[Reconnect] Manager destroyed, not reconnecting");
            return;
        }
        if state.reconnect.is_some() {
            debug!("[Reconnect] Reconnect already in flight");
            return;
        }
        let Some(target) = state.target.clone() else {
            return;
        };

        let token = CancellationToken::new();
        state.reconnect = Some(token.clone());
        state.transition(ConnectionState::Reconnecting);
        tokio::spawn(reconnect_loop(Arc::downgrade(self), token, target));
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.destroyed = true;
        state.cancel_reconnect();
    }
}

/// 等待传输层关闭信号
async fn watch_transport(
    inner: Weak<ManagerInner>,
    generation: u64,
    closed: oneshot::Receiver<String>,
) {
    let reason = closed
        .await
        .unwrap_or_else(|_| "transport dropped".to_string());
    if let Some(inner) = inner.upgrade() {
        inner.handle_transport_closed(generation, reason);
    }
}

/// 重连循环：退避等待 -> 尝试连接 -> 失败则计数并继续
async fn reconnect_loop(inner: Weak<ManagerInner>, token: CancellationToken, target: Target) {
    let host = target.config.host.clone();

    loop {
        let (delay, attempt) = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.lock_state();
            if token.is_cancelled() || state.destroyed {
                return;
            }
            state.transition(ConnectionState::Reconnecting);
            (state.policy.next_delay(), state.policy.attempts() + 1)
        };

        info!(
            "[Reconnect] [{}] Attempt {} in {:?}",
            host, attempt, delay
        );
        tokio::select! {
            _ = token.cancelled() => {
                debug!("[Reconnect] [{}] Cancelled while waiting", host);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        {
            let mut state = inner.lock_state();
            if token.is_cancelled() || state.destroyed {
                return;
            }
            state.transition(ConnectionState::Connecting);
        }

        let result = tokio::select! {
            _ = token.cancelled() => {
                debug!("[Reconnect] [{}] Cancelled while connecting", host);
                return;
            }
            result = inner.establish(&target) => result,
        };

        match result {
            Ok(link) => {
                match inner
                    .install(Ticket::Reconnect(token.clone()), target.clone(), link)
                    .await
                {
                    Ok(()) => info!("[Reconnect] [{}] Successfully reconnected", host),
                    Err(e) => debug!("[Reconnect] [{}] Reconnect discarded: {}", host, e),
                }
                return;
            }
            Err(e) => {
                warn!("[Reconnect] [{}] Attempt {} failed: {}", host, attempt, e);
                let mut state = inner.lock_state();
                if token.is_cancelled() || state.destroyed {
                    return;
                }
                state.policy.record_failure();
            }
        }
    }
}

/// SSH 连接管理器
///
/// 每个实例管理一条逻辑连接，所有调用方共享。克隆得到的是同一个管理器。
#[derive(Clone)]
pub struct SshManager {
    inner: Arc<ManagerInner>,
}

impl Default for SshManager {
    fn default() -> Self {
        Self::new(Arc::new(RusshConnector))
    }
}

impl SshManager {
    /// 使用指定连接器创建管理器
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_policy(connector, ReconnectPolicy::default())
    }

    /// 使用自定义重连策略创建管理器
    pub fn with_policy(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                state: Mutex::new(ManagerState::new(policy)),
                listeners: StatusListeners::new(),
            }),
        }
    }

    /// 获取进程级共享实例
    pub fn global() -> SshManager {
        lock_global().get_or_insert_with(SshManager::default).clone()
    }

    /// 销毁并丢弃共享实例，下一次 `global()` 会得到全新的管理器
    #[cfg(any(test, feature = "test-util"))]
    pub async fn reset_instance() {
        let previous = lock_global().take();
        if let Some(previous) = previous {
            previous.disconnect().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn install_global(manager: SshManager) {
        *lock_global() = Some(manager);
    }

    /// 建立连接
    ///
    /// 替换现有连接（不发送断开通知），读取私钥，在超时内完成握手。
    /// 失败直接返回给调用方，不会自动重试。
    pub async fn connect(&self, config: SshConfig) -> Result<(), SshError> {
        config.validate()?;

        let (generation, previous) = {
            let mut state = self.inner.lock_state();
            state.cancel_reconnect();
            state.generation += 1;
            state.destroyed = false;
            state.policy.reset();
            state.target = None;
            state.transition(ConnectionState::Connecting);
            (state.generation, state.current.take())
        };

        if let Some(previous) = previous {
            info!(
                "[SSH Manager] Replacing connection #{} with {}",
                previous.generation,
                config.address()
            );
            previous.transport.close().await;
        }

        let result = async {
            let key = KeyMaterial::load(&config.private_key_path).await?;
            let target = Target { config, key };
            let link = self.inner.establish(&target).await?;
            Ok::<_, SshError>((target, link))
        }
        .await;

        match result {
            Ok((target, link)) => {
                self.inner
                    .install(Ticket::Connect(generation), target, link)
                    .await
            }
            Err(e) => {
                warn!("[SSH Manager] Connect failed: {}", e);
                let mut state = self.inner.lock_state();
                if state.generation == generation && !state.destroyed {
                    state.transition(ConnectionState::Closed);
                    let notify = state.report_disconnected();
                    self.inner.dispatch(state, notify);
                }
                Err(e)
            }
        }
    }

    /// 主动断开连接，取消待执行的重连；可重复调用
    pub async fn disconnect(&self) {
        let previous = {
            let mut state = self.inner.lock_state();
            state.destroyed = true;
            state.cancel_reconnect();
            state.generation += 1;
            state.target = None;
            state.transition(ConnectionState::Destroyed);
            let previous = state.current.take();
            let notify = state.report_disconnected();
            self.inner.dispatch(state, notify);
            previous
        };

        if let Some(previous) = previous {
            info!("[SSH Manager] Disconnecting connection #{}", previous.generation);
            previous.transport.close().await;
        }
    }

    /// 当前是否可以执行命令
    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().phase == ConnectionState::Connected
    }

    /// 当前状态
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().phase
    }

    /// 自上次成功连接以来的连续重连失败次数
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_state().policy.attempts()
    }

    /// 注册状态监听器（进入 / 离开 Connected 时回调）
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// 在当前连接上打开执行通道；未连接时立即失败
    pub async fn open_channel(&self, command: &str) -> Result<ChannelHandle, SshError> {
        let transport = {
            let state = self.inner.lock_state();
            match (&state.current, state.phase) {
                (Some(current), ConnectionState::Connected) => current.transport.clone(),
                _ => return Err(SshError::NotConnected),
            }
        };
        debug!("[SSH Manager] exec: {}", command);
        transport.open_exec(command).await
    }

    /// 执行命令并返回完整输出
    pub async fn exec_output(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self.open_channel(command).await?;
        collect_output(&mut channel).await
    }

    /// 执行命令，返回 stdout
    pub async fn exec(&self, command: &str) -> Result<String, SshError> {
        self.exec_output(command).await?.into_stdout()
    }

    /// 执行命令，按行流式返回 stdout
    pub async fn exec_stream(&self, command: &str) -> Result<LineStream, SshError> {
        let channel = self.open_channel(command).await?;
        Ok(LineStream::new(channel))
    }
}

static GLOBAL: Lazy<Mutex<Option<SshManager>>> = Lazy::new(|| Mutex::new(None));

fn lock_global() -> MutexGuard<'static, Option<SshManager>> {
    GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
}
