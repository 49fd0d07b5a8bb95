// SSH 连接状态与状态监听

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;
use uuid::Uuid;

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// 尚未发起连接
    #[default]
    Idle,
    /// 正在连接（握手 / 认证中）
    Connecting,
    /// 已连接，可以执行命令
    Connected,
    /// 连接已断开，尚未安排重连
    Closed,
    /// 等待退避后重连
    Reconnecting,
    /// 已主动断开，不会再重连
    Destroyed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
            Self::Reconnecting => "reconnecting",
            Self::Destroyed => "destroyed",
        }
    }

    /// 状态机是否允许该迁移
    ///
    /// 任意状态都可以被 disconnect 终结，也可以被显式 connect 重新发起。
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Destroyed) | (_, Connecting) => true,
            (Connecting, Connected) | (Connecting, Closed) => true,
            (Connected, Closed) => true,
            (Closed, Reconnecting) | (Reconnecting, Reconnecting) => true,
            (Connecting, Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type ListenerMap = Mutex<HashMap<Uuid, Listener>>;

/// 状态监听器集合
#[derive(Clone, Default)]
pub struct StatusListeners {
    inner: Arc<ListenerMap>,
}

impl StatusListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        lock(&self.inner).insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner),
        }
    }

    /// 当前监听器数量
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 通知所有监听器，单个监听器 panic 不影响其他监听器
    pub fn notify(&self, connected: bool) {
        // 先复制一份，回调中可以安全地注册 / 注销
        let snapshot: Vec<(Uuid, Listener)> = lock(&self.inner)
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
                warn!("[SSH Manager] Status listener {} panicked, ignoring", id);
            }
        }
    }
}

/// 监听器注册凭据
pub struct Subscription {
    id: Uuid,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 注销监听器，可重复调用
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).remove(&self.id);
        }
    }
}

fn lock(map: &ListenerMap) -> std::sync::MutexGuard<'_, HashMap<Uuid, Listener>> {
    // 回调在锁外执行，锁不会因监听器 panic 而中毒；即使中毒数据仍然一致
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Destroyed));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Destroyed.can_transition_to(Reconnecting));
        assert!(!Destroyed.can_transition_to(Connected));
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = StatusListeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(|_| panic!("listener failure"));
        let counter = calls.clone();
        let _good = listeners.subscribe(move |connected| {
            assert!(connected);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(true);
        listeners.notify(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let listeners = StatusListeners::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _other = listeners.subscribe(|_| {});
        assert_eq!(listeners.len(), 2);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(listeners.len(), 1);

        listeners.notify(false);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let listeners = StatusListeners::new();
        let subscription = listeners.subscribe(|_| {});
        drop(listeners);
        subscription.unsubscribe();
    }
}
