// SSH 自动重连策略
//
// 连接意外断开后按固定退避表重试，直到成功或被 disconnect 取消

use std::time::Duration;

use super::error::SshError;

/// 退避表（毫秒），超出部分一直使用最后一项
pub const BACKOFF_TABLE_MS: [u64; 6] = [1_000, 2_000, 4_000, 8_000, 16_000, 30_000];

/// 重连策略：退避表 + 连续失败计数
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    table: Vec<Duration>,
    attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            table: BACKOFF_TABLE_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// 使用自定义退避表
    pub fn new(table: Vec<Duration>) -> Result<Self, SshError> {
        if table.is_empty() {
            return Err(SshError::Config("backoff table must not be empty".to_string()));
        }
        Ok(Self { table, attempts: 0 })
    }

    /// 第 n 次（从 0 开始）重连前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.table.len() - 1);
        self.table[index]
    }

    /// 下一次重连前的等待时间
    pub fn next_delay(&self) -> Duration {
        self.delay_for(self.attempts)
    }

    /// 当前连续失败次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 记录一次失败
    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// 连接成功后清零
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_table() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(16000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(100), Duration::from_millis(30000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_delay_matches_table_for_all_indices() {
        let policy = ReconnectPolicy::default();
        for n in 0..64u32 {
            let expected = BACKOFF_TABLE_MS[(n as usize).min(5)];
            assert_eq!(policy.delay_for(n), Duration::from_millis(expected), "n = {n}");
        }
    }

    #[test]
    fn test_custom_table() {
        assert!(matches!(
            ReconnectPolicy::new(Vec::new()),
            Err(SshError::Config(_))
        ));

        let policy =
            ReconnectPolicy::new(vec![Duration::from_millis(50), Duration::from_millis(200)])
                .unwrap();
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(7), Duration::from_millis(200));
    }

    #[test]
    fn test_failure_and_reset() {
        let mut policy = ReconnectPolicy::default();
        assert_eq!(policy.next_delay(), Duration::from_secs(1));

        policy.record_failure();
        policy.record_failure();
        assert_eq!(policy.attempts(), 2);
        assert_eq!(policy.next_delay(), Duration::from_secs(4));

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }
}
