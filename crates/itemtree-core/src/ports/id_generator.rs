//! IdGenerator port - ID 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{JobId, ProcessId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散システムで使える ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（ワーカーから並行に呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    /// ノード展開 1 回ごとの ID
    fn generate_process_id(&self) -> ProcessId;
}

/// UlidGenerator は Clock の時刻を timestamp 部に使う ULID 生成器
///
/// FixedClock と組み合わせると timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next_ulid())
    }

    fn generate_process_id(&self) -> ProcessId {
        ProcessId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let ids: std::collections::HashSet<_> =
            (0..100).map(|_| id_gen.generate_job_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_job_id();
        let id2 = id_gen.generate_process_id();

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1.as_ulid(), id2.as_ulid());
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert!(id2.to_string().starts_with("process-"));
    }
}
