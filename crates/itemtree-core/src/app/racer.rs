//! Result racer - 「N 個のうち最初の成功」を待つ並行プリミティブ
//!
//! # 振る舞い
//! - 空入力: 即座に `Ok(None)`（エラーではない）
//! - どれかが成功: 最初に届いた成功を返す（以降の完了は捨てる）
//! - 全て失敗: 全ての原因を元の順序で持つ `AggregateError`
//! - panic した操作も `RaceFailure::Panicked` として原因に残る
//!
//! # 学習ポイント
//! - 各操作を tokio::spawn し、その JoinHandle を待つ報告タスクが (index, Result) を mpsc で送る
//! - 判定するのは受信ループ 1 箇所だけなので、二重完了は起こらない
//! - 負けた操作はキャンセルしない。受信側が drop された後の send は黙って失敗する

use std::future::Future;

use tokio::sync::mpsc;

use crate::app::worker_pool::panic_message;
use crate::domain::{AggregateError, RaceFailure};

pub async fn race_first_success<T, E, F>(
    operations: Vec<F>,
) -> Result<Option<T>, AggregateError<RaceFailure<E>>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    if operations.is_empty() {
        return Ok(None);
    }

    let count = operations.len();
    // 容量 = 操作数なので、送信側は決してブロックしない
    let (tx, mut rx) = mpsc::channel(count);
    for (index, operation) in operations.into_iter().enumerate() {
        let tx = tx.clone();
        let handle = tokio::spawn(operation);
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(RaceFailure::Failed(err)),
                Err(join) => Err(RaceFailure::Panicked(panic_message(join))),
            };
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let mut failures: Vec<Option<RaceFailure<E>>> = (0..count).map(|_| None).collect();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(value) => return Ok(Some(value)),
            Err(failure) => failures[index] = Some(failure),
        }
    }

    // 報告タスクは必ず 1 件送るので、ここでは全ての枠が埋まっている
    match AggregateError::from_causes(failures.into_iter().flatten().collect()) {
        Some(aggregate) => Err(aggregate),
        None => Ok(None),
    }
}
