//! Structured join over fallible concurrent operations.
//!
//! Sub-operations issued in parallel within one pass are all allowed to
//! finish; the first failure is surfaced only after every future has
//! settled.

use futures::future::join_all;
use std::future::Future;

/// Await every future, collect the successes, and fail with the first
/// error once all have settled.
pub async fn join_settled<T, E, Fut>(
    futures: impl IntoIterator<Item = Fut>,
) -> Result<Vec<T>, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let mut values = Vec::new();
    let mut first_err = None;
    for result in join_all(futures).await {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn collects_every_success() {
        let results: Result<Vec<u32>, ()> =
            join_settled((0..4).map(|n| async move { Ok(n * 2) })).await;
        assert_eq!(results.unwrap(), vec![0, 2, 4, 6]);
    }

    #[tokio::test]
    async fn failure_does_not_cancel_siblings() {
        static COMPLETED: AtomicU32 = AtomicU32::new(0);
        let result: Result<Vec<()>, &str> = join_settled((0..3).map(|n| async move {
            if n == 1 {
                Err("boom")
            } else {
                COMPLETED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
        .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(COMPLETED.load(Ordering::SeqCst), 2);
    }
}
