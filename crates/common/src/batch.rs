use std::future::Future;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{Error, OrderResponse, Result};

/// What to do when one input item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the batch on the first failure.
    #[default]
    StopOnError,
    /// Record the failure in place of the item's result and keep going.
    ContinueOnFail,
}

/// Emitted in place of a result under `ContinueOnFail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error: String,
    /// Index of the input item that produced this record.
    pub item: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// The filled entry of a bracket whose exit leg failed. That position is
    /// live and unhedged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<Box<OrderResponse>>,
}

/// One entry of a batch's output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemOutcome<T> {
    Ok(T),
    Failed(ErrorRecord),
}

impl<T> ItemOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, ItemOutcome::Ok(_))
    }
}

/// The batch stopped at `item` under `StopOnError`.
#[derive(Debug, thiserror::Error)]
#[error("item {item} failed: {source}")]
pub struct BatchError {
    pub item: usize,
    #[source]
    pub source: Error,
}

/// Decode one raw input item inside the batch, so a malformed item fails on
/// its own instead of aborting the run.
pub fn decode_item<T: DeserializeOwned>(item: Value) -> Result<T> {
    serde_json::from_value(item).map_err(|e| Error::Validation(format!("invalid input item: {e}")))
}

/// Process `items` strictly in order, one at a time.
///
/// Each item may produce several outputs (a bracket order yields entry and
/// exit; a watchlist fetch yields one report per symbol), so `op` returns a
/// `Vec`.
pub async fn run_batch<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    policy: FailurePolicy,
    mut op: F,
) -> std::result::Result<Vec<ItemOutcome<T>>, BatchError>
where
    F: FnMut(usize, I) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match op(index, item).await {
            Ok(results) => out.extend(results.into_iter().map(ItemOutcome::Ok)),
            Err(e) => match policy {
                FailurePolicy::ContinueOnFail => {
                    warn!(item = index, error = %e, "Item failed, continuing");
                    out.push(ItemOutcome::Failed(ErrorRecord {
                        status: e.status(),
                        error: e.to_string(),
                        item: index,
                        entry: e.filled_entry().cloned().map(Box::new),
                    }));
                }
                FailurePolicy::StopOnError => {
                    return Err(BatchError { item: index, source: e });
                }
            },
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail_on_two(_: usize, n: u32) -> Result<Vec<u32>> {
        if n == 2 {
            Err(Error::Upstream { status: 400, body: "bad".into() })
        } else {
            Ok(vec![n * 10])
        }
    }

    #[tokio::test]
    async fn continue_on_fail_emits_error_record_and_proceeds() {
        let out = run_batch(vec![1, 2, 3], FailurePolicy::ContinueOnFail, fail_on_two)
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], ItemOutcome::Ok(10));
        match &out[1] {
            ItemOutcome::Failed(rec) => {
                assert_eq!(rec.item, 1);
                assert_eq!(rec.status, Some(400));
                assert!(rec.error.contains("status code 400"));
            }
            other => panic!("expected error record, got {other:?}"),
        }
        assert_eq!(out[2], ItemOutcome::Ok(30));
    }

    #[tokio::test]
    async fn stop_on_error_halts_at_failing_item() {
        let mut seen = Vec::new();
        let err = run_batch(vec![1, 2, 3], FailurePolicy::StopOnError, |i, n| {
            seen.push(i);
            fail_on_two(i, n)
        })
        .await
        .unwrap_err();
        assert_eq!(err.item, 1);
        assert_eq!(seen, vec![0, 1]);
    }

    #[tokio::test]
    async fn one_item_may_yield_several_outputs() {
        let out = run_batch(vec!["a,b", "c"], FailurePolicy::StopOnError, |_, s: &str| async move {
            Ok(s.split(',').map(str::to_string).collect())
        })
        .await
        .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn error_record_serializes_like_host_error_item() {
        let rec = ErrorRecord { error: "boom".into(), item: 0, status: None, entry: None };
        assert_eq!(
            serde_json::to_value(&rec).unwrap(),
            serde_json::json!({ "error": "boom", "item": 0 })
        );
    }

    #[tokio::test]
    async fn malformed_item_becomes_a_record_under_continue_on_fail() {
        use crate::{OrderInput, OrderIntent};

        let items = vec![
            serde_json::json!({ "symbol": "BTCUSDT", "side": "HOLD", "quantity": 1 }),
            serde_json::json!({ "symbol": "BTCUSDT", "side": "buy", "quantity": 1 }),
        ];
        let out = run_batch(items, FailurePolicy::ContinueOnFail, |_, item| async move {
            let input: OrderInput = decode_item(item)?;
            let intent = OrderIntent::try_from(input)?;
            Ok::<_, Error>(vec![intent.side])
        })
        .await
        .unwrap();

        assert_eq!(out.len(), 2);
        match &out[0] {
            ItemOutcome::Failed(rec) => {
                assert_eq!(rec.item, 0);
                assert!(rec.error.contains("invalid input item"), "{}", rec.error);
                assert!(rec.error.contains("HOLD"), "{}", rec.error);
            }
            other => panic!("expected error record, got {other:?}"),
        }
        assert_eq!(out[1], ItemOutcome::Ok(crate::OrderSide::Buy));
    }

    #[tokio::test]
    async fn exit_leg_failure_keeps_the_filled_entry() {
        let out = run_batch(vec![()], FailurePolicy::ContinueOnFail, |_, ()| async {
            let entry: OrderResponse = serde_json::from_value(serde_json::json!({
                "orderId": 101, "executedQty": "0.1", "status": "FILLED"
            }))?;
            Err::<Vec<()>, _>(Error::ExitLegFailed {
                entry: Box::new(entry),
                source: Box::new(Error::Upstream { status: 400, body: "oco rejected".into() }),
            })
        })
        .await
        .unwrap();

        let ItemOutcome::Failed(rec) = &out[0] else {
            panic!("expected error record, got {:?}", out[0]);
        };
        assert_eq!(rec.status, Some(400));
        let json = serde_json::to_value(rec).unwrap();
        assert_eq!(json["entry"]["orderId"], 101);
        assert_eq!(json["entry"]["status"], "FILLED");
    }
}
