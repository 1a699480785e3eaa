use std::sync::Arc;

use serde_json::{json, Value};

use common::{
    run_batch, Error, FailurePolicy, ItemOutcome, OrderInput, OrderIntent, OrderSide, OrderType,
    Payload, RequestDescriptor, StopLossType,
};
use engine::order::{OrderOutcome, OrderPlacer, OrderRoute};
use engine::Signer;
use paper::PaperTransport;

const PROXY: &str = "http://api:8000";

fn placer(paper: &Arc<PaperTransport>) -> OrderPlacer {
    OrderPlacer::new(paper.clone(), OrderRoute::proxy(PROXY, "test-key"))
}

fn input(extra: Value) -> OrderIntent {
    let mut base = json!({
        "symbol": "btcusdt",
        "side": "BUY",
        "type": "MARKET",
        "quantity": 0.1
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    let input: OrderInput = serde_json::from_value(base).unwrap();
    OrderIntent::try_from(input).unwrap()
}

fn filled_entry() -> Value {
    json!({ "orderId": 101, "executedQty": "0.1", "status": "FILLED" })
}

fn oco_ack() -> Value {
    json!({ "orderListId": 505, "contingencyType": "OCO" })
}

#[tokio::test]
async fn plain_market_order_is_one_call_with_uppercased_symbol() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;

    let outcome = placer(&paper).place(&input(json!({}))).await.unwrap();
    assert!(matches!(outcome, OrderOutcome::Single { .. }));

    let calls = paper.requests().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "http://api:8000/api/binance/order");
    assert_eq!(calls[0].param("symbol").as_deref(), Some("BTCUSDT"));
    assert_eq!(calls[0].header_value("X-MBX-APIKEY"), Some("test-key"));
}

#[tokio::test]
async fn market_bracket_places_entry_then_opposite_side_oco() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper.enqueue(Ok(oco_ack())).await;

    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));
    let outcome = placer(&paper).place(&intent).await.unwrap();

    match &outcome {
        OrderOutcome::Bracketed { entry, exit } => {
            assert_eq!(entry.order_id, Some(101));
            assert_eq!(exit.order_list_id, 505);
        }
        other => panic!("expected bracketed outcome, got {other:?}"),
    }

    let calls = paper.requests().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].path(), "/api/binance/order");
    assert_eq!(calls[1].path(), "/api/binance/order/oco");

    let oco = &calls[1];
    assert_eq!(oco.param("symbol").as_deref(), Some("BTCUSDT"));
    assert_eq!(oco.param("side").as_deref(), Some("SELL"));
    assert_eq!(oco.param("quantity").as_deref(), Some("0.1"));
    assert_eq!(oco.param("price").as_deref(), Some("55000"));
    assert_eq!(oco.param("stopPrice").as_deref(), Some("45000"));
    assert_eq!(oco.param("stopLimitPrice"), None);
    assert_eq!(oco.param("stopLimitTimeInForce"), None);

    let items = outcome.into_items().unwrap();
    assert_eq!(items[1]["ocoOrder"]["contingencyType"], "OCO");
}

#[tokio::test]
async fn oco_quantity_comes_from_executed_quantity() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper
        .enqueue(Ok(json!({ "orderId": 7, "executedQty": "0.08000000", "status": "PARTIALLY_FILLED" })))
        .await;
    paper.enqueue(Ok(oco_ack())).await;

    let intent = input(json!({
        "side": "SELL",
        "useBracket": true,
        "takeProfitPrice": 40000,
        "stopLossPrice": 52000
    }));
    placer(&paper).place(&intent).await.unwrap();

    let calls = paper.requests().await;
    assert_eq!(calls[1].param("quantity").as_deref(), Some("0.08"));
    assert_eq!(calls[1].param("side").as_deref(), Some("BUY"));
}

#[tokio::test]
async fn limit_stop_loss_adds_stop_limit_leg() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper.enqueue(Ok(oco_ack())).await;

    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000,
        "stopLossType": "LIMIT",
        "stopLossLimitPrice": 44900
    }));
    assert_eq!(
        intent.bracket.as_ref().map(|b| b.stop_loss_type),
        Some(StopLossType::Limit)
    );
    placer(&paper).place(&intent).await.unwrap();

    let calls = paper.requests().await;
    assert_eq!(calls[1].param("stopLimitPrice").as_deref(), Some("44900"));
    assert_eq!(calls[1].param("stopLimitTimeInForce").as_deref(), Some("GTE_GTC"));
}

#[tokio::test]
async fn limit_bracket_is_a_single_otoco_call() {
    let paper = Arc::new(PaperTransport::new(0.0));
    let intent = input(json!({
        "type": "LIMIT",
        "price": 50000,
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));

    let outcome = placer(&paper).place(&intent).await.unwrap();
    match outcome {
        OrderOutcome::Otoco { list } => assert_eq!(list.symbol.as_deref(), Some("BTCUSDT")),
        other => panic!("expected OTOCO outcome, got {other:?}"),
    }

    let calls = paper.requests().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path(), "/api/binance/orderList/otoco");
    assert_eq!(calls[0].param("workingSide").as_deref(), Some("BUY"));
    assert_eq!(calls[0].param("workingPrice").as_deref(), Some("50000"));
    assert_eq!(calls[0].param("pendingSide").as_deref(), Some("SELL"));
    assert_eq!(calls[0].param("pendingStopLimitPrice"), None);
}

#[tokio::test]
async fn otoco_response_without_symbol_is_rejected() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper
        .enqueue(Ok(json!({ "orderListId": 9, "contingencyType": "OTO", "orders": [] })))
        .await;
    let intent = input(json!({
        "type": "LIMIT",
        "price": 50000,
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));

    let err = placer(&paper).place(&intent).await.unwrap_err();
    assert!(matches!(err, Error::Mapping(_)), "got {err:?}");
}

#[tokio::test]
async fn unfilled_entry_stops_before_exit() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper
        .enqueue(Ok(json!({ "orderId": 101, "executedQty": "0.00000000", "status": "EXPIRED" })))
        .await;

    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));
    let err = placer(&paper).place(&intent).await.unwrap_err();

    match err {
        Error::UnfilledEntry { entry } => assert_eq!(entry.order_id, Some(101)),
        other => panic!("expected UnfilledEntry, got {other:?}"),
    }
    assert_eq!(paper.requests().await.len(), 1);
}

#[tokio::test]
async fn failed_exit_reports_live_entry_without_retry() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper
        .enqueue(Err(Error::Upstream {
            status: 400,
            body: r#"{"code":-2010,"msg":"Account has insufficient balance"}"#.into(),
        }))
        .await;

    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));
    let err = placer(&paper).place(&intent).await.unwrap_err();

    assert_eq!(err.status(), Some(400));
    match err {
        Error::ExitLegFailed { entry, .. } => assert_eq!(entry.order_id, Some(101)),
        other => panic!("expected ExitLegFailed, got {other:?}"),
    }
    // Entry and one exit attempt; nothing cancels the entry.
    assert_eq!(paper.requests().await.len(), 2);
}

#[tokio::test]
async fn validation_failures_send_nothing() {
    let paper = Arc::new(PaperTransport::new(0.0));
    let placer = placer(&paper);

    let bad_symbol = OrderIntent::new("INVALID_SYMBOL!", OrderSide::Buy, OrderType::Market, 0.1);
    assert!(placer.place(&bad_symbol).await.unwrap_err().is_validation());

    let half_bracket: OrderInput = serde_json::from_value(json!({
        "symbol": "BTCUSDT",
        "side": "BUY",
        "quantity": 0.1,
        "useBracket": true,
        "takeProfitPrice": 55000
    }))
    .unwrap();
    assert!(OrderIntent::try_from(half_bracket).unwrap_err().is_validation());

    assert!(paper.requests().await.is_empty());
}

#[tokio::test]
async fn direct_route_signs_every_leg() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper.enqueue(Ok(oco_ack())).await;

    let route = OrderRoute::direct(
        "https://api.binance.com",
        "/api/v3/",
        Signer::new("key", "secret"),
    );
    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));
    OrderPlacer::new(paper.clone(), route).place(&intent).await.unwrap();

    let signer = Signer::new("key", "secret");
    for call in paper.requests().await {
        let Payload::Form(body) = &call.payload else {
            panic!("direct calls must be form encoded");
        };
        let (signed, signature) = body.rsplit_once("&signature=").unwrap();
        assert_eq!(signer.sign(signed).unwrap(), signature);
        assert_eq!(call.header_value("X-MBX-APIKEY"), Some("key"));
    }
}

#[tokio::test]
async fn paper_exchange_fills_a_market_bracket() {
    let paper = Arc::new(PaperTransport::new(10.0));
    paper.update_price("BTCUSDT", 50_000.0).await;

    let intent = input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }));
    let outcome = placer(&paper).place(&intent).await.unwrap();

    match outcome {
        OrderOutcome::Bracketed { entry, exit } => {
            assert_eq!(entry.status.as_deref(), Some("FILLED"));
            assert_eq!(exit.contingency_type.as_deref(), Some("OCO"));
            assert_eq!(exit.orders.len(), 2);
        }
        other => panic!("expected bracketed outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn continue_on_fail_turns_errors_into_records() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper
        .enqueue(Err(Error::Upstream {
            status: 400,
            body: "bad request".into(),
        }))
        .await;
    paper.enqueue(Ok(filled_entry())).await;

    let placer = placer(&paper);
    let intents = vec![input(json!({})), input(json!({})), input(json!({}))];

    let out = run_batch(intents, FailurePolicy::ContinueOnFail, |_, intent| {
        let placer = &placer;
        async move { placer.place(&intent).await?.into_items() }
    })
    .await
    .unwrap();

    assert_eq!(out.len(), 3);
    assert!(out[0].is_ok());
    match &out[1] {
        ItemOutcome::Failed(record) => {
            assert_eq!(record.item, 1);
            assert!(record.error.contains("status code 400"));
        }
        other => panic!("expected an error record, got {other:?}"),
    }
    assert!(out[2].is_ok());
}

#[tokio::test]
async fn continue_on_fail_keeps_entry_of_a_failed_exit() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper.enqueue(Ok(filled_entry())).await;
    paper
        .enqueue(Err(Error::Upstream {
            status: 400,
            body: "oco rejected".into(),
        }))
        .await;

    let placer = placer(&paper);
    let intents = vec![input(json!({
        "useBracket": true,
        "takeProfitPrice": 55000,
        "stopLossPrice": 45000
    }))];

    let out = run_batch(intents, FailurePolicy::ContinueOnFail, |_, intent| {
        let placer = &placer;
        async move { placer.place(&intent).await?.into_items() }
    })
    .await
    .unwrap();

    assert_eq!(out.len(), 1);
    let ItemOutcome::Failed(record) = &out[0] else {
        panic!("expected an error record, got {:?}", out[0]);
    };
    assert_eq!(record.status, Some(400));
    let entry = record.entry.as_deref().expect("filled entry is reported");
    assert_eq!(entry.order_id, Some(101));
    assert_eq!(entry.executed_qty, Some(0.1));

    let json = serde_json::to_value(&out).unwrap();
    assert_eq!(json[0]["entry"]["executedQty"], 0.1);
}

#[tokio::test]
async fn stop_on_error_halts_the_batch() {
    let paper = Arc::new(PaperTransport::new(0.0));
    paper
        .enqueue(Err(Error::Upstream {
            status: 400,
            body: "bad request".into(),
        }))
        .await;

    let placer = placer(&paper);
    let intents = vec![input(json!({})), input(json!({}))];

    let err = run_batch(intents, FailurePolicy::StopOnError, |_, intent| {
        let placer = &placer;
        async move { placer.place(&intent).await?.into_items() }
    })
    .await
    .unwrap_err();

    assert_eq!(err.item, 0);
    assert_eq!(paper.requests().await.len(), 1);
}

#[test]
fn requests_are_plain_values() {
    // Builders are usable without any transport.
    let route = OrderRoute::proxy(PROXY, "");
    let req: RequestDescriptor = route.entry_request(&input(json!({})), 0).unwrap();
    assert_eq!(req.param("type").as_deref(), Some("MARKET"));
}
