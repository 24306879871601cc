//! Forced liquidation: order shapes, full unwinds, and best-pick ranking.

mod common;

use bursar::store::PositionStore;

use bursar::{
    accountant::orders::OrderRequest,
    data::domain::{Price, Quantity, Side},
    engine::{BookLevel, OrderBook},
};
use chrono::Utc;
use common::{Harness, init_tracing, ticker, username};

#[tokio::test]
async fn test_long_positions_are_sold_at_zero() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "P1", 3);

    let id = h
        .accountant
        .liquidate_position(&username("alice"), &ticker("P1"))
        .await
        .expect("liquidation runs")
        .expect("an order is placed");

    let placed = h.engine.placed.borrow();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].id, id);
    assert_eq!(placed[0].side, Side::Sell);
    assert_eq!(placed[0].price, Price(0));
    assert_eq!(placed[0].quantity, Quantity(3));
}

#[tokio::test]
async fn test_short_predictions_are_bought_at_the_denominator() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "P1", -2);

    h.accountant
        .liquidate_position(&username("alice"), &ticker("P1"))
        .await
        .unwrap()
        .expect("an order is placed");

    let placed = h.engine.placed.borrow();
    assert_eq!(placed[0].side, Side::Buy);
    assert_eq!(placed[0].price, Price(100));
    assert_eq!(placed[0].quantity, Quantity(2));
}

#[tokio::test]
async fn test_short_futures_are_bought_at_the_price_ceiling() {
    init_tracing();
    let h = Harness::new();
    h.fund_with_reference("alice", "F1", -2, 100);

    h.accountant
        .liquidate_position(&username("alice"), &ticker("F1"))
        .await
        .unwrap()
        .expect("an order is placed");

    let placed = h.engine.placed.borrow();
    assert_eq!(placed[0].side, Side::Buy);
    assert_eq!(placed[0].price, Price(i64::MAX));
}

#[tokio::test]
async fn test_short_cash_cannot_be_liquidated() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", -5);

    let err = h
        .accountant
        .liquidate_position(&username("alice"), &ticker("BTC"))
        .await
        .expect_err("no price ceiling exists for cash");
    assert_eq!(err.code(), "invalid_contract_type");
}

#[tokio::test]
async fn test_absent_and_flat_positions_place_nothing() {
    init_tracing();
    let h = Harness::new();

    // No row at all.
    let placed = h
        .accountant
        .liquidate_position(&username("alice"), &ticker("P1"))
        .await
        .unwrap();
    assert!(placed.is_none());

    // A flat row.
    h.fund("alice", "P1", 0);
    let placed = h
        .accountant
        .liquidate_position(&username("alice"), &ticker("P1"))
        .await
        .unwrap();
    assert!(placed.is_none());
    assert!(h.engine.placed.borrow().is_empty());
}

#[tokio::test]
async fn test_liquidation_cancels_resting_orders_first() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 1_000);
    h.fund("alice", "P1", 3);

    let id = h
        .accountant
        .place_order(
            &username("alice"),
            OrderRequest {
                contract: ticker("P1"),
                side: Side::Sell,
                price: Price(90),
                quantity: Quantity(1),
                timestamp: Utc::now(),
            },
            false,
        )
        .await
        .unwrap();

    h.accountant
        .liquidate_position(&username("alice"), &ticker("P1"))
        .await
        .unwrap();

    assert!(h.engine.cancelled.borrow().iter().any(|(_, c)| *c == id));
    assert!(h.store().order(id).await.unwrap().unwrap().is_cancelled);
}

#[tokio::test]
async fn test_liquidate_all_unwinds_every_derivative() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 100);
    h.fund("alice", "P1", 3);
    h.fund_with_reference("alice", "F1", 2, 100);

    h.accountant
        .liquidate_all(&username("alice"))
        .await
        .expect("liquidation runs");

    // Two forced sells at zero; the cash position is left alone.
    let placed = h.engine.placed.borrow();
    assert_eq!(placed.len(), 2);
    assert!(placed.iter().all(|o| o.side == Side::Sell && o.price == Price(0)));
    let contracts: Vec<_> = placed.iter().map(|o| o.contract.clone()).collect();
    assert!(contracts.contains(&ticker("P1")));
    assert!(contracts.contains(&ticker("F1")));

    // The user comes back once the unwind is done.
    assert!(h.accountant.is_user_enabled(&username("alice")));
}

/// `liquidate_best` closes one unit of the position with the highest margin
/// relief per unit of spread crossed.
#[tokio::test]
async fn test_liquidate_best_picks_the_biggest_margin_saver() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 1_000);
    h.fund("alice", "P1", -1);
    h.fund_with_reference("alice", "F1", -1, 100);
    h.accountant.set_safe_price(ticker("F1"), Price(110));

    h.engine.books.borrow_mut().insert(
        ticker("P1"),
        OrderBook {
            bids: vec![BookLevel {
                price: Price(40),
                quantity: Quantity(10),
            }],
            asks: vec![BookLevel {
                price: Price(60),
                quantity: Quantity(10),
            }],
        },
    );
    h.engine.books.borrow_mut().insert(
        ticker("F1"),
        OrderBook {
            bids: vec![BookLevel {
                price: Price(100),
                quantity: Quantity(10),
            }],
            asks: vec![BookLevel {
                price: Price(120),
                quantity: Quantity(10),
            }],
        },
    );

    h.accountant
        .liquidate_best(&username("alice"))
        .await
        .expect("ranking runs")
        .expect("an order is placed");

    // Freeing the prediction's full-denominator lock beats the futures
    // margin at equal spreads, so the short P1 is bought back one unit.
    let placed = h.engine.placed.borrow();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].contract, ticker("P1"));
    assert_eq!(placed[0].side, Side::Buy);
    assert_eq!(placed[0].quantity, Quantity(1));
    assert_eq!(placed[0].price, Price(100));
}

#[tokio::test]
async fn test_liquidate_best_with_nothing_to_do() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 1_000);

    let placed = h
        .accountant
        .liquidate_best(&username("alice"))
        .await
        .expect("ranking runs");
    assert!(placed.is_none());
    assert!(h.engine.placed.borrow().is_empty());
}
