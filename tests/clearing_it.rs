//! Contract clearing: expiry settlement, mark-to-market, and the freeze.

mod common;

use bursar::store::PositionStore;

use bursar::{
    accountant::{orders::OrderRequest, trades::FillEvent},
    data::domain::{JournalUid, Price, Quantity, Side},
    data::position::Position,
};
use chrono::{Duration, Utc};
use common::{Harness, init_tracing, ticker, username};

async fn expire(h: &Harness, contract: &str) {
    let mut c = h.store().contract(&ticker(contract)).await.unwrap();
    c.expiration = Some(Utc::now() - Duration::minutes(1));
    h.store().add_contract(c);
}

/// S3: an expired prediction cleared at 60 pays the holder out and zeroes
/// the position.
#[tokio::test]
async fn test_prediction_clearing_at_expiry() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "P1", 3);
    h.fund("bob", "P1", -3);
    expire(&h, "P1").await;

    h.accountant
        .clear_contract(&ticker("P1"), Some(Price(60)), JournalUid::generate())
        .await
        .expect("clearing runs");

    // Longs collect price * quantity, shorts pay it, everyone ends flat.
    assert_eq!(h.position("alice", "P1").await, 0);
    assert_eq!(h.position("alice", "BTC").await, 180);
    assert_eq!(h.position("bob", "P1").await, 0);
    assert_eq!(h.position("bob", "BTC").await, -180);

    // Two position rows on the contract, two legs each.
    let postings = h.ledger.postings();
    assert_eq!(postings.len(), 4);
    assert!(postings.iter().all(|p| p.count == 4));

    // The contract is live again (and now simply refuses as expired).
    let err = h
        .accountant
        .place_order(
            &username("alice"),
            OrderRequest {
                contract: ticker("P1"),
                side: Side::Buy,
                price: Price(10),
                quantity: Quantity(1),
                timestamp: Utc::now(),
            },
            false,
        )
        .await
        .expect_err("expired, not clearing");
    assert_eq!(err.code(), "contract_expired");
}

#[tokio::test]
async fn test_futures_mark_to_market_rolls_the_reference_price() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 0);
    h.fund_with_reference("alice", "F1", 2, 100);
    h.accountant.set_safe_price(ticker("F1"), Price(110));

    h.accountant
        .clear_contract(&ticker("F1"), None, JournalUid::generate())
        .await
        .expect("mark to market runs");

    // The price move cashes out; the position itself survives.
    assert_eq!(h.position("alice", "BTC").await, 20);
    assert_eq!(h.position("alice", "F1").await, 2);
    let p = h
        .store()
        .position(&username("alice"), &ticker("F1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p.reference_price, Some(Price(110)));

    // The cashflow entry: user credit plus the zero marker leg locally, the
    // clearing-account debit via the peer seam, all in a 3-member entry.
    let local = h.ledger.postings();
    assert_eq!(local.len(), 2);
    assert!(local.iter().any(|p| p.quantity == Quantity(20)));
    assert!(local.iter().any(|p| p.quantity.is_zero() && p.contract == ticker("F1")));
    assert!(local.iter().all(|p| p.count == 3));

    let clearing = h.peer.postings_for("clearing_F1");
    assert_eq!(clearing.len(), 1);
    assert_eq!(clearing[0].quantity, Quantity(20));
    assert_eq!(clearing[0].count, 3);
}

#[tokio::test]
async fn test_futures_clearing_at_expiry_zeroes_the_position() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "BTC", 0);
    h.fund_with_reference("alice", "F1", 2, 100);
    expire(&h, "F1").await;

    h.accountant
        .clear_contract(&ticker("F1"), Some(Price(110)), JournalUid::generate())
        .await
        .expect("settlement runs");

    assert_eq!(h.position("alice", "BTC").await, 20);
    assert_eq!(h.position("alice", "F1").await, 0);
}

#[tokio::test]
async fn test_futures_without_reference_price_is_skipped() {
    init_tracing();
    let h = Harness::new();
    h.fund("alice", "F1", 2); // no reference price on the row
    expire(&h, "F1").await;

    h.accountant
        .clear_contract(&ticker("F1"), Some(Price(110)), JournalUid::generate())
        .await
        .expect("clearing completes by skipping the position");

    assert!(h.ledger.entries.borrow().is_empty());
    assert_eq!(h.position("alice", "F1").await, 2);
}

#[tokio::test]
async fn test_clear_contract_validations() {
    init_tracing();
    let h = Harness::new();

    // A price is only valid once the contract expired.
    let err = h
        .accountant
        .clear_contract(&ticker("F1"), Some(Price(110)), JournalUid::generate())
        .await
        .expect_err("not expired yet");
    assert_eq!(err.code(), "contract_not_expired");

    // Mark-to-market is only valid before expiry.
    expire(&h, "P1").await;
    let err = h
        .accountant
        .clear_contract(&ticker("P1"), None, JournalUid::generate())
        .await
        .expect_err("expired contracts settle with a price");
    assert_eq!(err.code(), "contract_expired");

    // Contracts without an expiration never clear.
    let err = h
        .accountant
        .clear_contract(&ticker("BTC"), Some(Price(1)), JournalUid::generate())
        .await
        .expect_err("cash does not clear");
    assert_eq!(err.code(), "non_clearing_contract");

    let mut inactive = h.store().contract(&ticker("F1")).await.unwrap();
    inactive.active = false;
    h.store().add_contract(inactive);
    let err = h
        .accountant
        .clear_contract(&ticker("F1"), Some(Price(110)), JournalUid::generate())
        .await
        .expect_err("inactive");
    assert_eq!(err.code(), "contract_not_active");
}

/// Property: while a ticker is clearing, neither new orders nor new trade
/// postings are accepted for it, and a second clear is refused.
#[tokio::test(start_paused = true)]
async fn test_clearing_freezes_the_contract() {
    init_tracing();
    let h = Harness::new();
    expire(&h, "P1").await;

    // A pending posting parks the clearing protocol in its quiescence loop.
    h.store().put_position(Position {
        username: username("alice"),
        ticker: ticker("P1"),
        position: Quantity(3),
        reference_price: None,
        pending_postings: 1,
        position_checkpoint: Quantity(3),
        cp_timestamp: Some(Utc::now()),
    });

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let accountant = h.accountant.clone();
            let clearing = tokio::task::spawn_local(async move {
                accountant
                    .clear_contract(&ticker("P1"), Some(Price(60)), JournalUid::generate())
                    .await
            });
            tokio::task::yield_now().await;

            let err = h
                .accountant
                .place_order(
                    &username("alice"),
                    OrderRequest {
                        contract: ticker("P1"),
                        side: Side::Buy,
                        price: Price(10),
                        quantity: Quantity(1),
                        timestamp: Utc::now(),
                    },
                    false,
                )
                .await
                .expect_err("orders are frozen");
            assert_eq!(err.code(), "contract_clearing");

            let err = h
                .accountant
                .post_transaction(
                    &username("alice"),
                    FillEvent {
                        username: username("alice"),
                        aggressive: false,
                        contract: ticker("P1"),
                        order: bursar::data::domain::OrderId(1),
                        other_order: bursar::data::domain::OrderId(2),
                        side: Side::Buy,
                        price: Price(10),
                        quantity: Quantity(1),
                        timestamp: Utc::now(),
                        uid: JournalUid::generate(),
                    },
                )
                .await
                .expect_err("trade postings are frozen");
            assert_eq!(err.code(), "contract_clearing");

            let err = h
                .accountant
                .clear_contract(&ticker("P1"), Some(Price(60)), JournalUid::generate())
                .await
                .expect_err("already clearing");
            assert_eq!(err.code(), "contract_clearing");

            // Let the in-flight posting settle; the protocol drains and
            // finishes on its next poll.
            h.store().put_position(Position {
                username: username("alice"),
                ticker: ticker("P1"),
                position: Quantity(3),
                reference_price: None,
                pending_postings: 0,
                position_checkpoint: Quantity(3),
                cp_timestamp: Some(Utc::now()),
            });

            clearing.await.unwrap().expect("clearing completes");
        })
        .await;

    assert_eq!(h.position("alice", "P1").await, 0);
    assert_eq!(h.position("alice", "BTC").await, 180);
}
