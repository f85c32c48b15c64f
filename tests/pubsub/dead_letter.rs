//! Discarded deliveries and the `peril_dlx` fanout.

use std::sync::mpsc;

use peril_pubsub::broker::{Connection, ExchangeSpec, InMemoryBroker, QueueDurability};
use peril_pubsub::pubsub::{declare_and_bind, publish_json, subscribe_json};
use peril_pubsub::routing::{
    self, ArmyMove, Unit, UnitRank, ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC,
};
use peril_pubsub::AckDecision;

use crate::support::{collect, wait_drained};

const DEAD_LETTER_QUEUE: &str = "peril_dlq";

fn army_move(player: &str) -> ArmyMove {
    ArmyMove {
        player: player.to_string(),
        units: vec![Unit {
            id: 1,
            rank: UnitRank::Cavalry,
            location: "europe".into(),
        }],
        to_location: "asia".into(),
    }
}

#[test]
fn discarded_delivery_reaches_dead_letter_subscriber() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    let (tx, rx) = mpsc::channel();

    let dead = subscribe_json(
        &conn,
        &ExchangeSpec::fanout(EXCHANGE_PERIL_DLX),
        DEAD_LETTER_QUEUE,
        "",
        QueueDurability::Durable,
        move |mv: ArmyMove| {
            tx.send(mv).unwrap();
            AckDecision::Ack
        },
    )
    .unwrap();

    let moves = subscribe_json(
        &conn,
        &routing::topic_exchange(),
        "army_moves.bob",
        &routing::wildcard(ARMY_MOVES_PREFIX),
        QueueDurability::Transient,
        |_: ArmyMove| AckDecision::NackDiscard,
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    let mv = army_move("alice");
    publish_json(
        &channel,
        EXCHANGE_PERIL_TOPIC,
        &routing::key(ARMY_MOVES_PREFIX, "alice"),
        &mv,
    )
    .unwrap();

    assert_eq!(collect(&rx, 1), vec![mv]);
    assert!(wait_drained(&broker, "army_moves.bob"));
    assert!(wait_drained(&broker, DEAD_LETTER_QUEUE));

    conn.close();
    assert_eq!(moves.join().discarded, 1);
    assert_eq!(dead.join().acked, 1);
    assert!(broker.queue(DEAD_LETTER_QUEUE).is_some());
}

#[test]
fn acked_and_requeued_deliveries_are_not_dead_lettered() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    declare_and_bind(
        &conn,
        &ExchangeSpec::fanout(EXCHANGE_PERIL_DLX),
        DEAD_LETTER_QUEUE,
        "",
        QueueDurability::Durable,
    )
    .unwrap();

    let mut first = true;
    let moves = subscribe_json(
        &conn,
        &routing::topic_exchange(),
        "army_moves.carol",
        &routing::wildcard(ARMY_MOVES_PREFIX),
        QueueDurability::Transient,
        move |_: ArmyMove| {
            if std::mem::take(&mut first) {
                AckDecision::NackRequeue
            } else {
                AckDecision::Ack
            }
        },
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    publish_json(
        &channel,
        EXCHANGE_PERIL_TOPIC,
        &routing::key(ARMY_MOVES_PREFIX, "dave"),
        &army_move("dave"),
    )
    .unwrap();

    assert!(wait_drained(&broker, "army_moves.carol"));
    assert_eq!(broker.queue_stats(DEAD_LETTER_QUEUE).unwrap().ready, 0);

    conn.close();
    let stats = moves.join();
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.acked, 1);
}

#[test]
fn discard_without_dead_letter_queue_drops_the_message() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();

    let moves = subscribe_json(
        &conn,
        &routing::topic_exchange(),
        "army_moves.erin",
        &routing::wildcard(ARMY_MOVES_PREFIX),
        QueueDurability::Durable,
        |_: ArmyMove| AckDecision::NackDiscard,
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    publish_json(
        &channel,
        EXCHANGE_PERIL_TOPIC,
        &routing::key(ARMY_MOVES_PREFIX, "frank"),
        &army_move("frank"),
    )
    .unwrap();

    assert!(wait_drained(&broker, "army_moves.erin"));
    assert!(broker.exchange(EXCHANGE_PERIL_DLX).is_some());
    assert!(broker.bindings(EXCHANGE_PERIL_DLX).is_empty());

    conn.close();
    let stats = moves.join();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.discarded, 1);
}
