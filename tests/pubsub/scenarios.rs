//! End-to-end subscribe/publish scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use peril_pubsub::broker::{
    Channel, Connection, Envelope, ExchangeSpec, InMemoryBroker, QueueDurability,
};
use peril_pubsub::pubsub::{declare_and_bind, publish_json, subscribe, subscribe_json};
use peril_pubsub::routing::{
    self, PlayingState, RecognitionOfWar, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_DLX,
    EXCHANGE_PERIL_TOPIC, PAUSE_KEY, WAR_RECOGNITIONS_PREFIX,
};
use peril_pubsub::{AckDecision, BrokerError, Codec, DeclareError, SetupError};

use crate::support::{collect, wait_drained, wait_until};

#[test]
fn topic_wildcard_subscriber_receives_structured_value() {
    let broker = InMemoryBroker::new();
    let sub_conn = broker.connect();
    let (tx, rx) = mpsc::channel();

    let subscription = subscribe_json(
        &sub_conn,
        &routing::topic_exchange(),
        "war",
        &routing::wildcard(WAR_RECOGNITIONS_PREFIX),
        QueueDurability::Durable,
        move |war: RecognitionOfWar| {
            tx.send(war).unwrap();
            AckDecision::Ack
        },
    )
    .unwrap();
    assert_eq!(subscription.queue(), "war");

    let pub_conn = broker.connect();
    let channel = pub_conn.channel().unwrap();
    let war = RecognitionOfWar {
        attacker: "alice".into(),
        defender: "bob".into(),
    };
    publish_json(
        &channel,
        EXCHANGE_PERIL_TOPIC,
        &routing::key(WAR_RECOGNITIONS_PREFIX, "alice"),
        &war,
    )
    .unwrap();

    assert_eq!(collect(&rx, 1), vec![war]);
    assert!(wait_drained(&broker, "war"));

    sub_conn.close();
    let stats = subscription.join();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.acked, 1);
}

#[test]
fn requeued_message_is_redelivered_on_same_stream() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    let (tx, rx) = mpsc::channel();
    let mut calls = 0;

    let subscription = subscribe_json(
        &conn,
        &routing::direct_exchange(),
        "pause.alice",
        PAUSE_KEY,
        QueueDurability::Transient,
        move |state: PlayingState| {
            calls += 1;
            tx.send(state).unwrap();
            if calls == 1 {
                AckDecision::NackRequeue
            } else {
                AckDecision::Ack
            }
        },
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    let paused = PlayingState { is_paused: true };
    publish_json(&channel, EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &paused).unwrap();

    assert_eq!(collect(&rx, 2), vec![paused.clone(), paused]);
    assert!(wait_drained(&broker, "pause.alice"));

    conn.close();
    let stats = subscription.join();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.acked, 1);
}

#[test]
fn always_requeueing_handler_sees_unbounded_redelivery() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let subscription = subscribe_json(
        &conn,
        &routing::direct_exchange(),
        "stubborn",
        PAUSE_KEY,
        QueueDurability::Durable,
        move |_: PlayingState| {
            seen.fetch_add(1, Ordering::SeqCst);
            AckDecision::NackRequeue
        },
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    publish_json(
        &channel,
        EXCHANGE_PERIL_DIRECT,
        PAUSE_KEY,
        &PlayingState { is_paused: false },
    )
    .unwrap();

    assert!(wait_until(|| calls.load(Ordering::SeqCst) >= 10));

    conn.close();
    let stats = subscription.join();
    assert!(stats.requeued >= 9);
    assert_eq!(stats.acked, 0);
}

#[test]
fn malformed_body_is_discarded_without_requeue_or_handler() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    declare_and_bind(
        &conn,
        &ExchangeSpec::fanout(EXCHANGE_PERIL_DLX),
        "peril_dlq",
        "",
        QueueDurability::Durable,
    )
    .unwrap();

    let subscription = subscribe(
        &conn,
        &routing::direct_exchange(),
        "pause.bob",
        PAUSE_KEY,
        QueueDurability::Transient,
        Codec::Json,
        move |_: PlayingState| {
            seen.fetch_add(1, Ordering::SeqCst);
            AckDecision::Ack
        },
    )
    .unwrap();

    let channel = conn.channel().unwrap();
    channel
        .basic_publish(
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            Envelope::new("application/json", b"{not json".to_vec()),
        )
        .unwrap();

    assert!(wait_until(|| broker
        .queue_stats("peril_dlq")
        .is_some_and(|s| s.ready == 1)));
    assert!(wait_drained(&broker, "pause.bob"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    conn.close();
    let stats = subscription.join();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.requeued, 0);
}

#[test]
fn concurrent_durable_declarations_both_succeed() {
    let broker = InMemoryBroker::new();
    let barrier = Arc::new(Barrier::new(2));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let broker = broker.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = broker.connect();
                barrier.wait();
                declare_and_bind(
                    &conn,
                    &routing::topic_exchange(),
                    "army_moves",
                    &routing::wildcard(routing::ARMY_MOVES_PREFIX),
                    QueueDurability::Durable,
                )
                .map(|(_, queue)| queue.name)
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap().unwrap(), "army_moves");
    }
    assert_eq!(broker.bindings(EXCHANGE_PERIL_TOPIC).len(), 1);
    assert!(broker.queue("army_moves").unwrap().durable());
}

#[test]
fn each_subscriber_gets_its_own_copy_of_a_direct_broadcast() {
    let broker = InMemoryBroker::new();
    let alice = broker.connect();
    let bob = broker.connect();
    let (tx, rx) = mpsc::channel();

    let mut subscriptions = Vec::new();
    for (conn, user) in [(&alice, "alice"), (&bob, "bob")] {
        let tx = tx.clone();
        let subscription = subscribe_json(
            conn,
            &routing::direct_exchange(),
            &routing::key(PAUSE_KEY, user),
            PAUSE_KEY,
            QueueDurability::Transient,
            move |state: PlayingState| {
                tx.send((user, state.is_paused)).unwrap();
                AckDecision::Ack
            },
        )
        .unwrap();
        subscriptions.push(subscription);
    }

    let server = broker.connect();
    let channel = server.channel().unwrap();
    publish_json(
        &channel,
        EXCHANGE_PERIL_DIRECT,
        PAUSE_KEY,
        &PlayingState { is_paused: true },
    )
    .unwrap();

    let mut got = collect(&rx, 2);
    got.sort();
    assert_eq!(got, vec![("alice", true), ("bob", true)]);

    assert!(wait_drained(&broker, "pause.alice"));
    assert!(wait_drained(&broker, "pause.bob"));
    alice.close();
    bob.close();
    assert!(broker.queue("pause.alice").is_none());
    for subscription in subscriptions {
        assert_eq!(subscription.join().acked, 1);
    }
}

#[test]
fn subscribing_to_another_connections_transient_queue_fails_setup() {
    let broker = InMemoryBroker::new();
    let owner = broker.connect();
    let intruder = broker.connect();
    let _owned = subscribe_json(
        &owner,
        &routing::direct_exchange(),
        "pause.carol",
        PAUSE_KEY,
        QueueDurability::Transient,
        |_: PlayingState| AckDecision::Ack,
    )
    .unwrap();

    let err = subscribe_json(
        &intruder,
        &routing::direct_exchange(),
        "pause.carol",
        PAUSE_KEY,
        QueueDurability::Transient,
        |_: PlayingState| AckDecision::Ack,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        SetupError::Declare(DeclareError::Queue {
            source: BrokerError::ResourceLocked(_),
            ..
        })
    ));
}

#[test]
fn subscribing_on_closed_connection_fails_setup() {
    let broker = InMemoryBroker::new();
    let conn = broker.connect();
    conn.close();

    let err = subscribe_json(
        &conn,
        &routing::direct_exchange(),
        "pause.dave",
        PAUSE_KEY,
        QueueDurability::Transient,
        |_: PlayingState| AckDecision::Ack,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        SetupError::Declare(DeclareError::Channel(BrokerError::ConnectionClosed))
    ));
}
