//! Integration tests for fsrlink-core driven through the mock radio.

use std::sync::Arc;
use std::time::Duration;

use fsrlink_core::mock::{MockPeer, MockRadio, MockSink};
use fsrlink_core::{LinkEvent, LinkOptions, LinkStateMachine, ReconnectOptions};
use fsrlink_types::uuids::{NUS_SERVICE, NUS_TX};
use fsrlink_types::{DeviceId, LinkState, SubscriptionTarget};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_fragmented_stream_arrives_in_order() {
    let peer = Arc::new(MockPeer::new("glove"));
    let radio = Arc::new(MockRadio::new().with_peer(Arc::clone(&peer)));
    let (sink, mut readings) = MockSink::channel();
    let link = LinkStateMachine::new(radio, sink, LinkOptions::default());

    link.start(
        DeviceId::new("glove").unwrap(),
        SubscriptionTarget::new(NUS_SERVICE, NUS_TX),
    )
    .await
    .unwrap();
    timeout(WAIT, link.watch_state().wait_for(|s| *s == LinkState::SubscriptionActive))
        .await
        .unwrap()
        .unwrap();

    let stream: String = (0..50).map(|i| format!("FSR{}:{}\n", i % 4, i)).collect();
    for chunk in stream.as_bytes().chunks(7) {
        assert!(peer.notify(chunk.to_vec()));
    }

    for i in 0..50 {
        let reading = timeout(WAIT, readings.recv()).await.unwrap().unwrap();
        assert_eq!(reading.sensor_name.as_str(), format!("FSR{}", i % 4));
        assert_eq!(reading.value, f64::from(i));
    }

    link.stop().await;
}

#[tokio::test]
async fn test_link_survives_repeated_drops() {
    let peer = Arc::new(MockPeer::new("glove"));
    let radio = Arc::new(MockRadio::new().with_peer(Arc::clone(&peer)));
    let (sink, _readings) = MockSink::channel();
    let options = LinkOptions::default().reconnect(
        ReconnectOptions::default()
            .initial_delay(Duration::from_millis(5))
            .jitter(false),
    );
    let link = LinkStateMachine::new(radio, sink, options);
    let mut events = link.subscribe();

    link.start(
        DeviceId::new("glove").unwrap(),
        SubscriptionTarget::new(NUS_SERVICE, NUS_TX),
    )
    .await
    .unwrap();

    for round in 1..=4 {
        timeout(WAIT, async {
            loop {
                if let Ok(LinkEvent::StateChanged {
                    state: LinkState::SubscriptionActive,
                    ..
                }) = events.recv().await
                {
                    break;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("round {round} never became active"));

        if round == 2 {
            peer.fail_next_connects(2);
        }
        if round < 4 {
            peer.drop_connection();
        }
    }

    assert_eq!(peer.connect_count(), 6);
    link.stop().await;
    assert!(!peer.is_connected());
}
