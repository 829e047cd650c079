//! # Event Adapter Tests
//!
//! Fan-out over a broker-backed typed channel.

use parking_lot::Mutex;
use service_broker::test_utils::in_memory_broker;
use service_broker::{ChannelEventAdapter, HandlerError, MessageChannel, Observer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Recorder {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Observer<String> for Recorder {
    fn on_next(&self, item: &String) -> Result<(), HandlerError> {
        self.seen.lock().push(item.clone());
        Ok(())
    }
}

#[tokio::test]
async fn second_of_three_handlers_failing_does_not_stop_the_others() {
    let broker = in_memory_broker().await.unwrap();
    let events = ChannelEventAdapter::new(broker.open_channel::<String>().await.unwrap());

    let calls = Arc::new(Mutex::new(Vec::new()));
    for index in 1..=3 {
        let calls = calls.clone();
        events.on_message(move |_| {
            calls.lock().push(index);
            if index == 2 {
                Err("handler two always fails".into())
            } else {
                Ok(())
            }
        });
    }
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();
    events.on_error(move |failure| {
        assert!(failure.to_string().contains("handler two always fails"));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    events.channel().send("work".to_string()).await.unwrap();
    assert!(events.pump(Duration::from_secs(1)).await.unwrap());

    assert_eq!(*calls.lock(), vec![1, 2, 3]);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    // Handler failures never roll the receive back
    assert!(events.channel().queue().peek().await.unwrap().is_empty());
}

#[tokio::test]
async fn disposed_subscription_stops_receiving() {
    let broker = in_memory_broker().await.unwrap();
    let events = ChannelEventAdapter::new(broker.open_channel::<String>().await.unwrap());

    let first = Arc::new(Mutex::new(Vec::new()));
    let second = Arc::new(Mutex::new(Vec::new()));
    let subscription = events.subscribe(Recorder { seen: first.clone() });
    let _kept = events.subscribe(Recorder { seen: second.clone() });

    events.channel().send("one".to_string()).await.unwrap();
    assert!(events.pump(Duration::from_secs(1)).await.unwrap());

    drop(subscription);

    events.channel().send("two".to_string()).await.unwrap();
    assert!(events.pump(Duration::from_secs(1)).await.unwrap());

    assert_eq!(*first.lock(), vec!["one".to_string()]);
    assert_eq!(*second.lock(), vec!["one".to_string(), "two".to_string()]);
}

#[tokio::test]
async fn removed_handler_is_not_called() {
    let broker = in_memory_broker().await.unwrap();
    let events = ChannelEventAdapter::new(broker.open_channel::<String>().await.unwrap());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = events.on_message(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    assert!(events.remove_handler(id));
    assert!(!events.remove_handler(id));

    events.channel().send("ignored".to_string()).await.unwrap();
    assert!(events.pump(Duration::from_secs(1)).await.unwrap());
    assert!(!events.pump(Duration::ZERO).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
