//! # Channel Integration Tests
//!
//! End-to-end behavior of typed, untyped and conversation-bound channels on the
//! in-memory store.

use serde::{Deserialize, Serialize};
use service_broker::{
    BrokerError, InMemoryStore, MessageChannel, MessageType, QueueStore, ServiceBroker,
    UntypedChannelBuilder,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct WorkItem {
    id: u32,
    payload: String,
}

#[tokio::test]
async fn typed_channel_round_trip() {
    let broker = ServiceBroker::in_memory();
    broker.enable_broker().await.unwrap();
    let initiator = broker.open_channel::<String>().await.unwrap();
    let target = broker.open_channel::<String>().await.unwrap();

    initiator.send("Hello World!".to_string()).await.unwrap();

    let mut received = None;
    assert!(target
        .try_receive(TIMEOUT, |message| {
            received = Some(message);
            Ok(())
        })
        .await
        .unwrap());
    assert_eq!(received.as_deref(), Some("Hello World!"));
}

#[tokio::test]
async fn typed_channel_carries_structs() {
    let broker = ServiceBroker::in_memory();
    let channel = broker.open_channel::<WorkItem>().await.unwrap();
    let item = WorkItem {
        id: 7,
        payload: "resize image".to_string(),
    };

    channel.send(item.clone()).await.unwrap();

    let mut received = None;
    channel
        .try_receive(TIMEOUT, |work| {
            received = Some(work);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(received, Some(item));
}

#[tokio::test]
async fn untyped_channel_round_trip() {
    let broker = ServiceBroker::in_memory();
    let builder = || {
        UntypedChannelBuilder::new("MyChannel")
            .register::<i32>()
            .register::<String>()
    };
    let initiator = broker.open_untyped_channel(builder()).await.unwrap();
    let target = broker.open_untyped_channel(builder()).await.unwrap();

    initiator.send(&"my string".to_string()).await.unwrap();
    let mut received = None;
    assert!(target
        .try_receive(TIMEOUT, |message| {
            assert_eq!(message.message_type(), &MessageType::of::<String>());
            received = message.downcast::<String>().ok();
            Ok(())
        })
        .await
        .unwrap());
    assert_eq!(received.as_deref(), Some("my string"));

    initiator.send(&42_i32).await.unwrap();
    let mut received = None;
    assert!(target
        .try_receive(TIMEOUT, |message| {
            assert_eq!(message.message_type().name(), "i32");
            received = message.downcast::<i32>().ok();
            Ok(())
        })
        .await
        .unwrap());
    assert_eq!(received, Some(42));
}

#[tokio::test]
async fn posting_unsupported_type_is_rejected() {
    let broker = ServiceBroker::in_memory();
    let initiator = broker
        .open_untyped_channel(UntypedChannelBuilder::new("MyIntChannel").register::<i32>())
        .await
        .unwrap();

    let err = initiator.send(&"Hello".to_string()).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::UnsupportedMessageType { ref channel, .. } if channel == "MyIntChannel"
    ));
    assert!(initiator.queue().peek().await.unwrap().is_empty());
    assert_eq!(initiator.queue().statistics().await.unwrap().message_count(), 0);

    let mut handled = false;
    let received = initiator
        .try_receive(Duration::ZERO, |_| {
            handled = true;
            Ok(())
        })
        .await
        .unwrap();
    assert!(!received);
    assert!(!handled);
}

#[tokio::test]
async fn rejected_send_leaves_no_open_dialog() {
    let store = Arc::new(InMemoryStore::new());
    let broker = ServiceBroker::new(store.clone());
    let channel = broker
        .open_untyped_channel(UntypedChannelBuilder::new("MyIntChannel").register::<i32>())
        .await
        .unwrap();

    channel.send(&"Hello".to_string()).await.unwrap_err();

    assert_eq!(store.open_endpoint_count(), 0);
}

#[tokio::test]
async fn registered_type_outside_contract_is_not_remapped() {
    let broker = ServiceBroker::in_memory();
    // The first opener fixes the contract to i32 only
    broker
        .open_untyped_channel(UntypedChannelBuilder::new("Mixed").register::<i32>())
        .await
        .unwrap();
    let wider = broker
        .open_untyped_channel(
            UntypedChannelBuilder::new("Mixed")
                .register::<i32>()
                .register::<String>(),
        )
        .await
        .unwrap();
    assert!(wider.supports(&MessageType::of::<String>()));

    let err = wider.send(&"not in contract".to_string()).await.unwrap_err();
    assert!(matches!(err, BrokerError::MessageTypeNotInContract { .. }));

    wider.send(&7_i32).await.unwrap();
    assert_eq!(wider.queue().peek().await.unwrap().len(), 1);
}

#[tokio::test]
async fn sink_drains_end_of_dialog() {
    let store = Arc::new(InMemoryStore::new());
    let broker = ServiceBroker::new(store.clone());
    let channel = broker.open_channel::<u64>().await.unwrap();

    for n in 0..3 {
        channel.send(n).await.unwrap();
    }
    assert_eq!(store.open_endpoint_count(), 6);

    while channel.try_receive(Duration::ZERO, |_| Ok(())).await.unwrap() {}

    assert_eq!(store.open_endpoint_count(), 0);
    assert!(store
        .peek(service_broker::system::SINK_QUEUE_NAME)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn request_reply_over_conversation_channel() {
    let broker = ServiceBroker::in_memory();
    let request = broker.create_message_type("Request").await.unwrap();
    let reply = broker.create_message_type("Reply").await.unwrap();
    broker
        .create_contract(
            "RequestReply",
            std::slice::from_ref(&request),
            std::slice::from_ref(&reply),
        )
        .await
        .unwrap();

    let client_queue = broker.create_queue("ClientQueue").await.unwrap();
    let server_queue = broker.create_queue("ServerQueue").await.unwrap();
    let client = client_queue
        .create_service("Client", "RequestReply")
        .await
        .unwrap();
    let server = server_queue
        .create_service("Server", "RequestReply")
        .await
        .unwrap();

    let conversation = broker
        .begin_conversation(&client, &server, "RequestReply")
        .await
        .unwrap();
    let channel = broker.conversation_channel(conversation.handle(), &client_queue);
    let server_handle = broker
        .paired_conversation(channel.handle())
        .await
        .unwrap()
        .expect("target side should be open");

    for question in ["ping", "ping again"] {
        channel.send_as(&request, question).await.unwrap();

        assert!(server_queue
            .try_receive(TIMEOUT, None, |conversation, message_type, body| {
                assert_eq!(message_type, &request);
                assert_eq!(conversation.handle(), server_handle);
                let asked: String = serde_json::from_slice(body).unwrap();
                let answer = serde_json::to_vec(&format!("{asked}: pong")).unwrap();
                conversation.send(&reply, answer);
                Ok(())
            })
            .await
            .unwrap());

        let mut answer = None;
        assert!(channel
            .try_receive_as(&reply, TIMEOUT, |text: String| {
                answer = Some(text);
                Ok(())
            })
            .await
            .unwrap());
        assert_eq!(answer, Some(format!("{question}: pong")));
    }

    assert!(channel.is_open().await.unwrap());
    channel.end_conversation().await.unwrap();
    assert!(!channel.is_open().await.unwrap());
    assert_eq!(broker.paired_conversation(server_handle).await.unwrap(), None);

    // The server side sees the end-of-dialog and closes its own side
    assert!(server_queue
        .try_receive(TIMEOUT, None, |conversation, message_type, _| {
            assert_eq!(message_type, &MessageType::END_DIALOG);
            conversation.end_conversation();
            Ok(())
        })
        .await
        .unwrap());
    assert!(client_queue.peek().await.unwrap().is_empty());
}

#[tokio::test]
async fn conversation_channel_cannot_send_against_contract() {
    let broker = ServiceBroker::in_memory();
    let request = broker.create_message_type("Request").await.unwrap();
    broker
        .create_contract("OneWay", std::slice::from_ref(&request), &[])
        .await
        .unwrap();
    let client_queue = broker.create_queue("ClientQueue").await.unwrap();
    let server_queue = broker.create_queue("ServerQueue").await.unwrap();
    let client = client_queue.create_service("Client", "OneWay").await.unwrap();
    let server = server_queue.create_service("Server", "OneWay").await.unwrap();

    let conversation = broker
        .begin_conversation(&client, &server, "OneWay")
        .await
        .unwrap();
    let channel = broker.conversation_channel(conversation.handle(), &client_queue);

    let err = channel.send(&"not declared".to_string()).await.unwrap_err();
    assert!(err.is_type_constraint());
    assert!(server_queue.peek().await.unwrap().is_empty());
}
