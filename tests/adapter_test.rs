//! Adapter contract exercised by a small in-test hub.
//!
//! `CalcHub` decodes deferred arguments through the codec it is handed,
//! boxes inbound stream items, and emits outbound items through the channel
//! registered with `from_chan`.

use std::sync::Mutex;

use hub_sse::adapter::{HubAdapter, HubError, StreamItem, StreamSender};
use hub_sse::protocol::{
    CompletionMessage, HubMessage, InvocationMessage, ParseOutcome, StreamItemMessage,
};
use hub_sse::{HubProtocol, JsonHubProtocol, RawPayload};
use bytes::BytesMut;
use tokio::sync::mpsc::unbounded_channel;

#[derive(Default)]
struct CalcHub {
    counters: Mutex<Vec<StreamSender>>,
}

impl CalcHub {
    fn arg<T: serde::de::DeserializeOwned, P: HubProtocol>(
        target: &str,
        raw: &RawPayload,
        protocol: &P,
    ) -> Result<T, HubError> {
        protocol
            .unmarshal_argument(raw)
            .map_err(|source| HubError::InvalidArgument {
                target: target.to_string(),
                source,
            })
    }
}

impl<P: HubProtocol> HubAdapter<P> for CalcHub {
    fn invoke(
        &self,
        target: &str,
        arguments: &[RawPayload],
        _stream_ids: &[String],
        protocol: &P,
    ) -> Result<Option<RawPayload>, HubError> {
        match target {
            "Add" => {
                let [a, b] = arguments else {
                    return Err(HubError::ArgumentCount {
                        target: target.to_string(),
                        expected: 2,
                        actual: arguments.len(),
                    });
                };
                let a: i64 = Self::arg(target, a, protocol)?;
                let b: i64 = Self::arg(target, b, protocol)?;
                let sum = protocol
                    .marshal_argument(&(a + b))
                    .map_err(|e| HubError::Handler(e.to_string()))?;
                Ok(Some(sum))
            }
            "Reset" => Ok(None),
            "Divide" => Err(HubError::Handler("division by zero".to_string())),
            _ => Err(HubError::UnknownTarget(target.to_string())),
        }
    }

    fn into_chan(
        &self,
        target: &str,
        stream_index: usize,
        inbound: &StreamSender,
        item: &RawPayload,
        protocol: &P,
    ) -> Result<(), HubError> {
        if target != "Sum" || stream_index != 0 {
            return Err(HubError::NoSuchStream {
                target: target.to_string(),
                index: stream_index,
            });
        }
        let value: i64 = Self::arg(target, item, protocol)?;
        inbound
            .send(Box::new(value))
            .map_err(|_| HubError::StreamClosed(target.to_string()))
    }

    fn from_chan(&self, target: &str, outbound: StreamSender) -> Result<(), HubError> {
        if target != "Counter" {
            return Err(HubError::UnknownTarget(target.to_string()));
        }
        self.counters
            .lock()
            .map_err(|_| HubError::Handler("poisoned".to_string()))?
            .push(outbound);
        Ok(())
    }
}

fn decode(protocol: &JsonHubProtocol, wire: &[u8]) -> HubMessage {
    let mut buf = BytesMut::from(wire);
    match protocol.parse_message(&mut buf).unwrap() {
        ParseOutcome::Message(message) => message,
        ParseOutcome::Incomplete => panic!("incomplete frame"),
    }
}

/// What a dispatcher does with an invocation: call the adapter, turn the
/// outcome into a completion.
fn dispatch(
    hub: &CalcHub,
    protocol: &JsonHubProtocol,
    invocation: &InvocationMessage,
) -> CompletionMessage {
    let id = invocation.invocation_id.clone().unwrap_or_default();
    match hub.invoke(
        &invocation.target,
        &invocation.arguments,
        &invocation.stream_ids,
        protocol,
    ) {
        Ok(Some(result)) => CompletionMessage::result(id, result),
        Ok(None) => CompletionMessage::void(id),
        Err(err) => CompletionMessage::error(id, err.to_string()),
    }
}

#[test]
fn test_invoke_decodes_arguments_and_encodes_result() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();

    let HubMessage::Invocation(invocation) = decode(
        &protocol,
        b"{\"type\":1,\"invocationId\":\"1\",\"target\":\"Add\",\"arguments\":[2,40]}\x1e",
    ) else {
        panic!("expected invocation");
    };

    let completion = dispatch(&hub, &protocol, &invocation);
    let mut out = BytesMut::new();
    protocol
        .write_message(&HubMessage::Completion(completion), &mut out)
        .unwrap();
    assert_eq!(&out[..], b"{\"type\":3,\"invocationId\":\"1\",\"result\":42}\x1e");
}

#[test]
fn test_invoke_without_result_completes_void() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();
    let invocation = InvocationMessage::new("Reset", Vec::new()).with_invocation_id("7");

    assert_eq!(dispatch(&hub, &protocol, &invocation), CompletionMessage::void("7"));
}

#[test]
fn test_invoke_errors_become_completion_errors() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();

    let wrong_type = InvocationMessage::new(
        "Add",
        vec![RawPayload::new("\"two\""), RawPayload::new("2")],
    )
    .with_invocation_id("1");
    let completion = dispatch(&hub, &protocol, &wrong_type);
    assert!(matches!(
        completion.completion,
        hub_sse::protocol::Completion::Error(ref e) if e.contains("invalid argument for \"Add\"")
    ));

    let unknown = InvocationMessage::new("Nope", Vec::new()).with_invocation_id("2");
    assert_eq!(
        dispatch(&hub, &protocol, &unknown),
        CompletionMessage::error("2", "unknown hub method \"Nope\"")
    );

    let failing = InvocationMessage::new("Divide", Vec::new()).with_invocation_id("3");
    assert_eq!(
        dispatch(&hub, &protocol, &failing),
        CompletionMessage::error("3", "division by zero")
    );
}

#[test]
fn test_argument_count_mismatch() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();

    let err = hub
        .invoke("Add", &[RawPayload::new("1")], &[], &protocol)
        .unwrap_err();
    assert!(matches!(
        err,
        HubError::ArgumentCount {
            expected: 2,
            actual: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_into_chan_boxes_items() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();
    let (tx, mut rx) = unbounded_channel::<StreamItem>();

    for wire in [
        &b"{\"type\":2,\"invocationId\":\"s\",\"item\":3}\x1e"[..],
        &b"{\"type\":2,\"invocationId\":\"s\",\"item\":4}\x1e"[..],
    ] {
        let HubMessage::StreamItem(item) = decode(&protocol, wire) else {
            panic!("expected stream item");
        };
        hub.into_chan("Sum", 0, &tx, &item.item, &protocol).unwrap();
    }
    drop(tx);

    let mut total = 0;
    while let Some(item) = rx.recv().await {
        total += *item.downcast::<i64>().unwrap();
    }
    assert_eq!(total, 7);
}

#[test]
fn test_into_chan_rejects_unknown_stream_and_closed_channel() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();
    let (tx, rx) = unbounded_channel::<StreamItem>();
    let item = RawPayload::new("1");

    assert!(matches!(
        hub.into_chan("Sum", 1, &tx, &item, &protocol),
        Err(HubError::NoSuchStream { index: 1, .. })
    ));

    drop(rx);
    assert!(matches!(
        hub.into_chan("Sum", 0, &tx, &item, &protocol),
        Err(HubError::StreamClosed(_))
    ));
}

#[tokio::test]
async fn test_from_chan_items_encode_as_stream_items() {
    let protocol = JsonHubProtocol::new();
    let hub = CalcHub::default();
    let (tx, mut rx) = unbounded_channel::<StreamItem>();

    HubAdapter::<JsonHubProtocol>::from_chan(&hub, "Counter", tx).unwrap();
    {
        let counters = hub.counters.lock().unwrap();
        for n in 1..=2u32 {
            counters[0].send(Box::new(n)).unwrap();
        }
    }
    hub.counters.lock().unwrap().clear();

    let mut out = BytesMut::new();
    while let Some(item) = rx.recv().await {
        let n = item.downcast::<u32>().unwrap();
        let message = StreamItemMessage {
            invocation_id: "c".to_string(),
            item: protocol.marshal_argument(&*n).unwrap(),
        };
        protocol
            .write_message(&HubMessage::StreamItem(message), &mut out)
            .unwrap();
    }
    assert_eq!(
        &out[..],
        b"{\"type\":2,\"invocationId\":\"c\",\"item\":1}\x1e{\"type\":2,\"invocationId\":\"c\",\"item\":2}\x1e"
    );

    assert!(matches!(
        HubAdapter::<JsonHubProtocol>::from_chan(&hub, "Add", unbounded_channel().0),
        Err(HubError::UnknownTarget(_))
    ));
}
