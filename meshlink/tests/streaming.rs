use assert_matches::assert_matches;
use futures::StreamExt;
use meshlink::client::{Client, ClientConfig, Registry};
use meshlink::endpoint::{CallOptions, MethodKind};
use meshlink::error::{ErrorKind, RpcError};
use meshlink::stream::StreamCall;
use meshlink::transport::{LocalServer, LocalServers, LocalService};
use serde_json::json;
use std::time::Duration;

fn servers() -> LocalServers {
    let service = LocalService::new()
        .streaming("Count", MethodKind::ServerStreaming, |request, _requests, emitter| async move {
            let upto = request["upto"].as_u64().unwrap_or_default();
            for i in 1..=upto {
                emitter.data(json!(i));
            }
            Ok(())
        })
        .streaming("Sum", MethodKind::ClientStreaming, |_request, mut requests, emitter| async move {
            let mut sum = 0;
            while let Some(n) = requests.next().await {
                sum += n.as_i64().unwrap_or_default();
            }
            emitter.data(json!(sum));
            Ok(())
        })
        .streaming("Chat", MethodKind::Bidi, |_request, mut requests, emitter| async move {
            while let Some(message) = requests.next().await {
                if message == json!("boom") {
                    return Err(RpcError::new(ErrorKind::Aborted, "conversation aborted").into());
                }
                emitter.data(json!({ "echo": message }));
            }
            Ok(())
        })
        .streaming("Locked", MethodKind::ServerStreaming, |_request, _requests, _emitter| async move {
            Err(RpcError::new(ErrorKind::PermissionDenied, "vault is locked").into())
        });
    let servers = LocalServers::new();
    servers.register("stream-1", LocalServer::new().with_service("Streams", service));
    servers
}

async fn open(method: &str) -> anyhow::Result<StreamCall> {
    let config = ClientConfig::from_json(
        r#"{
            "transports": { "local": { "service": "Streams" } },
            "endpoints": { "Count": {}, "Sum": {}, "Chat": {}, "Locked": {} },
            "publisher": { "name": "static", "instances": ["local://stream-1"] }
        }"#,
    )?;
    let service = Client::new(config, &Registry::default().with_local(servers()))?.connect()?;
    let reply = service.call(method, json!({ "upto": 3 }), CallOptions::new().with_retry(2)).await?;
    Ok(reply.into_stream().expect("streaming reply"))
}

#[tokio::test]
async fn server_stream_reads_in_order_then_ends() -> anyhow::Result<()> {
    let stream = open("Count").await?;
    assert_eq!(stream.kind(), MethodKind::ServerStreaming);
    assert_eq!(stream.read().await, Ok(Some(json!(1))));
    assert_eq!(stream.read().await, Ok(Some(json!(2))));
    assert_eq!(stream.read().await, Ok(Some(json!(3))));
    assert_eq!(stream.read().await, Ok(None));
    assert_eq!(stream.read().await, Ok(None));
    assert_matches!(stream.write(json!(4)), Err(e) if e.kind() == ErrorKind::FailedPrecondition);
    Ok(())
}

#[tokio::test]
async fn client_stream_answers_after_end() -> anyhow::Result<()> {
    let stream = open("Sum").await?;
    for n in [1, 2, 3] {
        stream.write(json!(n))?;
    }
    stream.end();
    assert_eq!(stream.read().await, Ok(Some(json!(6))));
    assert_eq!(stream.read().await, Ok(None));
    assert_matches!(stream.write(json!(4)), Err(e) if e.kind() == ErrorKind::FailedPrecondition);
    Ok(())
}

#[tokio::test]
async fn bidi_errors_reach_the_reader() -> anyhow::Result<()> {
    let stream = open("Chat").await?;
    stream.write(json!("hello"))?;
    assert_eq!(stream.read().await, Ok(Some(json!({ "echo": "hello" }))));

    // the error only reaches a reader that is already waiting
    let (read, written) = tokio::join!(stream.read(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write(json!("boom"))
    });
    written?;
    assert_matches!(read, Err(e) if e.kind() == ErrorKind::Aborted);
    // a failed stream does not turn into a clean end
    assert!(tokio::time::timeout(Duration::from_millis(50), stream.read()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn error_before_any_read_is_not_lost() -> anyhow::Result<()> {
    let stream = open("Locked").await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_matches!(stream.read().await, Err(e) if e.kind() == ErrorKind::PermissionDenied);
    assert!(tokio::time::timeout(Duration::from_millis(50), stream.read()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn failed_stream_stops_into_stream() -> anyhow::Result<()> {
    let messages: Vec<_> = open("Locked").await?.into_stream().collect().await;
    assert_eq!(messages.len(), 1);
    assert_matches!(&messages[0], Err(e) if e.kind() == ErrorKind::PermissionDenied);
    Ok(())
}

#[tokio::test]
async fn stream_adapts_into_futures_stream() -> anyhow::Result<()> {
    let messages: Vec<_> = open("Count").await?.into_stream().collect().await;
    let expected: Vec<Result<_, RpcError>> = vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))];
    assert_eq!(messages, expected);
    Ok(())
}
