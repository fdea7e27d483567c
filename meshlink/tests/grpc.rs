use assert_matches::assert_matches;
use futures::StreamExt;
use meshlink::client::{Client, ClientConfig, Registry, Service};
use meshlink::endpoint::{CallOptions, Message};
use meshlink::error::{ErrorKind, Failure, RpcError};
use meshlink::stream::StreamCall;
use meshlink::transport::codec::JsonCodec;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tonic::codegen::{http, Body, BoxFuture, BoxStream, Context, Poll, Service as HttpService, StdError};
use tonic::server::{ClientStreamingService, Grpc, NamedService, ServerStreamingService, StreamingService, UnaryService};
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// `Say` greets by name and does not know `nobody`.
struct Say;

impl UnaryService<Message> for Say {
    type Response = Message;
    type Future = BoxFuture<Response<Message>, Status>;

    fn call(&mut self, request: Request<Message>) -> Self::Future {
        Box::pin(async move {
            let name = request.into_inner()["name"].as_str().unwrap_or_default().to_string();
            if name == "nobody" {
                return Err(Status::not_found("no such user"));
            }
            Ok(Response::new(json!({ "message": format!("hello {name}") })))
        })
    }
}

/// `Count` streams `1..=upto`, failing with `aborted` in place of `failAt`.
struct Count;

impl ServerStreamingService<Message> for Count {
    type Response = Message;
    type ResponseStream = BoxStream<Message>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Message>) -> Self::Future {
        let request = request.into_inner();
        let upto = request["upto"].as_u64().unwrap_or_default();
        let fail_at = request["failAt"].as_u64();
        let mut items = Vec::new();
        for i in 1..=upto {
            if Some(i) == fail_at {
                items.push(Err(Status::aborted("counter tripped")));
                break;
            }
            items.push(Ok(json!(i)));
        }
        let stream: BoxStream<Message> = Box::pin(futures::stream::iter(items));
        Box::pin(async move { Ok::<_, Status>(Response::new(stream)) })
    }
}

/// `Sum` adds up every number the client streams.
struct Sum;

impl ClientStreamingService<Message> for Sum {
    type Response = Message;
    type Future = BoxFuture<Response<Message>, Status>;

    fn call(&mut self, request: Request<Streaming<Message>>) -> Self::Future {
        Box::pin(async move {
            let mut inbound = request.into_inner();
            let mut sum = 0;
            while let Some(n) = inbound.message().await? {
                sum += n.as_i64().unwrap_or_default();
            }
            Ok::<_, Status>(Response::new(json!(sum)))
        })
    }
}

/// `Chat` echoes every message and aborts on `"boom"`.
struct Chat;

impl StreamingService<Message> for Chat {
    type Response = Message;
    type ResponseStream = BoxStream<Message>;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<Message>>) -> Self::Future {
        let replies = futures::stream::unfold(Some(request.into_inner()), |inbound| async move {
            let mut inbound = inbound?;
            match inbound.message().await {
                Ok(Some(message)) if message == json!("boom") => Some((Err(Status::aborted("conversation aborted")), None)),
                Ok(Some(message)) => Some((Ok(json!({ "echo": message })), Some(inbound))),
                Ok(None) => None,
                Err(status) => Some((Err(status), None)),
            }
        });
        let stream: BoxStream<Message> = Box::pin(replies);
        Box::pin(async move { Ok::<_, Status>(Response::new(stream)) })
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct EchoServer;

impl NamedService for EchoServer {
    const NAME: &'static str = "test.Echo";
}

impl<B> HttpService<http::Request<B>> for EchoServer
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let path = request.uri().path().to_string();
        Box::pin(async move {
            let mut grpc = Grpc::new(JsonCodec);
            Ok(match path.as_str() {
                "/test.Echo/Say" => grpc.unary(Say, request).await,
                "/test.Echo/Count" => grpc.server_streaming(Count, request).await,
                "/test.Echo/Sum" => grpc.client_streaming(Sum, request).await,
                "/test.Echo/Chat" => grpc.streaming(Chat, request).await,
                _ => Status::unimplemented(format!("{path} is not served")).into_http(),
            })
        })
    }
}

async fn serve() -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    tokio::spawn(Server::builder().add_service(EchoServer).serve_with_incoming(TcpIncoming::from(listener)));
    Ok(address)
}

async fn connect() -> anyhow::Result<(Client, Service)> {
    let address = serve().await?;
    let config = ClientConfig::from_json(
        &json!({
            "transports": {
                "grpc": {
                    "service": "test.Echo",
                    "methods": [
                        { "name": "Say" },
                        { "name": "Count", "responseStream": true },
                        { "name": "Sum", "requestStream": true },
                        { "name": "Chat", "requestStream": true, "responseStream": true }
                    ],
                    "timeout": 1000
                }
            },
            "endpoints": { "Say": {}, "Count": {}, "Sum": {}, "Chat": {} },
            "publisher": { "name": "static", "instances": [format!("grpc://{address}")] }
        })
        .to_string(),
    )?;
    let client = Client::new(config, &Registry::default())?;
    let service = client.connect()?;
    Ok((client, service))
}

async fn open(service: &Service, method: &str, request: Message) -> anyhow::Result<StreamCall> {
    let reply = service.call(method, request, CallOptions::new().with_timeout(Duration::from_secs(5))).await?;
    Ok(reply.into_stream().expect("streaming reply"))
}

#[tokio::test]
async fn unary_round_trip() -> anyhow::Result<()> {
    let (client, service) = connect().await?;
    let reply = service.call("Say", json!({ "name": "mesh" }), CallOptions::new().with_retry(1)).await?;
    assert_eq!(reply.into_data(), Some(json!({ "message": "hello mesh" })));

    let failure = service.call("Say", json!({ "name": "nobody" }), CallOptions::new().with_retry(3)).await.unwrap_err();
    assert_matches!(failure, Failure::Rejected(e) if e.kind() == ErrorKind::NotFound && e.message() == "no such user");
    client.end();
    Ok(())
}

#[tokio::test]
async fn server_stream_round_trip() -> anyhow::Result<()> {
    let (_client, service) = connect().await?;
    let messages: Vec<_> = open(&service, "Count", json!({ "upto": 3 })).await?.into_stream().collect().await;
    let expected: Vec<Result<Message, RpcError>> = vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))];
    assert_eq!(messages, expected);
    Ok(())
}

#[tokio::test]
async fn server_stream_fails_midway() -> anyhow::Result<()> {
    let (_client, service) = connect().await?;
    let stream = open(&service, "Count", json!({ "upto": 5, "failAt": 3 })).await?;
    assert_eq!(stream.read().await, Ok(Some(json!(1))));
    assert_eq!(stream.read().await, Ok(Some(json!(2))));
    assert_matches!(stream.read().await, Err(e) if e.kind() == ErrorKind::Aborted);
    assert!(tokio::time::timeout(Duration::from_millis(50), stream.read()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn client_stream_round_trip() -> anyhow::Result<()> {
    let (_client, service) = connect().await?;
    let stream = open(&service, "Sum", json!(null)).await?;
    for n in [4, 5, 6] {
        stream.write(json!(n))?;
    }
    stream.end();
    assert_eq!(stream.read().await, Ok(Some(json!(15))));
    assert_eq!(stream.read().await, Ok(None));
    Ok(())
}

#[tokio::test]
async fn bidi_round_trip_then_abort() -> anyhow::Result<()> {
    let (_client, service) = connect().await?;
    let stream = open(&service, "Chat", json!(null)).await?;
    stream.write(json!("hello"))?;
    assert_eq!(stream.read().await, Ok(Some(json!({ "echo": "hello" }))));
    stream.write(json!("again"))?;
    assert_eq!(stream.read().await, Ok(Some(json!({ "echo": "again" }))));

    stream.write(json!("boom"))?;
    assert_matches!(stream.read().await, Err(e) if e.kind() == ErrorKind::Aborted);
    Ok(())
}

#[tokio::test]
async fn ended_client_stops_serving() -> anyhow::Result<()> {
    let (client, service) = connect().await?;
    service.call("Say", json!({ "name": "mesh" }), CallOptions::new()).await?;
    client.end();
    let failure = service.call("Say", json!({ "name": "mesh" }), CallOptions::new()).await.unwrap_err();
    assert_eq!(failure.last_kind(), Some(ErrorKind::Unavailable));

    // a second connect after end does not reopen channels
    let again = client.connect()?;
    let failure = again.call("Say", json!({ "name": "mesh" }), CallOptions::new()).await.unwrap_err();
    assert_eq!(failure.last_kind(), Some(ErrorKind::Unavailable));
    Ok(())
}
