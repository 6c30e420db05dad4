//! Client and server talking over a real socket

mod common;

use async_trait::async_trait;
use common::EchoUpstream;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay::api::{create_router, AppState};
use relay::client::{
    ByteStream, ChannelClient, HttpTransport, OrchestratorConfig, ProcessError, QueryRequest,
    ReconnectPolicy, RequestOrchestrator, Transport,
};
use relay::protocol::{ProcessAccepted, ProcessRequest};
use relay::{Category, EventKind, RelayConfig, RelayError, ResponseCache};

const TOKEN: &str = "e2e-token";

async fn start_server(upstream: Arc<EchoUpstream>) -> SocketAddr {
    let mut config = RelayConfig::default();
    config.server.auth_token = Some(TOKEN.to_string());
    config.sessions.heartbeat_interval_secs = 1;

    let state = AppState::new(config, upstream);
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

fn orchestrator(addr: SocketAddr, token: &str) -> RequestOrchestrator {
    let transport = HttpTransport::new(format!("http://{}", addr), Some(token.to_string())).unwrap();
    let mut config = OrchestratorConfig::default();
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    RequestOrchestrator::new(Arc::new(transport), Arc::new(ResponseCache::default()), config)
}

#[tokio::test]
async fn test_query_round_trip_over_http() {
    let upstream = Arc::new(EchoUpstream::new());
    let addr = start_server(upstream.clone()).await;
    let orchestrator = orchestrator(addr, TOKEN);

    let response = orchestrator
        .process(QueryRequest::new(Category::General, "explain recursion"))
        .await
        .unwrap();
    assert_eq!(response.content, "[general] explain recursion");
    assert!(!response.cached);

    let again = orchestrator
        .process(QueryRequest::new(Category::General, "explain recursion"))
        .await
        .unwrap();
    assert!(again.cached);
    assert_eq!(upstream.calls(), 1);
}

#[tokio::test]
async fn test_wrong_token_fails_without_retry() {
    let upstream = Arc::new(EchoUpstream::new());
    let addr = start_server(upstream.clone()).await;
    let orchestrator = orchestrator(addr, "wrong");

    let result = orchestrator
        .process(QueryRequest::new(Category::Coder, "hello"))
        .await;

    // whichever of the POST or the channel open is refused first decides the error
    assert!(matches!(
        result,
        Err(ProcessError::Rejected(_)) | Err(ProcessError::Remote(_))
    ));
    assert_eq!(upstream.calls(), 0);
}

/// Real transport whose first channel drops on the client side only: the
/// server keeps its end open, as after a network hiccup.
struct HiccupTransport {
    inner: HttpTransport,
    stale: Mutex<Vec<ByteStream>>,
    opened: AtomicUsize,
}

#[async_trait]
impl Transport for HiccupTransport {
    async fn submit(&self, request: &ProcessRequest) -> relay::Result<ProcessAccepted> {
        self.inner.submit(request).await
    }

    async fn open_channel(&self, session_id: &str) -> relay::Result<ByteStream> {
        let channel = self.inner.open_channel(session_id).await?;
        if self.opened.fetch_add(1, Ordering::SeqCst) == 0 {
            self.stale.lock().push(channel);
            let reset: relay::Result<bytes::Bytes> =
                Err(RelayError::Transport("connection reset".to_string()));
            return Ok(stream::iter(vec![reset]).boxed());
        }
        Ok(channel)
    }
}

#[tokio::test]
async fn test_reconnect_while_server_holds_stale_channel() {
    let upstream = Arc::new(EchoUpstream::new());
    let addr = start_server(upstream.clone()).await;
    let transport = Arc::new(HiccupTransport {
        inner: HttpTransport::new(format!("http://{}", addr), Some(TOKEN.to_string())).unwrap(),
        stale: Mutex::new(Vec::new()),
        opened: AtomicUsize::new(0),
    });

    let client = ChannelClient::new(transport.clone(), ReconnectPolicy::new(3, Duration::from_millis(50)));
    let mut subscription = client.connect("s-1");

    while transport.opened.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    transport
        .submit(&ProcessRequest {
            session_id: "s-1".to_string(),
            query: "explain recursion".to_string(),
            category: Category::General,
            files: Vec::new(),
        })
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = subscription.next().await {
        kinds.push(event.kind);
        if event.is_terminal() {
            assert_eq!(event.content(), Some("[general] explain recursion"));
            break;
        }
    }
    assert_eq!(kinds.first(), Some(&EventKind::Thinking));
    assert_eq!(kinds.last(), Some(&EventKind::Complete));
    assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
}
