//! ICY primitive against a mock HTTP server.

use std::time::Duration;

use onaircontrol::{
    ErrorReason, IcyOptions, IcyStreamFactory, MediaEvent, MediaEventSink, MediaFactory,
    MediaPrimitive, ReadyState, StartError,
};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn metadata_block(text: &str) -> Vec<u8> {
    let blocks = text.len().div_ceil(16);
    let mut out = vec![blocks as u8];
    out.extend_from_slice(text.as_bytes());
    out.resize(1 + blocks * 16, 0);
    out
}

fn primitive() -> (
    Box<dyn MediaPrimitive>,
    mpsc::UnboundedReceiver<(u64, MediaEvent)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let factory = IcyStreamFactory::new(IcyOptions::default()).unwrap();
    (factory.create(MediaEventSink::new(7, tx)), rx)
}

/// Collects events until `last` (included) or a five second silence.
async fn events_until(
    rx: &mut mpsc::UnboundedReceiver<(u64, MediaEvent)>,
    last: &MediaEvent,
) -> Vec<MediaEvent> {
    let mut events = Vec::new();
    while let Ok(Some((generation, event))) =
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
    {
        assert_eq!(generation, 7);
        let done = &event == last;
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[tokio::test]
async fn test_icy_stream_reports_audio_titles_and_end() {
    let server = MockServer::start().await;
    let mut body = b"abcd".to_vec();
    body.extend(metadata_block("StreamTitle='Hello';"));
    body.extend_from_slice(b"efgh");

    Mock::given(method("GET"))
        .and(path("/live"))
        .and(header("Icy-MetaData", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("icy-metaint", "4")
                .insert_header("icy-name", "Test FM")
                .set_body_bytes(body),
        )
        .mount(&server)
        .await;

    let (mut primitive, mut rx) = primitive();
    primitive.assign_source(&format!("{}/live", server.uri()));
    primitive.load();
    assert!(primitive.is_paused());

    primitive.start().await.unwrap();

    let events = events_until(&mut rx, &MediaEvent::Ended).await;
    assert_eq!(
        events,
        vec![
            MediaEvent::Started,
            MediaEvent::StreamTitle("Hello".to_string()),
            MediaEvent::Ended,
        ]
    );
    assert!(primitive.is_paused());
    assert_eq!(primitive.ready_state(), ReadyState::HaveEnoughData);
}

#[tokio::test]
async fn test_icy_http_error_fails_start() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (mut primitive, mut rx) = primitive();
    primitive.assign_source(&format!("{}/gone", server.uri()));
    primitive.load();

    assert_eq!(primitive.start().await, Err(StartError::Http(404)));
    let (_, event) = rx.recv().await.unwrap();
    assert_eq!(event, MediaEvent::Errored(ErrorReason::Http(404)));
}

#[tokio::test]
async fn test_icy_stop_aborts_pending_start() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"abcd".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let (mut primitive, mut rx) = primitive();
    primitive.assign_source(&format!("{}/slow", server.uri()));
    primitive.load();

    let start = primitive.start();
    primitive.stop();

    assert_eq!(start.await, Err(StartError::Aborted));
    let (_, event) = rx.recv().await.unwrap();
    assert_eq!(event, MediaEvent::Stopped);
    assert!(primitive.is_paused());
}

#[tokio::test]
async fn test_icy_start_without_source() {
    let (mut primitive, _rx) = primitive();
    assert!(matches!(
        primitive.start().await,
        Err(StartError::Unsupported(_))
    ));
    assert_eq!(primitive.source(), None);
}
