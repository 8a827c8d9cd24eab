//! Child and parent wired together over loopback

use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lan_child_monitor::{
    audio::{AlertSignal, CaptureSource, NullPlayback, ToneCapture},
    codec,
    constants::HISTORY_CAPACITY,
    discovery::{Discovery, LocalDirectory, SERVICE_TYPE},
    error::ConnectError,
    network::{
        CaptureFactory, ListenEvent, ListenSession, ServerConfig, ServerState, SessionEndpoint,
        TransportClient, TransportServer,
    },
    volume::{loudness, VolumeHistory},
    Error,
};

const FRAME: usize = 100;

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

fn counting_alert() -> (Arc<dyn AlertSignal>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let alert: Arc<dyn AlertSignal> = {
        let count = count.clone();
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    };
    (alert, count)
}

fn child(directory: &LocalDirectory, name: &str, capture: CaptureFactory) -> TransportServer {
    let config = ServerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        service_name: name.to_string(),
        service_type: SERVICE_TYPE.to_string(),
        frame_samples: FRAME,
    };
    TransportServer::new(config, Arc::new(directory.clone()), capture)
}

fn tone() -> ToneCapture {
    ToneCapture::new(440.0, 8000, 8000, FRAME)
}

#[test]
fn test_single_frame_reaches_history() {
    // Port 10000 is taken, whether by us or by someone else
    let _blocker = TcpListener::bind("127.0.0.1:10000").ok();

    let directory = LocalDirectory::new();
    let capture: CaptureFactory =
        Arc::new(|| Ok(Box::new(tone().limit(1)) as Box<dyn CaptureSource>));
    let server = child(&directory, "Nursery", capture);
    server.start(10000).unwrap();
    wait_until(|| server.state() == ServerState::AwaitingConnection);

    let bound = server.bound_port().unwrap();
    assert_ne!(bound, 10000);
    assert_eq!(
        directory.advertised(SERVICE_TYPE),
        vec![("Nursery".to_string(), bound)]
    );

    let discovery = Discovery::start(Arc::new(directory.clone()), SERVICE_TYPE).unwrap();
    let endpoint = discovery.wait_for_first(Duration::from_secs(5)).unwrap();
    assert_eq!(endpoint.display_name, "Nursery");
    assert_eq!(endpoint.port, bound);

    let (alert, alerts) = counting_alert();
    let history = VolumeHistory::new(HISTORY_CAPACITY);
    let session = ListenSession::start(
        &TransportClient::default(),
        endpoint,
        NullPlayback::new(),
        alert,
        history.clone(),
        2 * FRAME,
    )
    .unwrap();

    // One frame, then the child closes the stream
    let event = session.events().recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(event, ListenEvent::Disconnected { .. }));
    assert!(session.events().recv_timeout(Duration::from_secs(5)).is_err());
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    let sent = tone().read_frame().unwrap().samples;
    let mut encoded = vec![0u8; FRAME];
    codec::encode(&sent, &mut encoded);
    let mut decoded = vec![0i16; FRAME];
    codec::decode(&encoded, &mut decoded);
    let expected = loudness(&decoded, 2.0).unwrap();

    let snapshot = history.snapshot(HISTORY_CAPACITY);
    assert_eq!(snapshot.len(), 1);
    let value = snapshot.latest().unwrap();
    assert!(value > 0.0);
    assert!((value - expected).abs() < 1e-9);
    assert!((snapshot.max_volume() - expected).abs() < 1e-9);

    server.stop();
    assert!(directory.advertised(SERVICE_TYPE).is_empty());
}

#[test]
fn test_dial_to_closed_port_is_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = SessionEndpoint::manual("127.0.0.1", port as u32).unwrap();
    let err = TransportClient::default().connect(&endpoint).unwrap_err();
    assert!(matches!(err, ConnectError::Refused(_)));
}

#[test]
fn test_child_stopping_mid_stream_alerts_once() {
    let directory = LocalDirectory::new();
    let capture: CaptureFactory =
        Arc::new(|| Ok(Box::new(tone().paced(true)) as Box<dyn CaptureSource>));
    let server = child(&directory, "Nursery", capture);
    server.start(0).unwrap();
    wait_until(|| server.state() == ServerState::AwaitingConnection);
    let port = server.bound_port().unwrap();

    let (alert, alerts) = counting_alert();
    let history = VolumeHistory::new(64);
    let session = ListenSession::start(
        &TransportClient::default(),
        SessionEndpoint::new("Nursery", "127.0.0.1", port),
        NullPlayback::new(),
        alert,
        history.clone(),
        2 * FRAME,
    )
    .unwrap();

    wait_until(|| history.len() >= 3);
    server.stop();

    let event = session.events().recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(event, ListenEvent::Disconnected { .. }));
    assert!(session.events().recv_timeout(Duration::from_secs(5)).is_err());
    assert_eq!(alerts.load(Ordering::SeqCst), 1);
    assert!(!session.is_running());
}

#[test]
fn test_same_name_children_are_told_apart() {
    let directory = LocalDirectory::new();
    let capture: CaptureFactory =
        Arc::new(|| Ok(Box::new(tone().paced(true)) as Box<dyn CaptureSource>));
    let first = child(&directory, "Nursery", capture.clone());
    let second = child(&directory, "Nursery", capture);
    first.start(0).unwrap();
    wait_until(|| first.advertised_name().is_some());
    second.start(0).unwrap();
    wait_until(|| second.advertised_name().is_some());
    assert_eq!(second.advertised_name().unwrap(), "Nursery\\032(2)");

    let discovery = Discovery::start(Arc::new(directory.clone()), SERVICE_TYPE).unwrap();
    wait_until(|| discovery.endpoints().len() == 2);
    let mut names: Vec<_> = discovery
        .endpoints()
        .into_iter()
        .map(|e| e.display_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Nursery", "Nursery (2)"]);
}

#[test]
fn test_manual_connect_without_advertisement() {
    let (alert, alerts) = counting_alert();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = ListenSession::start(
        &TransportClient::default(),
        SessionEndpoint::manual("127.0.0.1", port as u32).unwrap(),
        NullPlayback::new(),
        alert,
        VolumeHistory::new(4),
        2 * FRAME,
    );
    assert!(matches!(result, Err(Error::Connect(ConnectError::Refused(_)))));
    assert_eq!(alerts.load(Ordering::SeqCst), 0);
}
