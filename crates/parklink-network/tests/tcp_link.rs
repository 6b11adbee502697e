//! TCP links against real loopback sockets.

use std::net::SocketAddr;
use std::time::Duration;

use parklink_core::{BarrierState, StationId};
use parklink_network::{
    AnyConnector, Connector, FrameWriter, LinkConfig, LinkEvent, LinkRegistry, LinkState,
    StationLink, TcpConnector, TcpConnectorConfig, TransportError,
};
use parklink_protocol::{Button, Command, Message, OutboundFrame};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(3);

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn read_line(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.lines.next_line())
            .await
            .ok()
            .and_then(|line| line.ok())
            .flatten()
    }

    async fn write_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }
}

fn station() -> StationId {
    StationId::new(1).unwrap()
}

fn link_config() -> LinkConfig {
    LinkConfig {
        connect_attempts: 1,
        retry_delay: Duration::from_millis(10),
        reconnect_interval: Duration::from_millis(100),
    }
}

async fn bound_connector() -> (TcpConnector, SocketAddr) {
    let config = TcpConnectorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        accept_timeout: Duration::from_secs(2),
        ..TcpConnectorConfig::default()
    };
    let mut connector = TcpConnector::new(station(), config);
    let addr = connector.bind().await.unwrap();
    (connector, addr)
}

async fn registry_with_listener() -> (LinkRegistry, mpsc::Receiver<LinkEvent>, SocketAddr) {
    let (connector, addr) = bound_connector().await;

    let registry = LinkRegistry::new(link_config());
    let events = registry
        .register(station(), AnyConnector::Tcp(connector))
        .unwrap();
    (registry, events, addr)
}

async fn next_event(events: &mut mpsc::Receiver<LinkEvent>) -> Option<LinkEvent> {
    tokio::time::timeout(WAIT, events.recv()).await.ok().flatten()
}

#[tokio::test]
async fn test_station_round_trip() {
    let (registry, mut events, addr) = registry_with_listener().await;

    let (connected, mut client) = tokio::join!(registry.start_all(), Client::connect(addr));
    assert_eq!(connected, 1);
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Connected(station())));

    assert_eq!(
        client.read_line().await.as_deref(),
        Some(r#"{"type":"welcome","status":"connected","message":"Connection established","parking_id":1}"#)
    );

    // Cross-talk and garbage never reach the consumer.
    client
        .write_raw("{\"type\":\"button_press\",\"button\":\"exit\",\"parking_id\":2}\n")
        .await;
    client.write_raw("boot banner v1.2\n").await;
    client
        .write_raw("noise{\"type\":\"button_press\",\"button\":\"enter\",\"parking_id\":1}\n")
        .await;

    assert_eq!(
        next_event(&mut events).await,
        Some(LinkEvent::Message(
            station(),
            Message::ButtonPress {
                button: Button::Enter
            }
        ))
    );

    registry
        .send(station(), Command::barrier(BarrierState::Open))
        .await
        .unwrap();
    assert_eq!(
        client.read_line().await.as_deref(),
        Some(r#"{"type":"barrier_control","state":"open","parking_id":1}"#)
    );

    registry.stop_all().await;
}

#[tokio::test]
async fn test_new_client_displaces_old_one() {
    let (registry, mut events, addr) = registry_with_listener().await;

    let (_, mut first) = tokio::join!(registry.start_all(), Client::connect(addr));
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Connected(station())));
    assert!(first.read_line().await.is_some());

    let mut second = Client::connect(addr).await;
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Disconnected(station())));
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Connected(station())));

    let welcome = second.read_line().await.unwrap();
    assert!(welcome.contains(r#""type":"welcome""#));

    // The old session was shut down.
    assert_eq!(first.read_line().await, None);

    second
        .write_raw("{\"type\":\"sensor_update\",\"space1_occupied\":true,\"space2_occupied\":false,\"parking_id\":1}\n")
        .await;
    assert_eq!(
        next_event(&mut events).await,
        Some(LinkEvent::Message(
            station(),
            Message::SensorUpdate {
                space1_occupied: true,
                space2_occupied: false
            }
        ))
    );

    assert_eq!(registry.statuses()[&station()].sessions, 2);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_station_hangup_is_reported() {
    let (registry, mut events, addr) = registry_with_listener().await;

    let (_, client) = tokio::join!(registry.start_all(), Client::connect(addr));
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Connected(station())));

    drop(client);
    assert_eq!(next_event(&mut events).await, Some(LinkEvent::Disconnected(station())));
    assert!(!registry.is_connected(station()));

    registry.stop_all().await;
}

#[tokio::test]
async fn test_write_after_hangup_is_a_connection_error() {
    let (mut connector, addr) = bound_connector().await;

    let (session, client) = tokio::join!(connector.open(), Client::connect(addr));
    let mut session = session.unwrap();
    drop(client);

    let err = tokio::time::timeout(WAIT, async {
        loop {
            let frame = OutboundFrame::new(station(), Command::barrier(BarrierState::Closed));
            match session.writer.write_frame(frame).await {
                Ok(()) => tokio::time::sleep(Duration::from_millis(20)).await,
                Err(e) => break e,
            }
        }
    })
    .await
    .expect("write never failed");

    assert!(!matches!(err, TransportError::Codec(_)), "unexpected {err:?}");
}

#[tokio::test]
async fn test_failed_send_disconnects_link() {
    let (connector, addr) = bound_connector().await;
    let (link, _events) = StationLink::new(station(), AnyConnector::Tcp(connector), link_config());

    let (connected, client) = tokio::join!(link.connect(), Client::connect(addr));
    assert!(connected);
    assert_eq!(link.state(), LinkState::Connected);
    drop(client);

    let failed = tokio::time::timeout(WAIT, async {
        while link
            .send(Command::barrier(BarrierState::Open))
            .await
            .is_ok()
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(failed.is_ok(), "sends kept succeeding after hangup");
    assert_eq!(link.state(), LinkState::Disconnected);

    link.shutdown().await;
}
