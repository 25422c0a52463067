//! Side channel listener over a real UDP socket.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use diamond_controller::config::SideChannelConfig;
use diamond_controller::controller::ControllerEvent;
use diamond_controller::side_channel::{FlowNotification, FlowState, SideChannelListener};
use diamond_controller::topology::{Topology, TopologyConfig};
use diamond_controller::types::FlowKey;

const LOCAL: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const PEER: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// Diamond whose hosts are loopback addresses, so a test socket is a valid sender.
fn loopback_topology() -> Arc<Topology> {
    let mut config = TopologyConfig::diamond(1);
    config.switches[0].hosts = vec![LOCAL];
    config.switches[3].hosts = vec![PEER];
    Arc::new(config.build().unwrap())
}

async fn start() -> (
    std::net::SocketAddr,
    mpsc::Receiver<ControllerEvent>,
    broadcast::Sender<()>,
    Arc<diamond_controller::side_channel::SideChannelStats>,
) {
    let config = SideChannelConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        max_datagram: 512,
    };
    let (events_tx, events_rx) = mpsc::channel(16);
    let listener = SideChannelListener::bind(&config, loopback_topology(), events_tx)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = listener.stats();
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(listener.run(shutdown.subscribe()));
    (addr, events_rx, shutdown, stats)
}

#[tokio::test]
async fn test_open_and_close_reach_the_event_stream() {
    let (addr, mut events, shutdown, stats) = start().await;
    let client = UdpSocket::bind((LOCAL, 0)).await.unwrap();

    let open = FlowNotification::new(IpAddr::V4(PEER), FlowState::Open, "t1").with_ports(40000, 5001);
    client.send_to(&open.encode(), addr).await.unwrap();

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    match event {
        ControllerEvent::FlowStarted { key, endpoints } => {
            assert_eq!(key, FlowKey::new(LOCAL, PEER, "t1"));
            let ends = endpoints.unwrap();
            assert_eq!((ends.client, ends.client_port), (LOCAL, 40000));
            assert_eq!((ends.server, ends.server_port), (PEER, 5001));
        }
        other => panic!("unexpected event {other:?}"),
    }

    client
        .send_to(br#"{"dest": "127.0.0.2", "state": "close", "token": "t1"}"#, addr)
        .await
        .unwrap();
    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ControllerEvent::FlowEnded { key } if key == FlowKey::new(PEER, LOCAL, "t1")));

    assert_eq!(stats.accepted.load(Ordering::Relaxed), 2);
    let _ = shutdown.send(());
}

#[tokio::test]
async fn test_invalid_datagrams_are_dropped() {
    let (addr, mut events, shutdown, stats) = start().await;
    let client = UdpSocket::bind((LOCAL, 0)).await.unwrap();

    client.send_to(b"garbage", addr).await.unwrap();
    client
        .send_to(br#"{"dest": "10.9.9.9", "state": "open"}"#, addr)
        .await
        .unwrap();
    client.send_to(&[b' '; 600], addr).await.unwrap();
    // A valid one last, so its arrival proves the others were processed first.
    client
        .send_to(br#"{"dest": "127.0.0.2", "state": "open"}"#, addr)
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, ControllerEvent::FlowStarted { endpoints: None, .. }));
    assert_eq!(stats.received.load(Ordering::Relaxed), 4);
    assert_eq!(stats.dropped.load(Ordering::Relaxed), 3);
    assert!(events.try_recv().is_err());

    let _ = shutdown.send(());
}
