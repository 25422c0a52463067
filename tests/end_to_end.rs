//! Full controller against fake switches over real sockets.
//!
//! Two fake edge switches connect over TCP, complete the handshake and record
//! what the controller sends. A host then announces a flow over UDP and both
//! edges must receive the pin for the chosen rail.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use diamond_controller::config::Config;
use diamond_controller::protocol::{
    EthernetFrame, FeaturesReply, FlowMod, FlowModCommand, OfMatch, OfMessage, OpenFlowCodec, PacketIn, PhyPort,
};
use diamond_controller::router::priority;
use diamond_controller::server::ControllerService;
use diamond_controller::topology::TopologyConfig;
use diamond_controller::types::{DatapathId, MacAddr};

const LOCAL: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const PEER: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

fn config() -> Config {
    let mut topology = TopologyConfig::diamond(1);
    topology.switches[0].hosts = vec![LOCAL];
    topology.switches[3].hosts = vec![PEER];

    let mut config = Config {
        topology,
        ..Default::default()
    };
    config.controller.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.controller.echo_interval = Duration::from_secs(60);
    config.controller.stats_interval = Duration::ZERO;
    config.side_channel.listen_addr = "127.0.0.1:0".parse().unwrap();
    config
}

struct FakeSwitch {
    framed: Framed<TcpStream, OpenFlowCodec>,
}

impl FakeSwitch {
    /// Connect and answer the handshake as `dpid`, reporting ports 1-3.
    async fn connect(addr: SocketAddr, dpid: u64) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, OpenFlowCodec::new());

        let mut saw_hello = false;
        loop {
            let (xid, message) = next(&mut framed).await;
            match message {
                OfMessage::Hello => saw_hello = true,
                OfMessage::FeaturesRequest => {
                    assert!(saw_hello, "features request before hello");
                    framed.send((0, OfMessage::Hello)).await.unwrap();
                    let ports = (1..=3)
                        .map(|p| PhyPort::new(p, MacAddr([0x02, 0, 0, 0, dpid as u8, p as u8]), format!("eth{p}")))
                        .collect();
                    let reply = FeaturesReply {
                        datapath_id: DatapathId(dpid),
                        n_buffers: 256,
                        n_tables: 1,
                        capabilities: 0,
                        actions: 1,
                        ports,
                    };
                    framed.send((xid, OfMessage::FeaturesReply(reply))).await.unwrap();
                    return Self { framed };
                }
                other => panic!("unexpected message during handshake: {other:?}"),
            }
        }
    }

    /// Next flow mod, skipping everything else.
    async fn next_flow_mod(&mut self) -> FlowMod {
        loop {
            if let (_, OfMessage::FlowMod(flow_mod)) = next(&mut self.framed).await {
                return flow_mod;
            }
        }
    }

    /// Skip to the first flow mod at `priority`.
    async fn flow_mod_at(&mut self, priority: u16) -> FlowMod {
        loop {
            let flow_mod = self.next_flow_mod().await;
            if flow_mod.priority == priority {
                return flow_mod;
            }
        }
    }
}

async fn next(framed: &mut Framed<TcpStream, OpenFlowCodec>) -> (u32, OfMessage) {
    timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("controller went quiet")
        .expect("controller closed the connection")
        .unwrap()
}

/// Poll until `condition` holds; the controller applies events on its own task.
async fn eventually(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_flow_is_pinned_on_both_edges() {
    let service = ControllerService::bind(&config()).await.unwrap();
    let openflow = service.openflow_addr().unwrap();
    let side_channel = service.side_channel_addr().unwrap();
    let balance = service.balance();
    let registry = service.registry();

    let (shutdown, _) = broadcast::channel(4);
    let running = tokio::spawn(service.run(shutdown.clone()));

    let mut s1 = FakeSwitch::connect(openflow, 1).await;
    let first = s1.next_flow_mod().await;
    assert_eq!(first.command, FlowModCommand::Delete);
    let catch_all = s1.flow_mod_at(priority::FLOOD_FORWARD_ALWAYS).await;
    assert_eq!(catch_all.out_ports()[1], 1);

    let mut s4 = FakeSwitch::connect(openflow, 4).await;
    assert_eq!(s4.next_flow_mod().await.command, FlowModCommand::Delete);

    eventually(|| registry.len() == 2).await;

    let host = UdpSocket::bind((LOCAL, 0)).await.unwrap();
    host.send_to(br#"{"dest": "127.0.0.2", "state": "open", "token": "e2e"}"#, side_channel)
        .await
        .unwrap();

    let pin = s1.flow_mod_at(priority::ROUTE_CONNECTION).await;
    assert_eq!(pin.command, FlowModCommand::Add);
    assert_eq!((pin.pattern.nw_src, pin.pattern.nw_dst), (Some(LOCAL), Some(PEER)));
    assert_eq!(pin.out_ports(), vec![1]);

    let pin = s4.flow_mod_at(priority::ROUTE_CONNECTION).await;
    assert_eq!((pin.pattern.nw_src, pin.pattern.nw_dst), (Some(PEER), Some(LOCAL)));
    assert_eq!(pin.out_ports(), vec![2]);

    eventually(|| {
        let snapshot = *balance.read();
        (snapshot.top, snapshot.bottom, snapshot.active) == (1, 0, 1)
    })
    .await;

    host.send_to(br#"{"dest": "127.0.0.2", "state": "close", "token": "e2e"}"#, side_channel)
        .await
        .unwrap();
    let removal = s1.flow_mod_at(priority::ROUTE_CONNECTION).await;
    assert_eq!(removal.command, FlowModCommand::DeleteStrict);
    eventually(|| balance.read().active == 0).await;

    let _ = shutdown.send(());
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_disconnect_unregisters_switch() {
    let service = ControllerService::bind(&config()).await.unwrap();
    let openflow = service.openflow_addr().unwrap();
    let registry = service.registry();

    let (shutdown, _) = broadcast::channel(4);
    let running = tokio::spawn(service.run(shutdown.clone()));

    let mut s2 = FakeSwitch::connect(openflow, 2).await;
    assert_eq!(s2.next_flow_mod().await.command, FlowModCommand::Delete);
    assert!(registry.is_connected(DatapathId(2)));

    drop(s2);
    eventually(|| !registry.is_connected(DatapathId(2))).await;

    let _ = shutdown.send(());
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_truncated_message_does_not_drop_the_session() {
    let service = ControllerService::bind(&config()).await.unwrap();
    let openflow = service.openflow_addr().unwrap();
    let registry = service.registry();

    let (shutdown, _) = broadcast::channel(4);
    let running = tokio::spawn(service.run(shutdown.clone()));

    let mut s1 = FakeSwitch::connect(openflow, 1).await;
    s1.flow_mod_at(priority::BROADCAST_FROM_OTHER).await;

    // PACKET_IN header announcing a 2-byte body.
    s1.framed
        .get_mut()
        .write_all(&[0x01, 10, 0, 10, 0, 0, 0, 9, 0xaa, 0xbb])
        .await
        .unwrap();

    let host_mac = MacAddr([0x02, 0, 0, 0, 0, 0x42]);
    let data = EthernetFrame::build_tcp(host_mac, MacAddr([0x02, 0, 0, 0, 0, 0x43]), LOCAL, PEER, 40000, 80);
    s1.framed
        .send((10, OfMessage::PacketIn(PacketIn::new(3, data))))
        .await
        .unwrap();

    let learned = s1.flow_mod_at(priority::SEND_TO_MAC).await;
    assert_eq!(learned.pattern, OfMatch::any().dl_dst(host_mac));
    assert_eq!(learned.out_ports(), vec![3]);
    assert!(registry.is_connected(DatapathId(1)));

    let _ = shutdown.send(());
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
}
