use custom_dv::command;
use custom_dv::config::NodeConfig;
use custom_dv::control_server::{ControlCommand, ControlResponse, ControlServer, RouteSummary};
use custom_dv::error::{NodeError, OperatorError};
use custom_dv::protocol::{AdvertisedCost, Advertisement, Cost, Node, PeerEntry, UpdatePacket};
use custom_dv::topology::Topology;
use custom_dv::PeerId;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

fn quiet_config() -> NodeConfig {
    NodeConfig {
        update_interval_secs: 3600,
        ..NodeConfig::default()
    }
}

async fn bind_local() -> (UdpSocket, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

fn topology_text(ports: &[u16], links: &[(PeerId, PeerId, u32)]) -> String {
    let mut text = format!("{}\n{}\n", ports.len(), links.len());
    for (index, port) in ports.iter().enumerate() {
        text.push_str(&format!("{} 127.0.0.1 {}\n", index + 1, port));
    }
    for (local, neighbor, cost) in links {
        text.push_str(&format!("{} {} {}\n", local, neighbor, cost));
    }
    text
}

fn node_for(socket: UdpSocket, ports: &[u16], links: &[(PeerId, PeerId, u32)]) -> Arc<Node> {
    let topology: Topology = topology_text(ports, links).parse().unwrap();
    let local_id = topology.local_id(None, None).unwrap();
    let table = topology.build_table(local_id).unwrap();
    Arc::new(Node::with_socket(table, socket, quiet_config()))
}

async fn entry(node: &Node, id: PeerId) -> PeerEntry {
    node.snapshot()
        .await
        .unwrap()
        .into_iter()
        .find(|entry| entry.id == id)
        .unwrap()
}

/// Polls until `id`'s cost on `node` equals `expected`.
async fn wait_for_cost(node: &Node, id: PeerId, expected: Cost) -> PeerEntry {
    for _ in 0..200 {
        let current = entry(node, id).await;
        if current.cost() == expected {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server {} never reached cost {}", id, expected);
}

/// Three servers in a line: 1 -(1)- 2 -(1)- 3.
async fn line_of_three() -> (Arc<Node>, Arc<Node>, Arc<Node>) {
    let (sa, pa) = bind_local().await;
    let (sb, pb) = bind_local().await;
    let (sc, pc) = bind_local().await;
    let ports = [pa, pb, pc];

    let a = node_for(sa, &ports, &[(1, 2, 1)]);
    let b = node_for(sb, &ports, &[(2, 1, 1), (2, 3, 1)]);
    let c = node_for(sc, &ports, &[(3, 2, 1)]);
    for node in [&a, &b, &c] {
        node.start().await.unwrap();
    }
    (a, b, c)
}

#[tokio::test]
async fn routes_propagate_through_middle_server() {
    let (a, b, c) = line_of_three().await;

    b.step().await.unwrap();

    let three = wait_for_cost(&a, 3, Cost::Finite(2)).await;
    assert_eq!(three.next_hop(), Some(2));
    let one = wait_for_cost(&c, 1, Cost::Finite(2)).await;
    assert_eq!(one.next_hop(), Some(2));

    let display = a.display().await.unwrap();
    assert!(display.contains("3\t2\t2"), "{}", display);
}

#[tokio::test]
async fn disable_drops_link_and_dependent_routes() {
    let (a, b, _c) = line_of_three().await;

    b.step().await.unwrap();
    wait_for_cost(&a, 3, Cost::Finite(2)).await;

    a.disable_link(2).await.unwrap();
    let two = entry(&a, 2).await;
    assert_eq!(two.cost(), Cost::Infinite);
    assert!(two.is_admin_down());
    assert_eq!(entry(&a, 3).await.cost(), Cost::Infinite);

    b.step().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(entry(&a, 2).await.cost(), Cost::Infinite);

    let err = a.disable_link(2).await.unwrap_err();
    assert!(matches!(err, NodeError::Operator(OperatorError::AlreadyDisabled(2))));
}

#[tokio::test]
async fn infinite_update_withdraws_link_on_both_sides() {
    let (a, b, _c) = line_of_three().await;

    a.update_link(1, 2, Cost::Infinite).await.unwrap();
    assert_eq!(entry(&a, 2).await.cost(), Cost::Infinite);

    let one = wait_for_cost(&b, 1, Cost::Infinite).await;
    assert_eq!(one.direct_link_cost(), Cost::Infinite);
    assert_eq!(one.next_hop(), None);

    a.update_link(1, 2, Cost::Finite(4)).await.unwrap();
    let two = entry(&a, 2).await;
    assert_eq!(two.cost(), Cost::Finite(4));
    assert!(!two.is_admin_down());
}

#[tokio::test]
async fn packets_are_counted_and_reset() {
    let (sa, pa) = bind_local().await;
    let (peer, peer_port) = bind_local().await;
    let node = node_for(sa, &[pa, peer_port], &[(1, 2, 3)]);
    node.start().await.unwrap();

    let packet = UpdatePacket {
        sender_port: peer_port,
        sender_address: Ipv4Addr::LOCALHOST,
        advertisements: vec![
            Advertisement {
                address: Ipv4Addr::LOCALHOST,
                port: pa,
                id: 1,
                cost: AdvertisedCost::Finite(3),
            },
            Advertisement {
                address: Ipv4Addr::LOCALHOST,
                port: peer_port,
                id: 2,
                cost: AdvertisedCost::Finite(0),
            },
        ],
    };
    let bytes = packet.encode().unwrap();
    peer.send_to(&bytes, ("127.0.0.1", pa)).await.unwrap();
    peer.send_to(&bytes, ("127.0.0.1", pa)).await.unwrap();
    peer.send_to(&[0u8; 3], ("127.0.0.1", pa)).await.unwrap();

    let mut total = 0;
    for _ in 0..200 {
        total += node.take_packet_count().await.unwrap();
        if total >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(total, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(node.take_packet_count().await.unwrap(), 0);
}

#[tokio::test]
async fn crash_is_final() {
    let (a, _b, _c) = line_of_three().await;
    assert!(a.is_running());

    a.crash().await.unwrap();
    assert!(!a.is_running());
    assert!(a.has_crashed());

    assert!(matches!(a.crash().await, Err(NodeError::AlreadyCrashed)));
    assert!(matches!(a.display().await, Err(NodeError::AlreadyCrashed)));
    assert!(matches!(a.step().await, Err(NodeError::AlreadyCrashed)));
}

#[tokio::test]
async fn crashed_node_neither_accepts_nor_sends_updates() {
    let (sa, pa) = bind_local().await;
    let (peer, peer_port) = bind_local().await;
    let (_far, far_port) = bind_local().await;
    let config = NodeConfig {
        update_interval_secs: 1,
        ..NodeConfig::default()
    };
    let topology: Topology = topology_text(&[pa, peer_port, far_port], &[(1, 2, 3)])
        .parse()
        .unwrap();
    let node = Node::with_socket(topology.build_table(1).unwrap(), sa, config);
    node.start().await.unwrap();

    // the first scheduler tick goes out right away
    let mut buf = [0u8; 512];
    tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    node.crash().await.unwrap();
    while peer.try_recv_from(&mut buf).is_ok() {}

    let before: Vec<PeerEntry> = node.table().lock().await.iter().cloned().collect();

    let advertise = |id: PeerId, port: u16, cost: u32| Advertisement {
        address: Ipv4Addr::LOCALHOST,
        port,
        id,
        cost: AdvertisedCost::Finite(cost),
    };
    let packet = UpdatePacket {
        sender_port: peer_port,
        sender_address: Ipv4Addr::LOCALHOST,
        advertisements: vec![
            advertise(1, pa, 1),
            advertise(2, peer_port, 0),
            advertise(3, far_port, 1),
        ],
    };
    peer.send_to(&packet.encode().unwrap(), ("127.0.0.1", pa))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_millis(1500), peer.recv_from(&mut buf)).await;
    assert!(received.is_err(), "crashed node still sends updates");

    let table = node.table().lock().await;
    assert_eq!(table.packets_received(), 0);
    assert_eq!(table.get(2).unwrap().cost(), Cost::Finite(3));
    assert_eq!(table.get(3).unwrap().cost(), Cost::Infinite);
    let after: Vec<PeerEntry> = table.iter().cloned().collect();
    assert_eq!(after, before);
}

#[tokio::test]
async fn shell_lines_render_responses() {
    let (a, _b, _c) = line_of_three().await;

    let display = command::run_line(&a, "display").await.unwrap();
    assert!(display.starts_with("display SUCCESS\nRouting Table:"), "{}", display);

    assert_eq!(
        command::run_line(&a, "update 1 3 4").await.unwrap(),
        "update Server 3 is not a neighbor"
    );
    assert_eq!(command::run_line(&a, "update 1 2 5").await.unwrap(), "update SUCCESS");
    assert_eq!(command::run_line(&a, "bogus").await.unwrap(), "bogus Unknown command: bogus");
    assert!(command::run_line(&a, "   ").await.is_none());

    assert_eq!(command::run_line(&a, "crash").await.unwrap(), "crash SUCCESS");
    assert_eq!(
        command::run_line(&a, "crash").await.unwrap(),
        "crash Server has already crashed"
    );
}

#[tokio::test]
async fn control_server_speaks_json_lines() {
    let (a, _b, _c) = line_of_three().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ControlServer::new(addr.port(), a.clone());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let request = |command: &str, args: &[&str]| {
        let request = ControlCommand {
            command: command.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        };
        format!("{}\n", serde_json::to_string(&request).unwrap())
    };

    writer.write_all(request("display", &[]).as_bytes()).await.unwrap();
    let response: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(response.success);
    let routes: Vec<RouteSummary> = serde_json::from_value(response.data.unwrap()).unwrap();
    assert_eq!(routes.len(), 3);
    assert_eq!(routes[0].cost, Some(0));
    assert_eq!(routes[1].next_hop, Some(2));
    assert_eq!(routes[1].direct_link_cost, Some(1));

    writer.write_all(request("disable", &["3"]).as_bytes()).await.unwrap();
    let response: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(!response.success);
    assert_eq!(response.message, "disable Server 3 is not a neighbor");

    writer.write_all(b"not json\n").await.unwrap();
    let response: ControlResponse = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(!response.success);
    assert!(response.message.starts_with("Invalid JSON command"));
}
