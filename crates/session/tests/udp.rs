use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tether::{MessageOptions, Session, SessionConfig, SessionEvent, SessionState};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn config(network_id: &str, port: u16) -> SessionConfig {
    SessionConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        port_range: 10,
        network_id: network_id.to_string(),
        ..Default::default()
    }
}

fn session(config: SessionConfig) -> Session {
    let mut session = Session::new(config).unwrap();
    session
        .register_message_type("chat", MessageOptions::REQUIRES_CONNECTION, None)
        .unwrap();
    session
}

fn pump_until(
    sessions: &mut [&mut Session],
    timeout_ms: u64,
    done: impl Fn(&[&mut Session]) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        for session in sessions.iter_mut() {
            session.update();
        }
        if done(sessions) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_udp_handshake_and_chat() {
    let port = next_port();
    let mut host = session(config("udp-host", port));
    let mut client = session(config("udp-client", port));

    host.host().unwrap();
    let host_addr: SocketAddr = host.local_addr().unwrap();
    client.join(host_addr).unwrap();

    let ready = pump_until(&mut [&mut client, &mut host], 3000, |sessions| {
        sessions
            .iter()
            .all(|session| session.state() == SessionState::Ready)
    });
    assert!(ready, "handshake over UDP did not complete");
    let index = client.my_connection_index().unwrap();
    assert_eq!(host.connection(index).unwrap().network_id(), "udp-client");

    let mut chat = client.message("chat");
    chat.write_string("over the wire").unwrap();
    client.send_to_host(chat).unwrap();

    let delivered = pump_until(&mut [&mut client, &mut host], 3000, |sessions| {
        sessions[1]
            .connection(index)
            .is_some_and(|connection| connection.pending_received() > 0)
    });
    assert!(delivered);
    let mut received = host.receive(index).unwrap();
    assert_eq!(received.read_string().unwrap(), "over the wire");

    client.disconnect();
    let left = pump_until(&mut [&mut host], 3000, |sessions| {
        sessions[0].connection(index).is_none()
    });
    assert!(left);
}

#[test]
fn test_udp_ping_roundtrip() {
    let port = next_port();
    let mut host = session(config("udp-host", port));
    let mut prober = session(config("udp-prober", port));
    host.host().unwrap();
    prober.bind().unwrap();

    prober.ping(host.local_addr().unwrap(), &[1, 2, 3]).unwrap();

    let start = Instant::now();
    let mut pong = None;
    while pong.is_none() && start.elapsed() < Duration::from_secs(3) {
        host.update();
        prober.update();
        pong = prober.drain_events().find_map(|event| match event {
            SessionEvent::Pong { payload, .. } => Some(payload),
            _ => None,
        });
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(pong, Some(vec![1, 2, 3]));
}
