//! End-to-end tests over loopback UDP sockets driven by the `mio` reactor

use std::io::IsTerminal;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use llp::reactor::PollReactor;
use llp::testing::RecordingEngine;
use llp::{LlpAdapter, LlpConfig, LlpError, LocalAddr};
use tracing_subscriber::EnvFilter;

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

const TICK: Duration = Duration::from_millis(100);
const MAX_TURNS: usize = 50;

struct Fixture {
    adapter: LlpAdapter,
    reactor: Arc<PollReactor>,
    engine: Arc<RecordingEngine>,
    peer: UdpSocket,
}

impl Fixture {
    fn new(config: &LlpConfig) -> Result<Self> {
        let reactor = Arc::new(PollReactor::new().wrap_err("creating reactor")?);
        let engine = Arc::new(RecordingEngine::default());
        let local: LocalAddr = "127.0.0.1".parse()?;
        let adapter = LlpAdapter::initialize(engine.clone(), local, reactor.clone(), config)
            .wrap_err("initializing adapter")?;
        let peer = UdpSocket::bind("127.0.0.1:0").wrap_err("binding test peer")?;
        peer.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(Self {
            adapter,
            reactor,
            engine,
            peer,
        })
    }

    fn peer_addr(&self) -> Result<SocketAddrV4> {
        match self.peer.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            other => eyre::bail!("unexpected peer address {other}"),
        }
    }

    /// Turn the reactor until the adapter has received `n` datagrams.
    fn turn_until_received(&self, n: u64) -> Result<()> {
        for _ in 0..MAX_TURNS {
            if self.adapter.stats().datagrams_received >= n {
                return Ok(());
            }
            self.reactor.turn(Some(TICK))?;
        }
        eyre::bail!(
            "only {} of {n} datagrams received",
            self.adapter.stats().datagrams_received
        )
    }
}

#[test]
fn hello_from_peer_reaches_engine() -> Result<()> {
    let f = Fixture::new(&LlpConfig::datagram(0))?;

    f.peer.send_to(b"hello", f.adapter.local_addr())?;
    f.turn_until_received(1)?;

    assert_eq!(f.engine.received(), vec![b"hello".to_vec()]);
    assert_eq!(f.adapter.stats().bytes_received, 5);
    Ok(())
}

#[test]
fn oversized_datagram_is_truncated_to_capacity() -> Result<()> {
    let f = Fixture::new(&LlpConfig::datagram(0))?;
    let payload: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();

    f.peer.send_to(&payload, f.adapter.local_addr())?;
    f.turn_until_received(1)?;

    let received = f.engine.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 4096);
    assert_eq!(received[0], payload[..4096]);
    assert_eq!(f.adapter.stats().datagrams_truncated, 1);
    Ok(())
}

#[test]
fn queued_datagrams_are_delivered_one_per_notification_in_order() -> Result<()> {
    let f = Fixture::new(&LlpConfig::datagram(0))?;

    for payload in [&b"first"[..], b"second", b"third"] {
        f.peer.send_to(payload, f.adapter.local_addr())?;
    }
    f.turn_until_received(3)?;

    assert_eq!(
        f.engine.received(),
        vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
    Ok(())
}

#[test]
fn data_request_reaches_peer() -> Result<()> {
    let f = Fixture::new(&LlpConfig::datagram(0))?;
    let peer = f.peer_addr()?;

    let sent = f
        .adapter
        .data_request(b"ping", u32::from(*peer.ip()), peer.port())?;
    assert_eq!(sent, 4);

    let mut buf = [0u8; 64];
    let (len, from) = f.peer.recv_from(&mut buf).wrap_err("waiting for datagram")?;
    assert_eq!(&buf[..len], b"ping");
    assert_eq!(from, SocketAddr::V4(f.adapter.local_addr()));
    Ok(())
}

#[test]
fn destroy_unsubscribes_from_reactor() -> Result<()> {
    let f = Fixture::new(&LlpConfig::datagram(0))?;
    assert_eq!(f.reactor.subscription_count(), 1);

    f.adapter.destroy()?;

    assert_eq!(f.reactor.subscription_count(), 0);
    let err = f.adapter.data_request(b"x", 0x7F00_0001, 9).unwrap_err();
    assert!(err.is_closed());
    assert_eq!(f.reactor.turn(Some(Duration::from_millis(10)))?, 0);
    Ok(())
}

#[test]
fn configured_port_is_used() -> Result<()> {
    let probe = UdpSocket::bind("127.0.0.1:0")?;
    let port = probe.local_addr()?.port();
    drop(probe);

    let f = Fixture::new(&LlpConfig::datagram(port))?;

    assert_eq!(
        f.adapter.local_addr(),
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    );
    Ok(())
}

#[test]
fn unavailable_local_address_fails_fast() {
    let reactor = Arc::new(PollReactor::new().unwrap());

    // TEST-NET-1 is never assigned to a local interface
    let err = LlpAdapter::initialize(
        Arc::new(RecordingEngine::default()),
        Ipv4Addr::new(192, 0, 2, 1),
        reactor.clone(),
        &LlpConfig::datagram(0),
    )
    .unwrap_err();

    assert!(matches!(err, LlpError::Bind { .. }), "{err:?}");
    assert!(err.is_fatal());
    assert_eq!(reactor.subscription_count(), 0);
}

#[test]
fn port_in_use_fails_fast() -> Result<()> {
    let first = Fixture::new(&LlpConfig::datagram(0))?;
    let port = first.adapter.local_addr().port();

    let err = LlpAdapter::initialize(
        Arc::new(RecordingEngine::default()),
        [127, 0, 0, 1],
        first.reactor.clone(),
        &LlpConfig::datagram(port),
    )
    .unwrap_err();

    assert!(matches!(err, LlpError::Bind { .. }), "{err:?}");
    assert_eq!(first.reactor.subscription_count(), 1);
    Ok(())
}
