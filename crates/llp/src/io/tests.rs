//! Tests for transport implementations

use super::*;

#[test]
fn test_socket_transport_implements_trait() {
    // Compile-time verification that SocketTransport implements DatagramTransport
    fn _assert_impl<T: DatagramTransport>() {}
    _assert_impl::<SocketTransport>();
}

#[test]
fn test_memory_transport_implements_trait() {
    // Compile-time verification that InMemoryTransport implements DatagramTransport
    fn _assert_impl<T: DatagramTransport>() {}
    _assert_impl::<InMemoryTransport>();
}

#[test]
fn test_transport_is_object_safe() {
    let (transport, _peer) = InMemoryTransport::bind(SocketAddrV4::new(
        std::net::Ipv4Addr::LOCALHOST,
        1,
    ));
    let boxed: Box<dyn DatagramTransport> = Box::new(transport);
    assert_eq!(boxed.local_addr().port(), 1);
}

#[test]
fn test_descriptor_display() {
    assert_eq!(Descriptor(7).to_string(), "fd7");
}
