//! Serialization and deserialization of network packets.
//!
//! The `repr` module provides abstractions for serializing and deserializing
//! packets and frames at different network layers to/from byte buffers.

pub mod arp;
pub mod dhcp;
pub mod ethernet;
pub mod icmpv4;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;

pub use self::arp::{
    hw_types as arp_hw_types,
    ops as arp_ops,
    proto_types as arp_proto_types,
    Packet as ArpPacket,
    Repr as ArpRepr,
};
pub use self::dhcp::{
    msg_types as dhcp_msg_types,
    op_codes as dhcp_op_codes,
    opts as dhcp_opts,
    ports as dhcp_ports,
    DhcpOptions,
    OptionWriter as DhcpOptionWriter,
    Packet as DhcpPacket,
};
pub use self::ethernet::{
    eth_types,
    Address as EthernetAddress,
    Frame as EthernetFrame,
};
pub use self::icmpv4::{
    Packet as Icmpv4Packet,
    Repr as Icmpv4Repr,
};
pub use self::icmpv6::{
    msg_types as icmpv6_msg_types,
    na_flags,
    opt_types as ndp_opt_types,
    NdpOption,
    Packet as Icmpv6Packet,
};
pub use self::ipv4::{
    flags as ipv4_flags,
    protocols as ipv4_protocols,
    Address as Ipv4Address,
    AddressCidr as Ipv4AddressCidr,
    Packet as Ipv4Packet,
    Repr as Ipv4Repr,
};
pub use self::ipv6::{
    next_headers as ipv6_next_headers,
    Address as Ipv6Address,
    Packet as Ipv6Packet,
    Repr as Ipv6Repr,
};
pub use self::tcp::{
    flags as tcp_flags,
    Packet as TcpPacket,
    Repr as TcpRepr,
};
pub use self::udp::{
    Packet as UdpPacket,
    Repr as UdpRepr,
};
