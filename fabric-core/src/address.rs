//! Address representation (spec.md §3/§4.D, §6 "Address formats").
//!
//! A tagged union over the wire-shaped variants libfabric exposes. Each
//! variant is trivially serializable (`to_wire`/`from_wire`) for transfer
//! through an out-of-band rendezvous channel, matching the provider's own
//! `sockaddr`-shaped wire format.

use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFormat {
    Unspecified,
    Inet,
    Inet6,
    Infiniband,
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    Unspecified,
    Ipv4 { octets: [u8; 4], port: u16 },
    Ipv6 { segments: [u16; 8], port: u16 },
    Infiniband { gid: [u8; 16], qpn: u32, lid: u16 },
    Ethernet { mac: [u8; 6] },
}

impl Address {
    pub fn format(&self) -> AddressFormat {
        match self {
            Address::Unspecified => AddressFormat::Unspecified,
            Address::Ipv4 { .. } => AddressFormat::Inet,
            Address::Ipv6 { .. } => AddressFormat::Inet6,
            Address::Infiniband { .. } => AddressFormat::Infiniband,
            Address::Ethernet { .. } => AddressFormat::Ethernet,
        }
    }

    /// Port, when the variant carries one.
    pub fn port(&self) -> Option<u16> {
        match self {
            Address::Ipv4 { port, .. } | Address::Ipv6 { port, .. } => Some(*port),
            _ => None,
        }
    }

    /// Bitwise-serialize this address into its wire representation.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Address::Unspecified => Vec::new(),
            Address::Ipv4 { octets, port } => {
                let mut out = Vec::with_capacity(6);
                out.extend_from_slice(octets);
                out.extend_from_slice(&port.to_be_bytes());
                out
            }
            Address::Ipv6 { segments, port } => {
                let mut out = Vec::with_capacity(18);
                for seg in segments {
                    out.extend_from_slice(&seg.to_be_bytes());
                }
                out.extend_from_slice(&port.to_be_bytes());
                out
            }
            Address::Infiniband { gid, qpn, lid } => {
                let mut out = Vec::with_capacity(22);
                out.extend_from_slice(gid);
                out.extend_from_slice(&qpn.to_be_bytes());
                out.extend_from_slice(&lid.to_be_bytes());
                out
            }
            Address::Ethernet { mac } => mac.to_vec(),
        }
    }

    /// Parse `{data, len, format}` into a typed [`Address`]; rejects
    /// truncated buffers and returns [`Address::Unspecified`] only for a
    /// genuinely empty/unspecified-format input (spec.md §6).
    pub fn from_wire(data: &[u8], format: AddressFormat) -> crate::error::Result<Self> {
        match format {
            AddressFormat::Unspecified => Ok(Address::Unspecified),
            AddressFormat::Inet => {
                if data.len() < 6 {
                    return Err(truncated("inet"));
                }
                let octets = [data[0], data[1], data[2], data[3]];
                let port = u16::from_be_bytes([data[4], data[5]]);
                Ok(Address::Ipv4 { octets, port })
            }
            AddressFormat::Inet6 => {
                if data.len() < 18 {
                    return Err(truncated("inet6"));
                }
                let mut segments = [0u16; 8];
                for (i, seg) in segments.iter_mut().enumerate() {
                    *seg = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
                }
                let port = u16::from_be_bytes([data[16], data[17]]);
                Ok(Address::Ipv6 { segments, port })
            }
            AddressFormat::Infiniband => {
                if data.len() < 22 {
                    return Err(truncated("ib"));
                }
                let mut gid = [0u8; 16];
                gid.copy_from_slice(&data[0..16]);
                let qpn = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
                let lid = u16::from_be_bytes([data[20], data[21]]);
                Ok(Address::Infiniband { gid, qpn, lid })
            }
            AddressFormat::Ethernet => {
                if data.len() < 6 {
                    return Err(truncated("ethernet"));
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&data[0..6]);
                Ok(Address::Ethernet { mac })
            }
        }
    }
}

fn truncated(format: &'static str) -> Error {
    Error::new(
        ErrorKind::InvalidArgument,
        format!("address buffer truncated for format {format}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn format_matches_variant_tag() {
        let a = Address::Ipv4 {
            octets: [127, 0, 0, 1],
            port: 9228,
        };
        assert_eq!(a.format(), AddressFormat::Inet);
        assert_eq!(a.port(), Some(9228));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let err = Address::from_wire(&[1, 2, 3], AddressFormat::Inet).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    proptest! {
        #[test]
        fn ipv4_roundtrips(a in any::<[u8;4]>(), port in any::<u16>()) {
            let addr = Address::Ipv4 { octets: a, port };
            let wire = addr.to_wire();
            let back = Address::from_wire(&wire, AddressFormat::Inet).unwrap();
            prop_assert_eq!(addr, back);
            prop_assert_eq!(back.format(), AddressFormat::Inet);
        }

        #[test]
        fn ib_roundtrips(gid in any::<[u8;16]>(), qpn in any::<u32>(), lid in any::<u16>()) {
            let addr = Address::Infiniband { gid, qpn, lid };
            let wire = addr.to_wire();
            let back = Address::from_wire(&wire, AddressFormat::Infiniband).unwrap();
            prop_assert_eq!(addr, back);
        }
    }
}
