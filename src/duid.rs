//! Client DUID derivation.
//!
//! The client identifies itself with a DUID-LL (RFC 8415 Section 11.4) whose
//! hardware type is EUI-64. Nodes that only expose a 48-bit MAC get the EUI-64
//! built by inserting `ff:fe` between the OUI and the NIC specific octets.

use std::fmt::Write;

use advmac::MacAddr6;

/// DUID based on link-layer address
pub const DUID_TYPE_LL: u16 = 3;
/// IANA hardware type for EUI-64
pub const HW_TYPE_EUI64: u16 = 27;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Duid {
    pub bytes: Vec<u8>,
}

impl Duid {
    pub fn from_eui64(eui64: [u8; 8]) -> Self {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&DUID_TYPE_LL.to_be_bytes());
        bytes.extend_from_slice(&HW_TYPE_EUI64.to_be_bytes());
        bytes.extend_from_slice(&eui64);
        Self { bytes }
    }

    pub fn from_mac(mac: MacAddr6) -> Self {
        Self::from_eui64(mac_to_eui64(mac))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_colon_string(&self) -> String {
        let mut s = String::with_capacity(self.bytes.len() * 3);
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                s.push(':');
            }
            write!(&mut s, "{:02x}", b).expect("writing to String");
        }
        s
    }
}

impl From<Vec<u8>> for Duid {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for Duid {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }
}

/// Expand a 48-bit MAC into an EUI-64 by inserting `ff:fe` in the middle.
pub fn mac_to_eui64(mac: MacAddr6) -> [u8; 8] {
    let m = mac.to_array();
    [m[0], m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_expands_to_eui64() {
        let mac = MacAddr6::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            mac_to_eui64(mac),
            [0x00, 0x11, 0x22, 0xff, 0xfe, 0x33, 0x44, 0x55]
        );
    }

    #[test]
    fn duid_ll_layout() {
        let duid = Duid::from_eui64([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(duid.bytes, vec![0, 3, 0, 27, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn duid_from_mac() {
        let duid = Duid::from_mac(MacAddr6::new([0x18, 0xb4, 0x30, 0x00, 0x00, 0x01]));
        assert_eq!(&duid.as_slice()[..4], &[0, 3, 0, 27]);
        assert_eq!(&duid.as_slice()[4..], &[0x18, 0xb4, 0x30, 0xff, 0xfe, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn colon_string() {
        let duid = Duid::from(vec![0x00, 0x03, 0xab, 0x1f]);
        assert_eq!(duid.to_colon_string(), "00:03:ab:1f");
    }
}
