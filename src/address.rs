//! Protocol/NBMA address plumbing.
//!
//! Address-family specific formatting and parsing are out of scope for the
//! core (§1) — callers hand us parsed `IpAddr`s. What *is* core logic is the
//! arithmetic the peer cache and selectors need: subnet containment, prefix
//! normalization, and address bit-length lookup.

use std::net::IpAddr;

pub type Address = IpAddr;

/// Bit length of an address family, used to normalize the `0xFF` prefix
/// sentinel ("full host prefix").
pub fn address_length_bits(addr: &Address) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

pub const FULL_HOST_PREFIX_SENTINEL: u8 = 0xFF;

/// Normalizes the `0xFF` prefix-length sentinel to `address_length * 8`.
pub fn normalize_prefix_length(prefix_length: u8, addr: &Address) -> u8 {
    if prefix_length == FULL_HOST_PREFIX_SENTINEL {
        address_length_bits(addr)
    } else {
        prefix_length
    }
}

/// Does `network/prefix_length` contain `candidate`?
///
/// Differing address families never match (an IPv4 peer cannot cover an
/// IPv6 selector address).
pub fn subnet_contains(network: &Address, prefix_length: u8, candidate: &Address) -> bool {
    match (network, candidate) {
        (IpAddr::V4(n), IpAddr::V4(c)) => {
            let bits = prefix_length.min(32);
            let mask: u32 = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
            (u32::from(*n) & mask) == (u32::from(*c) & mask)
        }
        (IpAddr::V6(n), IpAddr::V6(c)) => {
            let bits = prefix_length.min(128);
            let mask: u128 = if bits == 0 { 0 } else { u128::MAX << (128 - bits) };
            (u128::from(*n) & mask) == (u128::from(*c) & mask)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_normalizes_to_address_length() {
        let v4: Address = "10.0.0.2".parse().unwrap();
        assert_eq!(normalize_prefix_length(0xFF, &v4), 32);
        let v6: Address = "::1".parse().unwrap();
        assert_eq!(normalize_prefix_length(0xFF, &v6), 128);
        assert_eq!(normalize_prefix_length(24, &v4), 24);
    }

    #[test]
    fn subnet_containment_respects_prefix() {
        let network: Address = "10.0.0.0".parse().unwrap();
        let inside: Address = "10.0.0.42".parse().unwrap();
        let outside: Address = "10.0.1.1".parse().unwrap();
        assert!(subnet_contains(&network, 24, &inside));
        assert!(!subnet_contains(&network, 24, &outside));
    }

    #[test]
    fn mixed_families_never_match() {
        let network: Address = "10.0.0.0".parse().unwrap();
        let candidate: Address = "::1".parse().unwrap();
        assert!(!subnet_contains(&network, 0, &candidate));
    }
}
