//! Sequential private-address allocation.
//!
//! Addresses live in `192.168.0.0/16`. The third octet is the high octet and
//! the fourth the low octet; low values below [`LOW_OCTET_MIN`] are reserved
//! in every block, so allocation starts at [`FIRST_ADDRESS`] and rolls the low
//! octet back to `10` when it passes `255`. The block runs from
//! [`FIRST_ADDRESS`] to `192.168.255.255`; anything else is never allocated.
//!
//! Claimed addresses are not tracked in memory. The [`AddressLedger`] is a
//! snapshot of the state directory listing, taken fresh for every allocation.
//! Two allocations racing in the same tick, before either instance directory
//! exists, can pick the same address.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::VagabondError;

/// Lowest address handed out when the requested one is taken.
pub const FIRST_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 22, 10);

const LOW_OCTET_MIN: u8 = 10;

/// Whether `address` is one the allocator may hand out.
pub fn in_block(address: Ipv4Addr) -> bool {
    let [a, b, high, low] = address.octets();
    let [first_a, first_b, first_high, _] = FIRST_ADDRESS.octets();
    a == first_a && b == first_b && high >= first_high && low >= LOW_OCTET_MIN
}

/// Addresses currently claimed by managed instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLedger {
    claimed: BTreeSet<Ipv4Addr>,
}

impl AddressLedger {
    pub fn new(claimed: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Self {
            claimed: claimed.into_iter().collect(),
        }
    }

    /// Read the ledger from the state directory: one entry per instance,
    /// named by its address. Entries that are not block addresses are ignored
    /// and a missing state directory is an empty ledger.
    pub fn snapshot(state_dir: &Path) -> Result<Self, VagabondError> {
        let entries = match std::fs::read_dir(state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(VagabondError::Io {
                    context: format!("reading state directory {}", state_dir.display()),
                    source: e,
                });
            }
        };

        let claimed = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse::<Ipv4Addr>().ok())
            .filter(|address| in_block(*address))
            .collect();

        Ok(Self { claimed })
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        self.claimed.contains(&address)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    /// Claimed addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.claimed.iter().copied()
    }
}

/// Return `candidate` if it is free, otherwise the first free address after
/// it in ascending order, wrapping from the end of the block to
/// [`FIRST_ADDRESS`].
///
/// A candidate outside the block is a [`VagabondError::Validation`] error.
/// Fails with [`VagabondError::AddressSpaceExhausted`] only once every block
/// address has been checked. The result depends only on its inputs.
pub fn next_available_address(
    candidate: Ipv4Addr,
    ledger: &AddressLedger,
) -> Result<Ipv4Addr, VagabondError> {
    if !in_block(candidate) {
        return Err(VagabondError::Validation {
            message: format!(
                "address {candidate} is outside the allocatable range {FIRST_ADDRESS} - 192.168.255.255"
            ),
        });
    }

    let mut address = candidate;
    while ledger.contains(address) {
        address = successor(address).unwrap_or(FIRST_ADDRESS);
        if address == candidate {
            return Err(VagabondError::AddressSpaceExhausted);
        }
    }
    Ok(address)
}

/// Next address in allocation order, or `None` past `192.168.255.255`.
fn successor(address: Ipv4Addr) -> Option<Ipv4Addr> {
    let [a, b, high, low] = address.octets();
    if low == u8::MAX {
        let high = high.checked_add(1)?;
        Some(Ipv4Addr::new(a, b, high, LOW_OCTET_MIN))
    } else {
        Some(Ipv4Addr::new(a, b, high, low + 1))
    }
}
