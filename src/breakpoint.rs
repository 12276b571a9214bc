// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The breakpoint table: the sole source of truth for "is there a breakpoint at
//! address X". Addresses are real for native debuggees and fake (file/line
//! encoded) for scripted ones; the table does not care which.

use fnv::FnvHashMap;

/// Opaque owner of a breakpoint, supplied by the front-end. Many tokens can
/// share one address; the installed primitive is ref-counted by them.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClientToken(pub u64);

pub struct BreakpointRecord {
    address: u64,
    // Byte the int3 replaced. None for scripted breakpoints.
    original_byte: Option<u8>,
    // Multiset: the same client may legitimately appear more than once.
    clients: Vec<ClientToken>,
}

impl BreakpointRecord {
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn original_byte(&self) -> Option<u8> {
        self.original_byte
    }

    pub fn clients(&self) -> &[ClientToken] {
        &self.clients
    }
}

/// Outcome of removing one client from a record.
pub struct RemovedClient {
    pub original_byte: Option<u8>,
    /// True when the record emptied and was deleted; the caller uninstalls the
    /// underlying primitive.
    pub last_client: bool,
}

#[derive(Default)]
pub struct BreakpointTable {
    records: FnvHashMap<u64, BreakpointRecord>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.records.contains_key(&address)
    }

    pub fn find(&self, address: u64) -> Option<&BreakpointRecord> {
        self.records.get(&address)
    }

    /// Append `client` to an existing record. Returns false when no record
    /// exists at `address`, in which case the caller installs the primitive and
    /// calls `insert`.
    pub fn append_client(&mut self, address: u64, client: ClientToken) -> bool {
        match self.records.get_mut(&address) {
            Some(record) => {
                record.clients.push(client);
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, address: u64, original_byte: Option<u8>, client: ClientToken) {
        let previous = self.records.insert(
            address,
            BreakpointRecord {
                address,
                original_byte,
                clients: vec![client],
            },
        );
        debug_assert!(
            previous.is_none(),
            "breakpoint record replaced at {:#x}",
            address
        );
    }

    /// Remove one occurrence of `client` from the record at `address`. The
    /// record is deleted when its client set empties.
    pub fn remove_client(&mut self, address: u64, client: ClientToken) -> Option<RemovedClient> {
        let record = self.records.get_mut(&address)?;

        if let Some(pos) = record.clients.iter().position(|c| *c == client) {
            record.clients.remove(pos);
        }

        if record.clients.is_empty() {
            let record = self.records.remove(&address)?;
            Some(RemovedClient {
                original_byte: record.original_byte,
                last_client: true,
            })
        } else {
            Some(RemovedClient {
                original_byte: record.original_byte,
                last_client: false,
            })
        }
    }

    /// Copy of the clients bound at `address`, for handing to the front-end
    /// without holding the table lock across the callback.
    pub fn snapshot_clients(&self, address: u64) -> Vec<ClientToken> {
        self.records
            .get(&address)
            .map(|record| record.clients.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_client_appends_without_reinstall() {
        let mut table = BreakpointTable::new();

        assert!(!table.append_client(0xAAA, ClientToken(1)));
        table.insert(0xAAA, Some(0x55), ClientToken(1));
        assert!(table.append_client(0xAAA, ClientToken(2)));

        assert_eq!(table.snapshot_clients(0xAAA).len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn record_survives_until_last_client_leaves() {
        let mut table = BreakpointTable::new();
        table.insert(0xAAA, Some(0x55), ClientToken(1));
        table.append_client(0xAAA, ClientToken(2));

        let first = table.remove_client(0xAAA, ClientToken(1)).unwrap();
        assert!(!first.last_client);
        assert!(table.contains(0xAAA));

        let second = table.remove_client(0xAAA, ClientToken(2)).unwrap();
        assert!(second.last_client);
        assert_eq!(second.original_byte, Some(0x55));
        assert!(!table.contains(0xAAA));
    }

    #[test]
    fn multiset_removes_one_occurrence_at_a_time() {
        let mut table = BreakpointTable::new();
        table.insert(0xBBB, None, ClientToken(9));
        table.append_client(0xBBB, ClientToken(9));

        let first = table.remove_client(0xBBB, ClientToken(9)).unwrap();
        assert!(!first.last_client);

        let second = table.remove_client(0xBBB, ClientToken(9)).unwrap();
        assert!(second.last_client);
    }

    #[test]
    fn remove_at_unknown_address_is_none() {
        let mut table = BreakpointTable::new();
        assert!(table.remove_client(0xDEAD, ClientToken(1)).is_none());
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut table = BreakpointTable::new();
        table.insert(0xCCC, None, ClientToken(3));

        let snapshot = table.snapshot_clients(0xCCC);
        table.remove_client(0xCCC, ClientToken(3));

        assert_eq!(snapshot, vec![ClientToken(3)]);
        assert!(table.is_empty());
    }
}
