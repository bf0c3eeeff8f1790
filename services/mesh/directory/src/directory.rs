//! The master's identity to address table.
//!
//! Allocation walks the tree breadth first, lowest level and lowest digit
//! first, and hands out the first address whose parent is present and which
//! no live entry holds. Entries that have not been refreshed within the
//! configured timeout stop counting as live; their addresses can be handed to
//! another identity and [`Directory::expire`] drops them for good.

use mesh_storage::DirectoryRecord;
use mesh_wire::{LogicalAddress, NodeIdentity, MAX_CHILDREN, MAX_DEPTH};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::DirectoryError;

/// Default time an entry stays live without a refresh
pub const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);

/// Allocation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Deepest level handed out (1 to 4)
    pub max_depth: u8,
    /// Children per node (1 to 5)
    pub max_children: u8,
    /// Unrefreshed entries become reusable after this long
    #[serde(with = "duration_secs")]
    pub entry_timeout: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            max_children: MAX_CHILDREN,
            entry_timeout: DEFAULT_ENTRY_TIMEOUT,
        }
    }
}

impl DirectoryConfig {
    /// Clamp the limits to what the address format can express
    pub fn normalized(self) -> Self {
        Self {
            max_depth: self.max_depth.clamp(1, MAX_DEPTH),
            max_children: self.max_children.clamp(1, MAX_CHILDREN),
            ..self
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// One binding held by the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Node identity
    pub identity: NodeIdentity,
    /// Address bound to it
    pub address: LogicalAddress,
    /// Last allocation, confirmation or renewal
    pub last_seen: Instant,
    /// Configured binding; never expires and never moves
    pub is_static: bool,
}

/// Directory counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStats {
    /// Entries in the table
    pub entries: usize,
    /// Entries refreshed within the timeout (static ones included)
    pub live_entries: usize,
    /// Static bindings
    pub static_entries: usize,
    /// Successful allocations
    pub allocations: u64,
    /// Requests refused for lack of space
    pub denials: u64,
    /// Entries dropped by `expire`
    pub expirations: u64,
    /// Entries removed on release
    pub releases: u64,
}

/// Identity to address table kept by the master
#[derive(Debug)]
pub struct Directory {
    config: DirectoryConfig,
    entries: BTreeMap<NodeIdentity, DirectoryEntry>,
    dirty: bool,
    allocations: u64,
    denials: u64,
    expirations: u64,
    releases: u64,
}

impl Directory {
    /// Create an empty directory
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config: config.normalized(),
            entries: BTreeMap::new(),
            dirty: false,
            allocations: 0,
            denials: 0,
            expirations: 0,
            releases: 0,
        }
    }

    /// Active limits
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Bind `identity` to an address
    ///
    /// With `parent_hint` (the contact that relayed the request) only children
    /// of that node qualify, since the requester can only be heard there. An
    /// identity that already holds an address under the same parent keeps it.
    /// When no address is free nothing is recorded.
    pub fn allocate(
        &mut self,
        identity: NodeIdentity,
        parent_hint: Option<LogicalAddress>,
        now: Instant,
    ) -> Result<LogicalAddress, DirectoryError> {
        if identity.is_master() {
            return Err(DirectoryError::ReservedIdentity(identity));
        }

        if let Some(entry) = self.entries.get(&identity).copied() {
            let same_parent = match parent_hint {
                None => true,
                Some(hint) => entry.address.parent() == Some(hint),
            };
            if entry.is_static || (same_parent && self.parent_present(entry.address, identity, now))
            {
                if let Some(held) = self.entries.get_mut(&identity) {
                    held.last_seen = now;
                }
                debug!("{} keeps {}", identity, entry.address);
                return Ok(entry.address);
            }
        }

        let candidate = match parent_hint {
            Some(parent) => {
                if !parent.is_root() && self.live_holder(parent, now).is_none() {
                    self.denials += 1;
                    return Err(DirectoryError::UnknownParent(parent));
                }
                self.free_child_of(parent, identity, now)
            }
            None => self.first_free(identity, now),
        };

        let Some(address) = candidate else {
            self.denials += 1;
            warn!("No free address for {}", identity);
            return Err(DirectoryError::CapacityExhausted);
        };

        self.bind(identity, address, false, now);
        self.allocations += 1;
        info!("Allocated {} to {}", address, identity);
        Ok(address)
    }

    /// Refresh the binding `identity` announces from `address`
    ///
    /// A node confirming an address the table does not know (after a master
    /// restart, say) gets it recorded if nobody else holds it.
    pub fn renew(
        &mut self,
        identity: NodeIdentity,
        address: LogicalAddress,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        if identity.is_master() {
            return Err(DirectoryError::ReservedIdentity(identity));
        }
        if let Some(entry) = self.entries.get_mut(&identity) {
            if entry.address == address {
                entry.last_seen = now;
                return Ok(());
            }
        }

        if !self.in_range(address) {
            return Err(DirectoryError::OutOfRange(address));
        }
        if let Some(holder) = self.live_holder(address, now) {
            if holder != identity {
                warn!("{} announced {}, held by {}", identity, address, holder);
                return Err(DirectoryError::Conflict { address, holder });
            }
        }

        self.bind(identity, address, false, now);
        info!("Recorded {} at {} from announcement", identity, address);
        Ok(())
    }

    /// Drop the dynamic binding of `identity`
    pub fn release(&mut self, identity: NodeIdentity) -> Option<LogicalAddress> {
        let entry = self.entries.get(&identity)?;
        if entry.is_static {
            return None;
        }
        let address = entry.address;
        self.entries.remove(&identity);
        self.releases += 1;
        self.dirty = true;
        info!("{} released {}", identity, address);
        Some(address)
    }

    /// Bind `identity` to `address` permanently
    pub fn set_static_address(
        &mut self,
        identity: NodeIdentity,
        address: LogicalAddress,
        now: Instant,
    ) -> Result<(), DirectoryError> {
        if identity.is_master() {
            return Err(DirectoryError::ReservedIdentity(identity));
        }
        if !self.in_range(address) {
            return Err(DirectoryError::OutOfRange(address));
        }
        if let Some(holder) = self.holder(address) {
            if holder.identity != identity && holder.is_static {
                return Err(DirectoryError::Conflict {
                    address,
                    holder: holder.identity,
                });
            }
        }
        self.bind(identity, address, true, now);
        info!("Static binding {} -> {}", identity, address);
        Ok(())
    }

    /// Current address of `identity`; the master is always the root
    pub fn lookup_address(&self, identity: NodeIdentity, now: Instant) -> Option<LogicalAddress> {
        if identity.is_master() {
            return Some(LogicalAddress::ROOT);
        }
        self.entries
            .get(&identity)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.address)
    }

    /// Identity currently holding `address`
    pub fn lookup_identity(&self, address: LogicalAddress, now: Instant) -> Option<NodeIdentity> {
        if address.is_root() {
            return Some(NodeIdentity::MASTER);
        }
        self.live_holder(address, now)
    }

    /// Remove entries not refreshed within the timeout
    pub fn expire(&mut self, now: Instant) -> Vec<DirectoryEntry> {
        let timeout = self.config.entry_timeout;
        let expired: Vec<DirectoryEntry> = self
            .entries
            .values()
            .filter(|entry| !entry.is_static && now.saturating_duration_since(entry.last_seen) >= timeout)
            .copied()
            .collect();

        for entry in &expired {
            self.entries.remove(&entry.identity);
            info!(
                "Expired {} at {} (silent for {:?})",
                entry.identity,
                entry.address,
                now.saturating_duration_since(entry.last_seen)
            );
        }
        if !expired.is_empty() {
            self.expirations += expired.len() as u64;
            self.dirty = true;
        }
        expired
    }

    /// Entry for `identity`, live or not
    pub fn get(&self, identity: NodeIdentity) -> Option<&DirectoryEntry> {
        self.entries.get(&identity)
    }

    /// All entries ordered by identity
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the table changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Snapshot for persistence
    pub fn records(&self) -> Vec<DirectoryRecord> {
        self.entries
            .values()
            .map(|entry| DirectoryRecord {
                identity: entry.identity,
                address: entry.address,
                is_static: entry.is_static,
            })
            .collect()
    }

    /// Load a snapshot; restored entries count as seen at `now`
    ///
    /// Records that fall outside the limits or collide with an earlier record
    /// are skipped. Returns how many were restored.
    pub fn restore(&mut self, records: &[DirectoryRecord], now: Instant) -> usize {
        let mut restored = 0;
        for record in records {
            if record.identity.is_master() || !self.in_range(record.address) {
                warn!(
                    "Skipping stored record {} -> {}",
                    record.identity, record.address
                );
                continue;
            }
            if let Some(holder) = self.holder(record.address) {
                if holder.identity != record.identity {
                    warn!(
                        "Skipping stored record {} -> {}: held by {}",
                        record.identity, record.address, holder.identity
                    );
                    continue;
                }
            }
            self.entries.insert(
                record.identity,
                DirectoryEntry {
                    identity: record.identity,
                    address: record.address,
                    last_seen: now,
                    is_static: record.is_static,
                },
            );
            restored += 1;
        }
        info!("Restored {} directory entries", restored);
        restored
    }

    /// Counters
    pub fn stats(&self, now: Instant) -> DirectoryStats {
        DirectoryStats {
            entries: self.entries.len(),
            live_entries: self
                .entries
                .values()
                .filter(|entry| self.is_live(entry, now))
                .count(),
            static_entries: self.entries.values().filter(|entry| entry.is_static).count(),
            allocations: self.allocations,
            denials: self.denials,
            expirations: self.expirations,
            releases: self.releases,
        }
    }

    fn bind(&mut self, identity: NodeIdentity, address: LogicalAddress, is_static: bool, now: Instant) {
        // A stale holder of the address loses it
        let previous: Vec<NodeIdentity> = self
            .entries
            .values()
            .filter(|entry| entry.address == address && entry.identity != identity)
            .map(|entry| entry.identity)
            .collect();
        for stale in previous {
            self.entries.remove(&stale);
            debug!("{} lost {} to {}", stale, address, identity);
        }

        self.entries.insert(
            identity,
            DirectoryEntry {
                identity,
                address,
                last_seen: now,
                is_static,
            },
        );
        self.dirty = true;
    }

    fn is_live(&self, entry: &DirectoryEntry, now: Instant) -> bool {
        entry.is_static || now.saturating_duration_since(entry.last_seen) < self.config.entry_timeout
    }

    fn holder(&self, address: LogicalAddress) -> Option<&DirectoryEntry> {
        self.entries.values().find(|entry| entry.address == address)
    }

    fn live_holder(&self, address: LogicalAddress, now: Instant) -> Option<NodeIdentity> {
        self.holder(address)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| entry.identity)
    }

    fn in_range(&self, address: LogicalAddress) -> bool {
        !address.is_root()
            && address != LogicalAddress::UNASSIGNED
            && address.depth() <= self.config.max_depth
            && address
                .digits()
                .iter()
                .all(|digit| *digit <= self.config.max_children)
    }

    /// Free for `identity`: in range and not held live by anyone else
    fn is_free(&self, address: LogicalAddress, identity: NodeIdentity, now: Instant) -> bool {
        self.in_range(address)
            && match self.live_holder(address, now) {
                None => true,
                Some(holder) => holder == identity,
            }
    }

    fn parent_present(&self, address: LogicalAddress, identity: NodeIdentity, now: Instant) -> bool {
        match address.parent() {
            Some(parent) if parent.is_root() => true,
            Some(parent) => matches!(self.live_holder(parent, now), Some(holder) if holder != identity),
            None => false,
        }
    }

    fn free_child_of(
        &self,
        parent: LogicalAddress,
        identity: NodeIdentity,
        now: Instant,
    ) -> Option<LogicalAddress> {
        if parent.depth() >= self.config.max_depth {
            return None;
        }
        (1..=self.config.max_children)
            .filter_map(|digit| parent.child(digit).ok())
            .find(|child| self.is_free(*child, identity, now))
    }

    fn first_free(&self, identity: NodeIdentity, now: Instant) -> Option<LogicalAddress> {
        let mut queue = VecDeque::from([LogicalAddress::ROOT]);
        while let Some(parent) = queue.pop_front() {
            if parent.depth() >= self.config.max_depth {
                continue;
            }
            for digit in 1..=self.config.max_children {
                let Ok(child) = parent.child(digit) else {
                    continue;
                };
                match self.live_holder(child, now) {
                    Some(holder) if holder != identity => queue.push_back(child),
                    _ if self.is_free(child, identity, now) => return Some(child),
                    _ => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u8) -> NodeIdentity {
        NodeIdentity::new(raw).unwrap()
    }

    fn addr(s: &str) -> LogicalAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_allocation_is_first_child_of_root() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        assert_eq!(dir.allocate(id(4), None, now).unwrap(), addr("01"));
        assert_eq!(dir.lookup_address(id(4), now), Some(addr("01")));
        assert_eq!(dir.lookup_identity(addr("01"), now), Some(id(4)));
    }

    #[test]
    fn test_renewal_keeps_address() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        let first = dir.allocate(id(4), None, now).unwrap();
        dir.allocate(id(5), None, now).unwrap();
        assert_eq!(dir.allocate(id(4), None, now).unwrap(), first);
        assert_eq!(
            dir.allocate(id(4), Some(LogicalAddress::ROOT), now).unwrap(),
            first
        );
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_distinct_identities_get_distinct_addresses() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        let a = dir.allocate(id(1), None, now).unwrap();
        let b = dir.allocate(id(2), None, now).unwrap();
        assert_ne!(a, b);
        assert_eq!((a, b), (addr("01"), addr("02")));
    }

    #[test]
    fn test_breadth_first_fills_level_one_before_level_two() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        let mut allocated = Vec::new();
        for raw in 1..=7 {
            allocated.push(dir.allocate(id(raw), None, now).unwrap());
        }
        let expected: Vec<LogicalAddress> = ["01", "02", "03", "04", "05", "011", "021"]
            .iter()
            .map(|s| addr(s))
            .collect();
        assert_eq!(allocated, expected);
    }

    #[test]
    fn test_expired_address_is_reused() {
        let config = DirectoryConfig {
            entry_timeout: Duration::from_secs(10),
            ..DirectoryConfig::default()
        };
        let mut dir = Directory::new(config);
        let start = Instant::now();
        assert_eq!(dir.allocate(id(4), None, start).unwrap(), addr("01"));

        let later = start + Duration::from_secs(11);
        assert_eq!(dir.lookup_address(id(4), later), None);
        assert_eq!(dir.allocate(id(7), None, later).unwrap(), addr("01"));
        assert!(dir.get(id(4)).is_none());
    }

    #[test]
    fn test_capacity_exhaustion_records_nothing() {
        let config = DirectoryConfig {
            max_depth: 1,
            max_children: 2,
            ..DirectoryConfig::default()
        };
        let mut dir = Directory::new(config);
        let now = Instant::now();
        dir.allocate(id(1), None, now).unwrap();
        dir.allocate(id(2), None, now).unwrap();

        assert_eq!(
            dir.allocate(id(3), None, now),
            Err(DirectoryError::CapacityExhausted)
        );
        assert!(dir.get(id(3)).is_none());
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.stats(now).denials, 1);
    }

    #[test]
    fn test_parent_hint_restricts_candidates() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        dir.allocate(id(1), None, now).unwrap();
        dir.allocate(id(2), None, now).unwrap();

        assert_eq!(dir.allocate(id(3), Some(addr("02")), now).unwrap(), addr("012"));
        assert_eq!(
            dir.allocate(id(4), Some(addr("03")), now),
            Err(DirectoryError::UnknownParent(addr("03")))
        );
    }

    #[test]
    fn test_move_under_new_parent() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        dir.allocate(id(1), None, now).unwrap();
        dir.allocate(id(2), None, now).unwrap();
        assert_eq!(dir.allocate(id(3), Some(addr("01")), now).unwrap(), addr("011"));

        assert_eq!(dir.allocate(id(3), Some(addr("02")), now).unwrap(), addr("012"));
        assert_eq!(dir.lookup_identity(addr("011"), now), None);
    }

    #[test]
    fn test_children_of_stale_parent_are_not_offered() {
        let config = DirectoryConfig {
            max_depth: 2,
            max_children: 1,
            entry_timeout: Duration::from_secs(5),
        };
        let mut dir = Directory::new(config);
        let start = Instant::now();
        dir.allocate(id(1), None, start).unwrap();

        let later = start + Duration::from_secs(6);
        // 01 is stale, so it is offered again rather than its child
        assert_eq!(dir.allocate(id(2), None, later).unwrap(), addr("01"));
    }

    #[test]
    fn test_renew_refreshes_and_records() {
        let config = DirectoryConfig {
            entry_timeout: Duration::from_secs(10),
            ..DirectoryConfig::default()
        };
        let mut dir = Directory::new(config);
        let start = Instant::now();
        dir.allocate(id(4), None, start).unwrap();

        let later = start + Duration::from_secs(8);
        dir.renew(id(4), addr("01"), later).unwrap();
        assert_eq!(
            dir.lookup_address(id(4), start + Duration::from_secs(15)),
            Some(addr("01"))
        );

        dir.renew(id(9), addr("03"), later).unwrap();
        assert_eq!(dir.lookup_identity(addr("03"), later), Some(id(9)));
        assert_eq!(
            dir.renew(id(10), addr("03"), later),
            Err(DirectoryError::Conflict {
                address: addr("03"),
                holder: id(9)
            })
        );
    }

    #[test]
    fn test_master_identity_is_reserved() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        assert_eq!(
            dir.allocate(NodeIdentity::MASTER, None, now),
            Err(DirectoryError::ReservedIdentity(NodeIdentity::MASTER))
        );
        assert_eq!(
            dir.lookup_address(NodeIdentity::MASTER, now),
            Some(LogicalAddress::ROOT)
        );
        assert_eq!(
            dir.lookup_identity(LogicalAddress::ROOT, now),
            Some(NodeIdentity::MASTER)
        );
    }

    #[test]
    fn test_release_frees_address() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        dir.allocate(id(1), None, now).unwrap();
        assert_eq!(dir.release(id(1)), Some(addr("01")));
        assert_eq!(dir.release(id(1)), None);
        assert_eq!(dir.allocate(id(2), None, now).unwrap(), addr("01"));
    }

    #[test]
    fn test_static_entries_never_expire() {
        let config = DirectoryConfig {
            entry_timeout: Duration::from_secs(1),
            ..DirectoryConfig::default()
        };
        let mut dir = Directory::new(config);
        let start = Instant::now();
        dir.set_static_address(id(9), addr("03"), start).unwrap();
        dir.allocate(id(1), None, start).unwrap();

        let later = start + Duration::from_secs(30);
        let expired = dir.expire(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].identity, id(1));
        assert_eq!(dir.lookup_address(id(9), later), Some(addr("03")));
        assert_eq!(dir.release(id(9)), None);
    }

    #[test]
    fn test_allocation_skips_static_address() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        dir.set_static_address(id(9), addr("01"), now).unwrap();
        assert_eq!(dir.allocate(id(1), None, now).unwrap(), addr("02"));
        assert_eq!(
            dir.set_static_address(id(1), addr("01"), now),
            Err(DirectoryError::Conflict {
                address: addr("01"),
                holder: id(9)
            })
        );
    }

    #[test]
    fn test_out_of_range_rejected() {
        let config = DirectoryConfig {
            max_depth: 2,
            max_children: 3,
            ..DirectoryConfig::default()
        };
        let mut dir = Directory::new(config);
        let now = Instant::now();
        assert_eq!(
            dir.renew(id(1), addr("05"), now),
            Err(DirectoryError::OutOfRange(addr("05")))
        );
        assert_eq!(
            dir.renew(id(1), addr("0111"), now),
            Err(DirectoryError::OutOfRange(addr("0111")))
        );
    }

    #[test]
    fn test_records_round_trip_through_restore() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        dir.allocate(id(1), None, now).unwrap();
        dir.set_static_address(id(2), addr("03"), now).unwrap();
        assert!(dir.take_dirty());
        assert!(!dir.take_dirty());

        let mut restored = Directory::new(DirectoryConfig::default());
        assert_eq!(restored.restore(&dir.records(), now), 2);
        assert_eq!(restored.records(), dir.records());
    }

    #[test]
    fn test_restore_skips_collisions() {
        let mut dir = Directory::new(DirectoryConfig::default());
        let now = Instant::now();
        let records = [
            DirectoryRecord {
                identity: id(1),
                address: addr("01"),
                is_static: false,
            },
            DirectoryRecord {
                identity: id(2),
                address: addr("01"),
                is_static: false,
            },
        ];
        assert_eq!(dir.restore(&records, now), 1);
        assert_eq!(dir.lookup_identity(addr("01"), now), Some(id(1)));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: DirectoryConfig = serde_json::from_str(r#"{"entry_timeout": 30}"#).unwrap();
        assert_eq!(config.entry_timeout, Duration::from_secs(30));
        assert_eq!(config.max_depth, MAX_DEPTH);
    }
}
