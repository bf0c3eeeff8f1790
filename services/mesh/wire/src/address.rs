//! Hierarchical tree addresses and their physical pipe mapping.
//!
//! A [`LogicalAddress`] is a 16-bit value read as octal digits. The first tree
//! level lives in the lowest octal digit and every deeper level in the next
//! digit up, so `021` is child 2 of node `01`, which is child 1 of the root.
//! Each digit selects one of up to [`MAX_CHILDREN`] children, so valid digits
//! are `1..=5` and a zero digit terminates the address.
//!
//! ```text
//!   0 (root)
//!   ├── 01 ── 011, 021, 031, 041, 051
//!   ├── 02 ── 012, 022, ...
//!   ...
//!   └── 05
//! ```

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// Deepest supported tree level
pub const MAX_DEPTH: u8 = 4;

/// Maximum number of children per node
pub const MAX_CHILDREN: u8 = 5;

/// Pipe on which a node hears its parent (and direct physical senders)
pub const PARENT_LISTEN_PIPE: u8 = 5;

/// Pipe reserved for per-level multicast
pub const MULTICAST_PIPE: u8 = 0;

/// Radio address bytes chosen for good bit transitions on air
const ADDRESS_TRANSLATION: [u8; 7] = [0xc3, 0x3c, 0x33, 0xce, 0x3e, 0xe3, 0xec];

/// Base physical address, five `0xCC` bytes
const PIPE_ADDRESS_BASE: u64 = 0xCC_CCCC_CCCC;

/// A validated position in the routing tree
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct LogicalAddress(u16);

impl LogicalAddress {
    /// The tree root, always held by the master
    pub const ROOT: LogicalAddress = LogicalAddress(0);

    /// Placeholder address used by mesh nodes that have not been assigned one
    pub const UNASSIGNED: LogicalAddress = LogicalAddress(0o4444);

    /// Validate a raw octal address
    pub fn new(raw: u16) -> Result<Self, AddressError> {
        let mut rest = raw;
        let mut level = 0u8;
        while rest != 0 {
            level += 1;
            if level > MAX_DEPTH {
                return Err(AddressError::Depth(level));
            }
            let digit = (rest & 0o7) as u8;
            if digit == 0 || digit > MAX_CHILDREN {
                return Err(AddressError::Digit { digit, level });
            }
            rest >>= 3;
        }
        Ok(Self(raw))
    }

    /// Parse an octal string such as `"021"` or `"0o21"`
    pub fn from_octal_str(s: &str) -> Result<Self, AddressError> {
        let digits = s.trim().trim_start_matches("0o");
        if digits.is_empty() {
            return Err(AddressError::Syntax);
        }
        let raw = u16::from_str_radix(digits, 8).map_err(|_| AddressError::Syntax)?;
        Self::new(raw)
    }

    /// Raw 16-bit representation
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Whether this is the root address
    pub fn is_root(self) -> bool {
        self.0 == 0
    }

    /// Number of levels below the root
    pub fn depth(self) -> u8 {
        let mut rest = self.0;
        let mut depth = 0;
        while rest != 0 {
            depth += 1;
            rest >>= 3;
        }
        depth
    }

    /// Digits from the first tree level down to the leaf
    pub fn digits(self) -> SmallVec<[u8; 4]> {
        let mut out = SmallVec::new();
        let mut rest = self.0;
        while rest != 0 {
            out.push((rest & 0o7) as u8);
            rest >>= 3;
        }
        out
    }

    /// Digit selecting this node among its siblings
    pub fn leaf_digit(self) -> Option<u8> {
        match self.depth() {
            0 => None,
            depth => Some(((self.0 >> (3 * (depth - 1))) & 0o7) as u8),
        }
    }

    /// Parent address, obtained by dropping the leaf digit
    pub fn parent(self) -> Option<LogicalAddress> {
        match self.depth() {
            0 => None,
            depth => Some(Self(self.0 & level_mask(depth - 1))),
        }
    }

    /// Child selected by `digit`
    pub fn child(self, digit: u8) -> Result<LogicalAddress, AddressError> {
        let depth = self.depth();
        if depth >= MAX_DEPTH {
            return Err(AddressError::Depth(depth + 1));
        }
        if digit == 0 || digit > MAX_CHILDREN {
            return Err(AddressError::Digit {
                digit,
                level: depth + 1,
            });
        }
        Ok(Self(self.0 | (u16::from(digit) << (3 * depth))))
    }

    /// Whether `self` lies strictly inside the subtree rooted at `of`
    pub fn is_descendant_of(self, of: LogicalAddress) -> bool {
        let of_depth = of.depth();
        self.depth() > of_depth && (self.0 & level_mask(of_depth)) == of.0
    }

    /// Whether `self` is an immediate child of `of`
    pub fn is_direct_child_of(self, of: LogicalAddress) -> bool {
        self.depth() == of.depth() + 1 && self.is_descendant_of(of)
    }

    /// The child of `self` whose subtree contains `dest`
    pub fn direct_child_toward(self, dest: LogicalAddress) -> Option<LogicalAddress> {
        if !dest.is_descendant_of(self) {
            return None;
        }
        Some(Self(dest.0 & level_mask(self.depth() + 1)))
    }

    /// Physical address of one of this node's listening pipes
    pub fn pipe_address(self, pipe: u8) -> PipeAddress {
        pipe_address_raw(self.0, pipe)
    }

    /// Multicast pipe address for the tree level this node sits on
    pub fn multicast_address(self) -> PipeAddress {
        multicast_address(self.depth())
    }
}

impl TryFrom<u16> for LogicalAddress {
    type Error = AddressError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LogicalAddress> for u16 {
    fn from(addr: LogicalAddress) -> Self {
        addr.0
    }
}

impl FromStr for LogicalAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_octal_str(s)
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "0")
        } else {
            write!(f, "0{:o}", self.0)
        }
    }
}

impl fmt::Debug for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalAddress({})", self)
    }
}

/// Pipe a parent listens on for the child selected by `digit`
pub fn pipe_for_child(digit: u8) -> Result<u8, AddressError> {
    if digit == 0 || digit > MAX_CHILDREN {
        return Err(AddressError::Digit { digit, level: 0 });
    }
    Ok(digit)
}

/// Physical radio address (up to five bytes, little-endian in a `u64`)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipeAddress(pub u64);

impl PipeAddress {
    /// Address bytes in transmission order
    pub fn to_bytes(self, width: usize) -> Vec<u8> {
        self.0.to_le_bytes()[..width.min(8)].to_vec()
    }
}

impl fmt::Display for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:010X}", self.0)
    }
}

impl fmt::Debug for PipeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeAddress({})", self)
    }
}

/// Multicast pipe address shared by every node on `level`
pub fn multicast_address(level: u8) -> PipeAddress {
    let node = if level == 0 {
        0
    } else {
        1u16 << (3 * u16::from(level - 1))
    };
    pipe_address_raw(node, MULTICAST_PIPE)
}

fn level_mask(levels: u8) -> u16 {
    ((1u32 << (3 * u32::from(levels))) - 1) as u16
}

fn pipe_address_raw(node: u16, pipe: u8) -> PipeAddress {
    let mut out = PIPE_ADDRESS_BASE.to_le_bytes();
    let unicast = pipe != MULTICAST_PIPE || node == 0;

    let mut count = 1usize;
    let mut rest = node;
    while rest != 0 {
        if unicast {
            out[count] = ADDRESS_TRANSLATION[(rest % 8) as usize];
        }
        rest /= 8;
        count += 1;
    }

    if unicast {
        out[0] = ADDRESS_TRANSLATION[pipe as usize % ADDRESS_TRANSLATION.len()];
    } else {
        out[1] = ADDRESS_TRANSLATION[count - 1];
    }

    PipeAddress(u64::from_le_bytes(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(s: &str) -> LogicalAddress {
        LogicalAddress::from_octal_str(s).unwrap()
    }

    fn all_addresses() -> Vec<LogicalAddress> {
        let mut out = vec![LogicalAddress::ROOT];
        let mut i = 0;
        while i < out.len() {
            let node = out[i];
            for digit in 1..=MAX_CHILDREN {
                if let Ok(child) = node.child(digit) {
                    out.push(child);
                }
            }
            i += 1;
        }
        out
    }

    #[test]
    fn test_validation() {
        assert!(LogicalAddress::new(0).is_ok());
        assert!(LogicalAddress::new(0o5555).is_ok());
        assert!(LogicalAddress::new(0o4444).is_ok());
        assert_eq!(
            LogicalAddress::new(0o6),
            Err(AddressError::Digit { digit: 6, level: 1 })
        );
        assert_eq!(
            LogicalAddress::new(0o101),
            Err(AddressError::Digit { digit: 0, level: 2 })
        );
        assert_eq!(LogicalAddress::new(0o11111), Err(AddressError::Depth(5)));
        assert_eq!(LogicalAddress::from_octal_str("9"), Err(AddressError::Syntax));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(addr("021").raw(), 0o21);
        assert_eq!(addr("0o21").raw(), 0o21);
        assert_eq!(addr("0"), LogicalAddress::ROOT);
        assert_eq!(addr("021").to_string(), "021");
        assert_eq!(LogicalAddress::ROOT.to_string(), "0");
        assert_eq!(LogicalAddress::UNASSIGNED.to_string(), "04444");
    }

    #[test]
    fn test_parent_chain_reaches_root_in_depth_steps() {
        for node in all_addresses() {
            let mut steps = 0;
            let mut cur = node;
            while let Some(parent) = cur.parent() {
                assert!(cur.is_direct_child_of(parent));
                cur = parent;
                steps += 1;
            }
            assert_eq!(cur, LogicalAddress::ROOT);
            assert_eq!(steps, node.depth());
        }
    }

    #[test]
    fn test_tree_relations() {
        let root = LogicalAddress::ROOT;
        assert_eq!(addr("01").parent(), Some(root));
        assert_eq!(addr("021").parent(), Some(addr("01")));
        assert_eq!(addr("021").leaf_digit(), Some(2));
        assert_eq!(addr("021").digits().as_slice(), &[1, 2]);
        assert_eq!(addr("01").child(2).unwrap(), addr("021"));
        assert!(addr("5555").child(1).is_err());

        assert!(addr("0321").is_descendant_of(root));
        assert!(addr("0321").is_descendant_of(addr("01")));
        assert!(addr("0321").is_descendant_of(addr("021")));
        assert!(!addr("0321").is_descendant_of(addr("02")));
        assert!(!addr("01").is_descendant_of(addr("01")));

        assert!(addr("021").is_direct_child_of(addr("01")));
        assert!(!addr("0321").is_direct_child_of(addr("01")));

        assert_eq!(root.direct_child_toward(addr("0321")), Some(addr("01")));
        assert_eq!(addr("01").direct_child_toward(addr("0321")), Some(addr("021")));
        assert_eq!(addr("02").direct_child_toward(addr("0321")), None);
    }

    #[test]
    fn test_pipe_for_child() {
        for digit in 1..=MAX_CHILDREN {
            assert_eq!(pipe_for_child(digit).unwrap(), digit);
        }
        assert!(pipe_for_child(0).is_err());
        assert!(pipe_for_child(6).is_err());
    }

    #[test]
    fn test_pipe_address_translation() {
        assert_eq!(LogicalAddress::ROOT.pipe_address(0).0, 0xCC_CCCC_CCC3);
        assert_eq!(LogicalAddress::ROOT.pipe_address(1).0, 0xCC_CCCC_CC3C);
        assert_eq!(addr("01").pipe_address(5).0, 0xCC_CCCC_3CE3);
        assert_eq!(addr("01").pipe_address(5).to_bytes(5), vec![0xe3, 0x3c, 0xcc, 0xcc, 0xcc]);
    }

    #[test]
    fn test_unicast_pipes_are_unique() {
        let mut seen = HashSet::new();
        for node in all_addresses() {
            for pipe in 1..=PARENT_LISTEN_PIPE {
                assert!(seen.insert(node.pipe_address(pipe)), "{} pipe {}", node, pipe);
            }
        }
        for level in 1..=MAX_DEPTH {
            assert!(!seen.contains(&multicast_address(level)));
        }
    }

    #[test]
    fn test_serde_validates() {
        let json = serde_json::to_string(&addr("021")).unwrap();
        assert_eq!(json, "17");
        assert!(serde_json::from_str::<LogicalAddress>("6").is_err());
    }
}
