//! The 32-bit overlay token.
//!
//! Callers never hold raw addresses of overlay functions or data. The linker
//! replaces them with tokens whose fields tell the engine which group to make
//! resident and where inside it the target lives. Decoding is total: bit 0
//! alone separates a plain address from a token, so any `u32` is a legal
//! input.
//!
//! | Bits    | Field        | Meaning                                        |
//! |---------|--------------|------------------------------------------------|
//! | 0       | `isToken`    | 0 = plain address, 1 = overlay token           |
//! | 1..=16  | `groupID`    | group number (multi-group: table index)        |
//! | 17..=26 | `offset`     | offset inside the group, in 4-byte units       |
//! | 27      | `thunk`      | the call goes through a caller thunk           |
//! | 28      | reserved     |                                                |
//! | 29..=30 | `cacheID`    | selects one of several parallel caches         |
//! | 31      | `multiGroup` | any of several replicated groups may serve     |

use std::fmt;

const IS_TOKEN_MASK: u32 = 0x0000_0001;
const GROUP_SHIFT: u32 = 1;
const GROUP_MASK: u32 = 0xFFFF;
const OFFSET_SHIFT: u32 = 17;
const OFFSET_MASK: u32 = 0x3FF;
const THUNK_BIT: u32 = 1 << 27;
const CACHE_SHIFT: u32 = 29;
const CACHE_MASK: u32 = 0x3;
const MULTI_GROUP_BIT: u32 = 1 << 31;

/// Granularity of the token offset field in bytes.
pub const OFFSET_GRANULARITY: u32 = 4;

/// An overlay token.
///
/// `OverlayToken` is a transparent wrapper around the raw value; all fields
/// are read through shift/mask accessors so the layout is identical on every
/// target.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OverlayToken(pub u32);

impl OverlayToken {
    /// Token carried by a free cache entry: group `0xFFFF`, not a token.
    pub const FREE: OverlayToken = OverlayToken(0x0001_FFFE);

    /// Token identifying the offset / multi-group tables.
    pub const TABLES: OverlayToken = OverlayToken(0x0000_0001);

    /// Creates a token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        OverlayToken(value)
    }

    /// Builds a token from its fields.
    ///
    /// Tokens are normally emitted by the toolchain; this is meant for
    /// tooling and tests. Out-of-range field values are truncated to their
    /// field width.
    #[must_use]
    pub const fn from_parts(group_id: u16, offset_words: u16, cache_id: u8, multi_group: bool) -> Self {
        let mut value = IS_TOKEN_MASK
            | ((group_id as u32) << GROUP_SHIFT)
            | (((offset_words as u32) & OFFSET_MASK) << OFFSET_SHIFT)
            | (((cache_id as u32) & CACHE_MASK) << CACHE_SHIFT);
        if multi_group {
            value |= MULTI_GROUP_BIT;
        }
        OverlayToken(value)
    }

    /// Recovers a token from the two-instruction thunk a function address
    /// points at.
    ///
    /// The thunk is a `lui` carrying the upper 20 bits of the token followed
    /// by an `addi` whose 12-bit immediate carries the rest.
    #[must_use]
    pub const fn from_thunk(lui: u32, addi: u32) -> Self {
        OverlayToken((lui & 0xFFFF_F000) | ((addi & 0xFFF0_0000) >> 20))
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns true if the value is an overlay token rather than a plain address
    #[must_use]
    pub const fn is_overlay(&self) -> bool {
        self.0 & IS_TOKEN_MASK != 0
    }

    /// Returns the group number, or the multi-group table index for
    /// multi-group tokens
    #[must_use]
    pub const fn group_id(&self) -> u16 {
        ((self.0 >> GROUP_SHIFT) & GROUP_MASK) as u16
    }

    /// Returns the offset inside the group in 4-byte units
    #[must_use]
    pub const fn offset_words(&self) -> u16 {
        ((self.0 >> OFFSET_SHIFT) & OFFSET_MASK) as u16
    }

    /// Returns the offset inside the group in bytes
    #[must_use]
    pub const fn offset_bytes(&self) -> u32 {
        self.offset_words() as u32 * OFFSET_GRANULARITY
    }

    /// Returns true if the call is made through a caller thunk
    #[must_use]
    pub const fn is_thunk(&self) -> bool {
        self.0 & THUNK_BIT != 0
    }

    /// Returns the cache selector
    #[must_use]
    pub const fn cache_id(&self) -> u8 {
        ((self.0 >> CACHE_SHIFT) & CACHE_MASK) as u8
    }

    /// Returns true if any of several replicated groups may satisfy the token
    #[must_use]
    pub const fn is_multi_group(&self) -> bool {
        self.0 & MULTI_GROUP_BIT != 0
    }

    /// Returns true if `other` names the same group in the same cache.
    #[must_use]
    pub const fn same_group(&self, other: OverlayToken) -> bool {
        self.group_id() == other.group_id() && self.cache_id() == other.cache_id()
    }

    /// Returns a copy of this token pointing at another offset in the same group.
    #[must_use]
    pub const fn with_offset_words(&self, offset_words: u16) -> Self {
        OverlayToken(
            (self.0 & !(OFFSET_MASK << OFFSET_SHIFT))
                | (((offset_words as u32) & OFFSET_MASK) << OFFSET_SHIFT),
        )
    }
}

impl From<u32> for OverlayToken {
    fn from(value: u32) -> Self {
        OverlayToken(value)
    }
}

impl From<OverlayToken> for u32 {
    fn from(token: OverlayToken) -> Self {
        token.0
    }
}

impl fmt::Debug for OverlayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_overlay() {
            return write!(f, "OverlayToken(0x{:08x}, address)", self.0);
        }
        write!(
            f,
            "OverlayToken(0x{:08x}, group: {}, offset: {}, cache: {}{}{})",
            self.0,
            self.group_id(),
            self.offset_words(),
            self.cache_id(),
            if self.is_multi_group() { ", multi" } else { "" },
            if self.is_thunk() { ", thunk" } else { "" },
        )
    }
}

impl fmt::Display for OverlayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_plain_address() {
        let token = OverlayToken::from(0x2000_1000);
        assert!(!token.is_overlay());
        assert_eq!(format!("{token:?}"), "OverlayToken(0x20001000, address)");
    }

    #[test]
    fn test_token_fields() {
        // group 101, offset 3 words, cache 2, multi-group
        let raw = 1 | (101 << 1) | (3 << 17) | (2 << 29) | (1 << 31);
        let token = OverlayToken::new(raw);

        assert!(token.is_overlay());
        assert_eq!(token.group_id(), 101);
        assert_eq!(token.offset_words(), 3);
        assert_eq!(token.offset_bytes(), 12);
        assert_eq!(token.cache_id(), 2);
        assert!(token.is_multi_group());
        assert!(!token.is_thunk());
        assert_eq!(token, OverlayToken::from_parts(101, 3, 2, true));
    }

    #[test]
    fn test_token_field_limits() {
        let token = OverlayToken::new(u32::MAX);
        assert_eq!(token.group_id(), 0xFFFF);
        assert_eq!(token.offset_words(), 0x3FF);
        assert_eq!(token.cache_id(), 3);
        assert!(token.is_thunk());
        assert!(token.is_multi_group());

        let token = OverlayToken::from_parts(7, 0x7FF, 9, false);
        assert_eq!(token.offset_words(), 0x3FF);
        assert_eq!(token.cache_id(), 1);
        assert_eq!(token.group_id(), 7);
    }

    #[test]
    fn test_token_constants() {
        assert!(!OverlayToken::FREE.is_overlay());
        assert_eq!(OverlayToken::FREE.group_id(), 0xFFFF);
        assert!(OverlayToken::TABLES.is_overlay());
        assert_eq!(OverlayToken::TABLES.group_id(), 0);
    }

    #[test]
    fn test_token_from_thunk() {
        // lui t0, 0x12345 ; addi t0, t0, 0x679
        let lui = 0x1234_5000 | 0x2B7;
        let addi = 0x6792_8293;
        assert_eq!(OverlayToken::from_thunk(lui, addi).value(), 0x1234_5679);
    }

    #[test]
    fn test_token_same_group() {
        let a = OverlayToken::from_parts(12, 0, 0, false);
        let b = OverlayToken::from_parts(12, 40, 0, false);
        let c = OverlayToken::from_parts(12, 0, 1, false);
        assert!(a.same_group(b));
        assert!(!a.same_group(c));
        assert_eq!(a.with_offset_words(40), b);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(OverlayToken::from_parts(1, 0, 0, false).to_string(), "0x00000003");
        assert_eq!(u32::from(OverlayToken::TABLES), 1);
    }
}
