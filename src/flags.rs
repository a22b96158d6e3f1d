//! Control-flag codec.
//!
//! Two distinct bitsets drive physical storage behaviour:
//!
//! - [`ObjectFlags`] (`ctlo` on `.objects`, `ctloMask` on `.classes`)
//! - [`PropertyFlags`] (`ctlv` on `.class_properties` and `.ref-values`)
//!
//! Object flag layout (u64):
//! ```text
//! bit  0        weak object
//! bits 1..=16   slot A..P unique
//! bits 17..=32  slot A..P indexed
//! bits 33..=48  slot A..P full-text
//! bit  49       do not track changes
//! bit  50       schema not enforced
//! bit  51       has invalid data
//! ```
//!
//! Property flag layout (u32):
//! ```text
//! bits 0..=3    reference kind (RefKind, 0..=8 valid)
//! bit  4        full-text
//! bit  5        range
//! bit  6        do not track changes
//! bit  7        unique
//! bits 8..=11   range role (RangeRole, 1..=12 valid, 0 = none)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FlexError, Result};
use crate::types::FLAG_SLOTS;

// ── Object flags ───────────────────────────────────────────────────

const CTLO_WEAK: u64 = 1;
const CTLO_UNIQUE_SHIFT: u32 = 1;
const CTLO_INDEX_SHIFT: u32 = 17;
const CTLO_FULL_TEXT_SHIFT: u32 = 33;
const CTLO_NO_TRACK_CHANGES: u64 = 1 << 49;
const CTLO_SCHEMA_NOT_ENFORCED: u64 = 1 << 50;
const CTLO_HAS_INVALID_DATA: u64 = 1 << 51;
const CTLO_KNOWN_MASK: u64 = (1 << 52) - 1;

/// Object-level control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectFlags(u64);

impl ObjectFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits as stored in `ctlo`.
    pub fn encode(self) -> u64 {
        self.0
    }

    /// Parse stored bits. Unknown bits are rejected.
    pub fn decode(bits: u64) -> Result<Self> {
        if bits & !CTLO_KNOWN_MASK != 0 {
            return Err(FlexError::InvalidFlags(format!(
                "object flags contain unknown bits: {:#x}",
                bits & !CTLO_KNOWN_MASK
            )));
        }
        Ok(Self(bits))
    }

    fn with(self, mask: u64, on: bool) -> Self {
        if on {
            Self(self.0 | mask)
        } else {
            Self(self.0 & !mask)
        }
    }

    fn slot_mask(shift: u32, slot: usize) -> u64 {
        debug_assert!(slot < FLAG_SLOTS, "slot out of range");
        1u64 << (shift + slot as u32)
    }

    pub fn is_weak(self) -> bool {
        self.0 & CTLO_WEAK != 0
    }

    pub fn with_weak(self, on: bool) -> Self {
        self.with(CTLO_WEAK, on)
    }

    pub fn tracks_changes(self) -> bool {
        self.0 & CTLO_NO_TRACK_CHANGES == 0
    }

    pub fn with_no_track_changes(self, on: bool) -> Self {
        self.with(CTLO_NO_TRACK_CHANGES, on)
    }

    pub fn schema_enforced(self) -> bool {
        self.0 & CTLO_SCHEMA_NOT_ENFORCED == 0
    }

    pub fn with_schema_not_enforced(self, on: bool) -> Self {
        self.with(CTLO_SCHEMA_NOT_ENFORCED, on)
    }

    pub fn has_invalid_data(self) -> bool {
        self.0 & CTLO_HAS_INVALID_DATA != 0
    }

    pub fn with_invalid_data(self, on: bool) -> Self {
        self.with(CTLO_HAS_INVALID_DATA, on)
    }

    pub fn slot_unique(self, slot: usize) -> bool {
        self.0 & Self::slot_mask(CTLO_UNIQUE_SHIFT, slot) != 0
    }

    pub fn with_slot_unique(self, slot: usize, on: bool) -> Self {
        self.with(Self::slot_mask(CTLO_UNIQUE_SHIFT, slot), on)
    }

    pub fn slot_indexed(self, slot: usize) -> bool {
        self.0 & Self::slot_mask(CTLO_INDEX_SHIFT, slot) != 0
    }

    pub fn with_slot_indexed(self, slot: usize, on: bool) -> Self {
        self.with(Self::slot_mask(CTLO_INDEX_SHIFT, slot), on)
    }

    pub fn slot_full_text(self, slot: usize) -> bool {
        self.0 & Self::slot_mask(CTLO_FULL_TEXT_SHIFT, slot) != 0
    }

    pub fn with_slot_full_text(self, slot: usize, on: bool) -> Self {
        self.with(Self::slot_mask(CTLO_FULL_TEXT_SHIFT, slot), on)
    }

    /// Flags an object inherits from its class mask (per-slot bits are
    /// class-level only).
    pub fn inherited_by_objects(self) -> Self {
        Self(self.0 & (CTLO_WEAK | CTLO_NO_TRACK_CHANGES))
    }
}

// ── Reference kind ─────────────────────────────────────────────────

/// Reference kind stored in the low 4 bits of `ctlv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum RefKind {
    #[default]
    None = 0,
    /// Plain (non-reference) indexed value.
    Index = 1,
    /// Reference without ownership.
    Link = 2,
    /// Host owns target: deleting host deletes target.
    OwnForward = 3,
    /// Target owns host: deleting target deletes host.
    OwnReverse = 4,
    /// Either side deletes the other.
    OwnMutual = 5,
    /// Target may not be deleted while referenced.
    MasterDependent = 6,
    /// Host may not be deleted while the reference exists.
    LinkDependent = 7,
    /// Neither side may be deleted while the reference exists.
    BothDependent = 8,
}

impl RefKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::None,
            1 => Self::Index,
            2 => Self::Link,
            3 => Self::OwnForward,
            4 => Self::OwnReverse,
            5 => Self::OwnMutual,
            6 => Self::MasterDependent,
            7 => Self::LinkDependent,
            8 => Self::BothDependent,
            _ => {
                return Err(FlexError::InvalidFlags(format!(
                    "reference kind {} is out of range",
                    v
                )))
            }
        })
    }

    /// Whether the value row names another object.
    pub fn is_reference(self) -> bool {
        self as u8 >= Self::Link as u8
    }

    /// References that keep a weak target alive.
    pub fn is_strong(self) -> bool {
        self as u8 >= Self::OwnForward as u8
    }

    /// Deleting the host deletes the target.
    pub fn cascades_forward(self) -> bool {
        matches!(self, Self::OwnForward | Self::OwnMutual)
    }

    /// Deleting the target deletes the host.
    pub fn cascades_reverse(self) -> bool {
        matches!(self, Self::OwnReverse | Self::OwnMutual)
    }

    /// Target cannot be deleted while this reference exists.
    pub fn restricts_target_delete(self) -> bool {
        matches!(self, Self::MasterDependent | Self::BothDependent)
    }

    /// Host cannot be deleted while this reference exists.
    pub fn restricts_host_delete(self) -> bool {
        matches!(self, Self::LinkDependent | Self::BothDependent)
    }
}

// ── Range role ─────────────────────────────────────────────────────

/// Role of a property inside a multi-dimension range (spatial) key.
///
/// `X0`/`X1` are the lower/upper bound of dimension X; `X` covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RangeRole {
    A0 = 1,
    A1 = 2,
    A = 3,
    B0 = 4,
    B1 = 5,
    B = 6,
    C0 = 7,
    C1 = 8,
    C = 9,
    D0 = 10,
    D1 = 11,
    D = 12,
}

impl RangeRole {
    pub const ALL: [RangeRole; 12] = [
        Self::A0, Self::A1, Self::A, Self::B0, Self::B1, Self::B,
        Self::C0, Self::C1, Self::C, Self::D0, Self::D1, Self::D,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get((v as usize).checked_sub(1)?).copied()
    }

    /// Dimension index (0 = A .. 3 = D).
    pub fn dimension(self) -> usize {
        (self as usize - 1) / 3
    }
}

// ── Property flags ─────────────────────────────────────────────────

const CTLV_KIND_MASK: u32 = 0x0F;
const CTLV_FULL_TEXT: u32 = 1 << 4;
const CTLV_RANGE: u32 = 1 << 5;
const CTLV_NO_TRACK_CHANGES: u32 = 1 << 6;
const CTLV_UNIQUE: u32 = 1 << 7;
const CTLV_ROLE_SHIFT: u32 = 8;
const CTLV_ROLE_MASK: u32 = 0x0F << CTLV_ROLE_SHIFT;
const CTLV_KNOWN_MASK: u32 = (1 << 12) - 1;

/// Property-value control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyFlags {
    pub kind: RefKind,
    pub full_text: bool,
    pub range: Option<RangeRole>,
    pub no_track_changes: bool,
    pub unique: bool,
}

impl PropertyFlags {
    pub fn encode(&self) -> u32 {
        let mut bits = self.kind as u32;
        if self.full_text {
            bits |= CTLV_FULL_TEXT;
        }
        if let Some(role) = self.range {
            bits |= CTLV_RANGE | ((role as u32) << CTLV_ROLE_SHIFT);
        }
        if self.no_track_changes {
            bits |= CTLV_NO_TRACK_CHANGES;
        }
        if self.unique {
            bits |= CTLV_UNIQUE;
        }
        bits
    }

    pub fn decode(bits: u32) -> Result<Self> {
        if bits & !CTLV_KNOWN_MASK != 0 {
            return Err(FlexError::InvalidFlags(format!(
                "property flags contain unknown bits: {:#x}",
                bits & !CTLV_KNOWN_MASK
            )));
        }
        let kind = RefKind::from_u8((bits & CTLV_KIND_MASK) as u8)?;
        let role_bits = ((bits & CTLV_ROLE_MASK) >> CTLV_ROLE_SHIFT) as u8;
        let range = match (bits & CTLV_RANGE != 0, role_bits) {
            (false, 0) => None,
            (true, r) => Some(RangeRole::from_u8(r).ok_or_else(|| {
                FlexError::InvalidFlags(format!("range role {} is out of range", r))
            })?),
            (false, r) => {
                return Err(FlexError::InvalidFlags(format!(
                    "range role {} set without range flag",
                    r
                )))
            }
        };
        Ok(Self {
            kind,
            full_text: bits & CTLV_FULL_TEXT != 0,
            range,
            no_track_changes: bits & CTLV_NO_TRACK_CHANGES != 0,
            unique: bits & CTLV_UNIQUE != 0,
        })
    }

    /// Whether this property produces `.ref-values` rows.
    pub fn needs_value_rows(&self) -> bool {
        self.kind != RefKind::None || self.full_text || self.range.is_some() || self.unique
    }

    pub fn is_indexed(&self) -> bool {
        self.kind == RefKind::Index || self.unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_object_flags_known_bits() {
        let f = ObjectFlags::empty()
            .with_weak(true)
            .with_no_track_changes(true)
            .with_schema_not_enforced(true);
        assert_eq!(f.encode(), 1 | (1 << 49) | (1 << 50));
        assert!(f.is_weak());
        assert!(!f.tracks_changes());
        assert!(!f.schema_enforced());
        assert!(!f.has_invalid_data());
    }

    #[test]
    fn test_object_flags_slots() {
        let f = ObjectFlags::empty()
            .with_slot_unique(0, true)
            .with_slot_indexed(15, true)
            .with_slot_full_text(9, true);
        assert!(f.slot_unique(0));
        assert!(!f.slot_unique(1));
        assert!(f.slot_indexed(15));
        assert!(f.slot_full_text(9));
        assert_eq!(f.encode(), (1 << 1) | (1 << 32) | (1 << 42));
    }

    #[test]
    fn test_object_flags_reject_unknown_bits() {
        assert!(ObjectFlags::decode(1 << 60).is_err());
        assert!(ObjectFlags::decode(1 << 51).is_ok());
    }

    #[test]
    fn test_inherited_flags() {
        let mask = ObjectFlags::empty().with_weak(true).with_slot_indexed(2, true);
        assert_eq!(mask.inherited_by_objects(), ObjectFlags::empty().with_weak(true));
    }

    #[test]
    fn test_ref_kind_out_of_range_is_error() {
        for v in 9u8..=15 {
            assert!(RefKind::from_u8(v).is_err(), "kind {} must be rejected", v);
        }
        assert!(PropertyFlags::decode(9).is_err());
        assert!(PropertyFlags::decode(15).is_err());
    }

    #[test]
    fn test_ref_kind_semantics() {
        assert!(!RefKind::Index.is_reference());
        assert!(RefKind::Link.is_reference());
        assert!(!RefKind::Link.is_strong());
        assert!(RefKind::OwnForward.cascades_forward());
        assert!(RefKind::OwnReverse.cascades_reverse());
        assert!(RefKind::OwnMutual.cascades_forward() && RefKind::OwnMutual.cascades_reverse());
        assert!(RefKind::MasterDependent.restricts_target_delete());
        assert!(RefKind::LinkDependent.restricts_host_delete());
        assert!(RefKind::BothDependent.restricts_host_delete());
    }

    #[test]
    fn test_range_role_requires_range_bit() {
        // role B0 without range bit
        assert!(PropertyFlags::decode(4 << 8).is_err());
        // range bit without role
        assert!(PropertyFlags::decode(1 << 5).is_err());
        // role 13 does not exist
        assert!(PropertyFlags::decode((1 << 5) | (13 << 8)).is_err());
        let f = PropertyFlags::decode((1 << 5) | (6 << 8)).unwrap();
        assert_eq!(f.range, Some(RangeRole::B));
        assert_eq!(RangeRole::B.dimension(), 1);
    }

    fn property_flags_strategy() -> impl Strategy<Value = PropertyFlags> {
        (0u8..=8, any::<bool>(), 0u8..=12, any::<bool>(), any::<bool>()).prop_map(
            |(kind, full_text, role, no_track_changes, unique)| PropertyFlags {
                kind: RefKind::from_u8(kind).unwrap(),
                full_text,
                range: RangeRole::from_u8(role),
                no_track_changes,
                unique,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_property_flags_roundtrip(flags in property_flags_strategy()) {
            prop_assert_eq!(PropertyFlags::decode(flags.encode()).unwrap(), flags);
        }

        #[test]
        fn prop_object_flags_roundtrip(bits in 0u64..(1 << 52)) {
            let flags = ObjectFlags::decode(bits).unwrap();
            prop_assert_eq!(flags.encode(), bits);
            prop_assert_eq!(ObjectFlags::decode(flags.encode()).unwrap(), flags);
        }
    }
}
