//! # Vat Slots
//!
//! Classification of vat-local references ("vrefs").
//!
//! Format: `<type><allocator><id>[/<subid>]`
//! - type: `o` object, `p` promise, `d` device
//! - allocator: `+` allocated by this vat (exports), `-` allocated elsewhere (imports)
//! - a `/<subid>` suffix marks a virtual object: `id` is its kind, `subid` its instance
//!
//! Examples: `o-4` (imported object), `o+12` (exported remotable),
//! `o+5/3` (third instance of virtual kind 5).

use crate::{VomError, VomResult};
use std::fmt;

/// What a vref refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotType {
    Object,
    Promise,
    Device,
}

impl SlotType {
    const fn prefix(self) -> char {
        match self {
            Self::Object => 'o',
            Self::Promise => 'p',
            Self::Device => 'd',
        }
    }
}

/// A parsed vref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VatSlot {
    pub slot_type: SlotType,
    pub allocated_by_vat: bool,
    pub id: u64,
    pub sub_id: Option<u64>,
}

impl VatSlot {
    /// A virtual object vref (has an instance sub id).
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.sub_id.is_some()
    }

    /// An object that came from another vat.
    #[must_use]
    pub fn is_import(&self) -> bool {
        self.slot_type == SlotType::Object && !self.allocated_by_vat
    }

    /// An object that is virtual or imported. These are the objects whose
    /// identity survives the loss of any in-memory handle, so containers key
    /// them by vref instead of by handle.
    #[must_use]
    pub fn is_durably_keyed(&self) -> bool {
        self.slot_type == SlotType::Object && (self.is_virtual() || !self.allocated_by_vat)
    }
}

impl fmt::Display for VatSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.allocated_by_vat { '+' } else { '-' };
        write!(f, "{}{}{}", self.slot_type.prefix(), sign, self.id)?;
        if let Some(sub) = self.sub_id {
            write!(f, "/{}", sub)?;
        }
        Ok(())
    }
}

/// Parse a vref.
pub fn parse_vat_slot(vref: &str) -> VomResult<VatSlot> {
    let invalid = || VomError::InvalidSlot(vref.to_string());
    let mut chars = vref.chars();
    let slot_type = match chars.next() {
        Some('o') => SlotType::Object,
        Some('p') => SlotType::Promise,
        Some('d') => SlotType::Device,
        _ => return Err(invalid()),
    };
    let allocated_by_vat = match chars.next() {
        Some('+') => true,
        Some('-') => false,
        _ => return Err(invalid()),
    };
    let rest = chars.as_str();
    let (id_part, sub_part) = match rest.split_once('/') {
        Some((id, sub)) => (id, Some(sub)),
        None => (rest, None),
    };
    let id = parse_nat(id_part).ok_or_else(invalid)?;
    let sub_id = match sub_part {
        Some(sub) => Some(parse_nat(sub).ok_or_else(invalid)?),
        None => None,
    };
    if sub_id.is_some() && !(slot_type == SlotType::Object && allocated_by_vat) {
        // only this vat's objects can be virtual
        return Err(invalid());
    }
    Ok(VatSlot {
        slot_type,
        allocated_by_vat,
        id,
        sub_id,
    })
}

/// Build a vref string.
#[must_use]
pub fn make_vat_slot(slot_type: SlotType, allocated_by_vat: bool, id: u64) -> String {
    VatSlot {
        slot_type,
        allocated_by_vat,
        id,
        sub_id: None,
    }
    .to_string()
}

/// Build the vref of instance `instance` of virtual kind `kind_id`.
#[must_use]
pub fn make_virtual_slot(kind_id: u64, instance: u64) -> String {
    VatSlot {
        slot_type: SlotType::Object,
        allocated_by_vat: true,
        id: kind_id,
        sub_id: Some(instance),
    }
    .to_string()
}

fn parse_nat(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// =============================================================================
// TESTS
// =============================================================================
