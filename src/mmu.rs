//! Virtual-to-physical address resolution (C2).
//!
//! Kernel-unmapped windows (`kseg0`/`kseg1`) translate by a fixed mask; the
//! mapped windows (`kuseg`, `kseg2`/`kseg3`) walk the 32-entry software TLB
//! owned by [`crate::state::Cop0`].

use crate::error::GuestException;
use crate::state::Cop0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessKind {
    Load,
    Store,
    Fetch,
}

const KSEG0_BASE: u64 = 0x8000_0000;
const KSEG1_BASE: u64 = 0xA000_0000;
const KSEG2_BASE: u64 = 0xC000_0000;

/// Translates a 32-bit-compatibility-mode guest virtual address to a
/// physical one, raising the appropriate [`GuestException`] on a TLB miss,
/// an invalid entry, or (for stores) a clean entry.
pub fn resolve(cop0: &Cop0, vaddr: u64, access: AccessKind) -> Result<u64, GuestException> {
    let vaddr = vaddr & 0xFFFF_FFFF;

    if vaddr < KSEG0_BASE {
        return tlb_lookup(cop0, vaddr, access);
    }
    if vaddr < KSEG1_BASE {
        return Ok(vaddr - KSEG0_BASE);
    }
    if vaddr < KSEG2_BASE {
        return Ok(vaddr - KSEG1_BASE);
    }
    tlb_lookup(cop0, vaddr, access)
}

fn tlb_lookup(cop0: &Cop0, vaddr: u64, access: AccessKind) -> Result<u64, GuestException> {
    let asid = cop0.asid();

    for entry in cop0.tlb.iter() {
        let page_mask = entry.page_mask & 0x01FF_E000;
        let vpn2_mask = !(page_mask | 0x1FFF);
        let entry_vpn2 = entry.entry_hi & vpn2_mask;
        let this_vpn2 = vaddr & vpn2_mask;

        if entry_vpn2 != this_vpn2 {
            continue;
        }
        if !entry.global && entry.asid != asid {
            continue;
        }

        let odd_page = vaddr & (page_mask | 0x1000) != 0;
        let entry_lo = if odd_page {
            entry.entry_lo1
        } else {
            entry.entry_lo0
        };

        let valid = entry_lo & 0b10 != 0;
        if !valid {
            return Err(GuestException::TlbInvalid { bad_vaddr: vaddr });
        }

        if access == AccessKind::Store {
            let dirty = entry_lo & 0b100 != 0;
            if !dirty {
                return Err(GuestException::TlbModified { bad_vaddr: vaddr });
            }
        }

        let pfn = (entry_lo >> 6) & 0x00FF_FFFF;
        let offset = vaddr & (page_mask | 0x0FFF);
        let physical = (pfn << 12) & !(page_mask << 12) | offset;
        return Ok(physical & 0xFFFF_FFFF);
    }

    Err(GuestException::TlbMiss { bad_vaddr: vaddr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Cop0;

    #[test]
    fn kseg0_translates_by_fixed_mask() {
        let cop0 = Cop0::new();
        assert_eq!(resolve(&cop0, 0x8000_1000, AccessKind::Fetch).unwrap(), 0x1000);
    }

    #[test]
    fn kseg1_translates_by_fixed_mask() {
        let cop0 = Cop0::new();
        assert_eq!(resolve(&cop0, 0xA000_2000, AccessKind::Load).unwrap(), 0x2000);
    }

    #[test]
    fn unmapped_mapped_region_is_tlb_miss() {
        let cop0 = Cop0::new();
        let err = resolve(&cop0, 0xC000_0000, AccessKind::Load).unwrap_err();
        assert_eq!(err, GuestException::TlbMiss { bad_vaddr: 0xC000_0000 });
    }

    #[test]
    fn matching_tlb_entry_resolves() {
        let mut cop0 = Cop0::new();
        cop0.write_reg(10, 0x0000_0000_C000_0000); // entry_hi: vpn2, asid 0
        cop0.write_reg(2, 0x0000_0000_0000_0003); // entry_lo0: pfn 0, v=1,d=1
        cop0.write_reg(3, 0x0000_0000_0000_0003); // entry_lo1
        cop0.tlb_write(0);
        assert_eq!(resolve(&cop0, 0xC000_0004, AccessKind::Load).unwrap(), 4);
    }

    #[test]
    fn store_to_clean_page_is_modified_fault() {
        let mut cop0 = Cop0::new();
        cop0.write_reg(10, 0x0000_0000_C000_0000);
        cop0.write_reg(2, 0x0000_0000_0000_0002); // v=1, d=0
        cop0.write_reg(3, 0x0000_0000_0000_0002);
        cop0.tlb_write(0);
        let err = resolve(&cop0, 0xC000_0000, AccessKind::Store).unwrap_err();
        assert_eq!(err, GuestException::TlbModified { bad_vaddr: 0xC000_0000 });
    }
}
