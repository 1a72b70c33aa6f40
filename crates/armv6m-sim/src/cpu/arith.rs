//! 33-bit add/subtract with carry and overflow, shared by every ADD/SUB/CMP
//! variant in the decoder.

pub struct AddResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
}

/// `a + b + carry_in`, widened to 33 bits to derive the carry-out, with the
/// overflow flag set when both operands share a sign that the result does not.
pub fn add_with_carry(a: u32, b: u32, carry_in: bool) -> AddResult {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    let carry = wide > u32::MAX as u64;
    let overflow = ((a ^ result) & (b ^ result)) & 0x8000_0000 != 0;
    AddResult { result, carry, overflow }
}

/// `a - b`, expressed as `a + !b + 1` so the same carry/overflow rules apply;
/// carry set means "no borrow occurred".
pub fn sub(a: u32, b: u32) -> AddResult {
    add_with_carry(a, !b, true)
}

/// `a - b - !carry_in` (SBC), where `carry_in` is the current C flag.
pub fn sbc(a: u32, b: u32, carry_in: bool) -> AddResult {
    add_with_carry(a, !b, carry_in)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_on_unsigned_wrap() {
        let r = add_with_carry(0xFFFF_FFFF, 1, false);
        assert_eq!(r.result, 0);
        assert!(r.carry);
        assert!(!r.overflow);
    }

    #[test]
    fn add_sets_overflow_on_signed_wrap() {
        let r = add_with_carry(0x7FFF_FFFF, 1, false);
        assert_eq!(r.result, 0x8000_0000);
        assert!(!r.carry);
        assert!(r.overflow);
    }

    #[test]
    fn sub_no_borrow_sets_carry() {
        let r = sub(5, 3);
        assert_eq!(r.result, 2);
        assert!(r.carry);
        assert!(!r.overflow);
    }

    #[test]
    fn sub_borrow_clears_carry() {
        let r = sub(0, 1);
        assert_eq!(r.result, 0xFFFF_FFFF);
        assert!(!r.carry);
    }

    #[test]
    fn sbc_with_no_incoming_carry_subtracts_one_more() {
        let r = sbc(5, 3, false);
        assert_eq!(r.result, 1);
    }
}
