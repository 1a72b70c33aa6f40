//! Shift/rotate operations with carry-out, per the ARMv6-M pseudocode.
//!
//! Each function returns `(result, carry_out)`. `carry_in` is only consulted
//! when the shift amount is zero, where the architecture defines the shift
//! as a no-op that leaves the carry flag untouched.

pub fn lsl(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        (value, carry_in)
    } else if amount < 32 {
        let carry = (value >> (32 - amount)) & 1 != 0;
        (value << amount, carry)
    } else if amount == 32 {
        (0, value & 1 != 0)
    } else {
        (0, false)
    }
}

pub fn lsr(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        (value, carry_in)
    } else if amount < 32 {
        let carry = (value >> (amount - 1)) & 1 != 0;
        (value >> amount, carry)
    } else if amount == 32 {
        (0, value & 0x8000_0000 != 0)
    } else {
        (0, false)
    }
}

pub fn asr(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    let value = value as i32;
    if amount == 0 {
        (value as u32, carry_in)
    } else if amount < 32 {
        let carry = (value >> (amount - 1)) & 1 != 0;
        ((value >> amount) as u32, carry)
    } else {
        let carry = value < 0;
        (if carry { u32::MAX } else { 0 }, carry)
    }
}

pub fn ror(value: u32, amount: u32, carry_in: bool) -> (u32, bool) {
    if amount == 0 {
        (value, carry_in)
    } else {
        let amount = amount % 32;
        if amount == 0 {
            (value, value & 0x8000_0000 != 0)
        } else {
            let result = value.rotate_right(amount);
            (result, result & 0x8000_0000 != 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsl_by_zero_preserves_carry() {
        assert_eq!(lsl(5, 0, true), (5, true));
        assert_eq!(lsl(5, 0, false), (5, false));
    }

    #[test]
    fn lsl_by_32_reads_bit_zero() {
        assert_eq!(lsl(0b1, 32, false), (0, true));
        assert_eq!(lsl(0b10, 32, false), (0, false));
    }

    #[test]
    fn lsl_past_32_is_zero_no_carry() {
        assert_eq!(lsl(0xFFFF_FFFF, 33, true), (0, false));
    }

    #[test]
    fn lsr_by_amount_reads_last_shifted_bit() {
        assert_eq!(lsr(0b1001, 1, false), (0b100, true));
        assert_eq!(lsr(0b1000_0000_0000_0000_0000_0000_0000_0000, 32, false), (0, true));
    }

    #[test]
    fn asr_sign_extends_and_saturates_past_32() {
        assert_eq!(asr(0x8000_0000, 31, false), (0xFFFF_FFFF, false));
        assert_eq!(asr(0x8000_0000, 33, false), (0xFFFF_FFFF, true));
        assert_eq!(asr(0x7FFF_FFFF, 40, false), (0, false));
    }

    #[test]
    fn ror_by_zero_is_identity_with_preserved_carry() {
        assert_eq!(ror(0x1234, 0, true), (0x1234, true));
    }

    #[test]
    fn ror_rotates_and_carries_top_bit() {
        assert_eq!(ror(0b1, 1, false), (0x8000_0000, true));
    }
}
