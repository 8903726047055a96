//! The 8-byte boxed value encoding.
//!
//! Every value the guest holds is a little-endian `f64` bit pattern:
//! all-zero means undefined, any non-NaN double is a number, and a NaN
//! with high word `0x7FF80000 | tag` is a reference whose low word is the
//! handle id.

use crate::abi::NAN_HEAD;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxedValue {
    Undefined,
    Number(f64),
    Ref { id: u32, tag: u32 },
}

impl BoxedValue {
    pub fn decode(bits: u64) -> Self {
        let n = f64::from_bits(bits);
        // -0.0 compares equal to zero and also reads back as undefined.
        if n == 0.0 {
            return Self::Undefined;
        }
        if !n.is_nan() {
            return Self::Number(n);
        }
        let high = (bits >> 32) as u32;
        Self::Ref {
            id: bits as u32,
            tag: high & !NAN_HEAD,
        }
    }

    pub fn encode(self) -> u64 {
        match self {
            Self::Undefined => 0,
            Self::Number(n) => n.to_bits(),
            Self::Ref { id, tag } => (u64::from(NAN_HEAD | tag) << 32) | u64::from(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_undefined_and_numbers() {
        assert_eq!(BoxedValue::decode(0), BoxedValue::Undefined);
        assert_eq!(BoxedValue::decode((-0.0f64).to_bits()), BoxedValue::Undefined);
        assert_eq!(
            BoxedValue::decode(42.5f64.to_bits()),
            BoxedValue::Number(42.5)
        );
        assert_eq!(
            BoxedValue::decode(f64::INFINITY.to_bits()),
            BoxedValue::Number(f64::INFINITY)
        );
    }

    #[test]
    fn test_reference_layout() {
        let bits = BoxedValue::Ref { id: 6, tag: 1 }.encode();
        assert_eq!(bits, 0x7FF8_0001_0000_0006);
        assert_eq!(BoxedValue::decode(bits), BoxedValue::Ref { id: 6, tag: 1 });

        // The canonical NaN is a reference to slot 0.
        assert_eq!(
            BoxedValue::decode(0x7FF8_0000_0000_0000),
            BoxedValue::Ref { id: 0, tag: 0 }
        );
    }
}
