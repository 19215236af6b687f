//! Fixed-width two's-complement conversions and bit-field access on 16-bit words.
//!
//! Bits are numbered the hardware way: bit 15 is the most significant. Every field request is
//! an inclusive `high..=low` range, so `extract_field(w, 15, 12, false)` is the opcode.

use thiserror::Error;

/// Width of a machine word.
pub const WORD_BITS: u32 = 16;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("value {value} does not fit in {width} {} bits", signedness(.signed))]
    Overflow { value: i64, width: u32, signed: bool },
    #[error("invalid digit `{digit}` for radix {radix}")]
    InvalidDigit { digit: char, radix: u32 },
    #[error("expected at least one digit")]
    Empty,
}

fn signedness(signed: &bool) -> &'static str {
    if *signed {
        "signed"
    } else {
        "unsigned"
    }
}

#[inline]
fn check_width(width: u32) {
    assert!(
        width > 0 && width <= WORD_BITS,
        "field width {width} is outside 1..={WORD_BITS}"
    );
}

#[inline]
fn check_range(high: u32, low: u32) {
    assert!(
        low <= high && high < WORD_BITS,
        "bit range {high}..={low} is not inside a word"
    );
}

#[inline]
fn mask(width: u32) -> u16 {
    ((1u32 << width) - 1) as u16
}

/// Smallest and largest value representable in `width` bits.
pub fn bounds(width: u32, signed: bool) -> (i64, i64) {
    check_width(width);
    if signed {
        (-(1i64 << (width - 1)), (1i64 << (width - 1)) - 1)
    } else {
        (0, (1i64 << width) - 1)
    }
}

pub fn fits(value: i64, width: u32, signed: bool) -> bool {
    let (min, max) = bounds(width, signed);
    (min..=max).contains(&value)
}

/// Replicate bit `bits - 1` of `val` into every higher bit.
#[inline]
pub fn sign_extend(val: u16, bits: u32) -> u16 {
    check_width(bits);
    if bits == WORD_BITS {
        return val;
    }
    // Sign bit
    let sign = val & (1u16 << (bits - 1));
    // Bits lower than sign bit
    let magnitude = val & mask(bits);
    // Positive input: all bits unset; 0x0000
    // Negative input: sign bit and above will be set, lower bits will be reset
    //      Eg. bits=14 -> 0xE000
    let sign_extension = (!sign).wrapping_add(1); // sign * -1
    magnitude | sign_extension
}

/// Pack `value` into the low `width` bits, failing if it is not representable with the given
/// signedness.
pub fn encode(value: i64, width: u32, signed: bool) -> Result<u16, CodecError> {
    if !fits(value, width, signed) {
        return Err(CodecError::Overflow {
            value,
            width,
            signed,
        });
    }
    Ok(value as u16 & mask(width))
}

/// Interpret the low `width` bits of `bits`, sign-extending when `signed`.
pub fn decode(bits: u16, width: u32, signed: bool) -> i32 {
    check_width(width);
    let raw = bits & mask(width);
    if signed {
        sign_extend(raw, width) as i16 as i32
    } else {
        raw as i32
    }
}

/// Two's-complement pattern of a signed `value` in exactly `width` bits.
pub fn to_unsigned_width(value: i32, width: u32) -> Result<u16, CodecError> {
    encode(value.into(), width, true)
}

/// Signed reading of a `width`-bit pattern. The pattern itself must fit in `width` bits.
pub fn to_signed_width(bits: u16, width: u32) -> Result<i32, CodecError> {
    if !fits(bits.into(), width, false) {
        return Err(CodecError::Overflow {
            value: bits.into(),
            width,
            signed: false,
        });
    }
    Ok(decode(bits, width, true))
}

/// Bits `high..=low` of `word`, shifted down. Sign-extended to the full word when `signed`.
pub fn extract_field(word: u16, high: u32, low: u32, signed: bool) -> u16 {
    check_range(high, low);
    let width = high - low + 1;
    let raw = (word >> low) & mask(width);
    if signed {
        sign_extend(raw, width)
    } else {
        raw
    }
}

/// Overwrite bits `high..=low` of `word` with the low bits of `value`.
pub fn insert_field(word: u16, high: u32, low: u32, value: u16) -> u16 {
    check_range(high, low);
    let width = high - low + 1;
    let field = mask(width) << low;
    (word & !field) | ((value << low) & field)
}

/// Accumulate digits of the given radix. No prefix or sign handling.
pub(crate) fn parse_digits(digits: &str, radix: u32) -> Result<i64, CodecError> {
    if digits.is_empty() {
        return Err(CodecError::Empty);
    }
    let mut value: i64 = 0;
    for digit in digits.chars() {
        let Some(d) = digit.to_digit(radix) else {
            return Err(CodecError::InvalidDigit { digit, radix });
        };
        value = value
            .checked_mul(radix.into())
            .and_then(|v| v.checked_add(d.into()))
            .ok_or(CodecError::Overflow {
                value: i64::MAX,
                width: 64,
                signed: true,
            })?;
    }
    Ok(value)
}

/// Decode a string of `0`/`1` characters. With `signed`, the leading character is the sign bit.
pub fn from_bits(bits: &str, signed: bool) -> Result<i32, CodecError> {
    let value = parse_digits(bits, 2)?;
    let width = bits.len() as u32;
    if width > WORD_BITS {
        return Err(CodecError::Overflow {
            value,
            width: WORD_BITS,
            signed,
        });
    }
    Ok(decode(value as u16, width, signed))
}

/// Parse a word written in hex, with or without an `x`/`0x` prefix.
pub fn parse_hex(s: &str) -> Result<u16, CodecError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix(['x', 'X']))
        .unwrap_or(s);
    let value = parse_digits(digits, 16)?;
    encode(value, WORD_BITS, false)
}

/// Parse a word written as up to 16 binary digits.
pub fn parse_bin(s: &str) -> Result<u16, CodecError> {
    let value = parse_digits(s, 2)?;
    encode(value, WORD_BITS, false)
}

/// `x3000` style, as written in assembly source.
pub fn to_hex(word: u16) -> String {
    format!("x{word:04X}")
}

pub fn to_bin(word: u16) -> String {
    format!("{word:016b}")
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn s_ext() {
        #[rustfmt::skip]
        let cases: &[(_, &[_])] = &[
            // (input, [bits...])
            //           15      14      13      12      11      10      9       8       7       6       5       4       3       2       1
            (0x0000, &[0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000]),
            (0x0001, &[0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0x0001, 0xffff]),
            (0x00ff, &[0x00ff, 0x00ff, 0x00ff, 0x00ff, 0x00ff, 0x00ff, 0x00ff, 0xffff, 0xffff]),
            (0x0100, &[0x0100, 0x0100, 0x0100, 0x0100, 0x0100, 0x0100, 0xff00, 0x0000, 0x0000]),
            (0x01ff, &[0x01ff, 0x01ff, 0x01ff, 0x01ff, 0x01ff, 0x01ff, 0xffff, 0xffff, 0xffff]),
            (0x0300, &[0x0300, 0x0300, 0x0300, 0x0300, 0x0300, 0xff00, 0xff00, 0x0000, 0x0000]),
            (0x03ff, &[0x03ff, 0x03ff, 0x03ff, 0x03ff, 0x03ff, 0xffff, 0xffff, 0xffff, 0xffff]),
            (0x0400, &[0x0400, 0x0400, 0x0400, 0x0400, 0xfc00, 0x0000, 0x0000, 0x0000, 0x0000]),
            (0x04ff, &[0x04ff, 0x04ff, 0x04ff, 0x04ff, 0xfcff, 0x00ff, 0x00ff, 0xffff, 0xffff]),
            (0x0700, &[0x0700, 0x0700, 0x0700, 0x0700, 0xff00, 0xff00, 0xff00, 0x0000, 0x0000]),
            (0x07ff, &[0x07ff, 0x07ff, 0x07ff, 0x07ff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff]),
            (0x0fff, &[0x0fff, 0x0fff, 0x0fff, 0xffff, 0xffff]),
            (0x1000, &[0x1000, 0x1000, 0xf000, 0x0000, 0x0000]),
            (0x1fff, &[0x1fff, 0x1fff, 0xffff, 0xffff, 0xffff]),
            (0x3000, &[0x3000, 0xf000, 0xf000, 0x0000, 0x0000]),
            (0x3fff, &[0x3fff, 0xffff, 0xffff, 0xffff, 0xffff]),
            (0x7000, &[0xf000, 0xf000, 0xf000, 0x0000, 0x0000]),
            (0x7fff, &[0xffff, 0xffff, 0xffff, 0xffff, 0xffff]),
            (0xfffe, &[0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0xfffe, 0x0000]),
            (0xffff, &[0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff, 0xffff]),
        ];

        for (input, expecteds) in cases {
            for (i, expected) in expecteds.iter().enumerate() {
                let bits = 15 - i as u32;
                let actual = sign_extend(*input, bits);
                assert_eq!(
                    actual, *expected,
                    "sign_extend(0x{input:04x}, {bits}) == 0x{actual:04x}"
                );
            }
        }
    }

    #[test]
    fn s_ext_full_width_is_identity() {
        assert_eq!(sign_extend(0x8000, 16), 0x8000);
        assert_eq!(sign_extend(0x1234, 16), 0x1234);
    }

    #[rstest]
    #[case(5, 5, 0b00101)]
    #[case(-1, 5, 0b11111)]
    #[case(-16, 5, 0b10000)]
    #[case(15, 5, 0b01111)]
    #[case(-256, 9, 0x100)]
    #[case(-1, 16, 0xFFFF)]
    fn signed_patterns(#[case] value: i32, #[case] width: u32, #[case] bits: u16) {
        assert_eq!(to_unsigned_width(value, width), Ok(bits));
        assert_eq!(to_signed_width(bits, width), Ok(value));
    }

    #[rstest]
    #[case(16, 5)]
    #[case(-17, 5)]
    #[case(256, 9)]
    #[case(32768, 16)]
    fn signed_overflow(#[case] value: i32, #[case] width: u32) {
        assert!(matches!(
            to_unsigned_width(value, width),
            Err(CodecError::Overflow { signed: true, .. })
        ));
    }

    #[test]
    fn unsigned_bounds() {
        assert_eq!(encode(255, 8, false), Ok(0xFF));
        assert!(encode(256, 8, false).is_err());
        assert!(encode(-1, 3, false).is_err());
        assert_eq!(encode(65535, 16, false), Ok(0xFFFF));
        assert!(to_signed_width(0b100000, 5).is_err());
    }

    #[test]
    fn fields() {
        let word = 0x1025; // ADD R0, R0, #5
        assert_eq!(extract_field(word, 15, 12, false), 0b0001);
        assert_eq!(extract_field(word, 11, 9, false), 0);
        assert_eq!(extract_field(word, 5, 5, false), 1);
        assert_eq!(extract_field(word, 4, 0, true), 5);
        assert_eq!(extract_field(0x127F, 4, 0, true), 0xFFFF);
        assert_eq!(extract_field(0x07FB, 8, 0, true) as i16, -5);

        let mut built = insert_field(0, 15, 12, 0b0001);
        built = insert_field(built, 5, 5, 1);
        built = insert_field(built, 4, 0, 5);
        assert_eq!(built, word);
        // Only the low bits of the value land in the field
        assert_eq!(insert_field(0xFFFF, 8, 6, 0xFFF8), 0xFE3F);
    }

    #[test]
    #[should_panic]
    fn zero_width_field() {
        extract_field(0, 3, 4, false);
    }

    #[test]
    #[should_panic]
    fn field_past_msb() {
        insert_field(0, 16, 12, 1);
    }

    #[test]
    fn string_views() {
        assert_eq!(to_hex(0x3000), "x3000");
        assert_eq!(to_hex(0xf025), "xF025");
        assert_eq!(to_bin(0x1025), "0001000000100101");
        assert_eq!(parse_hex("x3000"), Ok(0x3000));
        assert_eq!(parse_hex("0xFe00"), Ok(0xFE00));
        assert_eq!(parse_hex("ffff"), Ok(0xFFFF));
        assert!(matches!(parse_hex("x10000"), Err(CodecError::Overflow { .. })));
        assert_eq!(
            parse_hex("x3g"),
            Err(CodecError::InvalidDigit {
                digit: 'g',
                radix: 16
            })
        );
        assert_eq!(parse_hex("x"), Err(CodecError::Empty));
        assert_eq!(parse_bin("0001000000100101"), Ok(0x1025));
        assert_eq!(from_bits("11111", true), Ok(-1));
        assert_eq!(from_bits("11111", false), Ok(31));
        assert_eq!(from_bits("0111", true), Ok(7));
        assert!(from_bits("10000000000000000", false).is_err());
    }

    proptest! {
        #[test]
        fn signed_round_trip(width in 1u32..=16, seed in any::<i32>()) {
            let (min, max) = bounds(width, true);
            let value = (min + (seed as i64).rem_euclid(max - min + 1)) as i32;
            let bits = to_unsigned_width(value, width).unwrap();
            prop_assert_eq!(to_signed_width(bits, width).unwrap(), value);
        }

        #[test]
        fn insert_then_extract(
            word in any::<u16>(),
            low in 0u32..16,
            span in 0u32..16,
            value in any::<u16>(),
        ) {
            let high = (low + span).min(15);
            let inserted = insert_field(word, high, low, value);
            let width = high - low + 1;
            prop_assert_eq!(extract_field(inserted, high, low, false), value & mask(width));
            // Bits outside the field are untouched
            let outside = !(mask(width) << low);
            prop_assert_eq!(inserted & outside, word & outside);
        }
    }
}
