//! [BSON 128-bit decimal floating point](https://github.com/mongodb/specifications/blob/master/source/bson-decimal128/decimal128.md)
//! support.

use std::{fmt, str::FromStr};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const EXPONENT_BIAS: i32 = 6176;
const EXPONENT_MIN: i32 = -6176;
const EXPONENT_MAX: i32 = 6111;
const COEFFICIENT_MAX: u128 = 9_999_999_999_999_999_999_999_999_999_999_999; // 10^34 - 1

/// A 128-bit decimal floating point value, stored in its IEEE 754-2008 binary (BID)
/// interchange format. Round-trips through the codec bit-exactly.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    /// The BID bytes in little-endian byte order, exactly as laid out on the wire.
    bytes: [u8; 16],
}

impl Decimal128 {
    /// Constructs a new `Decimal128` from the provided raw byte representation.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Returns the raw byte representation of this `Decimal128`.
    pub const fn bytes(&self) -> [u8; 16] {
        self.bytes
    }

    fn parsed(&self) -> ParsedDecimal128 {
        let bits = u128::from_le_bytes(self.bytes);
        let negative = (bits >> 127) & 1 == 1;

        // Top five combination bits distinguish infinities and NaN.
        let combination = ((bits >> 122) & 0b11111) as u8;
        if combination == 0b11110 {
            return ParsedDecimal128::Infinity { negative };
        }
        if combination == 0b11111 {
            return ParsedDecimal128::Nan;
        }

        let (biased_exponent, coefficient) = if combination >> 3 == 0b11 {
            // Second encoding form: the implicit (100)₂ prefix pushes the coefficient past
            // 10^34 - 1, so it is always non-canonical and reads as zero.
            (((bits >> 111) & 0x3fff) as i32, 0u128)
        } else {
            let coefficient = bits & ((1u128 << 113) - 1);
            (
                ((bits >> 113) & 0x3fff) as i32,
                if coefficient > COEFFICIENT_MAX {
                    0
                } else {
                    coefficient
                },
            )
        };

        ParsedDecimal128::Finite {
            negative,
            exponent: biased_exponent - EXPONENT_BIAS,
            coefficient,
        }
    }

    fn from_parts(negative: bool, exponent: i32, coefficient: u128) -> Self {
        debug_assert!(coefficient <= COEFFICIENT_MAX);
        let mut bits = coefficient;
        bits |= (((exponent + EXPONENT_BIAS) as u128) & 0x3fff) << 113;
        if negative {
            bits |= 1u128 << 127;
        }
        Self::from_bytes(bits.to_le_bytes())
    }
}

enum ParsedDecimal128 {
    Nan,
    Infinity { negative: bool },
    Finite {
        negative: bool,
        exponent: i32,
        coefficient: u128,
    },
}

impl fmt::Display for Decimal128 {
    /// Formats as defined by the decimal128 string conversion rules: plain notation when the
    /// exponent is non-positive and the adjusted exponent is at least -6, scientific notation
    /// otherwise.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.parsed() {
            ParsedDecimal128::Nan => write!(f, "NaN"),
            ParsedDecimal128::Infinity { negative: true } => write!(f, "-Infinity"),
            ParsedDecimal128::Infinity { negative: false } => write!(f, "Infinity"),
            ParsedDecimal128::Finite {
                negative,
                exponent,
                coefficient,
            } => {
                if negative {
                    write!(f, "-")?;
                }

                let digits = coefficient.to_string();
                let adjusted = exponent + digits.len() as i32 - 1;

                if exponent > 0 || adjusted < -6 {
                    // Scientific notation.
                    write!(f, "{}", &digits[..1])?;
                    if digits.len() > 1 {
                        write!(f, ".{}", &digits[1..])?;
                    }
                    write!(f, "E")?;
                    if adjusted >= 0 {
                        write!(f, "+")?;
                    }
                    write!(f, "{}", adjusted)
                } else if exponent == 0 {
                    write!(f, "{}", digits)
                } else {
                    let point = digits.len() as i32 + exponent;
                    if point <= 0 {
                        write!(f, "0.")?;
                        for _ in 0..-point {
                            write!(f, "0")?;
                        }
                        write!(f, "{}", digits)
                    } else {
                        let (int_part, frac_part) = digits.split_at(point as usize);
                        write!(f, "{}.{}", int_part, frac_part)
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Decimal128(\"{}\")", self)
    }
}

impl FromStr for Decimal128 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let err = || Error::invalid_argument(format!("invalid decimal128 string: {:?}", s));

        let mut rest = s;
        let mut negative = false;
        if let Some(stripped) = rest.strip_prefix('-') {
            negative = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        }

        match rest.to_ascii_lowercase().as_str() {
            "nan" => {
                let mut bytes = [0u8; 16];
                bytes[15] = 0x7c;
                return Ok(Self::from_bytes(bytes));
            }
            "inf" | "infinity" => {
                let mut bytes = [0u8; 16];
                bytes[15] = if negative { 0xf8 } else { 0x78 };
                return Ok(Self::from_bytes(bytes));
            }
            _ => {}
        }

        let (mantissa, exp_str) = match rest.find(['e', 'E']) {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };
        let mut exponent: i32 = match exp_str {
            Some(e) => e.parse().map_err(|_| err())?,
            None => 0,
        };

        let (int_part, frac_part) = match mantissa.find('.') {
            Some(idx) => (&mantissa[..idx], &mantissa[idx + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(err());
        }

        exponent = exponent
            .checked_sub(frac_part.len() as i32)
            .ok_or_else(err)?;

        let mut digits = format!("{}{}", int_part, frac_part);
        let trimmed = digits.trim_start_matches('0');
        digits = if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        };

        if digits.len() > 34 {
            return Err(Error::invalid_argument(format!(
                "decimal128 coefficient has more than 34 digits: {:?}",
                s
            )));
        }
        let mut coefficient: u128 = digits.parse().map_err(|_| err())?;

        // Zeros absorb exponent adjustments freely; non-zero values can be scaled up while the
        // coefficient still fits in 34 digits.
        while exponent > EXPONENT_MAX {
            let scaled = coefficient.checked_mul(10).filter(|c| *c <= COEFFICIENT_MAX);
            match scaled {
                Some(c) => {
                    coefficient = c;
                    exponent -= 1;
                }
                None => return Err(err()),
            }
        }
        while exponent < EXPONENT_MIN {
            if coefficient % 10 == 0 {
                coefficient /= 10;
                exponent += 1;
            } else {
                return Err(err());
            }
        }

        Ok(Self::from_parts(negative, exponent, coefficient))
    }
}

impl Serialize for Decimal128 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$numberDecimal", &self.to_string())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Decimal128 {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Decimal128, D::Error> {
        #[derive(Deserialize)]
        struct Decimal128Helper {
            #[serde(rename = "$numberDecimal")]
            value: String,
        }
        let helper = Decimal128Helper::deserialize(deserializer)?;
        Decimal128::from_str(&helper.value).map_err(|e| D::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::Decimal128;

    fn round_trip(s: &str) {
        assert_eq!(Decimal128::from_str(s).unwrap().to_string(), s);
    }

    #[test]
    fn string_round_trips() {
        round_trip("0");
        round_trip("1");
        round_trip("-1");
        round_trip("12345678901234567");
        round_trip("0.001234");
        round_trip("1.000000000000000000000000000000000E+6144");
        round_trip("9.999999999999999999999999999999999E+6144");
        round_trip("1E-6176");
        round_trip("NaN");
        round_trip("Infinity");
        round_trip("-Infinity");
    }

    #[test]
    fn scientific_threshold() {
        // Adjusted exponent below -6 switches to scientific notation.
        assert_eq!(
            Decimal128::from_str("0.000000001").unwrap().to_string(),
            "1E-9"
        );
        assert_eq!(Decimal128::from_str("0.000001").unwrap().to_string(), "0.000001");
    }

    #[test]
    fn too_many_digits_rejected() {
        assert!(Decimal128::from_str("99999999999999999999999999999999999").is_err());
    }
}
