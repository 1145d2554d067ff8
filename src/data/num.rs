use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::common::span::Span;
use crate::common::trace::{ErrorKind, Trace};
use crate::data::value::Value;

/// An arbitrary-precision decimal: an unscaled big integer and a
/// scale, denoting `unscaled * 10^(-scale)`.
#[derive(Debug, Clone)]
pub struct BigDec {
    pub unscaled: BigInt,
    pub scale: i64,
}

impl BigDec {
    pub fn new(unscaled: BigInt, scale: i64) -> BigDec {
        BigDec { unscaled, scale }
    }

    pub fn from_int(n: i64) -> BigDec {
        BigDec {
            unscaled: BigInt::from(n),
            scale: 0,
        }
    }

    /// Rescales both operands to the larger scale so their unscaled
    /// parts are directly comparable.
    fn aligned(&self, other: &BigDec) -> (BigInt, BigInt, i64) {
        let scale = self.scale.max(other.scale);
        let a = rescale(&self.unscaled, self.scale, scale);
        let b = rescale(&other.unscaled, other.scale, scale);
        (a, b, scale)
    }

    pub fn add(&self, other: &BigDec) -> BigDec {
        let (a, b, scale) = self.aligned(other);
        BigDec::new(a + b, scale)
    }

    pub fn sub(&self, other: &BigDec) -> BigDec {
        let (a, b, scale) = self.aligned(other);
        BigDec::new(a - b, scale)
    }

    pub fn mul(&self, other: &BigDec) -> BigDec {
        BigDec::new(
            &self.unscaled * &other.unscaled,
            self.scale + other.scale,
        )
    }

    pub fn compare(&self, other: &BigDec) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }

    pub fn to_f64(&self) -> f64 {
        let unscaled = self.unscaled.to_f64().unwrap_or(f64::NAN);
        unscaled * 10f64.powi(-(self.scale as i32))
    }
}

fn rescale(unscaled: &BigInt, from: i64, to: i64) -> BigInt {
    debug_assert!(to >= from);
    let mut scaled = unscaled.clone();
    for _ in from..to {
        scaled *= 10;
    }
    scaled
}

impl PartialEq for BigDec {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for BigDec {}

impl Display for BigDec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.scale <= 0 {
            return write!(f, "{}", rescale(&self.unscaled, self.scale, 0));
        }
        let digits = self.unscaled.abs().to_string();
        let sign = if self.unscaled.is_negative() { "-" } else { "" };
        let scale = self.scale as usize;
        if digits.len() > scale {
            let split = digits.len() - scale;
            write!(f, "{}{}.{}", sign, &digits[..split], &digits[split..])
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

/// The promotion ladder. Mixed-type arithmetic lifts both operands to
/// the wider rank, computes there, and narrows the result back down
/// when it is exactly representable.
enum Num {
    Int(i64),
    Big(BigInt),
    Ratio(BigRational),
    Dec(BigDec),
    Float(f64),
}

impl Num {
    fn rank(&self) -> u8 {
        match self {
            Num::Int(_) => 0,
            Num::Big(_) => 1,
            Num::Ratio(_) => 2,
            Num::Dec(_) => 3,
            Num::Float(_) => 4,
        }
    }

    fn lift(self, rank: u8) -> Num {
        if self.rank() >= rank {
            return self;
        }
        let lifted = match self {
            Num::Int(n) => match rank {
                1 => Num::Big(BigInt::from(n)),
                2 => Num::Ratio(BigRational::from_integer(BigInt::from(n))),
                3 => Num::Dec(BigDec::from_int(n)),
                _ => Num::Float(n as f64),
            },
            Num::Big(n) => match rank {
                2 => Num::Ratio(BigRational::from_integer(n)),
                3 => Num::Dec(BigDec::new(n, 0)),
                _ => Num::Float(n.to_f64().unwrap_or(f64::NAN)),
            },
            Num::Ratio(r) => Num::Float(ratio_to_f64(&r)),
            Num::Dec(d) => Num::Float(d.to_f64()),
            Num::Float(_) => unreachable!("float is the top of the ladder"),
        };
        lifted.lift(rank)
    }
}

fn ratio_to_f64(r: &BigRational) -> f64 {
    let n = r.numer().to_f64().unwrap_or(f64::NAN);
    let d = r.denom().to_f64().unwrap_or(f64::NAN);
    n / d
}

fn classify(value: &Value) -> Result<Num, Trace> {
    match value {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::BigInt(n) => Ok(Num::Big((**n).clone())),
        Value::Ratio(r) => Ok(Num::Ratio((**r).clone())),
        Value::BigDec(d) => Ok(Num::Dec((**d).clone())),
        Value::Float(f) => Ok(Num::Float(*f)),
        other => Err(type_err(other)),
    }
}

fn type_err(value: &Value) -> Trace {
    Trace::error(
        ErrorKind::Type,
        &format!("expected a number, got {}", value.type_key()),
        Span::empty(),
    )
}

fn overflow_err(op: &str) -> Trace {
    Trace::error(
        ErrorKind::Arithmetic,
        &format!("integer overflow in {}", op),
        Span::empty(),
    )
}

fn zero_div_err() -> Trace {
    Trace::error(ErrorKind::Arithmetic, "divide by zero", Span::empty())
}

/// Narrows a big integer back to the fixnum variant when it fits.
/// Keeping this invariant means structural equality never has to
/// unify `Int` and `BigInt` representations of the same number.
pub fn norm_big(n: BigInt) -> Value {
    match n.to_i64() {
        Some(small) => Value::Int(small),
        None => Value::BigInt(Rc::new(n)),
    }
}

/// Ratios are kept in lowest terms by `BigRational` itself;
/// integral ratios collapse further, to `Int` when possible.
pub fn norm_ratio(r: BigRational) -> Value {
    if r.is_integer() {
        norm_big(r.to_integer())
    } else {
        Value::Ratio(Rc::new(r))
    }
}

fn lift_pair(a: &Value, b: &Value) -> Result<(Num, Num), Trace> {
    let (x, y) = (classify(a)?, classify(b)?);
    let mut rank = x.rank().max(y.rank());
    // A ratio meeting a decimal has no exact common representation;
    // both continue up to float.
    if rank == 3 && x.rank().min(y.rank()) == 2 {
        rank = 4;
    }
    Ok((x.lift(rank), y.lift(rank)))
}

/// `+` in the strict domain: fixnum overflow is an error.
pub fn add(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "+", false)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "-", false)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "*", false)
}

/// `+'`: fixnum overflow widens to big-integer instead of raising.
pub fn add_promote(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "+", true)
}

pub fn sub_promote(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "-", true)
}

pub fn mul_promote(a: &Value, b: &Value) -> Result<Value, Trace> {
    binop(a, b, "*", true)
}

fn binop(a: &Value, b: &Value, op: &str, promote: bool) -> Result<Value, Trace> {
    let (x, y) = lift_pair(a, b)?;
    Ok(match (x, y) {
        (Num::Int(a), Num::Int(b)) => {
            let checked = match op {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            match checked {
                Some(n) => Value::Int(n),
                None if promote => {
                    let (a, b) = (BigInt::from(a), BigInt::from(b));
                    norm_big(apply_big(&a, &b, op))
                },
                None => return Err(overflow_err(op)),
            }
        },
        (Num::Big(a), Num::Big(b)) => norm_big(apply_big(&a, &b, op)),
        (Num::Ratio(a), Num::Ratio(b)) => norm_ratio(match op {
            "+" => a + b,
            "-" => a - b,
            _ => a * b,
        }),
        (Num::Dec(a), Num::Dec(b)) => Value::BigDec(Rc::new(match op {
            "+" => a.add(&b),
            "-" => a.sub(&b),
            _ => a.mul(&b),
        })),
        (Num::Float(a), Num::Float(b)) => Value::Float(match op {
            "+" => a + b,
            "-" => a - b,
            _ => a * b,
        }),
        _ => unreachable!("operands lifted to a common rank"),
    })
}

fn apply_big(a: &BigInt, b: &BigInt, op: &str) -> BigInt {
    match op {
        "+" => a + b,
        "-" => a - b,
        _ => a * b,
    }
}

/// `/` is always exact: two integers that divide evenly give an
/// integer, otherwise a ratio; a float operand makes the whole
/// division floating.
pub fn div(a: &Value, b: &Value) -> Result<Value, Trace> {
    let (x, y) = lift_pair(a, b)?;
    Ok(match (x, y) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                return Err(zero_div_err());
            }
            if a % b == 0 {
                Value::Int(a / b)
            } else {
                norm_ratio(BigRational::new(BigInt::from(a), BigInt::from(b)))
            }
        },
        (Num::Big(a), Num::Big(b)) => {
            if b.is_zero() {
                return Err(zero_div_err());
            }
            norm_ratio(BigRational::new(a, b))
        },
        (Num::Ratio(a), Num::Ratio(b)) => {
            if b.is_zero() {
                return Err(zero_div_err());
            }
            norm_ratio(a / b)
        },
        // decimal division is carried out in the float domain
        (Num::Dec(a), Num::Dec(b)) => {
            let b = b.to_f64();
            if b == 0.0 {
                return Err(zero_div_err());
            }
            Value::Float(a.to_f64() / b)
        },
        (Num::Float(a), Num::Float(b)) => Value::Float(a / b),
        _ => unreachable!("operands lifted to a common rank"),
    })
}

/// `mod` follows the divisor's sign.
pub fn mod_op(a: &Value, b: &Value) -> Result<Value, Trace> {
    let (x, y) = lift_pair(a, b)?;
    Ok(match (x, y) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                return Err(zero_div_err());
            }
            let r = a % b;
            Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        },
        (Num::Big(a), Num::Big(b)) => {
            if b.is_zero() {
                return Err(zero_div_err());
            }
            let r = &a % &b;
            if r.is_zero() || r.sign() == b.sign() {
                norm_big(r)
            } else {
                norm_big(r + b)
            }
        },
        (Num::Float(a), Num::Float(b)) => {
            let r = a % b;
            Value::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            })
        },
        (x, _) => {
            return Err(Trace::error(
                ErrorKind::Type,
                &format!("mod is not defined for {}", rank_name(&x)),
                Span::empty(),
            ))
        },
    })
}

/// `rem` follows the dividend's sign (truncating division).
pub fn rem_op(a: &Value, b: &Value) -> Result<Value, Trace> {
    let (x, y) = lift_pair(a, b)?;
    Ok(match (x, y) {
        (Num::Int(a), Num::Int(b)) => {
            if b == 0 {
                return Err(zero_div_err());
            }
            Value::Int(a % b)
        },
        (Num::Big(a), Num::Big(b)) => {
            if b.is_zero() {
                return Err(zero_div_err());
            }
            norm_big(a % b)
        },
        (Num::Float(a), Num::Float(b)) => Value::Float(a % b),
        (x, _) => {
            return Err(Trace::error(
                ErrorKind::Type,
                &format!("rem is not defined for {}", rank_name(&x)),
                Span::empty(),
            ))
        },
    })
}

fn rank_name(n: &Num) -> &'static str {
    match n {
        Num::Int(_) => "integer",
        Num::Big(_) => "big-integer",
        Num::Ratio(_) => "ratio",
        Num::Dec(_) => "big-decimal",
        Num::Float(_) => "float",
    }
}

/// Total order within the numeric tower, coercing along the ladder.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, Trace> {
    let (x, y) = lift_pair(a, b)?;
    Ok(match (x, y) {
        (Num::Int(a), Num::Int(b)) => a.cmp(&b),
        (Num::Big(a), Num::Big(b)) => a.cmp(&b),
        (Num::Ratio(a), Num::Ratio(b)) => a.cmp(&b),
        (Num::Dec(a), Num::Dec(b)) => a.compare(&b),
        (Num::Float(a), Num::Float(b)) => {
            a.partial_cmp(&b).unwrap_or(Ordering::Greater)
        },
        _ => unreachable!("operands lifted to a common rank"),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn division_is_exact() {
        assert_eq!(div(&Value::Int(10), &Value::Int(2)).unwrap(), Value::Int(5));

        let ratio = div(&Value::Int(10), &Value::Int(4)).unwrap();
        match &ratio {
            Value::Ratio(r) => {
                assert_eq!(r.numer(), &BigInt::from(5));
                assert_eq!(r.denom(), &BigInt::from(2));
            },
            other => panic!("expected a ratio, got {:?}", other),
        }

        assert_eq!(
            div(&Value::Float(10.0), &Value::Int(4)).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn zero_division_raises() {
        let err = div(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);
        assert!(err.message.contains("divide by zero"));
    }

    #[test]
    fn strict_overflow_raises_promoting_widens() {
        let max = Value::Int(i64::MAX);
        let err = add(&max, &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arithmetic);

        let widened = add_promote(&max, &Value::Int(1)).unwrap();
        match widened {
            Value::BigInt(n) => {
                assert_eq!(*n, BigInt::from(i64::MAX) + 1)
            },
            other => panic!("expected big-integer, got {:?}", other),
        }
    }

    #[test]
    fn big_results_narrow() {
        let big = Value::BigInt(Rc::new(BigInt::from(i64::MAX) + 1));
        let narrowed = sub(&big, &Value::Int(1)).unwrap();
        assert_eq!(narrowed, Value::Int(i64::MAX));
    }

    #[test]
    fn ratios_collapse_to_integers() {
        let half = div(&Value::Int(1), &Value::Int(2)).unwrap();
        let doubled = mul(&half, &Value::Int(2)).unwrap();
        assert_eq!(doubled, Value::Int(1));
    }

    #[test]
    fn mod_follows_divisor_rem_follows_dividend() {
        assert_eq!(
            mod_op(&Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            mod_op(&Value::Int(7), &Value::Int(-3)).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            rem_op(&Value::Int(-7), &Value::Int(3)).unwrap(),
            Value::Int(-1)
        );
        assert_eq!(
            rem_op(&Value::Int(7), &Value::Int(-3)).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn ladder_comparison() {
        // int vs ratio vs float
        let half = div(&Value::Int(1), &Value::Int(2)).unwrap();
        assert_eq!(
            compare(&Value::Int(1), &half).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            compare(&half, &Value::Float(0.5)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare(&Value::Int(2), &Value::Float(2.5)).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn bigdec_display_and_order() {
        let d = BigDec::new(BigInt::from(1050), 2); // 10.50
        assert_eq!(format!("{}", d), "10.50");
        let e = BigDec::new(BigInt::from(105), 1); // 10.5
        assert_eq!(d.compare(&e), Ordering::Equal);
        assert_eq!(format!("{}", BigDec::new(BigInt::from(5), 3)), "0.005");
    }
}
