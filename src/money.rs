//! Fixed-point money and percentage primitives
//!
//! Amounts are integer minor units (two decimal places), never floats.
//! Every percentage application in the crate goes through [`Percent::apply_to`],
//! which rounds half to even, so derived figures close exactly:
//! `retention + net_payable == amount` for all inputs.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A monetary amount in minor units (hundredths).
///
/// The type itself is signed; positivity is a domain rule enforced where
/// amounts enter the system, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[error("malformed decimal amount: {0}")]
    Malformed(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    /// Parses decimal strings such as `"1234"`, `"1234.5"` or `"-1234.56"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = rest.split_once('.').unwrap_or((rest, ""));

        if whole.is_empty()
            || whole.bytes().any(|b| !b.is_ascii_digit())
            || frac.len() > 2
            || frac.bytes().any(|b| !b.is_ascii_digit())
        {
            return Err(MoneyError::Malformed(s.to_string()));
        }

        let whole: i64 = whole
            .parse()
            .map_err(|_| MoneyError::OutOfRange(s.to_string()))?;
        let frac_minor: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().expect("digits checked above") * 10,
            _ => frac.parse().expect("digits checked above"),
        };

        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_minor))
            .ok_or_else(|| MoneyError::OutOfRange(s.to_string()))?;

        Ok(Money(if negative { -minor } else { minor }))
    }
}

/// A percentage in basis points, bounded to the 0..=100.00% range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(u32);

pub const MAX_BASIS_POINTS: u32 = 10_000;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PercentError {
    #[error("percentage out of the 0-100 range: {0} basis points")]
    OutOfRange(u32),
    #[error("malformed percentage: {0}")]
    Malformed(String),
}

impl Percent {
    pub const ZERO: Percent = Percent(0);

    pub fn from_basis_points(bp: u32) -> Result<Self, PercentError> {
        if bp > MAX_BASIS_POINTS {
            return Err(PercentError::OutOfRange(bp));
        }
        Ok(Percent(bp))
    }

    pub fn from_whole(pct: u32) -> Result<Self, PercentError> {
        Self::from_basis_points(pct.saturating_mul(100))
    }

    pub fn basis_points(&self) -> u32 {
        self.0
    }

    /// Applies the percentage to an amount, rounding half to even.
    ///
    /// This is the single rounding site for retention and derived amounts.
    pub fn apply_to(&self, amount: Money) -> Money {
        let n = amount.minor() as i128 * self.0 as i128;
        // |result| <= |amount|, so the narrowing back to i64 cannot lose range
        Money::from_minor(div_round_half_even(n, MAX_BASIS_POINTS as i128) as i64)
    }

    /// Expresses `part` as a percentage of `whole`, in basis points with the
    /// same rounding rule. `None` when `whole` is not positive, `part` is
    /// negative, or the ratio exceeds 100%.
    pub fn ratio_of(part: Money, whole: Money) -> Option<Percent> {
        if !whole.is_positive() || part < Money::ZERO {
            return None;
        }
        let bp = div_round_half_even(
            part.minor() as i128 * MAX_BASIS_POINTS as i128,
            whole.minor() as i128,
        );
        u32::try_from(bp)
            .ok()
            .and_then(|bp| Percent::from_basis_points(bp).ok())
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "{whole}")
        } else if frac % 10 == 0 {
            write!(f, "{whole}.{}", frac / 10)
        } else {
            write!(f, "{whole}.{frac:02}")
        }
    }
}

impl FromStr for Percent {
    type Err = PercentError;

    /// Parses percentage strings such as `"10"`, `"2.5"` or `"0.25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));

        if whole.is_empty()
            || whole.bytes().any(|b| !b.is_ascii_digit())
            || frac.len() > 2
            || frac.bytes().any(|b| !b.is_ascii_digit())
        {
            return Err(PercentError::Malformed(s.to_string()));
        }

        let whole: u32 = whole
            .parse()
            .map_err(|_| PercentError::Malformed(s.to_string()))?;
        let frac_bp: u32 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u32>().expect("digits checked above") * 10,
            _ => frac.parse().expect("digits checked above"),
        };

        let bp = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac_bp))
            .ok_or_else(|| PercentError::Malformed(s.to_string()))?;

        Self::from_basis_points(bp)
    }
}

// round-half-even integer division, d > 0
fn div_round_half_even(n: i128, d: i128) -> i128 {
    let negative = n < 0;
    let n = n.abs();
    let q = n / d;
    let r = n % d;
    let q = match (2 * r).cmp(&d) {
        Ordering::Less => q,
        Ordering::Greater => q + 1,
        Ordering::Equal => {
            if q % 2 == 0 {
                q
            } else {
                q + 1
            }
        }
    };
    if negative { -q } else { q }
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Money(d.i64()?))
    }
}

impl<C> minicbor::Encode<C> for Percent {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u32(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Percent {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bp = d.u32()?;
        Percent::from_basis_points(bp)
            .map_err(|_| minicbor::decode::Error::message("percentage above 100"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_to_even() {
        let ten = Percent::from_whole(10).unwrap();

        // 10% of 0.05 is 0.005 -> ties to 0.00 (even)
        assert_eq!(ten.apply_to(Money::from_minor(5)), Money::ZERO);
        // 10% of 0.15 is 0.015 -> ties to 0.02 (even)
        assert_eq!(ten.apply_to(Money::from_minor(15)), Money::from_minor(2));
        // 10% of 0.26 is 0.026 -> rounds up normally
        assert_eq!(ten.apply_to(Money::from_minor(26)), Money::from_minor(3));
    }

    #[test]
    fn retention_and_net_close_exactly() {
        let pct = Percent::from_basis_points(333).unwrap(); // 3.33%
        for minor in [1, 7, 99, 12_345, 1_000_000] {
            let amount = Money::from_minor(minor);
            let retention = pct.apply_to(amount);
            let net = amount.checked_sub(retention).unwrap();
            assert_eq!(retention.checked_add(net).unwrap(), amount);
        }
    }

    #[test]
    fn money_display_and_parse_round_trip() {
        for (s, minor) in [("1234.56", 123_456), ("0.05", 5), ("-3.50", -350), ("7.00", 700)] {
            let parsed: Money = s.parse().unwrap();
            assert_eq!(parsed, Money::from_minor(minor));
            assert_eq!(parsed.to_string(), s);
        }
        assert_eq!("12".parse::<Money>().unwrap(), Money::from_minor(1_200));
        assert_eq!("12.5".parse::<Money>().unwrap(), Money::from_minor(1_250));
        assert!("12.345".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
        assert!("1,2".parse::<Money>().is_err());
    }

    #[test]
    fn percent_parse_and_bounds() {
        assert_eq!("2.5".parse::<Percent>().unwrap().basis_points(), 250);
        assert_eq!("100".parse::<Percent>().unwrap().basis_points(), 10_000);
        assert!("100.01".parse::<Percent>().is_err());
        assert_eq!(Percent::from_whole(101), Err(PercentError::OutOfRange(10_100)));
    }

    #[test]
    fn ratio_recovers_basis_points() {
        let part = Money::from_minor(500_000);
        let whole = Money::from_minor(1_000_000);
        assert_eq!(Percent::ratio_of(part, whole).unwrap().basis_points(), 5_000);

        assert!(Percent::ratio_of(part, Money::ZERO).is_none());
        assert!(Percent::ratio_of(whole, part).is_none()); // above 100%
    }

    #[test]
    fn money_encoding() {
        let original = Money::from_minor(-123_456);

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Money = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn percent_encoding_rejects_out_of_range() {
        let encoding = minicbor::to_vec(20_000u32).unwrap();
        assert!(minicbor::decode::<Percent>(&encoding).is_err());

        let original = Percent::from_basis_points(1_000).unwrap();
        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Percent = minicbor::decode(&encoding).unwrap();
        assert_eq!(original, decode);
    }
}
