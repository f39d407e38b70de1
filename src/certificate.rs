//! Core progress certificate details and derived figure types
use super::error::ValidationError;
use crate::money::{Money, Percent};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

// Also used for constructing drafts
// Key is the hash of this struct encoded into CBOR
#[derive(minicbor::Encode, minicbor::Decode, Debug, Default, Clone, Eq, PartialEq)]
pub struct CertificateDetails {
    // No ID field, as the stored details are addressed by the hash of this struct
    #[n(0)]
    subcontract_id: Option<String>,
    #[n(1)]
    period_start: Option<TimeStamp<Utc>>,
    #[n(2)]
    period_end: Option<TimeStamp<Utc>>,
    #[n(3)]
    percentage_complete: Option<Percent>, // cumulative completion claimed to date
    #[n(4)]
    amount_certified: Option<Money>,
    #[n(5)]
    notes: Option<String>,
}

impl CertificateDetails {
    /// Construct a new builder object, this becomes the basis for a draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_subcontract(mut self, subcontract_id: &str) -> Self {
        self.subcontract_id = Some(subcontract_id.to_string());
        self
    }
    pub fn set_period_start(mut self, date: TimeStamp<Utc>) -> Self {
        self.period_start = Some(date);
        self
    }
    pub fn set_period_end(mut self, date: TimeStamp<Utc>) -> Self {
        self.period_end = Some(date);
        self
    }
    pub fn set_percentage_complete(mut self, pct: Percent) -> Self {
        self.percentage_complete = Some(pct);
        self
    }
    pub fn set_amount_certified(mut self, amount: Money) -> Self {
        self.amount_certified = Some(amount);
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn subcontract_id(&self) -> Option<&str> {
        self.subcontract_id.as_deref()
    }
    pub fn period_start(&self) -> Option<&TimeStamp<Utc>> {
        self.period_start.as_ref()
    }
    pub fn period_end(&self) -> Option<&TimeStamp<Utc>> {
        self.period_end.as_ref()
    }
    pub fn percentage_complete(&self) -> Option<Percent> {
        self.percentage_complete
    }
    pub fn amount_certified(&self) -> Option<Money> {
        self.amount_certified
    }
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Checks if the predicate `period_start <= period_end` is true
    pub fn validate_period(&self) -> bool {
        match (self.period_start.as_ref(), self.period_end.as_ref()) {
            (Some(start), Some(end)) => start.to_datetime_utc() <= end.to_datetime_utc(),
            _ => false,
        }
    }

    // Checks fields, and performs validation. returns a hash of the details and its contents serialised into cbor
    pub fn validate_and_finalise(&self) -> anyhow::Result<(String, Vec<u8>)> {
        if self.subcontract_id.is_none() {
            return Err(ValidationError::MissingSubcontract.into());
        }
        if self.period_start.is_none() || self.period_end.is_none() {
            return Err(ValidationError::MissingPeriod.into());
        }
        if !self.validate_period() {
            return Err(ValidationError::PeriodInverted.into());
        }
        if self.amount_certified.is_none() && self.percentage_complete.is_none() {
            return Err(ValidationError::MissingFigures.into());
        }
        if let Some(amount) = self.amount_certified {
            if !amount.is_positive() {
                return Err(ValidationError::NonPositiveAmount.into());
            }
        }

        let contents = minicbor::to_vec(self)?;
        let hash = sha256::digest(&contents);

        Ok((hash, contents))
    }
}

/// Monetary figures frozen when a certificate is submitted for approval.
///
/// Computed once against the ledger totals of that moment and never
/// recomputed afterwards; a stale snapshot is refused at approval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct CertFigures {
    #[n(0)]
    pub previous_certified: Money,
    #[n(1)]
    pub amount_certified: Money,
    #[n(2)]
    pub percentage_complete: Percent,
    #[n(3)]
    pub retention_amount: Money,
    #[n(4)]
    pub net_payable: Money,
    #[n(5)]
    pub cumulative_certified: Money,
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn inverted_period_fails_validation() {
        let details = CertificateDetails::new()
            .set_subcontract("sub_1test")
            .set_period_start(TimeStamp::new_with(2026, 3, 31, 0, 0, 0))
            .set_period_end(TimeStamp::new_with(2026, 3, 1, 0, 0, 0))
            .set_amount_certified(Money::from_minor(100_000));

        assert!(!details.validate_period());
        assert!(details.validate_and_finalise().is_err());
    }

    #[test]
    fn details_hash_is_deterministic() {
        let details = CertificateDetails::new()
            .set_subcontract("sub_1test")
            .set_period_start(TimeStamp::new_with(2026, 3, 1, 0, 0, 0))
            .set_period_end(TimeStamp::new_with(2026, 3, 31, 0, 0, 0))
            .set_amount_certified(Money::from_minor(100_000));

        let (hash_a, cbor_a) = details.validate_and_finalise().unwrap();
        let (hash_b, cbor_b) = details.validate_and_finalise().unwrap();

        assert_eq!(hash_a, hash_b);
        assert_eq!(cbor_a, cbor_b);
    }
}
