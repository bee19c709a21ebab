use crate::error::{CrawlError, Result};
use chrono::{Days, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// A date with an optional tolerance window
///
/// Grammar: `YYYY-MM-DD`, `YYYY-MM-DD+-N` (N days either side) or
/// `YYYY-MM-DD+P-M` (P days after, M days before).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangeSpec {
    pub base: NaiveDate,
    pub days_before: u32,
    pub days_after: u32,
}

impl DateRangeSpec {
    pub fn fixed(base: NaiveDate) -> Self {
        Self {
            base,
            days_before: 0,
            days_after: 0,
        }
    }

    pub fn symmetric(base: NaiveDate, days: u32) -> Self {
        Self {
            base,
            days_before: days,
            days_after: days,
        }
    }

    pub fn is_ranged(&self) -> bool {
        self.days_before > 0 || self.days_after > 0
    }

    /// Build a window, failing when either end falls outside the calendar
    pub fn new(base: NaiveDate, days_before: u32, days_after: u32) -> Result<Self> {
        let spec = Self {
            base,
            days_before,
            days_after,
        };
        if spec.checked_first().is_none() || spec.checked_last().is_none() {
            return Err(CrawlError::InvalidRangeSpec {
                spec: spec.to_string(),
                reason: "tolerance reaches past the supported calendar".to_string(),
            });
        }
        Ok(spec)
    }

    fn checked_first(&self) -> Option<NaiveDate> {
        self.base.checked_sub_days(Days::new(u64::from(self.days_before)))
    }

    fn checked_last(&self) -> Option<NaiveDate> {
        self.base.checked_add_days(Days::new(u64::from(self.days_after)))
    }

    /// First day of the window, clamped to the earliest representable date
    pub fn first(&self) -> NaiveDate {
        self.checked_first().unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the window, clamped to the latest representable date
    pub fn last(&self) -> NaiveDate {
        self.checked_last().unwrap_or(NaiveDate::MAX)
    }

    /// Widest side of the window in days
    pub fn tolerance(&self) -> u32 {
        self.days_before.max(self.days_after)
    }

    /// Every day of the window, inclusive at both ends
    pub fn days(&self) -> Vec<NaiveDate> {
        self.first()
            .iter_days()
            .take_while(|day| *day <= self.last())
            .collect()
    }
}

impl FromStr for DateRangeSpec {
    type Err = CrawlError;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = |reason: &str| CrawlError::InvalidRangeSpec {
            spec: input.to_string(),
            reason: reason.to_string(),
        };

        let (date_part, tolerance) = match input.find('+') {
            Some(pos) => (&input[..pos], Some(&input[pos + 1..])),
            None => (input, None),
        };

        let base = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|e| invalid(&format!("bad date: {}", e)))?;

        let Some(tolerance) = tolerance else {
            return Ok(Self::fixed(base));
        };

        let parse_days = |digits: &str| {
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("tolerance must be whole days"));
            }
            digits
                .parse::<u32>()
                .map_err(|_| invalid("tolerance out of range"))
        };

        let (days_before, days_after) = match tolerance.strip_prefix('-') {
            Some(days) => {
                let days = parse_days(days)?;
                (days, days)
            }
            None => {
                let (after, before) = tolerance
                    .split_once('-')
                    .ok_or_else(|| invalid("expected +N-M or +-N"))?;
                (parse_days(before)?, parse_days(after)?)
            }
        };

        Self::new(base, days_before, days_after)
            .map_err(|_| invalid("tolerance reaches past the supported calendar"))
    }
}

impl fmt::Display for DateRangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.base.format("%Y-%m-%d");
        match (self.days_before, self.days_after) {
            (0, 0) => write!(f, "{}", base),
            (before, after) if before == after => write!(f, "{}+-{}", base, before),
            (before, after) => write!(f, "{}+{}-{}", base, after, before),
        }
    }
}
