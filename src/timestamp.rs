//! Timestamp parsing for workbook metadata and ISO date/time cells.
//!
//! The loader never calls a parser directly; it asks a [`ParserSlot`] for the
//! current one. A conversion that needs repaired parsing swaps a
//! [`Tolerant`] parser into the slot and the returned [`Substitution`] guard
//! puts the original back when it goes out of scope.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;

use crate::error::ConvertError;

static ISO_8601: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2})(?:\.(\d+))?)?)?(?:Z|[+-]\d{2}(?::?\d{2})?)?$",
    )
    .expect("valid regex")
});

pub trait TimestampParser {
    fn parse(&self, text: &str) -> Result<NaiveDateTime>;
}

/// Strict ISO-8601 subset: the date, optional time, optional fraction and
/// optional `Z` or UTC offset. Every component must be zero-padded. The
/// offset is dropped and the wall-clock fields kept as written; fractions
/// are truncated to microseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct Iso8601;

impl TimestampParser for Iso8601 {
    fn parse(&self, text: &str) -> Result<NaiveDateTime> {
        let invalid = || ConvertError::InvalidDatetime(text.to_string());
        let caps = ISO_8601.captures(text).ok_or_else(invalid)?;

        let field = |i: usize| -> u32 {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let micros = caps
            .get(7)
            .map(|m| {
                let digits = &m.as_str()[..m.len().min(6)];
                format!("{digits:0<6}").parse::<u32>().unwrap_or(0)
            })
            .unwrap_or(0);

        NaiveDate::from_ymd_opt(year, field(2), field(3))
            .and_then(|date| date.and_hms_micro_opt(field(4), field(5), field(6), micros))
            .ok_or_else(|| invalid().into())
    }
}

impl<P: TimestampParser + ?Sized> TimestampParser for Rc<P> {
    fn parse(&self, text: &str) -> Result<NaiveDateTime> {
        (**self).parse(text)
    }
}

/// Best-effort textual repair of timestamps like `2025- 2-18T20:40:31Z`.
pub fn repair(text: &str) -> String {
    text.replace("  ", " ")
        .replace("- ", "-0")
        .replace("T ", "T0")
        .replace(": ", ":0")
}

/// Repairs the input before delegating to `inner`, and substitutes the
/// current local time when even the repaired text does not parse.
pub struct Tolerant<P> {
    inner: P,
    fallbacks: Cell<usize>,
}

impl<P: TimestampParser> Tolerant<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            fallbacks: Cell::new(0),
        }
    }

    /// How many values were replaced with the wall-clock time.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks.get()
    }
}

impl<P: TimestampParser> TimestampParser for Tolerant<P> {
    fn parse(&self, text: &str) -> Result<NaiveDateTime> {
        match self.inner.parse(&repair(text)) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                println!("⚠️  Unparseable timestamp {text:?}, substituting current time");
                self.fallbacks.set(self.fallbacks.get() + 1);
                Ok(Local::now().naive_local())
            }
        }
    }
}

/// The single lookup point for the parser used while loading a workbook.
pub struct ParserSlot {
    current: RefCell<Rc<dyn TimestampParser>>,
}

impl Default for ParserSlot {
    fn default() -> Self {
        Self::new(Rc::new(Iso8601))
    }
}

impl ParserSlot {
    pub fn new(parser: Rc<dyn TimestampParser>) -> Self {
        Self {
            current: RefCell::new(parser),
        }
    }

    pub fn parse(&self, text: &str) -> Result<NaiveDateTime> {
        self.current().parse(text)
    }

    /// The parser installed right now.
    pub fn current(&self) -> Rc<dyn TimestampParser> {
        Rc::clone(&*self.current.borrow())
    }

    /// Installs `parser` until the returned guard is dropped.
    pub fn substitute(&self, parser: Rc<dyn TimestampParser>) -> Substitution<'_> {
        let original = self.current.replace(parser);
        Substitution {
            slot: self,
            original: Some(original),
        }
    }

    pub fn is_current(&self, parser: &Rc<dyn TimestampParser>) -> bool {
        Rc::ptr_eq(&*self.current.borrow(), parser)
    }
}

#[must_use = "the original parser is restored as soon as the guard is dropped"]
pub struct Substitution<'a> {
    slot: &'a ParserSlot,
    original: Option<Rc<dyn TimestampParser>>,
}

impl Drop for Substitution<'_> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            self.slot.current.replace(original);
        }
    }
}

/// Renders the way the CSV output expects: seconds precision, with
/// microseconds only when present.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    if value.nanosecond() / 1_000 == 0 {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MALFORMED: &str = "2025- 2-18T20:40:31Z";

    #[test]
    fn strict_accepts_padded_forms() {
        let p = Iso8601;
        let full = p.parse("2025-02-18T20:40:31Z").unwrap();
        assert_eq!(format_timestamp(&full), "2025-02-18 20:40:31");

        let date_only = p.parse("2024-10-01").unwrap();
        assert_eq!(format_timestamp(&date_only), "2024-10-01 00:00:00");

        let minutes = p.parse("2024-10-01 08:15").unwrap();
        assert_eq!(format_timestamp(&minutes), "2024-10-01 08:15:00");

        let fraction = p.parse("2024-10-01T08:15:00.25").unwrap();
        assert_eq!(format_timestamp(&fraction), "2024-10-01 08:15:00.250000");
    }

    #[test]
    fn strict_keeps_wall_clock_of_offset_timestamps() {
        let p = Iso8601;
        for text in [
            "2025-02-18T20:40:31+01:00",
            "2025-02-18T20:40:31-0500",
            "2025-02-18T20:40:31+01",
        ] {
            let parsed = p.parse(text).unwrap();
            assert_eq!(format_timestamp(&parsed), "2025-02-18 20:40:31", "{text}");
        }
        assert!(p.parse("2025-02-18T20:40:31+1:00").is_err());
    }

    #[test]
    fn strict_truncates_long_fractions() {
        let parsed = Iso8601.parse("2025-02-18T20:40:31.1234567Z").unwrap();
        assert_eq!(format_timestamp(&parsed), "2025-02-18 20:40:31.123456");
    }

    #[test]
    fn tolerant_does_not_fabricate_valid_offset_values() {
        let p = Tolerant::new(Iso8601);
        let parsed = p.parse("2025-02-18T20:40:31+01:00").unwrap();
        assert_eq!(format_timestamp(&parsed), "2025-02-18 20:40:31");
        assert_eq!(p.fallbacks(), 0);
    }

    #[test]
    fn strict_rejects_unpadded_and_out_of_range() {
        let p = Iso8601;
        let err = p.parse(MALFORMED).unwrap_err();
        assert!(err.to_string().contains("Invalid datetime value"));
        assert!(p.parse("2025-13-01").is_err());
        assert!(p.parse("2025-02-30T00:00:00").is_err());
        assert!(p.parse("").is_err());
        assert!(p.parse("yesterday").is_err());
    }

    #[test]
    fn repair_pads_components_after_separators() {
        assert_eq!(repair(MALFORMED), "2025-02-18T20:40:31Z");
        assert_eq!(repair("2025-  2- 8T 9:05: 7Z"), "2025-02-08T09:05:07Z");
        assert_eq!(repair("2025-02-18T20:40:31Z"), "2025-02-18T20:40:31Z");
    }

    #[test]
    fn tolerant_repairs_then_falls_back() {
        let p = Tolerant::new(Iso8601);
        let fixed = p.parse(MALFORMED).unwrap();
        assert_eq!(format_timestamp(&fixed), "2025-02-18 20:40:31");
        assert_eq!(p.fallbacks(), 0);

        let before = Local::now().naive_local();
        let fabricated = p.parse("not a date").unwrap();
        assert!(fabricated >= before - chrono::Duration::seconds(1));
        assert_eq!(p.fallbacks(), 1);
    }

    #[test]
    fn substitution_is_undone_on_drop() {
        let original: Rc<dyn TimestampParser> = Rc::new(Iso8601);
        let slot = ParserSlot::new(Rc::clone(&original));
        assert!(slot.parse(MALFORMED).is_err());

        {
            let _guard = slot.substitute(Rc::new(Tolerant::new(Iso8601)));
            assert!(!slot.is_current(&original));
            assert!(slot.parse(MALFORMED).is_ok());
        }

        assert!(slot.is_current(&original));
        assert!(slot.parse(MALFORMED).is_err());
        assert!(slot.parse("2025-02-18T20:40:31Z").is_ok());
    }

    #[test]
    fn tolerant_wraps_whatever_the_slot_holds() {
        struct FiscalYear;
        impl TimestampParser for FiscalYear {
            fn parse(&self, text: &str) -> Result<NaiveDateTime> {
                match text {
                    "FY25" => Ok(NaiveDate::from_ymd_opt(2024, 10, 1)
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .unwrap()),
                    _ => Iso8601.parse(text),
                }
            }
        }

        let slot = ParserSlot::new(Rc::new(FiscalYear));
        let tolerant = Rc::new(Tolerant::new(slot.current()));
        let shared: Rc<dyn TimestampParser> = tolerant.clone();
        let _guard = slot.substitute(shared);

        let parsed = slot.parse("FY25").unwrap();
        assert_eq!(format_timestamp(&parsed), "2024-10-01 00:00:00");
        assert!(slot.parse(MALFORMED).is_ok());
        assert_eq!(tolerant.fallbacks(), 0);
    }

    #[test]
    fn substitution_is_undone_on_error_path() {
        fn failing(slot: &ParserSlot) -> Result<()> {
            let _guard = slot.substitute(Rc::new(Tolerant::new(Iso8601)));
            slot.parse(MALFORMED)?;
            anyhow::bail!("write failed")
        }

        let slot = ParserSlot::default();
        assert!(failing(&slot).is_err());
        assert!(slot.parse(MALFORMED).is_err());
    }
}
