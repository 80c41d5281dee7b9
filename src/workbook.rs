use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};

use crate::error::ConvertError;
use crate::metadata::{Properties, read_properties};
use crate::timestamp::{ParserSlot, format_timestamp};

/// The sheet picked for conversion, loaded with cached values only.
pub struct Worksheet {
    pub title: String,
    pub properties: Properties,
    range: Range<Data>,
}

/// Opens `path` and loads its active sheet, falling back to the first sheet
/// when the package records no (or an out-of-range) active tab.
pub fn load_active_sheet(path: &Path, parsers: &ParserSlot) -> Result<Worksheet> {
    let mut workbook: Sheets<BufReader<File>> = open_workbook_auto(path)
        .with_context(|| format!("cannot open workbook {}", path.display()))?;
    let properties = read_properties(path, parsers)?;

    let sheet_names = workbook.sheet_names();
    let title = properties
        .active_tab
        .and_then(|i| sheet_names.get(i))
        .or_else(|| sheet_names.first())
        .cloned()
        .ok_or(ConvertError::NoWorksheet)?;

    let range = workbook
        .worksheet_range(&title)
        .with_context(|| format!("cannot read worksheet {title}"))?;

    Ok(Worksheet {
        title,
        properties,
        range,
    })
}

impl Worksheet {
    /// Rows from A1 through the last used row.
    pub fn max_row(&self) -> usize {
        self.range.end().map_or(0, |(row, _)| row as usize + 1)
    }

    /// Columns from A through the last used column.
    pub fn max_column(&self) -> usize {
        self.range.end().map_or(0, |(_, col)| col as usize + 1)
    }

    /// Consumes the sheet; a second pass means loading it again.
    pub fn into_rows(self, parsers: &ParserSlot) -> Rows<'_> {
        Rows {
            height: self.max_row() as u32,
            width: self.max_column() as u32,
            next: 0,
            range: self.range,
            parsers,
        }
    }
}

pub struct Rows<'a> {
    range: Range<Data>,
    parsers: &'a ParserSlot,
    next: u32,
    height: u32,
    width: u32,
}

impl Iterator for Rows<'_> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.height {
            return None;
        }
        let row = self.next;
        self.next += 1;

        let record = (0..self.width)
            .map(|col| {
                cell_to_string(self.range.get_value((row, col)), self.parsers)
                    .with_context(|| format!("cell {}", to_a1(col + 1, row + 1)))
            })
            .collect();
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.height - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Rows<'_> {}

pub fn cell_to_string(cell: Option<&Data>, parsers: &ParserSlot) -> Result<String> {
    let text = match cell {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.clone(),
        Some(Data::Float(n)) => {
            if n.fract() == 0.0 {
                format!("{:.0}", n)
            } else {
                float_repr(*n)
            }
        }
        Some(Data::Int(n)) => n.to_string(),
        Some(Data::Bool(true)) => "True".to_string(),
        Some(Data::Bool(false)) => "False".to_string(),
        Some(Data::Error(e)) => e.to_string(),
        Some(Data::DateTime(dt)) => {
            let serial = dt.as_f64();
            if dt.is_duration() {
                format_duration(serial)
            } else if (0.0..1.0).contains(&serial) {
                format_time_of_day(serial)
            } else {
                dt.as_datetime()
                    .map(|v| format_timestamp(&v))
                    .unwrap_or_else(|| dt.as_f64().to_string())
            }
        }
        Some(Data::DateTimeIso(s)) => format_timestamp(&parsers.parse(s)?),
        Some(Data::DurationIso(s)) => s.clone(),
        #[allow(unreachable_patterns)]
        Some(other) => format!("{other:?}"),
    };
    Ok(text)
}

/// Shortest round-trip form, switching to `1e-05` style exponents outside
/// `1e-4 <= |n| < 1e16`.
fn float_repr(n: f64) -> String {
    let sci = format!("{n:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return n.to_string();
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        n.to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

/// `HH:MM:SS[.ffffff]` for a serial below one day: a time with no date.
fn format_time_of_day(serial: f64) -> String {
    const MICROS_PER_DAY: f64 = 86_400_000_000.0;
    let micros = ((serial * MICROS_PER_DAY).round() as i64).clamp(0, MICROS_PER_DAY as i64 - 1);
    let (secs, micro) = (micros / 1_000_000, micros % 1_000_000);
    let hms = format!("{:02}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60);
    if micro == 0 {
        hms
    } else {
        format!("{hms}.{micro:06}")
    }
}

/// `[D day[s], ]H:MM:SS` from a duration in days.
fn format_duration(days: f64) -> String {
    let total = (days * 86_400.0).round() as i64;
    let (d, rest) = (total.div_euclid(86_400), total.rem_euclid(86_400));
    let hms = format!("{}:{:02}:{:02}", rest / 3600, rest % 3600 / 60, rest % 60);
    match d {
        0 => hms,
        1 | -1 => format!("{d} day, {hms}"),
        _ => format!("{d} days, {hms}"),
    }
}

fn column_number_to_name(mut column: u32) -> String {
    // 1 -> A, 26 -> Z, 27 -> AA ...
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

fn to_a1(col_1based: u32, row_1based: u32) -> String {
    format!("{}{}", column_number_to_name(col_1based), row_1based)
}
