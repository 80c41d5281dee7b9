use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use csv::{Terminator, WriterBuilder};

use crate::error::ConvertError;
use crate::timestamp::{ParserSlot, TimestampParser, Tolerant, format_timestamp};
use crate::workbook::load_active_sheet;

const PROGRESS_EVERY: usize = 2000;

#[derive(Debug, Default, Clone, Copy)]
pub struct Options {
    /// Repair malformed timestamps instead of failing on them.
    pub tolerant: bool,
    /// Collect every record before opening the output file.
    pub buffered: bool,
}

impl Options {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn tolerant() -> Self {
        Self {
            tolerant: true,
            ..Self::default()
        }
    }
}

/// Converts the active sheet of `input` into `output`, returning the number
/// of records written.
///
/// In tolerant mode the parser currently in `parsers` is wrapped in a
/// repairing one for the duration of this call; the original is back in
/// place when it returns, whether conversion succeeded or not.
pub fn convert(input: &Path, output: &Path, options: Options, parsers: &ParserSlot) -> Result<usize> {
    if !options.tolerant {
        return convert_with(input, output, options, parsers);
    }

    let tolerant = Rc::new(Tolerant::new(parsers.current()));
    let shared: Rc<dyn TimestampParser> = tolerant.clone();
    let _patched = parsers.substitute(shared);
    let result = convert_with(input, output, options, parsers);
    if tolerant.fallbacks() > 0 {
        println!(
            "⚠️  {} timestamp(s) could not be repaired and were replaced with the current time",
            tolerant.fallbacks()
        );
    }
    result
}

fn convert_with(input: &Path, output: &Path, options: Options, parsers: &ParserSlot) -> Result<usize> {
    println!("Reading {}...", input.display());
    let sheet = load_active_sheet(input, parsers)?;
    println!(
        "Sheet: {}, Rows: {}, Cols: {}",
        sheet.title,
        sheet.max_row(),
        sheet.max_column()
    );
    if let Some(created) = &sheet.properties.created {
        println!("Created: {}", format_timestamp(created));
    }

    let rows = sheet.into_rows(parsers);
    let written = if options.buffered {
        let records = rows.collect::<Result<Vec<_>>>()?;
        println!("Writing {} rows to {}...", records.len(), output.display());
        write_records(records.into_iter().map(Ok), output)?
    } else {
        write_records(rows, output)?
    };

    println!("✅ Successfully converted to {}", output.display());
    Ok(written)
}

fn write_records<I>(records: I, output: &Path) -> Result<usize>
where
    I: IntoIterator<Item = Result<Vec<String>>>,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_path(output)
        .with_context(|| format!("cannot create {}", output.display()))?;

    let mut written = 0;
    for record in records {
        writer
            .write_record(&record?)
            .with_context(|| format!("cannot write {}", output.display()))?;
        written += 1;
        if written % PROGRESS_EVERY == 0 {
            println!("  Processed {written} rows...");
        }
    }
    writer
        .flush()
        .with_context(|| format!("cannot write {}", output.display()))?;
    Ok(written)
}

/// Entry point shared by the `convert` binaries: `<program> <input> <output>`.
pub fn run(args: impl IntoIterator<Item = OsString>, options: Options) -> Result<()> {
    let mut args = args.into_iter();
    let program = args
        .next()
        .map(|exe| {
            Path::new(&exe)
                .file_name()
                .unwrap_or(exe.as_os_str())
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "convert".to_string());

    let rest: Vec<OsString> = args.collect();
    let [input, output] = <[OsString; 2]>::try_from(rest)
        .map_err(|_| ConvertError::Usage { program })?;

    convert(
        &PathBuf::from(input),
        &PathBuf::from(output),
        options,
        &ParserSlot::default(),
    )?;
    Ok(())
}

/// Prints a top-level failure the way the binaries report it. Usage errors
/// print only the usage line.
pub fn report(err: &anyhow::Error, trace: bool) {
    if let Some(ConvertError::Usage { .. }) = err.downcast_ref::<ConvertError>() {
        println!("{err}");
        return;
    }
    println!("❌ Error: {err:#}");
    if trace {
        eprintln!("{err:?}");
    }
}
