use std::path::Path;

use xlsxcsv::convert::{Options, convert, report};
use xlsxcsv::timestamp::ParserSlot;

const INPUT: &str = "data/FY25_FMRs_revised.xlsx";
const OUTPUT: &str = "data/fmr-2025.csv";

fn main() {
    let options = Options {
        tolerant: true,
        buffered: true,
    };
    let result = convert(
        Path::new(INPUT),
        Path::new(OUTPUT),
        options,
        &ParserSlot::default(),
    );
    if let Err(err) = result {
        report(&err, true);
        std::process::exit(1);
    }
}
