use xlsxcsv::convert::{Options, report, run};

fn main() {
    if let Err(err) = run(std::env::args_os(), Options::tolerant()) {
        report(&err, true);
        std::process::exit(1);
    }
}
