use xlsxcsv::convert::{Options, report, run};

fn main() {
    if let Err(err) = run(std::env::args_os(), Options::strict()) {
        report(&err, false);
        std::process::exit(1);
    }
}
