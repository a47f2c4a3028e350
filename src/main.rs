//! chaindex binary entry point.

fn main() {
    if let Err(err) = chaindex_bin::run_app() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
