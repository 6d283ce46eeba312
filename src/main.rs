fn main() {
    if let Err(e) = reconductor::app::run_cli() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
