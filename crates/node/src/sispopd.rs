fn main() {
    if let Err(err) = sispopd::run_entry() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
