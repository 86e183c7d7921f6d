fn main() {
    if let Err(e) = tbcare_lib::run() {
        eprintln!("tbcare: {e}");
        std::process::exit(1);
    }
}
