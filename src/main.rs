fn main() {
    let args = std::env::args();
    if let Err(err) = pgback::run(args) {
        eprintln!("pgback error: {err:?}");
        std::process::exit(1);
    }
}
