fn main() {
    std::process::exit(forgestate::cli::run());
}
