use strata::frontend;

fn main() {
    std::process::exit(frontend::cli_main());
}
