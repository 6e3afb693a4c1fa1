use warden::cli::Cli;

fn main() {
    if let Err(e) = Cli::run() {
        std::process::exit(e.exit_code());
    }
}
