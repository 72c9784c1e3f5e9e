/// CLI module - command-line interface for Mentorline chat
mod cli;

fn main() {
    cli::run_cli();
}
