pub mod peer;

use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("peer") => {
            if let Err(e) = peer::main() {
                eprintln!("Peer error:\n{:#}", e);
                std::process::exit(1);
            }
        }
        _ => print_usage(),
    }
}

fn print_usage() {
    eprintln!("Rover session");
    eprintln!("Usage:");
    eprintln!("  rover-session peer [--publish audio|video] [--name NAME]");
    eprintln!();
    eprintln!("Signaling is exchanged as JSON lines on stdin/stdout.");
    eprintln!("ROVER_RECONNECT_ATTEMPTS overrides the reconnection limit (0 disables it).");
}
