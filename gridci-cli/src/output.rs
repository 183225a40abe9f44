// Output formatting helpers for CLI commands

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}

/// Cells run concurrently, so every line they print carries the cell name
pub fn cell_line(cell: &str, message: &str) {
    eprintln!("\x1b[1;34m[{}]\x1b[0m {}", cell, message);
}

pub fn cell_success(cell: &str, message: &str) {
    eprintln!("\x1b[1;34m[{}]\x1b[0m \x1b[32m{}\x1b[0m", cell, message);
}

pub fn cell_failure(cell: &str, message: &str) {
    eprintln!("\x1b[1;34m[{}]\x1b[0m \x1b[31m{}\x1b[0m", cell, message);
}

/// Step output on stdout, prefixed with its cell
pub fn step_output(cell: &str, line: &str) {
    println!("[{}]   | {}", cell, line);
}

/// Step stderr output (red)
pub fn step_error(cell: &str, line: &str) {
    eprintln!("[{}] \x1b[31m  | {}\x1b[0m", cell, line);
}
