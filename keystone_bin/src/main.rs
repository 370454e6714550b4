use std::io::{self, BufReader};

use keystone_bin::repl;
use plinth::FileEngine;

fn main() {
    let data_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KEYSTONE_DATA_DIR").ok())
        .unwrap_or_else(|| "./data".to_string());

    let engine = match FileEngine::open(&data_dir) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to open database at {data_dir:?}: {e}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = repl::print_banner(&mut out)
        .and_then(|_| repl::run(&engine, BufReader::new(stdin.lock()), &mut out))
    {
        eprintln!("repl error: {e}");
        std::process::exit(1);
    }
}
