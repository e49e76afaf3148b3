//! Interactive shell for driftkv.
//!
//! Reads whitespace-tokenized commands from stdin, one per line:
//!
//! ```text
//! SET <key> <value> [ttl]     GET <key>        DELETE <key>
//! EXPIRE <key> <ttl>          TTL <key>        EXISTS <key>
//! SCAN [WHERE ...] [SELECT ...] [LIMIT n]
//! HYDRATE                     EXIT | QUIT
//! ```
//!
//! Store verbs go through command dispatch; SCAN goes through the planner.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;

use driftkv_core::{Config, Key, Row, Store};
use driftkv_query::execute;

#[derive(Parser, Debug)]
#[command(name = "driftkv", about = "In-memory key-value store with TTL and a WAL")]
struct Args {
    /// Path of the write-ahead log file
    #[arg(long, default_value = "driftkv.wal")]
    wal: PathBuf,

    /// Load a small sample data set on startup
    #[arg(long)]
    hydrate: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let store = match Store::open(Config::at(&args.wal)) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to open store: {e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("store open, wal at {}", store.wal_path().display());

    if args.hydrate {
        hydrate(&store);
    }

    repl(&store);
    ExitCode::SUCCESS
}

fn repl(store: &Store) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("driftkv> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("read error: {e}");
                break;
            }
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(verb) = parts.first() else { continue };

        if verb.eq_ignore_ascii_case("EXIT") || verb.eq_ignore_ascii_case("QUIT") {
            break;
        }
        if verb.eq_ignore_ascii_case("HYDRATE") {
            hydrate(store);
            continue;
        }
        if verb.eq_ignore_ascii_case("SCAN") {
            match execute(store, &line) {
                Ok(rows) => print_rows(&rows),
                Err(e) => println!("error: {e}"),
            }
            continue;
        }

        match store.process(&parts) {
            Ok(reply) => println!("{reply}"),
            Err(e) => println!("error: {e}"),
        }
    }
}

fn print_rows(rows: &[Row]) {
    for row in rows {
        if row.value.data.is_empty() {
            println!("{}", row.key);
        } else {
            println!("{} = {}", row.key, row.value.data);
        }
    }
    println!("({} row(s))", rows.len());
}

/// Load a demonstration data set: a few users and orders.
fn hydrate(store: &Store) {
    let samples = [
        ("user:1", "alice"),
        ("user:2", "bob"),
        ("user:3", "carol"),
        ("user:4", "dave"),
        ("user:5", "eve"),
        ("order:1", "widget"),
        ("order:2", "gadget"),
    ];

    let mut loaded = 0;
    for (name, value) in samples {
        let key = match Key::new(name) {
            Ok(key) => key,
            Err(e) => {
                log::warn!("skipping sample {name:?}: {e}");
                continue;
            }
        };
        match store.set(key, value, None) {
            Ok(()) => loaded += 1,
            Err(e) => log::warn!("failed to load sample {name:?}: {e}"),
        }
    }
    println!("hydrated {loaded} sample key(s)");
}
