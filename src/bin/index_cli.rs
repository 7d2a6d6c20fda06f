//! Simple CLI for exercising the B+-tree index engine.
//!
//! Usage:
//!   index_cli <db_path> <index> create <int32|int64|bytes:N>
//!   index_cli <db_path> <index> drop
//!   index_cli <db_path> <index> insert <key> <rid_page> <rid_slot>
//!   index_cli <db_path> <index> lookup <key>
//!   index_cli <db_path> <index> remove <key>
//!   index_cli <db_path> <index> scan [from_key]
//!   index_cli <db_path> <index> check
//!   index_cli <db_path> <index> stats
//!   index_cli <db_path> <index> export

use bptree_index::{Config, Database, Key, KeyType, PageId, RecordId};
use std::env;
use std::process::exit;

fn usage() -> ! {
    eprintln!("Usage: index_cli <db_path> <index> <command> [args...]");
    eprintln!("Commands:");
    eprintln!("  create <key_type>            - Create an index (int32, int64, bytes:N)");
    eprintln!("  drop                         - Drop the index and free its pages");
    eprintln!("  insert <key> <page> <slot>   - Insert or replace an entry");
    eprintln!("  lookup <key>                 - Look up a key");
    eprintln!("  remove <key>                 - Remove a key");
    eprintln!("  scan [from_key]              - Scan entries in key order");
    eprintln!("  check                        - Verify structural invariants");
    eprintln!("  stats                        - Show index statistics");
    eprintln!("  export                       - Dump the tree structure as JSON");
    exit(1);
}

fn parse_key_type(s: &str) -> Option<KeyType> {
    match s {
        "int32" => Some(KeyType::Int32),
        "int64" => Some(KeyType::Int64),
        _ => {
            let n = s.strip_prefix("bytes:")?.parse::<u16>().ok()?;
            Some(KeyType::Bytes(n))
        }
    }
}

fn parse_key(key_type: KeyType, s: &str) -> Result<Key, String> {
    match key_type {
        KeyType::Int32 => s
            .parse::<i32>()
            .map(Key::Int32)
            .map_err(|_| format!("'{}' is not an int32 key", s)),
        KeyType::Int64 => s
            .parse::<i64>()
            .map(Key::Int64)
            .map_err(|_| format!("'{}' is not an int64 key", s)),
        KeyType::Bytes(n) => {
            let mut bytes = s.as_bytes().to_vec();
            if bytes.len() > n as usize {
                return Err(format!("'{}' exceeds the {}-byte key width", s, n));
            }
            bytes.resize(n as usize, 0);
            Ok(Key::Bytes(bytes))
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        usage();
    }

    let db_path = &args[1];
    let db = match Database::open(Config::new(db_path)) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("ERROR: Failed to open database: {}", e);
            exit(1);
        }
    };

    let index_name = &args[2];
    let command = &args[3];

    match command.as_str() {
        "create" => {
            if args.len() < 5 {
                eprintln!("Usage: index_cli <db_path> <index> create <key_type>");
                exit(1);
            }
            let key_type = match parse_key_type(&args[4]) {
                Some(kt) => kt,
                None => {
                    eprintln!("ERROR: unknown key type '{}'", args[4]);
                    exit(1);
                }
            };
            match db.create_index(Some(index_name), key_type) {
                Ok(idx) => {
                    idx.close();
                    println!("OK");
                }
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "drop" => match db.drop_index(index_name) {
            Ok(()) => println!("DROPPED"),
            Err(e) => {
                eprintln!("ERROR: {}", e);
                exit(1);
            }
        },

        _ => {
            let mut idx = match db.open_index(index_name) {
                Ok(idx) => idx,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            };
            let key_type = idx.key_type();

            match command.as_str() {
                "insert" => {
                    if args.len() < 7 {
                        eprintln!("Usage: index_cli <db_path> <index> insert <key> <page> <slot>");
                        exit(1);
                    }
                    let key = parse_key(key_type, &args[4]).unwrap_or_else(|e| {
                        eprintln!("ERROR: {}", e);
                        exit(1);
                    });
                    let (page, slot) = match (args[5].parse::<u32>(), args[6].parse::<u32>()) {
                        (Ok(p), Ok(s)) => (p, s),
                        _ => {
                            eprintln!("ERROR: record id must be two integers");
                            exit(1);
                        }
                    };

                    match idx.insert(&key, RecordId::new(PageId::new(page), slot)) {
                        Ok(()) => println!("OK"),
                        Err(e) => {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        }
                    }
                }

                "lookup" => {
                    if args.len() < 5 {
                        eprintln!("Usage: index_cli <db_path> <index> lookup <key>");
                        exit(1);
                    }
                    let key = parse_key(key_type, &args[4]).unwrap_or_else(|e| {
                        eprintln!("ERROR: {}", e);
                        exit(1);
                    });

                    match idx.lookup(&key) {
                        Ok(Some((key, rid))) => println!("{} -> {}", key, rid),
                        Ok(None) => println!("NOT_FOUND"),
                        Err(e) => {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        }
                    }
                }

                "remove" => {
                    if args.len() < 5 {
                        eprintln!("Usage: index_cli <db_path> <index> remove <key>");
                        exit(1);
                    }
                    let key = parse_key(key_type, &args[4]).unwrap_or_else(|e| {
                        eprintln!("ERROR: {}", e);
                        exit(1);
                    });

                    match idx.remove(&key, RecordId::new(PageId::INVALID, 0)) {
                        Ok(true) => println!("REMOVED"),
                        Ok(false) => println!("NOT_FOUND"),
                        Err(e) => {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        }
                    }
                }

                "scan" => {
                    let scan = if let Some(from) = args.get(4) {
                        let key = parse_key(key_type, from).unwrap_or_else(|e| {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        });
                        idx.scan_from(&key)
                    } else {
                        idx.scan()
                    };

                    match scan {
                        Ok(mut scan) => {
                            let mut count = 0usize;
                            loop {
                                match scan.next() {
                                    Ok(Some((key, rid))) => {
                                        println!("{} -> {}", key, rid);
                                        count += 1;
                                    }
                                    Ok(None) => break,
                                    Err(e) => {
                                        eprintln!("ERROR: {}", e);
                                        exit(1);
                                    }
                                }
                            }
                            println!("COUNT: {}", count);
                        }
                        Err(e) => {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        }
                    }
                }

                "check" => match idx.check_invariants() {
                    Ok(()) => println!("OK: size={}", idx.size()),
                    Err(e) => {
                        eprintln!("VIOLATION: {}", e);
                        exit(1);
                    }
                },

                "stats" => match idx.stats() {
                    Ok(stats) => {
                        println!("page_count: {}", stats.page_count);
                        println!("buffer_pool_size: {}", stats.buffer_pool_size);
                        println!("height: {}", stats.height);
                        println!("entries: {}", idx.size());
                    }
                    Err(e) => {
                        eprintln!("ERROR: {}", e);
                        exit(1);
                    }
                },

                "export" => match idx.export_tree() {
                    Ok(tree) => match serde_json::to_string_pretty(&tree) {
                        Ok(json) => println!("{}", json),
                        Err(e) => {
                            eprintln!("ERROR: {}", e);
                            exit(1);
                        }
                    },
                    Err(e) => {
                        eprintln!("ERROR: {}", e);
                        exit(1);
                    }
                },

                _ => {
                    eprintln!("Unknown command: {}", command);
                    exit(1);
                }
            }
        }
    }

    // Ensure data is persisted
    if let Err(e) = db.flush() {
        eprintln!("Warning: Failed to flush: {}", e);
    }
}
