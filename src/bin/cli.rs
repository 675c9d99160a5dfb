use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use shmmap::{LockMode, LogSink, MapConfig, Result, ShmMap, ShmMapError};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

fn main() {
    env_logger::init();

    let matches = Command::new("shmmap-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Persistent shared-memory hash map")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .help("Backing data file")
                .default_value(shmmap::layout::DEFAULT_DATA_FILE)
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("capacity")
                .short('c')
                .long("capacity")
                .value_name("BUCKETS")
                .help("Bucket count for a new file (rounded up to a power of two)")
                .default_value("16")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("arena")
                .short('a')
                .long("arena")
                .value_name("BYTES")
                .help("Arena size for a new file")
                .default_value("1048576")
                .value_parser(value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("lock")
                .long("lock")
                .help("Take an advisory lock on the data file around every operation")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("put")
                .about("Insert or replace a key")
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(
            Command::new("get")
                .about("Print the value of a key")
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(
            Command::new("contains")
                .about("Check whether a key is present")
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(Command::new("size").about("Print the number of entries"))
        .subcommand(Command::new("iter").about("Print every entry"))
        .subcommand(
            Command::new("stats")
                .about("Show map and pool statistics")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("free-lists").about("Show size classes with parked blocks"))
        .subcommand(Command::new("shell").about("Read commands from stdin"))
        .get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let mut map = open_map(matches)?;

    match matches.subcommand() {
        Some(("put", sub)) => put(&mut map, arg(sub, "key"), arg(sub, "value")),
        Some(("get", sub)) => get(&map, arg(sub, "key")),
        Some(("contains", sub)) => {
            println!("{}", map.contains(arg(sub, "key"))?);
            Ok(())
        }
        Some(("size", _)) => {
            println!("{}", map.len());
            Ok(())
        }
        Some(("iter", _)) => iterate(&map),
        Some(("stats", sub)) => show_stats(&map, sub.get_flag("json")),
        Some(("free-lists", _)) => show_free_lists(&map),
        Some(("shell", _)) => shell(&mut map),
        _ => Ok(()),
    }
}

fn open_map(matches: &ArgMatches) -> Result<ShmMap> {
    let path = matches
        .get_one::<PathBuf>("file")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(shmmap::layout::DEFAULT_DATA_FILE));
    let capacity = matches.get_one::<usize>("capacity").copied().unwrap_or(16);
    let arena = matches.get_one::<usize>("arena").copied().unwrap_or(1 << 20);
    let lock_mode = if matches.get_flag("lock") {
        LockMode::AdvisoryFile
    } else {
        LockMode::None
    };

    let config = MapConfig::new(path)
        .with_capacity(capacity)
        .with_arena_size(arena)
        .with_lock_mode(lock_mode);
    ShmMap::open_with_sink(config, LogSink::Facade)
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn put(map: &mut ShmMap, key: &str, value: &str) -> Result<()> {
    match map.put(key, value)? {
        Some(previous) => println!("Replaced \"{}\" (was \"{}\")", key, previous),
        None => println!("Inserted \"{}\"", key),
    }
    Ok(())
}

fn get(map: &ShmMap, key: &str) -> Result<()> {
    match map.get_owned(key)? {
        Some(value) => println!("{}", value),
        None => println!("(not found)"),
    }
    Ok(())
}

fn iterate(map: &ShmMap) -> Result<()> {
    map.for_each(|key, value| println!("{} = {}", key, value))?;
    println!("{} entries", map.len());
    Ok(())
}

fn show_stats(map: &ShmMap, json: bool) -> Result<()> {
    let info = map.info()?;
    if json {
        let text = serde_json::to_string_pretty(&info)
            .map_err(|e| ShmMapError::platform(format!("Failed to encode stats: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Map:");
    println!("  Mode: {}", info.init_mode);
    println!("  Buckets: {}", info.bucket_count);
    println!("  Entries: {}", info.entry_count);
    println!("  Size classes: {}", info.size_class_count);
    println!("Pool:");
    println!("  Pool size: {} bytes", info.pool.pool_size);
    println!("  Allocated area: {} bytes", info.pool.allocated_area_size);
    println!("  Free area: {} bytes", info.pool.free_area_size);
    println!("  Used: {} bytes", info.pool.used_size);
    println!("  Parked in free lists: {} bytes", info.pool.free_size);
    println!("  Utilization: {:.1}%", info.pool.utilization() * 100.0);
    Ok(())
}

fn show_free_lists(map: &ShmMap) -> Result<()> {
    let lists = map.free_list_info()?;
    if lists.is_empty() {
        println!("No parked blocks");
    }
    for list in lists {
        println!("{:>8} bytes: {} blocks", list.payload_size, list.count);
    }
    Ok(())
}

fn shell(map: &mut ShmMap) -> Result<()> {
    println!("Commands: put <key> <value> | get <key> | contains <key> | size | iter | stats | free | quit");
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout()
            .flush()
            .map_err(|e| ShmMapError::from_io(e, "Failed to flush stdout"))?;

        line.clear();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .map_err(|e| ShmMapError::from_io(e, "Failed to read command"))?;
        if read == 0 {
            break;
        }

        let mut words = line.trim_end_matches(['\n', '\r']).splitn(3, ' ');
        let outcome = match (words.next(), words.next(), words.next()) {
            (Some("put"), Some(key), Some(value)) => put(map, key, value),
            (Some("get"), Some(key), None) => get(map, key),
            (Some("contains"), Some(key), None) => map.contains(key).map(|found| println!("{}", found)),
            (Some("size"), None, None) => {
                println!("{}", map.len());
                Ok(())
            }
            (Some("iter"), None, None) => iterate(map),
            (Some("stats"), None, None) => show_stats(map, false),
            (Some("free"), None, None) => show_free_lists(map),
            (Some("quit"), None, None) | (Some("exit"), None, None) => break,
            (Some(""), None, None) => Ok(()),
            _ => {
                println!("Unknown command: {}", line.trim());
                Ok(())
            }
        };

        // a failed command is reported and the shell keeps going
        if let Err(e) = outcome {
            println!("Error: {}", e);
        }
    }

    map.flush()
}
