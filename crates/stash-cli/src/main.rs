use std::env;
use std::path::Path;
use std::path::PathBuf;

use regex::Regex;
use serde_json::Value;
use stash_core::actions::StoreAction;
use stash_core::actions::ValueTransform;
use stash_core::config::Config;
use stash_core::error::StashResult;
use stash_core::persistence::PersistedEntry;
use stash_core::persistence::PersistedStorageAction;
use stash_core::persistence::StorageJournal;
use stash_core::reducer::reduce;
use stash_core::reducer::StorageEffect;
use stash_core::state::StorageKey;
use stash_core::state::StorageState;
use stash_core::state::Timestamp;
use tracing::debug;

mod logging;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let (options, rest) = parse_global_options(env::args().skip(1).collect())?;
    let Some((command, args)) = rest.split_first() else {
        print_help();
        return Ok(());
    };

    match command.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            return Ok(());
        }
        "--version" | "-V" | "version" => {
            println!("stash {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let command = match parse_command(command, args) {
        Ok(command) => command,
        Err(err) => {
            print_help();
            return Err(err);
        }
    };

    let config = load_config(&options)?;
    logging::init_logging(&config.logging)?;
    let data_dir = resolve_data_dir(&options, &config);
    let mut session = Session::open(&config, &data_dir)?;
    execute(&mut session, command)
}

#[derive(Debug, Default, PartialEq)]
struct GlobalOptions {
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

fn parse_global_options(
    args: Vec<String>,
) -> Result<(GlobalOptions, Vec<String>), Box<dyn std::error::Error>> {
    let mut options = GlobalOptions::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--config requires a path".into());
                };
                options.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--data-dir" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--data-dir requires a path".into());
                };
                options.data_dir = Some(PathBuf::from(value));
                i += 2;
            }
            _ => break,
        }
    }
    Ok((options, args[i..].to_vec()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Yaml,
}

#[derive(Debug, PartialEq)]
enum Command {
    Set {
        key: StorageKey,
        value: Value,
        timestamp: Option<Timestamp>,
    },
    Get {
        key: StorageKey,
    },
    Remove {
        key: StorageKey,
    },
    Clear {
        keep: Vec<StorageKey>,
    },
    Rewrite {
        prefix: String,
        value: Value,
    },
    List {
        pattern: Option<String>,
    },
    Export {
        format: ExportFormat,
    },
    Compact,
    Status,
}

fn parse_command(command: &str, args: &[String]) -> Result<Command, Box<dyn std::error::Error>> {
    match command {
        "set" => {
            let mut prefix = None;
            let mut timestamp = None;
            let mut positional = Vec::new();
            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--prefix" => {
                        prefix = Some(flag_value(args, i, "--prefix")?.to_string());
                        i += 2;
                    }
                    "--ts" => {
                        let raw = flag_value(args, i, "--ts")?;
                        let millis = raw
                            .parse::<i64>()
                            .map_err(|_| format!("--ts expects milliseconds, got {raw}"))?;
                        timestamp = Some(Timestamp::from_millis(millis));
                        i += 2;
                    }
                    other => {
                        positional.push(other.to_string());
                        i += 1;
                    }
                }
            }
            let [name, value] = positional.as_slice() else {
                return Err("usage: stash set <name> <value> [--prefix P] [--ts MILLIS]".into());
            };
            Ok(Command::Set {
                key: key_for(prefix, name),
                value: parse_value(value),
                timestamp,
            })
        }
        "get" | "rm" => {
            let (prefix, name) = parse_named_key(command, args)?;
            let key = key_for(prefix, &name);
            if command == "get" {
                Ok(Command::Get { key })
            } else {
                Ok(Command::Remove { key })
            }
        }
        "clear" => {
            let mut keep = Vec::new();
            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--keep" => {
                        keep.push(StorageKey::global(flag_value(args, i, "--keep")?));
                        i += 2;
                    }
                    "--keep-scoped" => {
                        let (Some(prefix), Some(name)) = (args.get(i + 1), args.get(i + 2)) else {
                            return Err("--keep-scoped requires a prefix and a name".into());
                        };
                        keep.push(StorageKey::scoped(prefix.as_str(), name.as_str()));
                        i += 3;
                    }
                    other => return Err(format!("unsupported argument: {other}").into()),
                }
            }
            Ok(Command::Clear { keep })
        }
        "rewrite" => {
            let [prefix, value] = args else {
                return Err("usage: stash rewrite <prefix> <value>".into());
            };
            Ok(Command::Rewrite {
                prefix: prefix.clone(),
                value: parse_value(value),
            })
        }
        "list" => match args {
            [] => Ok(Command::List { pattern: None }),
            [flag, pattern] if flag == "--match" => {
                Regex::new(pattern)?;
                Ok(Command::List {
                    pattern: Some(pattern.clone()),
                })
            }
            _ => Err("usage: stash list [--match REGEX]".into()),
        },
        "export" => {
            let format = match args {
                [] => ExportFormat::Json,
                [flag, format] if flag == "--format" => match format.as_str() {
                    "json" => ExportFormat::Json,
                    "yaml" => ExportFormat::Yaml,
                    other => return Err(format!("unsupported export format: {other}").into()),
                },
                _ => return Err("usage: stash export [--format json|yaml]".into()),
            };
            Ok(Command::Export { format })
        }
        "compact" => Ok(Command::Compact),
        "status" => Ok(Command::Status),
        _ => Err(format!("unknown command: {command}").into()),
    }
}

fn flag_value<'a>(
    args: &'a [String],
    index: usize,
    flag: &str,
) -> Result<&'a str, Box<dyn std::error::Error>> {
    args.get(index + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value").into())
}

fn parse_named_key(
    command: &str,
    args: &[String],
) -> Result<(Option<String>, String), Box<dyn std::error::Error>> {
    match args {
        [name] => Ok((None, name.clone())),
        [name, flag, prefix] if flag == "--prefix" => Ok((Some(prefix.clone()), name.clone())),
        [flag, prefix, name] if flag == "--prefix" => Ok((Some(prefix.clone()), name.clone())),
        _ => Err(format!("usage: stash {command} <name> [--prefix P]").into()),
    }
}

fn key_for(prefix: Option<String>, name: &str) -> StorageKey {
    match prefix {
        Some(prefix) => StorageKey::scoped(prefix, name),
        None => StorageKey::global(name),
    }
}

/// JSON when it parses, otherwise the raw text as a JSON string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load_config(options: &GlobalOptions) -> StashResult<Config> {
    let path = options.config.clone().or_else(|| {
        dirs::config_dir().map(|dir| dir.join("stash").join("config.toml"))
    });
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn resolve_data_dir(options: &GlobalOptions, config: &Config) -> PathBuf {
    options
        .data_dir
        .clone()
        .or_else(|| config.storage.data_dir.clone())
        .or_else(|| dirs::data_dir().map(|dir| dir.join("stash")))
        .unwrap_or_else(|| PathBuf::from(".stash"))
}

/// A restored store bound to its journal.
struct Session {
    journal: StorageJournal,
    state: StorageState,
    snapshot_every: u64,
}

impl Session {
    fn open(config: &Config, data_dir: &Path) -> StashResult<Self> {
        let journal = StorageJournal::open(
            config.storage.journal_path(data_dir),
            config.storage.snapshot_path(data_dir),
        )?;
        let state = journal.restore()?;
        Ok(Self {
            journal,
            state,
            snapshot_every: config.storage.snapshot_every,
        })
    }

    /// Reduces `action` and journals it when the entries changed.
    fn dispatch(&mut self, action: StoreAction) -> StashResult<bool> {
        let before = self.state.clone();
        let persisted = PersistedStorageAction::from_action(&action);
        let kind = action.kind().to_string();
        let effects = reduce(&mut self.state, action);
        if !effects.contains(&StorageEffect::PersistEntries) {
            debug!(kind = kind.as_str(), "action left storage unchanged");
            return Ok(false);
        }

        let persisted = persisted.unwrap_or_else(|| PersistedStorageAction::StorageRehydrate {
            snapshot: self
                .state
                .changed_since(&before)
                .into_iter()
                .map(PersistedEntry::from)
                .collect(),
        });
        let seq = self.journal.append(persisted)?;
        debug!(kind = kind.as_str(), seq, "journaled storage change");

        if self.journal.pending()? > self.snapshot_every {
            self.journal.compact(&self.state)?;
        }
        Ok(true)
    }
}

fn execute(session: &mut Session, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Set {
            key,
            value,
            timestamp,
        } => {
            let timestamp = timestamp.unwrap_or_else(Timestamp::now);
            let action = match &key {
                StorageKey::Scoped { prefix, name } => {
                    StoreAction::set_item(prefix.as_str(), name.as_str(), value, timestamp)
                }
                StorageKey::Global { name } => {
                    StoreAction::set_global_item(name.as_str(), value, timestamp)
                }
            };
            if !session.dispatch(action)? {
                println!("kept newer value at {key}");
            }
            Ok(())
        }
        Command::Get { key } => match session.state.value(&key) {
            Some(value) => {
                println!("{}", serde_json::to_string_pretty(value)?);
                Ok(())
            }
            None => Err(format!("no entry for {key}").into()),
        },
        Command::Remove { key } => {
            let action = match &key {
                StorageKey::Scoped { prefix, name } => {
                    StoreAction::remove_item(prefix.as_str(), name.as_str())
                }
                StorageKey::Global { name } => StoreAction::remove_global_item(name.as_str()),
            };
            session.dispatch(action)?;
            Ok(())
        }
        Command::Clear { keep } => {
            let before = session.state.len();
            session.dispatch(StoreAction::clear(keep))?;
            println!("removed {} entries", before - session.state.len());
            Ok(())
        }
        Command::Rewrite { prefix, value } => {
            let before = session.state.clone();
            session.dispatch(StoreAction::on_items_with_prefix(
                prefix,
                ValueTransform::constant(value),
            ))?;
            println!("rewrote {} entries", session.state.changed_since(&before).len());
            Ok(())
        }
        Command::List { pattern } => {
            let pattern = pattern.as_deref().map(Regex::new).transpose()?;
            for line in list_lines(&session.state, pattern.as_ref()) {
                println!("{line}");
            }
            Ok(())
        }
        Command::Export { format } => {
            println!("{}", export(&session.state, format)?);
            Ok(())
        }
        Command::Compact => {
            let seq = session.journal.compact(&session.state)?;
            println!("snapshot written at seq {seq}");
            Ok(())
        }
        Command::Status => {
            println!("initialized: {}", session.state.initialized());
            println!("entries: {}", session.state.len());
            println!("last seq: {}", session.journal.last_seq());
            println!("pending: {}", session.journal.pending()?);
            println!("journal: {}", session.journal.path().display());
            println!("snapshot: {}", session.journal.snapshot_path().display());
            Ok(())
        }
    }
}

fn list_lines(state: &StorageState, pattern: Option<&Regex>) -> Vec<String> {
    state
        .iter()
        .filter(|(key, _)| pattern.map_or(true, |pattern| pattern.is_match(&key.flat())))
        .map(|(key, record)| {
            let kind = if key.is_global() { "global" } else { "scoped" };
            let timestamp = record
                .timestamp
                .map_or_else(|| "-".to_string(), |ts| ts.to_string());
            format!("{kind}\t{key}\t{timestamp}\t{}", record.value)
        })
        .collect()
}

fn export(state: &StorageState, format: ExportFormat) -> Result<String, Box<dyn std::error::Error>> {
    let entries: Vec<PersistedEntry> = state
        .iter()
        .map(|(key, record)| PersistedEntry {
            key: key.clone(),
            record: record.clone(),
        })
        .collect();
    let rendered = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&entries)?,
        ExportFormat::Yaml => serde_yaml::to_string(&entries)?,
    };
    Ok(rendered)
}

fn print_help() {
    println!(
        "stash {}\n\n\
         USAGE:\n  \
         stash [--config FILE] [--data-dir DIR] <command>\n\n\
         COMMANDS:\n  \
         set <name> <value> [--prefix P] [--ts MILLIS]\n  \
         get <name> [--prefix P]\n  \
         rm <name> [--prefix P]\n  \
         clear [--keep NAME]... [--keep-scoped PREFIX NAME]...\n  \
         rewrite <prefix> <value>\n  \
         list [--match REGEX]\n  \
         export [--format json|yaml]\n  \
         compact\n  \
         status",
        env!("CARGO_PKG_VERSION")
    );
}
