use sispopd_log as logging;

mod report;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use sispopd_checkpoints::{Checkpoints, KvCheckpointStore};
use sispopd_consensus::{consensus_params, Network};
use sispopd_log::{log_info, log_warn};
use sispopd_storage::fjall::FjallStore;
use sispopd_storage::memory::MemoryStore;
use sispopd_storage::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch};

const DEFAULT_DATA_DIR: &str = "data";
const DATA_DIR_LOCK_FILE_NAME: &str = ".lock";
const CHECKPOINTS_FILE_NAME: &str = "checkpoints.json";
const DEFAULT_CHECKPOINT_COUNT: usize = 60;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Fjall => "fjall",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Command {
    Status,
    Checkpoints,
    HardForks,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct RangeQuery {
    start: Option<u64>,
    end: Option<u64>,
    count: Option<usize>,
}

#[derive(Debug)]
struct Config {
    command: Command,
    backend: Backend,
    data_dir: PathBuf,
    network: Network,
    checkpoints_file: PathBuf,
    read_only: bool,
    range: RangeQuery,
    export_path: Option<PathBuf>,
    log_level: logging::Level,
    log_format: logging::Format,
    log_timestamps: bool,
}

#[derive(Debug)]
enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

pub(crate) enum Store {
    Memory(MemoryStore),
    Fjall(FjallStore),
}

impl KeyValueStore for Store {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Store::Memory(store) => store.get(column, key),
            Store::Fjall(store) => store.get(column, key),
        }
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.put(column, key, value),
            Store::Fjall(store) => store.put(column, key, value),
        }
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.delete(column, key),
            Store::Fjall(store) => store.delete(column, key),
        }
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        match self {
            Store::Memory(store) => store.scan_prefix(column, prefix),
            Store::Fjall(store) => store.scan_prefix(column, prefix),
        }
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.for_each_prefix(column, prefix, visitor),
            Store::Fjall(store) => store.for_each_prefix(column, prefix, visitor),
        }
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.write_batch(batch),
            Store::Fjall(store) => store.write_batch(batch),
        }
    }
}

struct DataDirLock {
    _file: File,
}

fn lock_data_dir(data_dir: &Path) -> Result<DataDirLock, String> {
    let lock_path = data_dir.join(DATA_DIR_LOCK_FILE_NAME);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|err| format!("failed to open lock file {}: {err}", lock_path.display()))?;

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();
            Ok(DataDirLock { _file: file })
        }
        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
            let mut holder = String::new();
            let _ =
                File::open(&lock_path).and_then(|mut reader| reader.read_to_string(&mut holder));
            let holder = holder.trim();
            let suffix = if holder.is_empty() {
                String::new()
            } else {
                format!(" ({holder})")
            };
            Err(format!(
                "data dir {} is already locked (another sispopd instance may be running); lock file {}{suffix}",
                data_dir.display(),
                lock_path.display()
            ))
        }
        Err(err) => Err(format!(
            "failed to lock data dir {} (lock file {}): {err}",
            data_dir.display(),
            lock_path.display()
        )),
    }
}

fn open_store(config: &Config) -> Result<(Store, Option<DataDirLock>), String> {
    match config.backend {
        Backend::Memory => Ok((Store::Memory(MemoryStore::new()), None)),
        Backend::Fjall => {
            fs::create_dir_all(&config.data_dir).map_err(|err| {
                format!(
                    "failed to create data dir {}: {err}",
                    config.data_dir.display()
                )
            })?;
            let lock = lock_data_dir(&config.data_dir)?;
            let db_path = config.data_dir.join("db");
            let store = FjallStore::open(&db_path).map_err(|err| {
                format!("failed to open store at {}: {err}", db_path.display())
            })?;
            Ok((Store::Fjall(store), Some(lock)))
        }
    }
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|err| err.to_string())?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path).map_err(|err| err.to_string())?;
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| err.to_string())
}

pub fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("sispopd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config),
    }
}

fn run_with_config(config: Config) -> Result<(), String> {
    logging::init(logging::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let params = consensus_params(config.network);
    if config.command == Command::HardForks {
        return print_json(&report::hard_fork_report(&params));
    }

    log_info!(
        "Startup: backend={}, network={}, data_dir={}, read_only={}",
        config.backend.as_str(),
        config.network,
        config.data_dir.display(),
        config.read_only
    );
    let (store, _lock) = open_store(&config)?;
    let store = if config.read_only {
        KvCheckpointStore::read_only(store)
    } else {
        KvCheckpointStore::open(store)
    }
    .map_err(|err| format!("failed to load checkpoint index: {err}"))?;

    let mut ledger = Checkpoints::new();
    if !ledger.init_with_params(&params, store) {
        return Err(format!("failed to seed {} checkpoints", config.network));
    }
    if config.read_only {
        log_warn!(
            "Read-only store: skipping checkpoints file {}",
            config.checkpoints_file.display()
        );
    } else if !ledger.load_new_checkpoints(&config.checkpoints_file) {
        return Err(format!(
            "failed to load checkpoints from {}",
            config.checkpoints_file.display()
        ));
    }

    match config.command {
        Command::Status => print_json(&report::status_report(
            &ledger,
            &params,
            config.backend.as_str(),
            config.data_dir.display().to_string(),
        )),
        Command::Checkpoints => {
            let range = &config.range;
            let entries = report::checkpoint_entries(
                &ledger,
                range.start,
                range.end,
                range.count.unwrap_or(DEFAULT_CHECKPOINT_COUNT),
            );
            if let Some(path) = &config.export_path {
                let file = serde_json::json!({ "hashlines": report::hash_lines(&entries) });
                write_file_atomic(path, to_json(&file)?.as_bytes())?;
                log_info!("Exported {} checkpoints to {}", entries.len(), path.display());
            }
            print_json(&entries)
        }
        Command::HardForks => print_json(&report::hard_fork_report(&params)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    println!("{}", to_json(value)?);
    Ok(())
}

fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut command = Command::Status;
    let mut backend = Backend::Fjall;
    let mut data_dir: Option<PathBuf> = None;
    let mut network = Network::Mainnet;
    let mut checkpoints_file: Option<PathBuf> = None;
    let mut read_only = false;
    let mut range = RangeQuery::default();
    let mut export_path: Option<PathBuf> = None;
    let mut log_level = logging::Level::Info;
    let mut log_format = logging::Format::Text;
    let mut log_timestamps = true;
    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            "status" => {
                let _ = args.next();
            }
            "checkpoints" => {
                command = Command::Checkpoints;
                let _ = args.next();
            }
            "hardforks" => {
                command = Command::HardForks;
                let _ = args.next();
            }
            _ => {}
        }
    }
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --backend\n{}", usage()))?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid backend '{value}'\n{}", usage()))?;
            }
            "--data-dir" | "--datadir" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --data-dir\n{}", usage()))?;
                data_dir = Some(PathBuf::from(value));
            }
            "--network" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --network\n{}", usage()))?;
                network = Network::parse(&value)
                    .ok_or_else(|| format!("invalid network '{value}'\n{}", usage()))?;
            }
            "--testnet" => network = Network::Testnet,
            "--devnet" => network = Network::Devnet,
            "--checkpoints-file" => {
                let value = args.next().ok_or_else(|| {
                    format!("missing value for --checkpoints-file\n{}", usage())
                })?;
                checkpoints_file = Some(PathBuf::from(value));
            }
            "--read-only" => read_only = true,
            "--start" => {
                range.start = Some(parse_number(&mut args, "--start")?);
            }
            "--end" => {
                range.end = Some(parse_number(&mut args, "--end")?);
            }
            "--count" => {
                let count: u64 = parse_number(&mut args, "--count")?;
                range.count = Some(
                    usize::try_from(count)
                        .map_err(|_| format!("invalid --count '{count}'\n{}", usage()))?,
                );
            }
            "--export" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --export\n{}", usage()))?;
                export_path = Some(PathBuf::from(value));
            }
            "--log-level" | "--loglevel" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-level\n{}", usage()))?;
                log_level = logging::Level::parse(&value)
                    .ok_or_else(|| format!("invalid log level '{value}'\n{}", usage()))?;
            }
            "--log-format" | "--logformat" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("missing value for --log-format\n{}", usage()))?;
                log_format = logging::Format::parse(&value)
                    .ok_or_else(|| format!("invalid log format '{value}'\n{}", usage()))?;
            }
            "--log-timestamps" | "--logtimestamps" => log_timestamps = true,
            "--no-log-timestamps" | "--no-logtimestamps" => log_timestamps = false,
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
    }

    if command != Command::Checkpoints && (range != RangeQuery::default() || export_path.is_some())
    {
        return Err(format!(
            "--start/--end/--count/--export only apply to the checkpoints command\n{}",
            usage()
        ));
    }
    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let checkpoints_file = checkpoints_file.unwrap_or_else(|| data_dir.join(CHECKPOINTS_FILE_NAME));
    Ok(CliAction::Run(Config {
        command,
        backend,
        data_dir,
        network,
        checkpoints_file,
        read_only,
        range,
        export_path,
        log_level,
        log_format,
        log_timestamps,
    }))
}

fn parse_number<I>(args: &mut I, flag: &str) -> Result<u64, String>
where
    I: Iterator<Item = String>,
{
    let value = args
        .next()
        .ok_or_else(|| format!("missing value for {flag}\n{}", usage()))?;
    value
        .parse::<u64>()
        .map_err(|_| format!("invalid {flag} '{value}'\n{}", usage()))
}

fn usage() -> String {
    [
        "Usage:",
        "  sispopd [command] [options]",
        "",
        "Commands:",
        "  status       Print the checkpoint ledger and consensus summary (default)",
        "  checkpoints  List stored checkpoints",
        "  hardforks    Print the hard-fork schedule of --network",
        "  help         Print this help and exit",
        "  version      Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --network  Network selection (mainnet|testnet|devnet|fakechain) (default: mainnet)",
        "  --testnet  Alias for --network testnet",
        "  --devnet  Alias for --network devnet",
        "  --data-dir  Base data directory (default: ./data)",
        "  --backend  Storage backend to use (memory|fjall) (default: fjall)",
        "  --checkpoints-file  JSON checkpoints file (default: <data-dir>/checkpoints.json)",
        "  --read-only  Open the store without seeding or writing checkpoints",
        "  --start  checkpoints: lowest height to list",
        "  --end  checkpoints: highest height to list",
        "  --count  checkpoints: number to list without both bounds (default: 60, max: 256)",
        "  --export  checkpoints: also write the listed checkpoints as a JSON checkpoints file",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --log-timestamps  Enable timestamps in text logs (default: on)",
        "  --no-log-timestamps  Disable timestamps in text logs",
    ]
    .join("\n")
}
