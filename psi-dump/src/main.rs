//! psi-dump: PSI/SI section and table dumper for MPEG transport streams.
//!
//! Reads a TS file (or stdin), demultiplexes the signalling sections of the
//! selected PIDs and writes one record per table as text or JSON lines.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use psi_demux::{pid, DemuxConfig, PidDiagnostics, SectionDemux, TsPacket};

mod logger;
mod logging;
mod pat;
mod source;
#[cfg(test)]
mod testing;

use logger::{LoggerOptions, PsiLogger};
use source::PacketReader;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG: &str = "psi-dump.toml";

/// PIDs tracked by `--psi`. PMT PIDs are added from the PAT.
const PSI_PIDS: [u16; 6] = [pid::PAT, pid::CAT, pid::NIT, pid::SDT, pid::EIT, pid::TDT];

/// psi-dump - Dump PSI/SI sections and tables from an MPEG transport stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input TS file ("-" or omitted for stdin)
    input: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// PID to track (decimal or 0x-prefixed hex); repeatable
    #[arg(short, long = "pid", value_parser = parse_pid)]
    pids: Vec<u16>,

    /// Track the standard PSI/SI PIDs and every PMT announced by the PAT
    #[arg(long)]
    psi: bool,

    /// Log every new section, not only complete tables
    #[arg(long)]
    all_sections: bool,

    /// Also accept sections flagged as not yet applicable
    #[arg(long)]
    include_next: bool,

    /// Write JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Stop after this many packets
    #[arg(short = 'n', long)]
    max_packets: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored (no log file when unset)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    input: InputSection,
    #[serde(default)]
    demux: DemuxConfig,
    #[serde(default)]
    output: OutputSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct InputSection {
    path: Option<String>,
    #[serde(default)]
    pids: Vec<u16>,
    psi: Option<bool>,
    max_packets: Option<u64>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct OutputSection {
    json: Option<bool>,
    all_sections: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

/// Effective settings after merging the command line over the config file.
#[derive(Debug)]
struct Settings {
    input: Option<PathBuf>,
    pids: Vec<u16>,
    psi: bool,
    max_packets: Option<u64>,
    demux: DemuxConfig,
    logger: LoggerOptions,
}

impl Settings {
    fn merge(args: &Args, file: ConfigFile) -> Self {
        let input = args
            .input
            .clone()
            .or_else(|| file.input.path.map(PathBuf::from))
            .filter(|p| p.as_os_str() != "-");

        let pids = if args.pids.is_empty() {
            file.input.pids
        } else {
            args.pids.clone()
        };

        // Without any explicit PID the PSI set is the only useful default
        let psi = args.psi || file.input.psi.unwrap_or(pids.is_empty());

        let mut demux = file.demux;
        demux.include_next |= args.include_next;

        let logger = LoggerOptions {
            all_sections: args.all_sections || file.output.all_sections.unwrap_or(false),
            json: args.json || file.output.json.unwrap_or(false),
            follow_pat: psi,
        };

        Self {
            input,
            pids,
            psi,
            max_packets: args.max_packets.or(file.input.max_packets).filter(|&n| n > 0),
            demux,
            logger,
        }
    }

    /// Tracked PIDs, deduplicated in ascending order.
    fn tracked_pids(&self) -> Vec<u16> {
        let mut pids = self.pids.clone();
        if self.psi {
            pids.extend_from_slice(&PSI_PIDS);
        }
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

fn parse_pid(value: &str) -> Result<u16, String> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    }
    .map_err(|e| format!("invalid PID '{}': {}", value, e))?;

    if parsed > pid::MAX {
        return Err(format!("PID 0x{:X} exceeds 0x{:X}", parsed, pid::MAX));
    }
    Ok(parsed)
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

fn open_input(path: Option<&Path>) -> io::Result<Box<dyn Read>> {
    match path {
        Some(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
        None => Ok(Box::new(io::stdin().lock())),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(config_path) => match load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    // Merge logging configs (command line takes precedence)
    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_deref().map(PathBuf::from));
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    logging::init_logging(
        log_dir.as_deref(),
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    let settings = Settings::merge(&args, file_config);
    run(&settings)
}

fn run(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let mut demux = SectionDemux::new(settings.demux.clone());
    for pid in settings.tracked_pids() {
        demux.track(pid)?;
    }
    demux.register_handler(PsiLogger::new(settings.logger, io::stdout()));

    info!("psi-dump starting...");
    match &settings.input {
        Some(path) => info!("  Input: {}", path.display()),
        None => info!("  Input: stdin"),
    }
    info!("  PIDs: {}", format_pids(&demux.tracked_pids()));
    if settings.psi {
        info!("  Following PMT PIDs from the PAT");
    }
    if let Some(max) = settings.max_packets {
        info!("  Max packets: {}", max);
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    let mut reader = PacketReader::new(open_input(settings.input.as_deref())?);
    let mut invalid = 0u64;
    while let Some(data) = reader.next_packet()? {
        match TsPacket::parse(data) {
            Ok(packet) => demux.feed(&packet),
            Err(e) => {
                invalid += 1;
                warn!("Packet rejected: {}", e);
            }
        }

        if stop.load(Ordering::SeqCst) {
            info!("Interrupted, stopping");
            break;
        }
        if settings.max_packets.map_or(false, |max| reader.packets() >= max) {
            info!("Reached max packets");
            break;
        }
    }

    info!(
        "Read {} packets ({} fed, {} invalid, {} bytes skipped)",
        reader.packets(),
        demux.packet_count(),
        invalid,
        reader.skipped_bytes()
    );
    log_summary(&demux);
    Ok(())
}

fn format_pids(pids: &[u16]) -> String {
    pids.iter()
        .map(|pid| format!("0x{:04X}", pid))
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_summary(demux: &SectionDemux) {
    for pid in demux.tracked_pids() {
        let Some(d) = demux.diagnostics(pid) else {
            continue;
        };
        if d.packets == 0 {
            continue;
        }
        info!(
            "PID 0x{:04X}: packets={} sections={} tables={} duplicates={} versions={} layouts={} next={}",
            pid,
            d.packets,
            d.sections,
            d.tables,
            d.duplicate_sections,
            d.version_changes,
            d.layout_changes,
            d.next_ignored
        );
        report_anomalies(pid, d);
    }

    let total = demux.total_diagnostics();
    info!(
        "Total: packets={} sections={} tables={} anomalies={}",
        total.packets,
        total.sections,
        total.tables,
        total.anomalies()
    );
}

fn report_anomalies(pid: u16, d: &PidDiagnostics) {
    if d.anomalies() == 0 {
        return;
    }
    let line = format!(
        "PID 0x{:04X}: discontinuities={} (signalled {}) transport_errors={} scrambled={} truncated={} malformed={} crc_errors={} conflicts={}",
        pid,
        d.discontinuities,
        d.signalled_discontinuities,
        d.transport_errors,
        d.scrambled,
        d.truncated_sections,
        d.malformed_sections,
        d.crc_errors,
        d.conflicts
    );
    if d.crc_errors > 0 || d.malformed_sections > 0 {
        error!("{}", line);
    } else {
        warn!("{}", line);
    }
}
