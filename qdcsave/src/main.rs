use anyhow::{bail, Context, Result};
use chrono::Local;
use digitizer::{Board, SimulatedBoard};
use qdcsave::cfg::{self, Link, RunLimit, WriterKind};
use qdcsave::driver::{self, GlobalClock, Report};
use qdcsave::session::{Session, SessionError, SessionOptions, Stats};
use qdcsave::writer::{DataWriter, DirectoryBackend, NullWriter, Synchronized};
use qdcsave::CliArgs;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Level};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

type DynSession = Session<Box<dyn Board>>;

fn open(session: &mut DynSession, settings: &cfg::DigitizerSettings, writer: &dyn DataWriter) -> Result<(), SessionError> {
    session.configure(&settings.settings)?;
    session.initialize(writer)?;
    session.prepare()
}

fn connect(settings: &cfg::DigitizerSettings) -> Box<dyn Board> {
    match &settings.link {
        Link::Simulated(sim) => Box::new(SimulatedBoard::new(sim.clone())),
    }
}

/// Write the run record next to the run file, never over an existing one
fn write_record(cfg_path: &Path, record: &cfg::Run) -> Result<PathBuf> {
    let json_record = serde_json::to_string_pretty(record)?;

    let ts = Local::now();
    let mut rcd_stem = cfg_path
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("run"))
        .to_string_lossy()
        .to_string();
    rcd_stem.push('_');
    let mut rcd_path = cfg_path.with_file_name(format!("{}{}", rcd_stem, ts.format("%F_%H-%M-%S")));
    let mut rcd_path2 = cfg_path.with_file_name(format!("{}{}", rcd_stem, ts.format("%F_%H-%M-%S%.3f")));
    rcd_path.set_extension("json");
    rcd_path2.set_extension("json");

    let create = |p: &Path| OpenOptions::new().write(true).create_new(true).open(p);
    let (f, path) = match create(&rcd_path) {
        Ok(f) => (f, rcd_path),
        Err(_) => (
            create(&rcd_path2).context("saving more than one run record per millisecond")?,
            rcd_path2,
        ),
    };
    let mut wtr = BufWriter::new(f);
    wtr.write_all(json_record.as_bytes())?;
    wtr.flush()?;
    Ok(path)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(
            concat!(
                env!("CARGO_BIN_NAME"),
                " ",
                "{}",
            ),
            GIT_VERSION,
        );
        return Ok(())
    }

    let level = match args.verbose {
        true => Level::DEBUG,
        false => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Load the run file
    let cfg_path = match args.config {
        Some(c) => PathBuf::from(c),
        None => bail!("no run file provided"),
    };
    let f = File::open(&cfg_path).with_context(|| format!("cannot open {}", cfg_path.display()))?;
    let config: cfg::Run = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("cannot parse {}", cfg_path.display()))?;
    if config.digitizers.is_empty() {
        bail!("{} declares no digitizers", cfg_path.display());
    }
    if let Some(serial) = config.duplicate_serial() {
        bail!("{} declares digitizer {} more than once", cfg_path.display(), serial);
    }

    let keep_running = Arc::new(AtomicBool::new(true));
    {
        let keep_running = keep_running.clone();
        ctrlc::set_handler(move || {
            info!("interrupted, stopping");
            keep_running.store(false, Ordering::SeqCst);
        })?;
    }

    let timestamp = Local::now();
    let run_id = timestamp.format("%Y%m%d-%H%M%S").to_string();
    let writer: Arc<dyn DataWriter> = match config.writer {
        WriterKind::Directory => {
            let out = config.output.clone().unwrap_or_else(|| PathBuf::from("."));
            Arc::new(Synchronized::new(DirectoryBackend::create(out, &run_id)?))
        }
        WriterKind::Null => Arc::new(NullWriter::new()),
    };

    // Open every digitizer before acquiring from any
    let mut sessions: Vec<DynSession> = Vec::new();
    for (n, settings) in config.digitizers.iter().enumerate() {
        let options = SessionOptions {
            retry: config.retry,
            ready_poll: config.ready_poll,
            buffer_events: settings.buffer_events,
        };
        let mut session = Session::new(connect(settings), options);
        if let Err(e) = open(&mut session, settings, writer.as_ref()) {
            for s in sessions.iter_mut().chain(std::iter::once(&mut session)) {
                if let Err(e) = s.close() {
                    warn!("closing {}: {}", s.name(), e);
                }
            }
            return Err(e).with_context(|| format!("cannot open digitizer {}", n));
        }
        info!("{} ready", session.name());
        sessions.push(session);
    }

    let clock = GlobalClock::new();
    let start = Instant::now();
    let (sender, receiver) = flume::unbounded();
    let handles: Vec<_> = sessions
        .into_iter()
        .map(|s| driver::spawn(s, writer.clone(), clock, keep_running.clone(), sender.clone()))
        .collect();
    drop(sender);

    let mut stats: HashMap<u64, Stats> = HashMap::new();
    let mut finished: HashSet<u64> = HashSet::new();
    let tick = Duration::from_millis(250);
    while finished.len() < handles.len() {
        match receiver.recv_timeout(tick) {
            Ok(Report::Cycle { id, timestamp, stats: s }) => {
                debug!("{}: cycle {} at {} ms, {} events", id, s.cycles, timestamp, s.events_found);
                stats.insert(id, s);
            }
            Ok(Report::Finished { id, stats: s, error }) => {
                if let Some(e) = error {
                    error!("digitizer {} stopped: {}", id, e);
                }
                stats.insert(id, s);
                finished.insert(id);
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }

        // Check if limit condition met and stop
        let reached = match config.limit {
            Some(RunLimit::Duration(d)) => start.elapsed() >= d,
            Some(RunLimit::Cycles(n)) => handles.iter().all(|h| {
                finished.contains(&h.id) || stats.get(&h.id).map_or(false, |s| s.cycles >= n)
            }),
            None => false,
        };
        if reached && keep_running.swap(false, Ordering::SeqCst) {
            info!("run limit reached");
        }
    }
    keep_running.store(false, Ordering::SeqCst);

    let mut failures = 0;
    let mut digitizers = config.digitizers.clone();
    for (h, settings) in handles.into_iter().zip(digitizers.iter_mut()) {
        let id = h.id;
        match h.join_handle.join() {
            Ok(Ok(s)) => {
                stats.insert(id, s);
            }
            Ok(Err(_)) => failures += 1,
            Err(_) => bail!("acquisition thread of digitizer {} panicked", id),
        }
        let s = stats.get(&id).copied().unwrap_or_default();
        info!(
            "digitizer {}: {} cycles, {} events, {} bytes, {} lost, {} not written",
            id, s.cycles, s.events_found, s.bytes_read, s.lost_cycles, s.failed_writes
        );
        settings.stats = Some(s);
    }
    let duration = start.elapsed().as_millis() as u64;
    writer.close().context("cannot close writer")?;

    // Now record the run record to disk
    let record = cfg::Run {
        // name, limit, writer, output, ready_poll, retry: from declaration
        timestamp:          Some(timestamp),
        duration:           Some(duration),
        digitizers,
        ..config
    };
    let path = write_record(&cfg_path, &record)?;
    info!("run recorded in {}", path.display());

    if failures > 0 {
        bail!("{} of {} digitizers failed", failures, record.digitizers.len());
    }
    Ok(())
}
