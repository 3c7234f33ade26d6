use digitizer::{Error as BoardError, Firmware, FunctionId, RetryPolicy, SimulatedBoard, Simulation};
use parking_lot::Mutex;
use qdcsave::cfg::Setting;
use qdcsave::driver::{self, GlobalClock, Report};
use qdcsave::session::{Cycle, Session, SessionError, SessionOptions, State};
use qdcsave::writer::{DataWriter, WriterError};
use qdctools::{AppendBuffer, Event, FillError, RecordKind};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Writer that remembers what it was given, or refuses everything
#[derive(Default)]
struct Recorder {
    units: Mutex<Vec<(u64, u64, RecordKind, usize)>>,
    announced: Mutex<Vec<u64>>,
    refuse: bool,
}

impl Recorder {
    fn refusing() -> Self {
        Recorder { refuse: true, ..Default::default() }
    }

    fn record(&self, id: u64, timestamp: u64, kind: RecordKind, elements: usize) -> Result<(), WriterError> {
        if self.refuse {
            return Err(WriterError::Closed);
        }
        self.units.lock().push((id, timestamp, kind, elements));
        Ok(())
    }
}

impl DataWriter for Recorder {
    fn add_digitizer(&self, id: u64) -> Result<(), WriterError> {
        self.announced.lock().push(id);
        Ok(())
    }

    fn write_buffer(&self, kind: RecordKind, buffer: &AppendBuffer, id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.record(id, timestamp, kind, buffer.len())
    }

    fn write_set(&self, events: &BTreeSet<Event>, id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.record(id, timestamp, RecordKind::Extended, events.len())
    }

    fn write_vec(&self, events: &[Event], id: u64, timestamp: u64) -> Result<(), WriterError> {
        self.record(id, timestamp, RecordKind::Extended, events.len())
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        retry: RetryPolicy { initial_delay: Duration::from_micros(10), ..Default::default() },
        ready_poll: Duration::from_millis(1),
        buffer_events: None,
    }
}

fn session(sim: Simulation) -> Session<SimulatedBoard> {
    Session::new(SimulatedBoard::new(Simulation { seed: Some(3), ..sim }), options())
}

/// Configured, initialized, prepared and started
fn acquiring(sim: Simulation, writer: &dyn DataWriter) -> Session<SimulatedBoard> {
    let mut s = session(sim);
    s.initialize(writer).unwrap();
    s.prepare().unwrap();
    assert!(s.start_acquisition(&AtomicBool::new(true)).unwrap());
    s
}

#[test]
fn lifecycle() {
    let rec = Recorder::default();
    let mut s = session(Simulation { events_per_group: 4, ..Default::default() });
    let monitor = s.board().monitor();
    assert_eq!(State::Closed, s.state());
    assert_eq!("V1740D_137", s.name());

    s.configure(&[Setting { function: FunctionId::DPPGateWidth, index: Some(0), value: 40 }]).unwrap();
    s.initialize(&rec).unwrap();
    assert_eq!(State::Initialized, s.state());
    assert_eq!(vec![137], *rec.announced.lock());
    let layout = s.layout().unwrap();
    assert_eq!(RecordKind::Extended, layout.kind);
    assert_eq!(14, layout.element_size);
    assert_eq!(vec![0, 1], layout.groups);

    s.prepare().unwrap();
    assert!(s.start_acquisition(&AtomicBool::new(true)).unwrap());
    assert_eq!(State::Acquiring, s.state());
    assert!(monitor.started.load(Ordering::SeqCst));

    match s.acquisition(&rec, 1).unwrap() {
        Cycle::Written { events, .. } => assert_eq!(8, events),
        c => panic!("unexpected {:?}", c),
    }
    assert_eq!(vec![(137, 1, RecordKind::Extended, 8)], *rec.units.lock());
    let stats = s.stats();
    assert_eq!((1, 8), (stats.cycles, stats.events_found));
    assert!(stats.bytes_read > 0);

    s.stop_acquisition().unwrap();
    assert_eq!(State::Ready, s.state());
    s.close().unwrap();
    assert_eq!(State::Closed, s.state());
    assert!(monitor.stopped.load(Ordering::SeqCst));
    assert!(monitor.freed.load(Ordering::SeqCst));
    assert!(monitor.closed.load(Ordering::SeqCst));
    // closing twice is harmless
    s.close().unwrap();
}

#[test]
fn unsupported_firmware_is_refused() {
    let rec = Recorder::default();
    let mut s = session(Simulation { firmware: Firmware::Psd, ..Default::default() });
    assert!(matches!(
        s.initialize(&rec),
        Err(SessionError::Board(BoardError::UnsupportedFirmware(Firmware::Psd)))
    ));
    assert_eq!(State::Closed, s.state());
    assert!(rec.announced.lock().is_empty());
    assert_eq!(0, s.board().monitor().reads.load(Ordering::SeqCst));
}

#[test]
fn operations_out_of_order() {
    let rec = Recorder::default();
    let mut s = session(Simulation::default());
    assert!(matches!(s.prepare(), Err(SessionError::State { state: State::Closed, .. })));
    assert!(matches!(s.acquisition(&rec, 1), Err(SessionError::State { .. })));
    s.initialize(&rec).unwrap();
    assert!(matches!(s.configure(&[]), Err(SessionError::State { state: State::Initialized, .. })));
    assert!(matches!(s.stop_acquisition(), Err(SessionError::State { .. })));
}

#[test]
fn no_groups_enabled() {
    let mut s = session(Simulation { group_mask: 0, ..Default::default() });
    assert!(matches!(s.initialize(&Recorder::default()), Err(SessionError::NoGroups)));
}

#[test]
fn waveform_geometry() {
    let rec = Recorder::default();
    let mut s = session(Simulation { waveform: true, record_length: 12, ..Default::default() });
    let set = |function, value| Setting { function, index: Some(0), value };
    s.configure(&[
        set(FunctionId::DPPPreTriggerSize, 10),
        set(FunctionId::DPPTriggerHoldOffWidth, 5),
        set(FunctionId::DPPGateWidth, 40),
        set(FunctionId::DPPGateOffset, 8),
    ])
    .unwrap();
    s.initialize(&rec).unwrap();
    let layout = s.layout().unwrap();
    assert_eq!(RecordKind::Waveform, layout.kind);
    // 12 samples rounded up to 16
    assert_eq!(16, layout.format.samples());
    assert_eq!(30 + 2 * 16, layout.element_size);
    // group 0: gate window 40 - 8 + 10 wins, group 1: the record length
    assert_eq!(vec![84, 24], layout.windows);
}

#[test]
fn readout_must_hold_one_window_per_group() {
    let rec = Recorder::default();
    let windowed = |readout_bytes| {
        let mut s = session(Simulation { waveform: true, record_length: 12, readout_bytes, ..Default::default() });
        let set = |function, value| Setting { function, index: Some(0), value };
        s.configure(&[
            set(FunctionId::DPPPreTriggerSize, 10),
            set(FunctionId::DPPTriggerHoldOffWidth, 5),
            set(FunctionId::DPPGateWidth, 40),
            set(FunctionId::DPPGateOffset, 8),
        ])
        .unwrap();
        s
    };

    let mut s = windowed(263);
    let monitor = s.board().monitor();
    s.initialize(&rec).unwrap();
    // board header, then per group: header, time, extras and charge words, half a word per window sample
    assert_eq!(4 * (2 + (2 + 3 + 42) + (2 + 3 + 12)), s.layout().unwrap().window_bytes());
    assert!(matches!(
        s.prepare(),
        Err(SessionError::Board(BoardError::ReadoutOverflow { capacity: 263, needed: 264 }))
    ));
    assert_eq!(State::Initialized, s.state());
    assert!(monitor.freed.load(Ordering::SeqCst));

    let mut s = windowed(264);
    s.initialize(&rec).unwrap();
    s.prepare().unwrap();
    assert_eq!(State::Ready, s.state());
}

#[test]
fn record_length_beyond_sample_field() {
    let rec = Recorder::default();
    let mut s = session(Simulation { waveform: true, record_length: 40_000, ..Default::default() });
    match s.initialize(&rec) {
        Err(SessionError::RecordLength { samples, max }) => {
            assert_eq!(40_000, samples);
            assert_eq!(32_760, max);
        }
        r => panic!("unexpected {:?}", r),
    }
    assert_eq!(State::Closed, s.state());
    assert!(rec.announced.lock().is_empty());

    let mut s = session(Simulation { waveform: true, record_length: 32_760, ..Default::default() });
    s.initialize(&rec).unwrap();
    assert_eq!(32_760, s.layout().unwrap().format.samples());
}

#[test]
fn idle_cycles_write_nothing() {
    let rec = Recorder::default();
    let mut s = acquiring(Simulation { idle_every: 1, ..Default::default() }, &rec);
    assert!(matches!(s.acquisition(&rec, 1).unwrap(), Cycle::Idle));
    assert!(matches!(s.acquisition(&rec, 2).unwrap(), Cycle::Idle));
    assert!(rec.units.lock().is_empty());
    let stats = s.stats();
    assert_eq!((2, 2, 0), (stats.cycles, stats.idle_cycles, stats.bytes_read));
}

#[test]
fn corrupt_cycle_is_lost_and_acquisition_continues() {
    let rec = Recorder::default();
    let mut s = acquiring(Simulation { corrupt_every: 2, ..Default::default() }, &rec);
    let outcomes: Vec<_> = (1..=3).map(|ts| s.acquisition(&rec, ts).unwrap()).collect();
    assert!(matches!(outcomes[0], Cycle::Written { .. }));
    assert!(matches!(outcomes[1], Cycle::Lost(FillError::Decode(_))));
    assert!(matches!(outcomes[2], Cycle::Written { .. }));
    let stamps: Vec<_> = rec.units.lock().iter().map(|u| u.1).collect();
    assert_eq!(vec![1, 3], stamps);
    assert_eq!(1, s.stats().lost_cycles);
}

#[test]
fn overflowing_record_buffer_loses_the_cycle() {
    let rec = Recorder::default();
    let mut s = Session::new(
        SimulatedBoard::new(Simulation { seed: Some(3), events_per_group: 4, ..Default::default() }),
        SessionOptions { buffer_events: Some(5), ..options() },
    );
    s.initialize(&rec).unwrap();
    s.prepare().unwrap();
    assert!(s.start_acquisition(&AtomicBool::new(true)).unwrap());
    assert!(matches!(s.acquisition(&rec, 1).unwrap(), Cycle::Lost(FillError::Buffer(_))));
    assert!(rec.units.lock().is_empty());
}

#[test]
fn failed_write_is_not_fatal() {
    let rec = Recorder::refusing();
    let mut s = acquiring(Simulation::default(), &rec);
    assert!(matches!(s.acquisition(&rec, 1).unwrap(), Cycle::WriteFailed(WriterError::Closed)));
    assert!(matches!(s.acquisition(&rec, 2).unwrap(), Cycle::WriteFailed(_)));
    let stats = s.stats();
    assert_eq!((2, 2), (stats.cycles, stats.failed_writes));
    assert_eq!(State::Acquiring, s.state());
}

#[test]
fn waits_for_board_ready() {
    let rec = Recorder::default();
    let mut s = session(Simulation { polls_until_ready: 3, ..Default::default() });
    let monitor = s.board().monitor();
    s.initialize(&rec).unwrap();
    s.prepare().unwrap();
    assert!(s.start_acquisition(&AtomicBool::new(true)).unwrap());
    assert_eq!(4, monitor.status_polls.load(Ordering::SeqCst));
}

#[test]
fn stop_while_waiting_for_ready() {
    let rec = Recorder::default();
    let mut s = session(Simulation { polls_until_ready: u32::MAX, ..Default::default() });
    let monitor = s.board().monitor();
    s.initialize(&rec).unwrap();
    s.prepare().unwrap();
    assert!(!s.start_acquisition(&AtomicBool::new(false)).unwrap());
    assert_eq!(State::Ready, s.state());
    assert!(!monitor.started.load(Ordering::SeqCst));
}

#[test]
fn transient_failures_are_retried() {
    let rec = Recorder::default();
    let mut s = session(Simulation { transient_failures: 3, ..Default::default() });
    s.initialize(&rec).unwrap();
    assert_eq!(3, s.board().monitor().transient_failures.load(Ordering::SeqCst));

    let mut s = session(Simulation { transient_failures: 10, ..Default::default() });
    match s.initialize(&rec) {
        Err(SessionError::Board(BoardError::Exhausted { retries, source })) => {
            assert_eq!(3, retries);
            assert!(source.is_transient());
        }
        r => panic!("unexpected {:?}", r),
    }
}

#[test]
fn driver_stamps_and_closes() {
    let rec = Arc::new(Recorder::default());
    let writer: Arc<dyn DataWriter> = rec.clone();
    let mut s = session(Simulation { events_per_group: 2, read_delay: Duration::from_micros(200), ..Default::default() });
    let monitor = s.board().monitor();
    s.initialize(writer.as_ref()).unwrap();
    s.prepare().unwrap();

    let keep_running = Arc::new(AtomicBool::new(true));
    let (sender, receiver) = flume::unbounded();
    let handle = driver::spawn(s, writer, GlobalClock::new(), keep_running.clone(), sender);
    assert_eq!(137, handle.id);
    for report in receiver.iter() {
        if let Report::Cycle { stats, .. } = report {
            if stats.cycles >= 20 {
                keep_running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    let stats = handle.join_handle.join().unwrap().unwrap();
    assert!(stats.cycles >= 20);
    assert!(monitor.closed.load(Ordering::SeqCst));

    let units = rec.units.lock();
    assert_eq!(stats.cycles as usize, units.len());
    assert!(units.windows(2).all(|w| w[0].1 < w[1].1));
    assert!(matches!(
        receiver.iter().last(),
        Some(Report::Finished { id: 137, error: None, .. })
    ));
}

#[test]
fn driver_closes_when_stopped_before_start() {
    let mut s = session(Simulation { polls_until_ready: u32::MAX, ..Default::default() });
    let monitor = s.board().monitor();
    let rec = Recorder::default();
    s.initialize(&rec).unwrap();
    s.prepare().unwrap();
    let (sender, receiver) = flume::unbounded();
    let stats = driver::run(&mut s, &rec, GlobalClock::new(), &AtomicBool::new(false), &sender).unwrap();
    assert_eq!(0, stats.cycles);
    assert_eq!(State::Closed, s.state());
    assert!(monitor.closed.load(Ordering::SeqCst));
    assert_eq!(
        Some(Report::Finished { id: 137, stats, error: None }),
        receiver.try_iter().last()
    );
}
