//! Runner for CLI execution and the capture/display thread lifecycle.
//!
//! Wires two periodic tasks into one pool: the sampling task (highest rate,
//! reads one device slot per job) and an analysis task (display-rate,
//! snapshots the sampler and runs the FFT) that fans its derived frames out
//! through a broadcast dispatcher. The terminal render loop is the
//! dispatcher's sole consumer today, but the fan-out means a second consumer
//! (e.g. a headless stats logger) could subscribe without touching the
//! analysis task at all.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossterm::{
    cursor, event, execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{error, info};
use ratatui::{backend::CrosstermBackend, Terminal};

use soto_core::cancellable::{self, CancellableSpec, WrapperContext};
use soto_core::dispatch::Dispatcher;
use soto_core::pool::{Pool, WorkOutcome};
use soto_core::queue::{Queue, TryExtracted};
use soto_core::sampler::{SampleFrame, Sampler};

use crate::audio::AlsaSource;
use crate::cli::Cli;
use crate::dsp::RealFftEngine;
use crate::logging::{self, LogLine};
use crate::ui;

/// Refresh rate of the analysis task, independent of the device's own
/// sampling period; the pool assigns rate-monotonic priority between it and
/// the sampling task purely from these two periods at `start`.
const ANALYSIS_PERIOD: Duration = Duration::from_millis(33);

/// Derived signal+spectrum data pushed by the analysis task through the
/// broadcast dispatcher to whichever plot sink is listening.
#[derive(Clone)]
struct DisplayFrame {
    signal: Vec<SampleFrame>,
    spectrum: Vec<f64>,
}

/// Parse the device, stand up the sampling pool, and drive the TUI loop
/// until `--run-for` elapses or the user quits.
pub fn run(cli: &Cli, log_buffer: Arc<Mutex<VecDeque<LogLine>>>) -> io::Result<i32> {
    info!("starting capture on {} at {} Hz", cli.device, cli.rate);

    let source = match AlsaSource::open(&cli.device, cli.rate) {
        Ok(source) => source,
        Err(err) => {
            error!("failed to open audio device: {}", err);
            return Ok(-1);
        }
    };

    let slot_count = cli.buffer_scale.max(1);
    let sampler = match Sampler::new(source, slot_count, None) {
        Ok(sampler) => Arc::new(sampler),
        Err(err) => {
            error!("failed to configure sampler: {}", err);
            return Ok(-1);
        }
    };

    // Both tasks share the unit context: each closure captures the state it
    // actually needs, so the pool itself stays monomorphized over one
    // lightweight context type rather than a context enum.
    let pool: Pool<WrapperContext<()>> = Pool::new(cli.minprio);

    let sampler_for_sampling = sampler.clone();
    let sampling_spec = CancellableSpec::new(sampler.job_period(), (), move |_: &mut ()| {
        sampler_for_sampling.run_once();
        WorkOutcome::Continue
    });
    let (sampling_handle, sampling_stats) = match cancellable::subscribe(&pool, sampling_spec) {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to subscribe sampling task: {}", err);
            return Ok(-1);
        }
    };

    let input_queue: Arc<Queue<DisplayFrame>> = Arc::new(Queue::new(4));
    let dispatcher = Arc::new(Dispatcher::new(input_queue.clone(), None));
    let display_queue = dispatcher
        .new_output(4)
        .expect("dispatcher has not stopped before its first output is registered");
    let dispatcher_thread = dispatcher.clone().spawn();

    let sampler_for_analysis = sampler.clone();
    let mut fft = RealFftEngine::new(sampler.size().max(1));
    let analysis_input = input_queue.clone();
    let analysis_spec = CancellableSpec::new(ANALYSIS_PERIOD, (), move |_: &mut ()| {
        let mut signal = vec![SampleFrame::default(); sampler_for_analysis.size()];
        sampler_for_analysis.snapshot(&mut signal);
        let mono: Vec<i16> = signal.iter().map(|f| f.ch0).collect();
        let spectrum = fft.magnitudes(&mono).to_vec();
        match analysis_input.insert(DisplayFrame { signal, spectrum }) {
            Ok(()) => WorkOutcome::Continue,
            Err(_) => WorkOutcome::Stop,
        }
    });
    let (analysis_handle, analysis_stats) = match cancellable::subscribe(&pool, analysis_spec) {
        Ok(pair) => pair,
        Err(err) => {
            error!("failed to subscribe analysis task: {}", err);
            return Ok(-1);
        }
    };

    if let Err(err) = pool.start() {
        error!("failed to start pool: {}", err);
        return Ok(-1);
    }

    let _raw_mode = RawModeGuard::enable().ok();
    let mut stdout = io::stdout();
    let _ = execute!(stdout, EnterAlternateScreen, cursor::Hide);
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend) {
        Ok(terminal) => terminal,
        Err(err) => {
            error!("failed to create terminal: {}", err);
            shut_down(&sampling_handle, &analysis_handle, &pool, &input_queue, dispatcher_thread);
            let mut stdout = io::stdout();
            let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);
            return Ok(-1);
        }
    };
    let _stderr_guard = logging::capture_stderr(log_buffer.clone());

    let deadline = cli.run_for().map(|d| Instant::now() + d);
    let mut frame = DisplayFrame {
        signal: vec![SampleFrame::default(); sampler.size()],
        spectrum: vec![0.0; sampler.size() / 2 + 1],
    };

    let exit_code = 'display: loop {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break 'display 0;
            }
        }

        // Drain to the newest frame; the render loop only ever cares about
        // the latest one, and an unbounded backlog would just show stale
        // audio on a slow terminal.
        loop {
            match display_queue.try_extract() {
                TryExtracted::Value(latest) => frame = latest,
                TryExtracted::Empty => break,
                TryExtracted::EndOfStream => break 'display 0,
            }
        }

        let log_lines = logging::snapshot_lines(&log_buffer);
        let state = ui::AppState {
            device: &cli.device,
            rate: cli.rate,
            signal: &frame.signal,
            spectrum: &frame.spectrum,
            logs: &log_lines,
            show_signal: cli.show_signal,
            show_spectrum: cli.show_spectrum,
        };

        if let Err(err) = terminal.draw(|f| ui::draw(f, &state)) {
            error!("failed to draw frame: {}", err);
            break 'display -1;
        }

        if let Ok(true) = event::poll(Duration::from_millis(20)) {
            if let Ok(event::Event::Key(key)) = event::read() {
                match key.code {
                    event::KeyCode::Char('q') | event::KeyCode::Esc => break 'display 0,
                    _ => {}
                }
            }
        }
    };

    shut_down(&sampling_handle, &analysis_handle, &pool, &input_queue, dispatcher_thread);

    info!(
        "capture stopped: sampler {} jobs ({} deadline misses, worst response {:?}), analysis {} jobs ({} deadline misses)",
        sampling_stats.execution_count(),
        sampling_stats.deadline_misses(),
        sampling_stats.worst_case_response(),
        analysis_stats.execution_count(),
        analysis_stats.deadline_misses(),
    );

    let _ = terminal.show_cursor();
    let stdout = terminal.backend_mut();
    let _ = execute!(stdout, LeaveAlternateScreen, cursor::Show);

    Ok(exit_code)
}

/// Kill both pool tasks, join the pool, then close the dispatcher's input so
/// its thread (and every output it owns) winds down cleanly.
fn shut_down(
    sampling_handle: &cancellable::TaskHandle<()>,
    analysis_handle: &cancellable::TaskHandle<()>,
    pool: &Pool<WrapperContext<()>>,
    input_queue: &Queue<DisplayFrame>,
    dispatcher_thread: std::thread::JoinHandle<()>,
) {
    let _ = sampling_handle.send_kill();
    let _ = analysis_handle.send_kill();
    pool.destroy();
    input_queue.close();
    let _ = dispatcher_thread.join();
}

/// RAII guard for terminal raw mode.
struct RawModeGuard;

impl RawModeGuard {
    /// Enable raw mode and return a guard that restores it on drop.
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
