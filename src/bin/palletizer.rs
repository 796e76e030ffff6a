//! Moves the configured blocks from their pick points to their drop points and, for a complete
//! cycle, back again.
//!
//! Without `--mode` the operator is asked which operation to run.  Ctrl-C stops the arm between
//! steps, releases whatever it holds and parks it.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgEnum, Parser};
use log::{error, warn};

use dobot_palletizer::arm_hal_factory::ArmHalFactory;
use dobot_palletizer::block_task::reverse_tasks;
use dobot_palletizer::choreography::{ChoreographyExecutor, ExecutorArgs, RoundTripOutcome, RunResult};
use dobot_palletizer::choreography_events::{FanOutEventSink, JsonLinesEventSink, Leg, LogEventSink};
use dobot_palletizer::end_effector::EndEffectorKind;
use dobot_palletizer::palletizer_config::PalletizerConfig;
use dobot_palletizer::stop_signal::StopSignal;

#[derive(Parser, Debug)]
#[clap(name = "palletizer")]
struct Opts {
    #[clap(long, default_value = "configs/palletizer_suction.json")]
    config: PathBuf,

    #[clap(long, arg_enum)]
    mode: Option<RunMode>,

    /// Overrides the port from the config file.
    #[clap(long)]
    port: Option<String>,

    /// Overrides the end-effector from the config file (suction_cup or gripper).
    #[clap(long)]
    end_effector: Option<EndEffectorKind>,

    #[clap(long)]
    fake_hw: bool,

    /// Also write every choreography event as a JSON line to this file.
    #[clap(long)]
    events_out: Option<PathBuf>,
}

#[derive(ArgEnum, Debug, PartialEq, Eq, Copy, Clone)]
enum RunMode {
    Cycle,
    Transfer,
    Return,
}

const INTERRUPTED_EXIT_CODE: u8 = 130;

fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    let mut config = PalletizerConfig::load(&opts.config)?;
    if let Some(port) = opts.port {
        config.port = port;
    }
    if let Some(end_effector) = opts.end_effector {
        config.end_effector = end_effector;
    }
    let tasks = config.tasks();

    let mode = match opts.mode {
        Some(mode) => mode,
        None => prompt_mode()?,
    };

    let stop = StopSignal::new();
    stop.install_ctrl_c_handler()?;

    let mut sink = FanOutEventSink::new().with(LogEventSink);
    if let Some(path) = &opts.events_out {
        sink = sink.with(JsonLinesEventSink::create(path)?);
    }

    let mut profile = config.motion_profile();
    if opts.fake_hw {
        profile = profile.without_delays();
    }

    let hal = ArmHalFactory::new_maybe_mock(opts.fake_hw).create_hal(&config.port, config.end_effector)?;
    let mut executor = ChoreographyExecutor::new(ExecutorArgs {
        hal,
        profile,
        stop,
        sink: Box::new(sink),
        end_effector: config.end_effector,
    });
    executor.release_end_effector()?;

    let result = match mode {
        RunMode::Cycle => executor.run_round_trip(&tasks).map(|outcome| report_round_trip(&outcome)),
        RunMode::Transfer => executor.run_all(Leg::Transfer, &tasks).map(|result| report_leg(&result)),
        RunMode::Return => executor.run_all(Leg::Return, &reverse_tasks(&tasks)).map(|result| report_leg(&result)),
    };
    executor.shutdown();

    match result {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) => {
            error!("Stopped: {e}");
            for partial in e.partial_results() {
                report_leg(partial);
            }
            Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
        }
    }
}

fn prompt_mode() -> anyhow::Result<RunMode> {
    println!("Select operation:");
    println!("1. Complete cycle (transfer and return)");
    println!("2. Transfer only");
    println!("3. Return only");
    print!("Enter choice (1-3): ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let mode = match line.trim() {
        "1" => RunMode::Cycle,
        "2" => RunMode::Transfer,
        "3" => RunMode::Return,
        other => {
            warn!("Invalid choice '{other}', running complete cycle");
            RunMode::Cycle
        }
    };
    Ok(mode)
}

fn report_leg(result: &RunResult) -> bool {
    println!(
        "{}: {}/{} blocks {} successfully in {:.2}s",
        result.leg,
        result.succeeded,
        result.planned,
        result.leg.past_tense(),
        result.elapsed_seconds());
    if result.attempted < result.planned {
        println!("Only {} of {} blocks were attempted", result.attempted, result.planned);
    }
    if !result.failed_ids.is_empty() {
        println!("Failed blocks: {:?}", result.failed_ids);
    }
    result.all_succeeded()
}

fn report_round_trip(outcome: &RoundTripOutcome) -> bool {
    match outcome {
        RoundTripOutcome::Completed { forward, back, elapsed } => {
            report_leg(forward);
            report_leg(back);
            println!("Complete cycle finished in {:.2}s", elapsed.as_secs_f64());
        }
        RoundTripOutcome::ReturnSkipped { forward } => {
            report_leg(forward);
            println!("Return skipped, no block was transferred");
        }
    }
    outcome.all_succeeded()
}
