//! `pulsegen`: timed pulse output on a LabJack T7 DIO_EF channel.
//!
//! ```bash
//! # Seven pulses at 10 kHz, 10% duty
//! pulsegen -n 7 -f 10kHz -d 10
//!
//! # Continuous 25% output for five seconds with a preview first
//! pulsegen -n 0 -d 25 -t 5s --graph
//!
//! # Hold the line high for two seconds
//! pulsegen -n 1 -d 100 -t 2s
//!
//! # Solve and print the register plan without touching a device
//! pulsegen -n 7 --dry-run
//!
//! # Show the effective configuration
//! pulsegen config
//! ```

mod config;
mod device;
mod error;
mod preview;
mod timer;

use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use pulse_core::controller::{
    OutputConfig, PreviewRenderer, PulseRequest, RunController, RunMode, RunReport, plan_mode,
};
use pulse_core::quantity::{parse_duration, parse_duty_cycle, parse_frequency};
use pulse_core::registers::{Register, RegisterPlan, build_start_plan, build_stop_plan};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{Config, FlagOverrides};
use crate::device::{Device, ModbusSession, SimulatedSession};
use crate::error::{CliError, ConfigError};
use crate::preview::TerminalPreview;
use crate::timer::{InterruptFlag, TerminalHoldTimer};

#[derive(Parser)]
#[command(name = "pulsegen", version)]
#[command(about = "Timed pulse trains on a LabJack T7 DIO_EF output")]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// Path to configuration file [default: ./pulsegen.yaml when present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Device address, host[:port]
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RunArgs {
    /// Pulses to emit; 0 runs continuously for --duration, 1 at 100% duty holds the line high
    #[arg(short = 'n', long = "number-pulses", required = true)]
    number_pulses: Option<u32>,

    /// Duty cycle in percent (`25`, `12.5%`)
    #[arg(short, long, default_value = "50", value_parser = duty_cycle_arg)]
    duty_cycle: f64,

    /// Output frequency (`10000`, `10kHz`, `2MHz`)
    #[arg(short, long, default_value = "10000", value_parser = frequency_arg)]
    frequency: u32,

    /// Run time for continuous output or hold-high (`5`, `2.5s`, `500ms`)
    #[arg(short = 't', long, value_parser = duration_arg)]
    duration: Option<Duration>,

    /// Show the expected output before running
    #[arg(short, long)]
    graph: bool,

    /// Solve and print the register plan without contacting a device
    #[arg(long)]
    dry_run: bool,

    /// Run against an in-process simulated device
    #[arg(long, conflicts_with = "dry_run")]
    simulate: bool,

    /// Write a transcript of simulated register traffic to this file
    #[arg(long, requires = "simulate")]
    transcript: Option<PathBuf>,

    /// Make every simulated write after the first N fail
    #[arg(long, value_name = "N", requires = "simulate")]
    fail_after: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show effective configuration
    Config,
}

fn frequency_arg(text: &str) -> Result<u32, String> {
    parse_frequency(text).map_err(|error| error.to_string())
}

fn duty_cycle_arg(text: &str) -> Result<f64, String> {
    parse_duty_cycle(text).map_err(|error| error.to_string())
}

fn duration_arg(text: &str) -> Result<Duration, String> {
    parse_duration(text).map_err(|error| error.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            let error = CliError::from(error);
            eprintln!("error: {error}");
            return ExitCode::from(error.exit_code());
        }
    };
    config.apply_flags(&FlagOverrides {
        device: cli.device.clone(),
        log_level: cli.log_level.clone(),
    });

    init_logging(&config.logging.level);
    if let Some(path) = Config::source_path(cli.config.as_deref()) {
        debug!(path = %path.display(), "configuration file loaded");
    }

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "pulsegen failed");
            ExitCode::from(error.exit_code())
        }
    }
}

/// Initialize logging with tracing; `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .init();
}

fn run(cli: &Cli, config: &Config) -> Result<(), CliError> {
    if let Some(Commands::Config) = cli.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    config.validate()?;
    let output = config.output_config();

    let args = &cli.run;
    let pulses = args
        .number_pulses
        .ok_or(CliError::Usage("--number-pulses is required"))?;
    let mut request = PulseRequest::new(args.frequency, args.duty_cycle, pulses);
    if let Some(duration) = args.duration {
        request = request.with_duration(duration);
    }

    println!("Desired output frequency: {:.6} Hz", f64::from(args.frequency));
    println!("Desired output duty cycle: {:.6} %", args.duty_cycle);

    let mode = plan_mode(&request, &output)?;
    print_achieved(&mode);
    info!(
        mode = %mode.kind(),
        hold = ?mode.hold_duration(),
        frequency_hz = args.frequency,
        duty_cycle = args.duty_cycle,
        pulses,
        "run planned"
    );

    if args.dry_run {
        print_plan(&mode, &output);
        return Ok(());
    }

    let mut device = open_device(args, config, &output)?;
    info!(device = %device.describe(), "device session open");

    let interrupt = InterruptFlag::install().unwrap_or_else(|error| {
        warn!(%error, "signal handler unavailable, only the keyboard can interrupt the hold");
        InterruptFlag::default()
    });
    let mut controller = RunController::new(output, TerminalHoldTimer::new(interrupt))
        .map_err(ConfigError::from)?;
    let outcome = if args.graph {
        let mut controller = controller.with_preview(TerminalPreview);
        execute(&mut controller, &mut device, &request)
    } else {
        execute(&mut controller, &mut device, &request)
    };
    if let Device::Simulated(session) = &device {
        info!(
            writes = session.writes(),
            energized = session.energized(),
            "simulated device after run"
        );
    }
    let report = outcome?;

    if let Some(count) = report.counter {
        println!("Counter = {count}");
    }
    info!(
        mode = %report.mode,
        hold = ?report.hold,
        start_writes = report.start_writes,
        teardown_writes = report.teardown_writes,
        "run complete"
    );
    Ok(())
}

fn open_device(args: &RunArgs, config: &Config, output: &OutputConfig) -> Result<Device, CliError> {
    if args.simulate {
        let mut session = SimulatedSession::new(output);
        if let Some(writes) = args.fail_after {
            session = session.failing_after(writes);
        }
        let session = match &args.transcript {
            Some(path) => {
                session
                    .with_transcript(path)
                    .map_err(|source| ConfigError::Transcript {
                        path: path.clone(),
                        source,
                    })?
            }
            None => session,
        };
        return Ok(Device::Simulated(session));
    }

    let address = config.socket_address()?;
    let timeout = Duration::from_millis(config.device.timeout_ms);
    let session = ModbusSession::connect(&address, config.device.unit_id, timeout)?;
    Ok(Device::Modbus(session))
}

fn execute<P>(
    controller: &mut RunController<TerminalHoldTimer, P>,
    device: &mut Device,
    request: &PulseRequest,
) -> Result<RunReport, CliError>
where
    P: PreviewRenderer,
    P::Error: Display,
{
    let result = controller.run(device, request);

    for record in controller.telemetry().oldest_first() {
        debug!(
            id = record.id,
            since_start = ?record.since_start,
            event = %record.event,
            "run event"
        );
    }
    if let Some(error) = controller.take_preview_error() {
        warn!(%error, "preview failed, run continued without it");
    }

    result.map_err(|error| {
        if let Some(teardown) = error.teardown_error() {
            error!(%teardown, "teardown failed, output may still be energized");
        }
        CliError::from(error)
    })
}

fn print_achieved(mode: &RunMode) {
    match mode.clock() {
        Some(clock) => {
            println!(
                "Actual output frequency: {:.6} Hz",
                clock.achieved_frequency_hz
            );
            println!(
                "Actual output duty cycle: {:.6} %",
                clock.achieved_duty_cycle_percent
            );
        }
        None => println!(
            "Single pulse, holding the output high for {:?}",
            mode.hold_duration()
        ),
    }
}

fn print_writes(plan: &RegisterPlan) {
    for write in plan {
        println!(
            "  {:<24} ({:>5}) = {}",
            write.name().as_str(),
            write.register.address(),
            write.value
        );
    }
}

fn print_line(register: Register, value: u32) {
    println!(
        "  {:<24} ({:>5}) = {value}",
        register.name().as_str(),
        register.address()
    );
}

fn print_plan(mode: &RunMode, output: &OutputConfig) {
    let layout = output.layout();
    let line = Register::DigitalState(layout.output);

    println!("Mode: {}", mode.kind());
    println!("Hold: {:?}", mode.hold_duration());
    println!("Start:");
    match (mode.clock(), mode.output_feature()) {
        (Some(clock), Some(feature)) => print_writes(&build_start_plan(clock, feature, &layout)),
        _ => print_line(line, 1),
    }
    println!("Stop:");
    if mode.clock().is_none() {
        print_line(line, 0);
    }
    print_writes(&build_stop_plan(&layout));
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_accept_unit_suffixes() {
        let cli = Cli::try_parse_from([
            "pulsegen", "-n", "7", "-f", "10kHz", "-d", "12.5%", "-t", "500ms",
        ])
        .expect("valid flags");

        assert!(cli.command.is_none());
        assert_eq!(cli.run.number_pulses, Some(7));
        assert_eq!(cli.run.frequency, 10_000);
        assert!((cli.run.duty_cycle - 12.5).abs() < f64::EPSILON);
        assert_eq!(cli.run.duration, Some(Duration::from_millis(500)));
    }

    #[test]
    fn run_flag_defaults() {
        let cli = Cli::try_parse_from(["pulsegen", "-n", "1"]).expect("valid flags");

        assert_eq!(cli.run.frequency, 10_000);
        assert!((cli.run.duty_cycle - 50.0).abs() < f64::EPSILON);
        assert!(!cli.run.graph);
    }

    #[test]
    fn pulse_count_is_required_for_a_run() {
        assert!(Cli::try_parse_from(["pulsegen", "-f", "1kHz"]).is_err());
    }

    #[test]
    fn config_subcommand_needs_no_pulse_count() {
        let cli = Cli::try_parse_from(["pulsegen", "--log-level", "debug", "config"])
            .expect("valid subcommand");

        assert!(matches!(cli.command, Some(Commands::Config)));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn bad_quantities_are_usage_errors() {
        for args in [
            ["pulsegen", "-n", "3", "-f", "1.5Hz"],
            ["pulsegen", "-n", "3", "-d", "fifty"],
        ] {
            assert!(Cli::try_parse_from(args).is_err(), "{args:?}");
        }
    }

    #[test]
    fn fault_injection_reaches_the_simulated_device() {
        use pulse_core::controller::DeviceSession;

        assert!(Cli::try_parse_from(["pulsegen", "-n", "3", "--fail-after", "4"]).is_err());

        let cli = Cli::try_parse_from(["pulsegen", "-n", "3", "--simulate", "--fail-after", "4"])
            .expect("valid flags");
        let config = Config::default();
        let output = config.output_config();
        let mut device = open_device(&cli.run, &config, &output).expect("simulated device");

        let stop = build_stop_plan(&output.layout());
        let plan: Vec<_> = stop.iter().chain(&stop).copied().collect();
        let error = device
            .write_registers(&plan)
            .expect_err("fifth write fails");
        assert!(matches!(
            error,
            crate::error::CommError::InjectedFault { writes: 4 }
        ));
    }

    #[test]
    fn transcript_requires_simulation() {
        assert!(Cli::try_parse_from(["pulsegen", "-n", "3", "--transcript", "t.log"]).is_err());
        assert!(
            Cli::try_parse_from(["pulsegen", "-n", "3", "--simulate", "--transcript", "t.log"])
                .is_ok()
        );
    }
}
