//! linkdeck CLI
//!
//! Inspect and exercise the adaptive motion governance engine from a
//! terminal:
//!
//! - `linkdeck profile`: classify this host once and print tier and policy
//! - `linkdeck monitor --seconds N`: run the governor live and print its report
//! - `linkdeck config`: print the effective configuration

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use linkdeck_core::capability::{
    CapabilityProfiler, DeviceTier, HostHints, NetworkType, SystemHints,
};
use linkdeck_core::config::{AppConfig, LogFormat};
use linkdeck_core::degradation::{DegradationPolicy, RenderHints};
use linkdeck_core::error::format_error_with_remediation;
use linkdeck_core::governor::PerformanceGovernor;
use linkdeck_core::logging::init_logging;
use linkdeck_core::runtime::{GovernorRuntime, PlatformSources};
use linkdeck_core::sampler::ProcessProbe;

#[derive(Parser, Debug)]
#[command(name = "linkdeck", version, about = "Adaptive motion governance for linkdeck")]
struct Cli {
    /// Path to linkdeck.toml
    #[arg(long, global = true, env = "LINKDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (pretty or json)
    #[arg(long, global = true, default_value = "pretty")]
    format: LogFormat,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Host hints that have no native source.
#[derive(clap::Args, Debug, Clone, Default)]
struct HintArgs {
    /// User-agent string to evaluate for mobile signatures
    #[arg(long)]
    user_agent: Option<String>,

    /// Network effective type (slow-2g, 2g, 3g, 4g)
    #[arg(long)]
    network: Option<NetworkType>,

    /// Start with the reduced-motion preference set
    #[arg(long)]
    prefer_reduced_motion: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run capability detection once and print the profile and policy
    Profile {
        #[command(flatten)]
        hints: HintArgs,
    },
    /// Run the governor live and print the final performance report
    Monitor {
        /// How long to monitor
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        #[command(flatten)]
        hints: HintArgs,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileOutput {
    tier: DeviceTier,
    benchmark_tier: DeviceTier,
    benchmark_ms: f64,
    hints: HostHints,
    reduced_motion: bool,
    policy: DegradationPolicy,
    render_hints: RenderHints,
}

#[tokio::main]
async fn main() -> ExitCode {
    let started = Instant::now();
    let cli = Cli::parse();
    match run(cli, started).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<linkdeck_core::Error>() {
                Some(core) => eprintln!("{}", format_error_with_remediation(core)),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, started: Instant) -> anyhow::Result<()> {
    let mut app = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        app.logging.level.clone_from(level);
    }
    init_logging(&app.logging).map_err(linkdeck_core::Error::from)?;

    match cli.command {
        Commands::Profile { hints } => profile(&app, &hints, cli.format),
        Commands::Monitor { seconds, hints } => {
            monitor(&app, &hints, seconds, cli.format, started).await
        }
        Commands::Config => print_config(&app, cli.format),
    }
}

fn build_governor(app: &AppConfig, hints: &HintArgs) -> PerformanceGovernor {
    let mut config = app.governor.clone();
    config.prefer_reduced_motion |= hints.prefer_reduced_motion;
    let source = SystemHints {
        network: hints.network,
        user_agent: hints.user_agent.clone(),
    };
    let profiler = CapabilityProfiler::new(config.clone(), Arc::new(source));
    PerformanceGovernor::new(config, profiler)
}

fn profile(app: &AppConfig, hints: &HintArgs, format: LogFormat) -> anyhow::Result<()> {
    let mut governor = build_governor(app, hints);
    let profile = governor.init(Instant::now());
    let output = ProfileOutput {
        tier: governor.tier(),
        benchmark_tier: profile.benchmark_tier,
        benchmark_ms: profile.benchmark_ms,
        hints: profile.hints,
        reduced_motion: governor.reduced_motion(),
        policy: governor.policy(),
        render_hints: governor.render_hints(),
    };
    governor.dispose();

    match format {
        LogFormat::Json => {
            let text = serde_json::to_string_pretty(&output)
                .map_err(linkdeck_core::Error::from)?;
            println!("{text}");
        }
        LogFormat::Pretty => {
            println!("Tier:              {}", output.tier);
            println!(
                "Benchmark:         {:.2} ms ({})",
                output.benchmark_ms, output.benchmark_tier
            );
            println!("Cores:             {}", display_opt(output.hints.logical_cores));
            println!(
                "Memory:            {}",
                output
                    .hints
                    .device_memory_gb
                    .map_or_else(|| "unknown".to_string(), |gb| format!("{gb:.1} GB"))
            );
            println!("Reduced motion:    {}", output.reduced_motion);
            println!(
                "Animation limit:   {}",
                output.policy.limit_concurrent_animations
            );
            let flags: Vec<&str> = output.render_hints.flags.iter().map(String::as_str).collect();
            println!("Flags:             {}", flags.join(" "));
        }
    }
    Ok(())
}

async fn monitor(
    app: &AppConfig,
    hints: &HintArgs,
    seconds: u64,
    format: LogFormat,
    started: Instant,
) -> anyhow::Result<()> {
    let governor = build_governor(app, hints);
    let sources = PlatformSources {
        probe: Some(Box::new(ProcessProbe::new(Some(started.elapsed())))),
        ..PlatformSources::default()
    };
    let handle = GovernorRuntime::start(governor, sources);

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted; stopping monitor early");
        }
    }

    let report = handle.performance_report();
    handle.shutdown().await;

    match format {
        LogFormat::Json => {
            let text =
                serde_json::to_string_pretty(&report).map_err(linkdeck_core::Error::from)?;
            println!("{text}");
        }
        LogFormat::Pretty => print!("{}", report.render_plain()),
    }
    Ok(())
}

fn print_config(app: &AppConfig, format: LogFormat) -> anyhow::Result<()> {
    let text = match format {
        LogFormat::Json => serde_json::to_string_pretty(app).map_err(linkdeck_core::Error::from)?,
        LogFormat::Pretty => app.to_toml_string()?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_monitor_with_globals() {
        let cli = Cli::try_parse_from([
            "linkdeck",
            "monitor",
            "--seconds",
            "2",
            "--format",
            "json",
            "--network",
            "2g",
        ])
        .unwrap();
        assert_eq!(cli.format, LogFormat::Json);
        match cli.command {
            Commands::Monitor { seconds, hints } => {
                assert_eq!(seconds, 2);
                assert_eq!(hints.network, Some(NetworkType::TwoG));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["linkdeck", "config", "--format", "xml"]).is_err());
    }
}
