use anyhow::{bail, Context, Result};
use glide_sim::impairment::ImpairmentConfig;
use glide_sim::scenario::{self, ScenarioConfig};
use glide_transport::config::Mode;
use serde_json::json;

const USAGE: &str = "usage: glide-sim [--seed N] [--loss PCT] [--dup PCT] [--reorder PCT] \
[--delay MS] [--jitter MS] [--messages N] [--size BYTES] [--fec GROUP] \
[--mode default|normal|fast] [--probe PACKETS]";

fn parse_mode(s: &str) -> Result<Mode> {
    match s {
        "default" => Ok(Mode::Default),
        "normal" => Ok(Mode::Normal),
        "fast" => Ok(Mode::Fast),
        other => bail!("unknown mode {other:?}"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let mut config = ScenarioConfig::default();
    let mut impairment = ImpairmentConfig::default();
    let mut probe: Option<usize> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            println!("{USAGE}");
            return Ok(());
        }
        let value = args
            .next()
            .with_context(|| format!("missing value for {arg}\n{USAGE}"))?;
        match arg.as_str() {
            "--seed" => config.seed = value.parse()?,
            "--loss" => impairment.loss_percent = value.parse()?,
            "--dup" => impairment.duplicate_percent = value.parse()?,
            "--reorder" => impairment.reorder_percent = value.parse()?,
            "--delay" => impairment.delay_ms = value.parse()?,
            "--jitter" => impairment.jitter_ms = value.parse()?,
            "--messages" => config.messages = value.parse()?,
            "--size" => config.message_size = value.parse()?,
            "--fec" => config.fec_group_size = Some(value.parse()?),
            "--mode" => config.engine.mode = parse_mode(&value)?,
            "--probe" => probe = Some(value.parse()?),
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }
    config.impairment = impairment;

    let output = match probe {
        Some(packets) => {
            let group = config.fec_group_size.unwrap_or(10);
            let plain = scenario::probe_effective_loss(config.seed, &config.impairment, None, packets);
            let fec =
                scenario::probe_effective_loss(config.seed, &config.impairment, Some(group), packets);
            json!({ "without_fec": plain, "with_fec": fec })
        }
        None => serde_json::to_value(scenario::run(&config)?)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
