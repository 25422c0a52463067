//! diamond-controller: OpenFlow controller for a four-switch diamond.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::sync::broadcast;

use diamond_controller::cli::*;
use diamond_controller::config::{init_logging, Config};
use diamond_controller::controller::{ControllerEvent, EventHandler};
use diamond_controller::protocol::{OfMessage, PhyPort};
use diamond_controller::router::Router;
use diamond_controller::server::{ControllerService, SignalHandler};
use diamond_controller::switch::{RecordingSwitch, SwitchRegistry};
use diamond_controller::topology::TopologyConfig;
use diamond_controller::types::MacAddr;
use diamond_controller::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    match cli.command {
        Commands::Run(args) => run_controller(args, config).await,
        Commands::Check(args) => run_check(args, config),
        Commands::Config(args) => run_config(args),
    }
}

/// Run the controller until SIGINT/SIGTERM.
async fn run_controller(args: RunArgs, mut config: Config) -> Result<()> {
    if let Some(addr) = args.openflow {
        config.controller.listen_addr = addr;
    }
    if let Some(addr) = args.side_channel {
        config.side_channel.listen_addr = addr;
    }
    if args.json {
        config.logging.format = "json".into();
    }
    init_logging(&config.logging)?;

    if config.logging.format != "json" {
        println!("{}", "╔══════════════════════════════════════════╗".bright_cyan());
        println!("{}", "║     DIAMOND CONTROLLER                   ║".bright_cyan());
        println!("{}", format!("║     Version {:<29}║", VERSION).bright_cyan());
        println!("{}", "╚══════════════════════════════════════════╝".bright_cyan());
        println!();
    }

    let service = ControllerService::bind(&config)
        .await
        .context("starting the controller")?;

    println!("{} OpenFlow listening on {}", "✓".green(), service.openflow_addr()?);
    println!("{} Side channel listening on {}", "✓".green(), service.side_channel_addr()?);
    println!(
        "{} {} hosts, default rail {}",
        "✓".green(),
        service.topology().host_count(),
        service.topology().default_rail()
    );
    println!();
    println!("Press {} to stop", "Ctrl+C".yellow());

    let (shutdown_tx, _) = broadcast::channel(4);
    let signals = SignalHandler::new(shutdown_tx.clone());
    signals.spawn();

    let balance = service.balance();
    service.run(shutdown_tx).await?;

    println!();
    println!("{} Stopped. Final balance: {}", "✓".green(), *balance.read());
    Ok(())
}

/// Validate the configuration and describe the topology.
fn run_check(args: CheckArgs, config: Config) -> Result<()> {
    config.validate()?;
    let topology = Arc::new(config.topology()?);

    println!("{} Configuration is valid", "✓".green());
    println!();
    println!("{}", "Topology:".bright_white().bold());
    println!("{}", "─".repeat(50));
    print!("{}", topology.describe());
    println!("{}", "─".repeat(50));

    if !args.rules {
        return Ok(());
    }

    let registry = Arc::new(SwitchRegistry::new());
    let mut router = Router::new(Arc::clone(&topology), Arc::clone(&registry), &config.rules);

    for switch in topology.switches() {
        let recorder = Arc::new(RecordingSwitch::new(switch.dpid));
        registry.register(recorder.clone());

        // Port addresses are synthetic; a real switch reports its own.
        let ports = switch
            .switch_ports()
            .map(|port| {
                let hw = MacAddr([0x02, 0, 0, 0, switch.dpid.as_u64() as u8, port as u8]);
                PhyPort::new(port, hw, format!("{}-eth{}", switch.name, port))
            })
            .collect();
        router.handle(&ControllerEvent::SwitchJoined {
            dpid: switch.dpid,
            ports,
        })?;

        println!();
        println!(
            "{}",
            format!("{} ({}) on connect:", switch.name, switch.dpid).bright_white().bold()
        );
        for message in recorder.take() {
            match message {
                OfMessage::FlowMod(flow_mod) => println!("  {flow_mod}"),
                OfMessage::PortMod(port_mod) => {
                    println!("  port_mod port={} no_flood", port_mod.port_no)
                }
                other => println!("  {}", other.name()),
            }
        }
    }

    Ok(())
}

/// Print or write an example configuration.
fn run_config(args: ConfigArgs) -> Result<()> {
    let mut config = Config::example();
    config.topology = TopologyConfig::diamond(args.hosts);
    config.validate()?;
    let output = config.to_toml()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output).with_context(|| format!("writing {}", path.display()))?;
        println!("{} Configuration written to {}", "✓".green(), path.display());
    } else {
        println!("{}", output);
    }

    Ok(())
}
