use std::{net::TcpListener, path::PathBuf, sync::mpsc, sync::Arc, thread};

use arc_swap::ArcSwapOption;
use shadowpd::{
    config::{self, Config},
    logging,
    transport::UdpInfraIf,
    Dhcp6PdClient, Duid, Error, SystemClock,
};
use tracing::{error, info};

mod mgmt;
#[cfg(unix)]
mod signal;
mod worker;

const HELP: &str = "\
shadowpd - DHCPv6 prefix delegation client

USAGE:
  shadowpd [OPTIONS]

OPTIONS:
  -c, --config PATH      JSON config file
  -i, --interface NAME   upstream interface, overrides config
  -m, --mac ADDR         MAC address used for the DUID, overrides config
  -l, --log-level LEVEL  trace, debug, info, warn or error
  -h, --help             print this help
";

struct Args {
    config: Option<PathBuf>,
    interface: Option<String>,
    mac: Option<String>,
    log_level: Option<String>,
}

fn parse_args() -> Result<Option<Args>, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        return Ok(None);
    }

    let args = Args {
        config: pargs.opt_value_from_str(["-c", "--config"])?,
        interface: pargs.opt_value_from_str(["-i", "--interface"])?,
        mac: pargs.opt_value_from_str(["-m", "--mac"])?,
        log_level: pargs.opt_value_from_str(["-l", "--log-level"])?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {remaining:?}");
    }

    Ok(Some(args))
}

fn load_config(args: Args) -> Result<Config, Error> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(interface) = args.interface {
        config.interface = interface;
    }
    if let Some(mac) = args.mac {
        config.mac = Some(config::parse_mac(&mac)?);
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    // surface a bad level before logging is up
    config.max_level()?;
    Ok(config)
}

fn main() {
    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print!("{HELP}");
            return;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Ok(level) = config.max_level() {
        logging::init_stdout(level, config.log_format);
    }

    if let Err(e) = run(config) {
        error!(%e, "exiting");
        std::process::exit(1);
    }
}

fn run(config: Config) -> Result<(), Error> {
    let mac = config.resolve_mac()?;
    let duid = Duid::from_mac(mac);
    info!(interface = %config.interface, %mac, duid = %duid.to_colon_string(), "starting");

    let infra = UdpInfraIf::bind(config.bind, &config.interface)?;
    let client = Dhcp6PdClient::new(infra, SystemClock, duid).iaid(config.iaid);

    let status: worker::SharedStatus = Arc::new(ArcSwapOption::empty());
    let (commands, command_rx) = mpsc::channel();

    #[cfg(unix)]
    signal::spawn_signal_handler(commands.clone())?;

    if let Some(addr) = config.mgmt_listen {
        let listener = TcpListener::bind(addr)?;
        info!(%addr, "management listener bound");
        let status = status.clone();
        let commands = commands.clone();
        thread::Builder::new()
            .name("mgmt".to_string())
            .spawn(move || mgmt::listener(listener, status, commands))?;
    }

    let interface = config.interface.clone();
    let pdworker = thread::Builder::new()
        .name("pdworker".to_string())
        .spawn(move || worker::pd_worker(client, interface, command_rx, status))?;

    let _ = pdworker.join();
    // keep the channel open for as long as the worker runs
    drop(commands);
    Ok(())
}
