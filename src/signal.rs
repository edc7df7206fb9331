use std::sync::mpsc::Sender;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use crate::worker::Command;

/// Spawn a thread that turns SIGINT/SIGTERM into a shutdown and SIGHUP into a restart
pub fn spawn_signal_handler(
    commands: Sender<Command>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let command = match sig {
                    SIGHUP => {
                        info!("received SIGHUP, restarting prefix delegation");
                        Command::Restart
                    }
                    SIGINT | SIGTERM => {
                        info!(sig, "received termination signal, releasing");
                        Command::Shutdown
                    }
                    _ => continue,
                };
                if commands.send(command).is_err() {
                    warn!("worker gone, signal handler exiting");
                    break;
                }
            }
        })
}
