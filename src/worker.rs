use std::sync::{
    mpsc::{Receiver, TryRecvError},
    Arc,
};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use shadowpd::{transport::UdpInfraIf, DelegatedPrefix, Dhcp6PdClient, State, SystemClock};
use tracing::{debug, error, info, warn};

/// Longest the worker sleeps before checking for commands
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Time allowed for the Release exchange on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Release any lease and solicit again
    Restart,
    /// Release any lease and stay stopped
    Release,
    /// Release any lease and exit the worker
    Shutdown,
}

/// What the management listener reports
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub interface: String,
    pub duid: String,
    pub state: State,
    pub delegated_prefix: Option<DelegatedPrefix>,
}

pub type SharedStatus = Arc<ArcSwapOption<StatusSnapshot>>;

pub fn pd_worker(
    mut client: Dhcp6PdClient<UdpInfraIf, SystemClock>,
    interface: String,
    commands: Receiver<Command>,
    status: SharedStatus,
) {
    let mut read_buf = [0u8; 2048];
    let mut shutdown_at: Option<Instant> = None;
    let mut last_prefix = None;

    client.start();

    loop {
        match commands.try_recv() {
            Ok(command) => {
                info!(?command, state = %client.state(), "handling command");
                match command {
                    Command::Restart => {
                        client.stop();
                        client.start();
                    }
                    Command::Release => client.stop(),
                    Command::Shutdown => {
                        client.stop();
                        shutdown_at.get_or_insert_with(Instant::now);
                    }
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                // every controller is gone, nothing can stop us cleanly anymore
                if shutdown_at.is_none() {
                    warn!("command channel closed, shutting down");
                    client.stop();
                    shutdown_at = Some(Instant::now());
                }
            }
        }

        if let Some(started) = shutdown_at {
            if client.state() == State::Stopped {
                info!("stopped, exiting worker");
                break;
            }
            if started.elapsed() >= SHUTDOWN_GRACE {
                warn!(state = %client.state(), "release did not complete in time, exiting");
                break;
            }
        }

        let now = Instant::now();
        let wait = client
            .next_fire_time()
            .map_or(POLL_INTERVAL, |t| t.saturating_duration_since(now))
            .min(POLL_INTERVAL);

        match client.infra().recv(&mut read_buf, wait) {
            Ok(Some((amount, src))) => {
                if client.infra().is_listening() {
                    client.handle_received(&read_buf[..amount]);
                } else {
                    debug!(%src, "not listening, dropping {amount} bytes");
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("Error receiving: {e:?}");
                std::thread::sleep(wait);
            }
        }

        if client
            .next_fire_time()
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            client.handle_timer();
        }

        let delegated = client.delegated_prefix();
        if delegated != last_prefix {
            match &delegated {
                Some(p) => info!(prefix = %p.prefix, adjusted = %p.adjusted_prefix, "prefix available"),
                None => info!("no prefix delegated"),
            }
            last_prefix = delegated.clone();
        }

        status.store(Some(Arc::new(StatusSnapshot {
            interface: interface.clone(),
            duid: client.duid().to_colon_string(),
            state: client.state(),
            delegated_prefix: delegated,
        })));
    }

    status.store(None);
}
