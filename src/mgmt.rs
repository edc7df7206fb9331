use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::worker::{Command, SharedStatus, StatusSnapshot};

#[derive(Debug, Deserialize)]
#[serde(tag = "command")]
pub enum MgmtRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "release")]
    Release,
    #[serde(rename = "restart")]
    Restart,
}

#[derive(Serialize)]
pub struct MgmtResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSnapshot>,
}

impl MgmtResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            message: Some(message.into()),
            status: None,
        }
    }

    fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: None,
            status: None,
        }
    }
}

/// Main management listener loop
pub fn listener(listener: TcpListener, status: SharedStatus, commands: Sender<Command>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let peer = stream.peer_addr().ok();
                handle_client(stream, &status, &commands);
                if let Some(addr) = peer {
                    info!(%addr, "handled management request");
                }
            }
            Err(e) => {
                warn!(%e, "failed to accept management connection");
            }
        }
    }
}

fn handle_client(stream: TcpStream, status: &SharedStatus, commands: &Sender<Command>) {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
    stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();

    match reader.read_line(&mut line) {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            warn!(%e, "failed to read from management client");
            return;
        }
    }

    let response = handle_request(&line, status, commands);

    let mut writer = stream;
    if let Err(e) = serde_json::to_writer(&mut writer, &response) {
        warn!(%e, "failed to write response");
    }
    let _ = writer.write_all(b"\n");
}

fn handle_request(line: &str, status: &SharedStatus, commands: &Sender<Command>) -> MgmtResponse {
    let command = match serde_json::from_str::<MgmtRequest>(line) {
        Ok(MgmtRequest::Status) => {
            return match status.load_full() {
                Some(snapshot) => MgmtResponse {
                    status: Some(StatusSnapshot::clone(&snapshot)),
                    ..MgmtResponse::ok("Status OK")
                },
                None => MgmtResponse::err("client is not running"),
            };
        }
        Ok(MgmtRequest::Release) => Command::Release,
        Ok(MgmtRequest::Restart) => Command::Restart,
        Err(e) => return MgmtResponse::err(format!("Invalid request: {e}")),
    };

    match commands.send(command) {
        Ok(()) => MgmtResponse::ok(format!("{command:?} requested")),
        Err(_) => MgmtResponse::err("client is not running"),
    }
}
