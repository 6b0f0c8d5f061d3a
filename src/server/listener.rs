//! Server listener and connection handling
use std::error::Error;
use std::os::unix::net::UnixStream;
use std::thread;

use super::Display;
use crate::connection::socket::Listener;

/// Accept clients forever, one thread per client
pub fn serve(display: &Display, listener: &Listener) -> Result<(), Box<dyn Error + Send + Sync>> {
    log::info!("Serving clients on {}", listener.path().display());

    loop {
        match listener.accept() {
            Ok(stream) => {
                if let Err(e) = spawn_client(display, stream) {
                    log::error!("Could not set up client: {}", e);
                }
            }
            Err(e) => {
                log::error!("Connection failed: {}", e);
            }
        }
    }
}

/// Run one client on its own thread until it disconnects
pub fn spawn_client(
    display: &Display,
    stream: UnixStream,
) -> Result<thread::JoinHandle<()>, crate::Error> {
    let mut client = display.insert_client(stream)?;
    match client.credentials() {
        Some(creds) => log::info!(
            "New client connection (pid {}, uid {})",
            creds.pid,
            creds.uid
        ),
        None => log::info!("New client connection"),
    }

    let handle = thread::Builder::new()
        .name("waywire-client".to_string())
        .spawn(move || {
            if let Err(e) = client.run() {
                log::error!("Client error: {}", e);
            }
            log::info!("Client disconnected");
        })?;
    Ok(handle)
}
