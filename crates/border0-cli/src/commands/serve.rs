//! Accept loop: open the listener, serve streams until Ctrl-C.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use border0_client::{Border0Error, Border0Result, InboundStream, Listener, ListenerConfig};

use super::handlers;
use crate::Mode;

pub async fn run(config: ListenerConfig, mode: Mode) -> Result<()> {
    let listener = Listener::listen(config)
        .await
        .context("failed to start listener")?;
    info!(addr = %listener.addr(), mode = ?mode, "accepting streams, Ctrl-C to stop");

    let outcome = tokio::select! {
        res = accept_loop(&listener, mode) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, closing");
            Ok(())
        }
    };

    listener.close().await.context("failed to close listener")?;
    match outcome {
        Ok(()) | Err(Border0Error::QueueClosed) => Ok(()),
        Err(e) => Err(e).context("listener stopped"),
    }
}

async fn accept_loop(listener: &Listener, mode: Mode) -> Border0Result<()> {
    loop {
        let stream = listener.accept().await?;
        tokio::spawn(serve_stream(stream, mode));
    }
}

async fn serve_stream(stream: InboundStream, mode: Mode) {
    let request_id = stream.request_id();
    let peer = stream.remote_addr();
    debug!(request_id = %request_id, peer = %peer, "stream accepted");

    let result = match mode {
        Mode::Echo => handlers::echo(stream).await.map(|n| {
            debug!(request_id = %request_id, bytes = n, "echo finished");
        }),
        Mode::Http => handlers::http(stream).await,
    };
    if let Err(e) = result {
        warn!(request_id = %request_id, peer = %peer, error = %e, "stream handler failed");
    }
}
