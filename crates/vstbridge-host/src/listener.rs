//! Transport listener thread.
//!
//! Serves one connection at a time on a current-thread tokio runtime.
//! `exit` is answered here; `get_state` blocks this thread (never the main
//! loop) until the main loop answers; every other line is queued and
//! acknowledged at once. I/O errors end only the current connection.

use crate::dispatcher::MainLoopHandle;
use std::thread::{self, JoinHandle};
use tokio::sync::watch;
use vstbridge_ipc::protocol::EXIT_ACK;
use vstbridge_ipc::transport::ServerStream;
use vstbridge_ipc::{classify, BridgeError, CommandClass, LineTransport, Result, TransportListener};

/// What a connection needs from the rest of the session.
pub trait ExitRequest: Send + Sync + 'static {
    fn request_exit(&self);
}

pub struct ListenerConfig {
    pub pipe_name: String,
    pub max_command_len: usize,
}

/// Bind the endpoint on a dedicated thread and serve until `shutdown` flips.
///
/// Returns once the bind has either succeeded or failed.
pub fn spawn(
    config: ListenerConfig,
    main_loop: MainLoopHandle,
    exit: std::sync::Arc<dyn ExitRequest>,
    shutdown: watch::Receiver<bool>,
    on_exit: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    let (bound_tx, bound_rx) = crossbeam_channel::bounded::<Result<()>>(1);

    let handle = thread::Builder::new()
        .name("vstbridge-listener".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = bound_tx.send(Err(e.into()));
                    on_exit();
                    return;
                }
            };
            runtime.block_on(serve(config, main_loop, exit, shutdown, bound_tx));
            on_exit();
        })?;

    match bound_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(BridgeError::ConnectionFailed(
                "listener thread exited before binding".to_string(),
            ))
        }
    }
}

async fn serve(
    config: ListenerConfig,
    main_loop: MainLoopHandle,
    exit: std::sync::Arc<dyn ExitRequest>,
    mut shutdown: watch::Receiver<bool>,
    bound: crossbeam_channel::Sender<Result<()>>,
) {
    let listener = match TransportListener::bind(&config.pipe_name) {
        Ok(listener) => {
            tracing::info!("listening on {}", config.pipe_name);
            let _ = bound.send(Ok(()));
            listener
        }
        Err(e) => {
            tracing::error!("failed to bind {}: {}", config.pipe_name, e);
            let _ = bound.send(Err(e));
            return;
        }
    };

    loop {
        let stream = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                }
            },
        };

        tracing::debug!("controller connected");
        let mut transport = LineTransport::new(stream, config.max_command_len);
        let outcome = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            outcome = serve_connection(&mut transport, &main_loop, exit.as_ref()) => outcome,
        };
        match outcome {
            Ok(Flow::Continue) => tracing::debug!("controller disconnected"),
            Ok(Flow::Exit) => break,
            Err(e) => tracing::warn!("connection dropped: {}", e),
        }
    }
    tracing::debug!("listener stopped");
}

enum Flow {
    Continue,
    Exit,
}

async fn serve_connection(
    transport: &mut LineTransport<ServerStream>,
    main_loop: &MainLoopHandle,
    exit: &dyn ExitRequest,
) -> Result<Flow> {
    while let Some(line) = transport.read_line().await? {
        let response = match classify(&line) {
            CommandClass::Exit => {
                transport.write_line(EXIT_ACK).await?;
                exit.request_exit();
                return Ok(Flow::Exit);
            }
            CommandClass::Sync(command) => {
                let main_loop = main_loop.clone();
                tokio::task::spawn_blocking(move || main_loop.request(command))
                    .await
                    .map_err(|e| BridgeError::ProtocolError(e.to_string()))?
            }
            CommandClass::Async(line) => {
                main_loop.enqueue(line);
                vstbridge_ipc::Response::Ok(None)
            }
        };
        transport.write_line(&response.to_string()).await?;
    }
    Ok(Flow::Continue)
}
