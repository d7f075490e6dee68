//! Pipe server for handling node agent connections.
//!
//! Accepts incoming connections and hands each one to its own task, which
//! owns the connection for its whole lifetime. A failing or panicking session
//! never takes the accept loop or its siblings down with it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ProtocolError;
use crate::protocols::zds::{
    handle_connection, Deadlines, RequestSource, Session, SessionError, SessionReport,
};
use crate::transport::{FrameFormat, FramedTransport, PipeListener};

type SessionOutcome = Result<SessionReport, SessionError>;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Server instance
pub struct Server<R> {
    listener: PipeListener,
    source: R,
    framing: FrameFormat,
    max_frame_size: usize,
    deadlines: Deadlines,
    connection_limit: Arc<Semaphore>,
    next_session_id: u64,
}

impl<R> Server<R>
where
    R: RequestSource + Clone + 'static,
{
    /// Bind the pipe endpoint. Every session gets its own clone of `source`.
    pub async fn bind(config: &Config, source: R) -> Result<Self, ProtocolError> {
        let listener = PipeListener::bind(&config.pipe).await?;
        info!(path = %config.pipe.path, framing = ?config.framing, "Server listening");

        Ok(Server {
            listener,
            source,
            framing: config.framing,
            max_frame_size: config.max_frame_size,
            deadlines: config.deadlines,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            next_session_id: 1,
        })
    }

    /// Accept connections until `shutdown` resolves or the listener closes,
    /// then wait for in-flight sessions to finish.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ProtocolError>
    where
        F: Future<Output = ()>,
    {
        let mut sessions: JoinSet<SessionOutcome> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(finished);
                    continue;
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(stream) => {
                    let id = self.next_session_id;
                    self.next_session_id += 1;
                    debug!(session = id, "New connection");

                    let transport = FramedTransport::new(stream, self.framing, self.max_frame_size);
                    let session = Session::new(id, transport);
                    let source = self.source.clone();
                    let deadlines = self.deadlines;

                    sessions.spawn(async move {
                        let outcome = handle_connection(session, source, deadlines).await;
                        drop(permit);
                        outcome
                    });
                }
                Err(ProtocolError::ListenerClosed) => {
                    info!("Listener closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }

            // Reap whatever has finished without waiting
            while let Some(finished) = sessions.try_join_next() {
                reap(finished);
            }
        }

        self.listener.close();
        if !sessions.is_empty() {
            info!(sessions = sessions.len(), "Waiting for in-flight sessions");
        }
        while let Some(finished) = sessions.join_next().await {
            reap(finished);
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Record the end of one session task.
///
/// Session errors were already logged by the handler; only panics surface here.
fn reap(finished: Result<SessionOutcome, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(report)) => debug!(session = report.session_id, "Session finished"),
        Ok(Err(e)) => debug!(session = e.session_id, phase = %e.phase, "Session failed"),
        Err(e) if e.is_panic() => warn!(error = %e, "Session task panicked"),
        Err(e) => debug!(error = %e, "Session task cancelled"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::protocols::zds::codec::ProtocolMessage;
    use crate::protocols::zds::session::tests::wire;
    use crate::protocols::zds::{
        HelloMessage, ScriptedRequests, SessionContext, WorkloadInfo, WorkloadRequest,
        WorkloadResponse,
    };
    use crate::transport::PipeOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;
    use tokio::sync::oneshot;

    fn test_config(name: &str) -> Config {
        let path = std::env::temp_dir().join(format!(
            "zds-server-{}-{}.sock",
            name,
            std::process::id()
        ));
        Config {
            pipe: PipeOptions {
                path: path.to_string_lossy().into_owned(),
                in_buffer_size: 1024,
                out_buffer_size: 1024,
                message_mode: true,
                socket_mode: None,
            },
            framing: FrameFormat::LengthPrefixed,
            max_frame_size: 1024,
            deadlines: Deadlines {
                handshake: Duration::from_millis(200),
                request: Duration::from_secs(2),
            },
            max_connections: 16,
            workers: None,
            log_level: "info".to_string(),
            requests: Vec::new(),
        }
    }

    fn add_request() -> WorkloadRequest {
        WorkloadRequest::add("u1", WorkloadInfo::new("app", "ns", "sa"), "42")
    }

    /// Read one length-prefixed frame as a peer.
    async fn read_frame(stream: &mut UnixStream) -> Vec<u8> {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    /// A cooperative peer: hello, then ack every request.
    async fn cooperative_peer(path: &str, requests: usize) -> Vec<u8> {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream
            .write_all(&wire(ProtocolMessage::Hello(HelloMessage::new("1.0"))))
            .await
            .unwrap();

        let mut last = Vec::new();
        for _ in 0..requests {
            last = read_frame(&mut stream).await;
            stream
                .write_all(&wire(ProtocolMessage::Response(WorkloadResponse::ack())))
                .await
                .unwrap();
        }
        last
    }

    #[tokio::test]
    async fn test_add_scenario_over_pipe() {
        let config = test_config("scenario");
        let path = config.pipe.path.clone();
        let server = Server::bind(&config, ScriptedRequests::new([add_request()]))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let sent = cooperative_peer(&path, 1).await;
        let expected = crate::protocols::zds::codec::encode(&ProtocolMessage::Request(add_request()))
            .unwrap();
        assert_eq!(sent, expected.to_vec());

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_add_scenario_raw_messages() {
        let mut config = test_config("raw");
        config.framing = FrameFormat::Message;
        let path = config.pipe.path.clone();
        let server = Server::bind(&config, ScriptedRequests::new([add_request()]))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let raw = |message| crate::protocols::zds::codec::encode(&message).unwrap();
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream
            .write_all(&raw(ProtocolMessage::Hello(HelloMessage::new("1.0"))))
            .await
            .unwrap();

        let mut buf = vec![0u8; 1025];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &raw(ProtocolMessage::Request(add_request()))[..]);
        stream
            .write_all(&raw(ProtocolMessage::Response(WorkloadResponse::ack())))
            .await
            .unwrap();

        // server closes the session once the script is done
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failing_sessions_do_not_affect_others() {
        let config = test_config("isolation");
        let path = config.pipe.path.clone();
        let server = Server::bind(&config, ScriptedRequests::new([add_request()]))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        // silent peer: handshake times out
        let silent = UnixStream::connect(&path).await.unwrap();

        // garbage hello: decode error
        let mut garbage = UnixStream::connect(&path).await.unwrap();
        garbage
            .write_all(b"\x00\x00\x00\x03\xff\xff\xff")
            .await
            .unwrap();

        // a well-behaved peer running alongside both
        let good = tokio::spawn({
            let path = path.clone();
            async move { cooperative_peer(&path, 1).await }
        });
        assert!(!good.await.unwrap().is_empty());

        // the garbage session is closed by the server
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), garbage.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // the silent one is closed after its deadline and the listener keeps going
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(silent);
        assert!(!cooperative_peer(&path, 1).await.is_empty());

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[derive(Clone)]
    struct PanicsOnFirst;

    impl RequestSource for PanicsOnFirst {
        fn next_request(&mut self, ctx: &SessionContext) -> Option<WorkloadRequest> {
            if ctx.session_id == 1 {
                panic!("source failure");
            }
            if ctx.completed == 0 {
                Some(WorkloadRequest::keep("u1"))
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_session_is_contained() {
        let config = test_config("panic");
        let path = config.pipe.path.clone();
        let server = Server::bind(&config, PanicsOnFirst).await.unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        // session 1 panics in its task after the hello
        let mut first = UnixStream::connect(&path).await.unwrap();
        first
            .write_all(&wire(ProtocolMessage::Hello(HelloMessage::new("1.0"))))
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), first.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        // session 2 still completes
        assert!(!cooperative_peer(&path, 1).await.is_empty());

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
