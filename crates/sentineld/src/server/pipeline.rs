//! Request pipeline and the JSONL connection handler built on it.
//!
//! Each connection carries newline-delimited JSON requests and receives one
//! JSON response line per request.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sentinel_context::Context;

use super::SERVER_TARGET;
use super::router::{Request, Response, Router};
use crate::middleware::MiddlewareOptions;

/// Longest single blocking read on a connection.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Middleware followed by routing.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    router: Router,
    middleware: Arc<MiddlewareOptions>,
}

impl RequestPipeline {
    /// Combines a router with the middleware guarding it.
    #[must_use]
    pub const fn new(router: Router, middleware: Arc<MiddlewareOptions>) -> Self {
        Self { router, middleware }
    }

    /// The routes served.
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// The middleware in front of the routes.
    #[must_use]
    pub fn middleware(&self) -> &MiddlewareOptions {
        &self.middleware
    }

    /// Runs `request` through middleware and routing. A panicking handler
    /// yields `500`.
    #[must_use]
    pub fn respond(&self, ctx: &Context, mut request: Request) -> Response {
        if let Err(rejection) = self.middleware.process(ctx, &mut request) {
            return rejection;
        }
        panic::catch_unwind(AssertUnwindSafe(|| self.router.dispatch(ctx, &request)))
            .unwrap_or_else(|_| {
                warn!(
                    target: SERVER_TARGET,
                    event = "handler_panicked",
                    path = %request.path,
                    "route handler panicked"
                );
                Response::error(500, "internal error")
            })
    }
}

/// Serves JSONL requests from accepted streams.
#[derive(Debug)]
pub(crate) struct ConnectionHandler {
    pipeline: RequestPipeline,
    root: Context,
    read_timeout: Duration,
    max_request_bytes: usize,
}

enum Line {
    Request(Vec<u8>),
    TooLarge,
    Closed,
}

impl ConnectionHandler {
    pub(crate) const fn new(
        pipeline: RequestPipeline,
        root: Context,
        read_timeout: Duration,
        max_request_bytes: usize,
    ) -> Self {
        Self {
            pipeline,
            root,
            read_timeout,
            max_request_bytes,
        }
    }

    pub(crate) fn handle(&self, stream: TcpStream) {
        if let Err(error) = self.serve(stream) {
            warn!(
                target: SERVER_TARGET,
                error = %error,
                "connection handler error"
            );
        }
    }

    fn serve(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(READ_SLICE.min(self.read_timeout)))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        while !self.root.is_cancelled() {
            let response = match self.read_line(&mut reader)? {
                Line::Closed => return Ok(()),
                Line::TooLarge => {
                    reader
                        .skip_until(b'\n')
                        .map(drop)
                        .or_else(|error| if is_timeout(&error) { Ok(()) } else { Err(error) })?;
                    write_response(&mut writer, &Response::error(413, "request exceeds maximum size"))?;
                    return Ok(());
                }
                Line::Request(bytes) => self.answer(&bytes),
            };
            write_response(&mut writer, &response)?;
        }
        debug!(target: SERVER_TARGET, "connection closed for shutdown");
        Ok(())
    }

    // Requests in flight keep running after the root is cancelled; the
    // listener bounds them with the shutdown timeout.
    fn answer(&self, bytes: &[u8]) -> Response {
        match serde_json::from_slice::<Request>(bytes) {
            Ok(request) => {
                let ctx = Context::background().with_timeout(self.read_timeout);
                debug!(
                    target: SERVER_TARGET,
                    method = %request.method,
                    path = %request.path,
                    "request received"
                );
                self.pipeline.respond(&ctx, request)
            }
            Err(error) => Response::error(400, &format!("malformed request: {error}")),
        }
    }

    /// Reads the next non-blank line. Reads wake every [`READ_SLICE`] so an
    /// idle connection notices shutdown before its read timeout runs out.
    fn read_line(&self, reader: &mut BufReader<TcpStream>) -> io::Result<Line> {
        let limit = u64::try_from(self.max_request_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut buffer = Vec::new();
        let mut idle = Duration::ZERO;
        loop {
            let remaining = limit.saturating_sub(u64::try_from(buffer.len()).unwrap_or(u64::MAX));
            let before = buffer.len();
            match reader.by_ref().take(remaining).read_until(b'\n', &mut buffer) {
                Ok(0) if buffer.is_empty() => return Ok(Line::Closed),
                Ok(_) if buffer.last() == Some(&b'\n') => {
                    while buffer.last().is_some_and(|byte| matches!(byte, b'\n' | b'\r')) {
                        buffer.pop();
                    }
                    if buffer.is_empty() {
                        debug!(target: SERVER_TARGET, "skipping blank line");
                        idle = Duration::ZERO;
                        continue;
                    }
                    return Ok(Line::Request(buffer));
                }
                Ok(_) if buffer.len() > self.max_request_bytes => return Ok(Line::TooLarge),
                // End of stream after a final line without a newline.
                Ok(_) => return Ok(Line::Request(buffer)),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) if is_timeout(&error) => {
                    if buffer.len() > before {
                        idle = Duration::ZERO;
                    }
                    if self.root.is_cancelled() {
                        return Ok(Line::Closed);
                    }
                    idle = idle.saturating_add(READ_SLICE.min(self.read_timeout));
                    if idle >= self.read_timeout {
                        return if buffer.is_empty() {
                            Ok(Line::Closed)
                        } else {
                            Err(error)
                        };
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn write_response(writer: &mut TcpStream, response: &Response) -> io::Result<()> {
    let mut line = serde_json::to_vec(response).map_err(io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}
