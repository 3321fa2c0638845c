//! Default driver that only checks TCP reachability.
//!
//! `TcpDriver` dials the first reachable endpoint and keeps the socket open.
//! Pings redial the same endpoint so a restarted server is noticed. Real
//! drivers replace it per kind through `Registry::with_driver`.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sentinel_config::Endpoint;
use sentinel_context::Context;

use crate::driver::{ConnectRequest, Connection, Driver, DriverError};

/// Reachability-only driver used when no store-specific driver is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDriver;

impl Driver for TcpDriver {
    fn connect(
        &self,
        ctx: &Context,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Connection>, DriverError> {
        let mut last_error = None;
        for endpoint in request.endpoints() {
            match dial(ctx, endpoint, request.connect_timeout()) {
                Ok(stream) => {
                    return Ok(Box::new(TcpConnection {
                        endpoint: endpoint.clone(),
                        timeout: request.connect_timeout(),
                        stream: Mutex::new(Some(stream)),
                    }));
                }
                Err(error @ DriverError::Context(_)) => return Err(error),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or(DriverError::NoEndpoints))
    }
}

fn dial(ctx: &Context, endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, DriverError> {
    ctx.check()?;
    let dial_error = |source: io::Error| DriverError::Dial {
        endpoint: endpoint.to_string(),
        source,
    };
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(dial_error)?
        .collect();
    let mut last = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    for addr in addrs {
        ctx.check()?;
        let budget = ctx.bounded(timeout);
        if budget.is_zero() {
            ctx.check()?;
            break;
        }
        match TcpStream::connect_timeout(&addr, budget) {
            Ok(stream) => return Ok(stream),
            Err(error) => last = error,
        }
    }
    Err(dial_error(last))
}

/// Connection produced by [`TcpDriver`].
#[derive(Debug)]
pub struct TcpConnection {
    endpoint: Endpoint,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl Connection for TcpConnection {
    fn ping(&self, ctx: &Context) -> Result<(), DriverError> {
        if self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(DriverError::Closed);
        }
        let stream = dial(ctx, &self.endpoint, self.timeout)?;
        stream.shutdown(Shutdown::Both).ok();
        Ok(())
    }

    fn close(&self) -> Result<(), DriverError> {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match stream.map(|socket| socket.shutdown(Shutdown::Both)) {
            Some(Err(error)) if error.kind() != io::ErrorKind::NotConnected => {
                Err(DriverError::Dial {
                    endpoint: self.endpoint.to_string(),
                    source: error,
                })
            }
            _ => Ok(()),
        }
    }
}
