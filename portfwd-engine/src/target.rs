//! Resolving and dialing a rule's target

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::errors::DialError;
use crate::rule::ForwardRule;

/// Resolve the rule's target to every address it names
pub async fn resolve(rule: &ForwardRule, timeout: Duration) -> Result<Vec<SocketAddr>, DialError> {
    let lookup = tokio::net::lookup_host((rule.host(), rule.target_port));
    let addrs: Vec<SocketAddr> = match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(addrs)) => addrs.collect(),
        Ok(Err(source)) => {
            return Err(DialError::Resolve {
                target: rule.target(),
                source,
            });
        }
        Err(_) => {
            return Err(DialError::Timeout {
                target: rule.target(),
                after: timeout,
            });
        }
    };

    if addrs.is_empty() {
        return Err(DialError::NoAddress {
            target: rule.target(),
        });
    }
    Ok(addrs)
}

/// Connect to the rule's target, trying each resolved address in turn
///
/// `timeout` bounds resolution and every connect attempt together, so one
/// unreachable target cannot hold a connection task indefinitely.
pub async fn dial(rule: &ForwardRule, timeout: Duration) -> Result<(TcpStream, SocketAddr), DialError> {
    match tokio::time::timeout(timeout, connect_any(rule, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(DialError::Timeout {
            target: rule.target(),
            after: timeout,
        }),
    }
}

async fn connect_any(rule: &ForwardRule, timeout: Duration) -> Result<(TcpStream, SocketAddr), DialError> {
    let addrs = resolve(rule, timeout).await?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => {
                tracing::debug!(rule = %rule.name, %addr, error = %e, "Connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(source) => Err(DialError::Connect {
            target: rule.target(),
            source,
        }),
        None => Err(DialError::NoAddress {
            target: rule.target(),
        }),
    }
}
