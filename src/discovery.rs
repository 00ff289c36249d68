//! Network discovery (`ND`).
//!
//! A single `ND` request is answered by one AT response per remote node, all
//! carrying the request's frame ID. The ID is reserved rather than waited on,
//! and the responses are read from the event stream until the discovery
//! timeout runs out.

use std::time::Duration;

use crate::commands::CommandHandler;
use crate::error::{Error, Result};
use crate::event::{Event, EventFilter};
use crate::protocol::parser::{parse_discovered_node, parse_integer};
use crate::protocol::{ApiFrameType, AtCommand, AtCommandRequest};
use crate::transport::Transport;
use crate::types::{RemoteXBeeDevice, XBeeProtocol};

/// Discovery timeout used when the module reports no timing parameters.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);

/// Factor applied on DigiMesh networks with sleep support enabled.
pub const SLEEP_SUPPORT_TIMEOUT_MULTIPLIER: f64 = 2.1;

/// `SM` value of a DigiMesh sleep support node.
pub const SLEEP_MODE_SUPPORT: u64 = 7;

/// `NT` is expressed in units of 100 ms.
const NODE_TIMEOUT_UNIT: Duration = Duration::from_millis(100);

/// Timing parameters read from the module before a discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryTiming {
    /// `N?`: maximum discovery time, when supported.
    pub max_discovery_time: Option<Duration>,
    /// `NT`: node discovery timeout.
    pub node_timeout: Option<Duration>,
    /// `SM`: sleep mode.
    pub sleep_mode: Option<u64>,
}

/// Computes how long to collect discovery responses.
#[must_use]
pub fn calculate_timeout(protocol: XBeeProtocol, timing: DiscoveryTiming) -> Duration {
    let base = match (timing.max_discovery_time, timing.node_timeout) {
        (Some(max), _) => max,
        (None, Some(nt)) => nt + protocol.discovery_propagation_time(),
        (None, None) => DEFAULT_DISCOVERY_TIMEOUT,
    };

    if protocol == XBeeProtocol::DigiMesh && timing.sleep_mode == Some(SLEEP_MODE_SUPPORT) {
        base.mul_f64(SLEEP_SUPPORT_TIMEOUT_MULTIPLIER)
    } else {
        base
    }
}

async fn read_optional<T: Transport>(
    commands: &CommandHandler<T>,
    command: AtCommand,
) -> Option<u64> {
    match commands.get_parameter(command).await {
        Ok(value) => parse_integer(&value).ok(),
        Err(e) => {
            tracing::debug!("{} not available: {}", command, e);
            None
        }
    }
}

/// Reads `N?`, `NT` and (on DigiMesh) `SM` from the module.
pub(crate) async fn read_timing<T: Transport>(
    commands: &CommandHandler<T>,
    protocol: XBeeProtocol,
) -> DiscoveryTiming {
    let max_discovery_time = read_optional(commands, AtCommand::N_QUESTION)
        .await
        .map(Duration::from_millis);
    let node_timeout = if max_discovery_time.is_some() {
        None
    } else {
        read_optional(commands, AtCommand::NT)
            .await
            .map(|nt| NODE_TIMEOUT_UNIT * u32::try_from(nt).unwrap_or(u32::MAX))
    };
    let sleep_mode = if protocol == XBeeProtocol::DigiMesh {
        read_optional(commands, AtCommand::SM).await
    } else {
        None
    };

    DiscoveryTiming {
        max_discovery_time,
        node_timeout,
        sleep_mode,
    }
}

/// Runs `ND` and collects responses until `timeout` or an empty final
/// response.
pub(crate) async fn collect_nodes<T: Transport>(
    commands: &CommandHandler<T>,
    protocol: XBeeProtocol,
    timeout: Duration,
) -> Result<Vec<RemoteXBeeDevice>> {
    let guard = commands.correlator().reserve()?;
    let frame_id = guard.frame_id();
    let mut subscription = commands.subscribe(Some(EventFilter::response(
        ApiFrameType::AtCommandResponse,
        frame_id,
    )));

    tracing::debug!("discovering devices for {:?} (frame ID {})", timeout, frame_id);
    commands
        .send_async(
            AtCommandRequest::new(AtCommand::ND)
                .to_frame()
                .with_frame_id(frame_id),
        )
        .await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut nodes: Vec<RemoteXBeeDevice> = Vec::new();

    loop {
        let event = match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Err(_) => break,
            Ok(None) => return Err(Error::InterfaceNotOpen),
            Ok(Some(event)) => event,
        };
        let Event::AtCommandResponse(response) = event else {
            continue;
        };
        if response.command != AtCommand::ND {
            continue;
        }
        if !response.status.is_ok() {
            return Err(Error::AtCommand {
                command: AtCommand::ND.to_string(),
                status: response.status,
            });
        }
        if response.value.is_empty() {
            tracing::debug!("discovery finished early");
            break;
        }

        match parse_discovered_node(protocol, &response.value) {
            Ok(node) => {
                if nodes.iter().any(|n| n.address_64 == node.address_64) {
                    continue;
                }
                tracing::debug!("discovered {} ({})", node.address_64, node.node_id);
                nodes.push(node);
            }
            Err(e) => tracing::warn!("ignoring discovery response: {}", e),
        }
    }

    drop(guard);
    Ok(nodes)
}
