//! Operating mode of the attached module and its detection.
//!
//! Detection first asks for `AP` over API framing. If nothing answers it
//! falls back to the `+++` command-mode escape to recognize a module in
//! transparent (AT) mode. A module that answers neither is left `Unknown`.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::watch;

use crate::commands::CommandHandler;
use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::AtCommand;
use crate::protocol::parser::parse_integer;
use crate::transport::Transport;

/// Default time to wait for the `AP` answer during detection.
pub const DEFAULT_MODE_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of `AP` queries before falling back to `+++`.
pub const DEFAULT_MODE_QUERY_ATTEMPTS: u32 = 3;

/// Default silence required around the `+++` sequence.
pub const DEFAULT_GUARD_TIME: Duration = Duration::from_secs(1);

/// Command-mode escape sequence.
const COMMAND_MODE_SEQUENCE: &[u8] = b"+++";

/// Reply to a successful command-mode escape.
const COMMAND_MODE_OK: &[u8] = b"OK\r";

/// Leaves command mode again.
const EXIT_COMMAND_MODE: &[u8] = b"ATCN\r";

/// Framing the module is using on its serial interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    /// Not determined, or the module did not answer.
    #[default]
    Unknown,
    /// Transparent / AT command mode.
    At,
    /// API mode without escaping (`AP=1`).
    Api,
    /// API mode with escaping (`AP=2`).
    ApiEscaped,
}

impl OperatingMode {
    /// Maps an `AP` parameter value to a mode.
    ///
    /// 0 is transparent mode, 1 is API, anything higher is escaped API.
    #[must_use]
    pub const fn from_ap_value(value: u64) -> Self {
        match value {
            0 => Self::At,
            1 => Self::Api,
            _ => Self::ApiEscaped,
        }
    }

    /// Returns the `AP` value selecting this mode, if it is an API mode.
    #[must_use]
    pub const fn ap_value(self) -> Option<u8> {
        match self {
            Self::Api => Some(1),
            Self::ApiEscaped => Some(2),
            Self::At | Self::Unknown => None,
        }
    }

    /// Returns true for either API mode.
    #[must_use]
    pub const fn is_api(self) -> bool {
        matches!(self, Self::Api | Self::ApiEscaped)
    }

    /// Returns true if frames are escaped.
    #[must_use]
    pub const fn is_escaped(self) -> bool {
        matches!(self, Self::ApiEscaped)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::At => "AT",
            Self::Api => "API",
            Self::ApiEscaped => "API escaped",
        };
        f.write_str(name)
    }
}

/// Tuning for mode detection.
#[derive(Debug, Clone, Copy)]
pub struct ModeDetection {
    /// Wait per `AP` query.
    pub query_timeout: Duration,
    /// Number of `AP` queries.
    pub attempts: u32,
    /// Guard time around `+++`.
    pub guard_time: Duration,
}

impl Default for ModeDetection {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_MODE_QUERY_TIMEOUT,
            attempts: DEFAULT_MODE_QUERY_ATTEMPTS,
            guard_time: DEFAULT_GUARD_TIME,
        }
    }
}

/// Publishes a mode to the reader and to subscribers.
pub(crate) fn publish(
    mode_tx: &watch::Sender<OperatingMode>,
    dispatcher: &EventDispatcher,
    mode: OperatingMode,
) {
    let previous = mode_tx.send_replace(mode);
    if previous != mode {
        tracing::debug!("operating mode {} -> {}", previous, mode);
        dispatcher.dispatch(Event::ModeChanged(mode));
    }
}

/// Determines the operating mode of the module behind `commands`.
///
/// The resolved mode is published through `mode_tx` before returning, so the
/// background reader switches framing accordingly.
pub(crate) async fn detect<T: Transport>(
    commands: &CommandHandler<T>,
    dispatcher: &EventDispatcher,
    mode_tx: &watch::Sender<OperatingMode>,
    settings: ModeDetection,
) -> Result<OperatingMode> {
    // Query unescaped. Both API modes accept the query unless its frame ID
    // or checksum is a reserved byte, and each retry takes a new ID.
    publish(mode_tx, dispatcher, OperatingMode::Api);

    for attempt in 1..=settings.attempts.max(1) {
        match commands
            .query_unchecked(AtCommand::AP, settings.query_timeout)
            .await
        {
            Ok(value) => {
                let mode = match parse_integer(&value) {
                    Ok(ap) => OperatingMode::from_ap_value(ap),
                    Err(_) => OperatingMode::Api,
                };
                tracing::info!("module answered AP, operating mode {}", mode);
                publish(mode_tx, dispatcher, mode);
                return Ok(mode);
            }
            Err(Error::Timeout { .. }) => {
                tracing::debug!("AP query attempt {} timed out", attempt);
            }
            Err(Error::AtCommand { .. }) => {
                // Answered in API framing but refused AP: still an API module.
                publish(mode_tx, dispatcher, OperatingMode::Api);
                return Ok(OperatingMode::Api);
            }
            Err(e) => {
                publish(mode_tx, dispatcher, OperatingMode::Unknown);
                return Err(e);
            }
        }
    }

    let mode = if enter_command_mode(commands, dispatcher, mode_tx, settings.guard_time).await? {
        tracing::info!("module is in AT mode");
        OperatingMode::At
    } else {
        tracing::warn!("module did not answer in API or AT mode");
        OperatingMode::Unknown
    };
    publish(mode_tx, dispatcher, mode);
    Ok(mode)
}

/// Sends `+++` and watches the raw byte stream for `OK\r`.
async fn enter_command_mode<T: Transport>(
    commands: &CommandHandler<T>,
    dispatcher: &EventDispatcher,
    mode_tx: &watch::Sender<OperatingMode>,
    guard_time: Duration,
) -> Result<bool> {
    // Raw passthrough so the reply is not swallowed by the frame decoder
    publish(mode_tx, dispatcher, OperatingMode::At);
    let mut subscription = dispatcher.subscribe(None);

    tokio::time::sleep(guard_time).await;
    commands
        .write_raw(Bytes::from_static(COMMAND_MODE_SEQUENCE))
        .await?;

    // The module answers after its own guard time
    let wait = guard_time * 2 + Duration::from_millis(500);
    let collect = async {
        let mut received = BytesMut::new();
        while let Some(event) = subscription.recv().await {
            if let Event::RawData(chunk) = event {
                received.extend_from_slice(&chunk);
                if received
                    .windows(COMMAND_MODE_OK.len())
                    .any(|w| w == COMMAND_MODE_OK)
                {
                    return true;
                }
            }
        }
        false
    };

    let entered = tokio::time::timeout(wait, collect).await.unwrap_or(false);
    if entered {
        commands
            .write_raw(Bytes::from_static(EXIT_COMMAND_MODE))
            .await?;
    }
    Ok(entered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ap_value() {
        assert_eq!(OperatingMode::from_ap_value(0), OperatingMode::At);
        assert_eq!(OperatingMode::from_ap_value(1), OperatingMode::Api);
        assert_eq!(OperatingMode::from_ap_value(2), OperatingMode::ApiEscaped);
        assert_eq!(OperatingMode::from_ap_value(5), OperatingMode::ApiEscaped);
    }

    #[test]
    fn test_mode_predicates() {
        assert!(OperatingMode::Api.is_api());
        assert!(OperatingMode::ApiEscaped.is_escaped());
        assert!(!OperatingMode::At.is_api());
        assert!(!OperatingMode::Unknown.is_api());
        assert_eq!(OperatingMode::ApiEscaped.ap_value(), Some(2));
        assert_eq!(OperatingMode::At.ap_value(), None);
    }

    #[tokio::test]
    async fn test_publish_dispatches_only_changes() {
        let dispatcher = EventDispatcher::new(8);
        let (mode_tx, mode_rx) = watch::channel(OperatingMode::Unknown);
        let mut sub = dispatcher.subscribe(None);

        publish(&mode_tx, &dispatcher, OperatingMode::Api);
        publish(&mode_tx, &dispatcher, OperatingMode::Api);
        dispatcher.dispatch(Event::Connected);

        assert!(matches!(
            sub.recv().await,
            Some(Event::ModeChanged(OperatingMode::Api))
        ));
        assert!(matches!(sub.recv().await, Some(Event::Connected)));
        assert_eq!(*mode_rx.borrow(), OperatingMode::Api);
    }
}
