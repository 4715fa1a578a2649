//! Connection and call configuration.

use crate::error::{Result, RpcError};
use std::time::Duration;

/// Protocol-level defaults.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Maximum message size when none is configured.
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Default per-call timeout. `None` waits indefinitely.
    pub const DEFAULT_CALL_TIMEOUT: Option<Duration> = None;
    /// Delay between client reconnect attempts when none is configured.
    pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(0);
}

/// Text encoding used for RPC frames.
///
/// The wire format is JSON text; binary frames are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// UTF-8 (default).
    #[default]
    Utf8,
    /// 7-bit ASCII. Frames carrying non-ASCII bytes are rejected.
    Ascii,
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    max_message_size: usize,
    call_timeout: Option<Duration>,
    encoding: Encoding,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: ProtocolConfig::DEFAULT_MAX_MESSAGE_SIZE,
            call_timeout: ProtocolConfig::DEFAULT_CALL_TIMEOUT,
            encoding: Encoding::default(),
        }
    }
}

impl RpcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum message size in bytes. Must be strictly positive.
    pub fn max_message_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(RpcError::config(
                "The message size must be set to a strictly positive value",
            ));
        }
        self.max_message_size = size;
        Ok(self)
    }

    /// Set the per-call timeout. A zero duration disables the timeout and
    /// makes remote calls wait indefinitely.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = if timeout.is_zero() {
            None
        } else {
            Some(timeout)
        };
        self
    }

    /// Set the text encoding used when decoding received frames.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn get_max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn get_call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    pub fn get_encoding(&self) -> Encoding {
        self.encoding
    }
}
