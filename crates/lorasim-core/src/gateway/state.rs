use std::fmt;

/// Connection state shared by the discovery and data legs.
///
/// `DisconnectionError` is terminal: a gateway that failed to close
/// its socket stays there until it is removed and re-added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    DisconnectionError,
}

impl ConnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::DisconnectionError => "disconnection error",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_lowercase_names() {
        assert_eq!(ConnState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnState::DisconnectionError.to_string(), "disconnection error");
        assert_eq!(ConnState::default(), ConnState::Disconnected);
    }
}
