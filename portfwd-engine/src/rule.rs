use crate::errors::InvalidRule;

/// Transport a rule forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A named mapping from a local port to a remote target
///
/// Rules are plain values. The engine never mutates a rule it was started
/// from; editing happens in the store and takes effect on the next start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    /// Unique key across running rules
    pub name: String,
    pub local_port: u16,
    /// Hostname or IP literal, resolved on every dial
    pub target_address: String,
    pub target_port: u16,
    pub protocol: Protocol,
    /// Whether `start_all` should start this rule
    pub active: bool,
}

impl ForwardRule {
    pub fn tcp(
        name: impl Into<String>,
        local_port: u16,
        target_address: impl Into<String>,
        target_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            local_port,
            target_address: target_address.into(),
            target_port,
            protocol: Protocol::Tcp,
            active: true,
        }
    }

    pub fn udp(
        name: impl Into<String>,
        local_port: u16,
        target_address: impl Into<String>,
        target_port: u16,
    ) -> Self {
        Self {
            protocol: Protocol::Udp,
            ..Self::tcp(name, local_port, target_address, target_port)
        }
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Target host as passed to the resolver, with IPv6 brackets removed
    pub fn host(&self) -> &str {
        let address = self.target_address.trim();
        address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address)
    }

    /// `host:port` form of the target, used for logging and status
    pub fn target(&self) -> String {
        // IPv6 literals need brackets to form a valid authority
        let host = self.host();
        if host.contains(':') {
            format!("[{}]:{}", host, self.target_port)
        } else {
            format!("{}:{}", host, self.target_port)
        }
    }

    pub fn validate(&self) -> Result<(), InvalidRule> {
        if self.name.trim().is_empty() {
            return Err(InvalidRule::EmptyName);
        }
        if self.local_port == 0 {
            return Err(InvalidRule::ZeroLocalPort);
        }
        if self.target_port == 0 {
            return Err(InvalidRule::ZeroTargetPort);
        }
        if self.target_address.trim().is_empty() {
            return Err(InvalidRule::EmptyTargetAddress);
        }
        Ok(())
    }
}

impl std::fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} {} → {})",
            self.name,
            self.protocol,
            self.local_port,
            self.target()
        )
    }
}
