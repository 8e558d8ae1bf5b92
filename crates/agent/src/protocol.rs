//! Choice of tool-calling protocol per turn

use ratchet_config::ProtocolPreference;
use ratchet_provider::ToolProtocol;

pub trait ProtocolResolver: Send + Sync {
    fn resolve(&self) -> ToolProtocol;
}

/// Always the same protocol
pub struct FixedProtocol(pub ToolProtocol);

impl ProtocolResolver for FixedProtocol {
    fn resolve(&self) -> ToolProtocol {
        self.0
    }
}

/// Config preference checked against what the provider can do
pub struct ConfiguredProtocol {
    preference: ProtocolPreference,
    native_supported: bool,
}

impl ConfiguredProtocol {
    pub fn new(preference: ProtocolPreference, native_supported: bool) -> Self {
        Self {
            preference,
            native_supported,
        }
    }
}

impl ProtocolResolver for ConfiguredProtocol {
    fn resolve(&self) -> ToolProtocol {
        match self.preference {
            ProtocolPreference::Xml => ToolProtocol::Xml,
            ProtocolPreference::Native => ToolProtocol::Native,
            ProtocolPreference::Auto if self.native_supported => ToolProtocol::Native,
            ProtocolPreference::Auto => ToolProtocol::Xml,
        }
    }
}
