use std::fmt::Display;

use thiserror::Error;

use crate::bigint::rsa::PublicKey;

const POLICY_PREFIX: &str = "http://opcfoundation.org/UA/SecurityPolicy#";

/// Security policies an endpoint may announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
}

impl SecurityPolicy {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri.strip_prefix(POLICY_PREFIX)? {
            "None" => Some(Self::None),
            "Basic128Rsa15" => Some(Self::Basic128Rsa15),
            "Basic256" => Some(Self::Basic256),
            "Basic256Sha256" => Some(Self::Basic256Sha256),
            "Aes128_Sha256_RsaOaep" => Some(Self::Aes128Sha256RsaOaep),
            _ => None,
        }
    }

    pub fn uri(&self) -> String {
        format!("{POLICY_PREFIX}{}", self.name())
    }

    fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Basic128Rsa15 => "Basic128Rsa15",
            Self::Basic256 => "Basic256",
            Self::Basic256Sha256 => "Basic256Sha256",
            Self::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
        }
    }

    /// Whether asymmetric encryption under this policy uses OAEP padding
    pub fn uses_oaep(&self) -> bool {
        !matches!(self, Self::None | Self::Basic128Rsa15)
    }
}

impl Display for SecurityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSecurityMode {
    Invalid,
    None,
    Sign,
    SignAndEncrypt,
}

/// Endpoint settings under which no OAEP block reaches the server
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Unsupported {
    #[error("security mode {0:?} does not encrypt the OpenSecureChannel request")]
    SecurityMode(MessageSecurityMode),
    #[error("security policy {0} does not use RSA-OAEP")]
    SecurityPolicy(SecurityPolicy),
}

/// Target server as described by its endpoint description
#[derive(Debug, Clone)]
pub struct Endpoint<const LIMBS: usize> {
    pub host: String,
    pub port: u16,
    pub endpoint_url: String,
    pub security_policy: SecurityPolicy,
    pub security_mode: MessageSecurityMode,
    /// Key from the server certificate
    pub public_key: PublicKey<LIMBS>,
}

impl<const LIMBS: usize> Endpoint<LIMBS> {
    pub fn new(host: impl Into<String>, port: u16, public_key: PublicKey<LIMBS>) -> Self {
        let host = host.into();
        Self {
            endpoint_url: format!("opc.tcp://{host}:{port}"),
            host,
            port,
            security_policy: SecurityPolicy::Basic256Sha256,
            security_mode: MessageSecurityMode::SignAndEncrypt,
            public_key,
        }
    }

    pub fn with_security(mut self, policy: SecurityPolicy, mode: MessageSecurityMode) -> Self {
        self.security_policy = policy;
        self.security_mode = mode;
        self
    }

    /// Checks that the endpoint exposes an OAEP decryption to attack
    pub fn check_supported(&self) -> Result<(), Unsupported> {
        if self.security_mode != MessageSecurityMode::SignAndEncrypt {
            return Err(Unsupported::SecurityMode(self.security_mode));
        }
        if !self.security_policy.uses_oaep() {
            return Err(Unsupported::SecurityPolicy(self.security_policy));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint::rsa::tests::keys_512;

    #[test]
    fn test_policy_uris() {
        for policy in [
            SecurityPolicy::None,
            SecurityPolicy::Basic128Rsa15,
            SecurityPolicy::Basic256,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
        ] {
            assert_eq!(SecurityPolicy::from_uri(&policy.uri()), Some(policy));
        }
        assert_eq!(
            SecurityPolicy::Aes128Sha256RsaOaep.uri(),
            "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
        );
        assert_eq!(SecurityPolicy::from_uri("Basic256"), None);
    }

    #[test]
    fn test_supported_configurations() {
        let (public_key, _) = keys_512();
        let endpoint = Endpoint::new("localhost", 4840, public_key);
        assert_eq!(endpoint.endpoint_url, "opc.tcp://localhost:4840");
        assert_eq!(endpoint.check_supported(), Ok(()));

        let signed = endpoint
            .clone()
            .with_security(SecurityPolicy::Basic256, MessageSecurityMode::Sign);
        assert_eq!(
            signed.check_supported(),
            Err(Unsupported::SecurityMode(MessageSecurityMode::Sign))
        );

        let pkcs = endpoint.with_security(
            SecurityPolicy::Basic128Rsa15,
            MessageSecurityMode::SignAndEncrypt,
        );
        assert_eq!(
            pkcs.check_supported(),
            Err(Unsupported::SecurityPolicy(SecurityPolicy::Basic128Rsa15))
        );
    }
}
