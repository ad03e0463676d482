//! Manger's chosen ciphertext attack on RSA-OAEP, mounted against the asymmetric
//! OpenSecureChannel decryption of an OPC UA server.

pub mod bigint;
pub mod cipher;
pub mod config;
pub mod endpoint;
pub mod learner;
pub mod manger;
pub mod oracle;
pub mod report;
pub mod sim;
pub mod timing;
pub mod transport;
pub mod wire;
