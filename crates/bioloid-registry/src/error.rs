use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot parse {kind} value '{text}'")]
    Parse { kind: &'static str, text: String },
    #[error("{kind} {value} is out of the allowed range {min} to {max}")]
    Range {
        kind: &'static str,
        value: String,
        min: String,
        max: String,
    },
    #[error("register '{0}' is read-only")]
    ReadOnly(String),
    #[error("no register named '{0}'")]
    UnknownRegister(String),
    #[error("no device type named '{0}'")]
    UnknownDeviceType(String),
    #[error(transparent)]
    Transport(#[from] bioloid_transport::TransportError),
}
