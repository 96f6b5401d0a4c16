//! bioloid-registry: declarative device types and typed register access
//!
//! Device types are loaded once from line-oriented table files, are
//! immutable afterwards, and are shared by every device of that model. The
//! [`Device`] façade binds a device type to a bus address and routes typed
//! get/set operations through the transactor.

mod error;
pub use error::{RegistryError, Result};

mod kinds;
pub use kinds::RegisterKind;

mod types;
pub use types::{Access, DeviceType, DeviceTypeRegistry, Register};

mod loader;
pub use loader::{load_dir, load_file, load_str, LoadError};

mod device;
pub use device::{Device, RegisterReading};
