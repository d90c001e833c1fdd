//! Built-in strategies, one per family of action kinds.

mod device;
mod export;
pub(crate) mod network;
mod stream;
mod ui;

pub use device::DeviceAction;
pub use export::{Export, ExportFormat};
pub use network::{AuditLog, RequestAction};
pub use stream::Subscribe;
pub use ui::{Navigate, RunScript, ShowToast, ToggleModal, UpdateState};
