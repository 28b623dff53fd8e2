mod dispatch;
pub(crate) mod kernel;

pub use dispatch::FreeEnergyDispatch;
pub use kernel::FreeEnergyInputs;
