pub mod pse_edge;
#[cfg(any(test, feature = "test-support"))]
mod scripted;

pub use pse_edge::{PseEdgeAdapter, PseEdgeConfig};
#[cfg(any(test, feature = "test-support"))]
pub use scripted::ScriptedSource;
