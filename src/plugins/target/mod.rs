//! Target plugins resolve the identifiers a renewal should certify.

mod csr;
mod manual;

pub use csr::{CsrTarget, CsrTargetOptions};
pub use manual::{ManualTarget, ManualTargetOptions};
