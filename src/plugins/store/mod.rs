//! Store plugins persist issued certificates for installation steps.

mod pem_files;

pub use pem_files::{PemFilesOptions, PemFilesStore};
