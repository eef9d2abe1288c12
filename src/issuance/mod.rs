pub mod authority;
pub mod certificate;
pub mod challenge;
pub mod pem;
pub mod picker;
pub mod service;
