//! CSR plugins generate the signing request and private key of an order.

mod ec;

pub use ec::{EcCsr, EcCsrOptions, EcCurve};
