use log::{debug, warn};

use super::{
    certificate::{CertificateInfo, ChainEntry},
    service::AcquisitionError,
};
use crate::core::types::PrivateKeyPem;

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";
const END_CERTIFICATE: &str = "-----END CERTIFICATE-----";

/// Splits a blob of concatenated PEM certificates into DER blocks.
///
/// Blocks that cannot be decoded or parsed are skipped with a warning.
/// Text outside `BEGIN/END CERTIFICATE` pairs, including an unterminated
/// trailing block, is ignored.
pub fn scan_certificates(bytes: &[u8]) -> Vec<Vec<u8>> {
    scan_blocks(bytes).into_iter().flatten().collect()
}

/// Every delimited block in order; `None` marks one that did not decode.
fn scan_blocks(bytes: &[u8]) -> Vec<Option<Vec<u8>>> {
    let text = String::from_utf8_lossy(bytes);
    debug!("[issuance] parsing certificate from {} bytes", bytes.len());
    let mut blocks = Vec::new();
    let mut start = 0usize;
    while let Some(found) = text[start..].find(BEGIN_CERTIFICATE) {
        let block_start = start + found;
        let Some(found_end) = text[block_start..].find(END_CERTIFICATE) else {
            break;
        };
        let block_end = block_start + found_end + END_CERTIFICATE.len();
        let decoded = decode_block(&text[block_start..block_end]);
        if decoded.is_none() {
            warn!(
                "[issuance] PEM data at range {block_start}..{block_end} could not be parsed as a certificate"
            );
        }
        blocks.push(decoded);
        start = block_end;
    }
    blocks
}

fn decode_block(block: &str) -> Option<Vec<u8>> {
    let parsed = pem::parse(block).ok()?;
    let der = parsed.contents().to_vec();
    x509_parser::parse_x509_certificate(&der).ok()?;
    Some(der)
}

/// Builds a chain from downloaded PEM bytes.
///
/// The first certificate is the leaf: it carries the private key and is
/// aliased by `friendly_name`. Every later certificate is an intermediate
/// aliased by its subject. A first block that does not decode fails the
/// parse; undecodable later blocks are dropped.
pub fn parse_certificate(
    bytes: &[u8],
    friendly_name: &str,
    private_key: Option<PrivateKeyPem>,
) -> Result<CertificateInfo, AcquisitionError> {
    let mut blocks = scan_blocks(bytes).into_iter();
    let leaf = match blocks.next() {
        None => return Err(AcquisitionError::NoCertificate),
        Some(None) => return Err(AcquisitionError::MalformedLeaf),
        Some(Some(der)) => der,
    };
    let mut chain = Vec::with_capacity(blocks.len() + 1);
    chain.push(
        ChainEntry::parse(Some(friendly_name.to_string()), leaf)
            .map_err(|e| AcquisitionError::Download(e.to_string()))?,
    );
    for der in blocks.flatten() {
        let entry =
            ChainEntry::parse(None, der).map_err(|e| AcquisitionError::Download(e.to_string()))?;
        chain.push(entry);
    }
    CertificateInfo::from_chain(friendly_name, chain, private_key)
        .map_err(|e| AcquisitionError::Download(e.to_string()))
}
