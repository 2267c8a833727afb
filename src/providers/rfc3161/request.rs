//! RFC 3161 TimeStampReq encoding and TimeStampResp parsing
//!
//! The request is a small fixed shape:
//!
//! ```text
//! TimeStampReq ::= SEQUENCE {
//!     version        INTEGER { v1(1) },
//!     messageImprint SEQUENCE {
//!         hashAlgorithm AlgorithmIdentifier,   -- SHA-256 OID + NULL params
//!         hashedMessage OCTET STRING },
//!     nonce          INTEGER,                  -- 8 random bytes, positive
//!     certReq        BOOLEAN }
//! ```
//!
//! Response validation is structural, not cryptographic: only the leading
//! PKIStatusInfo INTEGER decides acceptance. Serial number and genTime are
//! recovered by best-effort byte scans and are diagnostic only - they are
//! never used for security decisions.

use rand::RngCore;

use crate::asn1::{self, tag, Asn1Error, DerReader};

/// SHA-256 OID 2.16.840.1.101.3.4.2.1, pre-encoded content octets
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// PKIStatus values the TSA may grant with
const PKI_STATUS_GRANTED: i64 = 0;
const PKI_STATUS_GRANTED_WITH_MODS: i64 = 1;

/// Fresh 8-byte nonce with the top bit cleared so the INTEGER stays positive
pub fn generate_nonce() -> [u8; 8] {
    let mut nonce = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce[0] &= 0x7f;
    nonce
}

/// Encode a DER TimeStampReq for the given imprint and nonce
pub fn build_request(imprint: &[u8; 32], nonce: &[u8; 8]) -> Vec<u8> {
    let mut algorithm = asn1::oid(OID_SHA256);
    algorithm.extend_from_slice(&asn1::null());
    let algorithm = asn1::sequence(&algorithm);

    let mut message_imprint = algorithm;
    message_imprint.extend_from_slice(&asn1::octet_string(imprint));
    let message_imprint = asn1::sequence(&message_imprint);

    let mut body = asn1::integer_i64(1);
    body.extend_from_slice(&message_imprint);
    body.extend_from_slice(&asn1::integer_unsigned(nonce));
    body.extend_from_slice(&asn1::boolean(true));
    asn1::sequence(&body)
}

/// Decoded TimeStampReq (round-trip support for audit tooling and tests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub version: i64,
    pub imprint: Vec<u8>,
    pub nonce: Vec<u8>,
    pub cert_req: bool,
}

/// Decode a DER TimeStampReq built by `build_request`
pub fn parse_request(der: &[u8]) -> Result<ParsedRequest, Asn1Error> {
    let mut reader = DerReader::new(der);
    let mut req = reader.sequence()?;

    let version = req.integer()?;
    let mut message_imprint = req.sequence()?;
    let mut algorithm = message_imprint.sequence()?;
    algorithm.expect(tag::OBJECT_IDENTIFIER)?;
    let imprint = message_imprint.octet_string()?.to_vec();
    let nonce = req.integer_bytes()?.to_vec();
    let cert_req = req.boolean()?;

    Ok(ParsedRequest {
        version,
        imprint,
        nonce,
        cert_req,
    })
}

/// Structurally validated TimeStampResp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Leading PKIStatus INTEGER
    pub status: i64,
    /// Status 0 (granted) or 1 (granted with modifications)
    pub granted: bool,
    /// Best-effort serial number scan, hex-encoded; diagnostic only
    pub serial: Option<String>,
    /// Best-effort GeneralizedTime scan; diagnostic only
    pub gen_time: Option<String>,
}

/// Parse a DER TimeStampResp far enough to read the PKIStatus
pub fn parse_response(der: &[u8]) -> Result<ParsedResponse, Asn1Error> {
    let mut reader = DerReader::new(der);
    let mut resp = reader.sequence()?;
    let mut status_info = resp.sequence()?;
    let status = status_info.integer()?;
    let granted = status == PKI_STATUS_GRANTED || status == PKI_STATUS_GRANTED_WITH_MODS;

    Ok(ParsedResponse {
        status,
        granted,
        serial: scan_serial(der),
        gen_time: scan_gen_time(der),
    })
}

/// Scan for the TSTInfo serial number
///
/// Looks for the version-3 INTEGER marker (`02 01 03`) that opens TSTInfo
/// inside the CMS blob, then reads the next INTEGER after the policy OID
/// region as the serial. Pattern matching, not parsing - callers must treat
/// the result as a hint.
fn scan_serial(der: &[u8]) -> Option<String> {
    let marker = [0x02u8, 0x01, 0x03];
    let start = der.windows(marker.len()).position(|w| w == marker)?;
    let rest = &der[start + marker.len()..];

    let mut offset = 0;
    while offset + 2 <= rest.len() {
        if rest[offset] == tag::INTEGER {
            let len = rest[offset + 1] as usize;
            if len >= 1 && len <= 20 && offset + 2 + len <= rest.len() {
                return Some(hex::encode(&rest[offset + 2..offset + 2 + len]));
            }
        }
        offset += 1;
    }
    None
}

/// Scan for a GeneralizedTime (`18` tag) with a printable 14-20 byte payload
fn scan_gen_time(der: &[u8]) -> Option<String> {
    let mut offset = 0;
    while offset + 2 <= der.len() {
        if der[offset] == tag::GENERALIZED_TIME {
            let len = der[offset + 1] as usize;
            if (14..=20).contains(&len) && offset + 2 + len <= der.len() {
                let payload = &der[offset + 2..offset + 2 + len];
                if payload.iter().all(|&b| b.is_ascii_graphic()) {
                    return Some(String::from_utf8_lossy(payload).into_owned());
                }
            }
        }
        offset += 1;
    }
    None
}
