//! Detached OpenPGP signature checks (RFC 4880).
//!
//! Covers what release manifests use: v4 RSA signatures over binary or
//! text documents, hashed with SHA-2, read from armored or binary input.

use crate::error::InstallError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::borrow::Cow;
use tracing::debug;

const TAG_SIGNATURE: u8 = 2;
const TAG_PUBLIC_KEY: u8 = 6;
const TAG_PUBLIC_SUBKEY: u8 = 14;

const SIG_BINARY: u8 = 0x00;
const SIG_TEXT: u8 = 0x01;

const ALGO_RSA: u8 = 1;
const ALGO_RSA_SIGN: u8 = 3;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

fn invalid(reason: impl Into<String>) -> InstallError {
    InstallError::SignatureInvalid(reason.into())
}

/// RSA keys (primary and subkeys) from one or more transferable public keys.
#[derive(Debug, Clone)]
pub struct PublicKeyRing {
    keys: Vec<RsaPublicKey>,
}

impl PublicKeyRing {
    /// Reads keys from an armored block or binary packets.
    pub fn parse(input: &[u8]) -> Result<Self, InstallError> {
        let data = dearmor(input)?;
        let mut keys = Vec::new();

        for packet in packets(&data)? {
            if packet.tag != TAG_PUBLIC_KEY && packet.tag != TAG_PUBLIC_SUBKEY {
                continue;
            }
            match rsa_key(packet.body) {
                Ok(Some(key)) => keys.push(key),
                Ok(None) => debug!(tag = packet.tag, "skipping non-RSA key packet"),
                Err(e) => debug!(error = %e, "skipping unreadable key packet"),
            }
        }

        if keys.is_empty() {
            return Err(invalid("trusted key contains no usable RSA keys"));
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Checks a detached `signature` over `data`. Any signature packet made
    /// by any key in the ring is accepted.
    pub fn verify_detached(&self, data: &[u8], signature: &[u8]) -> Result<(), InstallError> {
        let raw = dearmor(signature)?;
        let mut last_error = invalid("no signature packet found");

        for packet in packets(&raw)? {
            if packet.tag != TAG_SIGNATURE {
                continue;
            }
            match self.verify_packet(data, packet.body) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn verify_packet(&self, data: &[u8], body: &[u8]) -> Result<(), InstallError> {
        let sig = SignaturePacket::parse(body)?;

        let document: Cow<'_, [u8]> = match sig.sig_type {
            SIG_BINARY => Cow::Borrowed(data),
            SIG_TEXT => Cow::Owned(canonical_text(data)),
            other => return Err(invalid(format!("unsupported signature type {:#04x}", other))),
        };

        let trailer_len = u32::try_from(sig.hashed.len()).map_err(|_| invalid("signature too large"))?;
        let mut trailer = Vec::with_capacity(6);
        trailer.extend_from_slice(&[4, 0xff]);
        trailer.extend_from_slice(&trailer_len.to_be_bytes());
        let parts: [&[u8]; 3] = [&document, sig.hashed, &trailer];

        let (digest, scheme) = match sig.hash_algo {
            8 => (hash::<Sha256>(&parts), Pkcs1v15Sign::new::<Sha256>()),
            9 => (hash::<Sha384>(&parts), Pkcs1v15Sign::new::<Sha384>()),
            10 => (hash::<Sha512>(&parts), Pkcs1v15Sign::new::<Sha512>()),
            11 => (hash::<Sha224>(&parts), Pkcs1v15Sign::new::<Sha224>()),
            other => return Err(invalid(format!("unsupported hash algorithm {}", other))),
        };

        if digest[..2] != sig.digest_prefix {
            return Err(invalid("signed data does not match signature"));
        }

        for key in &self.keys {
            let size = key.size();
            if sig.value.len() > size {
                continue;
            }
            let mut padded = vec![0u8; size - sig.value.len()];
            padded.extend_from_slice(sig.value);
            if key.verify(scheme.clone(), &digest, &padded).is_ok() {
                return Ok(());
            }
        }
        Err(invalid("signature was not made by a trusted key"))
    }
}

fn hash<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Text documents are signed with `\r\n` line endings.
fn canonical_text(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut previous = 0u8;
    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
    out
}

struct SignaturePacket<'a> {
    sig_type: u8,
    hash_algo: u8,
    /// Version through the end of the hashed subpackets.
    hashed: &'a [u8],
    digest_prefix: [u8; 2],
    value: &'a [u8],
}

impl<'a> SignaturePacket<'a> {
    fn parse(body: &'a [u8]) -> Result<Self, InstallError> {
        let mut r = Reader::new(body);
        let version = r.u8()?;
        if version != 4 {
            return Err(invalid(format!("unsupported signature version {}", version)));
        }
        let sig_type = r.u8()?;
        let key_algo = r.u8()?;
        if key_algo != ALGO_RSA && key_algo != ALGO_RSA_SIGN {
            return Err(invalid(format!("unsupported public key algorithm {}", key_algo)));
        }
        let hash_algo = r.u8()?;
        let hashed_len = usize::from(r.u16()?);
        r.take(hashed_len)?;
        let hashed = &body[..r.pos];
        let unhashed_len = usize::from(r.u16()?);
        r.take(unhashed_len)?;
        let prefix = r.take(2)?;
        let value = r.mpi()?;

        Ok(Self {
            sig_type,
            hash_algo,
            hashed,
            digest_prefix: [prefix[0], prefix[1]],
            value,
        })
    }
}

/// `Ok(None)` for well-formed keys of other algorithms.
fn rsa_key(body: &[u8]) -> Result<Option<RsaPublicKey>, InstallError> {
    let mut r = Reader::new(body);
    let version = r.u8()?;
    if version != 4 {
        return Ok(None);
    }
    r.take(4)?; // creation time
    let algo = r.u8()?;
    if algo != ALGO_RSA && algo != ALGO_RSA_SIGN {
        return Ok(None);
    }
    let n = BigUint::from_bytes_be(r.mpi()?);
    let e = BigUint::from_bytes_be(r.mpi()?);
    RsaPublicKey::new(n, e)
        .map(Some)
        .map_err(|e| invalid(format!("invalid RSA key: {}", e)))
}

// ============================================================================
// Packets
// ============================================================================

struct Packet<'a> {
    tag: u8,
    body: &'a [u8],
}

fn packets(data: &[u8]) -> Result<Vec<Packet<'_>>, InstallError> {
    let mut r = Reader::new(data);
    let mut out = Vec::new();

    while !r.is_empty() {
        let header = r.u8()?;
        if header & 0x80 == 0 {
            return Err(invalid("malformed packet header"));
        }

        let (tag, len) = if header & 0x40 != 0 {
            let tag = header & 0x3f;
            let first = usize::from(r.u8()?);
            let len = match first {
                0..=191 => first,
                192..=223 => ((first - 192) << 8) + usize::from(r.u8()?) + 192,
                255 => r.u32()? as usize,
                _ => return Err(invalid("partial body lengths are not supported")),
            };
            (tag, len)
        } else {
            let tag = (header >> 2) & 0x0f;
            let len = match header & 0x03 {
                0 => usize::from(r.u8()?),
                1 => usize::from(r.u16()?),
                2 => r.u32()? as usize,
                _ => r.remaining(),
            };
            (tag, len)
        };

        out.push(Packet {
            tag,
            body: r.take(len)?,
        });
    }
    Ok(out)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], InstallError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| invalid("truncated packet"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, InstallError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, InstallError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, InstallError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Multiprecision integer: a bit count followed by big-endian bytes.
    fn mpi(&mut self) -> Result<&'a [u8], InstallError> {
        let bits = usize::from(self.u16()?);
        self.take(bits.div_ceil(8))
    }
}

// ============================================================================
// Armor
// ============================================================================

/// Returns binary packets, decoding ASCII armor when present.
fn dearmor(input: &[u8]) -> Result<Cow<'_, [u8]>, InstallError> {
    if input.first().is_some_and(|b| b & 0x80 != 0) {
        return Ok(Cow::Borrowed(input));
    }

    let text = std::str::from_utf8(input).map_err(|_| invalid("neither OpenPGP packets nor armored text"))?;
    let mut lines = text.lines().map(str::trim);
    lines
        .by_ref()
        .find(|line| line.starts_with("-----BEGIN PGP "))
        .ok_or_else(|| invalid("missing armor header"))?;

    let mut body = String::new();
    let mut checksum = None;
    let mut in_headers = true;
    let mut ended = false;

    for line in lines {
        if line.starts_with("-----END PGP ") {
            ended = true;
            break;
        }
        if in_headers {
            if line.is_empty() || line.contains(": ") {
                in_headers = !line.is_empty();
                continue;
            }
            in_headers = false;
        }
        if line.len() == 5 && line.starts_with('=') {
            checksum = Some(&line[1..]);
        } else {
            body.push_str(line);
        }
    }

    if !ended {
        return Err(invalid("missing armor footer"));
    }

    let data = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| invalid(format!("armor is not valid base64: {}", e)))?;

    if let Some(checksum) = checksum {
        let expected = STANDARD
            .decode(checksum)
            .map_err(|e| invalid(format!("armor checksum is not valid base64: {}", e)))?;
        if expected != crc24(&data).to_be_bytes()[1..] {
            return Err(invalid("armor checksum mismatch"));
        }
    }

    Ok(Cow::Owned(data))
}

fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = include_str!("testdata/test-key.asc");
    const UNTRUSTED_KEY: &str = include_str!("testdata/untrusted-key.asc");
    const MANIFEST: &[u8] = include_bytes!("testdata/SHA2-256SUMS");
    const BINARY_SIG: &[u8] = include_bytes!("testdata/SHA2-256SUMS.sig");
    const ARMORED_SIG: &[u8] = include_bytes!("testdata/SHA2-256SUMS.asc");
    const TEXT_SIG: &[u8] = include_bytes!("testdata/SHA2-256SUMS.text.sig");

    fn ring(armored: &str) -> PublicKeyRing {
        PublicKeyRing::parse(armored.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_armored_key() {
        let ring = ring(TEST_KEY);
        assert_eq!(ring.len(), 1);
        assert!(!ring.is_empty());
    }

    #[test]
    fn test_binary_and_armored_signatures() {
        let ring = ring(TEST_KEY);
        ring.verify_detached(MANIFEST, BINARY_SIG).unwrap();
        ring.verify_detached(MANIFEST, ARMORED_SIG).unwrap();
    }

    #[test]
    fn test_text_signature_uses_crlf() {
        let ring = ring(TEST_KEY);
        ring.verify_detached(MANIFEST, TEXT_SIG).unwrap();

        let crlf = canonical_text(MANIFEST);
        assert!(crlf.windows(2).any(|w| w == b"\r\n"));
        assert_eq!(canonical_text(&crlf), crlf);
    }

    #[test]
    fn test_altered_data_is_rejected() {
        let mut altered = MANIFEST.to_vec();
        altered[0] ^= 1;
        let err = ring(TEST_KEY).verify_detached(&altered, BINARY_SIG).unwrap_err();
        assert!(matches!(err, InstallError::SignatureInvalid(_)));
    }

    #[test]
    fn test_other_key_is_rejected() {
        let err = ring(UNTRUSTED_KEY).verify_detached(MANIFEST, ARMORED_SIG).unwrap_err();
        match err {
            InstallError::SignatureInvalid(reason) => assert!(reason.contains("trusted key"), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_input() {
        assert!(PublicKeyRing::parse(b"").is_err());
        assert!(PublicKeyRing::parse(b"not a key").is_err());
        assert!(PublicKeyRing::parse(&[0x99, 0x01]).is_err());

        let ring = ring(TEST_KEY);
        assert!(ring.verify_detached(MANIFEST, b"").is_err());
        assert!(ring.verify_detached(MANIFEST, &BINARY_SIG[..40]).is_err());
        // Raw Ed25519-sized garbage is neither armor nor a packet.
        assert!(ring.verify_detached(MANIFEST, &[0x41; 64]).is_err());
    }

    #[test]
    fn test_armor_checksum_is_checked() {
        let armored = std::str::from_utf8(ARMORED_SIG).unwrap();
        let crc_line = armored
            .lines()
            .find(|l| l.len() == 5 && l.starts_with('='))
            .unwrap();
        let broken = armored.replace(crc_line, "=AAAA");
        assert!(dearmor(broken.as_bytes()).is_err());
        assert!(dearmor(ARMORED_SIG).is_ok());
    }

    #[test]
    fn test_crc24_reference() {
        // RFC 4880 initial value over empty input.
        assert_eq!(crc24(b""), CRC24_INIT);
    }
}
