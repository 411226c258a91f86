//! Wire-format RDATA builders for the record types the zone engine emits.
//!
//! Names embedded in RDATA are written in canonical (lowercase,
//! uncompressed) form so the records can be fed to the signer as-is.

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::name::Name;
use crate::dns::resource::Record;

use super::algorithm::Algorithm;
use super::digest::DigestType;
use super::key_tag::calculate_key_tag;

pub const DNSKEY_FLAG_ZONE: u16 = 0x0100;
pub const DNSKEY_FLAG_SEP: u16 = 0x0001;
pub const DNSKEY_PROTOCOL: u8 = 3;

/// SOA RDATA (RFC 1035 §3.3.13)
#[derive(Clone, Debug)]
pub struct Soa {
    pub ns: Name,
    pub mbox: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minttl: u32,
}

impl Soa {
    pub fn rdata(&self) -> Vec<u8> {
        let mut buf = self.ns.to_wire();
        buf.extend_from_slice(&self.mbox.to_wire());
        buf.extend_from_slice(&self.serial.to_be_bytes());
        buf.extend_from_slice(&self.refresh.to_be_bytes());
        buf.extend_from_slice(&self.retry.to_be_bytes());
        buf.extend_from_slice(&self.expire.to_be_bytes());
        buf.extend_from_slice(&self.minttl.to_be_bytes());
        buf
    }

    pub fn to_record(&self, owner: &Name, ttl: u32) -> Record {
        Record::new(owner.clone(), RecordType::SOA, RecordClass::IN, ttl).with_rdata(self.rdata())
    }
}

/// DNSKEY RDATA (RFC 4034 §2.1)
#[derive(Clone, Debug)]
pub struct Dnskey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: Algorithm,
    pub public_key: Vec<u8>,
}

impl Dnskey {
    pub fn zsk(algorithm: Algorithm, public_key: Vec<u8>) -> Self {
        Dnskey {
            flags: DNSKEY_FLAG_ZONE,
            protocol: DNSKEY_PROTOCOL,
            algorithm,
            public_key,
        }
    }

    pub fn ksk(algorithm: Algorithm, public_key: Vec<u8>) -> Self {
        Dnskey {
            flags: DNSKEY_FLAG_ZONE | DNSKEY_FLAG_SEP,
            protocol: DNSKEY_PROTOCOL,
            algorithm,
            public_key,
        }
    }

    pub fn is_sep(&self) -> bool {
        self.flags & DNSKEY_FLAG_SEP != 0
    }

    pub fn rdata(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.public_key.len());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.push(self.protocol);
        buf.push(self.algorithm.to_u8());
        buf.extend_from_slice(&self.public_key);
        buf
    }

    pub fn key_tag(&self) -> u16 {
        calculate_key_tag(
            self.flags,
            self.protocol,
            self.algorithm.to_u8(),
            &self.public_key,
        )
    }

    /// Derive the DS record for this key (RFC 4034 §5.1.4): digest over the
    /// canonical owner name followed by the DNSKEY RDATA.
    pub fn to_ds(&self, owner: &Name, digest_type: DigestType) -> Ds {
        let mut input = owner.to_wire();
        input.extend_from_slice(&self.rdata());
        Ds {
            key_tag: self.key_tag(),
            algorithm: self.algorithm,
            digest_type,
            digest: digest_type.digest(&input),
        }
    }

    pub fn to_record(&self, owner: &Name, rtype: RecordType, ttl: u32) -> Record {
        Record::new(owner.clone(), rtype, RecordClass::IN, ttl).with_rdata(self.rdata())
    }

    /// Presentation form for operator logs.
    pub fn display(&self, owner: &Name, ttl: u32) -> String {
        format!(
            "{owner} {ttl} IN DNSKEY {} {} {} {}",
            self.flags,
            self.protocol,
            self.algorithm.to_u8(),
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &self.public_key),
        )
    }
}

/// DS RDATA (RFC 4034 §5.1)
#[derive(Clone, Debug)]
pub struct Ds {
    pub key_tag: u16,
    pub algorithm: Algorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
}

impl Ds {
    pub fn rdata(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.digest.len());
        buf.extend_from_slice(&self.key_tag.to_be_bytes());
        buf.push(self.algorithm.to_u8());
        buf.push(self.digest_type.to_u8());
        buf.extend_from_slice(&self.digest);
        buf
    }

    pub fn to_record(&self, owner: &Name, rtype: RecordType, ttl: u32) -> Record {
        Record::new(owner.clone(), rtype, RecordClass::IN, ttl).with_rdata(self.rdata())
    }

    pub fn display(&self, owner: &Name, ttl: u32) -> String {
        format!(
            "{owner} {ttl} IN DS {} {} {} {}",
            self.key_tag,
            self.algorithm.to_u8(),
            self.digest_type.to_u8(),
            hex::encode(&self.digest),
        )
    }
}

/// RRSIG RDATA (RFC 4034 §3.1)
#[derive(Clone, Debug)]
pub struct Rrsig {
    pub type_covered: u16,
    pub algorithm: Algorithm,
    pub labels: u8,
    pub orig_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer_name: Name,
    pub signature: Vec<u8>,
}

impl Rrsig {
    /// RDATA up to and excluding the signature field; this prefix is also
    /// the first part of the signing input (RFC 4034 §3.1.8.1).
    pub fn rdata_prefix(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(18 + self.signer_name.as_str().len());
        buf.extend_from_slice(&self.type_covered.to_be_bytes());
        buf.push(self.algorithm.to_u8());
        buf.push(self.labels);
        buf.extend_from_slice(&self.orig_ttl.to_be_bytes());
        buf.extend_from_slice(&self.expiration.to_be_bytes());
        buf.extend_from_slice(&self.inception.to_be_bytes());
        buf.extend_from_slice(&self.key_tag.to_be_bytes());
        buf.extend_from_slice(&self.signer_name.to_wire());
        buf
    }

    pub fn rdata(&self) -> Vec<u8> {
        let mut buf = self.rdata_prefix();
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn to_record(&self, owner: &Name, ttl: u32) -> Record {
        Record::new(owner.clone(), RecordType::RRSIG, RecordClass::IN, ttl)
            .with_rdata(self.rdata())
    }

    /// Decode wire RDATA back into fields; used by tests and the verify
    /// path of integration checks.
    pub fn parse(rdata: &[u8]) -> Option<Self> {
        if rdata.len() < 18 {
            return None;
        }
        let type_covered = u16::from_be_bytes([rdata[0], rdata[1]]);
        let algorithm = Algorithm::from_u8(rdata[2])?;
        let labels = rdata[3];
        let orig_ttl = u32::from_be_bytes([rdata[4], rdata[5], rdata[6], rdata[7]]);
        let expiration = u32::from_be_bytes([rdata[8], rdata[9], rdata[10], rdata[11]]);
        let inception = u32::from_be_bytes([rdata[12], rdata[13], rdata[14], rdata[15]]);
        let key_tag = u16::from_be_bytes([rdata[16], rdata[17]]);

        // signer name: uncompressed labels
        let mut pos = 18;
        let mut signer_labels = Vec::new();
        loop {
            let len = *rdata.get(pos)? as usize;
            pos += 1;
            if len == 0 {
                break;
            }
            let label = rdata.get(pos..pos + len)?;
            signer_labels.push(String::from_utf8(label.to_vec()).ok()?);
            pos += len;
        }

        Some(Rrsig {
            type_covered,
            algorithm,
            labels,
            orig_ttl,
            expiration,
            inception,
            key_tag,
            signer_name: Name::from_labels(&signer_labels),
            signature: rdata.get(pos..)?.to_vec(),
        })
    }
}

/// NSEC RDATA (RFC 4034 §4.1): next domain plus the type bitmap.
#[derive(Clone, Debug)]
pub struct Nsec {
    pub next_domain: Name,
    pub types: Vec<u16>,
}

impl Nsec {
    pub fn rdata(&self) -> Vec<u8> {
        let mut buf = self.next_domain.to_wire();
        buf.extend_from_slice(&encode_type_bitmap(&self.types));
        buf
    }

    pub fn to_record(&self, owner: &Name, ttl: u32) -> Record {
        Record::new(owner.clone(), RecordType::NSEC, RecordClass::IN, ttl).with_rdata(self.rdata())
    }
}

/// Window-block encoding of a type set (RFC 4034 §4.1.2). Input must be
/// sorted ascending.
pub fn encode_type_bitmap(types: &[u16]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut window = 0u8;
    let mut bitmap = [0u8; 32];
    let mut max_octet = 0usize;
    let mut window_used = false;

    let mut flush = |buf: &mut Vec<u8>, window: u8, bitmap: &[u8; 32], max_octet: usize| {
        buf.push(window);
        buf.push(max_octet as u8 + 1);
        buf.extend_from_slice(&bitmap[..=max_octet]);
    };

    for &code in types {
        let w = (code >> 8) as u8;
        if w != window && window_used {
            flush(&mut buf, window, &bitmap, max_octet);
            bitmap = [0u8; 32];
            max_octet = 0;
        }
        window = w;
        window_used = true;

        let offset = (code & 0xFF) as usize;
        bitmap[offset / 8] |= 0x80 >> (offset % 8);
        max_octet = max_octet.max(offset / 8);
    }

    if window_used {
        flush(&mut buf, window, &bitmap, max_octet);
    }
    buf
}

/// Decode a type bitmap back into codes; used by tests.
pub fn decode_type_bitmap(mut data: &[u8]) -> Vec<u16> {
    let mut types = Vec::new();
    while data.len() >= 2 {
        let window = data[0] as u16;
        let len = data[1] as usize;
        if data.len() < 2 + len {
            break;
        }
        for (octet, &byte) in data[2..2 + len].iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    types.push((window << 8) | (octet as u16 * 8 + bit as u16));
                }
            }
        }
        data = &data[2 + len..];
    }
    types
}

/// TXT RDATA holding a single character-string.
pub fn txt_rdata(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let len = bytes.len().min(255);
    let mut buf = Vec::with_capacity(1 + len);
    buf.push(len as u8);
    buf.extend_from_slice(&bytes[..len]);
    buf
}

/// First character-string of a TXT RDATA, when valid UTF-8.
pub fn txt_payload(record: &Record) -> Option<String> {
    let len = *record.rdata.first()? as usize;
    let bytes = record.rdata.get(1..1 + len)?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// NS RDATA: the nameserver host in canonical wire form.
pub fn ns_rdata(ns: &Name) -> Vec<u8> {
    ns.to_wire()
}
