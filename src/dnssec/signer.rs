//! Online zone signer.
//!
//! A single long-lived task owns every write to the record store: it signs
//! record sets arriving on the input channel, re-signs all occupied slots on
//! a cadence to keep signature validity windows fresh, and regenerates the
//! SOA after every pass so readers never observe records newer than the SOA.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::dns::enums::{RecordClass, RecordType};
use crate::dns::name::Name;
use crate::dns::resource::Record;
use crate::error::{HighwayError, Result};

use super::algorithm::Algorithm;
use super::digest::DigestType;
use super::keys::KeyPair;
use super::rdata::{ns_rdata, Dnskey, Ds, Nsec, Rrsig, Soa};
use super::store::{RecordStore, SignedAnswer};

/// Tolerated clock skew between us and validators, added on top of every
/// signature validity window.
pub const CLOCK_SKEW_RANGE: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct SignerOptions {
    /// Apex zone name; the only owner name served
    pub zone: String,
    /// Mailbox for the SOA record
    pub mailbox: String,
    /// Nameservers for the zone, at least one
    pub nameservers: Vec<String>,
    /// TTL for user-supplied record sets
    pub record_ttl: Duration,
    /// TTL for SOA / NS / DNSKEY / NSEC and friends
    pub authority_ttl: Duration,
    /// SOA refresh; retry and minimum TTL derive from it
    pub refresh_ttl: Duration,
    /// Minimum remaining signature lifetime
    pub signature_ttl: Duration,
    /// How far signature inception is backdated
    pub signature_backdate: Duration,
    /// Digest algorithm for the delegation signer record
    pub fingerprint: DigestType,
}

impl Default for SignerOptions {
    fn default() -> Self {
        SignerOptions {
            zone: String::new(),
            mailbox: String::new(),
            nameservers: Vec::new(),
            record_ttl: Duration::from_secs(5 * 60),
            authority_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_ttl: Duration::from_secs(60),
            signature_ttl: Duration::from_secs(60 * 60),
            signature_backdate: Duration::from_secs(24 * 60 * 60),
            fingerprint: DigestType::Sha256,
        }
    }
}

fn ttl_secs(d: Duration) -> u32 {
    d.as_secs() as u32
}

fn unix_time(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub struct Signer {
    key: KeyPair,
    zone: Name,
    mailbox: Name,
    nameservers: Vec<Name>,

    zsk: Dnskey,
    ksk: Dnskey,
    zsk_tag: u16,
    ksk_tag: u16,
    ksk_ds: Ds,

    options: SignerOptions,
    store: RecordStore,

    record_tx: mpsc::Sender<Vec<Record>>,
    record_rx: Mutex<Option<mpsc::Receiver<Vec<Record>>>>,
}

impl Signer {
    pub fn new(key: KeyPair, options: SignerOptions) -> Result<Self> {
        if options.nameservers.is_empty() {
            return Err(HighwayError::NoNameservers);
        }

        let zone = Name::canonical(&options.zone);
        let mailbox = Name::canonical(&options.mailbox);
        let nameservers: Vec<Name> = options
            .nameservers
            .iter()
            .map(|ns| Name::canonical(ns))
            .collect();

        let algorithm = key.algorithm();
        let public_key = key.public_key();

        // Same algorithm and key material for both; only the flags differ.
        // https://www.rfc-editor.org/rfc/rfc4034.html#section-2.1.1
        let zsk = Dnskey::zsk(algorithm, public_key.clone());
        let ksk = Dnskey::ksk(algorithm, public_key);

        let zsk_tag = zsk.key_tag();
        let ksk_tag = ksk.key_tag();
        let ksk_ds = ksk.to_ds(&zone, options.fingerprint);

        let (record_tx, record_rx) = mpsc::channel(16);

        Ok(Signer {
            key,
            zone,
            mailbox,
            nameservers,
            zsk,
            ksk,
            zsk_tag,
            ksk_tag,
            ksk_ds,
            options,
            store: RecordStore::new(),
            record_tx,
            record_rx: Mutex::new(Some(record_rx)),
        })
    }

    pub fn zone(&self) -> &Name {
        &self.zone
    }

    pub fn zone_labels(&self) -> usize {
        self.zone.label_count()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.key.algorithm()
    }

    pub fn options(&self) -> &SignerOptions {
        &self.options
    }

    pub fn dnskey(&self) -> [&Dnskey; 2] {
        [&self.zsk, &self.ksk]
    }

    /// The KSK's delegation signer record, for the parent zone.
    pub fn ds(&self) -> &Ds {
        &self.ksk_ds
    }

    pub fn nameservers(&self) -> &[Name] {
        &self.nameservers
    }

    pub fn ns(&self) -> Vec<Record> {
        self.nameservers
            .iter()
            .map(|ns| {
                Record::new(
                    self.zone.clone(),
                    RecordType::NS,
                    RecordClass::IN,
                    ttl_secs(self.options.authority_ttl),
                )
                .with_rdata(ns_rdata(ns))
            })
            .collect()
    }

    pub fn soa(&self, now: SystemTime) -> Soa {
        let refresh = ttl_secs(self.options.refresh_ttl);
        let authority = ttl_secs(self.options.authority_ttl);
        Soa {
            ns: self.nameservers[0].clone(),
            mbox: self.mailbox.clone(),
            serial: unix_time(now) as u32,
            refresh,
            retry: refresh / 2,
            expire: (refresh.saturating_mul(100)).min(authority),
            minttl: refresh / 2,
        }
    }

    /// Build a TXT record for the apex with the configured record TTL.
    pub fn txt_record(&self, value: &str) -> Record {
        Record::new(
            self.zone.clone(),
            RecordType::TXT,
            RecordClass::IN,
            ttl_secs(self.options.record_ttl),
        )
        .with_rdata(super::rdata::txt_rdata(value))
    }

    pub fn get(&self, type_code: u16) -> Option<Arc<SignedAnswer>> {
        self.store.get(type_code)
    }

    pub fn transfer(&self) -> Vec<Arc<SignedAnswer>> {
        self.store.transfer()
    }

    /// Queue a record set for signing. All records must agree on type, name,
    /// class and TTL. Signing is asynchronous; callers needing the result
    /// poll `get`.
    pub async fn add(&self, records: Vec<Record>) -> Result<()> {
        let first = records
            .first()
            .ok_or_else(|| HighwayError::HeaderMismatch("empty record set".into()))?;

        for record in &records[1..] {
            if record.rtype != first.rtype {
                return Err(HighwayError::HeaderMismatch("rtype mismatch".into()));
            }
            if record.name != first.name {
                return Err(HighwayError::HeaderMismatch("name mismatch".into()));
            }
            if record.rclass != first.rclass {
                return Err(HighwayError::HeaderMismatch("class mismatch".into()));
            }
            if record.ttl != first.ttl {
                return Err(HighwayError::HeaderMismatch("ttl mismatch".into()));
            }
        }

        for record in &records {
            debug!(
                "adding record: {} {} type {}",
                record.name,
                record.ttl,
                record.rtype.code()
            );
        }

        self.record_tx
            .send(records)
            .await
            .map_err(|_| HighwayError::SignerClosed)
    }

    /// Install the static authority record sets: NS, DNSKEY (ZSK and KSK),
    /// CDNSKEY and CDS from the SEP key, and the initial NSEC.
    pub async fn add_authority_records(&self) -> Result<()> {
        let authority_ttl = ttl_secs(self.options.authority_ttl);

        self.add(self.ns()).await?;

        self.add(vec![
            self.zsk
                .to_record(&self.zone, RecordType::DNSKEY, authority_ttl),
            self.ksk
                .to_record(&self.zone, RecordType::DNSKEY, authority_ttl),
        ])
        .await?;

        self.add(vec![self
            .ksk
            .to_record(&self.zone, RecordType::CDNSKEY, authority_ttl)])
        .await?;

        self.add(vec![self
            .ksk_ds
            .to_record(&self.zone, RecordType::CDS, authority_ttl)])
        .await?;

        let mut codes: Vec<u16> = [
            RecordType::NS,
            RecordType::SOA,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::DNSKEY,
            RecordType::CDS,
            RecordType::CDNSKEY,
        ]
        .iter()
        .map(|t| t.code())
        .collect();
        codes.sort_unstable();

        self.add(vec![self.nsec_record(codes)]).await
    }

    /// Run the signing loop. Single consumer; the sole writer to the store.
    pub async fn process(&self, interval: Duration) -> Result<()> {
        let mut record_rx = self
            .record_rx
            .lock()
            .await
            .take()
            .ok_or(HighwayError::SignerClosed)?;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = SystemTime::now();
                    for code in self.store.occupied_types() {
                        if let Some(answer) = self.store.get(code) {
                            let signed = self.sign_set(&answer.records, now)?;
                            self.store.store(code, signed);
                        }
                    }
                    trace!("re-signed all record sets");
                }
                set = record_rx.recv() => {
                    let Some(set) = set else {
                        warn!("record channel closed, signer exiting");
                        return Ok(());
                    };
                    let now = SystemTime::now();
                    let code = set[0].rtype.code();
                    let newly_occupied = !self.store.is_occupied(code);

                    let signed = self.sign_set(&set, now)?;
                    self.store.store(code, signed);

                    // The set of present types changed; the denial proof
                    // must be rebuilt.
                    if newly_occupied && code != RecordType::NSEC.code() {
                        self.regenerate_nsec(now)?;
                    }
                }
            }

            let now = SystemTime::now();
            let soa = self
                .soa(now)
                .to_record(&self.zone, ttl_secs(self.options.authority_ttl));
            let signed = self.sign_set(&[soa], now)?;
            self.store.store_soa(signed);
        }
    }

    fn nsec_record(&self, types: Vec<u16>) -> Record {
        // Apex-only zone: the NSEC chain is a single self-loop.
        Nsec {
            next_domain: self.zone.clone(),
            types,
        }
        .to_record(&self.zone, ttl_secs(self.options.authority_ttl))
    }

    fn regenerate_nsec(&self, now: SystemTime) -> Result<()> {
        let mut codes = self.store.occupied_types();
        for extra in [RecordType::SOA, RecordType::RRSIG, RecordType::NSEC] {
            if !codes.contains(&extra.code()) {
                codes.push(extra.code());
            }
        }
        codes.sort_unstable();

        let nsec = self.nsec_record(codes);
        let signed = self.sign_set(&[nsec], now)?;
        self.store.store(RecordType::NSEC.code(), signed);
        Ok(())
    }

    /// Sign one RRset, producing the covering RRSIG.
    ///
    /// DNSKEY, CDNSKEY and CDS sets are covered by the KSK, everything else
    /// by the ZSK.
    fn sign_set(&self, records: &[Record], now: SystemTime) -> Result<SignedAnswer> {
        let first = &records[0];
        let (key_dnskey, key_tag) = match first.rtype {
            RecordType::DNSKEY | RecordType::CDNSKEY | RecordType::CDS => (&self.ksk, self.ksk_tag),
            _ => (&self.zsk, self.zsk_tag),
        };

        let now_secs = unix_time(now);
        let header_ttl = first.ttl as u64;
        let validity = (self.options.signature_ttl.as_secs().max(2 * header_ttl))
            + CLOCK_SKEW_RANGE.as_secs();

        let mut rrsig = Rrsig {
            type_covered: first.rtype.code(),
            algorithm: key_dnskey.algorithm,
            labels: first.name.label_count() as u8,
            orig_ttl: first.ttl,
            expiration: (now_secs + validity) as u32,
            inception: now_secs.saturating_sub(self.options.signature_backdate.as_secs()) as u32,
            key_tag,
            signer_name: self.zone.clone(),
            signature: Vec::new(),
        };

        rrsig.signature = self.key.sign(&signing_data(&rrsig, records))?;

        Ok(SignedAnswer {
            records: records.to_vec(),
            rrsig: rrsig.to_record(&first.name, first.ttl),
        })
    }
}

/// RFC 4034 §3.1.8.1 signing input: the RRSIG RDATA without the signature,
/// followed by the canonical RRset sorted by RDATA.
fn signing_data(rrsig: &Rrsig, records: &[Record]) -> Vec<u8> {
    let mut data = rrsig.rdata_prefix();

    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| a.rdata.cmp(&b.rdata));

    for record in sorted {
        data.extend_from_slice(&record.name.to_wire());
        data.extend_from_slice(&record.rtype.code().to_be_bytes());
        data.extend_from_slice(&record.rclass.code().to_be_bytes());
        data.extend_from_slice(&rrsig.orig_ttl.to_be_bytes());
        data.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&record.rdata);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssec::rdata::{decode_type_bitmap, txt_payload, Rrsig};

    fn test_signer() -> Signer {
        let (key, _) = KeyPair::generate("ed25519").unwrap();
        Signer::new(
            key,
            SignerOptions {
                zone: "z.example".into(),
                mailbox: "admin.z.example".into(),
                nameservers: vec!["ns.z.example.".into()],
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_requires_nameservers() {
        let (key, _) = KeyPair::generate("ed25519").unwrap();
        let result = Signer::new(
            key,
            SignerOptions {
                zone: "z.example.".into(),
                mailbox: "admin.z.example.".into(),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(HighwayError::NoNameservers)));
    }

    #[test]
    fn test_zone_canonicalized() {
        let signer = test_signer();
        assert_eq!(signer.zone().as_str(), "z.example.");
        assert_eq!(signer.zone_labels(), 2);
    }

    #[test]
    fn test_key_flags() {
        let signer = test_signer();
        let [zsk, ksk] = signer.dnskey();
        assert_eq!(zsk.flags, 256);
        assert_eq!(ksk.flags, 257);
        assert_eq!(zsk.algorithm, Algorithm::Ed25519);
        assert_eq!(ksk.algorithm, Algorithm::Ed25519);
        assert_eq!(signer.ds().key_tag, ksk.key_tag());
    }

    #[test]
    fn test_soa_fields() {
        let signer = test_signer();
        let now = SystemTime::now();
        let soa = signer.soa(now);

        assert_eq!(soa.ns.as_str(), "ns.z.example.");
        assert_eq!(soa.mbox.as_str(), "admin.z.example.");
        assert_eq!(soa.serial, unix_time(now) as u32);
        assert_eq!(soa.refresh, 60);
        assert_eq!(soa.retry, 30);
        assert_eq!(soa.minttl, 30);
        // min(refresh * 100, authority_ttl)
        assert_eq!(soa.expire, 6000);
    }

    #[test]
    fn test_rrsig_validity_window() {
        let signer = test_signer();
        let now = SystemTime::now();
        let now_secs = unix_time(now);

        let answer = signer
            .sign_set(&[signer.txt_record("3414511:00aa")], now)
            .unwrap();
        let rrsig = Rrsig::parse(&answer.rrsig.rdata).unwrap();

        assert_eq!(rrsig.type_covered, RecordType::TXT.code());
        assert_eq!(rrsig.labels, 2);
        assert_eq!(rrsig.orig_ttl, 300);
        assert_eq!(rrsig.key_tag, signer.zsk_tag);
        assert!(rrsig.inception as u64 <= now_secs - 24 * 60 * 60 + 1);
        // max(signature_ttl, 2 * record_ttl) + clock skew
        assert!(rrsig.expiration as u64 >= now_secs + 3600 + 20);
    }

    #[test]
    fn test_ksk_covers_key_material() {
        let signer = test_signer();
        let now = SystemTime::now();
        let authority_ttl = ttl_secs(signer.options.authority_ttl);

        let dnskeys = vec![
            signer
                .zsk
                .to_record(signer.zone(), RecordType::DNSKEY, authority_ttl),
            signer
                .ksk
                .to_record(signer.zone(), RecordType::DNSKEY, authority_ttl),
        ];
        let answer = signer.sign_set(&dnskeys, now).unwrap();
        let rrsig = Rrsig::parse(&answer.rrsig.rdata).unwrap();
        assert_eq!(rrsig.key_tag, signer.ksk_tag);
    }

    #[test]
    fn test_signature_verifies() {
        let signer = test_signer();
        let now = SystemTime::now();
        let records = vec![signer.txt_record("a"), signer.txt_record("b")];

        let answer = signer.sign_set(&records, now).unwrap();
        let rrsig = Rrsig::parse(&answer.rrsig.rdata).unwrap();

        let data = signing_data(&rrsig, &records);
        let public = ring::signature::UnparsedPublicKey::new(
            &ring::signature::ED25519,
            signer.zsk.public_key.clone(),
        );
        public.verify(&data, &rrsig.signature).unwrap();
    }

    #[test]
    fn test_signing_data_sorts_by_rdata() {
        let signer = test_signer();
        let now = SystemTime::now();
        let forward = vec![signer.txt_record("a"), signer.txt_record("b")];
        let reverse = vec![signer.txt_record("b"), signer.txt_record("a")];

        let sig_forward = signer.sign_set(&forward, now).unwrap();
        let rrsig = Rrsig::parse(&sig_forward.rrsig.rdata).unwrap();
        assert_eq!(
            signing_data(&rrsig, &forward),
            signing_data(&rrsig, &reverse)
        );
        // stored order is the caller's order
        assert_eq!(txt_payload(&sig_forward.records[0]).unwrap(), "a");
    }

    #[tokio::test]
    async fn test_header_mismatch_rejected() {
        let signer = test_signer();
        let mut other = signer.txt_record("x");
        other.ttl += 1;
        let result = signer.add(vec![signer.txt_record("a"), other]).await;
        assert!(matches!(result, Err(HighwayError::HeaderMismatch(_))));

        assert!(matches!(
            signer.add(Vec::new()).await,
            Err(HighwayError::HeaderMismatch(_))
        ));
    }

    #[test]
    fn test_nsec_bitmap_contents() {
        let signer = test_signer();
        let record = signer.nsec_record(vec![2, 6, 16, 46, 47, 48]);

        // rdata: next domain (apex) then the bitmap
        let next_len = signer.zone().to_wire().len();
        assert_eq!(&record.rdata[..next_len], &signer.zone().to_wire()[..]);
        assert_eq!(
            decode_type_bitmap(&record.rdata[next_len..]),
            vec![2, 6, 16, 46, 47, 48]
        );
    }
}
