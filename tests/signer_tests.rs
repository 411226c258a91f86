use std::sync::Arc;
use std::time::Duration;

use monero_highway::dns::enums::RecordType;
use monero_highway::dnssec::rdata::{decode_type_bitmap, txt_payload, Rrsig};
use monero_highway::dnssec::store::SignedAnswer;
use monero_highway::dnssec::{KeyPair, Signer, SignerOptions};

fn test_options() -> SignerOptions {
    SignerOptions {
        zone: "z.example.".into(),
        mailbox: "admin.z.example.".into(),
        nameservers: vec!["ns.z.example.".into()],
        ..Default::default()
    }
}

/// Spawn a signer with its signing loop running.
async fn start_signer() -> Arc<Signer> {
    let (key, _) = KeyPair::generate("ed25519").unwrap();
    let signer = Arc::new(Signer::new(key, test_options()).unwrap());

    let process = signer.clone();
    tokio::spawn(async move {
        process
            .process(Duration::from_millis(50))
            .await
            .expect("signing loop failed");
    });

    signer
}

async fn wait_for(signer: &Signer, rtype: RecordType) -> Arc<SignedAnswer> {
    for _ in 0..500 {
        if let Some(answer) = signer.get(rtype.code()) {
            return answer;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("record type {} never signed", rtype.code());
}

/// Rebuild the RFC 4034 signing input for an answer and verify its RRSIG
/// under the given public key.
fn verify_answer(answer: &SignedAnswer, public_key: &[u8]) {
    let rrsig = Rrsig::parse(&answer.rrsig.rdata).expect("parseable RRSIG");

    let mut data = rrsig.rdata_prefix();
    let mut sorted = answer.records.clone();
    sorted.sort_by(|a, b| a.rdata.cmp(&b.rdata));
    for record in &sorted {
        data.extend_from_slice(&record.name.to_wire());
        data.extend_from_slice(&record.rtype.code().to_be_bytes());
        data.extend_from_slice(&record.rclass.code().to_be_bytes());
        data.extend_from_slice(&rrsig.orig_ttl.to_be_bytes());
        data.extend_from_slice(&(record.rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&record.rdata);
    }

    let key = ring::signature::UnparsedPublicKey::new(
        &ring::signature::ED25519,
        public_key.to_vec(),
    );
    key.verify(&data, &rrsig.signature).expect("valid RRSIG");
}

#[tokio::test]
async fn test_authority_bring_up() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();

    let dnskey = wait_for(&signer, RecordType::DNSKEY).await;
    assert_eq!(dnskey.records.len(), 2);

    // flags live in the first two rdata bytes; ZSK=256, KSK=257
    let mut flags: Vec<u16> = dnskey
        .records
        .iter()
        .map(|r| u16::from_be_bytes([r.rdata[0], r.rdata[1]]))
        .collect();
    flags.sort_unstable();
    assert_eq!(flags, vec![256, 257]);

    // both carry algorithm 15 (Ed25519)
    for record in &dnskey.records {
        assert_eq!(record.rdata[3], 15);
    }

    let ns = wait_for(&signer, RecordType::NS).await;
    assert_eq!(ns.records.len(), 1);

    let nsec = wait_for(&signer, RecordType::NSEC).await;
    let next_len = signer.zone().to_wire().len();
    assert_eq!(&nsec.records[0].rdata[..next_len], &signer.zone().to_wire()[..]);

    let types = decode_type_bitmap(&nsec.records[0].rdata[next_len..]);
    for expected in [
        RecordType::SOA,
        RecordType::RRSIG,
        RecordType::NSEC,
        RecordType::DNSKEY,
        RecordType::NS,
        RecordType::CDS,
        RecordType::CDNSKEY,
    ] {
        assert!(
            types.contains(&expected.code()),
            "NSEC bitmap missing type {}",
            expected.code()
        );
    }

    wait_for(&signer, RecordType::CDS).await;
    wait_for(&signer, RecordType::CDNSKEY).await;
    wait_for(&signer, RecordType::SOA).await;
}

#[tokio::test]
async fn test_txt_set_preserves_order_and_signs() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();
    wait_for(&signer, RecordType::NS).await;

    let records = vec![
        signer.txt_record("a"),
        signer.txt_record("b"),
        signer.txt_record("c"),
    ];
    signer.add(records).await.unwrap();

    let txt = wait_for(&signer, RecordType::TXT).await;
    let payloads: Vec<String> = txt.records.iter().filter_map(txt_payload).collect();
    assert_eq!(payloads, vec!["a", "b", "c"]);

    let [zsk, _] = signer.dnskey();
    verify_answer(&txt, &zsk.public_key);

    // the covering signature agrees with the set
    let rrsig = Rrsig::parse(&txt.rrsig.rdata).unwrap();
    assert_eq!(rrsig.type_covered, RecordType::TXT.code());
    assert_eq!(rrsig.orig_ttl, txt.records[0].ttl);
    assert_eq!(rrsig.labels as usize, signer.zone_labels());
    assert_eq!(rrsig.key_tag, zsk.key_tag());
}

#[tokio::test]
async fn test_soa_serial_advances_after_add() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();
    wait_for(&signer, RecordType::NS).await;
    let before = wait_for(&signer, RecordType::SOA).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    signer.add(vec![signer.txt_record("x")]).await.unwrap();
    wait_for(&signer, RecordType::TXT).await;

    let after = wait_for(&signer, RecordType::SOA).await;

    // serial is at rdata offset: after the two names
    let serial = |answer: &SignedAnswer| {
        let rdata = &answer.records[0].rdata;
        let soa_names_len = monero_highway::dns::name::Name::canonical("ns.z.example.")
            .to_wire()
            .len()
            + monero_highway::dns::name::Name::canonical("admin.z.example.")
                .to_wire()
                .len();
        u32::from_be_bytes(rdata[soa_names_len..soa_names_len + 4].try_into().unwrap())
    };
    assert!(serial(&after) >= serial(&before));
}

#[tokio::test]
async fn test_nsec_bitmap_gains_txt() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();
    wait_for(&signer, RecordType::NS).await;

    signer.add(vec![signer.txt_record("x")]).await.unwrap();
    wait_for(&signer, RecordType::TXT).await;

    // NSEC is regenerated after the slot newly occupies; give the loop a beat
    for _ in 0..100 {
        let nsec = wait_for(&signer, RecordType::NSEC).await;
        let next_len = signer.zone().to_wire().len();
        let types = decode_type_bitmap(&nsec.records[0].rdata[next_len..]);
        if types.contains(&RecordType::TXT.code()) {
            // full invariant: occupied ∪ {SOA, RRSIG, NSEC}
            for expected in [RecordType::SOA, RecordType::RRSIG, RecordType::NSEC] {
                assert!(types.contains(&expected.code()));
            }
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("NSEC bitmap never picked up TXT");
}

#[tokio::test]
async fn test_transfer_bounded_by_soa() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();
    wait_for(&signer, RecordType::NS).await;
    wait_for(&signer, RecordType::SOA).await;

    let transfer = signer.transfer();
    assert!(transfer.len() >= 3);

    let first = &transfer.first().unwrap().records[0];
    let last = &transfer.last().unwrap().records[0];
    assert_eq!(first.rtype, RecordType::SOA);
    // identical by wire-form equality
    assert_eq!(first.canonical_wire(), last.canonical_wire());

    // interior answers ordered by type code
    let codes: Vec<u16> = transfer[1..transfer.len() - 1]
        .iter()
        .map(|answer| answer.records[0].rtype.code())
        .collect();
    let mut sorted = codes.clone();
    sorted.sort_unstable();
    assert_eq!(codes, sorted);
}

#[tokio::test]
async fn test_resigning_refreshes_validity() {
    let signer = start_signer().await;
    signer.add_authority_records().await.unwrap();
    let first = wait_for(&signer, RecordType::NS).await;
    let first_sig = Rrsig::parse(&first.rrsig.rdata).unwrap();

    // interval is 50ms; after a second the set must have been re-signed
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let second = wait_for(&signer, RecordType::NS).await;
    let second_sig = Rrsig::parse(&second.rrsig.rdata).unwrap();

    assert!(second_sig.expiration >= first_sig.expiration);
    assert_eq!(second.records, first.records);
}
