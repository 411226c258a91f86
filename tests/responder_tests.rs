use std::sync::Arc;
use std::time::Duration;

use monero_highway::dns::edns::EdnsOpt;
use monero_highway::dns::enums::{RecordClass, RecordType, ResponseCode};
use monero_highway::dns::name::Name;
use monero_highway::dns::question::Question;
use monero_highway::dns::Packet;
use monero_highway::dnssec::{KeyPair, Signer, SignerOptions};
use monero_highway::responder::QueryResponder;

async fn start_zone() -> Arc<Signer> {
    let (key, _) = KeyPair::generate("ed25519").unwrap();
    let signer = Arc::new(
        Signer::new(
            key,
            SignerOptions {
                zone: "z.example.".into(),
                mailbox: "admin.z.example.".into(),
                nameservers: vec!["ns.z.example.".into()],
                ..Default::default()
            },
        )
        .unwrap(),
    );

    let process = signer.clone();
    tokio::spawn(async move {
        process
            .process(Duration::from_millis(50))
            .await
            .expect("signing loop failed");
    });

    signer.add_authority_records().await.unwrap();
    signer
        .add(vec![
            signer.txt_record("a"),
            signer.txt_record("b"),
            signer.txt_record("c"),
        ])
        .await
        .unwrap();

    for rtype in [RecordType::NS, RecordType::TXT, RecordType::SOA, RecordType::NSEC] {
        while signer.get(rtype.code()).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    signer
}

fn build_query(name: &str, qtype: RecordType, do_bit: bool) -> Vec<u8> {
    let mut query = Packet::default();
    query.header.id = 4242;
    query.header.rd = true;
    query.questions.push(Question::new(
        &Name::canonical(name),
        qtype,
        RecordClass::IN,
    ));
    if do_bit {
        let mut opt = EdnsOpt::with_payload_size(4096);
        opt.set_do_flag(true);
        query.edns = Some(opt);
    }
    query.serialize().unwrap()
}

fn parse_reply(wire: &[u8]) -> Packet {
    Packet::parse(wire).expect("parseable reply")
}

#[tokio::test]
async fn test_apex_txt_answer_with_signature() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::TXT, true), false)
            .unwrap(),
    );

    assert!(reply.header.qr);
    assert!(reply.header.aa);
    assert_eq!(reply.header.rcode, 0);
    assert_eq!(reply.header.id, 4242);

    let txt: Vec<&_> = reply
        .answers
        .iter()
        .filter(|r| r.rtype == RecordType::TXT)
        .collect();
    assert_eq!(txt.len(), 3);

    let sigs: Vec<&_> = reply
        .answers
        .iter()
        .filter(|r| r.rtype == RecordType::RRSIG)
        .collect();
    assert_eq!(sigs.len(), 1);

    // DO was set, so the reply carries an OPT with DO mirrored
    assert!(reply.edns.unwrap().do_flag());
}

#[tokio::test]
async fn test_apex_txt_answer_without_do_omits_signature() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::TXT, false), false)
            .unwrap(),
    );

    assert_eq!(reply.answers.len(), 3);
    assert!(reply
        .answers
        .iter()
        .all(|r| r.rtype == RecordType::TXT));
    assert!(reply.edns.is_none());
}

#[tokio::test]
async fn test_nodata_carries_denial_proofs() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::A, true), false)
            .unwrap(),
    );

    assert!(reply.header.aa);
    assert_eq!(reply.header.rcode, ResponseCode::NoError.header_bits());
    assert!(reply.answers.is_empty());

    let types: Vec<RecordType> = reply.authorities.iter().map(|r| r.rtype).collect();
    assert_eq!(
        types,
        vec![
            RecordType::SOA,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::RRSIG
        ]
    );
}

#[tokio::test]
async fn test_sub_apex_is_nxdomain() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let reply = parse_reply(
        &responder
            .respond(&build_query("sub.z.example.", RecordType::A, true), false)
            .unwrap(),
    );

    assert!(reply.header.aa);
    assert_eq!(reply.header.rcode, ResponseCode::NameError.header_bits());
    assert!(reply.answers.is_empty());

    let types: Vec<RecordType> = reply.authorities.iter().map(|r| r.rtype).collect();
    assert_eq!(
        types,
        vec![
            RecordType::SOA,
            RecordType::RRSIG,
            RecordType::NSEC,
            RecordType::RRSIG
        ]
    );
}

#[tokio::test]
async fn test_off_zone_is_refused() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    for name in ["other.org.", "example.", "x.example."] {
        let reply = parse_reply(
            &responder
                .respond(&build_query(name, RecordType::A, false), false)
                .unwrap(),
        );
        assert_eq!(
            reply.header.rcode,
            ResponseCode::Refused.header_bits(),
            "{name} should be refused"
        );
        assert!(reply.answers.is_empty());
    }
}

#[tokio::test]
async fn test_axfr_over_tcp() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, true);

    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::AXFR, true), false)
            .unwrap(),
    );

    assert!(reply.header.aa);
    let non_sig: Vec<&_> = reply
        .answers
        .iter()
        .filter(|r| r.rtype != RecordType::RRSIG)
        .collect();

    assert_eq!(non_sig.first().unwrap().rtype, RecordType::SOA);
    assert_eq!(non_sig.last().unwrap().rtype, RecordType::SOA);
    assert_eq!(
        non_sig.first().unwrap().canonical_wire(),
        non_sig.last().unwrap().canonical_wire()
    );

    for rtype in [
        RecordType::NS,
        RecordType::NSEC,
        RecordType::TXT,
        RecordType::CDS,
        RecordType::CDNSKEY,
    ] {
        assert!(
            non_sig.iter().any(|r| r.rtype == rtype),
            "transfer missing type {}",
            rtype.code()
        );
    }
    assert_eq!(
        non_sig
            .iter()
            .filter(|r| r.rtype == RecordType::DNSKEY)
            .count(),
        2
    );

    // every RRset in the stream carries its signature
    assert!(reply
        .answers
        .iter()
        .filter(|r| r.rtype == RecordType::RRSIG)
        .count() >= 7);

    // DO is set defensively on the transfer reply
    assert!(reply.edns.unwrap().do_flag());
}

#[tokio::test]
async fn test_axfr_denied_over_udp_and_when_disabled() {
    let signer = start_zone().await;

    // over UDP the transfer degrades to NODATA
    let responder = QueryResponder::new(signer.clone(), true);
    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::AXFR, false), true)
            .unwrap(),
    );
    assert!(reply.answers.is_empty());
    assert_eq!(reply.header.rcode, ResponseCode::NoError.header_bits());

    // disabled AXFR over TCP degrades the same way
    let responder = QueryResponder::new(signer, false);
    let reply = parse_reply(
        &responder
            .respond(&build_query("z.example.", RecordType::AXFR, false), false)
            .unwrap(),
    );
    assert!(reply.answers.is_empty());
    assert_eq!(reply.header.rcode, ResponseCode::NoError.header_bits());
}

#[tokio::test]
async fn test_bad_edns_version() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let mut query = Packet::default();
    query.header.id = 9;
    query.questions.push(Question::new(
        &Name::canonical("z.example."),
        RecordType::TXT,
        RecordClass::IN,
    ));
    let mut opt = EdnsOpt::with_payload_size(4096);
    opt.version = 1;
    query.edns = Some(opt);

    let reply = parse_reply(&responder.respond(&query.serialize().unwrap(), false).unwrap());

    assert_eq!(reply.header.rcode, ResponseCode::BadVers.header_bits());
    let opt = reply.edns.unwrap();
    assert_eq!(opt.version, 0);
    assert_eq!(opt.extended_rcode, ResponseCode::BadVers.extended_bits());
    assert!(reply.answers.is_empty());
}

#[tokio::test]
async fn test_udp_truncation() {
    let signer = start_zone().await;

    // a TXT set comfortably larger than 512 bytes
    let records: Vec<_> = (0..24)
        .map(|i| signer.txt_record(&format!("{i:04}:{}", "f".repeat(64))))
        .collect();
    signer.add(records).await.unwrap();
    loop {
        if let Some(answer) = signer.get(RecordType::TXT.code()) {
            if answer.records.len() == 24 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let responder = QueryResponder::new(signer, false);

    let mut query = Packet::default();
    query.header.id = 77;
    query.questions.push(Question::new(
        &Name::canonical("z.example."),
        RecordType::TXT,
        RecordClass::IN,
    ));
    query.edns = Some(EdnsOpt::with_payload_size(512));

    let wire = responder.respond(&query.serialize().unwrap(), true).unwrap();
    assert!(wire.len() <= 512, "reply is {} bytes", wire.len());

    let reply = parse_reply(&wire);
    assert!(reply.header.tc);

    // the same reply over TCP is complete
    let tcp_wire = responder.respond(&query.serialize().unwrap(), false).unwrap();
    let tcp_reply = parse_reply(&tcp_wire);
    assert!(!tcp_reply.header.tc);
    assert_eq!(tcp_reply.answers.len(), 24);
}

#[tokio::test]
async fn test_silent_drops() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    // malformed wire
    assert!(responder.respond(&[0xFF, 0x00, 0x01], false).is_none());

    // NOTIFY opcode
    let mut query = Packet::default();
    query.header.opcode = 4;
    query.questions.push(Question::new(
        &Name::canonical("z.example."),
        RecordType::SOA,
        RecordClass::IN,
    ));
    assert!(responder
        .respond(&query.serialize().unwrap(), false)
        .is_none());

    // empty question section
    let empty = Packet::default();
    assert!(responder.respond(&empty.serialize().unwrap(), false).is_none());
}

#[tokio::test]
async fn test_non_in_class_refused() {
    let signer = start_zone().await;
    let responder = QueryResponder::new(signer, false);

    let mut query = Packet::default();
    query.header.id = 5;
    query.questions.push(Question::new(
        &Name::canonical("z.example."),
        RecordType::TXT,
        RecordClass::CH,
    ));

    let reply = parse_reply(&responder.respond(&query.serialize().unwrap(), false).unwrap());
    assert_eq!(reply.header.rcode, ResponseCode::Refused.header_bits());
}
