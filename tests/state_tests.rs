use std::sync::Arc;
use std::time::{Duration, Instant};

use monero_highway::dns::enums::RecordType;
use monero_highway::dnssec::{KeyPair, Signer, SignerOptions};
use monero_highway::state::StateFile;

async fn start_signer() -> Arc<Signer> {
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
    signer
}

async fn wait_for_txt(signer: &Signer, count: usize) {
    for _ in 0..500 {
        if let Some(answer) = signer.get(RecordType::TXT.code()) {
            if answer.records.len() == count {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("TXT set never reached {count} records");
}

#[tokio::test]
async fn test_store_then_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    // publish a set and persist it
    {
        let signer = start_signer().await;
        signer
            .add(vec![
                signer.txt_record("100:aa"),
                signer.txt_record("200:bb"),
            ])
            .await
            .unwrap();
        wait_for_txt(&signer, 2).await;

        let state = StateFile::new(&path, signer);
        state.store(Instant::now());
    }

    let raw: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw, vec!["100:aa", "200:bb"]);

    // a fresh signer restores the set from disk
    {
        let signer = start_signer().await;
        let state = StateFile::new(&path, signer.clone());
        assert_eq!(state.load().await.unwrap(), 2);
        wait_for_txt(&signer, 2).await;
    }
}

#[tokio::test]
async fn test_out_of_order_writes_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let signer = start_signer().await;
    signer.add(vec![signer.txt_record("first")]).await.unwrap();
    wait_for_txt(&signer, 1).await;

    let state = StateFile::new(&path, signer.clone());

    let early = Instant::now();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let late = Instant::now();

    state.store(late);
    let written = std::fs::read(&path).unwrap();

    // replace the record set, then complete a stale write: the file must
    // keep the newer content
    signer.add(vec![signer.txt_record("second")]).await.unwrap();
    wait_for_txt(&signer, 1).await;
    state.store(early);

    assert_eq!(std::fs::read(&path).unwrap(), written);
}

#[tokio::test]
async fn test_missing_state_file_is_not_fatal() {
    let signer = start_signer().await;
    let state = StateFile::new("/nonexistent/state.json", signer);
    assert_eq!(state.load().await.unwrap(), 0);
}
