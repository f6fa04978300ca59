//! Property-based tests for the secure framing
//!
//! Uses proptest to check round-trip, nonce freshness and tamper detection
//! across arbitrary plaintexts.

use proptest::prelude::*;
use rand_core::OsRng;
use secure_echo_channel::{
    KeyPair, SecureChannelError, SecureReader, SecureWriter, HEADER_LEN, MAX_MESSAGE_LEN,
    MESSAGE_OVERHEAD,
};
use std::future::Future;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

struct Peers {
    reader: KeyPair,
    writer: KeyPair,
}

fn make_peers() -> Peers {
    Peers {
        reader: KeyPair::generate(&mut OsRng).unwrap(),
        writer: KeyPair::generate(&mut OsRng).unwrap(),
    }
}

async fn seal(peers: &Peers, plaintext: &[u8]) -> Vec<u8> {
    let mut writer = SecureWriter::new(Vec::new(), &peers.writer.private_key, &peers.reader.public_key);
    writer.write(plaintext).await.unwrap();
    writer.into_inner()
}

async fn open(peers: &Peers, wire: &[u8]) -> secure_echo_channel::Result<Vec<u8>> {
    let mut reader = SecureReader::new(wire, &peers.reader.private_key, &peers.writer.public_key);
    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let n = reader.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever is written comes back unchanged
    #[test]
    fn roundtrip(plaintext in prop::collection::vec(any::<u8>(), 1..4096)) {
        let peers = make_peers();
        let (wire, opened) = block_on(async {
            let wire = seal(&peers, &plaintext).await;
            let opened = open(&peers, &wire).await;
            (wire, opened)
        });

        prop_assert_eq!(wire.len(), plaintext.len() + MESSAGE_OVERHEAD);
        prop_assert_eq!(opened.unwrap(), plaintext);
    }

    /// Sealing the same plaintext twice never yields the same frame
    #[test]
    fn frames_are_unique(plaintext in prop::collection::vec(any::<u8>(), 1..512)) {
        let peers = make_peers();
        let (first, second) = block_on(async {
            (seal(&peers, &plaintext).await, seal(&peers, &plaintext).await)
        });

        prop_assert_ne!(first, second);
    }

    /// Any single bit flip after the header fails authentication
    #[test]
    fn tamper_is_detected(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let peers = make_peers();
        let result = block_on(async {
            let mut wire = seal(&peers, &plaintext).await;
            let index = HEADER_LEN + position.index(wire.len() - HEADER_LEN);
            wire[index] ^= 1 << bit;
            open(&peers, &wire).await
        });

        prop_assert!(matches!(result, Err(SecureChannelError::Decryption)));
    }

    /// Any proper prefix of a frame is reported as truncation
    #[test]
    fn prefix_is_truncation(
        plaintext in prop::collection::vec(any::<u8>(), 1..512),
        cut in any::<prop::sample::Index>(),
    ) {
        let peers = make_peers();
        let result = block_on(async {
            let wire = seal(&peers, &plaintext).await;
            let cut = 1 + cut.index(wire.len() - 1);
            open(&peers, &wire[..cut]).await
        });

        prop_assert!(matches!(result, Err(SecureChannelError::UnexpectedEndOfStream)));
    }
}
