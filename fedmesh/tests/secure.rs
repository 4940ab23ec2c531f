//! Secure-variant end-to-end scenarios.

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{recv_within, settle, start_node};
use fedmesh_core::crypto;
use fedmesh_core::envelope::RoutedPub;
use fedmesh_core::ids::PubId;

/// The elected core mints the session key and hands it down through
/// membership acks; a publisher that learned it that way can originate
/// secure publications end to end.
#[compio::test]
async fn session_key_propagates_and_encrypts_end_to_end() {
    let n1 = start_node("sec-prop", 1, &[2], "secure: true\n");
    let n2 = start_node("sec-prop", 2, &[1], "secure: true\n");

    // Both sides have local subscribers; node 1 wins the election and
    // owns the key, node 2 receives it as a mesh member.
    let _b1 = n1.keep_beaconing("t", true);
    let _b2 = n2.keep_beaconing("t", true);
    let at_n2 = n2.local_subscriber("t").await;

    settle(600).await;

    n1.publish("federated/s/t", b"secret").await;

    // Delivered as plaintext on the bare topic, exactly once.
    let delivered = recv_within(&at_n2, 1000).await.expect("secure delivery");
    assert_eq!(delivered.topic, "t");
    assert_eq!(delivered.payload.as_ref(), b"secret");
    assert!(recv_within(&at_n2, 200).await.is_none());

    // The ciphertext on the wire never equals the plaintext.
    let routed = n2.subscribe("federator/routing/s/#").await;
    n1.publish("federated/s/t", b"secret").await;
    let msg = recv_within(&routed, 1000).await.expect("routed ciphertext");
    let routed_pub: RoutedPub = serde_json::from_slice(&msg.payload).unwrap();
    assert_ne!(routed_pub.payload, b"secret".to_vec());
    assert!(routed_pub.mac.is_some());
}

/// A tampered ciphertext is never delivered locally and does not disturb
/// the worker; later valid publications go through.
#[compio::test]
async fn tampered_publication_is_rejected() {
    let key = vec![0x11u8; 32];
    let extra = format!("sessionKey: \"{}\"\n", STANDARD.encode(&key));

    let n1 = start_node("sec-tamper", 1, &[2], &extra);
    let n2 = start_node("sec-tamper", 2, &[1], &extra);

    let _beacons = n2.keep_beaconing("t", true);
    let at_n2 = n2.local_subscriber("t").await;

    settle(400).await;

    // An attacker flips one ciphertext byte in flight.
    let mut sealed = crypto::seal(&key, b"x").unwrap();
    let flip = sealed.len() - 1;
    sealed[flip] ^= 0x01;
    let tampered = RoutedPub {
        pub_id: PubId::new(99, 0),
        sender_id: 99,
        payload: sealed,
        mac: Some(crypto::generate_mac(&key, b"x").unwrap().to_vec()),
    };
    let (channel, payload) = tampered.encode("t", true).unwrap();
    n2.publish(&channel, &payload).await;

    assert!(recv_within(&at_n2, 300).await.is_none());

    // The worker stays healthy: an untampered copy still arrives.
    n1.publish("federated/s/t", b"x").await;
    let delivered = recv_within(&at_n2, 1000).await.expect("valid delivery");
    assert_eq!(delivered.payload.as_ref(), b"x");
}

/// Without the session key a federator can neither originate nor deliver
/// secure publications, but plain ones are unaffected.
#[compio::test]
async fn secure_needs_a_session_key() {
    let n1 = start_node("sec-nokey", 1, &[2], "secure: true\n");
    let n2 = start_node("sec-nokey", 2, &[1], "secure: true\n");

    // Only node 2 subscribes; node 1 never joins the mesh as a member,
    // so the core's session key never reaches it.
    let _beacons = n2.keep_beaconing("t", true);
    let at_n2 = n2.local_subscriber("t").await;

    settle(400).await;

    n1.publish("federated/s/t", b"secret").await;
    assert!(recv_within(&at_n2, 300).await.is_none());

    n1.publish("federated/t", b"plain").await;
    let delivered = recv_within(&at_n2, 1000).await.expect("plain delivery");
    assert_eq!(delivered.payload.as_ref(), b"plain");
}
