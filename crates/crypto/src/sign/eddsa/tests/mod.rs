use super::*;

#[test]
fn sign_and_verify() {
    let keypair = Ed25519KeyPair::generate();
    let message = b"AUTH|deadbeef|chal_1234|1700000000000";

    let signature = keypair.sign(message);
    assert!(keypair.public_key().verify(message, &signature).is_ok());
}

#[test]
fn seed_round_trip_is_deterministic() {
    let original = Ed25519KeyPair::generate();
    let restored = Ed25519KeyPair::from_seed(&original.seed()).unwrap();

    let message = b"persistent identity";
    assert_eq!(
        original.sign(message).to_bytes(),
        restored.sign(message).to_bytes()
    );
    assert_eq!(
        original.public_key().to_bytes(),
        restored.public_key().to_bytes()
    );
}

#[test]
fn wrong_key_fails() {
    let signer = Ed25519KeyPair::generate();
    let other = Ed25519KeyPair::generate();
    let message = b"message";

    let signature = signer.sign(message);
    assert!(other.public_key().verify(message, &signature).is_err());
}

#[test]
fn tampered_message_fails() {
    let keypair = Ed25519KeyPair::generate();
    let signature = keypair.sign(b"original");
    assert!(keypair.public_key().verify(b"original", &signature).is_ok());
    assert!(keypair.public_key().verify(b"tampered", &signature).is_err());
}

#[test]
fn wire_encodings_round_trip() {
    let keypair = Ed25519KeyPair::generate();

    let pk = keypair.public_key();
    let parsed = Ed25519PublicKey::from_hex(&pk.to_hex()).unwrap();
    assert_eq!(parsed, pk);

    let sig = keypair.sign(b"payload");
    let parsed = Ed25519Signature::from_base64(&sig.to_base64()).unwrap();
    assert_eq!(parsed, sig);
}

#[test]
fn malformed_material_is_rejected() {
    assert!(Ed25519PublicKey::from_bytes(&[0u8; 5]).is_err());
    assert!(Ed25519PublicKey::from_hex("zz").is_err());
    assert!(Ed25519Signature::from_bytes(&[0u8; 63]).is_err());
    assert!(Ed25519Signature::from_base64("!!!not base64!!!").is_err());
}

#[test]
fn byte_flip_in_signature_fails() {
    let keypair = Ed25519KeyPair::generate();
    let message = b"COMPLETE|prop_abc|https://proof";
    let mut raw = keypair.sign(message).to_bytes();
    raw[0] ^= 0x01;
    let mangled = Ed25519Signature::from_bytes(&raw).unwrap();
    assert!(keypair.public_key().verify(message, &mangled).is_err());
}
