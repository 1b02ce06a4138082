use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use proptest::prelude::*;
use uuid::Uuid;

use ticket_issuance::config::Secret;
use ticket_issuance::error::TicketingError;
use ticket_issuance::services::signing::{ScanToken, TicketSigner, NONCE_BYTES};

fn signer(key: &str) -> TicketSigner {
    TicketSigner::new(&Secret::new(key)).unwrap()
}

proptest! {
    #[test]
    fn forged_tags_never_verify(
        id in any::<u128>(),
        nonce in prop::array::uniform12(any::<u8>()),
        tag in "[0-9a-f]{16}",
    ) {
        let signer = signer("proptest-signing-key-0123456789abcdef");
        let ticket_id = Uuid::from_u128(id);
        let nonce = URL_SAFE_NO_PAD.encode(nonce);

        let forged = format!("{}:{}:{}", nonce, tag, ticket_id);
        prop_assert!(matches!(signer.verify(&forged), Err(TicketingError::SignatureInvalid)));
    }

    #[test]
    fn tag_is_bound_to_ticket_id(a in any::<u128>(), b in any::<u128>()) {
        prop_assume!(a != b);
        let signer = signer("proptest-signing-key-0123456789abcdef");
        let token = signer.sign(Uuid::from_u128(a));
        let moved = ScanToken { ticket_id: Uuid::from_u128(b), ..token };
        prop_assert!(signer.verify(&moved.encode()).is_err());
    }

    #[test]
    fn single_character_change_is_detected(id in any::<u128>(), position in 0usize..16) {
        let signer = signer("proptest-signing-key-0123456789abcdef");
        let token = signer.sign(Uuid::from_u128(id));

        let mut tag: Vec<u8> = token.tag.clone().into_bytes();
        tag[position] = if tag[position] == b'0' { b'1' } else { b'0' };
        let tampered = ScanToken {
            tag: String::from_utf8(tag).unwrap(),
            ..token.clone()
        };
        prop_assert!(signer.verify(&tampered.encode()).is_err());
        prop_assert!(signer.verify(&token.encode()).is_ok());
    }

    #[test]
    fn arbitrary_input_is_rejected_without_panicking(raw in ".{0,120}") {
        let signer = signer("proptest-signing-key-0123456789abcdef");
        prop_assert!(signer.verify(&raw).is_err());
    }
}

#[test]
fn token_from_another_key_is_rejected() {
    let ours = signer("proptest-signing-key-0123456789abcdef");
    let theirs = signer("someone-elses-key-fedcba9876543210!!");
    let token = theirs.sign(Uuid::new_v4());
    assert!(theirs.verify(&token.encode()).is_ok());
    assert!(matches!(
        ours.verify(&token.encode()),
        Err(TicketingError::SignatureInvalid)
    ));
}

#[test]
fn token_shape_matches_documented_format() {
    let token = signer("proptest-signing-key-0123456789abcdef").sign(Uuid::new_v4());
    assert_eq!(URL_SAFE_NO_PAD.decode(&token.nonce).unwrap().len(), NONCE_BYTES);
    assert_eq!(token.tag.len(), 16);
    assert_eq!(token.ticket_number(), format!("TKT-{}", token.tag[..12].to_uppercase()));
    assert_eq!(ScanToken::parse(&token.to_string()).unwrap(), token);
}
