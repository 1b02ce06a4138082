//! signing.rs
//!
//! Подписанные токены QR-кодов билетов.
//!
//! Формат: `nonce:tag:ticket_id`, где
//! - `nonce` - 12 случайных байт, base64 URL-safe без паддинга;
//! - `tag` - первые 16 hex-символов HMAC-SHA256(key, "{ticket_id}:{nonce}");
//! - `ticket_id` - UUID билета.
//!
//! Ticket id входит в MAC, поэтому тег одного билета бесполезен для другого.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use uuid::Uuid;

use crate::config::Secret;
use crate::error::{TicketingError, TicketingResult};

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_BYTES: usize = 12;
pub const TAG_HEX_LEN: usize = 16;
const TICKET_NUMBER_TAG_CHARS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanToken {
    pub nonce: String,
    pub tag: String,
    pub ticket_id: Uuid,
}

impl ScanToken {
    /// Разбирает токен. Любое отклонение от формата - `SignatureInvalid`,
    /// чтобы не подсказывать, какая часть подделки не прошла.
    pub fn parse(raw: &str) -> TicketingResult<Self> {
        let mut parts = raw.trim().splitn(3, ':');
        let (Some(nonce), Some(tag), Some(ticket_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TicketingError::SignatureInvalid);
        };

        let nonce_ok = URL_SAFE_NO_PAD
            .decode(nonce)
            .map(|bytes| bytes.len() == NONCE_BYTES)
            .unwrap_or(false);
        let tag_ok = tag.len() == TAG_HEX_LEN
            && tag.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        let ticket_id = Uuid::parse_str(ticket_id).map_err(|_| TicketingError::SignatureInvalid)?;

        if !nonce_ok || !tag_ok {
            return Err(TicketingError::SignatureInvalid);
        }
        Ok(ScanToken {
            nonce: nonce.to_string(),
            tag: tag.to_string(),
            ticket_id,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.nonce, self.tag, self.ticket_id)
    }

    /// Человекочитаемый номер билета, производный от подписанного тега.
    pub fn ticket_number(&self) -> String {
        format!("TKT-{}", self.tag[..TICKET_NUMBER_TAG_CHARS].to_uppercase())
    }
}

impl fmt::Display for ScanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Подписывает и проверяет токены ключом процесса. Ключ задаётся один раз при старте.
#[derive(Clone)]
pub struct TicketSigner {
    mac: HmacSha256,
}

impl fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSigner").finish_non_exhaustive()
    }
}

impl TicketSigner {
    pub fn new(key: &Secret) -> TicketingResult<Self> {
        let mac = HmacSha256::new_from_slice(key.expose().as_bytes()).map_err(|_| {
            TicketingError::InternalInconsistency("scan token signing key rejected".to_string())
        })?;
        Ok(Self { mac })
    }

    fn tag(&self, ticket_id: &Uuid, nonce: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(ticket_id.to_string().as_bytes());
        mac.update(b":");
        mac.update(nonce.as_bytes());
        let mut digest = format!("{:x}", mac.finalize().into_bytes());
        digest.truncate(TAG_HEX_LEN);
        digest
    }

    pub fn sign(&self, ticket_id: Uuid) -> ScanToken {
        let mut raw = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let nonce = URL_SAFE_NO_PAD.encode(raw);
        let tag = self.tag(&ticket_id, &nonce);
        ScanToken { nonce, tag, ticket_id }
    }

    /// Проверяет подпись токена; сравнение тегов за постоянное время.
    pub fn verify(&self, raw: &str) -> TicketingResult<ScanToken> {
        let token = ScanToken::parse(raw)?;
        let expected = self.tag(&token.ticket_id, &token.nonce);
        if !constant_time_eq(expected.as_bytes(), token.tag.as_bytes()) {
            return Err(TicketingError::SignatureInvalid);
        }
        Ok(token)
    }
}
