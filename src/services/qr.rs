//! QR-изображение scan token для показа билета на входе.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{TicketingError, TicketingResult};
use crate::services::cancellation::TicketRequester;
use crate::store::TicketStore;

// Сторона изображения в пикселях, не меньше
const MIN_SIDE_PX: u32 = 240;

#[derive(Debug, Clone, Serialize)]
pub struct TicketQr {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub scan_token: String,
    /// PNG в base64, без префикса `data:`.
    pub qr_png_base64: String,
}

/// PNG с QR-кодом произвольной строки.
pub fn render_png(payload: &str) -> TicketingResult<Vec<u8>> {
    let code = QrCode::new(payload.as_bytes()).map_err(|e| TicketingError::QrRendering(e.to_string()))?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_SIDE_PX, MIN_SIDE_PX)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| TicketingError::QrRendering(e.to_string()))?;
    Ok(png)
}

pub struct TicketQrService {
    store: Arc<dyn TicketStore>,
}

impl TicketQrService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn ticket_qr(&self, ticket_id: Uuid, requester: TicketRequester<'_>) -> TicketingResult<TicketQr> {
        let ticket = self
            .store
            .find_ticket(ticket_id)
            .await?
            .ok_or(TicketingError::TicketNotFound(ticket_id))?;
        if !requester.may_access(&ticket.owner) {
            return Err(TicketingError::PermissionDenied(
                "ticket belongs to another buyer".to_string(),
            ));
        }
        // У предварительных и неоплаченных билетов токена нет
        let scan_token = ticket.scan_token.ok_or(TicketingError::PaymentNotCompleted)?;

        let png = render_png(&scan_token)?;
        debug!(ticket_id = %ticket.id, bytes = png.len(), "Rendered ticket QR code");
        Ok(TicketQr {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number,
            scan_token,
            qr_png_base64: STANDARD.encode(png),
        })
    }
}
