use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Категория билетов события со счётчиком продаж.
///
/// Инвариант: `0 <= sold <= capacity`. Счётчик меняется только при выпуске
/// финальных билетов и при отмене, см. [`crate::services::inventory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    pub price_cents: i64,
    pub capacity: i32,
    pub sold: i32,
    pub sales_start: Option<DateTime<Utc>>,
    pub sales_end: Option<DateTime<Utc>>,
}

impl TicketType {
    pub fn available(&self) -> i32 {
        self.capacity - self.sold
    }

    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        let started = self.sales_start.map_or(true, |start| now >= start);
        let not_ended = self.sales_end.map_or(true, |end| now < end);
        started && not_ended
    }

    /// Стоимость `quantity` билетов; `None` при переполнении.
    pub fn price_for(&self, quantity: i32) -> Option<i64> {
        self.price_cents.checked_mul(i64::from(quantity))
    }
}
