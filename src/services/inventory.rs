//! inventory.rs
//!
//! Учёт вместимости категорий билетов.
//!
//! - `reserve_capacity` - оптимистичная проверка при резервировании, счётчик не меняет.
//! - `commit_sale` / `restock` - правила изменения счётчика `sold`. В Postgres те же
//!   правила выражены условным `UPDATE ... WHERE sold + $q <= capacity`.
//! - `InventoryLedger` - публичная витрина доступности с кешем в Redis.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{
    cache::CacheService,
    error::{TicketingError, TicketingResult},
    models::TicketType,
    store::TicketStore,
};

/// Проверяет, что `quantity` единиц помещается в текущий остаток.
pub fn reserve_capacity(ticket_type: &TicketType, quantity: i32) -> TicketingResult<()> {
    if quantity < 1 {
        return Err(TicketingError::Validation("quantity must be at least 1".to_string()));
    }
    let available = ticket_type.available();
    if quantity > available {
        return Err(TicketingError::CapacityExceeded {
            available: available.max(0),
            requested: quantity,
        });
    }
    Ok(())
}

/// Увеличивает `sold` на `quantity`, если после этого `sold <= capacity`.
pub fn commit_sale(ticket_type: &mut TicketType, quantity: i32) -> TicketingResult<()> {
    reserve_capacity(ticket_type, quantity)?;
    ticket_type.sold += quantity;
    Ok(())
}

/// Возвращает `quantity` единиц в продажу (компенсирующая отмена).
pub fn restock(ticket_type: &mut TicketType, quantity: i32) -> TicketingResult<()> {
    if quantity < 1 || ticket_type.sold < quantity {
        return Err(TicketingError::InternalInconsistency(format!(
            "cannot restock {} units of ticket type {} with {} sold",
            quantity, ticket_type.id, ticket_type.sold
        )));
    }
    ticket_type.sold -= quantity;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub ticket_type_id: i64,
    pub name: String,
    pub price_cents: i64,
    pub capacity: i32,
    pub sold: i32,
    pub available: i32,
}

impl From<&TicketType> for Availability {
    fn from(tt: &TicketType) -> Self {
        Self {
            ticket_type_id: tt.id,
            name: tt.name.clone(),
            price_cents: tt.price_cents,
            capacity: tt.capacity,
            sold: tt.sold,
            available: tt.available(),
        }
    }
}

#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn TicketStore>,
    cache: CacheService,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn TicketStore>, cache: CacheService) -> Self {
        Self { store, cache }
    }

    /// Остатки по категориям события. Кеш только для витрины: решения о продаже
    /// всегда принимаются по хранилищу.
    pub async fn availability(&self, event_id: i64) -> TicketingResult<Vec<Availability>> {
        if let Some(cached) = self.cache.get_availability(event_id).await {
            debug!(event_id, "Availability served from cache");
            return Ok(cached);
        }

        self.store
            .find_event(event_id)
            .await?
            .ok_or_else(|| TicketingError::NotFound(format!("event {}", event_id)))?;

        let listing: Vec<Availability> = self
            .store
            .list_ticket_types(event_id)
            .await?
            .iter()
            .map(Availability::from)
            .collect();

        self.cache.save_availability(event_id, &listing).await;
        Ok(listing)
    }

    pub async fn invalidate(&self, event_id: i64) {
        self.cache.invalidate_availability(event_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket_type(capacity: i32, sold: i32) -> TicketType {
        TicketType {
            id: 1,
            event_id: 1,
            name: "Regular".to_string(),
            price_cents: 150_000,
            capacity,
            sold,
            sales_start: None,
            sales_end: None,
        }
    }

    #[test]
    fn reserve_rejects_more_than_available() {
        let tt = ticket_type(5, 4);
        assert!(reserve_capacity(&tt, 1).is_ok());
        match reserve_capacity(&tt, 2) {
            Err(TicketingError::CapacityExceeded { available, requested }) => {
                assert_eq!(available, 1);
                assert_eq!(requested, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn commit_never_exceeds_capacity() {
        let mut tt = ticket_type(2, 0);
        assert!(commit_sale(&mut tt, 2).is_ok());
        assert!(commit_sale(&mut tt, 1).is_err());
        assert_eq!(tt.sold, 2);
    }

    #[test]
    fn restock_cannot_go_below_zero() {
        let mut tt = ticket_type(2, 1);
        assert!(restock(&mut tt, 1).is_ok());
        assert_eq!(tt.sold, 0);
        assert!(restock(&mut tt, 1).is_err());
        assert_eq!(tt.sold, 0);
    }

    #[test]
    fn zero_quantity_is_a_validation_error() {
        let tt = ticket_type(2, 0);
        assert!(matches!(reserve_capacity(&tt, 0), Err(TicketingError::Validation(_))));
    }
}
