//! Общая обвязка интеграционных тестов: in-memory хранилище и заглушка шлюза.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ticket_issuance::cache::CacheService;
use ticket_issuance::config::Config;
use ticket_issuance::models::{Event, EventStatus, TicketType, User, UserRole};
use ticket_issuance::services::notifier::LogNotifier;
use ticket_issuance::services::payment::{
    parse_stk_callback, CallbackEvent, GatewayError, GatewayOutcome, InitiateRequest, Initiation,
    PaymentGateway,
};
use ticket_issuance::services::reservation::{GuestContactInput, ReservationRequest};
use ticket_issuance::store::{MemoryTicketStore, TicketStore};
use ticket_issuance::AppState;

pub const ORGANIZER_ID: i64 = 1;
pub const ADMIN_ID: i64 = 2;
pub const ATTENDEE_ID: i64 = 3;
pub const UNVERIFIED_ID: i64 = 4;
pub const OTHER_ORGANIZER_ID: i64 = 5;

pub const JAZZ_EVENT: i64 = 1;
pub const REGULAR: i64 = 1;
pub const VIP: i64 = 2;
pub const SIDE_EVENT: i64 = 2;
pub const LAST_SEAT: i64 = 3;

pub const TEST_PASSWORD: &str = "correct-horse";

/// Шлюз, чьи исходы задаются тестом.
#[derive(Default)]
pub struct StubGateway {
    outcomes: Mutex<HashMap<String, GatewayOutcome>>,
    initiations: AtomicUsize,
    polls: AtomicUsize,
    unavailable: AtomicBool,
}

impl StubGateway {
    pub fn correlation_for(reference: &str) -> String {
        format!("ws_CO_{}", reference)
    }

    pub fn set_outcome(&self, correlation_id: &str, outcome: GatewayOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(correlation_id.to_string(), outcome);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn initiations(&self) -> usize {
        self.initiations.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn initiate(&self, request: InitiateRequest) -> Result<Initiation, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("stub gateway is down".to_string()));
        }
        self.initiations.fetch_add(1, Ordering::SeqCst);
        Ok(Initiation {
            correlation_id: Self::correlation_for(&request.reference),
            customer_message: Some("Success. Request accepted for processing".to_string()),
        })
    }

    async fn poll_status(&self, correlation_id: &str) -> Result<GatewayOutcome, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("stub gateway is down".to_string()));
        }
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .get(correlation_id)
            .cloned()
            .unwrap_or(GatewayOutcome::Pending))
    }

    fn parse_callback(&self, payload: &Value) -> Result<CallbackEvent, GatewayError> {
        parse_stk_callback(payload)
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryTicketStore>,
    pub gateway: Arc<StubGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::for_tests())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryTicketStore::with_demo_data().unwrap());
        seed(&store);
        let gateway = Arc::new(StubGateway::default());
        let state = AppState::build(
            config,
            store.clone(),
            CacheService::disabled(),
            gateway.clone(),
            Arc::new(LogNotifier),
        )
        .unwrap();
        Self {
            state,
            store,
            gateway,
        }
    }

    pub async fn user(&self, id: i64) -> User {
        self.store.find_user(id).await.unwrap().unwrap()
    }
}

fn user(id: i64, email: &str, role: UserRole, verified: bool) -> User {
    User {
        id,
        email: email.to_string(),
        name: email.split('@').next().unwrap_or(email).to_string(),
        password_hash: bcrypt::hash(TEST_PASSWORD, 4).unwrap(),
        role,
        is_active: true,
        is_verified: verified,
    }
}

fn seed(store: &MemoryTicketStore) {
    let now = Utc::now();
    store
        .insert_user(user(ADMIN_ID, "admin@eventhub.local", UserRole::Admin, true))
        .unwrap();
    store
        .insert_user(user(ATTENDEE_ID, "wanjiru@example.com", UserRole::Attendee, true))
        .unwrap();
    store
        .insert_user(user(UNVERIFIED_ID, "otieno@example.com", UserRole::Attendee, false))
        .unwrap();
    store
        .insert_user(user(OTHER_ORGANIZER_ID, "promoter@example.com", UserRole::Organizer, true))
        .unwrap();
    store
        .insert_event(Event {
            id: SIDE_EVENT,
            organizer_id: OTHER_ORGANIZER_ID,
            title: "Mombasa Comedy Hour".to_string(),
            venue: None,
            status: EventStatus::Approved,
            is_published: true,
            start_date: now + Duration::days(3),
            end_date: now + Duration::days(3) + Duration::hours(2),
        })
        .unwrap();
    store
        .insert_ticket_type(TicketType {
            id: LAST_SEAT,
            event_id: SIDE_EVENT,
            name: "Front Row".to_string(),
            price_cents: 250_000,
            capacity: 1,
            sold: 0,
            sales_start: None,
            sales_end: None,
        })
        .unwrap();
}

pub fn guest(name: &str, email: &str) -> Option<GuestContactInput> {
    Some(GuestContactInput {
        name: name.to_string(),
        email: email.to_string(),
    })
}

pub fn request(
    event_id: i64,
    ticket_type_id: i64,
    quantity: i32,
    guest: Option<GuestContactInput>,
) -> ReservationRequest {
    ReservationRequest {
        event_id,
        ticket_type_id,
        quantity,
        guest,
    }
}

/// Webhook Daraja об успешной оплате.
pub fn success_callback(correlation_id: &str, amount: i64, receipt: &str) -> Value {
    json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": correlation_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "Amount", "Value": amount},
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "TransactionDate", "Value": 20191219102115u64},
                {"Name": "PhoneNumber", "Value": 254700000000u64}
            ]}
        }}
    })
}

pub fn success_callback_without_amount(correlation_id: &str, receipt: &str) -> Value {
    json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": correlation_id,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "CallbackMetadata": {"Item": [
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "PhoneNumber", "Value": 254700000000u64}
            ]}
        }}
    })
}

pub fn failure_callback(correlation_id: &str) -> Value {
    json!({
        "Body": {"stkCallback": {
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": correlation_id,
            "ResultCode": 1032,
            "ResultDesc": "Request cancelled by user"
        }}
    })
}
