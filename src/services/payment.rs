//! payment.rs
//!
//! Клиент платёжного шлюза M-Pesa (Daraja, STK push).
//!
//! Ключевые компоненты:
//! 1.  **PaymentGateway**: граница с провайдером. Инициация, опрос статуса и разбор
//!     входящего callback. Сервисы зависят только от трейта.
//! 2.  **CircuitBreaker**: "автоматический выключатель" поверх всех исходящих вызовов.
//! 3.  **MpesaClient**: реализация для Daraja с кешированием OAuth-токена.
//! 4.  **retry_with_backoff**: повторы при недоступности шлюза. Только для опроса:
//!     повторная инициация снова отправила бы покупателю запрос на оплату.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{CircuitBreakerConfig, MpesaConfig, RetryConfig};
use crate::error::TicketingError;

/// Код Daraja "The transaction is being processed" при опросе статуса.
const STILL_PROCESSING_CODE: &str = "500.001.1001";
// Daraja ограничивает TransactionDesc 13 символами
const MAX_DESCRIPTION_CHARS: usize = 13;
// Обновляем токен заранее, до фактического истечения
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;
const DEFAULT_TOKEN_TTL_SECS: u64 = 3599;
// Daraja ждёт метку времени по Найроби (UTC+3)
const NAIROBI_OFFSET_SECS: i32 = 3 * 3600;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("malformed gateway payload: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Имеет ли смысл повторить вызов позже.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::CircuitOpen)
    }
}

impl From<GatewayError> for TicketingError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Malformed(msg) => TicketingError::Validation(msg),
            other => TicketingError::GatewayUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Телефон в формате `2547XXXXXXXX`, см. [`normalize_phone`].
    pub phone: String,
    /// Сумма в целых единицах валюты.
    pub amount: i64,
    /// Идемпотентная ссылка intent (AccountReference).
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Initiation {
    pub correlation_id: String,
    pub customer_message: Option<String>,
}

/// Явный исход платежа у провайдера.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Success {
        receipt_id: Option<String>,
        /// Сумма из callback; при опросе провайдер её не сообщает.
        amount: Option<i64>,
    },
    Failure { reason: String },
    /// Провайдер ещё не знает исхода.
    Pending,
}

#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub correlation_id: String,
    pub outcome: GatewayOutcome,
    pub phone: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: InitiateRequest) -> Result<Initiation, GatewayError>;
    async fn poll_status(&self, correlation_id: &str) -> Result<GatewayOutcome, GatewayError>;
    /// Разбирает недоверенный webhook. Сумма в нём сверяется вызывающей стороной.
    fn parse_callback(&self, payload: &Value) -> Result<CallbackEvent, GatewayError>;
}

/// Состояния "Автоматического выключателя" (Circuit Breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим: запросы разрешены.
    Closed,
    /// Порог сбоев достигнут: запросы блокируются до истечения таймаута.
    Open,
    /// Таймаут истёк: пропускаем пробные запросы.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            failure_threshold: config.failure_threshold.max(1),
            timeout_duration: Duration::from_secs(config.timeout_seconds),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Состояние выключателя всегда согласовано, отравление можно игнорировать
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.timeout_duration {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }
}

/// Приводит номер к виду `2547XXXXXXXX` / `2541XXXXXXXX`.
/// Принимает `07..`, `01..`, `+254..`, `254..`, пробелы и дефисы игнорируются.
pub fn normalize_phone(raw: &str) -> Result<String, TicketingError> {
    let compact: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    let local = if let Some(rest) = digits.strip_prefix("254") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits
    };

    let valid = local.len() == 9
        && local.chars().all(|c| c.is_ascii_digit())
        && (local.starts_with('7') || local.starts_with('1'));
    if !valid {
        return Err(TicketingError::Validation(format!(
            "phone number {:?} is not a valid Kenyan mobile number",
            raw
        )));
    }
    Ok(format!("254{}", local))
}

/// Повторяет операцию, пока шлюз недоступен, с экспоненциальной задержкой.
pub async fn retry_with_backoff<T, F, Fut>(retry: &RetryConfig, mut operation: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut delay = Duration::from_millis(retry.base_delay_ms);
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(e) if e.is_retriable() && attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "Gateway call failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            result => return result,
        }
    }
}

// --- Модели данных API Daraja ---

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: i64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "ResponseCode")]
    response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    response_description: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    #[serde(rename = "CustomerMessage")]
    customer_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: Value,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
struct CallbackItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Daraja присылает коды то строкой, то числом.
fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Разбор webhook STK push (`Body.stkCallback`).
pub fn parse_stk_callback(payload: &Value) -> Result<CallbackEvent, GatewayError> {
    let envelope: StkCallbackEnvelope = serde_json::from_value(payload.clone())
        .map_err(|e| GatewayError::Malformed(format!("unexpected STK callback shape: {}", e)))?;
    let callback = envelope.body.stk_callback;

    if callback.checkout_request_id.trim().is_empty() {
        return Err(GatewayError::Malformed("empty CheckoutRequestID".to_string()));
    }
    let code = code_string(&callback.result_code)
        .ok_or_else(|| GatewayError::Malformed("missing ResultCode".to_string()))?;

    let mut receipt_id = None;
    let mut amount = None;
    let mut phone = None;
    for item in callback.callback_metadata.map(|m| m.items).unwrap_or_default() {
        let Some(value) = item.value.as_ref() else {
            continue;
        };
        match item.name.as_str() {
            "MpesaReceiptNumber" => receipt_id = value_string(value),
            "Amount" => amount = value_amount(value),
            "PhoneNumber" => phone = value_string(value),
            _ => {}
        }
    }

    let outcome = if code == "0" {
        GatewayOutcome::Success { receipt_id, amount }
    } else {
        GatewayOutcome::Failure {
            reason: callback
                .result_desc
                .unwrap_or_else(|| format!("result code {}", code)),
        }
    };

    Ok(CallbackEvent {
        correlation_id: callback.checkout_request_id,
        outcome,
        phone,
    })
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Клиент Daraja API. Все сетевые вызовы защищены `CircuitBreaker`.
pub struct MpesaClient {
    config: MpesaConfig,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig, breaker: &CircuitBreakerConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            circuit_breaker: CircuitBreaker::new(breaker),
            token: tokio::sync::Mutex::new(None),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Пропускает операцию через Circuit Breaker. Сбоем считается только недоступность.
    async fn execute_with_circuit_breaker<F, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        match operation.await {
            Err(e) if e.is_retriable() => {
                error!("Payment gateway request failed: {}", e);
                self.circuit_breaker.record_failure();
                Err(e)
            }
            result => {
                self.circuit_breaker.record_success();
                result
            }
        }
    }

    fn timestamp() -> String {
        let now = Utc::now();
        match FixedOffset::east_opt(NAIROBI_OFFSET_SECS) {
            Some(tz) => now.with_timezone(&tz).format("%Y%m%d%H%M%S").to_string(),
            None => now.format("%Y%m%d%H%M%S").to_string(),
        }
    }

    /// Пароль STK: base64(shortcode + passkey + timestamp).
    fn password(&self, timestamp: &str) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.config.shortcode,
            self.config.passkey.expose(),
            timestamp
        ))
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http_client
            .get(self.url("/oauth/v1/generate"))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(self.config.consumer_secret.expose()))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("OAuth request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("OAuth endpoint returned {}", status)));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("OAuth endpoint returned {}", status)));
        }

        let body: OAuthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("OAuth response: {}", e)))?;
        let ttl = body
            .expires_in
            .as_ref()
            .and_then(|v| code_string(v))
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        debug!(ttl, "Fetched M-Pesa access token");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)),
        });
        Ok(body.access_token)
    }

    async fn stk_push(&self, request: &InitiateRequest) -> Result<Initiation, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let payload = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: &self.config.transaction_type,
            amount: request.amount,
            party_a: &request.phone,
            party_b: &self.config.shortcode,
            phone_number: &request.phone,
            callback_url: &self.config.callback_url,
            account_reference: &request.reference,
            transaction_desc: request.description.chars().take(MAX_DESCRIPTION_CHARS).collect(),
        };

        let response = self
            .http_client
            .post(self.url("/mpesa/stkpush/v1/processrequest"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK push request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("STK push returned {}", status)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("STK push response: {}", e)))?;
        if !status.is_success() {
            let message = body
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(GatewayError::Rejected(format!("HTTP {}: {}", status, message)));
        }

        let body: StkPushResponse = serde_json::from_value(body)
            .map_err(|e| GatewayError::Malformed(format!("STK push response: {}", e)))?;
        match (body.response_code.as_deref(), body.checkout_request_id) {
            (Some("0"), Some(correlation_id)) if !correlation_id.is_empty() => Ok(Initiation {
                correlation_id,
                customer_message: body.customer_message,
            }),
            _ => Err(GatewayError::Rejected(
                body.response_description
                    .unwrap_or_else(|| "STK push failed".to_string()),
            )),
        }
    }

    async fn stk_query(&self, correlation_id: &str) -> Result<GatewayOutcome, GatewayError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();
        let payload = StkQueryRequest {
            business_short_code: &self.config.shortcode,
            password: self.password(&timestamp),
            timestamp,
            checkout_request_id: correlation_id,
        };

        let response = self
            .http_client
            .post(self.url("/mpesa/stkpushquery/v1/query"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("STK query request failed: {}", e)))?;

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();

        let error_code = body
            .as_ref()
            .and_then(|b| b.get("errorCode"))
            .and_then(code_string);
        if error_code.as_deref() == Some(STILL_PROCESSING_CODE) {
            return Ok(GatewayOutcome::Pending);
        }
        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!("STK query returned {}", status)));
        }
        let body = body.ok_or_else(|| GatewayError::Malformed("STK query response is not JSON".to_string()))?;
        if !status.is_success() {
            let message = body
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("request rejected");
            return Err(GatewayError::Rejected(format!("HTTP {}: {}", status, message)));
        }

        let Some(result_code) = body.get("ResultCode").and_then(code_string) else {
            // Запрос принят, но исход ещё не определён
            return Ok(GatewayOutcome::Pending);
        };
        if result_code == "0" {
            return Ok(GatewayOutcome::Success {
                receipt_id: None,
                amount: None,
            });
        }
        let reason = body
            .get("ResultDesc")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("result code {}", result_code));
        Ok(GatewayOutcome::Failure { reason })
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn initiate(&self, request: InitiateRequest) -> Result<Initiation, GatewayError> {
        info!(
            reference = %request.reference,
            amount = request.amount,
            circuit = ?self.circuit_breaker.get_state(),
            "Initiating STK push"
        );
        self.execute_with_circuit_breaker(self.stk_push(&request)).await
    }

    async fn poll_status(&self, correlation_id: &str) -> Result<GatewayOutcome, GatewayError> {
        debug!(correlation_id, "Querying STK push status");
        self.execute_with_circuit_breaker(self.stk_query(correlation_id)).await
    }

    fn parse_callback(&self, payload: &Value) -> Result<CallbackEvent, GatewayError> {
        parse_stk_callback(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phone_numbers_are_normalized() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("+254 712 345 678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("254110000000").unwrap(), "254110000000");
        assert_eq!(normalize_phone("0110-000-000").unwrap(), "254110000000");
        assert!(normalize_phone("0812345678").is_err());
        assert!(normalize_phone("2547123").is_err());
        assert!(normalize_phone("abc").is_err());
    }

    #[test]
    fn success_callback_is_parsed() {
        let payload = json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 3000.00},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "Balance"},
                    {"Name": "PhoneNumber", "Value": 254708374149u64}
                ]}
            }}
        });
        let event = parse_stk_callback(&payload).unwrap();
        assert_eq!(event.correlation_id, "ws_CO_191220191020363925");
        assert_eq!(
            event.outcome,
            GatewayOutcome::Success {
                receipt_id: Some("NLJ7RT61SV".to_string()),
                amount: Some(3000)
            }
        );
        assert_eq!(event.phone.as_deref(), Some("254708374149"));
    }

    #[test]
    fn failed_callback_keeps_reason() {
        let payload = json!({
            "Body": {"stkCallback": {
                "CheckoutRequestID": "ws_CO_1",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }}
        });
        let event = parse_stk_callback(&payload).unwrap();
        assert_eq!(
            event.outcome,
            GatewayOutcome::Failure {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn garbage_callback_is_malformed() {
        assert!(matches!(
            parse_stk_callback(&json!({"hello": "world"})),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn breaker_opens_at_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 2,
            timeout_seconds: 0,
        });
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.get_state(), CircuitState::Open);

        // Таймаут нулевой: следующий запрос пробный
        assert!(breaker.can_execute());
        assert_eq!(breaker.get_state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[test]
    fn open_breaker_blocks_until_timeout() {
        let breaker = CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_seconds: 60,
        });
        breaker.record_failure();
        assert!(!breaker.can_execute());
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_retriable_errors() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1,
        };
        let mut calls = 0;
        let result: Result<(), GatewayError> = retry_with_backoff(&retry, || {
            calls += 1;
            async { Err(GatewayError::Rejected("bad request".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        };
        let mut calls = 0;
        let result: Result<(), GatewayError> = retry_with_backoff(&retry, || {
            calls += 1;
            async { Err(GatewayError::Unavailable("timeout".into())) }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(calls, 3);
    }
}
