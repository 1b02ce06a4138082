use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticket_issuance::config::{CircuitBreakerConfig, Config};
use ticket_issuance::services::payment::{
    CircuitState, GatewayError, GatewayOutcome, InitiateRequest, MpesaClient, PaymentGateway,
};

fn client(server: &MockServer, failure_threshold: u32) -> MpesaClient {
    let mut mpesa = Config::for_tests().mpesa;
    mpesa.base_url = server.uri();
    MpesaClient::new(
        mpesa,
        &CircuitBreakerConfig {
            failure_threshold,
            timeout_seconds: 60,
        },
    )
    .unwrap()
}

async fn mount_oauth(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .and(query_param("grant_type", "client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-access-token",
            "expires_in": "3599"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn stk_request(description: &str) -> InitiateRequest {
    InitiateRequest {
        phone: "254712345678".to_string(),
        amount: 1500,
        reference: "TX0A1B2C3D4E".to_string(),
        description: description.to_string(),
    }
}

#[tokio::test]
async fn stk_push_returns_checkout_request_id() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .and(header("authorization", "Bearer test-access-token"))
        .and(body_partial_json(json!({
            "BusinessShortCode": "174379",
            "Amount": 1500,
            "PartyA": "254712345678",
            "PhoneNumber": "254712345678",
            "AccountReference": "TX0A1B2C3D4E",
            "TransactionDesc": "Nairobi Jazz "
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MerchantRequestID": "29115-34620561-1",
            "CheckoutRequestID": "ws_CO_191220191020363925",
            "ResponseCode": "0",
            "ResponseDescription": "Success. Request accepted for processing",
            "CustomerMessage": "Success. Request accepted for processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = client(&server, 5);
    let initiation = gateway
        .initiate(stk_request("Nairobi Jazz Night tickets"))
        .await
        .unwrap();
    assert_eq!(initiation.correlation_id, "ws_CO_191220191020363925");
    assert_eq!(
        initiation.customer_message.as_deref(),
        Some("Success. Request accepted for processing")
    );
}

#[tokio::test]
async fn access_token_is_reused_between_calls() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "0",
            "CheckoutRequestID": "ws_CO_1",
            "ResultCode": "0",
            "ResultDesc": "The service request is processed successfully."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = client(&server, 5);
    for _ in 0..2 {
        let outcome = gateway.poll_status("ws_CO_1").await.unwrap();
        assert!(matches!(outcome, GatewayOutcome::Success { .. }));
    }
}

#[tokio::test]
async fn query_maps_processing_and_cancelled_results() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .and(body_partial_json(json!({"CheckoutRequestID": "ws_CO_processing"})))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "requestId": "8773-19837-1",
            "errorCode": "500.001.1001",
            "errorMessage": "The transaction is being processed"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpushquery/v1/query"))
        .and(body_partial_json(json!({"CheckoutRequestID": "ws_CO_cancelled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ResponseCode": "0",
            "CheckoutRequestID": "ws_CO_cancelled",
            "ResultCode": "1032",
            "ResultDesc": "Request cancelled by user"
        })))
        .mount(&server)
        .await;

    let gateway = client(&server, 5);
    assert_eq!(
        gateway.poll_status("ws_CO_processing").await.unwrap(),
        GatewayOutcome::Pending
    );
    assert_eq!(
        gateway.poll_status("ws_CO_cancelled").await.unwrap(),
        GatewayOutcome::Failure {
            reason: "Request cancelled by user".to_string()
        }
    );
    assert_eq!(gateway.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn repeated_outages_open_the_circuit() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = client(&server, 2);
    for _ in 0..2 {
        let err = gateway.initiate(stk_request("Event tickets")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
    assert_eq!(gateway.circuit_state(), CircuitState::Open);

    // Третий вызов не доходит до сервера
    let err = gateway.initiate(stk_request("Event tickets")).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn rejected_request_does_not_trip_the_breaker() {
    let server = MockServer::start().await;
    mount_oauth(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/mpesa/stkpush/v1/processrequest"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "requestId": "11728-2929992-1",
            "errorCode": "400.002.02",
            "errorMessage": "Bad Request - Invalid PhoneNumber"
        })))
        .mount(&server)
        .await;

    let gateway = client(&server, 1);
    let err = gateway.initiate(stk_request("Event tickets")).await.unwrap_err();
    match &err {
        GatewayError::Rejected(message) => assert!(message.contains("Invalid PhoneNumber")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retriable());
    assert_eq!(gateway.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn oauth_failure_is_reported_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/oauth/v1/generate"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let gateway = client(&server, 5);
    let err = gateway.poll_status("ws_CO_1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(_)));
}
