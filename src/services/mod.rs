pub mod cancellation;
pub mod confirmation;
pub mod initiation;
pub mod inventory;
pub mod issuance;
pub mod notifier;
pub mod payment;
pub mod qr;
pub mod reconciler;
pub mod reservation;
pub mod signing;
pub mod verification;
