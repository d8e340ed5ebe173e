mod payment;

pub use payment::{PaymentApiClient, PaymentDetails};
