// Payment boundary
pub mod checkout;
pub mod payments;

// Citizen requests
pub mod request_form;
pub mod requests;

// Documents
pub mod certificates;

// Accounts
pub mod profiles;
