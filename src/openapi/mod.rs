use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "eGov Portal API",
        version = "1.0.0",
        description = r#"
# eGov Citizen Services Portal API

Citizens pick a government service, fill in its form, pay the catalog fee through
Paystack and download a PDF certificate once the request is recorded.

## Payment flow

1. `POST /api/v1/checkout` validates the form and returns the checkout parameters
   (reference, amount in kobo, currency, public key).
2. The browser opens the hosted Paystack checkout with those parameters.
3. On success the browser calls `POST /api/v1/checkout/{reference}/confirm`. The
   server verifies the transaction with Paystack before anything is recorded.
4. On close the browser calls `POST /api/v1/checkout/{reference}/cancel`. A new
   submission always gets a new reference.

## Authentication

Every endpoint except the catalog, the provider webhook and health requires a
bearer token issued by the identity service:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Failures share one body. `kind` is one of `input`, `authentication`, `payment`,
`verification`, `persistence`, `read`, `not_found`, `conflict`, `internal`.
Payment failures carry the payment `reference` for support.

```json
{
  "error": "Bad Gateway",
  "kind": "verification",
  "message": "Error processing payment. Please contact support.",
  "reference": "EGOV-1718012345678-k3j9x0a2b",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "catalog", description = "Available services and their forms"),
        (name = "checkout", description = "Payment handshake"),
        (name = "requests", description = "Recorded requests and certificates"),
        (name = "payments", description = "Payment history and provider webhooks"),
        (name = "profile", description = "Citizen profile"),
        (name = "auth", description = "Session management")
    ),
    paths(
        // Catalog
        crate::handlers::catalog::list_services,
        crate::handlers::catalog::get_service,

        // Checkout
        crate::handlers::checkout::initiate_checkout,
        crate::handlers::checkout::confirm_checkout,
        crate::handlers::checkout::cancel_checkout,

        // Requests
        crate::handlers::requests::list_requests,
        crate::handlers::requests::get_request,
        crate::handlers::requests::download_certificate,

        // Payments
        crate::handlers::requests::payment_history,
        crate::handlers::payments::payment_webhook,

        // Profile
        crate::handlers::profile::get_profile,
        crate::handlers::profile::create_profile,
        crate::handlers::profile::update_profile,

        // Auth
        crate::auth::logout_handler,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,

            // Catalog types
            crate::catalog::ServiceDefinition,
            crate::catalog::FieldSpec,
            crate::catalog::FieldKind,

            // Checkout types
            crate::handlers::checkout::InitiateCheckoutRequest,
            crate::handlers::checkout::CheckoutStatusResponse,
            crate::services::checkout::CheckoutSession,
            crate::services::payments::PaymentReference,
            crate::entities::payment_attempt::AttemptStatus,

            // Request types
            crate::handlers::requests::RequestSummary,
            crate::entities::request::PaymentStatus,

            // Profile types
            crate::services::profiles::Profile,
            crate::services::profiles::CreateProfile,
            crate::services::profiles::UpdateProfileName,

            // Error types
            crate::errors::ErrorResponse,
            crate::errors::ErrorKind
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_the_payment_endpoints() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("eGov Portal API"));
        assert!(json.contains("/api/v1/checkout/{reference}/confirm"));
        assert!(json.contains("/api/v1/requests/{id}/certificate"));
        assert!(json.contains("bearer_auth"));
    }
}
