use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::checkout::create_checkout,
        crate::api::payments::init_payment,
        crate::api::payments::khipu_status,
        crate::api::payments::payments_by_order,
        crate::api::callbacks::webpay_commit,
        crate::api::callbacks::khipu_notify
    ),
    components(
        schemas(
            crate::checkout::CheckoutRequest,
            crate::checkout::CheckoutItem,
            crate::api::payments::InitRequest,
            crate::api::payments::InitResponse,
            crate::api::payments::PaymentList,
            crate::reconcile::OrderPayments,
            crate::models::Order,
            crate::models::OrderItem,
            crate::models::OrderStatus,
            crate::models::Payment
        )
    ),
    tags(
        (name = "checkout", description = "Order creation"),
        (name = "payments", description = "Payment initiation"),
        (name = "webpay", description = "Webpay browser return"),
        (name = "khipu", description = "Khipu webhook and status")
    )
)]
pub struct ApiDoc;
