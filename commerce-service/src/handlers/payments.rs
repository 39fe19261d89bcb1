use axum::{
    extract::{Query, State},
    response::Redirect,
};

use crate::dtos::PaymentCallbackQuery;
use crate::startup::AppState;

/// Gateway return URL. Always answers with a redirect to the front end.
pub async fn payment_callback(
    State(state): State<AppState>,
    Query(query): Query<PaymentCallbackQuery>,
) -> Redirect {
    let outcome = state
        .orders
        .reconcile_callback(query.authority.as_deref(), query.status.as_deref())
        .await;

    let redirects = &state.config.redirects;
    if outcome.is_success() {
        Redirect::to(&redirects.success_url)
    } else {
        Redirect::to(&redirects.failure_url)
    }
}
