use axum::{Extension, Json};

use crate::models::auth::Identity;
use crate::models::task::UserInfoResponse;

/// GET /api/user — id of the authenticated caller.
pub async fn user_info(Extension(identity): Extension<Identity>) -> Json<UserInfoResponse> {
    Json(UserInfoResponse {
        user_id: identity.user_id,
    })
}
