use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::models::identity::{Identity, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity is established upstream by the gateway; this only reads it
/// and hands it to handlers as an `Identity` extension.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, (StatusCode, String)> {
    match identity_from_headers(req.headers()) {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Err(reason) => {
            tracing::debug!(reason = %reason, "request rejected without identity");
            Err((StatusCode::UNAUTHORIZED, reason))
        }
    }
}

pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, String> {
    let user_id = header_str(headers, USER_ID_HEADER)?
        .parse::<Uuid>()
        .map_err(|_| format!("{} is not a valid id", USER_ID_HEADER))?;
    let role = header_str(headers, USER_ROLE_HEADER)?.parse::<Role>()?;
    Ok(Identity { user_id, role })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, String> {
    headers
        .get(name)
        .ok_or_else(|| format!("missing {} header", name))?
        .to_str()
        .map_err(|_| format!("{} header is not valid text", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_identity() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("Counselor"));
        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(identity.user_id, id);
        assert_eq!(identity.role, Role::Counselor);
    }

    #[test]
    fn missing_role_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_ID_HEADER,
            HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap(),
        );
        assert!(identity_from_headers(&headers).is_err());
    }
}
