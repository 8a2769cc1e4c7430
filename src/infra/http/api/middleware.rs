use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use verdant_api_types::SESSION_COOKIE;

/// Session token presented with a request, if any. Checking it is left to
/// the content service so every operation authorizes the same way.
#[derive(Debug, Clone, Default)]
pub struct PresentedToken(pub Option<String>);

impl PresentedToken {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

pub async fn session_token(mut request: Request<Body>, next: Next) -> Response {
    let token = extract_token(request.headers().get(header::AUTHORIZATION))
        .or_else(|| cookie_token(request.headers()));
    request.extensions_mut().insert(PresentedToken(token));
    next.run(request).await
}

fn extract_token(header: Option<&HeaderValue>) -> Option<String> {
    let raw = header?.to_str().ok()?;
    let bearer = raw.strip_prefix("Bearer ")?.trim();
    (!bearer.is_empty()).then(|| bearer.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer vs_header"),
        );
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("verdant_session=vs_cookie"),
        );

        let token = extract_token(headers.get(header::AUTHORIZATION))
            .or_else(|| cookie_token(&headers));
        assert_eq!(token.as_deref(), Some("vs_header"));
    }

    #[test]
    fn cookie_is_used_without_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; verdant_session=vs_cookie"),
        );
        assert_eq!(cookie_token(&headers).as_deref(), Some("vs_cookie"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let value = HeaderValue::from_static("Basic Zm9vOmJhcg==");
        assert_eq!(extract_token(Some(&value)), None);
        let empty = HeaderValue::from_static("Bearer ");
        assert_eq!(extract_token(Some(&empty)), None);
    }
}
