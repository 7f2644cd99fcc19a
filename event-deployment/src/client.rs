use std::time::Duration;

use reqwest::header;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::RequestError;

pub const USER_ID_HEADER: &str = "X-UserId";

pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("event-deployment")
        .timeout(timeout)
        .build()
        .expect("failed to construct reqwest client for event deployment")
}

/// Append escaped path segments to a base url, keeping any path the base already has.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, RequestError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| RequestError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Turn every status >= 300 into an `UnexpectedStatus` error carrying the response body.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    let status = response.status();
    if status.as_u16() < 300 {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RequestError::UnexpectedStatus { status, body })
}

pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RequestError> {
    let response = check_status(response).await?;
    Ok(response.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_escapes_segments() {
        let url = endpoint("http://repo:8080", &["devices", "urn:infai:ses:device:1#a"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://repo:8080/devices/urn:infai:ses:device:1%23a"
        );
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let url = endpoint("http://gateway/api/", &["pipeline", "p1"]).unwrap();
        assert_eq!(url.as_str(), "http://gateway/api/pipeline/p1");
    }

    #[test]
    fn endpoint_rejects_garbage() {
        assert!(endpoint("not a url", &["x"]).is_err());
    }
}
