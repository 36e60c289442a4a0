//! HTTP negotiate handshake.

use reqwest::Url;
use serde::Deserialize;

use crate::endpoint::negotiate_url;
use crate::error::HubError;

/// Body of a successful negotiate response.
///
/// Either `url` (redirect to another endpoint, usually with a short-lived
/// `access_token`) or `connection_id` (connect back to the base URL) is
/// expected. Absent fields are not an error here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Posts to `{base}/negotiate` and parses the response.
pub async fn negotiate(
    http: &reqwest::Client,
    base: &Url,
    api_key: Option<&str>,
    group: Option<&str>,
    bearer_token: Option<&str>,
) -> Result<NegotiateResponse, HubError> {
    let url = negotiate_url(base, api_key, group);

    let mut request = http.post(url);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(HubError::NegotiationRequest)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HubError::Negotiation {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<NegotiateResponse>()
        .await
        .map_err(HubError::NegotiationRequest)
}
