//! URL construction for the negotiate request and the WebSocket.

use reqwest::Url;

use crate::error::HubError;
use crate::negotiate::NegotiateResponse;

/// Builds `{base}/negotiate?apiKey=..[&group=..]`, keeping any query the
/// base URL already carries.
pub fn negotiate_url(base: &Url, api_key: Option<&str>, group: Option<&str>) -> Url {
    let mut url = base.clone();
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);

    let pairs: Vec<(&str, &str)> = [("apiKey", api_key), ("group", group)]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect();
    append_query(&mut url, &pairs);
    url
}

/// Resolves the socket URL for one connection attempt.
///
/// A negotiated redirect `url` replaces the base URL; otherwise a negotiated
/// connection id is attached as `id`. A negotiated access token wins over
/// the caller's bearer token. Transport-only parameters always come last.
pub fn resolve_ws_url(
    base: &Url,
    negotiated: Option<&NegotiateResponse>,
    bearer_token: Option<&str>,
    transport_params: &[(String, String)],
) -> Result<Url, HubError> {
    let mut url = match negotiated.and_then(|n| n.url.as_deref()) {
        Some(redirect) => {
            Url::parse(redirect).map_err(|e| HubError::InvalidUrl(format!("{redirect}: {e}")))?
        }
        None => {
            let mut url = base.clone();
            if let Some(id) = negotiated.and_then(|n| n.connection_id.as_deref()) {
                append_query(&mut url, &[("id", id)]);
            }
            url
        }
    };

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(HubError::InvalidUrl(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| HubError::InvalidUrl(format!("cannot use scheme '{scheme}' for {url}")))?;

    let token = negotiated
        .and_then(|n| n.access_token.as_deref())
        .or(bearer_token);
    if let Some(token) = token {
        append_query(&mut url, &[("access_token", token)]);
    }

    let params: Vec<(&str, &str)> = transport_params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    append_query(&mut url, &params);

    Ok(url)
}

/// Appends query pairs in order. Leaves the URL untouched when empty, so no
/// dangling `?` is produced.
fn append_query(url: &mut Url, pairs: &[(&str, &str)]) {
    if pairs.is_empty() {
        return;
    }
    let mut query = url.query_pairs_mut();
    for (k, v) in pairs {
        query.append_pair(k, v);
    }
}
