//! WebFinger protocol implementation
//!
//! Lets remote servers discover issuing actors from `user@domain` addresses.

use serde::{Deserialize, Serialize};

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Generate WebFinger response for a local actor.
///
/// Actor URIs carry the domain segment so one server can host several
/// issuing domains side by side.
pub fn generate_webfinger_response(
    username: &str,
    domain: &str,
    protocol: &str,
) -> WebFingerResponse {
    let subject = format!("acct:{}@{}", username, domain);
    let actor_url = format!("{}://{}/actors/{}/{}", protocol, domain, domain, username);

    WebFingerResponse {
        subject,
        aliases: Some(vec![actor_url.clone()]),
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: Some("application/activity+json".to_string()),
            href: Some(actor_url),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webfinger_response_points_at_domain_scoped_actor() {
        let response = generate_webfinger_response("alice", "b.example", "https");

        assert_eq!(response.subject, "acct:alice@b.example");
        let self_link = response
            .links
            .iter()
            .find(|l| l.rel == "self")
            .expect("self link");
        assert_eq!(
            self_link.href.as_deref(),
            Some("https://b.example/actors/b.example/alice")
        );
        assert_eq!(
            self_link.link_type.as_deref(),
            Some("application/activity+json")
        );
    }
}
