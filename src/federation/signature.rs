//! HTTP Signatures for ActivityPub
//!
//! Implements request signing per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Inbound verification is intentionally not implemented here; the inbound
//! boundary only classifies and enqueues, and trust rests on the signatures
//! we produce over our own responses.

use crate::error::AppError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// Headers to add for a signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Compute the Digest header value for a request body.
pub fn generate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

/// Sign an HTTP request
///
/// Creates HTTP Signature header for outgoing requests.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    // 1. Parse URL to get host and path
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

    let path = parsed_url.path();
    let query = parsed_url.query();
    let path_and_query = if let Some(q) = query {
        format!("{}?{}", path, q)
    } else {
        path.to_string()
    };

    // 2. Generate Date header (RFC 2822 format)
    let date = chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();

    // 3. Generate Digest if body present
    let digest = body.map(generate_digest);

    // 4. Build signing string
    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];

    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    // 5. Sign with RSA-SHA256
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{SignatureEncoding, Signer};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid private key: {}", e)))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
    let signature = signing_key.sign(signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    // 6. Build Signature header
    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_key_pem() -> String {
        let mut rng = rand::thread_rng();
        let key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string()
    }

    #[test]
    fn generate_digest_uses_sha256_base64() {
        let digest = generate_digest(b"hello");
        assert!(digest.starts_with("SHA-256="));
        // echo -n hello | sha256sum | xxd -r -p | base64
        assert_eq!(digest, "SHA-256=LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=");
    }

    #[test]
    fn sign_request_includes_digest_for_body() {
        let pem = test_key_pem();
        let headers = sign_request(
            "POST",
            "https://remote.example/inbox",
            Some(b"{}"),
            &pem,
            "https://b.example/actors/b.example/alice#main-key",
        )
        .unwrap();

        assert!(headers.digest.is_some());
        assert!(headers.signature.contains("keyId=\"https://b.example/actors/b.example/alice#main-key\""));
        assert!(headers.signature.contains("headers=\"(request-target) host date digest\""));
        assert!(headers.signature.contains("algorithm=\"rsa-sha256\""));
    }

    #[test]
    fn sign_request_without_body_omits_digest() {
        let pem = test_key_pem();
        let headers = sign_request(
            "GET",
            "https://remote.example/users/bob",
            None,
            &pem,
            "https://b.example/actors/b.example/alice#main-key",
        )
        .unwrap();

        assert!(headers.digest.is_none());
        assert!(headers.signature.contains("headers=\"(request-target) host date\""));
    }

    #[test]
    fn sign_request_rejects_invalid_url() {
        let pem = test_key_pem();
        let result = sign_request("POST", "not a url", None, &pem, "key");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
