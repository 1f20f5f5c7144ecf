//! External credential import
//!
//! Recognizes credential documents attached to inbound notes. Formats are
//! registered as ordered {matcher, importer} pairs, so supporting a new
//! format is an additive change. Imports are deduplicated by canonical
//! note id: re-importing the same credential returns the existing grant.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::data::{BadgeGrant, Database, EntityId};
use crate::error::AppError;

/// Credential data extracted from an external document
#[derive(Debug, Clone)]
pub struct ParsedCredential {
    /// Canonical note identifier (the document's own id)
    pub note_id: String,
    pub title: String,
    pub description: String,
    pub criteria: Option<String>,
    pub issued_by: String,
    pub recipient_uri: String,
    pub issued_at: Option<DateTime<Utc>>,
}

type Matcher = fn(&serde_json::Value) -> bool;
type Importer = fn(&serde_json::Value) -> Result<ParsedCredential, AppError>;

/// One recognized credential format
pub struct CredentialFormat {
    pub name: &'static str,
    matcher: Matcher,
    importer: Importer,
}

/// Recognized formats, evaluated in order; first match wins.
pub const FORMATS: &[CredentialFormat] = &[
    CredentialFormat {
        name: "openbadges-v2",
        matcher: matches_openbadges_v2,
        importer: import_openbadges_v2,
    },
    CredentialFormat {
        name: "w3c-vc-2.0",
        matcher: matches_w3c_vc,
        importer: import_w3c_vc,
    },
];

/// Find the first format whose context marker matches the document.
pub fn recognize(document: &serde_json::Value) -> Option<&'static CredentialFormat> {
    FORMATS.iter().find(|f| (f.matcher)(document))
}

fn context_contains(document: &serde_json::Value, marker: &str) -> bool {
    match &document["@context"] {
        serde_json::Value::String(s) => s.contains(marker),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .any(|s| s.contains(marker)),
        _ => false,
    }
}

fn matches_openbadges_v2(document: &serde_json::Value) -> bool {
    context_contains(document, "openbadges")
}

fn matches_w3c_vc(document: &serde_json::Value) -> bool {
    context_contains(document, "www.w3.org/ns/credentials")
}

fn required_str<'a>(value: &'a serde_json::Value, field: &str) -> Result<&'a str, AppError> {
    value[field]
        .as_str()
        .ok_or_else(|| AppError::Unprocessable(format!("Credential missing {}", field)))
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// OpenBadges v2 Assertion: badge class carries the metadata, the
/// recipient sits under "recipient.identity".
fn import_openbadges_v2(document: &serde_json::Value) -> Result<ParsedCredential, AppError> {
    let note_id = required_str(document, "id")?.to_string();
    let badge = &document["badge"];

    Ok(ParsedCredential {
        note_id,
        title: required_str(badge, "name")?.to_string(),
        description: badge["description"].as_str().unwrap_or_default().to_string(),
        criteria: badge["criteria"]["narrative"].as_str().map(String::from),
        issued_by: badge["issuer"]["id"]
            .as_str()
            .or_else(|| badge["issuer"].as_str())
            .ok_or_else(|| AppError::Unprocessable("Credential missing issuer".to_string()))?
            .to_string(),
        recipient_uri: required_str(&document["recipient"], "identity")?.to_string(),
        issued_at: parse_timestamp(&document["issuedOn"]),
    })
}

/// W3C Verifiable Credentials 2.0: achievement metadata sits under
/// "credentialSubject.achievement".
fn import_w3c_vc(document: &serde_json::Value) -> Result<ParsedCredential, AppError> {
    let note_id = required_str(document, "id")?.to_string();
    let subject = &document["credentialSubject"];
    let achievement = &subject["achievement"];

    Ok(ParsedCredential {
        note_id,
        title: required_str(achievement, "name")?.to_string(),
        description: achievement["description"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        criteria: achievement["criteria"]["narrative"]
            .as_str()
            .map(String::from),
        issued_by: document["issuer"]["id"]
            .as_str()
            .or_else(|| document["issuer"].as_str())
            .ok_or_else(|| AppError::Unprocessable("Credential missing issuer".to_string()))?
            .to_string(),
        recipient_uri: required_str(subject, "id")?.to_string(),
        issued_at: parse_timestamp(&document["validFrom"]),
    })
}

/// External credential import service
pub struct ImportService {
    db: Arc<Database>,
}

impl ImportService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Import credential documents attached to an inbound note.
    ///
    /// Returns the first imported (or deduplicated) grant, or None when no
    /// attachment matches a recognized format.
    pub async fn import_from_object(
        &self,
        object: &serde_json::Value,
    ) -> Result<Option<BadgeGrant>, AppError> {
        let attachments = match object["attachment"].as_array() {
            Some(attachments) => attachments.clone(),
            None => return Ok(None),
        };

        for attachment in &attachments {
            if let Some(format) = recognize(attachment) {
                tracing::debug!(format = format.name, "Recognized credential attachment");
                let credential = (format.importer)(attachment)?;
                return Ok(Some(self.import_credential(credential).await?));
            }
        }

        Ok(None)
    }

    /// Persist a parsed credential, deduplicated by canonical note id.
    ///
    /// Imported grants are externally sourced and already accepted: there is
    /// no local key material to seal them with and no acceptance step to run.
    pub async fn import_credential(
        &self,
        credential: ParsedCredential,
    ) -> Result<BadgeGrant, AppError> {
        if let Some(existing) = self.db.get_grant_by_note_id(&credential.note_id).await? {
            tracing::debug!(note_id = %credential.note_id, grant_id = %existing.id, "Credential already imported");
            return Ok(existing);
        }

        let now = Utc::now();
        let grant = BadgeGrant {
            id: EntityId::new().0,
            badge_id: None,
            title: credential.title,
            description: credential.description,
            criteria: credential.criteria,
            issued_by: credential.issued_by,
            recipient_uri: credential.recipient_uri,
            recipient_name: None,
            recipient_email: None,
            issued_at: credential.issued_at.unwrap_or(now),
            accepted_at: Some(now),
            boosted_at: None,
            revoked_at: None,
            accept_key: None,
            fingerprint: None,
            note_id: Some(credential.note_id.clone()),
            is_external: true,
            is_public: true,
        };

        self.db.insert_grant(&grant).await?;
        tracing::info!(grant_id = %grant.id, note_id = %credential.note_id, "External credential imported");
        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_db() -> (Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::connect(&db_path).await.unwrap();
        (Arc::new(db), temp_dir)
    }

    fn openbadges_assertion(id: &str) -> serde_json::Value {
        serde_json::json!({
            "@context": "https://w3id.org/openbadges/v2",
            "type": "Assertion",
            "id": id,
            "badge": {
                "name": "Community Helper",
                "description": "Answered questions in the forum",
                "criteria": { "narrative": "Ten accepted answers" },
                "issuer": { "id": "https://c.example/issuer" }
            },
            "recipient": { "identity": "https://a.example/users/bob" },
            "issuedOn": "2026-02-01T09:00:00Z"
        })
    }

    fn vc_credential(id: &str) -> serde_json::Value {
        serde_json::json!({
            "@context": ["https://www.w3.org/ns/credentials/v2"],
            "type": ["VerifiableCredential", "OpenBadgeCredential"],
            "id": id,
            "issuer": { "id": "https://c.example/issuer" },
            "validFrom": "2026-02-01T09:00:00Z",
            "credentialSubject": {
                "id": "https://a.example/users/bob",
                "achievement": {
                    "name": "Community Helper",
                    "description": "Answered questions in the forum",
                    "criteria": { "narrative": "Ten accepted answers" }
                }
            }
        })
    }

    #[test]
    fn recognize_matches_formats_in_registration_order() {
        let openbadges = openbadges_assertion("https://c.example/assertions/1");
        assert_eq!(recognize(&openbadges).unwrap().name, "openbadges-v2");

        let vc = vc_credential("https://c.example/credentials/1");
        assert_eq!(recognize(&vc).unwrap().name, "w3c-vc-2.0");

        let unrelated = serde_json::json!({"@context": "https://schema.org"});
        assert!(recognize(&unrelated).is_none());
    }

    #[test]
    fn openbadges_importer_extracts_badge_class_fields() {
        let credential =
            import_openbadges_v2(&openbadges_assertion("https://c.example/assertions/1")).unwrap();

        assert_eq!(credential.note_id, "https://c.example/assertions/1");
        assert_eq!(credential.title, "Community Helper");
        assert_eq!(
            credential.criteria.as_deref(),
            Some("Ten accepted answers")
        );
        assert_eq!(credential.issued_by, "https://c.example/issuer");
        assert_eq!(credential.recipient_uri, "https://a.example/users/bob");
        assert!(credential.issued_at.is_some());
    }

    #[test]
    fn vc_importer_extracts_achievement_fields() {
        let credential = import_w3c_vc(&vc_credential("https://c.example/credentials/1")).unwrap();

        assert_eq!(credential.note_id, "https://c.example/credentials/1");
        assert_eq!(credential.title, "Community Helper");
        assert_eq!(credential.recipient_uri, "https://a.example/users/bob");
    }

    #[test]
    fn importer_rejects_document_without_id() {
        let mut document = openbadges_assertion("https://c.example/assertions/1");
        document.as_object_mut().unwrap().remove("id");

        let result = import_openbadges_v2(&document);
        assert!(matches!(result, Err(AppError::Unprocessable(_))));
    }

    #[tokio::test]
    async fn importing_same_credential_twice_returns_same_grant() {
        let (db, _temp_dir) = create_test_db().await;
        let service = ImportService::new(db);

        let object = serde_json::json!({
            "type": "Note",
            "id": "https://c.example/notes/1",
            "attachment": [openbadges_assertion("https://c.example/assertions/42")]
        });

        let first = service.import_from_object(&object).await.unwrap().unwrap();
        let second = service.import_from_object(&object).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.is_external);
        assert!(first.accepted_at.is_some());
        assert!(first.accept_key.is_none());
        assert_eq!(
            first.note_id.as_deref(),
            Some("https://c.example/assertions/42")
        );
    }

    #[tokio::test]
    async fn objects_without_credential_attachments_import_nothing() {
        let (db, _temp_dir) = create_test_db().await;
        let service = ImportService::new(db);

        let plain_note = serde_json::json!({
            "type": "Note",
            "id": "https://c.example/notes/2",
            "content": "hello"
        });
        assert!(service
            .import_from_object(&plain_note)
            .await
            .unwrap()
            .is_none());

        let unrelated_attachment = serde_json::json!({
            "type": "Note",
            "id": "https://c.example/notes/3",
            "attachment": [{"type": "Image", "url": "https://c.example/cat.png"}]
        });
        assert!(service
            .import_from_object(&unrelated_attachment)
            .await
            .unwrap()
            .is_none());
    }
}
