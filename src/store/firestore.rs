use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};

use super::firestore_types::{self as types, Document, QueryRow, APPOINTMENTS, MEDICATIONS};
use super::{AppointmentStore, MedicationStore, StoreError};
use crate::config::FirestoreSettings;
use crate::models::enums::Weekday;
use crate::models::*;

const BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Cloud document store over the Firestore REST API (blocking).
pub struct FirestoreStore {
    documents_url: String,
    client: Client,
    token: Option<String>,
    timeout_secs: u64,
}

impl FirestoreStore {
    pub fn new(settings: &FirestoreSettings) -> Result<Self, StoreError> {
        Self::with_base_url(BASE_URL, settings)
    }

    /// Point at another host, e.g. the local emulator.
    pub fn with_base_url(base_url: &str, settings: &FirestoreSettings) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            documents_url: format!(
                "{}/projects/{}/databases/{}/documents",
                base_url.trim_end_matches('/'),
                settings.project_id,
                settings.database
            ),
            client,
            token: settings.token.clone(),
            timeout_secs: settings.timeout_secs,
        })
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.documents_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().map_err(|e| {
            if e.is_timeout() {
                StoreError::Transport(format!("Request timed out after {}s", self.timeout_secs))
            } else {
                StoreError::Transport(e.to_string())
            }
        })
    }

    fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StoreError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn decode<T: serde::de::DeserializeOwned>(response: Response, entity: &str) -> Result<T, StoreError> {
        response.json().map_err(|e| StoreError::Decode {
            entity_type: entity.into(),
            reason: e.to_string(),
        })
    }

    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let response = self.send(self.client.get(self.document_url(collection, id)))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response)?;
        Self::decode(response, collection).map(Some)
    }

    /// PATCH with an optional field mask. With a mask, the document must already exist.
    fn patch_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        mask: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut url = self.document_url(collection, id);
        if let Some(path) = mask {
            url.push_str(&format!("?updateMask.fieldPaths={path}&currentDocument.exists=true"));
        }

        let response = self.send(self.client.patch(url).json(&json!({ "fields": fields })))?;
        if mask.is_some() && response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                entity_type: collection.into(),
                id: id.into(),
            });
        }
        Self::check(response)?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let url = format!("{}?currentDocument.exists=true", self.document_url(collection, id));
        let response = self.send(self.client.delete(url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check(response)?;
        Ok(true)
    }

    fn query_user(&self, collection: &str, user_id: &str) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}:runQuery", self.documents_url);
        let response = self.send(self.client.post(url).json(&types::user_query(collection, user_id)))?;
        let rows: Vec<QueryRow> = Self::decode(Self::check(response)?, collection)?;
        Ok(rows.into_iter().filter_map(|row| row.document).collect())
    }
}

impl MedicationStore for FirestoreStore {
    fn list_medications(&self, user_id: &str) -> Result<Vec<Medication>, StoreError> {
        let docs = self.query_user(MEDICATIONS, user_id)?;
        let mut meds = docs
            .iter()
            .map(types::medication_from_document)
            .collect::<Result<Vec<_>, _>>()?;
        meds.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        Ok(meds)
    }

    fn get_medication(&self, id: &str) -> Result<Option<Medication>, StoreError> {
        self.get_document(MEDICATIONS, id)?
            .map(|doc| types::medication_from_document(&doc))
            .transpose()
    }

    fn upsert_medication(&self, med: &Medication) -> Result<(), StoreError> {
        self.patch_document(MEDICATIONS, &med.id, types::medication_fields(med), None)
    }

    fn delete_medication(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_document(MEDICATIONS, id)
    }

    fn update_schedule_day(
        &self,
        medication_id: &str,
        day: Weekday,
        entries: &[ChecklistEntry],
    ) -> Result<(), StoreError> {
        let mask = format!("schedule.{}", day.as_str());
        self.patch_document(
            MEDICATIONS,
            medication_id,
            types::schedule_day_fields(day, entries),
            Some(&mask),
        )
    }
}

impl AppointmentStore for FirestoreStore {
    fn list_appointments(&self, user_id: &str) -> Result<Vec<Appointment>, StoreError> {
        let docs = self.query_user(APPOINTMENTS, user_id)?;
        let mut appts = docs
            .iter()
            .map(types::appointment_from_document)
            .collect::<Result<Vec<_>, _>>()?;
        // Same order as the local cache: dated first, then by date and time
        appts.sort_by(|a, b| {
            (a.date.is_none(), a.date, a.time, &a.id).cmp(&(b.date.is_none(), b.date, b.time, &b.id))
        });
        Ok(appts)
    }

    fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, StoreError> {
        self.get_document(APPOINTMENTS, id)?
            .map(|doc| types::appointment_from_document(&doc))
            .transpose()
    }

    fn upsert_appointment(&self, appt: &Appointment) -> Result<(), StoreError> {
        self.patch_document(APPOINTMENTS, &appt.id, types::appointment_fields(appt), None)
    }

    fn delete_appointment(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_document(APPOINTMENTS, id)
    }

    fn set_appointment_done(&self, id: &str, done: bool) -> Result<(), StoreError> {
        self.patch_document(APPOINTMENTS, id, types::done_fields(done), Some("done"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FirestoreSettings {
        FirestoreSettings {
            project_id: "tbcare-dev".into(),
            database: "(default)".into(),
            token: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn documents_url_includes_project_and_database() {
        let store = FirestoreStore::new(&settings()).unwrap();
        assert_eq!(
            store.document_url(MEDICATIONS, "m1"),
            "https://firestore.googleapis.com/v1/projects/tbcare-dev/databases/(default)/documents/medications/m1"
        );
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let store = FirestoreStore::with_base_url("http://localhost:8080/v1/", &settings()).unwrap();
        assert!(store
            .document_url(APPOINTMENTS, "a1")
            .starts_with("http://localhost:8080/v1/projects/"));
    }

    #[test]
    fn unreachable_host_is_transport_error() {
        // Port 9 (discard) on loopback refuses connections
        let store = FirestoreStore::with_base_url("http://127.0.0.1:9/v1", &settings()).unwrap();
        let err = store.get_medication("m1").unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
